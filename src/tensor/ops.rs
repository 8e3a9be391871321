//! Channels-last convolution wrappers and scaled dot-product attention.

use candle_core::{Module, Result, Tensor, D};
use candle_nn::{Conv1d, Conv1dConfig, ConvTranspose1d, ConvTranspose1dConfig};

/// Applies a channels-first `Conv1d` to a channels-last `[B, L, C]`
/// input, returning `[B, L', C_out]`.
pub fn conv1d_channels_last(conv: &Conv1d, x: &Tensor) -> Result<Tensor> {
    let x = x.transpose(1, 2)?.contiguous()?;
    let y = conv.forward(&x)?;
    y.transpose(1, 2)?.contiguous()
}

/// Applies a channels-first `ConvTranspose1d` to a channels-last
/// `[B, L, C]` input, returning `[B, L', C_out]`.
pub fn conv_transpose1d_channels_last(conv: &ConvTranspose1d, x: &Tensor) -> Result<Tensor> {
    let x = x.transpose(1, 2)?.contiguous()?;
    let y = conv.forward(&x)?;
    y.transpose(1, 2)?.contiguous()
}

/// Builds a `Conv1dConfig` for a dilated residual convolution:
/// symmetric padding `= dilation * (kernel - 1) / 2` for odd kernels.
pub fn dilated_conv_config(padding: usize, dilation: usize) -> Conv1dConfig {
    Conv1dConfig {
        padding,
        stride: 1,
        dilation,
        groups: 1,
    }
}

/// Builds a `ConvTranspose1dConfig` for an upsampling stage.
pub fn upsample_conv_config(padding: usize, stride: usize) -> ConvTranspose1dConfig {
    ConvTranspose1dConfig {
        padding,
        output_padding: 0,
        stride,
        dilation: 1,
        groups: 1,
    }
}

/// Builds a `Conv1dConfig` for a strided downsampling stage (the
/// encoder-side mirror of [`upsample_conv_config`]).
pub fn downsample_conv_config(padding: usize, stride: usize) -> Conv1dConfig {
    Conv1dConfig {
        padding,
        stride,
        dilation: 1,
        groups: 1,
    }
}

/// Scaled dot-product attention over `[B, H, L, d_h]` tensors.
///
/// `mask`, if present, is additive and must broadcast against
/// `[B, H, Lq, Lk]` (`0` for attended positions, `-inf` for masked).
pub fn scaled_dot_product_attention(
    q: &Tensor,
    k: &Tensor,
    v: &Tensor,
    mask: Option<&Tensor>,
) -> Result<Tensor> {
    let head_dim = q.dim(D::Minus1)?;
    let scale = 1f64 / (head_dim as f64).sqrt();
    let mut scores = (q.matmul(&k.transpose(D::Minus2, D::Minus1)?.contiguous()?)? * scale)?;
    if let Some(mask) = mask {
        scores = scores.broadcast_add(mask)?;
    }
    let probs = candle_nn::ops::softmax(&scores, D::Minus1)?;
    probs.matmul(&v.contiguous()?)
}

/// Splits the last axis of a `[B, L, H*d_h]` tensor into
/// `[B, H, L, d_h]` heads.
pub fn split_heads(x: &Tensor, num_heads: usize) -> Result<Tensor> {
    let (b, l, hd) = x.dims3()?;
    let head_dim = hd / num_heads;
    x.reshape((b, l, num_heads, head_dim))?
        .transpose(1, 2)?
        .contiguous()
}

/// Inverse of [`split_heads`]: merges `[B, H, L, d_h]` back into
/// `[B, L, H*d_h]`.
pub fn merge_heads(x: &Tensor) -> Result<Tensor> {
    let (b, h, l, d) = x.dims4()?;
    x.transpose(1, 2)?.contiguous()?.reshape((b, l, h * d))
}

/// Repeats the head axis of a `[B, H_kv, L, d_h]` tensor `n_rep` times
/// to implement grouped-query attention expansion.
pub fn repeat_kv(x: &Tensor, n_rep: usize) -> Result<Tensor> {
    if n_rep == 1 {
        return Ok(x.clone());
    }
    let (b, h_kv, l, d) = x.dims4()?;
    x.unsqueeze(2)?
        .broadcast_as((b, h_kv, n_rep, l, d))?
        .reshape((b, h_kv * n_rep, l, d))
}

/// L2 norm along `axis`, keeping the dimension (used by APG and
/// QK-RMSNorm denominators).
pub fn l2_norm_keepdim(x: &Tensor, axis: usize) -> Result<Tensor> {
    x.sqr()?.sum_keepdim(axis)?.sqrt()
}

/// RMSNorm over the last axis with no learned scale, used inside
/// AdaLN blocks where the scale/shift come from the timestep
/// modulation vectors instead of a per-layer weight.
pub fn rms_norm_no_affine(x: &Tensor, eps: f64) -> Result<Tensor> {
    let last = x.rank() - 1;
    let mean_sq = x.sqr()?.mean_keepdim(last)?;
    let rms = (mean_sq + eps)?.sqrt()?;
    x.broadcast_div(&rms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    #[test]
    fn split_and_merge_heads_round_trip() {
        let dev = Device::Cpu;
        let x = Tensor::arange(0f32, (2 * 4 * 8) as f32, &dev)
            .unwrap()
            .reshape((2, 4, 8))
            .unwrap();
        let heads = split_heads(&x, 2).unwrap();
        assert_eq!(heads.dims(), &[2, 2, 4, 4]);
        let merged = merge_heads(&heads).unwrap();
        assert_eq!(merged.dims(), x.dims());
        let diff = (merged - &x).unwrap().abs().unwrap().sum_all().unwrap();
        assert!(diff.to_scalar::<f32>().unwrap() < 1e-6);
    }

    #[test]
    fn repeat_kv_identity_for_n_rep_one() {
        let dev = Device::Cpu;
        let x = Tensor::zeros((1, 2, 3, 4), DType::F32, &dev).unwrap();
        let out = repeat_kv(&x, 1).unwrap();
        assert_eq!(out.dims(), x.dims());
    }

    #[test]
    fn repeat_kv_expands_head_axis() {
        let dev = Device::Cpu;
        let x = Tensor::ones((1, 2, 3, 4), DType::F32, &dev).unwrap();
        let out = repeat_kv(&x, 3).unwrap();
        assert_eq!(out.dims(), &[1, 6, 3, 4]);
    }

    #[test]
    fn attention_with_full_mask_ignores_masked_keys() {
        let dev = Device::Cpu;
        let q = Tensor::ones((1, 1, 1, 2), DType::F32, &dev).unwrap();
        let k = Tensor::from_vec(vec![1f32, 0., 0., 1.], (1, 1, 2, 2), &dev).unwrap();
        let v = Tensor::from_vec(vec![10f32, 0., 0., 20.], (1, 1, 2, 2), &dev).unwrap();
        let mask = Tensor::from_vec(vec![0f32, f32::NEG_INFINITY], (1, 1, 1, 2), &dev).unwrap();
        let out = scaled_dot_product_attention(&q, &k, &v, Some(&mask)).unwrap();
        let out = out.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert!((out[0] - 10.0).abs() < 1e-4);
        assert!((out[1] - 0.0).abs() < 1e-4);
    }

    #[test]
    fn l2_norm_keepdim_preserves_rank() {
        let dev = Device::Cpu;
        let x = Tensor::from_vec(vec![3f32, 4.0], (1, 2), &dev).unwrap();
        let n = l2_norm_keepdim(&x, 1).unwrap();
        assert_eq!(n.dims(), &[1, 1]);
        assert!((n.to_vec2::<f32>().unwrap()[0][0] - 5.0).abs() < 1e-5);
    }

    #[test]
    fn rms_norm_no_affine_unit_scales_constant_row() {
        let dev = Device::Cpu;
        let x = Tensor::from_vec(vec![2f32, 2.0, 2.0, 2.0], (1, 4), &dev).unwrap();
        let normed = rms_norm_no_affine(&x, 1e-6).unwrap();
        let values = normed.to_vec2::<f32>().unwrap()[0].clone();
        for v in values {
            assert!((v - 1.0).abs() < 1e-4);
        }
    }
}
