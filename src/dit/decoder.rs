//! DiT decoder: patch-in, dual timestep embeddings, layer stack,
//! output AdaLN, patch-out.

use candle_core::{DType, Device, Result, Tensor};
use candle_nn::{conv1d, conv_transpose1d, Conv1d, Conv1dConfig, ConvTranspose1d, ConvTranspose1dConfig, VarBuilder};

use crate::dit::attention::AttentionConfig;
use crate::dit::cache::CrossAttentionCache;
use crate::dit::embeddings::{ConditionEmbedder, DualTimestep};
use crate::dit::layer::{AttentionKind, DitLayer};
use crate::tensor::mask::{encoder_padding_mask, SlidingMaskMemo};
use crate::tensor::ops::{conv1d_channels_last, conv_transpose1d_channels_last, rms_norm_no_affine};
use crate::tensor::rope::RotaryTable;

const OUTPUT_ADALN_EPS: f64 = 1e-6;
const ROPE_THETA: f64 = 10000.0;

#[derive(Debug, Clone, Copy)]
pub struct DitDecoderConfig {
    pub hidden_dim: usize,
    pub num_heads: usize,
    pub num_kv_heads: usize,
    pub num_layers: usize,
    pub intermediate_dim: usize,
    pub patch_size: usize,
    pub sliding_window: usize,
    pub latent_channels: usize,
    pub context_channels: usize,
    pub encoder_dim: usize,
}

impl Default for DitDecoderConfig {
    fn default() -> Self {
        Self {
            hidden_dim: 64,
            num_heads: 4,
            num_kv_heads: 2,
            num_layers: 4,
            intermediate_dim: 128,
            patch_size: 2,
            sliding_window: 8,
            latent_channels: 64,
            context_channels: 128,
            encoder_dim: 2048,
        }
    }
}

pub struct DitDecoder {
    config: DitDecoderConfig,
    patch_in: Conv1d,
    patch_out: ConvTranspose1d,
    dual_timestep: DualTimestep,
    condition_embedder: ConditionEmbedder,
    layers: Vec<DitLayer>,
    output_adaln_table: Tensor,
    mask_memo: SlidingMaskMemo,
}

impl DitDecoder {
    pub fn new(config: DitDecoderConfig, vb: VarBuilder) -> Result<Self> {
        let patch_in_channels = config.context_channels + config.latent_channels;
        let patch_cfg = Conv1dConfig {
            padding: 0,
            stride: config.patch_size,
            dilation: 1,
            groups: 1,
        };
        let patch_in = conv1d(
            patch_in_channels,
            config.hidden_dim,
            config.patch_size,
            patch_cfg,
            vb.pp("patch_in"),
        )?;

        let patch_out_cfg = ConvTranspose1dConfig {
            padding: 0,
            output_padding: 0,
            stride: config.patch_size,
            dilation: 1,
            groups: 1,
        };
        let patch_out = conv_transpose1d(
            config.hidden_dim,
            config.latent_channels,
            config.patch_size,
            patch_out_cfg,
            vb.pp("patch_out"),
        )?;

        let dual_timestep = DualTimestep::new(config.hidden_dim, vb.pp("timestep"))?;
        let condition_embedder = ConditionEmbedder::new(config.encoder_dim, config.hidden_dim, vb.pp("condition_embedder"))?;

        let attn_cfg = AttentionConfig {
            hidden_dim: config.hidden_dim,
            num_heads: config.num_heads,
            num_kv_heads: config.num_kv_heads,
            encoder_dim: config.hidden_dim,
        };
        let mut layers = Vec::with_capacity(config.num_layers);
        for i in 0..config.num_layers {
            // Odd layers (1-indexed) use sliding-window attention;
            // even layers use full attention.
            let kind = if (i + 1) % 2 == 1 {
                AttentionKind::Sliding
            } else {
                AttentionKind::Full
            };
            layers.push(DitLayer::new(kind, attn_cfg, config.intermediate_dim, vb.pp(format!("layer.{i}")))?);
        }

        let output_adaln_table = vb.get((1, 2, config.hidden_dim), "output_adaln_table")?;

        Ok(Self {
            config,
            patch_in,
            patch_out,
            dual_timestep,
            condition_embedder,
            layers,
            output_adaln_table,
            mask_memo: SlidingMaskMemo::new(),
        })
    }

    /// `hidden`: `[B, T, C_lat]`. `context_latents`: `[B, T, C_ctx]`.
    /// `encoder_states`: `[B, encL, H_enc]`. `encoder_mask`: `[B, encL]`,
    /// optional. `timestep`, `timestep_r`: `[B]`. Returns the velocity
    /// prediction `[B, T, C_lat]`.
    #[allow(clippy::too_many_arguments)]
    pub fn forward(
        &self,
        hidden: &Tensor,
        context_latents: &Tensor,
        encoder_states: &Tensor,
        encoder_mask: Option<&Tensor>,
        timestep: &Tensor,
        timestep_r: &Tensor,
        cache: &mut CrossAttentionCache,
    ) -> Result<Tensor> {
        let device = hidden.device();
        let t_len = hidden.dim(1)?;

        let patched = self.patch_in(hidden, context_latents)?;
        let patched_len = patched.dim(1)?;

        let (temb, timestep_proj) = self.dual_timestep.forward(timestep, timestep_r, device)?;
        let encoder_hidden = self.condition_embedder.forward(encoder_states)?;
        let additive_encoder_mask = encoder_mask.map(encoder_padding_mask).transpose()?;

        let rotary = RotaryTable::new(patched_len, self.head_dim(), ROPE_THETA, device)?;
        let sliding_mask = self
            .mask_memo
            .get_or_build(patched_len, self.config.sliding_window, device)?;

        let mut h = patched;
        for (idx, layer) in self.layers.iter().enumerate() {
            let self_mask = match layer.kind() {
                AttentionKind::Sliding => Some(&sliding_mask),
                AttentionKind::Full => None,
            };
            h = layer.forward(
                &h,
                &timestep_proj,
                &rotary,
                self_mask,
                &encoder_hidden,
                additive_encoder_mask.as_ref(),
                cache,
                idx,
            )?;
        }

        let h = self.output_adaln(&h, &temb)?;
        self.patch_out(&h, t_len)
    }

    fn head_dim(&self) -> usize {
        self.config.hidden_dim / self.config.num_heads
    }

    /// Number of DiT layers, used by callers to size a
    /// [`CrossAttentionCache`].
    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    fn patch_in(&self, hidden: &Tensor, context_latents: &Tensor) -> Result<Tensor> {
        let concatenated = Tensor::cat(&[context_latents, hidden], 2)?;
        let t_len = concatenated.dim(1)?;
        let patch_size = self.config.patch_size;
        let remainder = t_len % patch_size;
        let padded = if remainder == 0 {
            concatenated
        } else {
            let pad_len = patch_size - remainder;
            let channels = context_latents.dim(2)? + hidden.dim(2)?;
            let batch = concatenated.dim(0)?;
            let zeros = Tensor::zeros((batch, pad_len, channels), concatenated.dtype(), concatenated.device())?;
            Tensor::cat(&[&concatenated, &zeros], 1)?
        };
        conv1d_channels_last(&self.patch_in, &padded)
    }

    fn patch_out(&self, h: &Tensor, original_len: usize) -> Result<Tensor> {
        let out = conv_transpose1d_channels_last(&self.patch_out, h)?;
        let out_len = out.dim(1)?;
        if out_len > original_len {
            out.narrow(1, 0, original_len)
        } else {
            Ok(out)
        }
    }

    fn output_adaln(&self, h: &Tensor, temb: &Tensor) -> Result<Tensor> {
        let temb = temb.unsqueeze(1)?;
        let stacked = self.output_adaln_table.broadcast_add(&temb)?;
        let shift = stacked.narrow(1, 0, 1)?;
        let scale = stacked.narrow(1, 1, 1)?;
        let normed = rms_norm_no_affine(h, OUTPUT_ADALN_EPS)?;
        let one_plus_scale = (scale + 1.0)?;
        normed.broadcast_mul(&one_plus_scale)?.broadcast_add(&shift)
    }
}

/// Builds an all-zero `[B]` device tensor, a small helper used by
/// pipeline code constructing batched scalar timesteps.
pub fn broadcast_scalar(value: f32, batch: usize, device: &Device) -> Result<Tensor> {
    Tensor::full(value, batch, device)?.to_dtype(DType::F32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_nn::VarMap;

    fn toy_config() -> DitDecoderConfig {
        DitDecoderConfig {
            hidden_dim: 16,
            num_heads: 2,
            num_kv_heads: 1,
            num_layers: 3,
            intermediate_dim: 32,
            patch_size: 2,
            sliding_window: 4,
            latent_channels: 6,
            context_channels: 4,
            encoder_dim: 10,
        }
    }

    fn toy_decoder() -> DitDecoder {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
        DitDecoder::new(toy_config(), vb).unwrap()
    }

    #[test]
    fn forward_returns_velocity_matching_input_shape() {
        let decoder = toy_decoder();
        let dev = Device::Cpu;
        let b = 1;
        let t = 7usize; // odd length exercises patch padding
        let hidden = Tensor::randn(0f32, 1.0, (b, t, 6), &dev).unwrap();
        let context = Tensor::randn(0f32, 1.0, (b, t, 4), &dev).unwrap();
        let encoder = Tensor::randn(0f32, 1.0, (b, 5, 10), &dev).unwrap();
        let timestep = broadcast_scalar(0.5, b, &dev).unwrap();
        let mut cache = CrossAttentionCache::new(3, true);

        let out = decoder
            .forward(&hidden, &context, &encoder, None, &timestep, &timestep, &mut cache)
            .unwrap();
        assert_eq!(out.dims(), &[b, t, 6]);
    }

    #[test]
    fn layer_stack_alternates_sliding_and_full() {
        let decoder = toy_decoder();
        let kinds: Vec<_> = decoder.layers.iter().map(|l| l.kind()).collect();
        assert_eq!(kinds[0], AttentionKind::Sliding);
        assert_eq!(kinds[1], AttentionKind::Full);
        assert_eq!(kinds[2], AttentionKind::Sliding);
    }

    #[test]
    fn forward_with_encoder_mask_does_not_panic() {
        let decoder = toy_decoder();
        let dev = Device::Cpu;
        let b = 1;
        let t = 4usize;
        let hidden = Tensor::zeros((b, t, 6), DType::F32, &dev).unwrap();
        let context = Tensor::zeros((b, t, 4), DType::F32, &dev).unwrap();
        let encoder = Tensor::zeros((b, 3, 10), DType::F32, &dev).unwrap();
        let mask = Tensor::from_vec(vec![1f32, 1.0, 0.0], (b, 3), &dev).unwrap();
        let timestep = broadcast_scalar(0.2, b, &dev).unwrap();
        let mut cache = CrossAttentionCache::new(3, true);

        let out = decoder
            .forward(&hidden, &context, &encoder, Some(&mask), &timestep, &timestep, &mut cache)
            .unwrap();
        assert_eq!(out.dims(), &[b, t, 6]);
    }
}
