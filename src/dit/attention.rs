//! Self- and cross-attention for one DiT layer.

use candle_core::{Module, Result, Tensor};
use candle_nn::{linear_no_bias, Linear, RmsNorm, VarBuilder};

use crate::dit::cache::CrossAttentionCache;
use crate::tensor::ops::{
    merge_heads, repeat_kv, scaled_dot_product_attention, split_heads,
};
use crate::tensor::rope::{apply_rotary, RotaryTable};

/// Shared head-count configuration for self- and cross-attention.
#[derive(Debug, Clone, Copy)]
pub struct AttentionConfig {
    pub hidden_dim: usize,
    pub num_heads: usize,
    pub num_kv_heads: usize,
    pub encoder_dim: usize,
}

impl AttentionConfig {
    pub fn head_dim(&self) -> usize {
        self.hidden_dim / self.num_heads
    }

    pub fn kv_dim(&self) -> usize {
        self.num_kv_heads * self.head_dim()
    }

    pub fn n_rep(&self) -> usize {
        self.num_heads / self.num_kv_heads
    }
}

/// Per-head RMSNorm applied to Q and K before rotary embedding and
/// attention.
fn qk_rmsnorm(x: &Tensor, norm: &RmsNorm) -> Result<Tensor> {
    norm.forward(x)
}

/// Self-attention: RoPE on Q/K, GQA expansion, optional additive mask
/// (sliding-window or none, depending on the layer's declared type).
#[derive(Debug, Clone)]
pub struct SelfAttention {
    config: AttentionConfig,
    q_proj: Linear,
    k_proj: Linear,
    v_proj: Linear,
    out_proj: Linear,
    q_norm: RmsNorm,
    k_norm: RmsNorm,
}

impl SelfAttention {
    pub fn new(config: AttentionConfig, vb: VarBuilder) -> Result<Self> {
        let head_dim = config.head_dim();
        Ok(Self {
            config,
            q_proj: linear_no_bias(config.hidden_dim, config.hidden_dim, vb.pp("q_proj"))?,
            k_proj: linear_no_bias(config.hidden_dim, config.kv_dim(), vb.pp("k_proj"))?,
            v_proj: linear_no_bias(config.hidden_dim, config.kv_dim(), vb.pp("v_proj"))?,
            out_proj: linear_no_bias(config.hidden_dim, config.hidden_dim, vb.pp("out_proj"))?,
            q_norm: candle_nn::rms_norm(head_dim, 1e-6, vb.pp("q_norm"))?,
            k_norm: candle_nn::rms_norm(head_dim, 1e-6, vb.pp("k_norm"))?,
        })
    }

    /// `x`: `[B, L, D]`. `mask`, if present, is additive `[1, 1, L, L]`
    /// (or broadcastable to `[B, H, L, L]`).
    pub fn forward(&self, x: &Tensor, rotary: &RotaryTable, mask: Option<&Tensor>) -> Result<Tensor> {
        let q = split_heads(&self.q_proj.forward(x)?, self.config.num_heads)?;
        let k = split_heads(&self.k_proj.forward(x)?, self.config.num_kv_heads)?;
        let v = split_heads(&self.v_proj.forward(x)?, self.config.num_kv_heads)?;

        let q = qk_rmsnorm(&q, &self.q_norm)?;
        let k = qk_rmsnorm(&k, &self.k_norm)?;

        let q = apply_rotary(&q, rotary)?;
        let k = apply_rotary(&k, rotary)?;

        let k = repeat_kv(&k, self.config.n_rep())?;
        let v = repeat_kv(&v, self.config.n_rep())?;

        let out = scaled_dot_product_attention(&q, &k, &v, mask)?;
        self.out_proj.forward(&merge_heads(&out)?)
    }
}

/// Cross-attention: Q from the decoder stream, K/V from encoder
/// hidden states, no rotary embedding. K/V are computed once per
/// encoder input and reused from `cache` on subsequent steps.
#[derive(Debug, Clone)]
pub struct CrossAttention {
    config: AttentionConfig,
    q_proj: Linear,
    k_proj: Linear,
    v_proj: Linear,
    out_proj: Linear,
}

impl CrossAttention {
    pub fn new(config: AttentionConfig, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            config,
            q_proj: linear_no_bias(config.hidden_dim, config.hidden_dim, vb.pp("q_proj"))?,
            k_proj: linear_no_bias(config.encoder_dim, config.kv_dim(), vb.pp("k_proj"))?,
            v_proj: linear_no_bias(config.encoder_dim, config.kv_dim(), vb.pp("v_proj"))?,
            out_proj: linear_no_bias(config.hidden_dim, config.hidden_dim, vb.pp("out_proj"))?,
        })
    }

    /// `x`: `[B, L, D]` decoder stream. `encoder_states`: `[B, encL,
    /// H_enc]`. `mask`: additive `[B, 1, 1, encL]` padding mask.
    /// `layer_idx` identifies this layer's slot in `cache`.
    pub fn forward(
        &self,
        x: &Tensor,
        encoder_states: &Tensor,
        mask: Option<&Tensor>,
        cache: &mut CrossAttentionCache,
        layer_idx: usize,
    ) -> Result<Tensor> {
        let q = split_heads(&self.q_proj.forward(x)?, self.config.num_heads)?;

        let (k, v) = if let Some((k, v)) = cache.get(layer_idx) {
            (k.clone(), v.clone())
        } else {
            let k = split_heads(&self.k_proj.forward(encoder_states)?, self.config.num_kv_heads)?;
            let v = split_heads(&self.v_proj.forward(encoder_states)?, self.config.num_kv_heads)?;
            cache.set(layer_idx, k.clone(), v.clone());
            (k, v)
        };

        let k = repeat_kv(&k, self.config.n_rep())?;
        let v = repeat_kv(&v, self.config.n_rep())?;

        let out = scaled_dot_product_attention(&q, &k, &v, mask)?;
        self.out_proj.forward(&merge_heads(&out)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    fn cfg() -> AttentionConfig {
        AttentionConfig {
            hidden_dim: 8,
            num_heads: 2,
            num_kv_heads: 1,
            encoder_dim: 6,
        }
    }

    #[test]
    fn self_attention_preserves_shape() {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
        let attn = SelfAttention::new(cfg(), vb).unwrap();
        let x = Tensor::randn(0f32, 1.0, (1, 5, 8), &dev).unwrap();
        let table = RotaryTable::new(5, 4, 10000.0, &dev).unwrap();
        let out = attn.forward(&x, &table, None).unwrap();
        assert_eq!(out.dims(), x.dims());
    }

    #[test]
    fn cross_attention_caches_kv_across_calls() {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
        let attn = CrossAttention::new(cfg(), vb).unwrap();
        let x = Tensor::randn(0f32, 1.0, (1, 5, 8), &dev).unwrap();
        let enc = Tensor::randn(0f32, 1.0, (1, 3, 6), &dev).unwrap();
        let mut cache = CrossAttentionCache::new(1, true);

        let out1 = attn.forward(&x, &enc, None, &mut cache, 0).unwrap();
        assert!(cache.get(0).is_some());

        // A different encoder input is ignored because the cache
        // already holds an entry for this layer — demonstrating reuse.
        let enc2 = Tensor::zeros((1, 3, 6), DType::F32, &dev).unwrap();
        let out2 = attn.forward(&x, &enc2, None, &mut cache, 0).unwrap();
        let diff = (out1 - out2).unwrap().abs().unwrap().sum_all().unwrap().to_scalar::<f32>().unwrap();
        assert_eq!(diff, 0.0);
    }

    #[test]
    fn cache_reuse_matches_no_cache_recompute() {
        // Component law S9 (cache reuse equivalence): running the
        // same encoder input through cached and uncached paths yields
        // identical cross-attention output.
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
        let attn = CrossAttention::new(cfg(), vb).unwrap();
        let x = Tensor::randn(0f32, 1.0, (1, 5, 8), &dev).unwrap();
        let enc = Tensor::randn(0f32, 1.0, (1, 3, 6), &dev).unwrap();

        let mut cached = CrossAttentionCache::new(1, true);
        let first = attn.forward(&x, &enc, None, &mut cached, 0).unwrap();
        let second = attn.forward(&x, &enc, None, &mut cached, 0).unwrap();

        let mut uncached = CrossAttentionCache::new(1, false);
        let recomputed = attn.forward(&x, &enc, None, &mut uncached, 0).unwrap();

        let diff_cached = (&first - &second).unwrap().abs().unwrap().sum_all().unwrap().to_scalar::<f32>().unwrap();
        let diff_vs_uncached = (first - recomputed).unwrap().abs().unwrap().sum_all().unwrap().to_scalar::<f32>().unwrap();
        assert_eq!(diff_cached, 0.0);
        assert!(diff_vs_uncached < 1e-5);
    }
}
