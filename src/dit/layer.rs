//! One DiT transformer block: AdaLN-modulated self-attention, plain
//! cross-attention, AdaLN-modulated SwiGLU MLP.

use candle_core::{Result, Tensor};
use candle_nn::VarBuilder;

use crate::dit::attention::{AttentionConfig, CrossAttention, SelfAttention};
use crate::dit::cache::CrossAttentionCache;
use crate::dit::mlp::SwiGlu;
use crate::tensor::ops::rms_norm_no_affine;
use crate::tensor::rope::RotaryTable;

const ADALN_EPS: f64 = 1e-6;

/// Whether a layer attends with a sliding window or full attention.
/// Layers alternate: odd-indexed (1-based) layers use sliding
/// attention, even-indexed layers use full attention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttentionKind {
    Sliding,
    Full,
}

/// The six modulation vectors produced by splitting `scale_shift_table
/// + timestep_proj`, each `[B, 1, D]`.
pub struct Modulation {
    pub shift_self: Tensor,
    pub scale_self: Tensor,
    pub gate_self: Tensor,
    pub shift_mlp: Tensor,
    pub scale_mlp: Tensor,
    pub gate_mlp: Tensor,
}

impl Modulation {
    /// Splits a `[B, 6, D]` tensor into the six named vectors.
    pub fn from_stacked(stacked: &Tensor) -> Result<Self> {
        let slot = |i: usize| stacked.narrow(1, i, 1);
        Ok(Self {
            shift_self: slot(0)?,
            scale_self: slot(1)?,
            gate_self: slot(2)?,
            shift_mlp: slot(3)?,
            scale_mlp: slot(4)?,
            gate_mlp: slot(5)?,
        })
    }
}

fn modulate(normed: &Tensor, scale: &Tensor, shift: &Tensor) -> Result<Tensor> {
    let one_plus_scale = (scale + 1.0)?;
    normed.broadcast_mul(&one_plus_scale)?.broadcast_add(shift)
}

#[derive(Debug, Clone)]
pub struct DitLayer {
    kind: AttentionKind,
    self_attn: SelfAttention,
    cross_attn: CrossAttention,
    mlp: SwiGlu,
    scale_shift_table: Tensor,
}

impl DitLayer {
    pub fn new(
        kind: AttentionKind,
        attn_config: AttentionConfig,
        intermediate_dim: usize,
        vb: VarBuilder,
    ) -> Result<Self> {
        let hidden_dim = attn_config.hidden_dim;
        Ok(Self {
            kind,
            self_attn: SelfAttention::new(attn_config, vb.pp("self_attn"))?,
            cross_attn: CrossAttention::new(attn_config, vb.pp("cross_attn"))?,
            mlp: SwiGlu::new(hidden_dim, intermediate_dim, vb.pp("mlp"))?,
            scale_shift_table: vb.get((1, 6, hidden_dim), "scale_shift_table")?,
        })
    }

    pub fn kind(&self) -> AttentionKind {
        self.kind
    }

    /// Runs the block's five-step body: modulated self-attention,
    /// plain cross-attention, modulated MLP.
    ///
    /// `timestep_proj`: `[B, 6, D]`, shared by every layer in the
    /// decoder. `self_mask`: additive self-attention mask selected by
    /// `self.kind` (the caller decides sliding vs. full vs. none).
    /// `encoder_states`/`encoder_mask`: cross-attention inputs.
    #[allow(clippy::too_many_arguments)]
    pub fn forward(
        &self,
        h: &Tensor,
        timestep_proj: &Tensor,
        rotary: &RotaryTable,
        self_mask: Option<&Tensor>,
        encoder_states: &Tensor,
        encoder_mask: Option<&Tensor>,
        cache: &mut CrossAttentionCache,
        layer_idx: usize,
    ) -> Result<Tensor> {
        let stacked = self.scale_shift_table.broadcast_add(timestep_proj)?;
        let modulation = Modulation::from_stacked(&stacked)?;

        let normed = rms_norm_no_affine(h, ADALN_EPS)?;
        let h_self_in = modulate(&normed, &modulation.scale_self, &modulation.shift_self)?;
        let self_out = self.self_attn.forward(&h_self_in, rotary, self_mask)?;
        let h = (h + self_out.broadcast_mul(&modulation.gate_self)?)?;

        let cross_in = rms_norm_no_affine(&h, ADALN_EPS)?;
        let cross_out = self.cross_attn.forward(&cross_in, encoder_states, encoder_mask, cache, layer_idx)?;
        let h = (h + cross_out)?;

        let normed2 = rms_norm_no_affine(&h, ADALN_EPS)?;
        let h_mlp_in = modulate(&normed2, &modulation.scale_mlp, &modulation.shift_mlp)?;
        let mlp_out = self.mlp.forward(&h_mlp_in)?;
        h + mlp_out.broadcast_mul(&modulation.gate_mlp)?
    }
}
