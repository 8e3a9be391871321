//! `DiTConditions` — the batched conditioning tensors produced by a
//! `ConditioningProvider` and consumed by the diffusion loop.

use candle_core::Tensor;

use crate::error::{EngineError, Result};

/// Reference dimensions for the model this engine targets.
pub const ENCODER_HIDDEN_DIM: usize = 2048;
pub const CONTEXT_LATENT_DIM: usize = 128;
pub const LATENT_CHANNELS: usize = 64;

/// Conditioning tensors for one run. All batched fields share the
/// run's batch dimension, or carry a broadcastable leading dim of 1.
#[derive(Debug, Clone)]
pub struct DiTConditions {
    /// `[B, encL, 2048]` projected text+lyric+timbre hidden states.
    pub encoder_hidden_states: Option<Tensor>,
    /// `[B, encL]`, 1 = valid, 0 = pad.
    pub encoder_attention_mask: Option<Tensor>,
    /// `[B, T, 128]` concat of source-latents and chunk-mask.
    pub context_latents: Option<Tensor>,
    /// `[1, 1, 2048]`, required for classifier-free guidance.
    pub null_condition_embedding: Option<Tensor>,
    /// `[B, T, 64]`, bypasses random latent initialization when present.
    pub initial_latents: Option<Tensor>,
}

impl DiTConditions {
    /// All fields absent — the "no conditioning" case for a
    /// `ConditioningProvider` that returns `None`.
    pub fn empty() -> Self {
        Self {
            encoder_hidden_states: None,
            encoder_attention_mask: None,
            context_latents: None,
            null_condition_embedding: None,
            initial_latents: None,
        }
    }

    /// Whether the real DiT stepper has enough to proceed: both
    /// encoder states and context latents absent is fatal for the
    /// real stepper.
    pub fn has_minimal_conditioning(&self) -> bool {
        self.encoder_hidden_states.is_some() || self.context_latents.is_some()
    }

    /// Broadcasts every batched field to `batch_size` along axis 0:
    /// every field must either already match `batch_size` or carry a
    /// leading dimension of 1; any other mismatch is a fatal error.
    pub fn broadcast_to(&self, batch_size: usize) -> Result<Self> {
        Ok(Self {
            encoder_hidden_states: broadcast_field(
                "encoder_hidden_states",
                &self.encoder_hidden_states,
                batch_size,
            )?,
            encoder_attention_mask: broadcast_field(
                "encoder_attention_mask",
                &self.encoder_attention_mask,
                batch_size,
            )?,
            context_latents: broadcast_field("context_latents", &self.context_latents, batch_size)?,
            // The null embedding is always `[1, 1, H]` by contract
            // and is broadcast per-step, not here.
            null_condition_embedding: self.null_condition_embedding.clone(),
            initial_latents: broadcast_field("initial_latents", &self.initial_latents, batch_size)?,
        })
    }
}

fn broadcast_field(
    name: &'static str,
    field: &Option<Tensor>,
    batch_size: usize,
) -> Result<Option<Tensor>> {
    let Some(t) = field else { return Ok(None) };
    let got = t.dim(0)?;
    if got == batch_size {
        return Ok(Some(t.clone()));
    }
    if got == 1 {
        let mut dims = t.dims().to_vec();
        dims[0] = batch_size;
        return Ok(Some(t.broadcast_as(dims)?.contiguous()?));
    }
    Err(EngineError::ConditionBatchMismatch {
        field: name,
        got,
        expected: batch_size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    fn dev() -> Device {
        Device::Cpu
    }

    #[test]
    fn empty_has_no_minimal_conditioning() {
        assert!(!DiTConditions::empty().has_minimal_conditioning());
    }

    #[test]
    fn exact_batch_match_passes_through() {
        let t = Tensor::zeros((2, 4, ENCODER_HIDDEN_DIM), DType::F32, &dev()).unwrap();
        let mut c = DiTConditions::empty();
        c.encoder_hidden_states = Some(t);
        let out = c.broadcast_to(2).unwrap();
        assert_eq!(out.encoder_hidden_states.unwrap().dims(), &[2, 4, ENCODER_HIDDEN_DIM]);
    }

    #[test]
    fn leading_dim_one_broadcasts() {
        let t = Tensor::zeros((1, 4, ENCODER_HIDDEN_DIM), DType::F32, &dev()).unwrap();
        let mut c = DiTConditions::empty();
        c.encoder_hidden_states = Some(t);
        let out = c.broadcast_to(3).unwrap();
        assert_eq!(out.encoder_hidden_states.unwrap().dims(), &[3, 4, ENCODER_HIDDEN_DIM]);
    }

    #[test]
    fn other_mismatch_is_fatal() {
        let t = Tensor::zeros((2, 4, ENCODER_HIDDEN_DIM), DType::F32, &dev()).unwrap();
        let mut c = DiTConditions::empty();
        c.encoder_hidden_states = Some(t);
        let err = c.broadcast_to(3).unwrap_err();
        assert!(matches!(err, EngineError::ConditionBatchMismatch { .. }));
    }

    #[test]
    fn null_embedding_passes_through_unmodified() {
        let t = Tensor::zeros((1, 1, ENCODER_HIDDEN_DIM), DType::F32, &dev()).unwrap();
        let mut c = DiTConditions::empty();
        c.null_condition_embedding = Some(t);
        let out = c.broadcast_to(4).unwrap();
        assert_eq!(out.null_condition_embedding.unwrap().dims(), &[1, 1, ENCODER_HIDDEN_DIM]);
    }
}
