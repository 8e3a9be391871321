//! `ConditioningProvider` — the out-of-scope collaborator that turns a
//! request into batched conditioning tensors.

use candle_core::Tensor;
use tracing::debug;

use crate::error::Result;
use crate::types::conditions::DiTConditions;
use crate::types::params::GenerationParams;
use crate::vae::{reparameterize, VaeEncoder};

/// Called exactly once per run: `(params, latent_length, sample_rate)
/// → DiTConditions?`. Returning `None` means "no conditioning"; the
/// pipeline falls back to zeros and, against the real DiT stepper,
/// fails with `MissingConditioning`.
pub trait ConditioningProvider {
    fn provide(&self, params: &GenerationParams, latent_length: usize, sample_rate: u32) -> Result<Option<DiTConditions>>;
}

/// Always returns `None`, exercising the "no conditioning" path
/// against the fake stepper.
pub struct NoConditioning;

impl ConditioningProvider for NoConditioning {
    fn provide(&self, _params: &GenerationParams, _latent_length: usize, _sample_rate: u32) -> Result<Option<DiTConditions>> {
        debug!("no conditioning provider configured, falling back to an empty condition set");
        Ok(None)
    }
}

/// Returns a fixed, caller-constructed `DiTConditions` regardless of
/// the request, useful for tests that need deterministic conditioning
/// without a real text/lyric/timbre encoder.
pub struct FixedConditioning(pub DiTConditions);

impl ConditioningProvider for FixedConditioning {
    fn provide(&self, _params: &GenerationParams, _latent_length: usize, _sample_rate: u32) -> Result<Option<DiTConditions>> {
        Ok(Some(self.0.clone()))
    }
}

/// Implements the source-conditioned task hook (cover/repaint/extract/
/// complete) by encoding `source_audio` through the VAE encoder and
/// injecting the resulting latent as `initial_latents`, bypassing
/// random initialization. Carries no text/lyric/timbre conditioning of
/// its own — callers that also need those should compose this with a
/// real condition encoder and merge the two `DiTConditions`.
pub struct SourceLatentConditioning<'a> {
    pub encoder: &'a VaeEncoder,
    /// `[1 or B, samples, audio_channels]`.
    pub source_audio: Tensor,
    /// Standard-normal noise for the reparameterization step, same
    /// shape as the encoder's `mean` output; sampling it is the
    /// caller's responsibility so seeding stays centralized.
    pub eps: Tensor,
}

impl<'a> ConditioningProvider for SourceLatentConditioning<'a> {
    fn provide(&self, _params: &GenerationParams, _latent_length: usize, _sample_rate: u32) -> Result<Option<DiTConditions>> {
        let (mean, logvar) = self.encoder.forward(&self.source_audio)?;
        let latent = reparameterize(&mean, &logvar, &self.eps)?;
        debug!(shape = ?latent.dims(), "encoded source audio into an initial latent");
        let mut conditions = DiTConditions::empty();
        conditions.initial_latents = Some(latent);
        Ok(Some(conditions))
    }
}
