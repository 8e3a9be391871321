//! Top-level generation pipeline: schedule → init latent → diffusion
//! loop → VAE decode → peak-normalize → emit audio.

use candle_core::{Device, Tensor};
use tracing::{debug, info, warn};

use crate::conditioning::ConditioningProvider;
use crate::diffusion::stepper::{diffusion_step, DiffusionStepper};
use crate::diffusion::{guidance::MomentumState, schedule};
use crate::dit::cache::CrossAttentionCache;
use crate::error::{EngineError, Result};
use crate::latent;
use crate::progress::ProgressTracker;
use crate::types::audio::{DecodedAudio, GenerationStatus};
use crate::types::conditions::{DiTConditions, LATENT_CHANNELS};
use crate::types::params::{GenerationConfig, GenerationParams};
use crate::vae::AudioDecoder;

/// Bundles the three polymorphic collaborators plus the device
/// tensors are materialized on. Construct one per run, or reuse across
/// runs with distinct input as long as each call gets its own
/// cache/momentum state.
pub struct Engine<'a> {
    pub stepper: &'a dyn DiffusionStepper,
    pub vae: &'a dyn AudioDecoder,
    pub conditioning: &'a dyn ConditioningProvider,
    pub device: Device,
    /// Polled between diffusion steps; returning `true` aborts the run
    /// with `EngineError::Cancelled`.
    pub cancel: Option<&'a dyn Fn() -> bool>,
    /// Invoked after every completed step with the current tracker.
    pub on_progress: Option<&'a dyn Fn(&ProgressTracker)>,
}

impl<'a> Engine<'a> {
    /// Runs one end-to-end generation. Never panics: every failure is
    /// surfaced as `GenerationStatus { success: false, .. }` with an
    /// empty `audios` vec.
    pub fn run(&self, params: &GenerationParams, config: &GenerationConfig) -> (Vec<DecodedAudio>, GenerationStatus) {
        info!(duration = params.duration, batch_size = config.batch_size, "starting generation run");
        match self.run_inner(params, config) {
            Ok(audios) => {
                info!(entries = audios.len(), "generation run finished");
                let status = GenerationStatus::ok(format!("generated {} audio entr{}", audios.len(), if audios.len() == 1 { "y" } else { "ies" }));
                (audios, status)
            }
            Err(err) => {
                warn!(error = %err, "generation run failed");
                (Vec::new(), GenerationStatus::failed(err.to_string()))
            }
        }
    }

    fn run_inner(&self, params: &GenerationParams, config: &GenerationConfig) -> Result<Vec<DecodedAudio>> {
        // Step 1: latent length.
        let t = latent::latent_length(params.duration, config.sample_rate);
        debug!(latent_length = t, "computed latent length");

        // Step 2: schedule.
        let timesteps = schedule::schedule(params.shift, params.inference_steps, params.timesteps.as_deref());
        debug!(steps = timesteps.len(), shift = params.shift, "built diffusion schedule");

        // Step 3: conditioning, aligned to the batch size.
        let provided = self.conditioning.provide(params, t, config.sample_rate)?;
        let conditions = match provided {
            Some(c) => c.broadcast_to(config.batch_size)?,
            None => DiTConditions::empty(),
        };

        // Step 4: the real stepper cannot proceed without conditioning.
        if self.stepper.requires_conditioning() && !conditions.has_minimal_conditioning() {
            return Err(EngineError::MissingConditioning);
        }

        // Step 5: initialize the latent.
        let mut x = self.initialize_latents(&conditions, params, config, t)?;

        // Steps 6-9 of the diffusion loop.
        let mut cache = CrossAttentionCache::new(self.stepper.cache_layers(), true);
        let mut momentum = MomentumState::new();
        let mut tracker = ProgressTracker::new(timesteps.len());

        for (i, &step_t) in timesteps.iter().enumerate() {
            if let Some(cancel) = self.cancel {
                if cancel() {
                    return Err(EngineError::Cancelled);
                }
            }
            let next_t = timesteps.get(i + 1).copied();
            x = diffusion_step(self.stepper, &x, &conditions, step_t, next_t, params, &mut cache, &mut momentum, &self.device)?;
            debug!(step = i + 1, t = step_t, "completed diffusion step");

            tracker.update(i + 1);
            if let Some(on_progress) = self.on_progress {
                on_progress(&tracker);
            }
        }

        // Step 7: optional rescale-shift (a no-op affine at defaults).
        x = x.affine(f64::from(params.latent_rescale), f64::from(params.latent_shift))?;

        // Step 8: validate latent shape, decode, trim, peak-normalize.
        let dims = x.dims();
        if dims.len() != 3 || dims[2] != LATENT_CHANNELS {
            return Err(EngineError::InvalidLatentShape { shape: dims.to_vec() });
        }
        let batch_size = dims[0];

        debug!(batch_size, latent_len = t, "decoding latent through the VAE");
        let decoded = self.vae.decode(&x)?;
        let decoded_dims = decoded.dims();
        if decoded_dims.len() != 2 && decoded_dims.len() != 3 {
            return Err(EngineError::InvalidDecodedAudioShape {
                shape: decoded_dims.to_vec(),
            });
        }
        let expected_samples = t * crate::vae::decoder::frame_expansion();
        let decoded = trim_to_sample_count(&decoded, expected_samples)?;
        let normalized = peak_normalize(&decoded)?;

        // Step 9: emit one entry per batch element.
        let mut audios = Vec::with_capacity(batch_size);
        for b in 0..batch_size {
            let row = normalized.narrow(0, b, 1)?.squeeze(0)?;
            let samples = row.flatten_all()?.to_vec1::<f32>()?;
            audios.push(DecodedAudio {
                samples,
                channels: self.vae.channels(),
                sample_rate: config.sample_rate,
                seed_used: config.seed_for(b, params.seed),
            });
        }
        Ok(audios)
    }

    fn initialize_latents(
        &self,
        conditions: &DiTConditions,
        params: &GenerationParams,
        config: &GenerationConfig,
        t: usize,
    ) -> Result<Tensor> {
        if let Some(initial) = &conditions.initial_latents {
            let dims = initial.dims();
            if dims.first() == Some(&config.batch_size) && dims.get(1) == Some(&t) {
                return Ok(initial.clone());
            }
        }
        let mut rows = Vec::with_capacity(config.batch_size);
        for b in 0..config.batch_size {
            let seed = config.seed_for(b, params.seed);
            rows.push(latent::initialize_latent(1, t, LATENT_CHANNELS, seed, &self.device)?);
        }
        let refs: Vec<&Tensor> = rows.iter().collect();
        Ok(Tensor::cat(&refs, 0)?)
    }
}

fn trim_to_sample_count(decoded: &Tensor, expected_samples: usize) -> Result<Tensor> {
    let actual = decoded.dim(1)?;
    if actual > expected_samples {
        Ok(decoded.narrow(1, 0, expected_samples)?)
    } else {
        Ok(decoded.clone())
    }
}

/// Divides each batch element by its own peak absolute sample value
/// when that peak exceeds 1.0; elements already within `[-1, 1]` are
/// left unchanged.
fn peak_normalize(decoded: &Tensor) -> Result<Tensor> {
    let batch = decoded.dim(0)?;
    let flat = decoded.abs()?.flatten_from(1)?;
    let peak = flat.max(1)?;
    let floor = Tensor::ones_like(&peak)?;
    let scale = peak.maximum(&floor)?.reshape((batch, 1, 1))?;
    Ok(decoded.broadcast_div(&scale)?)
}
