//! ODE integration step and the classifier-free guidance doubled-batch
//! path that wraps a [`DitDecoder`] call.

use candle_core::{Device, Result, Tensor};
use tracing::trace;

use crate::dit::cache::CrossAttentionCache;
use crate::dit::decoder::{broadcast_scalar, DitDecoder};
use crate::diffusion::guidance::{apply_apg, ApgParams, MomentumState, DEFAULT_MOMENTUM, DEFAULT_NORM_THRESHOLD};
use crate::types::conditions::DiTConditions;
use crate::types::params::GenerationParams;

/// One velocity-prediction collaborator. `RealStepper` wraps a
/// [`DitDecoder`]; `FakeStepper` returns zeros for shape/control-flow
/// testing without loading any weights.
pub trait DiffusionStepper {
    #[allow(clippy::too_many_arguments)]
    fn predict_velocity(
        &self,
        x: &Tensor,
        context_latents: &Tensor,
        encoder_states: &Tensor,
        encoder_mask: Option<&Tensor>,
        timestep: &Tensor,
        timestep_r: &Tensor,
        cache: &mut CrossAttentionCache,
    ) -> Result<Tensor>;

    /// Whether this is the real DiT stepper, for which missing
    /// conditioning is fatal.
    fn requires_conditioning(&self) -> bool;

    /// Number of layers a [`CrossAttentionCache`] must be sized for.
    fn cache_layers(&self) -> usize;
}

pub struct RealStepper {
    pub decoder: DitDecoder,
}

impl DiffusionStepper for RealStepper {
    fn requires_conditioning(&self) -> bool {
        true
    }

    fn cache_layers(&self) -> usize {
        self.decoder.num_layers()
    }

    fn predict_velocity(
        &self,
        x: &Tensor,
        context_latents: &Tensor,
        encoder_states: &Tensor,
        encoder_mask: Option<&Tensor>,
        timestep: &Tensor,
        timestep_r: &Tensor,
        cache: &mut CrossAttentionCache,
    ) -> Result<Tensor> {
        self.decoder
            .forward(x, context_latents, encoder_states, encoder_mask, timestep, timestep_r, cache)
    }
}

/// Returns zeros shaped like `x`, ignoring every other input. Used to
/// exercise the schedule/CFG/ODE control flow without a real decoder.
pub struct FakeStepper;

impl DiffusionStepper for FakeStepper {
    fn requires_conditioning(&self) -> bool {
        false
    }

    fn cache_layers(&self) -> usize {
        0
    }

    fn predict_velocity(
        &self,
        x: &Tensor,
        _context_latents: &Tensor,
        _encoder_states: &Tensor,
        _encoder_mask: Option<&Tensor>,
        _timestep: &Tensor,
        _timestep_r: &Tensor,
        _cache: &mut CrossAttentionCache,
    ) -> Result<Tensor> {
        Tensor::zeros_like(x)
    }
}

/// Advances the latent `x` by one ODE step at time `t`, predicting the
/// velocity with `stepper` and, when classifier-free guidance is
/// active at `t`, combining the doubled-batch conditional/unconditional
/// predictions with Adaptive Projected Guidance.
///
/// `next_t == None` marks the final step: `x_next = x - v * t`.
/// Otherwise `x_next = x - v * (t - next_t)`.
#[allow(clippy::too_many_arguments)]
pub fn diffusion_step(
    stepper: &dyn DiffusionStepper,
    x: &Tensor,
    conditions: &DiTConditions,
    t: f32,
    next_t: Option<f32>,
    params: &GenerationParams,
    cache: &mut CrossAttentionCache,
    momentum: &mut MomentumState,
    device: &Device,
) -> Result<Tensor> {
    let batch = x.dim(0)?;
    let seq_len = x.dim(1)?;

    let context_latents = match &conditions.context_latents {
        Some(c) => c.clone(),
        None => Tensor::zeros((batch, seq_len, crate::types::conditions::CONTEXT_LATENT_DIM), x.dtype(), device)?,
    };
    let encoder_states = match &conditions.encoder_hidden_states {
        Some(e) => e.clone(),
        None => Tensor::zeros((batch, 1, crate::types::conditions::ENCODER_HIDDEN_DIM), x.dtype(), device)?,
    };
    let encoder_mask = conditions.encoder_attention_mask.clone();

    let timestep = broadcast_scalar(t, batch, device)?;
    let timestep_r = timestep.clone();

    let cfg_active = params.cfg_active_at(t) && conditions.null_condition_embedding.is_some();
    trace!(t, cfg_active, "stepping diffusion");

    let v = if cfg_active {
        let null_embedding = conditions
            .null_condition_embedding
            .as_ref()
            .expect("checked above");
        let enc_dims = encoder_states.dims().to_vec();
        let null_broadcast = null_embedding.broadcast_as(enc_dims)?.contiguous()?;

        let doubled_x = Tensor::cat(&[x, x], 0)?;
        let doubled_context = Tensor::cat(&[&context_latents, &context_latents], 0)?;
        let doubled_encoder = Tensor::cat(&[&encoder_states, &null_broadcast], 0)?;
        let doubled_mask = match &encoder_mask {
            Some(m) => Some(Tensor::cat(&[m, m], 0)?),
            None => None,
        };
        let doubled_timestep = Tensor::cat(&[&timestep, &timestep], 0)?;
        let doubled_timestep_r = doubled_timestep.clone();

        let mut scratch_cache = CrossAttentionCache::new(cache.len(), false);
        let out = stepper.predict_velocity(
            &doubled_x,
            &doubled_context,
            &doubled_encoder,
            doubled_mask.as_ref(),
            &doubled_timestep,
            &doubled_timestep_r,
            &mut scratch_cache,
        )?;

        let p_c = out.narrow(0, 0, batch)?;
        let p_u = out.narrow(0, batch, batch)?;
        let apg_params = ApgParams {
            guidance_scale: params.guidance_scale,
            momentum: DEFAULT_MOMENTUM,
            norm_threshold: DEFAULT_NORM_THRESHOLD,
        };
        apply_apg(&p_c, &p_u, apg_params, momentum)?
    } else {
        stepper.predict_velocity(
            x,
            &context_latents,
            &encoder_states,
            encoder_mask.as_ref(),
            &timestep,
            &timestep_r,
            cache,
        )?
    };

    match next_t {
        Some(nt) => {
            let dt = f64::from(t - nt);
            x - (v * dt)?
        }
        None => {
            let dt = f64::from(t);
            x - (v * dt)?
        }
    }
}
