//! Latent length calculation and seeded initialization.
//!
//! The ChaCha8 + Box-Muller sampling here is reused verbatim from the
//! teacher's ACE-Step latent initializer
//! (`models/ace_step/latent.rs`), generalized from a 4-D `ndarray`
//! layout to a channels-last `candle_core::Tensor`.

use candle_core::{Device, Result, Tensor};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::vae::decoder::frame_expansion;

/// Minimum latent length, matching the conditioning padding used by
/// the exporter.
pub const LATENT_T_MIN: usize = 128;

/// Default latent length used when `duration <= 0`.
pub const DEFAULT_LATENT_LENGTH: usize = 100;

/// Computes `T = max(T_min, ceil(duration * sample_rate / 2048))`,
/// falling back to `DEFAULT_LATENT_LENGTH` when `duration <= 0`.
pub fn latent_length(duration: f32, sample_rate: u32) -> usize {
    if duration <= 0.0 {
        return DEFAULT_LATENT_LENGTH;
    }
    let frames = (duration * sample_rate as f32 / frame_expansion() as f32).ceil() as usize;
    frames.max(LATENT_T_MIN)
}

/// Draws standard-normal samples via Box-Muller, seeded with ChaCha8
/// when `seed >= 0`, else from system entropy.
pub fn initialize_latent(batch: usize, t: usize, channels: usize, seed: i64, device: &Device) -> Result<Tensor> {
    let total = batch * t * channels;
    let samples = if seed >= 0 {
        let mut rng = ChaCha8Rng::seed_from_u64(seed as u64);
        gaussian_samples(total, &mut rng)
    } else {
        let mut rng = rand::thread_rng();
        gaussian_samples(total, &mut rng)
    };
    Tensor::from_vec(samples, (batch, t, channels), device)
}

fn gaussian_samples(n: usize, rng: &mut impl Rng) -> Vec<f32> {
    let mut samples = Vec::with_capacity(n);
    while samples.len() < n {
        let u1: f32 = rng.gen_range(1e-10..1.0);
        let u2: f32 = rng.gen_range(0.0..1.0);
        let mag = (-2.0 * u1.ln()).sqrt();
        let z0 = mag * (2.0 * std::f32::consts::PI * u2).cos();
        let z1 = mag * (2.0 * std::f32::consts::PI * u2).sin();
        samples.push(z0);
        if samples.len() < n {
            samples.push(z1);
        }
    }
    samples
}
