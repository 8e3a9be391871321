//! Adaptive Projected Guidance (APG) for classifier-free guidance.

use candle_core::{Result, Tensor};

use crate::tensor::ops::l2_norm_keepdim;

const EPS: f64 = 1e-8;
const PROJECTION_AXIS: usize = 1;

/// Default momentum factor and norm threshold used by the guidance step.
pub const DEFAULT_MOMENTUM: f32 = -0.75;
pub const DEFAULT_NORM_THRESHOLD: f32 = 2.5;

/// Mutable momentum state carried across diffusion steps, owned by
/// the caller (the stepper) and reset per run.
#[derive(Debug, Default, Clone)]
pub struct MomentumState {
    running: Option<Tensor>,
}

impl MomentumState {
    pub fn new() -> Self {
        Self { running: None }
    }
}

/// Parameters controlling the guidance strength and stabilization.
#[derive(Debug, Clone, Copy)]
pub struct ApgParams {
    pub guidance_scale: f32,
    pub momentum: f32,
    pub norm_threshold: f32,
}

impl Default for ApgParams {
    fn default() -> Self {
        Self {
            guidance_scale: 1.0,
            momentum: DEFAULT_MOMENTUM,
            norm_threshold: DEFAULT_NORM_THRESHOLD,
        }
    }
}

/// Applies Adaptive Projected Guidance, combining the conditional
/// prediction `p_c` and unconditional `p_u` into a single guided
/// prediction. Mutates `momentum` in place when momentum is enabled.
///
/// At `guidance_scale == 1.0` this returns `p_c` unchanged.
pub fn apply_apg(p_c: &Tensor, p_u: &Tensor, params: ApgParams, momentum: &mut MomentumState) -> Result<Tensor> {
    if (params.guidance_scale - 1.0).abs() < f32::EPSILON {
        return Ok(p_c.clone());
    }

    let mut d = (p_c - p_u)?;

    if let Some(running) = &momentum.running {
        let updated = ((running * f64::from(params.momentum))? + &d)?;
        d = updated;
    }
    momentum.running = Some(d.clone());

    if params.norm_threshold > 0.0 {
        let n = l2_norm_keepdim(&d, PROJECTION_AXIS)?;
        let cap = (n + EPS)?.recip()?.affine(f64::from(params.norm_threshold), 0.0)?;
        let scale = cap.minimum(&Tensor::ones_like(&cap)?)?;
        d = d.broadcast_mul(&scale)?;
    }

    let p_c_norm = (l2_norm_keepdim(p_c, PROJECTION_AXIS)? + EPS)?;
    let v1 = p_c.broadcast_div(&p_c_norm)?;

    let dot = (&d * &v1)?.sum_keepdim(PROJECTION_AXIS)?;
    let d_parallel = v1.broadcast_mul(&dot)?;
    let d_perp = (&d - &d_parallel)?;

    let coefficient = f64::from(params.guidance_scale - 1.0);
    p_c + (d_perp * coefficient)?
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    #[test]
    fn identity_at_scale_one() {
        let dev = Device::Cpu;
        let p_c = Tensor::randn(0f32, 1.0, (1, 4, 3), &dev).unwrap();
        let p_u = Tensor::randn(0f32, 1.0, (1, 4, 3), &dev).unwrap();
        let mut momentum = MomentumState::new();
        let params = ApgParams {
            guidance_scale: 1.0,
            ..Default::default()
        };
        let out = apply_apg(&p_c, &p_u, params, &mut momentum).unwrap();
        let diff = (out - &p_c).unwrap().abs().unwrap().sum_all().unwrap().to_scalar::<f32>().unwrap();
        assert_eq!(diff, 0.0);
    }

    #[test]
    fn projection_law_delta_is_orthogonal_to_p_c() {
        let dev = Device::Cpu;
        let p_c = Tensor::randn(0f32, 1.0, (1, 6, 3), &dev).unwrap();
        let p_u = Tensor::randn(0f32, 1.0, (1, 6, 3), &dev).unwrap();
        let mut momentum = MomentumState::new();
        let params = ApgParams {
            guidance_scale: 4.0,
            momentum: 0.0,
            norm_threshold: 0.0,
        };
        let out = apply_apg(&p_c, &p_u, params, &mut momentum).unwrap();
        let delta = (out - &p_c).unwrap();

        let p_c_norm = (l2_norm_keepdim(&p_c, PROJECTION_AXIS).unwrap() + EPS).unwrap();
        let v1 = p_c.broadcast_div(&p_c_norm).unwrap();
        let dot = (&delta * &v1).unwrap().sum_keepdim(PROJECTION_AXIS).unwrap();
        let max_abs_dot = dot.abs().unwrap().max_all().unwrap().to_scalar::<f32>().unwrap();
        assert!(max_abs_dot < 1e-3, "delta not orthogonal to p_c, dot={max_abs_dot}");
    }

    #[test]
    fn norm_threshold_caps_delta_magnitude() {
        let dev = Device::Cpu;
        let p_c = Tensor::zeros((1, 1, 4), DType::F32, &dev).unwrap();
        let p_u = Tensor::from_vec(vec![-100f32, -100.0, -100.0, -100.0], (1, 1, 4), &dev).unwrap();
        let mut momentum = MomentumState::new();
        let params = ApgParams {
            guidance_scale: 2.0,
            momentum: 0.0,
            norm_threshold: 1.0,
        };
        let out = apply_apg(&p_c, &p_u, params, &mut momentum).unwrap();
        let norm = out.abs().unwrap().max_all().unwrap().to_scalar::<f32>().unwrap();
        assert!(norm < 5.0, "expected capped delta, got magnitude {norm}");
    }

    #[test]
    fn momentum_state_accumulates_across_calls() {
        let dev = Device::Cpu;
        let p_c = Tensor::ones((1, 2, 2), DType::F32, &dev).unwrap();
        let p_u = Tensor::zeros((1, 2, 2), DType::F32, &dev).unwrap();
        let mut momentum = MomentumState::new();
        let params = ApgParams {
            guidance_scale: 3.0,
            momentum: -0.75,
            norm_threshold: 0.0,
        };
        let _ = apply_apg(&p_c, &p_u, params, &mut momentum).unwrap();
        assert!(momentum.running.is_some());
        let _ = apply_apg(&p_c, &p_u, params, &mut momentum).unwrap();
        assert!(momentum.running.is_some());
    }
}
