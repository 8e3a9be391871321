//! Timestep and condition embeddings feeding the DiT decoder.

use candle_core::{Device, Module, Result, Tensor};
use candle_nn::{linear, Linear, VarBuilder};

use crate::tensor::timestep::sinusoidal_embedding;

const TIMESTEP_FREQ_DIM: usize = 256;
const TIMESTEP_MAX_PERIOD: f64 = 10000.0;

/// One sinusoidal + 2-layer MLP timestep head, producing both the
/// `[B, D]` embedding used in the output AdaLN sum and the `[B, 6, D]`
/// per-layer modulation projection.
#[derive(Debug, Clone)]
pub struct TimestepHead {
    mlp_in: Linear,
    mlp_out: Linear,
    proj: Linear,
    hidden_dim: usize,
}

impl TimestepHead {
    pub fn new(hidden_dim: usize, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            mlp_in: linear(TIMESTEP_FREQ_DIM, hidden_dim, vb.pp("mlp_in"))?,
            mlp_out: linear(hidden_dim, hidden_dim, vb.pp("mlp_out"))?,
            proj: linear(hidden_dim, 6 * hidden_dim, vb.pp("proj"))?,
            hidden_dim,
        })
    }

    /// `t`: `[B]` scalar timesteps. Returns `(temb, proj)` where
    /// `temb` is `[B, D]` and `proj` is `[B, 6, D]`.
    pub fn forward(&self, t: &Tensor, device: &Device) -> Result<(Tensor, Tensor)> {
        let freq = sinusoidal_embedding(t, TIMESTEP_FREQ_DIM, TIMESTEP_MAX_PERIOD, device)?;
        let hidden = candle_nn::ops::silu(&self.mlp_in.forward(&freq)?)?;
        let temb = self.mlp_out.forward(&hidden)?;
        let proj = self.proj.forward(&candle_nn::ops::silu(&temb)?)?;
        let batch = proj.dim(0)?;
        let proj = proj.reshape((batch, 6, self.hidden_dim))?;
        Ok((temb, proj))
    }
}

/// Linear projection of encoder hidden states into the decoder's
/// working width.
#[derive(Debug, Clone)]
pub struct ConditionEmbedder {
    proj: Linear,
}

impl ConditionEmbedder {
    pub fn new(encoder_dim: usize, hidden_dim: usize, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            proj: linear(encoder_dim, hidden_dim, vb.pp("proj"))?,
        })
    }

    pub fn forward(&self, encoder_states: &Tensor) -> Result<Tensor> {
        self.proj.forward(encoder_states)
    }
}

/// Combines the two timestep heads. The caller always passes
/// `timestep_r = timestep`, so the second head's input
/// `timestep - timestep_r` is architecturally zero.
pub struct DualTimestep {
    pub t_head: TimestepHead,
    pub r_head: TimestepHead,
}

impl DualTimestep {
    pub fn new(hidden_dim: usize, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            t_head: TimestepHead::new(hidden_dim, vb.pp("t_head"))?,
            r_head: TimestepHead::new(hidden_dim, vb.pp("r_head"))?,
        })
    }

    /// `timestep`, `timestep_r`: `[B]`. Returns `(temb, timestep_proj)`
    /// where `temb` is `[B, D]` and `timestep_proj` is `[B, 6, D]`.
    pub fn forward(&self, timestep: &Tensor, timestep_r: &Tensor, device: &Device) -> Result<(Tensor, Tensor)> {
        let (temb_t, proj_t) = self.t_head.forward(timestep, device)?;
        let delta = (timestep - timestep_r)?;
        let (temb_r, proj_r) = self.r_head.forward(&delta, device)?;
        let temb = (temb_t + temb_r)?;
        let proj = (proj_t + proj_r)?;
        Ok((temb, proj))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::DType;
    use candle_nn::VarMap;

    #[test]
    fn timestep_head_shapes() {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
        let head = TimestepHead::new(8, vb).unwrap();
        let t = Tensor::from_vec(vec![0.5f32, 0.1], 2, &dev).unwrap();
        let (temb, proj) = head.forward(&t, &dev).unwrap();
        assert_eq!(temb.dims(), &[2, 8]);
        assert_eq!(proj.dims(), &[2, 6, 8]);
    }

    #[test]
    fn dual_timestep_with_equal_t_and_r_zeroes_second_head_input() {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
        let dual = DualTimestep::new(8, vb).unwrap();
        let t = Tensor::from_vec(vec![0.7f32], 1, &dev).unwrap();
        // timestep_r == timestep, by construction.
        let (temb, proj) = dual.forward(&t, &t, &dev).unwrap();
        assert_eq!(temb.dims(), &[1, 8]);
        assert_eq!(proj.dims(), &[1, 6, 8]);
    }

    #[test]
    fn condition_embedder_projects_to_hidden_width() {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
        let embedder = ConditionEmbedder::new(6, 8, vb).unwrap();
        let x = Tensor::zeros((1, 3, 6), DType::F32, &dev).unwrap();
        let out = embedder.forward(&x).unwrap();
        assert_eq!(out.dims(), &[1, 3, 8]);
    }
}
