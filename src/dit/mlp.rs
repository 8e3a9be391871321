//! SwiGLU feed-forward block used by each DiT layer:
//! `down(silu(gate(x)) * up(x))`, no biases.

use candle_core::{Module, Result, Tensor};
use candle_nn::{linear_no_bias, Linear, VarBuilder};

#[derive(Debug, Clone)]
pub struct SwiGlu {
    gate: Linear,
    up: Linear,
    down: Linear,
}

impl SwiGlu {
    pub fn new(hidden_dim: usize, intermediate_dim: usize, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            gate: linear_no_bias(hidden_dim, intermediate_dim, vb.pp("gate"))?,
            up: linear_no_bias(hidden_dim, intermediate_dim, vb.pp("up"))?,
            down: linear_no_bias(intermediate_dim, hidden_dim, vb.pp("down"))?,
        })
    }

    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let gated = candle_nn::ops::silu(&self.gate.forward(x)?)?;
        let up = self.up.forward(x)?;
        let prod = (gated * up)?;
        self.down.forward(&prod)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn preserves_leading_dims_and_restores_hidden_width() {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
        let mlp = SwiGlu::new(8, 16, vb).unwrap();
        let x = Tensor::randn(0f32, 1.0, (2, 5, 8), &dev).unwrap();
        let out = mlp.forward(&x).unwrap();
        assert_eq!(out.dims(), &[2, 5, 8]);
    }
}
