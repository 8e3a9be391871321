//! Snake activation: `x + (1/(beta+eps)) * sin(alpha*x)^2`. A periodic nonlinearity used throughout the Oobleck decoder
//! in place of ReLU/GELU, which models periodic audio waveforms more
//! faithfully.

use candle_core::{DType, Result, Tensor};
use candle_nn::VarBuilder;

const EPS: f64 = 1e-9;

/// Per-channel Snake activation parameters, channel count `C`.
#[derive(Debug, Clone)]
pub struct Snake {
    alpha: Tensor,
    beta: Tensor,
    /// When true (the default the checkpoint trains under), the raw
    /// learned parameters are log-scale and must be exponentiated
    /// before use.
    logscale: bool,
}

impl Snake {
    pub fn new(channels: usize, logscale: bool, vb: VarBuilder) -> Result<Self> {
        let alpha = vb.get(channels, "alpha")?;
        let beta = vb.get(channels, "beta")?;
        Ok(Self { alpha, beta, logscale })
    }

    /// Applies the activation to a channels-last `[B, L, C]` tensor.
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let input_dtype = x.dtype();
        let needs_upcast = matches!(input_dtype, DType::F16 | DType::BF16);
        let x32 = if needs_upcast { x.to_dtype(DType::F32)? } else { x.clone() };

        let channels = self.alpha.dim(0)?;
        let (alpha, beta) = if self.logscale {
            (self.alpha.exp()?, self.beta.exp()?)
        } else {
            (self.alpha.clone(), self.beta.clone())
        };
        let alpha = alpha.to_dtype(DType::F32)?.reshape((1, 1, channels))?;
        let beta = beta.to_dtype(DType::F32)?.reshape((1, 1, channels))?;

        let sin_term = x32.broadcast_mul(&alpha)?.sin()?.sqr()?;
        let denom = (beta + EPS)?;
        let out = (x32 + sin_term.broadcast_div(&denom)?)?;

        if needs_upcast {
            out.to_dtype(input_dtype)
        } else {
            Ok(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;
    use candle_nn::VarMap;

    fn snake_with(alpha: f32, beta: f32, channels: usize, logscale: bool) -> Snake {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
        let snake = Snake::new(channels, logscale, vb).unwrap();
        // Overwrite the randomly initialized parameters deterministically.
        let alpha_t = Tensor::full(alpha, channels, &dev).unwrap();
        let beta_t = Tensor::full(beta, channels, &dev).unwrap();
        Snake {
            alpha: alpha_t,
            beta: beta_t,
            logscale,
        }
    }

    #[test]
    fn zero_input_is_fixed_point() {
        let snake = snake_with(0.0, 0.0, 2, false);
        let dev = Device::Cpu;
        let x = Tensor::zeros((1, 1, 2), DType::F32, &dev).unwrap();
        let y = snake.forward(&x).unwrap();
        let sum = y.abs().unwrap().sum_all().unwrap().to_scalar::<f32>().unwrap();
        assert!(sum < 1e-6);
    }

    #[test]
    fn odd_symmetry_holds() {
        // snake(-x) == -x + (1/(beta+eps))*sin(alpha*x)^2, i.e. the
        // periodic term is even while the linear term is odd.
        let snake = snake_with(1.3, 0.4, 1, false);
        let dev = Device::Cpu;
        let x = Tensor::from_vec(vec![0.7f32], (1, 1, 1), &dev).unwrap();
        let neg_x = Tensor::from_vec(vec![-0.7f32], (1, 1, 1), &dev).unwrap();
        let y = snake.forward(&x).unwrap().to_vec3::<f32>().unwrap()[0][0][0];
        let y_neg = snake.forward(&neg_x).unwrap().to_vec3::<f32>().unwrap()[0][0][0];
        let periodic = y - 0.7;
        let periodic_neg = y_neg - (-0.7);
        assert!((periodic - periodic_neg).abs() < 1e-5);
    }

    #[test]
    fn logscale_exponentiates_parameters() {
        let dev = Device::Cpu;
        let snake_log = snake_with(0.0, 0.0, 1, true);
        let snake_linear = snake_with(1.0, 1.0, 1, false);
        let x = Tensor::from_vec(vec![0.5f32], (1, 1, 1), &dev).unwrap();
        let y_log = snake_log.forward(&x).unwrap().to_vec3::<f32>().unwrap()[0][0][0];
        let y_linear = snake_linear.forward(&x).unwrap().to_vec3::<f32>().unwrap()[0][0][0];
        assert!((y_log - y_linear).abs() < 1e-5);
    }

    #[test]
    fn upcasts_f16_input_without_panicking() {
        let snake = snake_with(0.5, 0.2, 1, false);
        let dev = Device::Cpu;
        let x = Tensor::from_vec(vec![0.3f32], (1, 1, 1), &dev)
            .unwrap()
            .to_dtype(DType::F16)
            .unwrap();
        let y = snake.forward(&x).unwrap();
        assert_eq!(y.dtype(), DType::F16);
    }
}
