//! Dilated residual units used inside each VAE decoder upsampling
//! stage.

use candle_core::{Result, Tensor};
use candle_nn::{conv1d, Conv1d, Conv1dConfig, VarBuilder};

use crate::tensor::ops::{conv1d_channels_last, dilated_conv_config};
use crate::vae::snake::Snake;

/// One residual unit: `snake -> dilated conv(k=7) -> snake -> conv(k=1)`,
/// with a center-cropped skip connection.
#[derive(Debug, Clone)]
pub struct ResidualUnit {
    snake1: Snake,
    conv1: Conv1d,
    snake2: Snake,
    conv2: Conv1d,
}

impl ResidualUnit {
    pub fn new(channels: usize, dilation: usize, vb: VarBuilder) -> Result<Self> {
        let padding = 3 * dilation;
        let conv1_cfg = dilated_conv_config(padding, dilation);
        let conv1 = conv1d(channels, channels, 7, conv1_cfg, vb.pp("conv1"))?;
        let conv2_cfg = Conv1dConfig {
            padding: 0,
            stride: 1,
            dilation: 1,
            groups: 1,
        };
        let conv2 = conv1d(channels, channels, 1, conv2_cfg, vb.pp("conv2"))?;
        Ok(Self {
            snake1: Snake::new(channels, true, vb.pp("snake1"))?,
            conv1,
            snake2: Snake::new(channels, true, vb.pp("snake2"))?,
            conv2,
        })
    }

    /// `x`: `[B, L, C]` channels-last. Returns `[B, L', C]` where `L'`
    /// matches the dilated convolution's output length.
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let y = self.snake1.forward(x)?;
        let y = conv1d_channels_last(&self.conv1, &y)?;
        let y = self.snake2.forward(&y)?;
        let y = conv1d_channels_last(&self.conv2, &y)?;

        let in_len = x.dim(1)?;
        let out_len = y.dim(1)?;
        let skip = if in_len == out_len {
            x.clone()
        } else {
            let start = (in_len - out_len) / 2;
            x.narrow(1, start, out_len)?
        };
        skip + y
    }
}
