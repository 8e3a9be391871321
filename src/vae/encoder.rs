//! Oobleck-family VAE encoder: waveform `[B, T*2048, C_audio]` ->
//! latent distribution parameters `[B, T, 64]` x 2 (mean, log-variance).
//!
//! The reference model is used exclusively for decoding during
//! inference; this encoder exists for the source-conditioned task hook
//! (repaint/cover/extract/complete all start from an encoded source
//! latent rather than pure noise) and mirrors the decoder's block
//! structure stage for stage, downsampling instead of upsampling.

use candle_core::{Result, Tensor};
use candle_nn::{conv1d, Conv1d, Conv1dConfig, VarBuilder};

use crate::tensor::ops::{conv1d_channels_last, downsample_conv_config};
use crate::vae::decoder::{LATENT_CHANNELS, UPSAMPLE_RATIOS};
use crate::vae::residual::ResidualUnit;
use crate::vae::snake::Snake;

/// One downsampling stage: 3 residual units -> Snake -> strided conv.
/// The mirror image of `vae::decoder::DecoderBlock`.
#[derive(Debug, Clone)]
struct EncoderBlock {
    residuals: [ResidualUnit; 3],
    snake: Snake,
    downsample: Conv1d,
}

impl EncoderBlock {
    fn new(in_channels: usize, out_channels: usize, ratio: usize, vb: VarBuilder) -> Result<Self> {
        let residuals = [
            ResidualUnit::new(in_channels, 1, vb.pp("residual.0"))?,
            ResidualUnit::new(in_channels, 3, vb.pp("residual.1"))?,
            ResidualUnit::new(in_channels, 9, vb.pp("residual.2"))?,
        ];
        let kernel = 2 * ratio;
        let padding = (ratio + 1) / 2;
        let cfg = downsample_conv_config(padding, ratio);
        let downsample = conv1d(in_channels, out_channels, kernel, cfg, vb.pp("downsample"))?;
        Ok(Self {
            residuals,
            snake: Snake::new(in_channels, true, vb.pp("snake"))?,
            downsample,
        })
    }

    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let mut x = x.clone();
        for unit in &self.residuals {
            x = unit.forward(&x)?;
        }
        let x = self.snake.forward(&x)?;
        conv1d_channels_last(&self.downsample, &x)
    }
}

/// Configuration for the encoder's working channel width. Mirrors
/// `VaeDecoderConfig`; the two are expected to share `base_channels`
/// and `audio_channels` against the same checkpoint.
#[derive(Debug, Clone, Copy)]
pub struct VaeEncoderConfig {
    pub base_channels: usize,
    pub audio_channels: usize,
}

impl Default for VaeEncoderConfig {
    fn default() -> Self {
        Self {
            base_channels: 32,
            audio_channels: 2,
        }
    }
}

/// The Oobleck encoder: stage-1 conv, five downsampling blocks
/// (ratios applied in reverse of the decoder's upsampling order),
/// stage-2 conv to `2 * LATENT_CHANNELS` (mean and log-variance,
/// concatenated along the channel axis).
#[derive(Debug, Clone)]
pub struct VaeEncoder {
    stage1: Conv1d,
    blocks: Vec<EncoderBlock>,
    final_snake: Snake,
    stage2: Conv1d,
    config: VaeEncoderConfig,
}

impl VaeEncoder {
    pub fn new(config: VaeEncoderConfig, vb: VarBuilder) -> Result<Self> {
        let widths = stage_widths(config.base_channels);
        let stage1_cfg = Conv1dConfig {
            padding: 3,
            stride: 1,
            dilation: 1,
            groups: 1,
        };
        let stage1 = conv1d(config.audio_channels, widths[0], 7, stage1_cfg, vb.pp("stage1"))?;

        let ratios_in_encode_order: Vec<usize> = UPSAMPLE_RATIOS.iter().rev().copied().collect();
        let mut blocks = Vec::with_capacity(ratios_in_encode_order.len());
        for (i, &ratio) in ratios_in_encode_order.iter().enumerate() {
            let block = EncoderBlock::new(widths[i], widths[i + 1], ratio, vb.pp(format!("block.{i}")))?;
            blocks.push(block);
        }

        let last = *widths.last().unwrap();
        let final_snake = Snake::new(last, true, vb.pp("final_snake"))?;
        let stage2_cfg = Conv1dConfig {
            padding: 3,
            stride: 1,
            dilation: 1,
            groups: 1,
        };
        let stage2 = conv1d(last, LATENT_CHANNELS * 2, 7, stage2_cfg, vb.pp("stage2"))?;

        Ok(Self {
            stage1,
            blocks,
            final_snake,
            stage2,
            config,
        })
    }

    /// Encodes `[B, samples, audio_channels]` into `(mean, logvar)`,
    /// each `[B, T, 64]` where `T = samples / 2048`.
    pub fn forward(&self, audio: &Tensor) -> Result<(Tensor, Tensor)> {
        let mut x = conv1d_channels_last(&self.stage1, audio)?;
        for block in &self.blocks {
            x = block.forward(&x)?;
        }
        x = self.final_snake.forward(&x)?;
        x = conv1d_channels_last(&self.stage2, &x)?;

        let mean = x.narrow(2, 0, LATENT_CHANNELS)?;
        let logvar = x.narrow(2, LATENT_CHANNELS, LATENT_CHANNELS)?;
        Ok((mean, logvar))
    }

    pub fn config(&self) -> VaeEncoderConfig {
        self.config
    }
}

/// Samples `mean + exp(0.5 * logvar) * eps` for a standard-normal
/// `eps` the caller supplies (kept external so seeding stays the
/// pipeline's responsibility rather than the model's).
pub fn reparameterize(mean: &Tensor, logvar: &Tensor, eps: &Tensor) -> Result<Tensor> {
    let std = (logvar * 0.5)?.exp()?;
    mean + (std * eps)?
}

fn stage_widths(base: usize) -> Vec<usize> {
    let mut widths = vec![base];
    for &ratio in UPSAMPLE_RATIOS.iter() {
        let last = *widths.last().unwrap();
        widths.push(last * ratio);
    }
    widths.reverse();
    widths
}
