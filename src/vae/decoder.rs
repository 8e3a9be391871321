//! Oobleck-family VAE decoder: latent `[B, T, 64]` -> waveform
//! `[B, T*2048, C_audio]`.

use candle_core::{Result, Tensor};
use candle_nn::{conv1d, conv_transpose1d, Conv1d, Conv1dConfig, ConvTranspose1d, VarBuilder};

use crate::tensor::ops::{conv1d_channels_last, conv_transpose1d_channels_last, upsample_conv_config};
use crate::vae::residual::ResidualUnit;
use crate::vae::snake::Snake;

/// Upsampling ratio per decoder block; the product (2048) is exactly
/// the number of audio samples produced per latent frame, since every
/// stage-1/stage-2 convolution is stride-1 and length-preserving.
pub const UPSAMPLE_RATIOS: [usize; 5] = [2, 4, 4, 8, 8];

/// Number of input latent channels.
pub const LATENT_CHANNELS: usize = 64;

/// One upsampling stage: Snake -> transposed conv -> 3 residual units.
#[derive(Debug, Clone)]
struct DecoderBlock {
    snake: Snake,
    upsample: ConvTranspose1d,
    residuals: [ResidualUnit; 3],
}

impl DecoderBlock {
    fn new(in_channels: usize, out_channels: usize, ratio: usize, vb: VarBuilder) -> Result<Self> {
        let kernel = 2 * ratio;
        let padding = (ratio + 1) / 2;
        let cfg = upsample_conv_config(padding, ratio);
        let upsample = conv_transpose1d(in_channels, out_channels, kernel, cfg, vb.pp("upsample"))?;
        let residuals = [
            ResidualUnit::new(out_channels, 1, vb.pp("residual.0"))?,
            ResidualUnit::new(out_channels, 3, vb.pp("residual.1"))?,
            ResidualUnit::new(out_channels, 9, vb.pp("residual.2"))?,
        ];
        Ok(Self {
            snake: Snake::new(in_channels, true, vb.pp("snake"))?,
            upsample,
            residuals,
        })
    }

    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let x = self.snake.forward(x)?;
        let mut x = conv_transpose1d_channels_last(&self.upsample, &x)?;
        for unit in &self.residuals {
            x = unit.forward(&x)?;
        }
        Ok(x)
    }
}

/// Configuration for the width of the decoder's working channel
/// dimension. The checkpoint fixes `base_channels`; tests use a small
/// value for speed while the real checkpoint uses a production width.
#[derive(Debug, Clone, Copy)]
pub struct VaeDecoderConfig {
    /// Channel width entering the final stage-2 convolution; every
    /// earlier stage's width is `base_channels * product(remaining ratios)`.
    pub base_channels: usize,
    /// Number of output audio channels (2 = stereo).
    pub audio_channels: usize,
}

impl Default for VaeDecoderConfig {
    fn default() -> Self {
        Self {
            base_channels: 32,
            audio_channels: 2,
        }
    }
}

/// The Oobleck decoder: stage-1 conv, five upsampling blocks, stage-2
/// conv to audio channels.
#[derive(Debug, Clone)]
pub struct VaeDecoder {
    stage1: Conv1d,
    blocks: Vec<DecoderBlock>,
    final_snake: Snake,
    stage2: Conv1d,
    config: VaeDecoderConfig,
}

impl VaeDecoder {
    pub fn new(config: VaeDecoderConfig, vb: VarBuilder) -> Result<Self> {
        let widths = stage_widths(config.base_channels);
        let stage1_cfg = Conv1dConfig {
            padding: 3,
            stride: 1,
            dilation: 1,
            groups: 1,
        };
        let stage1 = conv1d(LATENT_CHANNELS, widths[0], 7, stage1_cfg, vb.pp("stage1"))?;

        let mut blocks = Vec::with_capacity(UPSAMPLE_RATIOS.len());
        for (i, &ratio) in UPSAMPLE_RATIOS.iter().enumerate() {
            let block = DecoderBlock::new(widths[i], widths[i + 1], ratio, vb.pp(format!("block.{i}")))?;
            blocks.push(block);
        }

        let final_snake = Snake::new(config.base_channels, true, vb.pp("final_snake"))?;
        let stage2_cfg = Conv1dConfig {
            padding: 3,
            stride: 1,
            dilation: 1,
            groups: 1,
        };
        let stage2 = conv1d_no_bias(config.base_channels, config.audio_channels, 7, stage2_cfg, vb.pp("stage2"))?;

        Ok(Self {
            stage1,
            blocks,
            final_snake,
            stage2,
            config,
        })
    }

    /// Decodes `[B, T, 64]` into `[B, T*2048, audio_channels]`,
    /// trimming any transposed-conv overshoot to exactly `T*2048`
    /// samples.
    pub fn forward(&self, latent: &Tensor) -> Result<Tensor> {
        let t = latent.dim(1)?;
        let expected_samples = t * frame_expansion();

        let mut x = conv1d_channels_last(&self.stage1, latent)?;
        for block in &self.blocks {
            x = block.forward(&x)?;
        }
        x = self.final_snake.forward(&x)?;
        x = conv1d_channels_last(&self.stage2, &x)?;

        let actual = x.dim(1)?;
        if actual > expected_samples {
            x = x.narrow(1, 0, expected_samples)?;
        }
        Ok(x)
    }

    pub fn config(&self) -> VaeDecoderConfig {
        self.config
    }
}

/// Total samples produced per latent frame: the product of
/// `UPSAMPLE_RATIOS`.
pub(crate) fn frame_expansion() -> usize {
    UPSAMPLE_RATIOS.iter().product()
}

fn stage_widths(base: usize) -> Vec<usize> {
    let mut widths = vec![base];
    for &ratio in UPSAMPLE_RATIOS.iter().rev() {
        let last = *widths.last().unwrap();
        widths.push(last * ratio);
    }
    widths.reverse();
    widths
}

fn conv1d_no_bias(
    in_c: usize,
    out_c: usize,
    kernel: usize,
    cfg: Conv1dConfig,
    vb: VarBuilder,
) -> Result<Conv1d> {
    let ws = vb.get((out_c, in_c, kernel), "weight")?;
    Ok(Conv1d::new(ws, None, cfg))
}
