//! Oobleck-family VAE decoder: Snake activation, dilated residual
//! units, transposed-conv upsampling stages.

pub mod decoder;
pub mod encoder;
pub mod residual;
pub mod snake;

use candle_core::{DType, Device, Result, Tensor};

pub use decoder::{VaeDecoder, VaeDecoderConfig};
pub use encoder::{reparameterize, VaeEncoder, VaeEncoderConfig};

/// Latent-to-waveform collaborator. `RealVae` wraps the trained
/// [`VaeDecoder`]; `FakeVae` returns zeros for shape/control-flow
/// testing without loading any weights.
pub trait AudioDecoder {
    fn decode(&self, latent: &Tensor) -> Result<Tensor>;
    fn channels(&self) -> usize;
}

pub struct RealVae {
    pub decoder: VaeDecoder,
}

impl AudioDecoder for RealVae {
    fn decode(&self, latent: &Tensor) -> Result<Tensor> {
        self.decoder.forward(latent)
    }

    fn channels(&self) -> usize {
        self.decoder.config().audio_channels
    }
}

/// Returns zeros shaped `[B, T*2048, channels]`. Defaults to mono.
pub struct FakeVae {
    pub channels: usize,
    pub device: Device,
}

impl Default for FakeVae {
    fn default() -> Self {
        Self {
            channels: 1,
            device: Device::Cpu,
        }
    }
}

impl AudioDecoder for FakeVae {
    fn decode(&self, latent: &Tensor) -> Result<Tensor> {
        let (b, t, _) = latent.dims3()?;
        Tensor::zeros((b, t * decoder::frame_expansion(), self.channels), DType::F32, &self.device)
    }

    fn channels(&self) -> usize {
        self.channels
    }
}
