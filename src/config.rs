//! Engine configuration.
//!
//! The core reads no environment variables itself, accepting only the
//! file paths and device selection the caller passes in; surrounding
//! tooling is responsible for resolving those from config files, CLI
//! flags, or the environment.

use std::path::PathBuf;

use candle_core::{DType, Device};
use serde::{Deserialize, Serialize};

/// Hardware device for tensor-runtime execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    /// Run on the host CPU.
    #[default]
    Cpu,
    /// Use an NVIDIA CUDA GPU at the given ordinal.
    Cuda(usize),
    /// Use Apple Metal on the given ordinal.
    Metal(usize),
}

impl DeviceKind {
    /// Resolves this selection to a concrete `candle_core::Device`.
    pub fn to_candle(self) -> candle_core::Result<Device> {
        match self {
            DeviceKind::Cpu => Ok(Device::Cpu),
            DeviceKind::Cuda(ordinal) => Device::new_cuda(ordinal),
            DeviceKind::Metal(ordinal) => Device::new_metal(ordinal),
        }
    }

    /// Human-readable device name.
    pub fn name(&self) -> &'static str {
        match self {
            DeviceKind::Cpu => "cpu",
            DeviceKind::Cuda(_) => "cuda",
            DeviceKind::Metal(_) => "metal",
        }
    }
}

/// Configuration for the generation engine.
///
/// Every path here is supplied by the caller; the engine never probes
/// the filesystem for default locations or reads environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Path to the DiT + VAE checkpoint (a safetensors container).
    pub checkpoint_path: PathBuf,

    /// Optional path to the `silence_latent.*` auxiliary file used as
    /// the context source for pure text-to-music runs.
    pub silence_latent_path: Option<PathBuf>,

    /// Device to run inference on.
    pub device: DeviceKind,

    /// Compute dtype for model weights and activations.
    #[serde(with = "dtype_serde")]
    pub dtype: DType,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            checkpoint_path: PathBuf::new(),
            silence_latent_path: None,
            device: DeviceKind::Cpu,
            dtype: DType::F32,
        }
    }
}

impl EngineConfig {
    /// Creates a config pointing at the given checkpoint, CPU device,
    /// f32 compute.
    pub fn with_checkpoint(checkpoint_path: PathBuf) -> Self {
        Self {
            checkpoint_path,
            ..Default::default()
        }
    }

    /// Returns whether the configured checkpoint file exists.
    pub fn checkpoint_exists(&self) -> bool {
        self.checkpoint_path.exists()
    }
}

/// `DType` has no native `serde` impl; round-trip through its name.
mod dtype_serde {
    use candle_core::DType;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(dtype: &DType, s: S) -> Result<S::Ok, S::Error> {
        dtype.as_str().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DType, D::Error> {
        let name = String::deserialize(d)?;
        match name.as_str() {
            "f16" => Ok(DType::F16),
            "bf16" => Ok(DType::BF16),
            "f32" => Ok(DType::F32),
            "f64" => Ok(DType::F64),
            other => Err(serde::de::Error::custom(format!("unsupported dtype: {other}"))),
        }
    }
}
