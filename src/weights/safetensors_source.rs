//! `safetensors`-backed [`CheckpointSource`].
//!
//! `safetensors` is the idiomatic Rust checkpoint format for
//! candle-based inference (grounded in `rust_agency`'s `t3_candle.rs`,
//! which loads a `HashMap<String, Tensor>` from weights the same way).

use std::collections::HashMap;
use std::path::Path;

use candle_core::{Device, Tensor};
use tracing::info;

use crate::error::{EngineError, Result};
use crate::weights::loader::CheckpointSource;

pub struct SafetensorsSource {
    tensors: HashMap<String, Tensor>,
}

impl SafetensorsSource {
    pub fn load(path: impl AsRef<Path>, device: &Device) -> Result<Self> {
        let path = path.as_ref();
        let tensors = candle_core::safetensors::load(path, device)
            .map_err(|source| EngineError::WeightFormat(source.to_string()))?;
        info!(path = %path.display(), tensors = tensors.len(), "loaded checkpoint");
        Ok(Self { tensors })
    }

    /// Wraps an in-memory map directly, useful for tests and for
    /// callers who already mmap'd the file themselves.
    pub fn from_tensors(tensors: HashMap<String, Tensor>) -> Self {
        Self { tensors }
    }
}

impl CheckpointSource for SafetensorsSource {
    fn entries(&self) -> Vec<(String, Tensor)> {
        self.tensors.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    fn get(&self, key: &str) -> Option<Tensor> {
        self.tensors.get(key).cloned()
    }
}
