//! Output types for a completed (or failed) generation run.

use serde::{Deserialize, Serialize};

use crate::types::params::AudioFormat;

/// One decoded audio result from a batched run.
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    /// Interleaved or planar samples, `channels * frames` long,
    /// peak-normalized to `[-1, 1]`.
    pub samples: Vec<f32>,
    /// Number of channels (1 for mono, 2 for stereo).
    pub channels: usize,
    /// Samples per channel per second.
    pub sample_rate: u32,
    /// Seed actually used to produce this element.
    pub seed_used: i64,
}

impl DecodedAudio {
    /// Number of sample frames, i.e. `samples.len() / channels`.
    pub fn frame_count(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels
        }
    }

    /// Duration of this result in seconds.
    pub fn duration_secs(&self) -> f32 {
        if self.sample_rate == 0 {
            0.0
        } else {
            self.frame_count() as f32 / self.sample_rate as f32
        }
    }

    /// Whether the sample layout matches the requested format's
    /// channel count.
    pub fn matches_format(&self, format: AudioFormat) -> bool {
        match format {
            AudioFormat::Mono => self.channels == 1,
            AudioFormat::Stereo => self.channels == 2,
        }
    }
}

/// Terminal outcome of one `run()` invocation: exactly one of a populated `audios` vec (success) or an error
/// message (failure) is meaningful, never both.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationStatus {
    pub success: bool,
    pub message: String,
    pub error: Option<String>,
}

impl GenerationStatus {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            success: false,
            message: "generation failed".to_string(),
            error: Some(error),
        }
    }
}
