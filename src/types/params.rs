//! `GenerationParams` / `GenerationConfig` — the caller-owned request
//! that drives one pipeline run.

use serde::{Deserialize, Serialize};

/// Task hook for source-conditioned variants (cover/repaint/extract/
/// complete). Spec §1 mandates only the hook, not task-specific
/// masking logic: the pipeline forwards `task_type` and `src_audio`
/// to the `ConditioningProvider` unexamined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Caption + lyrics → audio, no source conditioning.
    #[default]
    TextToMusic,
    /// Re-render an existing track with a new caption.
    Cover,
    /// Regenerate a time range of an existing track.
    Repaint,
    /// Extract a stem/segment from an existing track.
    Extract,
    /// Continue an existing track past its current end.
    Complete,
}

/// A reference to source audio for the source-conditioned task types.
/// Opaque to the core: only the `ConditioningProvider` interprets it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceAudioRef {
    /// Caller-defined locator (file path, URI, in-memory handle id).
    pub uri: String,
}

/// Parameters for one generation run. Constructed by the caller and
/// immutable for the duration of the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationParams {
    /// Free-text description of the desired music.
    pub caption: String,
    /// Lyrics to condition on (empty for instrumental).
    pub lyrics: String,
    /// Target duration in seconds. Values outside `[10, 600]` are
    /// treated as "unset" by the pipeline rather
    /// than rejected outright — only `duration > 0` values are bound
    /// by the invariant.
    pub duration: f32,
    /// Optional declared tempo. When present must satisfy
    /// `30 <= bpm <= 300`.
    pub bpm: Option<f32>,
    /// Number of diffusion steps. `0` means "use the fixed 8-step
    /// table for `shift`".
    pub inference_steps: u32,
    /// Explicit timestep schedule overriding `inference_steps`.
    pub timesteps: Option<Vec<f32>>,
    /// Random seed. Negative means "non-deterministic".
    pub seed: i64,
    /// Flow-matching shift parameter.
    pub shift: f32,
    /// Classifier-free guidance scale. Must be `>= 1.0`.
    pub guidance_scale: f32,
    /// CFG is only applied while `cfg_interval_start <= t <= cfg_interval_end`.
    pub cfg_interval_start: f32,
    pub cfg_interval_end: f32,
    /// Post-loop latent affine correction.
    pub latent_shift: f32,
    pub latent_rescale: f32,
    /// Task hook.
    pub task_type: TaskType,
    pub src_audio: Option<SourceAudioRef>,
    /// Repaint window in `[0, 1]` of the track, meaningful only when
    /// `task_type == Repaint`.
    pub repaint_start: f32,
    pub repaint_end: f32,
    /// Opaque knobs forwarded to the (out-of-scope) formatting LLM
    /// collaborator; the core never reads these.
    pub lm_temperature: f32,
    pub lm_top_p: f32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            caption: String::new(),
            lyrics: String::new(),
            duration: 30.0,
            bpm: None,
            inference_steps: 8,
            timesteps: None,
            seed: -1,
            shift: 3.0,
            guidance_scale: 1.0,
            cfg_interval_start: 0.0,
            cfg_interval_end: 1.0,
            latent_shift: 0.0,
            latent_rescale: 1.0,
            task_type: TaskType::TextToMusic,
            src_audio: None,
            repaint_start: 0.0,
            repaint_end: 1.0,
            lm_temperature: 1.0,
            lm_top_p: 1.0,
        }
    }
}

impl GenerationParams {
    /// Validates the invariants `GenerationParams` must satisfy.
    /// Returns the first violated invariant as a human-readable string.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if let Some(bpm) = self.bpm {
            if !(30.0..=300.0).contains(&bpm) {
                return Err(format!("bpm {bpm} outside [30, 300]"));
            }
        }
        if self.duration > 0.0 && !(10.0..=600.0).contains(&self.duration) {
            return Err(format!("duration {} outside [10, 600]", self.duration));
        }
        if self.guidance_scale < 1.0 {
            return Err(format!("guidance_scale {} below 1.0", self.guidance_scale));
        }
        if !(0.0..=1.0).contains(&self.cfg_interval_start)
            || !(0.0..=1.0).contains(&self.cfg_interval_end)
            || self.cfg_interval_start > self.cfg_interval_end
        {
            return Err(format!(
                "cfg interval [{}, {}] must satisfy 0 <= start <= end <= 1",
                self.cfg_interval_start, self.cfg_interval_end
            ));
        }
        Ok(())
    }

    /// Whether classifier-free guidance should be applied at timestep `t`.
    pub fn cfg_active_at(&self, t: f32) -> bool {
        self.guidance_scale > 1.0 && t >= self.cfg_interval_start && t <= self.cfg_interval_end
    }
}

/// Output audio container format requested by the caller. The core
/// does not encode audio; this
/// only annotates the result payload's channel count expectation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AudioFormat {
    #[default]
    Stereo,
    Mono,
}

/// Caller-owned, run-scoped configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Number of samples to produce in one batched run. Must be `>= 1`.
    pub batch_size: usize,
    /// Per-batch-element seed override; when shorter than `batch_size`
    /// the last entry (or `GenerationParams::seed`, if empty) is reused.
    pub seeds: Vec<i64>,
    pub audio_format: AudioFormat,
    /// Output sample rate in Hz, used to convert `duration` into a
    /// latent length and echoed back on every
    /// audio entry.
    pub sample_rate: u32,
}

/// Default output sample rate, matching the checkpoint this engine
/// targets.
pub const DEFAULT_SAMPLE_RATE: u32 = 51200;

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            batch_size: 1,
            seeds: Vec::new(),
            audio_format: AudioFormat::Stereo,
            sample_rate: DEFAULT_SAMPLE_RATE,
        }
    }
}

impl GenerationConfig {
    /// Validates `batch_size >= 1`.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.batch_size == 0 {
            return Err("batch_size must be >= 1".to_string());
        }
        Ok(())
    }

    /// Resolves the seed to use for batch element `index`, falling
    /// back to `default_seed` (typically `params.seed`) when no
    /// per-element override is present.
    pub fn seed_for(&self, index: usize, default_seed: i64) -> i64 {
        self.seeds.get(index).copied().unwrap_or(default_seed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_params_are_valid() {
        assert!(GenerationParams::default().validate().is_ok());
    }

    #[test]
    fn bpm_out_of_range_rejected() {
        let mut p = GenerationParams::default();
        p.bpm = Some(10.0);
        assert!(p.validate().is_err());
    }

    #[test]
    fn duration_out_of_range_rejected_when_positive() {
        let mut p = GenerationParams::default();
        p.duration = 5.0;
        assert!(p.validate().is_err());
        p.duration = -1.0;
        assert!(p.validate().is_ok(), "non-positive duration is treated as unset");
    }

    #[test]
    fn guidance_scale_below_one_rejected() {
        let mut p = GenerationParams::default();
        p.guidance_scale = 0.5;
        assert!(p.validate().is_err());
    }

    #[test]
    fn cfg_interval_must_be_ordered_and_bounded() {
        let mut p = GenerationParams::default();
        p.cfg_interval_start = 0.8;
        p.cfg_interval_end = 0.2;
        assert!(p.validate().is_err());
    }

    #[test]
    fn cfg_active_respects_interval_and_scale() {
        let mut p = GenerationParams::default();
        p.guidance_scale = 1.0;
        assert!(!p.cfg_active_at(0.5), "scale 1.0 disables CFG");
        p.guidance_scale = 4.0;
        p.cfg_interval_start = 0.2;
        p.cfg_interval_end = 0.8;
        assert!(p.cfg_active_at(0.5));
        assert!(!p.cfg_active_at(0.1));
        assert!(!p.cfg_active_at(0.9));
    }

    #[test]
    fn batch_size_zero_rejected() {
        let mut c = GenerationConfig::default();
        c.batch_size = 0;
        assert!(c.validate().is_err());
    }

    #[test]
    fn seed_for_falls_back_to_default() {
        let c = GenerationConfig::default();
        assert_eq!(c.seed_for(0, 42), 42);
    }
}
