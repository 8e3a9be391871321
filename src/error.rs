//! Error types for the generation engine.
//!
//! `EngineError` enumerates every fatal condition the pipeline can hit
//!. All variants are terminal: a failing run is surfaced to
//! the caller as `GenerationStatus { success: false, .. }`, never a
//! panic, and nothing is retried internally. Shape checks happen at
//! construction boundaries (pipeline entry, pre-decode, post-decode)
//! so errors point at the first offending interface.

use thiserror::Error;

/// Taxonomy of fatal errors raised by the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The real DiT stepper was selected but the `ConditioningProvider`
    /// returned neither encoder hidden states nor context latents.
    #[error("missing conditioning: the DiT stepper requires encoder_hidden_states or context_latents")]
    MissingConditioning,

    /// A conditioning tensor's leading (batch) dimension is neither the
    /// target batch size nor 1 (broadcastable).
    #[error("condition batch mismatch: `{field}` has leading dim {got}, expected {expected} or 1")]
    ConditionBatchMismatch {
        field: &'static str,
        got: usize,
        expected: usize,
    },

    /// The latent handed to the VAE decoder is not rank-3 or its
    /// channel count is not 64.
    #[error("invalid latent shape: expected rank-3 [B, T, 64], got {shape:?}")]
    InvalidLatentShape { shape: Vec<usize> },

    /// The VAE decoder returned a tensor that is not rank-2 or rank-3.
    #[error("invalid decoded audio shape: expected rank-2 or rank-3, got {shape:?}")]
    InvalidDecodedAudioShape { shape: Vec<usize> },

    /// A checkpoint could not be read, had an unexpected tensor rank,
    /// or contained a key that did not normalize to anything in the
    /// target parameter tree.
    #[error("weight format error: {0}")]
    WeightFormat(String),

    /// The caller's collaborator type did not match what the engine
    /// expected (raised by callers integrating an LLM-side component,
    /// not by the core itself).
    #[error("unsupported model: {0}")]
    UnsupportedModel(String),

    /// The caller's cancellation hook returned `true` between steps.
    #[error("generation cancelled")]
    Cancelled,

    /// A tensor-runtime operation failed (shape mismatch inside a
    /// kernel, device error, dtype mismatch, etc).
    #[error(transparent)]
    Tensor(#[from] candle_core::Error),
}

/// Result type alias used throughout the engine.
pub type Result<T> = std::result::Result<T, EngineError>;
