//! dit-forge: a local, on-device inference engine for a text-conditioned
//! music generation model — a Diffusion Transformer (DiT) decoder
//! coupled to an Oobleck-family VAE decoder.
//!
//! One end-to-end operation: caption + lyrics → audio samples. No
//! remote inference, no training, no fine-tuning.
//!
//! # Modules
//!
//! - [`config`] - engine configuration (device, dtype, checkpoint paths)
//! - [`error`] - error taxonomy and the crate-wide `Result` alias
//! - [`types`] - request/response domain types
//! - [`tensor`] - shared tensor primitives (attention, RoPE, masks, embeddings)
//! - [`vae`] - the Oobleck-family VAE decoder
//! - [`dit`] - the Diffusion Transformer decoder
//! - [`diffusion`] - schedule construction, APG guidance, the ODE stepper
//! - [`weights`] - checkpoint ingestion and key/layout normalization
//! - [`conditioning`] - the `ConditioningProvider` collaborator contract
//! - [`latent`] - latent length calculation and seeded initialization
//! - [`progress`] - diffusion-step progress tracking
//! - [`pipeline`] - the top-level `Engine::run` orchestration

pub mod conditioning;
pub mod config;
pub mod diffusion;
pub mod dit;
pub mod error;
pub mod latent;
pub mod pipeline;
pub mod progress;
pub mod tensor;
pub mod types;
pub mod vae;
pub mod weights;

pub use config::{DeviceKind, EngineConfig};
pub use error::{EngineError, Result};
pub use pipeline::Engine;
pub use types::{AudioFormat, DecodedAudio, DiTConditions, GenerationConfig, GenerationParams, GenerationStatus};
