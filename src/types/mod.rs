//! Request/response and conditioning types shared across the engine.

pub mod audio;
pub mod conditions;
pub mod params;

pub use audio::{DecodedAudio, GenerationStatus};
pub use conditions::DiTConditions;
pub use params::{AudioFormat, GenerationConfig, GenerationParams, SourceAudioRef, TaskType};
