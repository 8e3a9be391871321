//! Checkpoint ingestion: key normalization, layout conversion, and
//! `VarBuilder` construction.

pub mod checkpoint;
pub mod keys;
pub mod loader;
pub mod safetensors_source;
pub mod tree;

pub use checkpoint::{load_models, LoadedModels};
pub use loader::{
    build_var_builder, find_null_condition_embedding, find_silence_latent, load_decoder_var_builder, normalize,
    strip_decoder_prefix, subtree, CheckpointSource,
};
pub use safetensors_source::SafetensorsSource;
pub use tree::ParamNode;
