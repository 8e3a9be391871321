//! Diffusion transformer: attention, SwiGLU MLP, AdaLN-modulated
//! layers, and the full decoder.

pub mod attention;
pub mod cache;
pub mod decoder;
pub mod embeddings;
pub mod layer;
pub mod mlp;

pub use cache::CrossAttentionCache;
pub use decoder::{DitDecoder, DitDecoderConfig};
