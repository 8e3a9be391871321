//! Tensor primitives shared by the VAE and DiT implementations.
//!
//! Activations flow through this crate channels-last (`[B, L, C]`);
//! `candle_nn`'s `Conv1d`/`ConvTranspose1d` are channels-first, so the
//! wrappers in [`ops`] transpose around the underlying kernel call
//! rather than changing the crate-wide layout convention.

pub mod mask;
pub mod ops;
pub mod rope;
pub mod timestep;
