//! Rotary position embedding for DiT self-attention.

use candle_core::{DType, Device, Result, Tensor};

/// Precomputed `(cos, sin)` rotation table, both `[L, d_h]`.
#[derive(Debug, Clone)]
pub struct RotaryTable {
    pub cos: Tensor,
    pub sin: Tensor,
}

impl RotaryTable {
    /// Builds a rotary table for sequence length `seq_len` and head
    /// dimension `head_dim` (must be even), with base frequency
    /// `theta` (10000.0 is the conventional default).
    pub fn new(seq_len: usize, head_dim: usize, theta: f64, device: &Device) -> Result<Self> {
        let half = head_dim / 2;
        let inv_freq: Vec<f32> = (0..half)
            .map(|i| 1f32 / (theta as f32).powf(2.0 * i as f32 / head_dim as f32))
            .collect();
        let inv_freq = Tensor::from_vec(inv_freq, half, device)?;
        let positions = Tensor::arange(0f32, seq_len as f32, device)?;
        // [L, half]
        let freqs = positions.unsqueeze(1)?.broadcast_mul(&inv_freq.unsqueeze(0)?)?;
        // Duplicate each half so the table spans the full head_dim,
        // matching the interleave-free "rotate_half" convention.
        let freqs = Tensor::cat(&[&freqs, &freqs], 1)?;
        Ok(Self {
            cos: freqs.cos()?.to_dtype(DType::F32)?,
            sin: freqs.sin()?.to_dtype(DType::F32)?,
        })
    }

    /// Returns the rows covering the first `len` positions. Used when
    /// a decoder call operates on a shorter sequence than the memoized
    /// table's maximum length.
    pub fn narrow_to(&self, len: usize) -> Result<Self> {
        Ok(Self {
            cos: self.cos.narrow(0, 0, len)?,
            sin: self.sin.narrow(0, 0, len)?,
        })
    }
}

fn rotate_half(x: &Tensor) -> Result<Tensor> {
    let last = x.dim(candle_core::D::Minus1)?;
    let half = last / 2;
    let x1 = x.narrow(candle_core::D::Minus1, 0, half)?;
    let x2 = x.narrow(candle_core::D::Minus1, half, last - half)?;
    Tensor::cat(&[&x2.neg()?, &x1], candle_core::D::Minus1)
}

/// Applies rotary position embedding to a `[B, H, L, d_h]` tensor
/// using a `[L, d_h]` `(cos, sin)` table.
pub fn apply_rotary(x: &Tensor, table: &RotaryTable) -> Result<Tensor> {
    let cos = table.cos.unsqueeze(0)?.unsqueeze(0)?;
    let sin = table.sin.unsqueeze(0)?.unsqueeze(0)?;
    x.broadcast_mul(&cos)?
        .broadcast_add(&rotate_half(x)?.broadcast_mul(&sin)?)
}
