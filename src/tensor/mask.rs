//! Sliding-window self-attention mask and the encoder padding mask.

use std::collections::HashMap;
use std::sync::Mutex;

use candle_core::{DType, Device, Result, Tensor};

/// Builds a bidirectional sliding-window additive mask `[1, 1, L, L]`:
/// `0` where `|i - j| <= window`, `-inf` otherwise.
pub fn sliding_window_mask(len: usize, window: usize, device: &Device) -> Result<Tensor> {
    let mut data = vec![0f32; len * len];
    for i in 0..len {
        for j in 0..len {
            let dist = i.abs_diff(j);
            if dist > window {
                data[i * len + j] = f32::NEG_INFINITY;
            }
        }
    }
    Tensor::from_vec(data, (1, 1, len, len), device)?.to_dtype(DType::F32)
}

/// Expands a `[B, encL]` padding mask (1 = valid, 0 = pad) into an
/// additive `[B, 1, 1, encL]` mask usable against cross-attention
/// scores `[B, H, Lq, encL]`.
pub fn encoder_padding_mask(mask: &Tensor) -> Result<Tensor> {
    let (b, enc_l) = mask.dims2()?;
    let inverted = (mask.to_dtype(DType::F32)? * -1f64)? + 1f64;
    let additive = (inverted? * f64::from(f32::MIN))?;
    additive.reshape((b, 1, 1, enc_l))
}

/// Write-once per-length cache for sliding-window masks, owned by a
/// DiT decoder instance and shared across steps of one run.
/// Concurrent writers at the same length always compute the same
/// value, so a plain mutex is sufficient — no generation/epoch
/// tracking is needed.
#[derive(Debug, Default)]
pub struct SlidingMaskMemo {
    cache: Mutex<HashMap<usize, Tensor>>,
}

impl SlidingMaskMemo {
    pub fn new() -> Self {
        Self {
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the cached mask for `len`, computing and storing it on
    /// first use.
    pub fn get_or_build(&self, len: usize, window: usize, device: &Device) -> Result<Tensor> {
        let mut cache = self.cache.lock().expect("sliding mask memo poisoned");
        if let Some(mask) = cache.get(&len) {
            return Ok(mask.clone());
        }
        let mask = sliding_window_mask(len, window, device)?;
        cache.insert(len, mask.clone());
        Ok(mask)
    }
}
