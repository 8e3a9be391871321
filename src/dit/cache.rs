//! Per-run, per-layer cross-attention KV cache.
//!
//! Owned by the caller of the decoder (the stepper), not by any
//! individual layer, so its lifetime is explicitly tied to one run and
//! never aliases across concurrent runs.

use candle_core::Tensor;

/// Cached `(K, V)` for one layer's cross-attention.
#[derive(Debug, Clone)]
pub struct Entry {
    k: Tensor,
    v: Tensor,
}

/// KV cache across all DiT layers for one run. Disabled (never
/// populated or read) under CFG, since the doubled batch breaks the
/// 1:1 correspondence between cached keys and the current encoder
/// input.
#[derive(Debug, Clone, Default)]
pub struct CrossAttentionCache {
    entries: Vec<Option<Entry>>,
    enabled: bool,
}

impl CrossAttentionCache {
    /// Creates a cache sized for `num_layers`, enabled or disabled.
    pub fn new(num_layers: usize, enabled: bool) -> Self {
        Self {
            entries: vec![None; num_layers],
            enabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Number of layers this cache is sized for.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the cached `(K, V)` for `layer`, if present.
    pub fn get(&self, layer: usize) -> Option<(&Tensor, &Tensor)> {
        if !self.enabled {
            return None;
        }
        self.entries.get(layer)?.as_ref().map(|e| (&e.k, &e.v))
    }

    /// Stores `(K, V)` for `layer`. A no-op when the cache is disabled.
    pub fn set(&mut self, layer: usize, k: Tensor, v: Tensor) {
        if !self.enabled {
            return;
        }
        if let Some(slot) = self.entries.get_mut(layer) {
            *slot = Some(Entry { k, v });
        }
    }

    /// Drops all cached entries, forcing recomputation on next use
    /// (invoked when the encoder input changes between runs).
    pub fn invalidate(&mut self) {
        for slot in &mut self.entries {
            *slot = None;
        }
    }
}
