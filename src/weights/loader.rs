//! Checkpoint ingestion: source → normalized flat map → `VarBuilder`.

use std::collections::HashMap;

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use tracing::{debug, warn};

use crate::error::Result;
use crate::weights::keys::{convert_layout, convert_naming, strip_wrapper_sequential};

/// A checkpoint makes no assumption beyond enumerating `(key, tensor)`
/// pairs and supporting point lookups.
pub trait CheckpointSource {
    fn entries(&self) -> Vec<(String, Tensor)>;
    fn get(&self, key: &str) -> Option<Tensor>;
}

fn normalize_key(raw: &str) -> String {
    convert_naming(&strip_wrapper_sequential(raw))
}

/// Applies the full three-step key normalization plus layout
/// conversion to every entry in `source`, returning the normalized
/// flat map.
pub fn normalize(source: &dyn CheckpointSource) -> Result<HashMap<String, Tensor>> {
    let mut out = HashMap::new();
    for (raw_key, tensor) in source.entries() {
        let key = normalize_key(&raw_key);
        let tensor = convert_layout(&key, tensor)?;
        out.insert(key, tensor);
    }
    debug!(entries = out.len(), "normalized checkpoint keys");
    Ok(out)
}

/// If any normalized key starts with `decoder.`, returns only that
/// sub-tree with the prefix stripped; otherwise returns `flat`
/// unchanged.
pub fn strip_decoder_prefix(flat: HashMap<String, Tensor>) -> HashMap<String, Tensor> {
    subtree(flat, "decoder.")
}

/// Returns the sub-tree of `flat` whose keys start with `prefix`, with
/// the prefix stripped; keys outside the sub-tree are dropped. Returns
/// `flat` unchanged if no key carries `prefix`, so callers can use it
/// on checkpoints that are already flat.
pub fn subtree(flat: HashMap<String, Tensor>, prefix: &str) -> HashMap<String, Tensor> {
    if !flat.keys().any(|k| k.starts_with(prefix)) {
        return flat;
    }
    flat.into_iter()
        .filter_map(|(k, v)| k.strip_prefix(prefix).map(|stripped| (stripped.to_string(), v)))
        .collect()
}

/// Finds the learned null-condition embedding used by CFG, matched by
/// name containing `null_condition_emb`.
pub fn find_null_condition_embedding(flat: &HashMap<String, Tensor>) -> Option<Tensor> {
    let found = flat.iter().find(|(k, _)| k.contains("null_condition_emb")).map(|(_, v)| v.clone());
    if found.is_none() {
        warn!("checkpoint has no null-condition embedding; classifier-free guidance will be unavailable");
    }
    found
}

/// Finds the silence latent `[1, T_max, 64]` used as the context
/// source for pure text-to-music runs.
pub fn find_silence_latent(source: &dyn CheckpointSource) -> Option<Tensor> {
    source.get("latent")
}

/// Builds a `VarBuilder` over a normalized flat map. The dotted keys
/// already address the same nested tree `VarBuilder::pp` descends, so
/// no separate "apply to model" step is needed beyond this.
pub fn build_var_builder(flat: HashMap<String, Tensor>, dtype: DType, device: &Device) -> VarBuilder<'static> {
    VarBuilder::from_tensors(flat, dtype, device)
}

/// Loads a decoder-only checkpoint end to end: normalize, strip the
/// `decoder.` prefix if present, build the `VarBuilder`.
pub fn load_decoder_var_builder(
    source: &dyn CheckpointSource,
    dtype: DType,
    device: &Device,
) -> Result<VarBuilder<'static>> {
    let flat = normalize(source)?;
    let flat = strip_decoder_prefix(flat);
    Ok(build_var_builder(flat, dtype, device))
}
