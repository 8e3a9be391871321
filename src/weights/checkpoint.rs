//! Wires a loaded checkpoint into ready-to-run `DitDecoder` and
//! `VaeDecoder` instances, plus the two auxiliary tensors (the
//! null-condition embedding and the silence latent) the pipeline needs
//! for classifier-free guidance and pure text-to-music conditioning.

use candle_core::Tensor;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::dit::{DitDecoder, DitDecoderConfig};
use crate::error::Result;
use crate::vae::{VaeDecoder, VaeDecoderConfig};
use crate::weights::loader::{build_var_builder, find_null_condition_embedding, normalize, subtree, CheckpointSource};
use crate::weights::safetensors_source::SafetensorsSource;

/// Everything `Engine` needs to run against a real checkpoint.
pub struct LoadedModels {
    pub dit: DitDecoder,
    pub vae: VaeDecoder,
    pub null_condition_embedding: Option<Tensor>,
    pub silence_latent: Option<Tensor>,
}

/// Loads `config.checkpoint_path`, splits it into the `dit.` and
/// `vae.` sub-trees, and constructs both decoders. Falls back to
/// `config.silence_latent_path` for the silence latent when the
/// checkpoint itself carries none.
pub fn load_models(config: &EngineConfig, dit_config: DitDecoderConfig, vae_config: VaeDecoderConfig) -> Result<LoadedModels> {
    let device = config.device.to_candle()?;
    let source = SafetensorsSource::load(&config.checkpoint_path, &device)?;
    let flat = normalize(&source)?;

    let null_condition_embedding = find_null_condition_embedding(&flat);

    let dit_flat = subtree(flat.clone(), "dit.");
    let dit_vb = build_var_builder(dit_flat, config.dtype, &device);
    let dit = DitDecoder::new(dit_config, dit_vb)?;

    let vae_flat = subtree(flat, "vae.");
    let vae_vb = build_var_builder(vae_flat, config.dtype, &device);
    let vae = VaeDecoder::new(vae_config, vae_vb)?;

    let silence_latent = match &config.silence_latent_path {
        Some(path) => {
            let aux = SafetensorsSource::load(path, &device)?;
            let latent = aux.get("latent");
            if latent.is_none() {
                warn!(path = %path.display(), "silence latent file has no `latent` tensor");
            }
            latent
        }
        None => source.get("latent"),
    };

    info!(
        has_null_embedding = null_condition_embedding.is_some(),
        has_silence_latent = silence_latent.is_some(),
        "checkpoint wired into DiT and VAE decoders"
    );

    Ok(LoadedModels {
        dit,
        vae,
        null_condition_embedding,
        silence_latent,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::weights::loader::strip_decoder_prefix;
    use candle_core::{DType, Device};
    use std::collections::HashMap;

    #[test]
    fn subtree_split_isolates_dit_and_vae_keys() {
        let device = Device::Cpu;
        let mut flat = HashMap::new();
        flat.insert("dit.patch_in.weight".to_string(), Tensor::zeros(1, DType::F32, &device).unwrap());
        flat.insert("vae.stage1.weight".to_string(), Tensor::zeros(1, DType::F32, &device).unwrap());

        let dit_only = subtree(flat.clone(), "dit.");
        assert_eq!(dit_only.len(), 1);
        assert!(dit_only.contains_key("patch_in.weight"));

        let vae_only = subtree(flat, "vae.");
        assert_eq!(vae_only.len(), 1);
        assert!(vae_only.contains_key("stage1.weight"));
    }

    #[test]
    fn strip_decoder_prefix_is_subtree_under_the_hood() {
        let device = Device::Cpu;
        let mut flat = HashMap::new();
        flat.insert("decoder.layer.weight".to_string(), Tensor::zeros(1, DType::F32, &device).unwrap());
        let stripped = strip_decoder_prefix(flat);
        assert!(stripped.contains_key("layer.weight"));
    }
}
