//! Three independently-testable, pure key/layout transforms applied in
//! a fixed order during checkpoint ingestion.

use candle_core::{Result, Tensor};

/// Named roots whose immediately-following numeric path segment is a
/// `Sequential[Identity, Layer, Identity]` wrapper index rather than a
/// meaningful layer-list index, e.g. `proj_in.1.weight` → `proj_in.weight`.
const SEQUENTIAL_WRAPPER_ROOTS: &[&str] = &["proj_in", "proj_out"];

/// Drops wrapper-sequential index segments.
pub fn strip_wrapper_sequential(key: &str) -> String {
    let parts: Vec<&str> = key.split('.').collect();
    let mut out = Vec::with_capacity(parts.len());
    let mut i = 0;
    while i < parts.len() {
        out.push(parts[i]);
        let next_is_wrapper_index = SEQUENTIAL_WRAPPER_ROOTS.contains(&parts[i])
            && parts.get(i + 1).is_some_and(|s| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()));
        if next_is_wrapper_index {
            i += 2;
        } else {
            i += 1;
        }
    }
    out.join(".")
}

/// Source-checkpoint segment name → this implementation's module-tree
/// segment name.
const SEGMENT_RENAMES: &[(&str, &str)] = &[
    ("attn1", "self_attn"),
    ("attn2", "cross_attn"),
    ("to_q", "q_proj"),
    ("to_k", "k_proj"),
    ("to_v", "v_proj"),
    ("to_out", "out_proj"),
    ("ff", "mlp"),
    ("norm_q", "q_norm"),
    ("norm_k", "k_norm"),
    ("timestep_embedder", "t_head"),
    ("timestep_r_embedder", "r_head"),
    ("condition_proj", "condition_embedder"),
    ("proj_in", "patch_in"),
    ("proj_out", "patch_out"),
];

/// Converts every path segment to the target identifier style.
pub fn convert_naming(key: &str) -> String {
    key.split('.')
        .map(|segment| {
            SEGMENT_RENAMES
                .iter()
                .find(|(from, _)| *from == segment)
                .map_or(segment, |(_, to)| to)
        })
        .collect::<Vec<_>>()
        .join(".")
}

/// Path suffixes identifying transposed-conv weights, whose source
/// layout is `[in, out, kernel]` rather than `[out, in, kernel]`.
const TRANSPOSED_CONV_SUFFIXES: &[&str] = &["patch_out.weight", "upsample.weight"];

/// Converts a weight tensor's physical layout from the source
/// convention to the runtime's channels-last-friendly convention
/// (`[out, in, k]` → `[out, k, in]`, or `[in, out, k]` → `[out, k, in]`
/// for transposed convs). Leaves biases, 1-D tensors, and 2-D linear
/// weights (`[out, in]`, already runtime-compatible) unchanged.
pub fn convert_layout(key: &str, tensor: Tensor) -> Result<Tensor> {
    if key.ends_with(".bias") || tensor.rank() != 3 {
        return Ok(tensor);
    }
    if TRANSPOSED_CONV_SUFFIXES.iter().any(|suffix| key.ends_with(suffix)) {
        tensor.permute((1, 2, 0))
    } else {
        tensor.permute((0, 2, 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    #[test]
    fn strips_sequential_wrapper_index() {
        assert_eq!(strip_wrapper_sequential("proj_in.1.weight"), "proj_in.weight");
        assert_eq!(strip_wrapper_sequential("proj_out.1.bias"), "proj_out.bias");
    }

    #[test]
    fn leaves_layer_list_indices_untouched() {
        assert_eq!(strip_wrapper_sequential("layer.3.self_attn.q_proj.weight"), "layer.3.self_attn.q_proj.weight");
    }

    #[test]
    fn renames_known_segments() {
        assert_eq!(convert_naming("layer.0.attn1.to_q.weight"), "layer.0.self_attn.q_proj.weight");
        assert_eq!(convert_naming("layer.0.attn2.to_out.bias"), "layer.0.cross_attn.out_proj.bias");
    }

    #[test]
    fn renames_patch_in_and_patch_out_roots() {
        assert_eq!(convert_naming("proj_in.weight"), "patch_in.weight");
        assert_eq!(convert_naming("proj_out.weight"), "patch_out.weight");
    }

    #[test]
    fn wrapper_strip_then_rename_resolves_patch_in_weight() {
        let normalized = convert_naming(&strip_wrapper_sequential("proj_in.1.weight"));
        assert_eq!(normalized, "patch_in.weight");
    }

    #[test]
    fn unknown_segments_pass_through() {
        assert_eq!(convert_naming("vae.decoder.stage1.weight"), "vae.decoder.stage1.weight");
    }

    #[test]
    fn regular_conv_layout_permutes_out_in_kernel_to_out_kernel_in() {
        let dev = Device::Cpu;
        let t = Tensor::zeros((4, 3, 7), DType::F32, &dev).unwrap();
        let out = convert_layout("vae.decoder.stage1.weight", t).unwrap();
        assert_eq!(out.dims(), &[4, 7, 3]);
    }

    #[test]
    fn transposed_conv_layout_permutes_in_out_kernel_to_out_kernel_in() {
        let dev = Device::Cpu;
        let t = Tensor::zeros((3, 4, 7), DType::F32, &dev).unwrap();
        let out = convert_layout("patch_out.weight", t).unwrap();
        assert_eq!(out.dims(), &[4, 7, 3]);
    }

    #[test]
    fn biases_and_linear_weights_are_unchanged() {
        let dev = Device::Cpu;
        let bias = Tensor::zeros(4, DType::F32, &dev).unwrap();
        assert_eq!(convert_layout("layer.0.mlp.gate.bias", bias).unwrap().dims(), &[4]);
        let linear = Tensor::zeros((8, 4), DType::F32, &dev).unwrap();
        assert_eq!(convert_layout("layer.0.mlp.gate.weight", linear).unwrap().dims(), &[8, 4]);
    }
}
