//! Nested parameter tree over a normalized flat key→tensor map.
//!
//! The flat map is what actually drives `VarBuilder` lookups (dotted
//! keys already address the same tree `VarBuilder::pp` descends), so
//! this structure exists for validation: detecting unknown keys and
//! inspecting the checkpoint's shape before building the model.

use std::collections::HashMap;

use candle_core::Tensor;

/// A node in the conceptual nested parameter tree: either a leaf
/// tensor or a named set of children.
#[derive(Debug)]
pub enum ParamNode {
    Leaf(Tensor),
    Branch(HashMap<String, ParamNode>),
}

impl ParamNode {
    /// Unflattens a normalized `{dotted.key → tensor}` map into a tree.
    pub fn from_flat(flat: &HashMap<String, Tensor>) -> Self {
        let mut root = HashMap::new();
        for (key, tensor) in flat {
            insert(&mut root, key.split('.').collect::<Vec<_>>().as_slice(), tensor.clone());
        }
        ParamNode::Branch(root)
    }

    /// Looks up a dotted path within the tree.
    pub fn get(&self, path: &str) -> Option<&Tensor> {
        let mut node = self;
        for segment in path.split('.') {
            match node {
                ParamNode::Branch(children) => node = children.get(segment)?,
                ParamNode::Leaf(_) => return None,
            }
        }
        match node {
            ParamNode::Leaf(t) => Some(t),
            ParamNode::Branch(_) => None,
        }
    }

    /// All dotted leaf paths, for diagnosing "unknown key after
    /// normalization".
    pub fn leaf_paths(&self) -> Vec<String> {
        let mut out = Vec::new();
        collect_paths(self, String::new(), &mut out);
        out
    }
}

fn insert(branch: &mut HashMap<String, ParamNode>, segments: &[&str], tensor: Tensor) {
    let Some((head, rest)) = segments.split_first() else { return };
    if rest.is_empty() {
        branch.insert((*head).to_string(), ParamNode::Leaf(tensor));
        return;
    }
    let child = branch
        .entry((*head).to_string())
        .or_insert_with(|| ParamNode::Branch(HashMap::new()));
    if let ParamNode::Branch(children) = child {
        insert(children, rest, tensor);
    }
}

fn collect_paths(node: &ParamNode, prefix: String, out: &mut Vec<String>) {
    match node {
        ParamNode::Leaf(_) => out.push(prefix),
        ParamNode::Branch(children) => {
            for (name, child) in children {
                let next = if prefix.is_empty() { name.clone() } else { format!("{prefix}.{name}") };
                collect_paths(child, next, out);
            }
        }
    }
}
