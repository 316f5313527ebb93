//! Cross-framework parameter conversion
//!
//! Torch stores dense weights as `[out, in]` named `weight`; the native layout
//! stores them as `[in, out]` named `kernel`. Norm and embedding parameters
//! keep their values but change leaf names.

use weightport_core::{ParamTree, Tensor, PATH_SEPARATOR};

use crate::error::{ModelError, Result};
use crate::formats::FrameworkTag;

/// Torch conv kernel `[out, in, h, w]` to native `[h, w, in, out]`
const CONV_TO_NATIVE: [usize; 4] = [2, 3, 1, 0];
/// Native conv kernel `[h, w, in, out]` to torch `[out, in, h, w]`
const CONV_TO_TORCH: [usize; 4] = [3, 2, 0, 1];

/// Converts tensors between a foreign framework's layout and the native one
pub trait FrameworkConverter {
    /// Tag of the foreign framework
    fn framework(&self) -> FrameworkTag;

    /// Foreign flat tensors into a native parameter tree
    fn to_native(&self, tensors: Vec<(String, Tensor)>) -> Result<ParamTree>;

    /// Native parameter tree into foreign flat tensors, sorted by name
    fn from_native(&self, tree: &ParamTree) -> Result<Vec<(String, Tensor)>>;
}

/// Converter for a foreign framework, if one exists
pub fn converter_for(
    framework: &FrameworkTag,
    base_model_prefix: Option<&str>,
) -> Result<Box<dyn FrameworkConverter>> {
    match framework {
        FrameworkTag::Torch => Ok(Box::new(TorchConverter::new(base_model_prefix))),
        FrameworkTag::Native => Err(ModelError::ConversionUnavailable(
            "native checkpoints need no conversion".to_string(),
        )),
        FrameworkTag::Other(tag) => Err(ModelError::ConversionUnavailable(format!(
            "no converter for framework {tag:?}"
        ))),
    }
}

/// Torch layout converter
#[derive(Debug, Clone, Default)]
pub struct TorchConverter {
    base_model_prefix: Option<String>,
}

impl TorchConverter {
    /// `base_model_prefix` (e.g. `bert`) is stripped from torch names on
    /// import when present. It is never added on export.
    pub fn new(base_model_prefix: Option<&str>) -> Self {
        Self {
            base_model_prefix: base_model_prefix
                .filter(|p| !p.is_empty())
                .map(String::from),
        }
    }

    fn strip_prefix<'a>(&self, name: &'a str) -> &'a str {
        match &self.base_model_prefix {
            Some(prefix) => name
                .strip_prefix(prefix.as_str())
                .and_then(|rest| rest.strip_prefix(PATH_SEPARATOR))
                .unwrap_or(name),
            None => name,
        }
    }
}

fn split_leaf(name: &str) -> (&str, &str) {
    match name.rsplit_once(PATH_SEPARATOR) {
        Some((parent, leaf)) => (parent, leaf),
        None => ("", name),
    }
}

fn join(parent: &str, leaf: &str) -> String {
    if parent.is_empty() {
        leaf.to_string()
    } else {
        format!("{parent}{PATH_SEPARATOR}{leaf}")
    }
}

fn last_segment(parent: &str) -> &str {
    parent.rsplit(PATH_SEPARATOR).next().unwrap_or(parent)
}

fn is_norm_module(parent: &str) -> bool {
    let module = last_segment(parent).to_ascii_lowercase();
    module.contains("layernorm")
        || module.contains("layer_norm")
        || module.contains("norm")
        || module == "ln"
        || module.starts_with("ln_")
}

fn is_embedding_module(parent: &str) -> bool {
    let module = last_segment(parent);
    module.ends_with("embeddings")
        || module == "embed_tokens"
        || module == "wte"
        || module == "wpe"
}

fn torch_to_native(name: &str, tensor: Tensor) -> Result<(String, Tensor)> {
    let (parent, leaf) = split_leaf(name);

    if is_norm_module(parent) {
        let leaf = match leaf {
            "weight" | "gamma" => "scale",
            "beta" => "bias",
            other => other,
        };
        return Ok((join(parent, leaf), tensor));
    }

    if leaf != "weight" {
        return Ok((name.to_string(), tensor));
    }

    if is_embedding_module(parent) {
        return Ok((join(parent, "embedding"), tensor));
    }

    match tensor.rank() {
        2 => Ok((join(parent, "kernel"), tensor.transpose_2d()?)),
        4 => Ok((join(parent, "kernel"), tensor.permute(&CONV_TO_NATIVE)?)),
        1 => Ok((join(parent, "scale"), tensor)),
        _ => Ok((name.to_string(), tensor)),
    }
}

fn native_to_torch(name: &str, tensor: &Tensor) -> Result<(String, Tensor)> {
    let (parent, leaf) = split_leaf(name);
    match leaf {
        "kernel" => match tensor.rank() {
            2 => Ok((join(parent, "weight"), tensor.transpose_2d()?)),
            4 => Ok((join(parent, "weight"), tensor.permute(&CONV_TO_TORCH)?)),
            rank => Err(ModelError::ConversionUnavailable(format!(
                "{name}: no torch layout for rank-{rank} kernel"
            ))),
        },
        "scale" | "embedding" => Ok((join(parent, "weight"), tensor.clone())),
        _ => Ok((name.to_string(), tensor.clone())),
    }
}

impl FrameworkConverter for TorchConverter {
    fn framework(&self) -> FrameworkTag {
        FrameworkTag::Torch
    }

    fn to_native(&self, tensors: Vec<(String, Tensor)>) -> Result<ParamTree> {
        let mut tree = ParamTree::new();
        for (name, tensor) in tensors {
            let (native_name, tensor) = torch_to_native(self.strip_prefix(&name), tensor)?;
            tracing::trace!(from = %name, to = %native_name, "converted torch parameter");
            tree.insert(&native_name, tensor).map_err(|e| {
                ModelError::ConversionUnavailable(format!("{name} -> {native_name}: {e}"))
            })?;
        }
        Ok(tree)
    }

    fn from_native(&self, tree: &ParamTree) -> Result<Vec<(String, Tensor)>> {
        let mut out = Vec::with_capacity(tree.len());
        for (name, tensor) in tree.iter_flat() {
            out.push(native_to_torch(&name, tensor)?);
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weightport_core::{init_params, ModelConfig};

    fn t(shape: Vec<usize>) -> Tensor {
        let n = shape.iter().product::<usize>();
        Tensor::new(shape, (0..n).map(|i| i as f32).collect()).unwrap()
    }

    #[test]
    fn test_torch_names() {
        let converter = TorchConverter::new(Some("bert"));
        let tree = converter
            .to_native(vec![
                ("bert.embeddings.word_embeddings.weight".into(), t(vec![5, 2])),
                ("bert.embeddings.LayerNorm.gamma".into(), t(vec![2])),
                ("bert.embeddings.LayerNorm.beta".into(), t(vec![2])),
                ("bert.pooler.dense.weight".into(), t(vec![3, 2])),
                ("bert.pooler.dense.bias".into(), t(vec![3])),
                ("conv.weight".into(), t(vec![4, 3, 2, 2])),
            ])
            .unwrap();

        assert_eq!(
            tree.get("embeddings.word_embeddings.embedding").unwrap().shape(),
            &[5, 2]
        );
        assert!(tree.contains("embeddings.LayerNorm.scale"));
        assert!(tree.contains("embeddings.LayerNorm.bias"));
        assert_eq!(tree.get("pooler.dense.kernel").unwrap().shape(), &[2, 3]);
        assert!(tree.contains("pooler.dense.bias"));
        assert_eq!(tree.get("conv.kernel").unwrap().shape(), &[2, 2, 3, 4]);
    }

    #[test]
    fn test_transpose_values() {
        let converter = TorchConverter::new(None);
        let tree = converter
            .to_native(vec![("dense.weight".into(), t(vec![2, 3]))])
            .unwrap();
        // [[0,1,2],[3,4,5]] transposed
        assert_eq!(
            tree.get("dense.kernel").unwrap().data(),
            &[0.0, 3.0, 1.0, 4.0, 2.0, 5.0]
        );
    }

    #[test]
    fn test_export_then_import_is_identity() {
        let params = init_params(&ModelConfig::tiny(), 3).unwrap();
        let converter = TorchConverter::new(None);

        let torch = converter.from_native(&params).unwrap();
        assert!(torch.iter().any(|(n, _)| n == "pooler.dense.weight"));
        assert!(torch
            .iter()
            .any(|(n, _)| n == "embeddings.word_embeddings.weight"));
        assert!(torch.iter().all(|(n, _)| !n.ends_with("kernel")));

        let back = converter.to_native(torch).unwrap();
        assert!(back.approx_eq(&params, 0.0));
    }

    #[test]
    fn test_conv_roundtrip() {
        let converter = TorchConverter::new(None);
        let kernel = t(vec![3, 3, 2, 4]);
        let tree = ParamTree::from_flat([("conv.kernel", kernel.clone())]).unwrap();
        let torch = converter.from_native(&tree).unwrap();
        assert_eq!(torch[0].1.shape(), &[4, 2, 3, 3]);
        let back = converter.to_native(torch).unwrap();
        assert_eq!(back.get("conv.kernel").unwrap(), &kernel);
    }

    #[test]
    fn test_unknown_framework() {
        assert!(matches!(
            converter_for(&FrameworkTag::Other("tf".into()), None),
            Err(ModelError::ConversionUnavailable(_))
        ));
        assert!(converter_for(&FrameworkTag::Torch, None).is_ok());
    }
}
