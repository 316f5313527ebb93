//! Safetensors checkpoint reading and writing

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt};
use safetensors::tensor::TensorView;
use safetensors::{Dtype, SafeTensors};
use weightport_core::{DType, Tensor};

use crate::error::{ModelError, Result};
use crate::formats::{FrameworkTag, FORMAT_METADATA_KEY};

/// Upper bound on a safetensors JSON header
const MAX_HEADER_LEN: u64 = 100 * 1024 * 1024;

/// Decoded safetensors file
#[derive(Debug, Clone)]
pub struct SafeCheckpoint {
    /// Layout declared by the header `format` tag
    pub framework: FrameworkTag,
    /// Tensors sorted by name
    pub tensors: Vec<(String, Tensor)>,
}

fn to_safetensors_dtype(dtype: DType) -> Dtype {
    match dtype {
        DType::F32 => Dtype::F32,
        DType::F16 => Dtype::F16,
        DType::BF16 => Dtype::BF16,
    }
}

fn from_safetensors_dtype(dtype: Dtype) -> Result<DType> {
    match dtype {
        Dtype::F32 => Ok(DType::F32),
        Dtype::F16 => Ok(DType::F16),
        Dtype::BF16 => Ok(DType::BF16),
        other => Err(ModelError::UnsupportedDtype(format!(
            "{other:?} (expected f32, f16 or bf16)"
        ))),
    }
}

/// Serialize tensors with a `format` header tag
pub fn encode<S: AsRef<str>>(
    entries: &[(S, &Tensor)],
    framework: &FrameworkTag,
) -> Result<Vec<u8>> {
    let raw: Vec<(String, Vec<usize>, DType, Vec<u8>)> = entries
        .iter()
        .map(|(name, tensor)| {
            (
                name.as_ref().to_string(),
                tensor.shape().to_vec(),
                tensor.dtype(),
                tensor.to_le_bytes(),
            )
        })
        .collect();

    let mut views = Vec::with_capacity(raw.len());
    for (name, shape, dtype, bytes) in &raw {
        let view = TensorView::new(to_safetensors_dtype(*dtype), shape.clone(), bytes)?;
        views.push((name.clone(), view));
    }

    let metadata = HashMap::from([(
        FORMAT_METADATA_KEY.to_string(),
        framework.as_str().to_string(),
    )]);
    Ok(safetensors::serialize(views, &Some(metadata))?)
}

/// Write tensors to `path`, returning the file size
pub fn write_file<S: AsRef<str>>(
    path: &Path,
    entries: &[(S, &Tensor)],
    framework: &FrameworkTag,
) -> Result<u64> {
    let bytes = encode(entries, framework)?;
    fs::write(path, &bytes)?;
    Ok(bytes.len() as u64)
}

/// Decode a complete safetensors image
pub fn decode(bytes: &[u8]) -> Result<SafeCheckpoint> {
    let (_, metadata) = SafeTensors::read_metadata(bytes)?;
    let tag = metadata
        .metadata()
        .as_ref()
        .and_then(|m| m.get(FORMAT_METADATA_KEY))
        .map(String::as_str);
    let framework = FrameworkTag::from_metadata(tag);

    let st = SafeTensors::deserialize(bytes)?;
    let mut tensors = Vec::new();
    for (name, view) in st.tensors() {
        let dtype = from_safetensors_dtype(view.dtype())
            .map_err(|e| ModelError::UnsupportedDtype(format!("{name}: {e}")))?;
        let tensor = Tensor::from_le_bytes(view.shape().to_vec(), dtype, view.data())
            .map_err(|e| ModelError::InvalidFormat(format!("{name}: {e}")))?;
        tensors.push((name, tensor));
    }
    tensors.sort_by(|a, b| a.0.cmp(&b.0));

    Ok(SafeCheckpoint { framework, tensors })
}

/// Read and decode a safetensors file
pub fn read_file(path: &Path) -> Result<SafeCheckpoint> {
    let bytes = fs::read(path)?;
    decode(&bytes).map_err(|e| match e {
        ModelError::Safetensors(msg) => {
            ModelError::Safetensors(format!("{}: {msg}", path.display()))
        }
        other => other,
    })
}

/// Read only the header of a safetensors file and return its framework tag
pub fn read_framework_tag(path: &Path) -> Result<FrameworkTag> {
    let mut reader = BufReader::new(File::open(path)?);
    let header_len = reader
        .read_u64::<LittleEndian>()
        .map_err(|_| ModelError::InvalidFormat(format!("{}: missing header", path.display())))?;
    if header_len > MAX_HEADER_LEN {
        return Err(ModelError::InvalidFormat(format!(
            "{}: header length {header_len} exceeds limit",
            path.display()
        )));
    }

    let mut header = vec![0u8; header_len as usize];
    reader
        .read_exact(&mut header)
        .map_err(|_| ModelError::InvalidFormat(format!("{}: truncated header", path.display())))?;
    let header: serde_json::Value = serde_json::from_slice(&header)
        .map_err(|e| ModelError::InvalidFormat(format!("{}: {e}", path.display())))?;

    let tag = header
        .get("__metadata__")
        .and_then(|m| m.get(FORMAT_METADATA_KEY))
        .and_then(|v| v.as_str());
    Ok(FrameworkTag::from_metadata(tag))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<(String, Tensor)> {
        vec![
            (
                "pooler.dense.bias".to_string(),
                Tensor::new(vec![2], vec![0.25, -0.75]).unwrap(),
            ),
            (
                "pooler.dense.kernel".to_string(),
                Tensor::new(vec![2, 2], vec![1.0, 2.0, 3.0, 4.0])
                    .unwrap()
                    .with_dtype(DType::F16),
            ),
        ]
    }

    #[test]
    fn test_roundtrip_keeps_tag_and_dtype() {
        let entries = sample();
        let refs: Vec<(&str, &Tensor)> = entries.iter().map(|(n, t)| (n.as_str(), t)).collect();
        let bytes = encode(&refs, &FrameworkTag::Torch).unwrap();
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.framework, FrameworkTag::Torch);
        assert_eq!(decoded.tensors, entries);
        assert_eq!(decoded.tensors[1].1.dtype(), DType::F16);
    }

    #[test]
    fn test_header_only_tag() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.safetensors");
        let entries = sample();
        let refs: Vec<(&str, &Tensor)> = entries.iter().map(|(n, t)| (n.as_str(), t)).collect();
        write_file(&path, &refs, &FrameworkTag::Native).unwrap();
        assert_eq!(read_framework_tag(&path).unwrap(), FrameworkTag::Native);

        write_file(&path, &refs, &FrameworkTag::Other("tf".into())).unwrap();
        assert_eq!(
            read_framework_tag(&path).unwrap(),
            FrameworkTag::Other("tf".into())
        );
    }

    #[test]
    fn test_garbage_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.safetensors");
        fs::write(&path, b"not a safetensors file").unwrap();
        assert!(read_file(&path).is_err());
        assert!(matches!(
            read_framework_tag(&path),
            Err(ModelError::InvalidFormat(_))
        ));
    }
}
