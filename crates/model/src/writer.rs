//! Checkpoint writing: single files, sharded sets and their indices

use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};

use weightport_core::{DType, ParamTree, Tensor};

use crate::convert::{FrameworkConverter, TorchConverter};
use crate::error::{ModelError, Result};
use crate::formats::{ArtifactFormat, FrameworkTag};
use crate::native;
use crate::safe;
use crate::shard_index::{ShardChecksum, ShardIndex};

/// Parameter naming and axis layout of written tensors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TensorLayout {
    /// `kernel`/`scale`/`embedding` names, `[in, out]` dense kernels
    #[default]
    Native,
    /// Torch `weight` names and `[out, in]` dense weights (safetensors only)
    Torch,
}

#[derive(Debug, Clone, Default)]
pub struct SaveOptions {
    /// Write safetensors instead of the native format
    pub safe_serialization: bool,
    /// Shard when the total tensor bytes exceed this budget
    pub max_shard_size: Option<u64>,
    pub layout: TensorLayout,
    /// Store tensors at this precision instead of their own
    pub dtype: Option<DType>,
}

impl SaveOptions {
    pub fn safe() -> Self {
        Self {
            safe_serialization: true,
            ..Self::default()
        }
    }

    pub fn with_safe_serialization(mut self, safe: bool) -> Self {
        self.safe_serialization = safe;
        self
    }

    pub fn with_max_shard_size(mut self, bytes: u64) -> Self {
        self.max_shard_size = Some(bytes);
        self
    }

    /// Shard budget from a string such as `"10KB"` or `"2GiB"`
    pub fn with_max_shard_size_str(self, size: &str) -> Result<Self> {
        Ok(self.with_max_shard_size(parse_shard_size(size)?))
    }

    pub fn with_layout(mut self, layout: TensorLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_dtype(mut self, dtype: DType) -> Self {
        self.dtype = Some(dtype);
        self
    }

    pub fn format(&self) -> ArtifactFormat {
        if self.safe_serialization {
            ArtifactFormat::Safe
        } else {
            ArtifactFormat::Native
        }
    }
}

/// What a written file is within its checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardRole {
    Single,
    /// 1-based shard position
    Shard { index: usize, total: usize },
    Index,
}

/// One file produced by [`save`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenArtifact {
    pub path: PathBuf,
    pub format: ArtifactFormat,
    pub role: ShardRole,
    pub size_bytes: u64,
}

impl WrittenArtifact {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Parse a shard budget: a plain byte count, or a number with a decimal
/// (`KB`, `MB`, `GB`, `TB`) or binary (`KiB`, `MiB`, `GiB`, `TiB`) unit.
pub fn parse_shard_size(size: &str) -> Result<u64> {
    let invalid = || ModelError::InvalidShardSize(size.to_string());

    let trimmed = size.trim();
    let split = trimmed
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(split);
    let value: f64 = number.parse().map_err(|_| invalid())?;

    let multiplier: u64 = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 1,
        "kb" => 1_000,
        "mb" => 1_000_000,
        "gb" => 1_000_000_000,
        "tb" => 1_000_000_000_000,
        "kib" => 1 << 10,
        "mib" => 1 << 20,
        "gib" => 1 << 30,
        "tib" => 1 << 40,
        _ => return Err(invalid()),
    };

    let bytes = (value * multiplier as f64).floor();
    if !bytes.is_finite() || bytes < 1.0 || bytes > u64::MAX as f64 {
        return Err(invalid());
    }
    Ok(bytes as u64)
}

/// Split tensors (by byte size, in order) into consecutive shards.
///
/// A shard closes when the next tensor would push it past `budget`; a tensor
/// larger than `budget` on its own becomes a single-tensor shard.
pub fn plan_shards(sizes: &[u64], budget: u64) -> Vec<Range<usize>> {
    let mut shards = Vec::new();
    let mut start = 0;
    let mut current = 0u64;

    for (i, &size) in sizes.iter().enumerate() {
        if i > start && current + size > budget {
            shards.push(start..i);
            start = i;
            current = 0;
        }
        current += size;
    }
    if start < sizes.len() {
        shards.push(start..sizes.len());
    }
    shards
}

/// Remove every native and safetensors checkpoint file directly under `dir`
fn remove_stale_artifacts(dir: &Path) -> Result<usize> {
    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        let owned = ArtifactFormat::Native.owns_file_name(&name)
            || ArtifactFormat::Safe.owns_file_name(&name);
        if owned {
            fs::remove_file(entry.path())?;
            tracing::debug!(file = %name, "removed stale checkpoint file");
            removed += 1;
        }
    }
    Ok(removed)
}

fn layout_tensors(tree: &ParamTree, options: &SaveOptions) -> Result<Vec<(String, Tensor)>> {
    let tensors = match options.layout {
        TensorLayout::Native => tree
            .iter_flat()
            .into_iter()
            .map(|(name, tensor)| (name, tensor.clone()))
            .collect(),
        TensorLayout::Torch => TorchConverter::default().from_native(tree)?,
    };

    Ok(match options.dtype {
        Some(dtype) => tensors
            .into_iter()
            .map(|(name, tensor)| (name, tensor.with_dtype(dtype)))
            .collect(),
        None => tensors,
    })
}

fn encode(
    format: ArtifactFormat,
    entries: &[(&str, &Tensor)],
    framework: &FrameworkTag,
) -> Result<Vec<u8>> {
    match format {
        ArtifactFormat::Native => native::encode(entries),
        ArtifactFormat::Safe => safe::encode(entries, framework),
    }
}

/// Write `tree` into `destination` as exactly one checkpoint in one format.
///
/// Existing native and safetensors checkpoint files in `destination` are
/// removed once the new checkpoint has been encoded. Returns the files
/// written: the single file, or every shard followed by the index.
pub fn save(
    tree: &ParamTree,
    destination: &Path,
    options: &SaveOptions,
) -> Result<Vec<WrittenArtifact>> {
    if tree.is_empty() {
        return Err(ModelError::InvalidOptions(
            "parameter tree is empty".to_string(),
        ));
    }
    if options.layout == TensorLayout::Torch && !options.safe_serialization {
        return Err(ModelError::InvalidOptions(
            "torch layout requires safetensors serialization".to_string(),
        ));
    }

    let format = options.format();
    let framework = match options.layout {
        TensorLayout::Native => FrameworkTag::Native,
        TensorLayout::Torch => FrameworkTag::Torch,
    };

    // Nothing in `destination` changes until every file is encoded
    let tensors = layout_tensors(tree, options)?;
    let entries: Vec<(&str, &Tensor)> = tensors.iter().map(|(n, t)| (n.as_str(), t)).collect();
    let sizes: Vec<u64> = tensors.iter().map(|(_, t)| t.size_bytes() as u64).collect();
    let total_size: u64 = sizes.iter().sum();

    let Some(budget) = options.max_shard_size.filter(|&budget| total_size > budget) else {
        let bytes = encode(format, &entries, &framework)?;

        fs::create_dir_all(destination)?;
        let removed = remove_stale_artifacts(destination)?;
        let path = destination.join(format.single_file_name());
        fs::write(&path, &bytes)?;
        tracing::info!(
            path = %path.display(),
            format = %format,
            tensors = entries.len(),
            bytes = bytes.len(),
            stale_removed = removed,
            "saved checkpoint"
        );
        return Ok(vec![WrittenArtifact {
            path,
            format,
            role: ShardRole::Single,
            size_bytes: bytes.len() as u64,
        }]);
    };

    let plan = plan_shards(&sizes, budget);
    let total = plan.len();
    let mut index = ShardIndex::default();
    index.metadata.total_size = total_size;
    let mut shards = Vec::with_capacity(total);

    for (i, range) in plan.into_iter().enumerate() {
        let file_name = format.shard_file_name(i + 1, total);
        let shard_entries = &entries[range];
        let bytes = encode(format, shard_entries, &framework)?;

        for (name, _) in shard_entries {
            index.weight_map.insert(name.to_string(), file_name.clone());
        }
        index
            .metadata
            .shard_checksums
            .insert(file_name.clone(), ShardChecksum::of(&bytes));
        shards.push((file_name, shard_entries.len(), bytes));
    }

    fs::create_dir_all(destination)?;
    let removed = remove_stale_artifacts(destination)?;
    let mut written = Vec::with_capacity(total + 1);

    for (i, (file_name, count, bytes)) in shards.into_iter().enumerate() {
        let path = destination.join(&file_name);
        fs::write(&path, &bytes)?;
        tracing::debug!(
            shard = %file_name,
            tensors = count,
            bytes = bytes.len(),
            "wrote shard"
        );
        written.push(WrittenArtifact {
            path,
            format,
            role: ShardRole::Shard {
                index: i + 1,
                total,
            },
            size_bytes: bytes.len() as u64,
        });
    }

    let index_path = destination.join(format.index_file_name());
    let index_size = index.to_file(&index_path)?;
    written.push(WrittenArtifact {
        path: index_path,
        format,
        role: ShardRole::Index,
        size_bytes: index_size,
    });

    tracing::info!(
        path = %destination.display(),
        format = %format,
        shards = total,
        total_size,
        stale_removed = removed,
        "saved sharded checkpoint"
    );
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use weightport_core::{init_params, ModelConfig};

    #[test]
    fn test_parse_shard_size() {
        assert_eq!(parse_shard_size("10KB").unwrap(), 10_000);
        assert_eq!(parse_shard_size("5MB").unwrap(), 5_000_000);
        assert_eq!(parse_shard_size("2GB").unwrap(), 2_000_000_000);
        assert_eq!(parse_shard_size("1KiB").unwrap(), 1024);
        assert_eq!(parse_shard_size("1.5 mib").unwrap(), 1_572_864);
        assert_eq!(parse_shard_size("4096").unwrap(), 4096);
        for bad in ["", "KB", "10XB", "0", "-5MB", "1..2GB"] {
            assert!(
                matches!(parse_shard_size(bad), Err(ModelError::InvalidShardSize(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_plan_shards() {
        assert_eq!(plan_shards(&[4, 4, 4], 8), vec![0..2, 2..3]);
        // Oversized tensor is isolated
        assert_eq!(plan_shards(&[2, 20, 2, 2], 8), vec![0..1, 1..2, 2..4]);
        assert_eq!(plan_shards(&[20], 8), vec![0..1]);
        assert!(plan_shards(&[], 8).is_empty());
    }

    #[test]
    fn test_save_single_then_sharded_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let params = init_params(&ModelConfig::tiny(), 0).unwrap();

        let written = save(&params, dir.path(), &SaveOptions::default()).unwrap();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].file_name(), "weights.wpt");
        assert_eq!(written[0].role, ShardRole::Single);

        let options = SaveOptions::safe().with_max_shard_size(10_000);
        let written = save(&params, dir.path(), &options).unwrap();
        assert!(written.len() >= 3);
        assert_eq!(written.last().unwrap().role, ShardRole::Index);
        assert!(!dir.path().join("weights.wpt").exists());

        let index_path = dir.path().join("model.safetensors.index.json");
        let index = ShardIndex::from_file(&index_path).unwrap();
        assert_eq!(index.weight_map.len(), params.len());
        assert_eq!(index.metadata.total_size, params.total_bytes() as u64);
        assert_eq!(index.shard_files().len(), written.len() - 1);
    }

    #[test]
    fn test_torch_layout_requires_safe() {
        let dir = tempfile::tempdir().unwrap();
        let params = init_params(&ModelConfig::tiny(), 0).unwrap();
        let options = SaveOptions::default().with_layout(TensorLayout::Torch);
        assert!(matches!(
            save(&params, dir.path(), &options),
            Err(ModelError::InvalidOptions(_))
        ));
        assert!(matches!(
            save(&ParamTree::new(), dir.path(), &SaveOptions::default()),
            Err(ModelError::InvalidOptions(_))
        ));
    }

    #[test]
    fn test_failed_export_keeps_previous_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let params = init_params(&ModelConfig::tiny(), 0).unwrap();
        save(&params, dir.path(), &SaveOptions::safe()).unwrap();

        let mut odd = params.clone();
        odd.insert("extra.conv.kernel", Tensor::zeros(vec![2, 3, 4])).unwrap();
        let options = SaveOptions::safe().with_layout(TensorLayout::Torch);
        assert!(matches!(
            save(&odd, dir.path(), &options),
            Err(ModelError::ConversionUnavailable(_))
        ));

        let bytes = fs::read(dir.path().join("model.safetensors")).unwrap();
        let checkpoint = safe::decode(&bytes).unwrap();
        assert!(checkpoint.framework.is_native());
        assert_eq!(checkpoint.tensors.len(), params.len());
    }

    #[test]
    fn test_unrelated_files_survive() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("config.json"), b"{}").unwrap();
        fs::write(dir.path().join("model-00001-of-00009.safetensors"), b"stale").unwrap();
        let params = init_params(&ModelConfig::tiny(), 0).unwrap();
        save(&params, dir.path(), &SaveOptions::default()).unwrap();
        assert!(dir.path().join("config.json").exists());
        assert!(!dir.path().join("model-00001-of-00009.safetensors").exists());
    }
}
