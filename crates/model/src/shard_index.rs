//! Shard index manifests (`*.index.json`)

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{ModelError, Result};

/// Size and digest of one shard file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardChecksum {
    pub size: u64,
    pub sha256: String,
}

impl ShardChecksum {
    pub fn of(bytes: &[u8]) -> Self {
        Self {
            size: bytes.len() as u64,
            sha256: sha256_hex(bytes),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexMetadata {
    /// Sum of tensor byte sizes across all shards
    #[serde(default)]
    pub total_size: u64,
    /// Per-shard file size and SHA-256, verified at load when present
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub shard_checksums: BTreeMap<String, ShardChecksum>,
}

/// `{"metadata": {...}, "weight_map": {tensor: shard_file}}`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShardIndex {
    #[serde(default)]
    pub metadata: IndexMetadata,
    pub weight_map: BTreeMap<String, String>,
}

impl ShardIndex {
    pub fn from_file(path: &Path) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        serde_json::from_reader(reader).map_err(|e| {
            ModelError::InvalidFormat(format!("{}: unreadable shard index: {e}", path.display()))
        })
    }

    pub fn to_file(&self, path: &Path) -> Result<u64> {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(fs::metadata(path)?.len())
    }

    /// Distinct shard files, sorted
    pub fn shard_files(&self) -> Vec<&str> {
        let files: BTreeSet<&str> = self.weight_map.values().map(String::as_str).collect();
        files.into_iter().collect()
    }

    /// Tensors the index assigns to `shard`
    pub fn tensors_in(&self, shard: &str) -> BTreeSet<&str> {
        self.weight_map
            .iter()
            .filter(|(_, file)| file.as_str() == shard)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Check the index against the directory it lives in: it must name at
    /// least one tensor, every shard must be a plain file name that exists
    /// under `root`, and checksums may only describe listed shards.
    pub fn validate(&self, root: &Path) -> Result<()> {
        if self.weight_map.is_empty() {
            return Err(ModelError::FormatAmbiguous(format!(
                "shard index in {} lists no tensors",
                root.display()
            )));
        }

        let shards = self.shard_files();
        for shard in &shards {
            if shard.is_empty() || shard.contains(['/', '\\']) || *shard == ".." {
                return Err(ModelError::FormatAmbiguous(format!(
                    "invalid shard file name {shard:?}"
                )));
            }
            if !root.join(shard).is_file() {
                return Err(ModelError::FormatAmbiguous(format!(
                    "missing shard {shard} in {}",
                    root.display()
                )));
            }
        }

        for name in self.metadata.shard_checksums.keys() {
            if !shards.contains(&name.as_str()) {
                return Err(ModelError::FormatAmbiguous(format!(
                    "checksum listed for unknown shard {name}"
                )));
            }
        }
        Ok(())
    }

    /// Compare shard contents against the recorded size and digest, if any
    pub fn verify_shard(&self, shard: &str, bytes: &[u8]) -> Result<()> {
        let Some(expected) = self.metadata.shard_checksums.get(shard) else {
            return Ok(());
        };
        if expected.size != bytes.len() as u64 {
            return Err(ModelError::FormatAmbiguous(format!(
                "shard {shard} is {} bytes, index records {}",
                bytes.len(),
                expected.size
            )));
        }
        let actual = sha256_hex(bytes);
        if !actual.eq_ignore_ascii_case(&expected.sha256) {
            return Err(ModelError::FormatAmbiguous(format!(
                "shard {shard} sha256 mismatch: index records {}, file has {actual}",
                expected.sha256
            )));
        }
        Ok(())
    }
}

/// Lower-case hex SHA-256
pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> ShardIndex {
        let mut index = ShardIndex::default();
        index
            .weight_map
            .insert("a.kernel".into(), "model-00001-of-00002.safetensors".into());
        index
            .weight_map
            .insert("b.kernel".into(), "model-00002-of-00002.safetensors".into());
        index
            .weight_map
            .insert("b.bias".into(), "model-00002-of-00002.safetensors".into());
        index
    }

    #[test]
    fn test_shard_grouping() {
        let index = index();
        assert_eq!(
            index.shard_files(),
            vec![
                "model-00001-of-00002.safetensors",
                "model-00002-of-00002.safetensors"
            ]
        );
        assert_eq!(
            index.tensors_in("model-00002-of-00002.safetensors").len(),
            2
        );
    }

    #[test]
    fn test_json_layout() {
        let mut index = index();
        index.metadata.total_size = 48;
        let json = serde_json::to_value(&index).unwrap();
        assert_eq!(json["metadata"]["total_size"], 48);
        assert!(json["metadata"].get("shard_checksums").is_none());
        assert_eq!(
            json["weight_map"]["a.kernel"],
            "model-00001-of-00002.safetensors"
        );

        // Indices written by other tools may omit metadata entirely
        let parsed: ShardIndex =
            serde_json::from_str(r#"{"weight_map": {"x": "model-00001-of-00001.safetensors"}}"#)
                .unwrap();
        assert_eq!(parsed.metadata.total_size, 0);
    }

    #[test]
    fn test_validate_missing_shard() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("model-00001-of-00002.safetensors"), b"x").unwrap();
        let err = index().validate(dir.path()).unwrap_err();
        assert!(matches!(err, ModelError::FormatAmbiguous(_)));

        fs::write(dir.path().join("model-00002-of-00002.safetensors"), b"y").unwrap();
        index().validate(dir.path()).unwrap();

        assert!(matches!(
            ShardIndex::default().validate(dir.path()),
            Err(ModelError::FormatAmbiguous(_))
        ));
    }

    #[test]
    fn test_verify_shard_checksum() {
        let mut index = index();
        let shard = "model-00001-of-00002.safetensors";
        index
            .metadata
            .shard_checksums
            .insert(shard.into(), ShardChecksum::of(b"payload"));

        index.verify_shard(shard, b"payload").unwrap();
        assert!(matches!(
            index.verify_shard(shard, b"payloaX"),
            Err(ModelError::FormatAmbiguous(_))
        ));
        assert!(matches!(
            index.verify_shard(shard, b"short"),
            Err(ModelError::FormatAmbiguous(_))
        ));
        // No recorded checksum: nothing to verify
        index
            .verify_shard("model-00002-of-00002.safetensors", b"anything")
            .unwrap();
    }

    #[test]
    fn test_sha256_hex() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
