//! Artifact names and format tags
//!
//! Every file the resolver probes for, and every file the writer produces,
//! is named here.

use std::fmt;

/// Native single-file checkpoint
pub const NATIVE_WEIGHTS_NAME: &str = "weights.wpt";
/// Native shard index
pub const NATIVE_WEIGHTS_INDEX_NAME: &str = "weights.wpt.index.json";
/// Safetensors single-file checkpoint
pub const SAFE_WEIGHTS_NAME: &str = "model.safetensors";
/// Safetensors shard index
pub const SAFE_WEIGHTS_INDEX_NAME: &str = "model.safetensors.index.json";
/// Torch pickle checkpoint (recognised, never decoded)
pub const TORCH_PICKLE_NAME: &str = "pytorch_model.bin";
/// Torch pickle shard index
pub const TORCH_PICKLE_INDEX_NAME: &str = "pytorch_model.bin.index.json";
/// Model configuration
pub const CONFIG_NAME: &str = "config.json";

/// Safetensors header metadata key holding the framework tag
pub const FORMAT_METADATA_KEY: &str = "format";
/// Framework tag written by this crate
pub const NATIVE_FRAMEWORK_TAG: &str = "weightport";
/// Framework tag of torch-layout safetensors files
pub const TORCH_FRAMEWORK_TAG: &str = "pt";

/// On-disk serialization format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactFormat {
    /// `.wpt` binary format
    Native,
    /// safetensors
    Safe,
}

impl ArtifactFormat {
    pub fn single_file_name(&self) -> &'static str {
        match self {
            ArtifactFormat::Native => NATIVE_WEIGHTS_NAME,
            ArtifactFormat::Safe => SAFE_WEIGHTS_NAME,
        }
    }

    pub fn index_file_name(&self) -> &'static str {
        match self {
            ArtifactFormat::Native => NATIVE_WEIGHTS_INDEX_NAME,
            ArtifactFormat::Safe => SAFE_WEIGHTS_INDEX_NAME,
        }
    }

    fn shard_stem(&self) -> &'static str {
        match self {
            ArtifactFormat::Native => "weights",
            ArtifactFormat::Safe => "model",
        }
    }

    fn extension(&self) -> &'static str {
        match self {
            ArtifactFormat::Native => "wpt",
            ArtifactFormat::Safe => "safetensors",
        }
    }

    /// Name of shard `index` (1-based) of `total`, e.g. `model-00001-of-00003.safetensors`
    pub fn shard_file_name(&self, index: usize, total: usize) -> String {
        format!(
            "{}-{:05}-of-{:05}.{}",
            self.shard_stem(),
            index,
            total,
            self.extension()
        )
    }

    /// True for any single, index or shard file name of this format
    pub fn owns_file_name(&self, name: &str) -> bool {
        if name == self.single_file_name() || name == self.index_file_name() {
            return true;
        }
        parse_shard_file_name(name).map_or(false, |(format, _, _)| format == *self)
    }
}

impl fmt::Display for ArtifactFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactFormat::Native => write!(f, "native"),
            ArtifactFormat::Safe => write!(f, "safetensors"),
        }
    }
}

/// Parse `<stem>-NNNNN-of-MMMMM.<ext>` into (format, index, total)
pub fn parse_shard_file_name(name: &str) -> Option<(ArtifactFormat, usize, usize)> {
    let (rest, format) = if let Some(rest) = name.strip_suffix(".wpt") {
        (rest.strip_prefix("weights-")?, ArtifactFormat::Native)
    } else if let Some(rest) = name.strip_suffix(".safetensors") {
        (rest.strip_prefix("model-")?, ArtifactFormat::Safe)
    } else {
        return None;
    };

    let (index, total) = rest.split_once("-of-")?;
    let all_digits = |s: &str| s.len() == 5 && s.bytes().all(|b| b.is_ascii_digit());
    if !all_digits(index) || !all_digits(total) {
        return None;
    }
    Some((format, index.parse().ok()?, total.parse().ok()?))
}

/// Framework layout a safetensors file declares in its header metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameworkTag {
    /// This crate's layout (tag `weightport`, or no tag at all)
    Native,
    /// Torch layout (tag `pt`)
    Torch,
    /// Any other framework
    Other(String),
}

impl FrameworkTag {
    pub fn from_metadata(tag: Option<&str>) -> Self {
        match tag {
            None | Some(NATIVE_FRAMEWORK_TAG) => FrameworkTag::Native,
            Some(TORCH_FRAMEWORK_TAG) => FrameworkTag::Torch,
            Some(other) => FrameworkTag::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            FrameworkTag::Native => NATIVE_FRAMEWORK_TAG,
            FrameworkTag::Torch => TORCH_FRAMEWORK_TAG,
            FrameworkTag::Other(tag) => tag,
        }
    }

    pub fn is_native(&self) -> bool {
        matches!(self, FrameworkTag::Native)
    }
}

/// The kinds of checkpoint the resolver can load, in the terms it probes for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    NativeSingle,
    NativeSharded,
    SafeSingle,
    SafeSharded,
    ForeignFramework,
}

impl ArtifactKind {
    pub fn single(format: ArtifactFormat) -> Self {
        match format {
            ArtifactFormat::Native => ArtifactKind::NativeSingle,
            ArtifactFormat::Safe => ArtifactKind::SafeSingle,
        }
    }

    pub fn sharded(format: ArtifactFormat) -> Self {
        match format {
            ArtifactFormat::Native => ArtifactKind::NativeSharded,
            ArtifactFormat::Safe => ArtifactKind::SafeSharded,
        }
    }

    pub fn is_sharded(&self) -> bool {
        matches!(self, ArtifactKind::NativeSharded | ArtifactKind::SafeSharded)
    }
}

/// True for files that matter to checkpoint discovery. Torch pickles are only
/// relevant when cross-framework loading may use them.
pub fn is_checkpoint_file(name: &str, include_pickles: bool) -> bool {
    let is_pickle = name.ends_with(".bin") || name == TORCH_PICKLE_INDEX_NAME;
    if is_pickle {
        return include_pickles;
    }
    name == CONFIG_NAME
        || name.ends_with(".wpt")
        || name.ends_with(".safetensors")
        || name.ends_with(".index.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shard_file_names() {
        assert_eq!(
            ArtifactFormat::Safe.shard_file_name(1, 3),
            "model-00001-of-00003.safetensors"
        );
        assert_eq!(
            ArtifactFormat::Native.shard_file_name(12, 12),
            "weights-00012-of-00012.wpt"
        );
        assert_eq!(
            parse_shard_file_name("weights-00002-of-00003.wpt"),
            Some((ArtifactFormat::Native, 2, 3))
        );
        assert_eq!(parse_shard_file_name("model-2-of-3.safetensors"), None);
        assert_eq!(parse_shard_file_name("weights.wpt"), None);
    }

    #[test]
    fn test_owns_file_name() {
        assert!(ArtifactFormat::Native.owns_file_name("weights.wpt.index.json"));
        assert!(ArtifactFormat::Safe.owns_file_name("model-00001-of-00002.safetensors"));
        assert!(!ArtifactFormat::Safe.owns_file_name("weights-00001-of-00002.wpt"));
        assert!(!ArtifactFormat::Native.owns_file_name("config.json"));
    }

    #[test]
    fn test_framework_tags() {
        assert_eq!(FrameworkTag::from_metadata(None), FrameworkTag::Native);
        assert_eq!(FrameworkTag::from_metadata(Some("weightport")), FrameworkTag::Native);
        assert_eq!(FrameworkTag::from_metadata(Some("pt")), FrameworkTag::Torch);
        assert_eq!(
            FrameworkTag::from_metadata(Some("tf")),
            FrameworkTag::Other("tf".into())
        );
    }

    #[test]
    fn test_checkpoint_file_filter() {
        assert!(is_checkpoint_file("config.json", false));
        assert!(is_checkpoint_file("model-00001-of-00002.safetensors", false));
        assert!(!is_checkpoint_file("pytorch_model.bin", false));
        assert!(is_checkpoint_file("pytorch_model.bin", true));
        assert!(!is_checkpoint_file("README.md", true));
    }
}
