//! Checkpoint resolution
//!
//! Locates the weight files for a source, picks exactly one checkpoint among
//! the formats present, and loads it into a [`ParamTree`].
//!
//! Discovery order, first match wins:
//! 1. single file in the preferred format (safetensors unless told otherwise)
//! 2. single file in the other format
//! 3. shard index in either format; when both exist the native set is used
//! 4. another framework's checkpoint, converted, if cross-framework loading
//!    is allowed
//!
//! A subfolder scopes every probe. The source root is never consulted in
//! its place.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use weightport_core::{ModelConfig, ParamTree, Tensor};
use weightport_hub::{RemoteRepository, DEFAULT_REVISION};

use crate::convert::converter_for;
use crate::error::{ModelError, Result};
use crate::formats::{
    is_checkpoint_file, ArtifactFormat, ArtifactKind, FrameworkTag, CONFIG_NAME,
    NATIVE_WEIGHTS_NAME, SAFE_WEIGHTS_INDEX_NAME, SAFE_WEIGHTS_NAME, TORCH_PICKLE_INDEX_NAME,
    TORCH_PICKLE_NAME,
};
use crate::native;
use crate::safe;
use crate::shard_index::ShardIndex;
use crate::source::{CheckpointSource, LoadOptions};

/// A loaded checkpoint
#[derive(Debug)]
pub struct Resolution {
    pub params: ParamTree,
    /// Which checkpoint the parameters came from
    pub kind: ArtifactKind,
    /// Layout of the files read, before any conversion
    pub framework: FrameworkTag,
    /// Weight files read, relative to the checkpoint directory
    pub files: Vec<String>,
    /// `config.json` next to the weights, if present
    pub config: Option<ModelConfig>,
}

/// A complete single-file checkpoint
#[derive(Debug, Clone)]
pub struct SingleFile {
    pub format: ArtifactFormat,
    pub path: PathBuf,
}

/// A validated index plus the directory its shards live in
#[derive(Debug, Clone)]
pub struct ShardSet {
    pub format: ArtifactFormat,
    pub root: PathBuf,
    pub index: ShardIndex,
}

/// Another framework's checkpoint
#[derive(Debug, Clone)]
pub enum ForeignArtifact {
    SafeSingle {
        framework: FrameworkTag,
        path: PathBuf,
    },
    SafeSharded {
        framework: FrameworkTag,
        set: ShardSet,
    },
    /// Torch pickle files, recognised but never decoded
    TorchPickle { path: PathBuf },
}

impl ForeignArtifact {
    fn framework(&self) -> FrameworkTag {
        match self {
            ForeignArtifact::SafeSingle { framework, .. }
            | ForeignArtifact::SafeSharded { framework, .. } => framework.clone(),
            ForeignArtifact::TorchPickle { .. } => FrameworkTag::Torch,
        }
    }

    fn is_convertible(&self) -> bool {
        !matches!(self, ForeignArtifact::TorchPickle { .. })
            && self.framework() == FrameworkTag::Torch
    }

    fn describe(&self) -> String {
        match self {
            ForeignArtifact::SafeSingle { framework, .. } => {
                format!("{SAFE_WEIGHTS_NAME} tagged {:?}", framework.as_str())
            }
            ForeignArtifact::SafeSharded { framework, .. } => {
                format!("{SAFE_WEIGHTS_INDEX_NAME} tagged {:?}", framework.as_str())
            }
            ForeignArtifact::TorchPickle { path } => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| TORCH_PICKLE_NAME.to_string()),
        }
    }
}

/// What discovery settled on
#[derive(Debug)]
enum Discovered {
    Single(SingleFile),
    Sharded(ShardSet),
    Foreign(ForeignArtifact),
}

/// `weights.wpt`
pub fn probe_native_single(root: &Path) -> Option<SingleFile> {
    let path = root.join(NATIVE_WEIGHTS_NAME);
    path.is_file().then(|| SingleFile {
        format: ArtifactFormat::Native,
        path,
    })
}

/// `model.safetensors` in the native layout
pub fn probe_safe_single(root: &Path) -> Result<Option<SingleFile>> {
    let path = root.join(SAFE_WEIGHTS_NAME);
    if !path.is_file() || !safe::read_framework_tag(&path)?.is_native() {
        return Ok(None);
    }
    Ok(Some(SingleFile {
        format: ArtifactFormat::Safe,
        path,
    }))
}

fn probe_index(root: &Path, format: ArtifactFormat) -> Result<Option<ShardSet>> {
    let index_path = root.join(format.index_file_name());
    if !index_path.is_file() {
        return Ok(None);
    }
    let index = ShardIndex::from_file(&index_path)?;
    index.validate(root)?;
    Ok(Some(ShardSet {
        format,
        root: root.to_path_buf(),
        index,
    }))
}

/// Every shard of a safetensors set must declare the same layout
fn shard_set_framework(set: &ShardSet) -> Result<FrameworkTag> {
    let mut tags = BTreeSet::new();
    for shard in set.index.shard_files() {
        tags.insert(safe::read_framework_tag(&set.root.join(shard))?.as_str().to_string());
    }
    match tags.len() {
        1 => Ok(FrameworkTag::from_metadata(tags.iter().next().map(String::as_str))),
        _ => Err(ModelError::FormatAmbiguous(format!(
            "safetensors shards in {} mix layouts {tags:?}",
            set.root.display()
        ))),
    }
}

/// `weights.wpt.index.json` with every shard present
pub fn probe_native_sharded(root: &Path) -> Result<Option<ShardSet>> {
    probe_index(root, ArtifactFormat::Native)
}

/// `model.safetensors.index.json` with every shard present, in the native layout
pub fn probe_safe_sharded(root: &Path) -> Result<Option<ShardSet>> {
    match probe_index(root, ArtifactFormat::Safe)? {
        Some(set) if shard_set_framework(&set)?.is_native() => Ok(Some(set)),
        _ => Ok(None),
    }
}

/// Another framework's checkpoint, convertible layouts first
pub fn probe_foreign(root: &Path) -> Result<Option<ForeignArtifact>> {
    let mut candidates = Vec::new();

    let single = root.join(SAFE_WEIGHTS_NAME);
    if single.is_file() {
        let framework = safe::read_framework_tag(&single)?;
        if !framework.is_native() {
            candidates.push(ForeignArtifact::SafeSingle {
                framework,
                path: single,
            });
        }
    }

    if let Some(set) = probe_index(root, ArtifactFormat::Safe)? {
        let framework = shard_set_framework(&set)?;
        if !framework.is_native() {
            candidates.push(ForeignArtifact::SafeSharded { framework, set });
        }
    }

    for name in [TORCH_PICKLE_NAME, TORCH_PICKLE_INDEX_NAME] {
        let path = root.join(name);
        if path.is_file() {
            candidates.push(ForeignArtifact::TorchPickle { path });
            break;
        }
    }

    candidates.sort_by_key(|c| !c.is_convertible());
    Ok(candidates.into_iter().next())
}

fn discover(root: &Path, options: &LoadOptions) -> Result<Discovered> {
    let order = if options.prefer_safe_format {
        [ArtifactFormat::Safe, ArtifactFormat::Native]
    } else {
        [ArtifactFormat::Native, ArtifactFormat::Safe]
    };

    for format in order {
        let found = match format {
            ArtifactFormat::Native => probe_native_single(root),
            ArtifactFormat::Safe => probe_safe_single(root)?,
        };
        if let Some(single) = found {
            return Ok(Discovered::Single(single));
        }
    }

    // Native shards win over safetensors shards whatever the preference. The
    // safetensors index is not read at all once a native set validates.
    if let Some(native) = probe_native_sharded(root)? {
        if root.join(SAFE_WEIGHTS_INDEX_NAME).is_file() {
            tracing::info!(
                path = %root.display(),
                "native and safetensors shard sets both present, using native"
            );
        }
        return Ok(Discovered::Sharded(native));
    }
    if let Some(set) = probe_safe_sharded(root)? {
        return Ok(Discovered::Sharded(set));
    }

    match probe_foreign(root)? {
        Some(foreign) if options.allow_cross_framework => Ok(Discovered::Foreign(foreign)),
        Some(foreign) => Err(ModelError::SourceNotFound(format!(
            "no native-layout checkpoint in {}; found {} from another framework \
             (enable cross-framework loading to convert it)",
            root.display(),
            foreign.describe()
        ))),
        None => Err(ModelError::SourceNotFound(format!(
            "no file named {NATIVE_WEIGHTS_NAME}, {SAFE_WEIGHTS_NAME} or a shard index in {}",
            root.display()
        ))),
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn read_single(single: &SingleFile) -> Result<Vec<(String, Tensor)>> {
    match single.format {
        ArtifactFormat::Native => native::read_file(&single.path),
        ArtifactFormat::Safe => Ok(safe::read_file(&single.path)?.tensors),
    }
}

/// Read every shard, checking each holds exactly the tensors the index assigns it
fn read_shards(set: &ShardSet) -> Result<(Vec<(String, Tensor)>, Vec<String>)> {
    let mut tensors = Vec::with_capacity(set.index.weight_map.len());
    let mut files = Vec::new();

    for shard in set.index.shard_files() {
        let bytes = fs::read(set.root.join(shard))?;
        set.index.verify_shard(shard, &bytes)?;

        let contents = match set.format {
            ArtifactFormat::Native => native::decode(&bytes)?,
            ArtifactFormat::Safe => safe::decode(&bytes)?.tensors,
        };

        let expected = set.index.tensors_in(shard);
        let found: BTreeSet<&str> = contents.iter().map(|(n, _)| n.as_str()).collect();
        if let Some(missing) = expected.difference(&found).next() {
            return Err(ModelError::FormatAmbiguous(format!(
                "tensor {missing} is mapped to {shard} but not stored there"
            )));
        }
        if let Some(extra) = found.difference(&expected).next() {
            return Err(ModelError::FormatAmbiguous(format!(
                "shard {shard} stores {extra}, which the index maps elsewhere or not at all"
            )));
        }
        if found.len() != contents.len() {
            return Err(ModelError::FormatAmbiguous(format!(
                "shard {shard} stores a tensor twice"
            )));
        }

        tracing::debug!(shard, tensors = contents.len(), "loaded shard");
        tensors.extend(contents);
        files.push(shard.to_string());
    }

    files.push(set.format.index_file_name().to_string());
    Ok((tensors, files))
}

type Loaded = (ParamTree, ArtifactKind, FrameworkTag, Vec<String>);

fn load(discovered: Discovered, options: &LoadOptions) -> Result<Loaded> {
    match discovered {
        Discovered::Single(single) => {
            let tree = ParamTree::from_flat(read_single(&single)?)?;
            let kind = ArtifactKind::single(single.format);
            Ok((tree, kind, FrameworkTag::Native, vec![file_name(&single.path)]))
        }
        Discovered::Sharded(set) => {
            let (tensors, files) = read_shards(&set)?;
            let tree = ParamTree::from_flat(tensors)?;
            Ok((tree, ArtifactKind::sharded(set.format), FrameworkTag::Native, files))
        }
        Discovered::Foreign(foreign) => {
            let framework = foreign.framework();
            let converter = converter_for(&framework, options.base_model_prefix.as_deref())?;
            let (tensors, files) = match &foreign {
                ForeignArtifact::SafeSingle { path, .. } => {
                    (safe::read_file(path)?.tensors, vec![file_name(path)])
                }
                ForeignArtifact::SafeSharded { set, .. } => read_shards(set)?,
                ForeignArtifact::TorchPickle { path } => {
                    return Err(ModelError::ConversionUnavailable(format!(
                        "{} is a torch pickle checkpoint; only torch safetensors files \
                         can be converted",
                        path.display()
                    )))
                }
            };
            tracing::info!(
                framework = framework.as_str(),
                tensors = tensors.len(),
                "converting checkpoint from another framework"
            );
            let tree = converter.to_native(tensors)?;
            Ok((tree, ArtifactKind::ForeignFramework, framework, files))
        }
    }
}

/// Resolves sources to loaded parameter trees.
///
/// Remote sources need a repository client. Their files are snapshotted into
/// `cache_dir`, else the client's own cache directory, else a temporary
/// directory removed when the call returns.
#[derive(Default)]
pub struct Resolver<'h> {
    hub: Option<&'h dyn RemoteRepository>,
    cache_dir: Option<PathBuf>,
}

impl<'h> Resolver<'h> {
    /// Resolver for local sources only
    pub fn local() -> Self {
        Self::default()
    }

    pub fn with_hub(hub: &'h dyn RemoteRepository) -> Self {
        Self {
            hub: Some(hub),
            cache_dir: None,
        }
    }

    pub fn with_cache_dir(mut self, cache_dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(cache_dir.into());
        self
    }

    /// Directory holding the checkpoint files, downloading them first for
    /// remote sources. `scratch` keeps a temporary download directory alive.
    fn materialize(
        &self,
        source: &CheckpointSource,
        options: &LoadOptions,
        scratch: &mut Option<TempDir>,
    ) -> Result<PathBuf> {
        let segments = options.subfolder_segments()?;

        let base = match source {
            CheckpointSource::Local(path) => {
                if !path.is_dir() {
                    return Err(ModelError::SourceNotFound(format!(
                        "{} is not a directory",
                        path.display()
                    )));
                }
                path.clone()
            }
            CheckpointSource::Remote { repo, .. } => {
                let hub = self.hub.ok_or_else(|| {
                    ModelError::SourceNotFound(format!(
                        "{source} is a remote repository but no hub client was given"
                    ))
                })?;

                let configured = self.cache_dir.as_deref().or_else(|| hub.cache_dir());
                let cache_dir = match configured {
                    Some(dir) => dir.to_path_buf(),
                    None => {
                        let tmp = tempfile::Builder::new().prefix("weightport-").tempdir()?;
                        let dir = tmp.path().to_path_buf();
                        *scratch = Some(tmp);
                        dir
                    }
                };

                let prefix = segments.join("/");
                let include_pickles = options.allow_cross_framework;
                let wanted = |path: &str| {
                    let name = if prefix.is_empty() {
                        Some(path)
                    } else {
                        path.strip_prefix(prefix.as_str())
                            .and_then(|rest| rest.strip_prefix('/'))
                    };
                    name.map_or(false, |n| {
                        !n.contains('/') && is_checkpoint_file(n, include_pickles)
                    })
                };

                let revision = source.revision().unwrap_or(DEFAULT_REVISION);
                hub.snapshot_download(
                    repo,
                    revision,
                    &wanted,
                    &cache_dir,
                    options.token.as_deref(),
                )?
            }
        };

        let root = segments.iter().fold(base, |dir, segment| dir.join(segment));
        if !root.is_dir() {
            return Err(ModelError::SourceNotFound(format!(
                "subfolder {:?} not found in {source}",
                options.subfolder.as_deref().unwrap_or_default()
            )));
        }
        Ok(root)
    }

    /// Locate and load the checkpoint at `source`
    pub fn resolve(
        &self,
        source: &CheckpointSource,
        options: &LoadOptions,
    ) -> Result<Resolution> {
        let mut scratch = None;
        let root = self.materialize(source, options, &mut scratch)?;

        let discovered = discover(&root, options)?;
        let (params, kind, framework, files) = load(discovered, options)?;

        let config_path = root.join(CONFIG_NAME);
        let config = if config_path.is_file() {
            Some(ModelConfig::from_json_file(&config_path)?)
        } else {
            None
        };

        tracing::info!(
            source = %source,
            subfolder = options.subfolder.as_deref().unwrap_or(""),
            kind = ?kind,
            files = files.len(),
            parameters = params.len(),
            "resolved checkpoint"
        );
        Ok(Resolution {
            params,
            kind,
            framework,
            files,
            config,
        })
    }

    /// Locate and load the parameters at `source`
    pub fn load_params(
        &self,
        source: &CheckpointSource,
        options: &LoadOptions,
    ) -> Result<ParamTree> {
        Ok(self.resolve(source, options)?.params)
    }
}

/// Resolve a local checkpoint directory
pub fn resolve(source: &CheckpointSource, options: &LoadOptions) -> Result<ParamTree> {
    Resolver::local().load_params(source, options)
}
