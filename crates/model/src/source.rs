//! Where a checkpoint comes from and how to load it

use std::fmt;
use std::path::{Path, PathBuf};

use weightport_hub::{RepoId, DEFAULT_REVISION};

use crate::error::{ModelError, Result};

/// A local directory or a remote repository at a revision
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckpointSource {
    Local(PathBuf),
    Remote {
        repo: RepoId,
        revision: Option<String>,
    },
}

impl CheckpointSource {
    pub fn local(path: impl Into<PathBuf>) -> Self {
        CheckpointSource::Local(path.into())
    }

    pub fn remote(repo: RepoId) -> Self {
        CheckpointSource::Remote {
            repo,
            revision: None,
        }
    }

    /// Interpret a model identifier.
    ///
    /// An existing path is local. Otherwise `namespace/name`, optionally
    /// followed by `@revision`, is a remote repository. Anything else is
    /// taken as a local path and will fail to resolve.
    pub fn parse(s: &str) -> Self {
        if Path::new(s).exists() {
            return CheckpointSource::Local(PathBuf::from(s));
        }

        let (id, revision) = match s.split_once('@') {
            Some((id, rev)) if !rev.is_empty() => (id, Some(rev.to_string())),
            _ => (s, None),
        };
        match RepoId::parse(id) {
            Ok(repo) if repo.namespace().is_some() => CheckpointSource::Remote { repo, revision },
            _ => CheckpointSource::Local(PathBuf::from(s)),
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, CheckpointSource::Remote { .. })
    }

    /// Revision to fetch for remote sources
    pub fn revision(&self) -> Option<&str> {
        match self {
            CheckpointSource::Local(_) => None,
            CheckpointSource::Remote { revision, .. } => {
                Some(revision.as_deref().unwrap_or(DEFAULT_REVISION))
            }
        }
    }
}

impl fmt::Display for CheckpointSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckpointSource::Local(path) => write!(f, "{}", path.display()),
            CheckpointSource::Remote {
                repo,
                revision: Some(rev),
            } => write!(f, "{repo}@{rev}"),
            CheckpointSource::Remote { repo, .. } => write!(f, "{repo}"),
        }
    }
}

impl From<&str> for CheckpointSource {
    fn from(s: &str) -> Self {
        Self::parse(s)
    }
}

impl From<&Path> for CheckpointSource {
    fn from(path: &Path) -> Self {
        CheckpointSource::Local(path.to_path_buf())
    }
}

impl From<PathBuf> for CheckpointSource {
    fn from(path: PathBuf) -> Self {
        CheckpointSource::Local(path)
    }
}

/// Per-call resolution options
#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// Nested directory the checkpoint lives in. When set, the source root is
    /// never probed.
    pub subfolder: Option<String>,
    /// Probe safetensors before native files
    pub prefer_safe_format: bool,
    /// Permit loading another framework's checkpoint through a converter
    pub allow_cross_framework: bool,
    /// Prefix stripped from foreign parameter names (e.g. `bert`)
    pub base_model_prefix: Option<String>,
    /// Bearer token for private remote repositories
    pub token: Option<String>,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            subfolder: None,
            prefer_safe_format: true,
            allow_cross_framework: false,
            base_model_prefix: None,
            token: None,
        }
    }
}

impl LoadOptions {
    pub fn with_subfolder(mut self, subfolder: impl Into<String>) -> Self {
        self.subfolder = Some(subfolder.into());
        self
    }

    pub fn with_prefer_safe_format(mut self, prefer: bool) -> Self {
        self.prefer_safe_format = prefer;
        self
    }

    pub fn with_cross_framework(mut self, allow: bool) -> Self {
        self.allow_cross_framework = allow;
        self
    }

    pub fn with_base_model_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.base_model_prefix = Some(prefix.into());
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Subfolder as `/`-separated segments, rejecting empty, absolute and
    /// parent-directory components
    pub fn subfolder_segments(&self) -> Result<Vec<&str>> {
        let Some(subfolder) = self.subfolder.as_deref() else {
            return Ok(Vec::new());
        };
        let segments: Vec<&str> = subfolder
            .split(['/', '\\'])
            .filter(|s| !s.is_empty() && *s != ".")
            .collect();
        if segments.is_empty() || segments.contains(&"..") || subfolder.starts_with('/') {
            return Err(ModelError::SourceNotFound(format!(
                "invalid subfolder {subfolder:?}"
            )));
        }
        Ok(segments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_remote() {
        let source = CheckpointSource::parse("hf-internal-testing/tiny-random-bert");
        assert!(source.is_remote());
        assert_eq!(source.revision(), Some("main"));

        let source = CheckpointSource::parse("org/model@v1.0");
        assert_eq!(source.revision(), Some("v1.0"));
        assert_eq!(source.to_string(), "org/model@v1.0");
    }

    #[test]
    fn test_parse_local() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_str().unwrap();
        assert_eq!(
            CheckpointSource::parse(path),
            CheckpointSource::Local(dir.path().to_path_buf())
        );

        // Not a path and not namespace/name
        assert!(!CheckpointSource::parse("just-a-name").is_remote());
        assert!(!CheckpointSource::parse("a/b/c").is_remote());
    }

    #[test]
    fn test_subfolder_segments() {
        let options = LoadOptions::default().with_subfolder("nested/bert");
        assert_eq!(options.subfolder_segments().unwrap(), vec!["nested", "bert"]);
        assert!(LoadOptions::default().subfolder_segments().unwrap().is_empty());
        for bad in ["../escape", "/abs", ""] {
            assert!(LoadOptions::default()
                .with_subfolder(bad)
                .subfolder_segments()
                .is_err());
        }
    }
}
