//! Filesystem-backed repository store
//!
//! Repositories live at `root/<namespace>/<name>` (or `root/<name>` without
//! a namespace). Only the `main` revision exists. Useful for offline mirrors
//! and tests.

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::DEFAULT_REVISION;
use crate::error::{HubError, Result};
use crate::remote::{safe_relative_path, walk_files, RemoteRepository};
use crate::repo::RepoId;

/// Repository store on the local filesystem
#[derive(Debug, Clone)]
pub struct DirectoryHub {
    root: PathBuf,
    /// Namespace bare repository names resolve to
    default_namespace: Option<String>,
    cache_dir: Option<PathBuf>,
}

impl DirectoryHub {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            default_namespace: None,
            cache_dir: None,
        }
    }

    /// Resolve bare repository names into `namespace`, the way a hub resolves
    /// them to the authenticated user
    pub fn with_default_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.default_namespace = Some(namespace.into());
        self
    }

    /// Where snapshots of this store are materialised
    pub fn with_cache_dir(mut self, cache_dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(cache_dir.into());
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn qualify(&self, repo: &RepoId) -> RepoId {
        match (repo.namespace(), &self.default_namespace) {
            (None, Some(ns)) => repo.with_namespace(ns),
            _ => repo.clone(),
        }
    }

    fn repo_dir(&self, repo: &RepoId) -> PathBuf {
        let repo = self.qualify(repo);
        match repo.namespace() {
            Some(ns) => self.root.join(ns).join(repo.name()),
            None => self.root.join(repo.name()),
        }
    }

    fn existing_repo_dir(&self, repo: &RepoId, revision: &str) -> Result<PathBuf> {
        let dir = self.repo_dir(repo);
        if !dir.is_dir() {
            return Err(HubError::RepoNotFound(repo.to_string()));
        }
        if revision != DEFAULT_REVISION {
            return Err(HubError::RevisionNotFound {
                repo: repo.to_string(),
                revision: revision.to_string(),
            });
        }
        Ok(dir)
    }
}

impl RemoteRepository for DirectoryHub {
    fn list_files(
        &self,
        repo: &RepoId,
        revision: &str,
        _token: Option<&str>,
    ) -> Result<Vec<String>> {
        let dir = self.existing_repo_dir(repo, revision)?;
        walk_files(&dir)
    }

    fn download_file(
        &self,
        repo: &RepoId,
        revision: &str,
        path: &str,
        dest: &Path,
        _token: Option<&str>,
    ) -> Result<()> {
        let dir = self.existing_repo_dir(repo, revision)?;
        let src = dir.join(safe_relative_path(path)?);
        if !src.is_file() {
            return Err(HubError::FileNotFound(format!("{repo}/{path}")));
        }
        fs::copy(&src, dest)?;
        Ok(())
    }

    fn upload(
        &self,
        local_dir: &Path,
        repo: &RepoId,
        token: &str,
        commit_message: &str,
    ) -> Result<String> {
        if token.is_empty() {
            return Err(HubError::Unauthorized("empty token".to_string()));
        }

        let dir = self.repo_dir(repo);
        fs::create_dir_all(&dir)?;

        let files = walk_files(local_dir)?;
        for file in &files {
            let rel = safe_relative_path(file)?;
            let dest = dir.join(&rel);
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(local_dir.join(&rel), &dest)?;
        }

        tracing::info!(
            repo = %self.qualify(repo),
            files = files.len(),
            message = commit_message,
            "uploaded to directory hub"
        );
        Ok(format!("file://{}", dir.display()))
    }

    fn delete(&self, repo: &RepoId, token: &str) -> Result<()> {
        if token.is_empty() {
            return Err(HubError::Unauthorized("empty token".to_string()));
        }
        let dir = self.repo_dir(repo);
        if !dir.is_dir() {
            return Err(HubError::RepoNotFound(repo.to_string()));
        }
        fs::remove_dir_all(&dir)?;
        Ok(())
    }

    fn cache_dir(&self) -> Option<&Path> {
        self.cache_dir.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::delete_quietly;

    fn write_file(dir: &Path, rel: &str, contents: &[u8]) {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn test_upload_list_download() {
        let hub_root = tempfile::tempdir().unwrap();
        let local = tempfile::tempdir().unwrap();
        write_file(local.path(), "config.json", b"{}");
        write_file(local.path(), "bert/weights.wpt", b"weights");

        let hub = DirectoryHub::new(hub_root.path());
        let repo = RepoId::parse("org/model").unwrap();
        let url = hub.upload(local.path(), &repo, "token", "init").unwrap();
        assert!(url.starts_with("file://"));

        let files = hub.list_files(&repo, "main", None).unwrap();
        assert_eq!(files, vec!["bert/weights.wpt", "config.json"]);

        let cache = tempfile::tempdir().unwrap();
        let snapshot = hub
            .snapshot_download(&repo, "main", &|f: &str| f.starts_with("bert/"), cache.path(), None)
            .unwrap();
        assert!(snapshot.join("bert").join("weights.wpt").is_file());
        assert!(!snapshot.join("config.json").exists());
    }

    #[test]
    fn test_missing_repo_and_revision() {
        let hub_root = tempfile::tempdir().unwrap();
        let hub = DirectoryHub::new(hub_root.path());
        let repo = RepoId::parse("org/missing").unwrap();

        assert!(matches!(
            hub.list_files(&repo, "main", None),
            Err(HubError::RepoNotFound(_))
        ));

        fs::create_dir_all(hub_root.path().join("org").join("missing")).unwrap();
        assert!(matches!(
            hub.list_files(&repo, "v2", None),
            Err(HubError::RevisionNotFound { .. })
        ));
    }

    #[test]
    fn test_default_namespace_and_delete() {
        let hub_root = tempfile::tempdir().unwrap();
        let local = tempfile::tempdir().unwrap();
        write_file(local.path(), "weights.wpt", b"w");

        let hub = DirectoryHub::new(hub_root.path()).with_default_namespace("alice");
        let bare = RepoId::parse("test-model").unwrap();
        hub.upload(local.path(), &bare, "token", "init").unwrap();

        let qualified = RepoId::parse("alice/test-model").unwrap();
        assert_eq!(hub.list_files(&qualified, "main", None).unwrap().len(), 1);

        assert!(matches!(
            hub.upload(local.path(), &bare, "", "init"),
            Err(HubError::Unauthorized(_))
        ));

        hub.delete(&qualified, "token").unwrap();
        assert!(hub.list_files(&qualified, "main", None).is_err());

        // Second delete fails, but quiet cleanup swallows it
        assert!(hub.delete(&qualified, "token").is_err());
        delete_quietly(&hub, &qualified, "token");
    }
}
