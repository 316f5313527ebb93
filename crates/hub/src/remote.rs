//! Remote repository interface

use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::error::{HubError, Result};
use crate::repo::RepoId;

/// Capabilities the checkpoint loader needs from a model repository service.
///
/// Tokens are passed per call; implementations never read ambient
/// credentials.
pub trait RemoteRepository {
    /// All file paths (`/`-separated, relative to the repository root) at `revision`
    fn list_files(&self, repo: &RepoId, revision: &str, token: Option<&str>)
        -> Result<Vec<String>>;

    /// Download one file to `dest`
    fn download_file(
        &self,
        repo: &RepoId,
        revision: &str,
        path: &str,
        dest: &Path,
        token: Option<&str>,
    ) -> Result<()>;

    /// Upload every file under `local_dir`, creating the repository if needed.
    /// Returns the repository URL.
    fn upload(
        &self,
        local_dir: &Path,
        repo: &RepoId,
        token: &str,
        commit_message: &str,
    ) -> Result<String>;

    /// Delete the repository
    fn delete(&self, repo: &RepoId, token: &str) -> Result<()>;

    /// Configured download cache, if the client has one
    fn cache_dir(&self) -> Option<&Path> {
        None
    }

    /// Materialise the files accepted by `filter` under
    /// `cache_dir/models--ns--name/snapshots/<revision>` and return that path.
    ///
    /// The snapshot directory is rebuilt on every call so it never holds
    /// files that are no longer in the repository.
    fn snapshot_download(
        &self,
        repo: &RepoId,
        revision: &str,
        filter: &dyn Fn(&str) -> bool,
        cache_dir: &Path,
        token: Option<&str>,
    ) -> Result<PathBuf> {
        let files = self.list_files(repo, revision, token)?;
        let snapshot = snapshot_dir(cache_dir, repo, revision);

        if snapshot.exists() {
            fs::remove_dir_all(&snapshot)?;
        }
        fs::create_dir_all(&snapshot)?;

        let mut downloaded = 0usize;
        for file in files.iter().filter(|f| filter(f)) {
            let dest = snapshot.join(safe_relative_path(file)?);
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            self.download_file(repo, revision, file, &dest, token)?;
            downloaded += 1;
        }

        tracing::info!(
            repo = %repo,
            revision,
            files = downloaded,
            path = %snapshot.display(),
            "snapshot downloaded"
        );
        Ok(snapshot)
    }
}

/// Delete a repository, ignoring any failure. Used for best-effort cleanup.
pub fn delete_quietly(hub: &dyn RemoteRepository, repo: &RepoId, token: &str) {
    if let Err(e) = hub.delete(repo, token) {
        tracing::debug!(repo = %repo, error = %e, "ignoring repository delete failure");
    }
}

/// Local directory a snapshot of `repo@revision` lives in
pub fn snapshot_dir(cache_dir: &Path, repo: &RepoId, revision: &str) -> PathBuf {
    cache_dir
        .join(repo.cache_folder_name())
        .join("snapshots")
        .join(revision)
}

/// Convert a repository path into a relative filesystem path, rejecting
/// absolute paths and parent-directory components.
pub fn safe_relative_path(path: &str) -> Result<PathBuf> {
    let candidate = Path::new(path);
    let mut out = PathBuf::new();
    for component in candidate.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            _ => {
                return Err(HubError::InvalidResponse(format!(
                    "unsafe repository path: {path}"
                )))
            }
        }
    }
    if out.as_os_str().is_empty() {
        return Err(HubError::InvalidResponse(format!(
            "empty repository path: {path:?}"
        )));
    }
    Ok(out)
}

/// Relative `/`-separated paths of every file under `root`, sorted
pub fn walk_files(root: &Path) -> Result<Vec<String>> {
    let mut files = Vec::new();
    walk_inner(root, root, &mut files)?;
    files.sort();
    Ok(files)
}

fn walk_inner(root: &Path, dir: &Path, files: &mut Vec<String>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            walk_inner(root, &path, files)?;
        } else if let Ok(rel) = path.strip_prefix(root) {
            let parts: Vec<String> = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            files.push(parts.join("/"));
        }
    }
    Ok(())
}
