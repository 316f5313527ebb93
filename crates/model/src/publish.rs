//! Publishing checkpoints to a remote repository

use std::path::Path;

use weightport_core::ParamTree;
use weightport_hub::{RemoteRepository, RepoId};

use crate::error::{ModelError, Result};
use crate::writer::{save, SaveOptions};

/// What to publish
pub enum PublishSource<'a> {
    /// A directory already written by `save`
    Directory(&'a Path),
    /// A parameter tree, saved into a temporary directory first
    Params(&'a ParamTree, &'a SaveOptions),
}

/// Upload a checkpoint to `repo_id` and return the repository URL.
///
/// Bare repository names are placed under the namespace the hub assigns to
/// `token`.
pub fn publish(
    hub: &dyn RemoteRepository,
    source: PublishSource<'_>,
    repo_id: &str,
    token: &str,
    commit_message: &str,
) -> Result<String> {
    let repo = RepoId::parse(repo_id)?;

    let url = match source {
        PublishSource::Directory(dir) => {
            if !dir.is_dir() {
                return Err(ModelError::SourceNotFound(format!(
                    "{} is not a directory",
                    dir.display()
                )));
            }
            hub.upload(dir, &repo, token, commit_message)?
        }
        PublishSource::Params(params, options) => {
            let scratch = tempfile::Builder::new().prefix("weightport-push-").tempdir()?;
            save(params, scratch.path(), options)?;
            hub.upload(scratch.path(), &repo, token, commit_message)?
        }
    };

    tracing::info!(repo = %repo, url = %url, "published checkpoint");
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use weightport_core::{init_params, ModelConfig};
    use weightport_hub::DirectoryHub;

    #[test]
    fn test_publish_params() {
        let hub_root = tempfile::tempdir().unwrap();
        let hub = DirectoryHub::new(hub_root.path());
        let params = init_params(&ModelConfig::tiny(), 1).unwrap();
        let options = SaveOptions::safe();

        let url = publish(
            &hub,
            PublishSource::Params(&params, &options),
            "org/tiny",
            "token",
            "add weights",
        )
        .unwrap();
        assert!(url.starts_with("file://"));
        assert!(hub_root
            .path()
            .join("org")
            .join("tiny")
            .join("model.safetensors")
            .is_file());
    }

    #[test]
    fn test_publish_errors() {
        let hub_root = tempfile::tempdir().unwrap();
        let hub = DirectoryHub::new(hub_root.path());
        let missing = hub_root.path().join("missing");

        assert!(matches!(
            publish(&hub, PublishSource::Directory(&missing), "org/x", "t", "m"),
            Err(ModelError::SourceNotFound(_))
        ));
        assert!(matches!(
            publish(&hub, PublishSource::Directory(hub_root.path()), "a/b/c", "t", "m"),
            Err(ModelError::Transfer(_))
        ));
    }
}
