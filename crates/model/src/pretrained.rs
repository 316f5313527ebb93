//! Model facade: configuration plus parameters, loaded, saved and published
//! as a unit

use std::fs;
use std::path::Path;

use weightport_core::{init_params, ModelConfig, ParamTree};
use weightport_hub::RemoteRepository;

use crate::error::{ModelError, Result};
use crate::formats::CONFIG_NAME;
use crate::publish::{publish, PublishSource};
use crate::resolver::Resolver;
use crate::source::{CheckpointSource, LoadOptions};
use crate::writer::{save, SaveOptions, WrittenArtifact};

const DEFAULT_COMMIT_MESSAGE: &str = "Upload model";

#[derive(Debug, Clone)]
pub struct PretrainedModel {
    config: ModelConfig,
    params: ParamTree,
}

impl PretrainedModel {
    /// Randomly initialised model, reproducible for a given `seed`
    pub fn new(config: ModelConfig, seed: u64) -> Result<Self> {
        config.validate()?;
        let params = init_params(&config, seed)?;
        Ok(Self { config, params })
    }

    pub fn from_parts(config: ModelConfig, params: ParamTree) -> Self {
        Self { config, params }
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn params(&self) -> &ParamTree {
        &self.params
    }

    pub fn into_params(self) -> ParamTree {
        self.params
    }

    /// Load a model whose checkpoint directory holds `config.json` and weights
    pub fn from_pretrained(
        resolver: &Resolver<'_>,
        source: impl Into<CheckpointSource>,
        options: &LoadOptions,
    ) -> Result<Self> {
        let source = source.into();
        let resolution = resolver.resolve(&source, options)?;
        let config = resolution.config.ok_or_else(|| {
            ModelError::MissingConfig(format!("no {CONFIG_NAME} alongside weights in {source}"))
        })?;
        Ok(Self {
            config,
            params: resolution.params,
        })
    }

    /// Write `config.json` and the weights into `dir`
    pub fn save_pretrained(
        &self,
        dir: &Path,
        options: &SaveOptions,
    ) -> Result<Vec<WrittenArtifact>> {
        fs::create_dir_all(dir)?;
        self.config.to_json_file(dir.join(CONFIG_NAME))?;
        save(&self.params, dir, options)
    }

    /// Save into a temporary directory and upload it. Returns the repository URL.
    pub fn push_to_hub(
        &self,
        hub: &dyn RemoteRepository,
        repo_id: &str,
        token: &str,
        options: &SaveOptions,
    ) -> Result<String> {
        let scratch = tempfile::Builder::new().prefix("weightport-push-").tempdir()?;
        self.save_pretrained(scratch.path(), options)?;
        publish(
            hub,
            PublishSource::Directory(scratch.path()),
            repo_id,
            token,
            DEFAULT_COMMIT_MESSAGE,
        )
    }

    /// Save into `dir`, then upload that directory
    pub fn save_and_push(
        &self,
        dir: &Path,
        options: &SaveOptions,
        hub: &dyn RemoteRepository,
        repo_id: &str,
        token: &str,
    ) -> Result<String> {
        self.save_pretrained(dir, options)?;
        publish(
            hub,
            PublishSource::Directory(dir),
            repo_id,
            token,
            DEFAULT_COMMIT_MESSAGE,
        )
    }

    /// Same configuration and, per parameter, a summed absolute difference
    /// of at most `tolerance`
    pub fn params_equal(&self, other: &PretrainedModel, tolerance: f64) -> bool {
        self.config == other.config && self.params.approx_eq(&other.params, tolerance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_is_seeded() {
        let a = PretrainedModel::new(ModelConfig::tiny(), 7).unwrap();
        let b = PretrainedModel::new(ModelConfig::tiny(), 7).unwrap();
        let c = PretrainedModel::new(ModelConfig::tiny(), 8).unwrap();
        assert!(a.params_equal(&b, 0.0));
        assert!(!a.params_equal(&c, 1e-3));
    }

    #[test]
    fn test_save_pretrained_writes_config() {
        let dir = tempfile::tempdir().unwrap();
        let model = PretrainedModel::new(ModelConfig::tiny(), 0).unwrap();
        model.save_pretrained(dir.path(), &SaveOptions::default()).unwrap();
        assert!(dir.path().join("config.json").is_file());
        assert!(dir.path().join("weights.wpt").is_file());

        let options = LoadOptions::default();
        let loaded = PretrainedModel::from_pretrained(&Resolver::local(), dir.path(), &options)
            .unwrap();
        assert!(model.params_equal(&loaded, 1e-4));
    }

    #[test]
    fn test_missing_config() {
        let dir = tempfile::tempdir().unwrap();
        let model = PretrainedModel::new(ModelConfig::tiny(), 0).unwrap();
        save(model.params(), dir.path(), &SaveOptions::default()).unwrap();
        let options = LoadOptions::default();
        assert!(matches!(
            PretrainedModel::from_pretrained(&Resolver::local(), dir.path(), &options),
            Err(ModelError::MissingConfig(_))
        ));
    }
}
