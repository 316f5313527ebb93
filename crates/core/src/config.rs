//! Model configuration (`config.json`)

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{CoreError, Result};

/// Encoder model configuration (BERT family)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Model family identifier
    #[serde(default = "default_model_type")]
    pub model_type: String,

    /// Vocabulary size
    #[serde(default = "default_vocab_size")]
    pub vocab_size: usize,

    /// Hidden size (embedding dimension)
    #[serde(default = "default_hidden_size")]
    pub hidden_size: usize,

    /// Number of transformer layers
    #[serde(default = "default_num_hidden_layers")]
    pub num_hidden_layers: usize,

    /// Number of attention heads
    #[serde(default = "default_num_attention_heads")]
    pub num_attention_heads: usize,

    /// Intermediate size (FFN hidden dimension)
    #[serde(default = "default_intermediate_size")]
    pub intermediate_size: usize,

    /// Maximum sequence length
    #[serde(default = "default_max_position_embeddings")]
    pub max_position_embeddings: usize,

    /// Number of token type (segment) ids
    #[serde(default = "default_type_vocab_size")]
    pub type_vocab_size: usize,

    /// LayerNorm epsilon
    #[serde(default = "default_layer_norm_eps")]
    pub layer_norm_eps: f64,

    /// Std-dev style range for random initialisation
    #[serde(default = "default_initializer_range")]
    pub initializer_range: f32,
}

fn default_model_type() -> String { "bert".to_string() }
fn default_vocab_size() -> usize { 30522 }
fn default_hidden_size() -> usize { 768 }
fn default_num_hidden_layers() -> usize { 12 }
fn default_num_attention_heads() -> usize { 12 }
fn default_intermediate_size() -> usize { 3072 }
fn default_max_position_embeddings() -> usize { 512 }
fn default_type_vocab_size() -> usize { 2 }
fn default_layer_norm_eps() -> f64 { 1e-12 }
fn default_initializer_range() -> f32 { 0.02 }

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_type: default_model_type(),
            vocab_size: default_vocab_size(),
            hidden_size: default_hidden_size(),
            num_hidden_layers: default_num_hidden_layers(),
            num_attention_heads: default_num_attention_heads(),
            intermediate_size: default_intermediate_size(),
            max_position_embeddings: default_max_position_embeddings(),
            type_vocab_size: default_type_vocab_size(),
            layer_norm_eps: default_layer_norm_eps(),
            initializer_range: default_initializer_range(),
        }
    }
}

impl ModelConfig {
    /// Small configuration for tests and fixtures
    pub fn tiny() -> Self {
        Self {
            vocab_size: 99,
            hidden_size: 32,
            num_hidden_layers: 5,
            num_attention_heads: 4,
            intermediate_size: 37,
            max_position_embeddings: 64,
            ..Self::default()
        }
    }

    /// Load config from a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Write config as pretty JSON
    pub fn to_json_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Head dimension
    pub fn head_dim(&self) -> usize {
        self.hidden_size / self.num_attention_heads
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.num_attention_heads == 0 || self.hidden_size % self.num_attention_heads != 0 {
            return Err(CoreError::InvalidConfig(format!(
                "hidden_size ({}) must be divisible by num_attention_heads ({})",
                self.hidden_size, self.num_attention_heads
            )));
        }
        if self.vocab_size == 0 || self.intermediate_size == 0 {
            return Err(CoreError::InvalidConfig(
                "vocab_size and intermediate_size must be non-zero".to_string(),
            ));
        }
        if !(self.initializer_range > 0.0) {
            return Err(CoreError::InvalidConfig(format!(
                "initializer_range must be positive, got {}",
                self.initializer_range
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ModelConfig::default();
        assert_eq!(config.hidden_size, 768);
        assert_eq!(config.head_dim(), 64);
        config.validate().unwrap();
    }

    #[test]
    fn test_invalid_heads() {
        let config = ModelConfig {
            num_attention_heads: 5,
            ..ModelConfig::tiny()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_json_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let config = ModelConfig::tiny();
        config.to_json_file(&path).unwrap();
        let loaded = ModelConfig::from_json_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: ModelConfig = serde_json::from_str(r#"{"hidden_size": 64}"#).unwrap();
        assert_eq!(config.hidden_size, 64);
        assert_eq!(config.vocab_size, 30522);
        assert_eq!(config.model_type, "bert");
    }
}
