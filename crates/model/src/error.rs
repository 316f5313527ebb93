//! Checkpoint error types

use thiserror::Error;
use weightport_core::CoreError;
use weightport_hub::HubError;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("No checkpoint found: {0}")]
    SourceNotFound(String),

    #[error("Inconsistent sharded checkpoint: {0}")]
    FormatAmbiguous(String),

    #[error("Cross-framework conversion unavailable: {0}")]
    ConversionUnavailable(String),

    #[error("Remote repository error: {0}")]
    Transfer(#[from] HubError),

    #[error("Invalid checkpoint file: {0}")]
    InvalidFormat(String),

    #[error("Unsupported tensor dtype: {0}")]
    UnsupportedDtype(String),

    #[error("Invalid max shard size: {0:?}")]
    InvalidShardSize(String),

    #[error("Invalid save options: {0}")]
    InvalidOptions(String),

    #[error("Missing model config: {0}")]
    MissingConfig(String),

    #[error("Safetensors error: {0}")]
    Safetensors(String),

    #[error("Tensor error: {0}")]
    Core(#[from] CoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<safetensors::SafeTensorError> for ModelError {
    fn from(e: safetensors::SafeTensorError) -> Self {
        ModelError::Safetensors(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ModelError>;
