//! Core error types

use thiserror::Error;

/// Core result type
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised by tensor, parameter tree and config operations
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Tensor data length mismatch: shape {shape:?} needs {expected} elements, got {got}")]
    DataLength {
        shape: Vec<usize>,
        expected: usize,
        got: usize,
    },

    #[error("Byte buffer length mismatch: expected {expected} bytes, got {got}")]
    ByteLength { expected: usize, got: usize },

    #[error("Shape {0:?} is too large to address")]
    ShapeOverflow(Vec<usize>),

    #[error("Shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    #[error("Invalid axes {axes:?} for tensor of rank {rank}")]
    InvalidAxes { axes: Vec<usize>, rank: usize },

    #[error("Invalid parameter path: {0:?}")]
    InvalidPath(String),

    #[error("Parameter path conflicts with an existing entry: {0}")]
    PathConflict(String),

    #[error("Duplicate parameter: {0}")]
    DuplicateParameter(String),

    #[error("Missing parameter: {0}")]
    MissingParameter(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
