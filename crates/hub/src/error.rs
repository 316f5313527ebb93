//! Error types for remote repository operations

use thiserror::Error;

/// Hub errors
#[derive(Error, Debug)]
pub enum HubError {
    /// Repository id is not `name` or `namespace/name`
    #[error("Invalid repo ID (expected 'namespace/name'): {0}")]
    InvalidRepoId(String),

    /// Repository does not exist (or is not visible with the given token)
    #[error("Repository not found: {0}")]
    RepoNotFound(String),

    /// Revision does not exist in the repository
    #[error("Revision {revision} not found in {repo}")]
    RevisionNotFound { repo: String, revision: String },

    /// File does not exist in the repository
    #[error("File not found: {0}")]
    FileNotFound(String),

    /// Token missing or rejected
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Server returned an error
    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    /// Invalid response from server
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl HubError {
    /// Whether a download may succeed if attempted again
    pub fn is_retryable(&self) -> bool {
        match self {
            HubError::Http(e) => e.is_timeout() || e.is_connect(),
            HubError::Server { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

/// Result type for hub operations
pub type Result<T> = std::result::Result<T, HubError>;
