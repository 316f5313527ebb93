//! Hub client configuration

use std::path::PathBuf;
use std::time::Duration;

/// Default hub endpoint
pub const DEFAULT_ENDPOINT: &str = "https://huggingface.co";

/// Default revision used when a source does not name one
pub const DEFAULT_REVISION: &str = "main";

/// Hub client configuration
///
/// Holds no credentials: every call that needs a token takes it as an
/// argument.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Base URL of the hub API
    pub endpoint: String,
    /// Directory snapshots are materialised into. `None` means a temporary
    /// directory scoped to each resolution.
    pub cache_dir: Option<PathBuf>,
    /// Per-request timeout
    pub timeout: Duration,
    /// Extra attempts for a failed file download (0 = single attempt)
    pub max_retries: u32,
    /// Initial backoff between download attempts, doubled per retry
    pub initial_backoff: Duration,
}

impl HubConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self {
            endpoint: std::env::var("WEIGHTPORT_HUB_ENDPOINT")
                .unwrap_or_else(|_| DEFAULT_ENDPOINT.to_string()),
            cache_dir: std::env::var("WEIGHTPORT_CACHE_DIR").ok().map(PathBuf::from),
            timeout: Duration::from_secs(
                std::env::var("WEIGHTPORT_HUB_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(60),
            ),
            max_retries: std::env::var("WEIGHTPORT_HUB_MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(2),
            initial_backoff: Duration::from_millis(500),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_cache_dir(mut self, cache_dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(cache_dir.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_overrides() {
        let config = HubConfig::from_env()
            .with_endpoint("http://localhost:8080/")
            .with_cache_dir("/tmp/weights")
            .with_timeout(Duration::from_secs(5))
            .with_max_retries(0);

        assert_eq!(config.endpoint, "http://localhost:8080");
        assert_eq!(config.cache_dir, Some(PathBuf::from("/tmp/weights")));
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.max_retries, 0);
    }
}
