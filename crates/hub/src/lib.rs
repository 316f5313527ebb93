//! weightport hub - remote model repository access
//!
//! Provides the repository operations checkpoint loading and publishing
//! need (list, download, snapshot, upload, delete) behind the
//! [`RemoteRepository`] trait, with two implementations:
//! - [`HttpHub`]: blocking client for a hub-compatible HTTP API
//! - [`DirectoryHub`]: repositories stored on the local filesystem
//!
//! # Example
//!
//! ```no_run
//! use weightport_hub::{DirectoryHub, RemoteRepository, RepoId};
//!
//! let hub = DirectoryHub::new("/srv/models");
//! let repo = RepoId::parse("org/tiny-bert")?;
//! let snapshot = hub.snapshot_download(
//!     &repo,
//!     "main",
//!     &|path: &str| path.ends_with(".safetensors"),
//!     std::path::Path::new("/tmp/cache"),
//!     None,
//! )?;
//! println!("downloaded to {}", snapshot.display());
//! # Ok::<(), weightport_hub::HubError>(())
//! ```

pub mod config;
pub mod error;
pub mod http;
pub mod local;
pub mod remote;
pub mod repo;

pub use config::{HubConfig, DEFAULT_ENDPOINT, DEFAULT_REVISION};
pub use error::{HubError, Result};
pub use http::HttpHub;
pub use local::DirectoryHub;
pub use remote::{delete_quietly, safe_relative_path, snapshot_dir, walk_files, RemoteRepository};
pub use repo::RepoId;
