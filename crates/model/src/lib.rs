//! weightport model - checkpoint resolution, saving and publishing
//!
//! Loads parameter checkpoints from a local directory or a remote repository,
//! choosing among native `.wpt` files, safetensors files, sharded sets of
//! either, and (on request) another framework's layout converted on the fly.
//!
//! # Example
//!
//! ```no_run
//! use weightport_model::{save, CheckpointSource, LoadOptions, Resolver, SaveOptions};
//! use weightport_core::{init_params, ModelConfig};
//!
//! let params = init_params(&ModelConfig::tiny(), 0)?;
//! let dir = std::path::Path::new("/tmp/tiny-bert");
//! save(&params, dir, &SaveOptions::safe().with_max_shard_size_str("10KB")?)?;
//!
//! let loaded = Resolver::local().load_params(&CheckpointSource::local(dir), &LoadOptions::default())?;
//! assert!(loaded.approx_eq(&params, 1e-4));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod convert;
pub mod error;
pub mod formats;
pub mod native;
pub mod pretrained;
pub mod publish;
pub mod resolver;
pub mod safe;
pub mod shard_index;
pub mod source;
pub mod writer;

pub use convert::{converter_for, FrameworkConverter, TorchConverter};
pub use error::{ModelError, Result};
pub use formats::{ArtifactFormat, ArtifactKind, FrameworkTag};
pub use pretrained::PretrainedModel;
pub use publish::{publish, PublishSource};
pub use resolver::{resolve, Resolution, Resolver};
pub use shard_index::ShardIndex;
pub use source::{CheckpointSource, LoadOptions};
pub use writer::{parse_shard_size, save, SaveOptions, ShardRole, TensorLayout, WrittenArtifact};
