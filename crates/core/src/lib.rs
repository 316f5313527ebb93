//! weightport core - tensors, parameter trees and model configuration
//!
//! This crate provides the host-side tensor runtime that checkpoint
//! loading builds on:
//! - `Tensor`: dense row-major values with a storage dtype (F32/F16/BF16)
//! - `ParamTree`: nested parameter names, flattenable to `a.b.c` keys
//! - `ModelConfig`: `config.json` for BERT-style encoders
//! - `init_params`: seeded random initialisation of a full parameter tree

pub mod config;
pub mod error;
pub mod init;
pub mod params;
pub mod tensor;

pub use config::ModelConfig;
pub use error::{CoreError, Result};
pub use init::init_params;
pub use params::{ParamNode, ParamTree, PATH_SEPARATOR};
pub use tensor::{DType, Tensor};
