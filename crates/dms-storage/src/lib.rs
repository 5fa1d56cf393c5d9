#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

mod config;
mod error;
mod store;

pub use config::{BackendType, StorageConfig};
pub use error::{StorageError, StorageResult};
pub use store::ObjectStore;

/// Tracing target for storage operations.
pub const TRACING_TARGET: &str = "dms_storage";
