#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

/// Tracing target for delivery handling.
pub const TRACING_TARGET_DISPATCHER: &str = "dms_worker::dispatcher";

/// Tracing target for document ingestion.
pub const TRACING_TARGET_INGEST: &str = "dms_worker::ingest";

/// Tracing target for startup dependency checks.
pub const TRACING_TARGET_STARTUP: &str = "dms_worker::startup";

mod config;
mod dispatcher;
mod error;
mod ingest;
mod startup;

pub use config::WorkerConfig;
pub use dispatcher::{Dispatcher, Outcome};
pub use error::{Result, WorkerError};
pub use ingest::{Ingestor, Receipt};
pub use startup::verify_store;
