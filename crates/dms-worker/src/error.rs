//! Worker error types.

use dms_core::ErrorKind;
use dms_storage::StorageError;

/// Result type alias for worker operations.
pub type Result<T, E = WorkerError> = std::result::Result<T, E>;

/// Worker error type.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// Broker subscription or shutdown failed.
    #[error("broker error: {0}")]
    Broker(#[from] dms_nats::Error),

    /// Object store operation failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Document metadata or payload is invalid.
    #[error("invalid document: {0}")]
    Document(#[from] dms_core::Error),

    /// The object store did not answer within the startup retry policy.
    #[error("object store unreachable after {attempts} attempts: {reason}")]
    StorageUnreachable { attempts: u32, reason: String },

    /// Worker configuration is unusable.
    #[error("invalid worker configuration: {0}")]
    InvalidConfig(String),
}

impl WorkerError {
    /// Returns the pipeline-wide error category.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Broker(err) => err.kind(),
            Self::Storage(err) => err.kind(),
            Self::Document(err) => err.kind(),
            Self::StorageUnreachable { .. } => ErrorKind::Unreachable,
            Self::InvalidConfig(_) => ErrorKind::Configuration,
        }
    }
}
