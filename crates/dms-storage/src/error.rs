//! Storage error types.

use std::time::Duration;

use dms_core::ErrorKind;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Failed to initialize the storage backend.
    #[error("storage initialization failed: {0}")]
    Init(String),

    /// Object not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Bucket not found.
    #[error("bucket not found: {0}")]
    BucketNotFound(String),

    /// Permission denied.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The backend could not be reached or failed transiently.
    #[error("storage unreachable: {0}")]
    Unreachable(String),

    /// The operation did not finish in time.
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    /// Invalid bucket name or object key.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// The backend does not support the operation.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Local filesystem error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Backend-specific error.
    #[error("backend error: {0}")]
    Backend(opendal::Error),
}

impl StorageError {
    /// Creates a new initialization error.
    pub fn init(msg: impl Into<String>) -> Self {
        Self::Init(msg.into())
    }

    /// Creates a new invalid path error.
    pub fn invalid_path(msg: impl Into<String>) -> Self {
        Self::InvalidPath(msg.into())
    }

    /// Creates a new unsupported operation error.
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    /// Returns the pipeline-wide error category.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Init(_) => ErrorKind::Configuration,
            Self::NotFound(_) | Self::BucketNotFound(_) => ErrorKind::NotFound,
            Self::PermissionDenied(_) => ErrorKind::Configuration,
            Self::Unreachable(_) => ErrorKind::Unreachable,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::InvalidPath(_) => ErrorKind::InvalidInput,
            Self::Unsupported(_) => ErrorKind::Unsupported,
            Self::Io(_) => ErrorKind::Io,
            Self::Backend(_) => ErrorKind::Internal,
        }
    }
}

impl From<opendal::Error> for StorageError {
    fn from(err: opendal::Error) -> Self {
        use opendal::ErrorKind;

        match err.kind() {
            ErrorKind::NotFound => Self::NotFound(err.to_string()),
            ErrorKind::PermissionDenied => Self::PermissionDenied(err.to_string()),
            ErrorKind::ConfigInvalid => Self::Init(err.to_string()),
            ErrorKind::Unsupported => Self::Unsupported(err.to_string()),
            _ if err.is_temporary() => Self::Unreachable(err.to_string()),
            _ => Self::Backend(err),
        }
    }
}
