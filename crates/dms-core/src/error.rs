//! Common error type definitions.

use strum::{AsRefStr, Display, IntoStaticStr};
use thiserror::Error;

/// Type alias for boxed dynamic errors that can be sent across threads.
pub type BoxedError = Box<dyn std::error::Error + Send + Sync>;

/// Type alias for Results with our custom Error type.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Categories of errors that can occur anywhere in the pipeline.
///
/// Every crate-specific error maps onto one of these kinds, which is what
/// the dispatcher inspects when deciding whether a delivery is retried or
/// dead-lettered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, AsRefStr, Display, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    /// Input validation failed or the payload is malformed.
    InvalidInput,
    /// The referenced resource does not exist.
    NotFound,
    /// A remote service (broker, object store) could not be reached.
    Unreachable,
    /// An operation exceeded its time bound.
    Timeout,
    /// An external process exited unsuccessfully.
    ProcessFailed,
    /// Local filesystem error.
    Io,
    /// The operation is not supported for this input or backend.
    Unsupported,
    /// Serialization/deserialization error.
    Serialization,
    /// Configuration error.
    Configuration,
    /// Internal error.
    Internal,
}

impl ErrorKind {
    /// Returns `true` if an operation failing with this kind may succeed
    /// when attempted again later.
    pub fn is_retryable(self) -> bool {
        !matches!(
            self,
            Self::InvalidInput | Self::Unsupported | Self::Serialization | Self::Configuration
        )
    }

    /// Returns the kind as a static string.
    pub fn as_static_str(self) -> &'static str {
        self.into()
    }
}

/// A structured error type for dms-core operations.
#[derive(Debug, Error)]
#[error("{}{}", kind.as_ref(), message.as_ref().map(|m| format!(": {m}")).unwrap_or_default())]
pub struct Error {
    /// The kind of error that occurred.
    pub kind: ErrorKind,
    /// Optional error message.
    pub message: Option<String>,
    /// Optional source error.
    #[source]
    pub source: Option<BoxedError>,
}

impl Error {
    /// Creates a new error with the given kind.
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            source: None,
        }
    }

    /// Adds a message to this error.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Adds a source error to this error.
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Creates a new invalid input error.
    pub fn invalid_input() -> Self {
        Self::new(ErrorKind::InvalidInput)
    }

    /// Creates a new not found error.
    pub fn not_found() -> Self {
        Self::new(ErrorKind::NotFound)
    }

    /// Creates a new serialization error.
    pub fn serialization() -> Self {
        Self::new(ErrorKind::Serialization)
    }

    /// Returns the error kind.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the error kind as a string.
    pub fn kind_str(&self) -> &'static str {
        self.kind.into()
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization().with_source(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_are_snake_case() {
        assert_eq!(ErrorKind::InvalidInput.as_ref(), "invalid_input");
        assert_eq!(ErrorKind::ProcessFailed.as_static_str(), "process_failed");
    }

    #[test]
    fn permanent_kinds_are_not_retryable() {
        assert!(!ErrorKind::InvalidInput.is_retryable());
        assert!(!ErrorKind::Unsupported.is_retryable());
        assert!(ErrorKind::Timeout.is_retryable());
        assert!(ErrorKind::ProcessFailed.is_retryable());
        assert!(ErrorKind::NotFound.is_retryable());
    }

    #[test]
    fn display_includes_message() {
        let err = Error::invalid_input().with_message("empty name");
        assert_eq!(err.to_string(), "invalid_input: empty name");
        assert_eq!(Error::not_found().to_string(), "not_found");
    }
}
