//! OCR error types.

use std::time::Duration;

use dms_core::ErrorKind;
use dms_storage::StorageError;
use strum::{AsRefStr, Display};

/// Result type for OCR operations.
pub type Result<T, E = OcrError> = std::result::Result<T, E>;

/// Pipeline step in which a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Stage {
    Resolve,
    Download,
    Rasterize,
    Recognize,
}

/// Errors returned by the OCR pipeline.
#[derive(Debug, thiserror::Error)]
pub enum OcrError {
    /// The locator or the file name it points to is malformed.
    #[error("invalid locator: {0}")]
    InvalidLocator(#[source] dms_core::Error),

    /// The document type cannot be processed.
    #[error("file type '{0}' is not eligible for OCR")]
    UnsupportedFileType(String),

    /// Retrieving the blob from the object store failed.
    #[error("download of '{locator}' failed: {source}")]
    Download {
        locator: String,
        #[source]
        source: StorageError,
    },

    /// An external tool could not be started.
    #[error("failed to launch {tool}: {source}")]
    Spawn {
        stage: Stage,
        tool: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// An external tool exited unsuccessfully.
    #[error("{tool} exited with {status}: {stderr}")]
    ProcessFailed {
        stage: Stage,
        tool: &'static str,
        status: String,
        stderr: String,
    },

    /// A step exceeded its time bound.
    #[error("{stage} step did not finish within {timeout:?}")]
    Timeout { stage: Stage, timeout: Duration },

    /// The pipeline configuration is unusable.
    #[error("invalid OCR configuration: {0}")]
    InvalidConfig(String),

    /// Local file handling failed.
    #[error("{context}: {source}")]
    Io {
        stage: Stage,
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl OcrError {
    pub(crate) fn io(stage: Stage, context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            stage,
            context: context.into(),
            source,
        }
    }

    /// Returns the step the failure happened in.
    pub fn stage(&self) -> Stage {
        match self {
            Self::InvalidLocator(_) | Self::UnsupportedFileType(_) | Self::InvalidConfig(_) => {
                Stage::Resolve
            }
            Self::Download { .. } => Stage::Download,
            Self::Spawn { stage, .. }
            | Self::ProcessFailed { stage, .. }
            | Self::Timeout { stage, .. }
            | Self::Io { stage, .. } => *stage,
        }
    }

    /// Returns the pipeline-wide error category.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidLocator(_) => ErrorKind::InvalidInput,
            Self::UnsupportedFileType(_) => ErrorKind::Unsupported,
            Self::Download { source, .. } => source.kind(),
            Self::Spawn { .. } | Self::Io { .. } => ErrorKind::Io,
            Self::ProcessFailed { .. } => ErrorKind::ProcessFailed,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::InvalidConfig(_) => ErrorKind::Configuration,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_and_stages() {
        let err = OcrError::ProcessFailed {
            stage: Stage::Recognize,
            tool: "tesseract",
            status: "exit status: 1".into(),
            stderr: "Error opening data file".into(),
        };
        assert_eq!(err.kind(), ErrorKind::ProcessFailed);
        assert_eq!(err.stage(), Stage::Recognize);
        assert_eq!(err.stage().as_ref(), "recognize");

        let err = OcrError::Download {
            locator: "minio://uploads/a.pdf".into(),
            source: StorageError::NotFound("uploads/a.pdf".into()),
        };
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.stage(), Stage::Download);

        let err = OcrError::UnsupportedFileType(".zip".into());
        assert!(!err.kind().is_retryable());
    }
}
