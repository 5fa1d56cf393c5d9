//! Error types for broker operations.

use async_nats::jetstream::context::PublishErrorKind;
use dms_core::ErrorKind;

/// Result type for all broker operations in this crate.
///
/// This is a convenience type alias that defaults to using [`Error`] as the error type.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Unified error type for broker operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A single connection attempt failed.
    #[error("broker connection failed: {reason}")]
    Connection { reason: String },

    /// Every connection attempt allowed by the retry policy failed.
    #[error("broker unreachable after {attempts} attempts: {reason}")]
    BrokerUnreachable { attempts: u32, reason: String },

    /// Declaring an exchange, queue or binding failed.
    #[error("topology declaration failed for exchange '{exchange}': {reason}")]
    Topology { exchange: String, reason: String },

    /// Subscribing to a queue or receiving from it failed.
    #[error("consumer error on queue '{queue}': {reason}")]
    Subscribe { queue: String, reason: String },

    /// Acknowledging or rejecting a delivery failed.
    #[error("settlement of delivery {tag} failed: {reason}")]
    Settlement { tag: u64, reason: String },

    /// The broker handle has been closed.
    #[error("broker connection is closed")]
    Closed,

    /// Publishing failed.
    #[error(transparent)]
    Publish(#[from] PublishError),

    /// Invalid configuration.
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },
}

impl Error {
    /// Creates a connection error.
    pub fn connection(reason: impl Into<String>) -> Self {
        Self::Connection {
            reason: reason.into(),
        }
    }

    /// Creates a topology error.
    pub fn topology(exchange: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Topology {
            exchange: exchange.into(),
            reason: reason.into(),
        }
    }

    /// Creates a consumer error.
    pub fn subscribe(queue: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Subscribe {
            queue: queue.into(),
            reason: reason.into(),
        }
    }

    /// Creates a settlement error.
    pub fn settlement(tag: u64, reason: impl Into<String>) -> Self {
        Self::Settlement {
            tag,
            reason: reason.into(),
        }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Returns the pipeline-wide error category.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Connection { .. } | Self::BrokerUnreachable { .. } | Self::Closed => {
                ErrorKind::Unreachable
            }
            Self::Topology { .. } | Self::Subscribe { .. } | Self::Settlement { .. } => {
                ErrorKind::Internal
            }
            Self::Publish(err) => err.kind(),
            Self::InvalidConfig { .. } => ErrorKind::Configuration,
        }
    }
}

/// Classified publish failure.
///
/// Publishing never retries or buffers; the class tells the caller what went
/// wrong so it can decide whether to carry on.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PublishError {
    /// The channel or connection was already closed.
    #[error("channel already closed: {0}")]
    ChannelClosed(String),

    /// The broker could not be reached or did not answer in time.
    #[error("broker unreachable: {0}")]
    Unreachable(String),

    /// The broker rejected or interrupted the operation at the protocol level.
    #[error("publish interrupted: {0}")]
    Interrupted(String),

    /// The payload could not be serialized.
    #[error("payload serialization failed: {0}")]
    Serialization(String),

    /// Any other failure.
    #[error("publish failed: {0}")]
    Other(String),
}

impl PublishError {
    /// Returns a short, stable name of the failure class for logging.
    pub fn class(&self) -> &'static str {
        match self {
            Self::ChannelClosed(_) => "channel_closed",
            Self::Unreachable(_) => "unreachable",
            Self::Interrupted(_) => "interrupted",
            Self::Serialization(_) => "serialization",
            Self::Other(_) => "other",
        }
    }

    /// Returns the pipeline-wide error category.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ChannelClosed(_) | Self::Unreachable(_) => ErrorKind::Unreachable,
            Self::Interrupted(_) | Self::Other(_) => ErrorKind::Internal,
            Self::Serialization(_) => ErrorKind::Serialization,
        }
    }
}

impl From<async_nats::error::Error<PublishErrorKind>> for PublishError {
    fn from(err: async_nats::error::Error<PublishErrorKind>) -> Self {
        let reason = err.to_string();
        match err.kind() {
            PublishErrorKind::BrokenPipe => Self::ChannelClosed(reason),
            PublishErrorKind::TimedOut => Self::Unreachable(reason),
            PublishErrorKind::StreamNotFound
            | PublishErrorKind::WrongLastMessageId
            | PublishErrorKind::WrongLastSequence
            | PublishErrorKind::MaxAckPending => Self::Interrupted(reason),
            _ => Self::Other(reason),
        }
    }
}

impl From<dms_core::Error> for PublishError {
    fn from(err: dms_core::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_classes_map_to_kinds() {
        let closed = PublishError::ChannelClosed("gone".into());
        assert_eq!(closed.class(), "channel_closed");
        assert_eq!(closed.kind(), ErrorKind::Unreachable);
        assert_eq!(
            PublishError::Interrupted("nak".into()).kind(),
            ErrorKind::Internal
        );
    }

    #[test]
    fn exhausted_retries_are_unreachable() {
        let err = Error::BrokerUnreachable {
            attempts: 10,
            reason: "connection refused".into(),
        };
        assert_eq!(err.kind(), ErrorKind::Unreachable);
        assert_eq!(
            err.to_string(),
            "broker unreachable after 10 attempts: connection refused"
        );
    }
}
