use bytes::Bytes;
use jiff::Timestamp;
use serde::{Deserialize, Serialize};

use super::PAYLOAD_VERSION;
use crate::{ErrorKind, Result};

/// Envelope for a message that was given up on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    /// Payload format version.
    pub version: u32,
    /// Original payload, decoded lossily as UTF-8.
    pub payload: String,
    /// Description of the last failure.
    pub reason: String,
    /// Snake-case [`ErrorKind`] name of the last failure.
    pub kind: String,
    /// Deliveries made before the message was given up on.
    pub attempts: u32,
    /// When the message was given up on.
    pub failed_at: Timestamp,
}

impl DeadLetter {
    /// Wraps a failed message payload with the reason it was abandoned.
    pub fn new(payload: &[u8], kind: ErrorKind, reason: impl Into<String>, attempts: u32) -> Self {
        Self {
            version: PAYLOAD_VERSION,
            payload: String::from_utf8_lossy(payload).into_owned(),
            reason: reason.into(),
            kind: kind.as_static_str().to_owned(),
            attempts,
            failed_at: Timestamp::now(),
        }
    }

    /// Serializes the envelope into a message payload.
    pub fn encode(&self) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }
}
