use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::PAYLOAD_VERSION;
use crate::{Error, Result};

/// Prefix used by plain-text notices published by older upload services.
const LEGACY_PREFIX: &str = "Document Path:";

fn first_attempt() -> u32 {
    1
}

/// Notification that a document blob is ready for processing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentNotice {
    /// Payload format version.
    pub version: u32,
    /// Identifier of the document, when known to the publisher.
    #[serde(default)]
    pub document_id: Option<i64>,
    /// Blob locator, e.g. `minio://uploads/report.pdf`.
    pub locator: String,
    /// Publisher-side attempt counter, starting at 1.
    #[serde(default = "first_attempt")]
    pub attempt: u32,
}

impl DocumentNotice {
    /// Creates a first-attempt notice for the given locator.
    pub fn new(locator: impl Into<String>) -> Self {
        Self {
            version: PAYLOAD_VERSION,
            document_id: None,
            locator: locator.into(),
            attempt: first_attempt(),
        }
    }

    /// Attaches the document identifier.
    #[must_use]
    pub fn with_document_id(mut self, document_id: i64) -> Self {
        self.document_id = Some(document_id);
        self
    }

    /// Serializes the notice into a message payload.
    pub fn encode(&self) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    /// Decodes a message payload.
    ///
    /// JSON payloads must carry a supported version and a non-empty locator.
    /// Any other UTF-8 payload is read as a legacy plain-text locator,
    /// optionally prefixed with `Document Path:`. Anything else is rejected
    /// as [`InvalidInput`](crate::ErrorKind::InvalidInput).
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(payload).map_err(|err| {
            Error::invalid_input()
                .with_message("notice payload is not UTF-8")
                .with_source(err)
        })?;
        let text = text.trim();

        if text.starts_with('{') {
            let notice: Self = serde_json::from_str(text).map_err(|err| {
                Error::invalid_input()
                    .with_message("notice payload is not a valid document notice")
                    .with_source(err)
            })?;
            if notice.version == 0 || notice.version > PAYLOAD_VERSION {
                return Err(Error::invalid_input().with_message(format!(
                    "unsupported notice version {}",
                    notice.version
                )));
            }
            if notice.locator.trim().is_empty() {
                return Err(Error::invalid_input().with_message("notice locator is empty"));
            }
            return Ok(notice);
        }

        let locator = text.strip_prefix(LEGACY_PREFIX).unwrap_or(text).trim();
        if locator.is_empty() {
            return Err(Error::invalid_input().with_message("notice payload is empty"));
        }
        Ok(Self::new(locator))
    }
}
