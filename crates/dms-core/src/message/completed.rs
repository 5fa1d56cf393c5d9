use bytes::Bytes;
use jiff::Timestamp;
use serde::{Deserialize, Serialize};

use super::{DocumentNotice, PAYLOAD_VERSION};
use crate::Result;

/// Event published once text has been extracted from a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrCompleted {
    /// Payload format version.
    pub version: u32,
    /// Identifier of the document, copied from its notice.
    pub document_id: Option<i64>,
    /// Locator of the processed blob.
    pub locator: String,
    /// Extracted text; empty when the document contained no recognizable text.
    pub text: String,
    /// Number of characters in `text`.
    pub characters: usize,
    /// Delivery attempt that produced the text.
    pub attempt: u32,
    /// When extraction finished.
    pub completed_at: Timestamp,
}

impl OcrCompleted {
    /// Builds the completion event for a processed notice.
    pub fn new(notice: &DocumentNotice, text: impl Into<String>, attempt: u32) -> Self {
        let text = text.into();
        Self {
            version: PAYLOAD_VERSION,
            document_id: notice.document_id,
            locator: notice.locator.clone(),
            characters: text.chars().count(),
            text,
            attempt,
            completed_at: Timestamp::now(),
        }
    }

    /// Serializes the event into a message payload.
    pub fn encode(&self) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_characters_not_bytes() {
        let notice = DocumentNotice::new("minio://uploads/a.pdf").with_document_id(3);
        let event = OcrCompleted::new(&notice, "naïve", 2);
        assert_eq!(event.characters, 5);
        assert_eq!(event.document_id, Some(3));

        let json: serde_json::Value = serde_json::from_slice(&event.encode().unwrap()).unwrap();
        assert_eq!(json["locator"], "minio://uploads/a.pdf");
        assert_eq!(json["attempt"], 2);
    }
}
