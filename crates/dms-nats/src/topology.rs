//! Exchange, queue and binding declarations.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Default exchange for document ingestion notices.
pub const INGESTION_EXCHANGE: &str = "dms_exchange";
/// Default queue consumed by the OCR dispatcher.
pub const INGESTION_QUEUE: &str = "dms_queue";
/// Default routing key binding the ingestion queue.
pub const INGESTION_ROUTING_KEY: &str = "dms_routing_key";

/// Default exchange for OCR completion events.
pub const COMPLETION_EXCHANGE: &str = "ocr_exchange";
/// Default queue holding OCR completion events.
pub const COMPLETION_QUEUE: &str = "ocr_queue";
/// Default routing key binding the completion queue.
pub const COMPLETION_ROUTING_KEY: &str = "ocr_routing_key";

/// Default exchange for messages that were given up on.
pub const DEAD_LETTER_EXCHANGE: &str = "dms_dead_letter";
/// Default queue holding dead-lettered messages.
pub const DEAD_LETTER_QUEUE: &str = "dms_dead_letter_queue";
/// Default routing key binding the dead-letter queue.
pub const DEAD_LETTER_ROUTING_KEY: &str = "dms_dead_letter_key";

/// A direct exchange, a durable queue and the binding between them.
///
/// Declaring the same topology repeatedly is a no-op.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Topology {
    pub exchange: String,
    pub queue: String,
    pub routing_key: String,
}

impl Topology {
    /// Creates a topology, rejecting empty names.
    pub fn new(
        exchange: impl Into<String>,
        queue: impl Into<String>,
        routing_key: impl Into<String>,
    ) -> Result<Self> {
        let topology = Self {
            exchange: exchange.into(),
            queue: queue.into(),
            routing_key: routing_key.into(),
        };

        for (field, value) in [
            ("exchange", &topology.exchange),
            ("queue", &topology.queue),
            ("routing key", &topology.routing_key),
        ] {
            if value.trim().is_empty() {
                return Err(Error::invalid_config(format!("topology {field} is empty")));
            }
        }

        Ok(topology)
    }

    /// Ingestion pipeline: upload notices consumed by the OCR dispatcher.
    pub fn ingestion() -> Self {
        Self::from_static(INGESTION_EXCHANGE, INGESTION_QUEUE, INGESTION_ROUTING_KEY)
    }

    /// Completion pipeline: OCR results.
    pub fn completion() -> Self {
        Self::from_static(COMPLETION_EXCHANGE, COMPLETION_QUEUE, COMPLETION_ROUTING_KEY)
    }

    /// Dead-letter pipeline: poison and exhausted messages.
    pub fn dead_letter() -> Self {
        Self::from_static(
            DEAD_LETTER_EXCHANGE,
            DEAD_LETTER_QUEUE,
            DEAD_LETTER_ROUTING_KEY,
        )
    }

    fn from_static(exchange: &str, queue: &str, routing_key: &str) -> Self {
        Self {
            exchange: exchange.to_owned(),
            queue: queue.to_owned(),
            routing_key: routing_key.to_owned(),
        }
    }
}
