//! Received messages and their settlement.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

use crate::{Result, TRACING_TARGET_STREAM};

/// Stream of deliveries from a subscribed queue.
pub type DeliveryStream = BoxStream<'static, Result<Delivery>>;

/// Broker-side handle used to settle one delivery.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    /// Confirms processing; the broker removes the message.
    async fn ack(&self) -> Result<()>;

    /// Rejects the message, returning it to its queue when `requeue` is set.
    async fn nack(&self, requeue: bool) -> Result<()>;
}

/// A message received with manual acknowledgment.
///
/// [`ack`](Self::ack) and [`nack`](Self::nack) consume the delivery, so it is
/// settled at most once. A delivery dropped without settlement is logged and
/// left to the broker, which redelivers it once its ack deadline passes.
pub struct Delivery {
    payload: Bytes,
    routing_key: String,
    tag: u64,
    attempt: u32,
    acker: Box<dyn Acknowledger>,
    settled: bool,
}

impl Delivery {
    /// Creates a delivery.
    ///
    /// `attempt` is the broker's delivery count for this message, starting at 1.
    pub fn new(
        payload: Bytes,
        routing_key: impl Into<String>,
        tag: u64,
        attempt: u32,
        acker: impl Acknowledger + 'static,
    ) -> Self {
        Self {
            payload,
            routing_key: routing_key.into(),
            tag,
            attempt,
            acker: Box::new(acker),
            settled: false,
        }
    }

    /// Returns the message body.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Returns the routing key the message was published with.
    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    /// Returns the delivery tag.
    pub fn tag(&self) -> u64 {
        self.tag
    }

    /// Returns how many times this message has been delivered, including this time.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Acknowledges the delivery.
    pub async fn ack(mut self) -> Result<()> {
        self.settled = true;
        tracing::trace!(target: TRACING_TARGET_STREAM, delivery_tag = self.tag, "Acknowledging delivery");
        self.acker.ack().await
    }

    /// Rejects the delivery.
    pub async fn nack(mut self, requeue: bool) -> Result<()> {
        self.settled = true;
        tracing::trace!(
            target: TRACING_TARGET_STREAM,
            delivery_tag = self.tag,
            requeue,
            "Rejecting delivery"
        );
        self.acker.nack(requeue).await
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("routing_key", &self.routing_key)
            .field("tag", &self.tag)
            .field("attempt", &self.attempt)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

impl Drop for Delivery {
    fn drop(&mut self) {
        if !self.settled {
            tracing::warn!(
                target: TRACING_TARGET_STREAM,
                delivery_tag = self.tag,
                attempt = self.attempt,
                "Delivery dropped without settlement, broker will redeliver"
            );
        }
    }
}
