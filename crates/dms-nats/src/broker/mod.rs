//! Broker capability and its implementations.

mod memory;
mod nats;

use async_trait::async_trait;
use bytes::Bytes;
pub use memory::{MemoryBroker, Settlement};
pub use nats::NatsBroker;

use crate::{DeliveryStream, PublishError, Result, Topology};

/// Operations the pipeline needs from a message broker.
#[async_trait]
pub trait MessageBroker: Send + Sync + 'static {
    /// Declares the exchange, the durable queue and the binding.
    ///
    /// Must succeed when an identical topology already exists.
    async fn declare(&self, topology: &Topology) -> Result<()>;

    /// Publishes `payload` to `exchange` with `routing_key`.
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: Bytes,
    ) -> Result<(), PublishError>;

    /// Starts consuming the topology's queue with manual acknowledgment.
    ///
    /// A message is taken from the queue only when the returned stream is
    /// polled, so the consumer's polling bounds its unsettled deliveries.
    async fn subscribe(&self, topology: &Topology) -> Result<DeliveryStream>;

    /// Waits until everything published so far has been handed to the broker.
    async fn flush(&self) -> Result<()>;

    /// Closes the connection. Closing an already closed broker is a no-op.
    async fn close(&self) -> Result<()>;
}
