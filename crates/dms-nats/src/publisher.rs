//! Publishing to a single exchange.

use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;

use crate::{MessageBroker, PublishError, Result, TRACING_TARGET_PUBLISHER};

/// Publishes messages to one exchange with caller-supplied routing keys.
///
/// The exchange must already be declared. Messages are neither buffered nor
/// retried; every failure is logged with its class and returned.
#[derive(Clone)]
pub struct Publisher {
    broker: Arc<dyn MessageBroker>,
    exchange: String,
}

impl Publisher {
    /// Creates a publisher bound to `exchange`.
    pub fn new(broker: Arc<dyn MessageBroker>, exchange: impl Into<String>) -> Self {
        Self {
            broker,
            exchange: exchange.into(),
        }
    }

    /// Returns the exchange this publisher targets.
    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    /// Publishes a raw payload.
    #[tracing::instrument(
        skip(self, message),
        fields(exchange = %self.exchange),
        target = TRACING_TARGET_PUBLISHER
    )]
    pub async fn publish(
        &self,
        message: impl Into<Bytes>,
        routing_key: &str,
    ) -> Result<(), PublishError> {
        let payload: Bytes = message.into();
        let size = payload.len();

        match self.broker.publish(&self.exchange, routing_key, payload).await {
            Ok(()) => {
                tracing::debug!(
                    target: TRACING_TARGET_PUBLISHER,
                    exchange = %self.exchange,
                    routing_key,
                    size,
                    "Message published"
                );
                Ok(())
            }
            Err(err) => {
                tracing::error!(
                    target: TRACING_TARGET_PUBLISHER,
                    exchange = %self.exchange,
                    routing_key,
                    class = err.class(),
                    error = %err,
                    "Failed to publish message"
                );
                Err(err)
            }
        }
    }

    /// Serializes `value` as JSON and publishes it.
    pub async fn publish_json<T>(&self, value: &T, routing_key: &str) -> Result<(), PublishError>
    where
        T: Serialize + ?Sized,
    {
        let payload = serde_json::to_vec(value).map_err(|e| {
            let err = PublishError::Serialization(e.to_string());
            tracing::error!(
                target: TRACING_TARGET_PUBLISHER,
                exchange = %self.exchange,
                routing_key,
                class = err.class(),
                error = %err,
                "Failed to publish message"
            );
            err
        })?;
        self.publish(payload, routing_key).await
    }

    /// Flushes pending publishes and releases the publisher.
    ///
    /// The underlying connection stays open for other users of the broker.
    pub async fn close(self) -> Result<()> {
        let result = self.broker.flush().await;
        if let Err(err) = &result {
            tracing::warn!(
                target: TRACING_TARGET_PUBLISHER,
                exchange = %self.exchange,
                error = %err,
                "Flush on publisher close failed"
            );
        }
        result
    }
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("exchange", &self.exchange)
            .finish_non_exhaustive()
    }
}
