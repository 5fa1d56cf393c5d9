//! JetStream-backed broker.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_nats::jetstream::consumer::{AckPolicy, PullConsumer, pull};
use async_nats::jetstream::{self, AckKind, stream};
use async_nats::{Client, ConnectOptions, HeaderMap, header};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;

use super::MessageBroker;
use crate::delivery::{Acknowledger, Delivery, DeliveryStream};
use crate::{
    Error, NatsConfig, PublishError, Result, TRACING_TARGET_CLIENT, TRACING_TARGET_CONNECTION,
    TRACING_TARGET_PUBLISHER, Topology,
};

/// How long one pull request waits on an empty queue before it is renewed.
const FETCH_EXPIRY: Duration = Duration::from_secs(5);

/// Broker backed by a NATS server with JetStream enabled.
///
/// Cloning is cheap; clones share the underlying connection.
#[derive(Debug, Clone)]
pub struct NatsBroker {
    inner: Arc<NatsBrokerInner>,
}

#[derive(Debug)]
struct NatsBrokerInner {
    client: Client,
    jetstream: jetstream::Context,
    ack_wait: Duration,
    closed: AtomicBool,
}

impl NatsBroker {
    /// Performs a single connection attempt.
    ///
    /// Startup retries are the job of [`ConnectionManager`](crate::ConnectionManager).
    #[tracing::instrument(skip(config), fields(url = %config.nats_url), target = TRACING_TARGET_CONNECTION)]
    pub async fn connect(config: &NatsConfig) -> Result<Self> {
        config.validate()?;

        let mut connect_opts = ConnectOptions::new().name(config.name());
        if let Some(timeout) = config.connect_timeout() {
            connect_opts = connect_opts.connection_timeout(timeout);
        }
        if let Some(token) = &config.nats_token {
            connect_opts = connect_opts.token(token.clone());
        } else if let (Some(user), Some(password)) = (&config.nats_user, &config.nats_password) {
            connect_opts = connect_opts.user_and_password(user.clone(), password.clone());
        }

        let client = connect_opts
            .connect(config.nats_url.as_str())
            .await
            .map_err(|e| Error::connection(e.to_string()))?;

        let server_info = client.server_info();
        tracing::info!(
            target: TRACING_TARGET_CONNECTION,
            server_host = %server_info.host,
            server_version = %server_info.version,
            server_id = %server_info.server_id,
            "Connected to NATS"
        );

        let jetstream = jetstream::new(client.clone());
        Ok(Self {
            inner: Arc::new(NatsBrokerInner {
                client,
                jetstream,
                ack_wait: config.ack_wait(),
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Check if the client is connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        matches!(
            self.inner.client.connection_state(),
            async_nats::connection::State::Connected
        )
    }

    async fn declare_exchange(&self, topology: &Topology) -> Result<stream::Stream> {
        let jetstream = &self.inner.jetstream;

        match jetstream.get_stream(&topology.exchange).await {
            Ok(existing) => {
                let info = existing.cached_info();
                if info.config.subjects.contains(&topology.routing_key) {
                    tracing::debug!(
                        target: TRACING_TARGET_CONNECTION,
                        exchange = %topology.exchange,
                        "Using existing exchange"
                    );
                    return Ok(existing);
                }

                let mut config = info.config.clone();
                config.subjects.push(topology.routing_key.clone());
                tracing::info!(
                    target: TRACING_TARGET_CONNECTION,
                    exchange = %topology.exchange,
                    routing_key = %topology.routing_key,
                    "Binding routing key to existing exchange"
                );
                jetstream
                    .update_stream(config)
                    .await
                    .map_err(|e| Error::topology(&topology.exchange, e.to_string()))?;
                jetstream
                    .get_stream(&topology.exchange)
                    .await
                    .map_err(|e| Error::topology(&topology.exchange, e.to_string()))
            }
            Err(_) => {
                tracing::info!(
                    target: TRACING_TARGET_CONNECTION,
                    exchange = %topology.exchange,
                    routing_key = %topology.routing_key,
                    "Creating exchange"
                );
                let config = stream::Config {
                    name: topology.exchange.clone(),
                    description: Some(format!("Direct exchange {}", topology.exchange)),
                    subjects: vec![topology.routing_key.clone()],
                    retention: stream::RetentionPolicy::WorkQueue,
                    storage: stream::StorageType::File,
                    ..Default::default()
                };
                jetstream
                    .create_stream(config)
                    .await
                    .map_err(|e| Error::topology(&topology.exchange, e.to_string()))
            }
        }
    }
}

#[async_trait]
impl MessageBroker for NatsBroker {
    #[tracing::instrument(skip(self), target = TRACING_TARGET_CONNECTION)]
    async fn declare(&self, topology: &Topology) -> Result<()> {
        let exchange = self.declare_exchange(topology).await?;

        let consumer_config = pull::Config {
            durable_name: Some(topology.queue.clone()),
            description: Some(format!("Queue {} bound to {}", topology.queue, topology.routing_key)),
            filter_subject: topology.routing_key.clone(),
            ack_policy: AckPolicy::Explicit,
            ack_wait: self.inner.ack_wait,
            ..Default::default()
        };

        let _: PullConsumer = exchange
            .get_or_create_consumer(&topology.queue, consumer_config)
            .await
            .map_err(|e| Error::topology(&topology.exchange, e.to_string()))?;

        tracing::debug!(
            target: TRACING_TARGET_CONNECTION,
            exchange = %topology.exchange,
            queue = %topology.queue,
            routing_key = %topology.routing_key,
            "Topology declared"
        );
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: Bytes,
    ) -> Result<(), PublishError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(PublishError::ChannelClosed("broker handle was closed".into()));
        }
        if matches!(
            self.inner.client.connection_state(),
            async_nats::connection::State::Disconnected
        ) {
            return Err(PublishError::Unreachable("client is disconnected".into()));
        }

        // Restricts delivery to the named exchange, mirroring direct routing.
        let mut headers = HeaderMap::new();
        headers.insert(header::NATS_EXPECTED_STREAM, exchange);

        let ack = self
            .inner
            .jetstream
            .publish_with_headers(routing_key.to_owned(), headers, payload)
            .await?;
        let ack = ack.await?;

        tracing::trace!(
            target: TRACING_TARGET_PUBLISHER,
            exchange = %ack.stream,
            sequence = ack.sequence,
            "Publish acknowledged"
        );
        Ok(())
    }

    #[tracing::instrument(skip(self), target = TRACING_TARGET_CLIENT)]
    async fn subscribe(&self, topology: &Topology) -> Result<DeliveryStream> {
        let exchange = self
            .inner
            .jetstream
            .get_stream(&topology.exchange)
            .await
            .map_err(|e| Error::subscribe(&topology.queue, e.to_string()))?;
        let consumer: PullConsumer = exchange
            .get_consumer(&topology.queue)
            .await
            .map_err(|e| Error::subscribe(&topology.queue, e.to_string()))?;

        tracing::info!(
            target: TRACING_TARGET_CLIENT,
            queue = %topology.queue,
            "Consuming with manual acknowledgment"
        );

        // Pulls on demand: a message is requested only when the stream is
        // polled, so unacknowledged messages never wait in a client buffer
        // while their ack deadline runs.
        let state = (self.clone(), consumer, topology.queue.clone());
        let deliveries = futures::stream::unfold(state, |(broker, consumer, queue)| async move {
            loop {
                if broker.inner.closed.load(Ordering::Acquire) {
                    return None;
                }
                match fetch_one(&consumer, &queue).await {
                    Ok(Some(delivery)) => return Some((Ok(delivery), (broker, consumer, queue))),
                    Ok(None) => continue,
                    Err(err) => return Some((Err(err), (broker, consumer, queue))),
                }
            }
        });
        Ok(deliveries.boxed())
    }

    async fn flush(&self) -> Result<()> {
        self.inner
            .client
            .flush()
            .await
            .map_err(|e| Error::connection(e.to_string()))
    }

    async fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            tracing::debug!(target: TRACING_TARGET_CLIENT, "Broker already closed");
            return Ok(());
        }

        let flushed = self.flush().await;
        let drained = self
            .inner
            .client
            .drain()
            .await
            .map_err(|e| Error::connection(e.to_string()));
        tracing::info!(target: TRACING_TARGET_CLIENT, "Broker connection closed");
        flushed.and(drained)
    }
}

/// Requests a single message, waiting at most [`FETCH_EXPIRY`].
///
/// Returns `None` when the request expired without a message.
async fn fetch_one(consumer: &PullConsumer, queue: &str) -> Result<Option<Delivery>> {
    let mut batch = consumer
        .fetch()
        .max_messages(1)
        .expires(FETCH_EXPIRY)
        .messages()
        .await
        .map_err(|e| Error::subscribe(queue, e.to_string()))?;

    match batch.next().await {
        Some(message) => {
            let message = message.map_err(|e| Error::subscribe(queue, e.to_string()))?;
            into_delivery(queue, message).map(Some)
        }
        None => Ok(None),
    }
}

fn into_delivery(queue: &str, message: jetstream::Message) -> Result<Delivery> {
    let (tag, attempt) = {
        let info = message
            .info()
            .map_err(|e| Error::subscribe(queue, e.to_string()))?;
        (info.stream_sequence, u32::try_from(info.delivered).unwrap_or(u32::MAX))
    };

    let (message, acker) = message.split();
    Ok(Delivery::new(
        message.payload,
        message.subject.to_string(),
        tag,
        attempt,
        NatsAcknowledger { tag, acker },
    ))
}

struct NatsAcknowledger {
    tag: u64,
    acker: jetstream::message::Acker,
}

#[async_trait]
impl Acknowledger for NatsAcknowledger {
    async fn ack(&self) -> Result<()> {
        self.acker
            .ack()
            .await
            .map_err(|e| Error::settlement(self.tag, e.to_string()))
    }

    async fn nack(&self, requeue: bool) -> Result<()> {
        let kind = if requeue { AckKind::Nak(None) } else { AckKind::Term };
        self.acker
            .ack_with(kind)
            .await
            .map_err(|e| Error::settlement(self.tag, e.to_string()))
    }
}
