//! In-process broker.
//!
//! Behaves like a broker with direct exchanges and durable queues held in
//! memory: routing is by exact routing key, unsettled deliveries stay in
//! flight until acked or nacked, and a requeued message goes back to the head
//! of its queue with its delivery count preserved. Every settlement is
//! recorded so tests can assert on it.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::Notify;

use super::MessageBroker;
use crate::delivery::{Acknowledger, Delivery, DeliveryStream};
use crate::{Error, PublishError, Result, TRACING_TARGET_CLIENT, Topology};

/// How a delivery was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Ack { tag: u64 },
    Nack { tag: u64, requeue: bool },
}

impl Settlement {
    /// Returns the delivery tag that was settled.
    pub fn tag(&self) -> u64 {
        match self {
            Self::Ack { tag } | Self::Nack { tag, .. } => *tag,
        }
    }
}

#[derive(Debug, Clone)]
struct Envelope {
    payload: Bytes,
    routing_key: String,
    deliveries: u32,
}

#[derive(Debug)]
struct InFlight {
    queue: String,
    envelope: Envelope,
}

#[derive(Debug, Default)]
struct State {
    /// Exchange name to `(routing key, queue)` bindings.
    exchanges: HashMap<String, Vec<(String, String)>>,
    queues: HashMap<String, VecDeque<Envelope>>,
    in_flight: HashMap<u64, InFlight>,
    settlements: Vec<Settlement>,
    next_tag: u64,
    declarations: usize,
    closed: bool,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<State>,
    notify: Notify,
}

/// Broker that keeps exchanges and queues in process memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    shared: Arc<Shared>,
}

impl MemoryBroker {
    /// Creates an empty broker.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns how many times a topology was declared.
    pub fn declarations(&self) -> usize {
        self.state().declarations
    }

    /// Returns the number of ready (not in-flight) messages in a queue.
    pub fn queue_depth(&self, queue: &str) -> usize {
        self.state().queues.get(queue).map_or(0, VecDeque::len)
    }

    /// Returns the number of delivered but unsettled messages.
    pub fn in_flight(&self) -> usize {
        self.state().in_flight.len()
    }

    /// Returns the payloads of the ready messages of a queue, head first.
    pub fn queued_payloads(&self, queue: &str) -> Vec<Bytes> {
        self.state()
            .queues
            .get(queue)
            .map(|messages| messages.iter().map(|m| m.payload.clone()).collect())
            .unwrap_or_default()
    }

    /// Returns every settlement recorded so far, in order.
    pub fn settlements(&self) -> Vec<Settlement> {
        self.state().settlements.clone()
    }

    /// Returns every unsettled in-flight message to the head of its queue,
    /// as a broker does when a consumer's channel goes away.
    pub fn recover(&self) {
        let mut state = self.state();
        let mut in_flight: Vec<_> = state.in_flight.drain().collect();
        in_flight.sort_by_key(|(tag, _)| std::cmp::Reverse(*tag));
        for (_, message) in in_flight {
            state
                .queues
                .entry(message.queue)
                .or_default()
                .push_front(message.envelope);
        }
        drop(state);
        self.shared.notify.notify_waiters();
    }

    fn take(&self, queue: &str) -> Option<Delivery> {
        let mut state = self.state();
        let mut envelope = state.queues.get_mut(queue)?.pop_front()?;
        envelope.deliveries += 1;
        state.next_tag += 1;
        let tag = state.next_tag;

        let delivery = Delivery::new(
            envelope.payload.clone(),
            envelope.routing_key.clone(),
            tag,
            envelope.deliveries,
            MemoryAcknowledger {
                broker: self.clone(),
                tag,
            },
        );
        state.in_flight.insert(
            tag,
            InFlight {
                queue: queue.to_owned(),
                envelope,
            },
        );
        Some(delivery)
    }

    fn settle(&self, settlement: Settlement) -> Result<()> {
        let mut state = self.state();
        let tag = settlement.tag();
        let Some(message) = state.in_flight.remove(&tag) else {
            return Err(Error::settlement(tag, "unknown or already settled delivery tag"));
        };
        state.settlements.push(settlement);

        if let Settlement::Nack { requeue: true, .. } = settlement {
            state
                .queues
                .entry(message.queue)
                .or_default()
                .push_front(message.envelope);
            drop(state);
            self.shared.notify.notify_waiters();
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.state().closed
    }
}

#[async_trait]
impl MessageBroker for MemoryBroker {
    async fn declare(&self, topology: &Topology) -> Result<()> {
        let mut state = self.state();
        if state.closed {
            return Err(Error::Closed);
        }

        let binding = (topology.routing_key.clone(), topology.queue.clone());
        let bindings = state.exchanges.entry(topology.exchange.clone()).or_default();
        if !bindings.contains(&binding) {
            bindings.push(binding);
        }
        state.queues.entry(topology.queue.clone()).or_default();
        state.declarations += 1;
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: Bytes,
    ) -> Result<(), PublishError> {
        let mut state = self.state();
        if state.closed {
            return Err(PublishError::ChannelClosed("broker was closed".into()));
        }

        let Some(bindings) = state.exchanges.get(exchange) else {
            return Err(PublishError::Interrupted(format!(
                "no exchange '{exchange}'"
            )));
        };
        let targets: Vec<String> = bindings
            .iter()
            .filter(|(key, _)| key == routing_key)
            .map(|(_, queue)| queue.clone())
            .collect();

        if targets.is_empty() {
            tracing::debug!(
                target: TRACING_TARGET_CLIENT,
                exchange,
                routing_key,
                "Message unroutable, dropped"
            );
        }
        for queue in targets {
            state.queues.entry(queue).or_default().push_back(Envelope {
                payload: payload.clone(),
                routing_key: routing_key.to_owned(),
                deliveries: 0,
            });
        }
        drop(state);
        self.shared.notify.notify_waiters();
        Ok(())
    }

    async fn subscribe(&self, topology: &Topology) -> Result<DeliveryStream> {
        {
            let state = self.state();
            if state.closed {
                return Err(Error::Closed);
            }
            if !state.queues.contains_key(&topology.queue) {
                return Err(Error::subscribe(&topology.queue, "queue not declared"));
            }
        }

        let queue = topology.queue.clone();
        let deliveries = futures::stream::unfold(self.clone(), move |broker| {
            let queue = queue.clone();
            async move {
                loop {
                    let shared = Arc::clone(&broker.shared);
                    let mut notified = std::pin::pin!(shared.notify.notified());
                    notified.as_mut().enable();

                    if broker.is_closed() {
                        return None;
                    }
                    if let Some(delivery) = broker.take(&queue) {
                        return Some((Ok(delivery), broker));
                    }
                    notified.await;
                }
            }
        });
        Ok(deliveries.boxed())
    }

    async fn flush(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.state().closed = true;
        self.shared.notify.notify_waiters();
        Ok(())
    }
}

struct MemoryAcknowledger {
    broker: MemoryBroker,
    tag: u64,
}

#[async_trait]
impl Acknowledger for MemoryAcknowledger {
    async fn ack(&self) -> Result<()> {
        self.broker.settle(Settlement::Ack { tag: self.tag })
    }

    async fn nack(&self, requeue: bool) -> Result<()> {
        self.broker.settle(Settlement::Nack {
            tag: self.tag,
            requeue,
        })
    }
}
