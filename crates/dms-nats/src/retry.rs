//! Bounded connection retry for broker startup.

use std::future::Future;
use std::time::Duration;

use crate::{Error, MessageBroker, Result, TRACING_TARGET_CONNECTION, Topology};

/// Fixed-delay retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one.
    pub max_attempts: u32,
    /// Delay between two consecutive attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Create a new retry policy.
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }
}

/// Establishes the broker connection at process startup.
///
/// Each attempt connects and then declares every registered topology; a
/// failure in either step counts as a failed attempt. Once the policy is
/// exhausted the last failure is reported as [`Error::BrokerUnreachable`],
/// which callers treat as fatal.
#[derive(Debug, Clone, Default)]
pub struct ConnectionManager {
    policy: RetryPolicy,
    topologies: Vec<Topology>,
}

impl ConnectionManager {
    /// Creates a connection manager with the given retry policy.
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            topologies: Vec::new(),
        }
    }

    /// Registers a topology to declare after connecting.
    #[must_use]
    pub fn with_topology(mut self, topology: Topology) -> Self {
        if !self.topologies.contains(&topology) {
            self.topologies.push(topology);
        }
        self
    }

    /// Registers several topologies to declare after connecting.
    #[must_use]
    pub fn with_topologies(self, topologies: impl IntoIterator<Item = Topology>) -> Self {
        topologies.into_iter().fold(self, Self::with_topology)
    }

    /// Returns the retry policy.
    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Connects with `connect`, retrying per the policy.
    ///
    /// `connect` receives the 1-based attempt number and performs exactly one
    /// connection attempt.
    #[tracing::instrument(
        skip_all,
        fields(max_attempts = self.policy.max_attempts),
        target = TRACING_TARGET_CONNECTION
    )]
    pub async fn establish<B, F, Fut>(&self, mut connect: F) -> Result<B>
    where
        B: MessageBroker,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<B>>,
    {
        let max_attempts = self.policy.max_attempts;
        if max_attempts == 0 {
            return Err(Error::invalid_config(
                "retry policy allows no connection attempts",
            ));
        }

        let mut last_error = None;
        for attempt in 1..=max_attempts {
            match self.attempt(&mut connect, attempt).await {
                Ok(broker) => {
                    tracing::info!(
                        target: TRACING_TARGET_CONNECTION,
                        attempt,
                        topologies = self.topologies.len(),
                        "Broker connection established"
                    );
                    return Ok(broker);
                }
                Err(err) => {
                    tracing::warn!(
                        target: TRACING_TARGET_CONNECTION,
                        attempt,
                        max_attempts,
                        error = %err,
                        "Broker connection attempt failed"
                    );
                    last_error = Some(err);

                    if attempt < max_attempts {
                        tokio::time::sleep(self.policy.delay).await;
                    }
                }
            }
        }

        let reason = last_error.map(|e| e.to_string()).unwrap_or_default();
        tracing::error!(
            target: TRACING_TARGET_CONNECTION,
            attempts = max_attempts,
            error = %reason,
            "Giving up on broker connection"
        );
        Err(Error::BrokerUnreachable {
            attempts: max_attempts,
            reason,
        })
    }

    async fn attempt<B, F, Fut>(&self, connect: &mut F, attempt: u32) -> Result<B>
    where
        B: MessageBroker,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<B>>,
    {
        let broker = connect(attempt).await?;
        for topology in &self.topologies {
            broker.declare(topology).await?;
        }
        Ok(broker)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use tracing_test::traced_test;

    use super::*;
    use crate::MemoryBroker;

    fn flaky_connector(
        broker: MemoryBroker,
        failures: u32,
        calls: Arc<AtomicU32>,
    ) -> impl FnMut(u32) -> std::future::Ready<Result<MemoryBroker>> {
        move |_attempt| {
            let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
            std::future::ready(if call <= failures {
                Err(Error::connection("connection refused"))
            } else {
                Ok(broker.clone())
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_n_failures() {
        for failures in [0, 1, 4, 9] {
            let broker = MemoryBroker::new();
            let calls = Arc::new(AtomicU32::new(0));
            let manager = ConnectionManager::default().with_topology(Topology::ingestion());

            let connected = manager
                .establish(flaky_connector(broker.clone(), failures, calls.clone()))
                .await
                .unwrap();

            assert_eq!(calls.load(Ordering::SeqCst), failures + 1);
            assert_eq!(connected.declarations(), 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn waits_the_fixed_delay_between_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let manager = ConnectionManager::new(RetryPolicy::new(3, Duration::from_secs(5)));

        let started = tokio::time::Instant::now();
        manager
            .establish(flaky_connector(MemoryBroker::new(), 2, calls))
            .await
            .unwrap();
        assert_eq!(started.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn gives_up_after_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let manager = ConnectionManager::default();

        let err = manager
            .establish(flaky_connector(MemoryBroker::new(), u32::MAX, calls.clone()))
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 10);
        assert!(matches!(err, Error::BrokerUnreachable { attempts: 10, .. }));
        assert!(logs_contain("Broker connection attempt failed"));
        assert!(logs_contain("Giving up on broker connection"));
    }

    #[tokio::test(start_paused = true)]
    async fn declaration_is_repeatable_across_reconnects() {
        let broker = MemoryBroker::new();
        let manager = ConnectionManager::default()
            .with_topologies([Topology::ingestion(), Topology::completion()]);

        for _ in 0..2 {
            let calls = Arc::new(AtomicU32::new(0));
            manager
                .establish(flaky_connector(broker.clone(), 0, calls))
                .await
                .unwrap();
        }
        assert_eq!(broker.declarations(), 4);
    }

    #[tokio::test]
    async fn zero_attempts_is_a_configuration_error() {
        let manager = ConnectionManager::new(RetryPolicy::new(0, Duration::ZERO));
        let calls = Arc::new(AtomicU32::new(0));
        let err = manager
            .establish(flaky_connector(MemoryBroker::new(), 0, calls.clone()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidConfig { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
