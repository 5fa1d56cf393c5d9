//! Broker connection and topology configuration.

use std::time::Duration;

#[cfg(feature = "config")]
use clap::Args;
use serde::{Deserialize, Serialize};

use crate::topology::{
    COMPLETION_EXCHANGE, COMPLETION_QUEUE, COMPLETION_ROUTING_KEY, DEAD_LETTER_EXCHANGE,
    DEAD_LETTER_QUEUE, DEAD_LETTER_ROUTING_KEY, INGESTION_EXCHANGE, INGESTION_QUEUE,
    INGESTION_ROUTING_KEY,
};
use crate::{Error, Result, RetryPolicy, Topology};

// Default values
const DEFAULT_URL: &str = "nats://127.0.0.1:4222";
const DEFAULT_NAME: &str = "dms-worker";
const DEFAULT_ACK_WAIT_SECS: u64 = 300;
const DEFAULT_CONNECT_ATTEMPTS: u32 = 10;
const DEFAULT_CONNECT_DELAY_SECS: u64 = 5;

fn default_url() -> String {
    DEFAULT_URL.to_owned()
}

fn default_ack_wait_secs() -> u64 {
    DEFAULT_ACK_WAIT_SECS
}

fn default_connect_attempts() -> u32 {
    DEFAULT_CONNECT_ATTEMPTS
}

fn default_connect_delay_secs() -> u64 {
    DEFAULT_CONNECT_DELAY_SECS
}

/// Configuration for broker connections with sensible defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "config", derive(Args))]
pub struct NatsConfig {
    /// NATS server URL (comma-separated for clustering)
    #[cfg_attr(
        feature = "config",
        arg(long = "nats-url", env = "NATS_URL", default_value = DEFAULT_URL)
    )]
    #[serde(default = "default_url")]
    pub nats_url: String,

    /// Authentication token
    #[cfg_attr(feature = "config", arg(long = "nats-token", env = "NATS_TOKEN"))]
    #[serde(default)]
    pub nats_token: Option<String>,

    /// User name for user/password authentication
    #[cfg_attr(feature = "config", arg(long = "nats-user", env = "NATS_USER"))]
    #[serde(default)]
    pub nats_user: Option<String>,

    /// Password for user/password authentication
    #[cfg_attr(
        feature = "config",
        arg(long = "nats-password", env = "NATS_PASSWORD", requires = "nats_user")
    )]
    #[serde(default, skip_serializing)]
    pub nats_password: Option<String>,

    /// Client connection name for debugging and monitoring
    #[cfg_attr(
        feature = "config",
        arg(long = "nats-client-name", env = "NATS_CLIENT_NAME")
    )]
    #[serde(default)]
    pub nats_client_name: Option<String>,

    /// Timeout of a single connection attempt in seconds (optional)
    #[cfg_attr(
        feature = "config",
        arg(long = "nats-connect-timeout", env = "NATS_CONNECT_TIMEOUT_SECS")
    )]
    #[serde(default)]
    pub nats_connect_timeout: Option<u64>,

    /// Seconds an unsettled delivery stays invisible before the broker redelivers it
    #[cfg_attr(
        feature = "config",
        arg(
            long = "nats-ack-wait",
            env = "NATS_ACK_WAIT_SECS",
            default_value_t = DEFAULT_ACK_WAIT_SECS
        )
    )]
    #[serde(default = "default_ack_wait_secs")]
    pub nats_ack_wait_secs: u64,

    /// Number of connection attempts at startup before giving up
    #[cfg_attr(
        feature = "config",
        arg(
            long = "nats-connect-attempts",
            env = "NATS_CONNECT_ATTEMPTS",
            default_value_t = DEFAULT_CONNECT_ATTEMPTS
        )
    )]
    #[serde(default = "default_connect_attempts")]
    pub nats_connect_attempts: u32,

    /// Fixed delay between connection attempts in seconds
    #[cfg_attr(
        feature = "config",
        arg(
            long = "nats-connect-delay",
            env = "NATS_CONNECT_DELAY_SECS",
            default_value_t = DEFAULT_CONNECT_DELAY_SECS
        )
    )]
    #[serde(default = "default_connect_delay_secs")]
    pub nats_connect_delay_secs: u64,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self::new(DEFAULT_URL)
    }
}

impl NatsConfig {
    /// Create a new configuration for the given server URL.
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            nats_url: server_url.into(),
            nats_token: None,
            nats_user: None,
            nats_password: None,
            nats_client_name: None,
            nats_connect_timeout: None,
            nats_ack_wait_secs: DEFAULT_ACK_WAIT_SECS,
            nats_connect_attempts: DEFAULT_CONNECT_ATTEMPTS,
            nats_connect_delay_secs: DEFAULT_CONNECT_DELAY_SECS,
        }
    }

    /// Returns the client name, using the default if not set.
    #[inline]
    pub fn name(&self) -> &str {
        self.nats_client_name.as_deref().unwrap_or(DEFAULT_NAME)
    }

    /// Returns the connection timeout as a Duration, if set.
    #[inline]
    pub fn connect_timeout(&self) -> Option<Duration> {
        self.nats_connect_timeout.map(Duration::from_secs)
    }

    /// Returns the redelivery timeout for unsettled deliveries.
    #[inline]
    pub fn ack_wait(&self) -> Duration {
        Duration::from_secs(self.nats_ack_wait_secs)
    }

    /// Returns the startup connection retry policy.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.nats_connect_attempts,
            Duration::from_secs(self.nats_connect_delay_secs),
        )
    }

    /// Set the authentication token.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.nats_token = Some(token.into());
        self
    }

    /// Set user/password credentials.
    #[must_use]
    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.nats_user = Some(user.into());
        self.nats_password = Some(password.into());
        self
    }

    /// Set the client connection name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.nats_client_name = Some(name.into());
        self
    }

    /// Set the connection retry policy.
    #[must_use]
    pub fn with_retry(mut self, attempts: u32, delay_secs: u64) -> Self {
        self.nats_connect_attempts = attempts;
        self.nats_connect_delay_secs = delay_secs;
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.nats_url.trim().is_empty() {
            return Err(Error::invalid_config("NATS URL is empty"));
        }
        if self.nats_connect_attempts == 0 {
            return Err(Error::invalid_config(
                "at least one connection attempt is required",
            ));
        }
        if self.nats_ack_wait_secs == 0 {
            return Err(Error::invalid_config("ack wait must be positive"));
        }
        if self.nats_token.is_some() && self.nats_user.is_some() {
            return Err(Error::invalid_config(
                "token and user/password authentication are mutually exclusive",
            ));
        }
        if self.nats_user.is_some() != self.nats_password.is_some() {
            return Err(Error::invalid_config(
                "user and password must be provided together",
            ));
        }
        Ok(())
    }
}

/// Names of the exchanges, queues and routing keys of every pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "config", derive(Args))]
#[serde(default)]
pub struct TopologyConfig {
    /// Exchange receiving document notices
    #[cfg_attr(
        feature = "config",
        arg(long = "ingestion-exchange", env = "DMS_EXCHANGE", default_value = INGESTION_EXCHANGE)
    )]
    pub ingestion_exchange: String,

    /// Queue consumed by the OCR worker
    #[cfg_attr(
        feature = "config",
        arg(long = "ingestion-queue", env = "DMS_QUEUE", default_value = INGESTION_QUEUE)
    )]
    pub ingestion_queue: String,

    /// Routing key of document notices
    #[cfg_attr(
        feature = "config",
        arg(long = "ingestion-routing-key", env = "DMS_ROUTING_KEY", default_value = INGESTION_ROUTING_KEY)
    )]
    pub ingestion_routing_key: String,

    /// Exchange receiving OCR completion events
    #[cfg_attr(
        feature = "config",
        arg(long = "completion-exchange", env = "OCR_EXCHANGE", default_value = COMPLETION_EXCHANGE)
    )]
    pub completion_exchange: String,

    /// Queue holding OCR completion events
    #[cfg_attr(
        feature = "config",
        arg(long = "completion-queue", env = "OCR_QUEUE", default_value = COMPLETION_QUEUE)
    )]
    pub completion_queue: String,

    /// Routing key of OCR completion events
    #[cfg_attr(
        feature = "config",
        arg(long = "completion-routing-key", env = "OCR_ROUTING_KEY", default_value = COMPLETION_ROUTING_KEY)
    )]
    pub completion_routing_key: String,

    /// Exchange receiving dead-lettered messages
    #[cfg_attr(
        feature = "config",
        arg(long = "dead-letter-exchange", env = "DMS_DEAD_LETTER_EXCHANGE", default_value = DEAD_LETTER_EXCHANGE)
    )]
    pub dead_letter_exchange: String,

    /// Queue holding dead-lettered messages
    #[cfg_attr(
        feature = "config",
        arg(long = "dead-letter-queue", env = "DMS_DEAD_LETTER_QUEUE", default_value = DEAD_LETTER_QUEUE)
    )]
    pub dead_letter_queue: String,

    /// Routing key of dead-lettered messages
    #[cfg_attr(
        feature = "config",
        arg(long = "dead-letter-routing-key", env = "DMS_DEAD_LETTER_ROUTING_KEY", default_value = DEAD_LETTER_ROUTING_KEY)
    )]
    pub dead_letter_routing_key: String,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            ingestion_exchange: INGESTION_EXCHANGE.to_owned(),
            ingestion_queue: INGESTION_QUEUE.to_owned(),
            ingestion_routing_key: INGESTION_ROUTING_KEY.to_owned(),
            completion_exchange: COMPLETION_EXCHANGE.to_owned(),
            completion_queue: COMPLETION_QUEUE.to_owned(),
            completion_routing_key: COMPLETION_ROUTING_KEY.to_owned(),
            dead_letter_exchange: DEAD_LETTER_EXCHANGE.to_owned(),
            dead_letter_queue: DEAD_LETTER_QUEUE.to_owned(),
            dead_letter_routing_key: DEAD_LETTER_ROUTING_KEY.to_owned(),
        }
    }
}

impl TopologyConfig {
    /// Returns the ingestion pipeline topology.
    pub fn ingestion(&self) -> Result<Topology> {
        Topology::new(
            &self.ingestion_exchange,
            &self.ingestion_queue,
            &self.ingestion_routing_key,
        )
    }

    /// Returns the completion pipeline topology.
    pub fn completion(&self) -> Result<Topology> {
        Topology::new(
            &self.completion_exchange,
            &self.completion_queue,
            &self.completion_routing_key,
        )
    }

    /// Returns the dead-letter pipeline topology.
    pub fn dead_letter(&self) -> Result<Topology> {
        Topology::new(
            &self.dead_letter_exchange,
            &self.dead_letter_queue,
            &self.dead_letter_routing_key,
        )
    }

    /// Returns every pipeline topology, in declaration order.
    pub fn all(&self) -> Result<Vec<Topology>> {
        Ok(vec![self.ingestion()?, self.completion()?, self.dead_letter()?])
    }
}
