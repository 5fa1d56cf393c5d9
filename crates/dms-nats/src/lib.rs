#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

/// Tracing target for NATS client operations.
///
/// Use this target for logging client initialization, configuration, and client-level errors.
pub const TRACING_TARGET_CLIENT: &str = "dms_nats::client";

/// Tracing target for NATS connection operations.
///
/// Use this target for logging connection attempts, retries, and topology declaration.
pub const TRACING_TARGET_CONNECTION: &str = "dms_nats::connection";

/// Tracing target for publishing.
pub const TRACING_TARGET_PUBLISHER: &str = "dms_nats::publisher";

/// Tracing target for consumption and settlement of deliveries.
pub const TRACING_TARGET_STREAM: &str = "dms_nats::stream";

mod broker;
mod config;
mod delivery;
mod error;
mod publisher;
mod retry;
mod topology;

pub use broker::{MemoryBroker, MessageBroker, NatsBroker, Settlement};
pub use config::{NatsConfig, TopologyConfig};
pub use delivery::{Acknowledger, Delivery, DeliveryStream};
pub use error::{Error, PublishError, Result};
pub use publisher::Publisher;
pub use retry::{ConnectionManager, RetryPolicy};
pub use topology::Topology;
