//! Worker configuration.

#[cfg(feature = "config")]
use clap::Args;
use serde::{Deserialize, Serialize};

use crate::{Result, WorkerError};

/// Default number of deliveries processed at once.
pub const DEFAULT_CONCURRENCY: usize = 1;

/// Default delivery count after which a failing message is dead-lettered.
pub const DEFAULT_MAX_DELIVERIES: u32 = 5;

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_max_deliveries() -> u32 {
    DEFAULT_MAX_DELIVERIES
}

/// Dispatcher behavior settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "config", derive(Args))]
pub struct WorkerConfig {
    /// Maximum number of deliveries processed simultaneously
    #[cfg_attr(
        feature = "config",
        arg(long = "worker-concurrency", env = "WORKER_CONCURRENCY", default_value_t = DEFAULT_CONCURRENCY)
    )]
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Delivery count at which a failing message is dead-lettered
    #[cfg_attr(
        feature = "config",
        arg(long = "worker-max-deliveries", env = "WORKER_MAX_DELIVERIES", default_value_t = DEFAULT_MAX_DELIVERIES)
    )]
    #[serde(default = "default_max_deliveries")]
    pub max_deliveries: u32,

    /// Name identifying this worker instance in logs (generated when unset)
    #[cfg_attr(
        feature = "config",
        arg(long = "worker-consumer-name", env = "WORKER_CONSUMER_NAME")
    )]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumer_name: Option<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            max_deliveries: DEFAULT_MAX_DELIVERIES,
            consumer_name: None,
        }
    }
}

impl WorkerConfig {
    /// Sets the concurrency limit.
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Sets the redelivery cap.
    #[must_use]
    pub fn with_max_deliveries(mut self, max_deliveries: u32) -> Self {
        self.max_deliveries = max_deliveries;
        self
    }

    /// Sets the consumer name.
    #[must_use]
    pub fn with_consumer_name(mut self, name: impl Into<String>) -> Self {
        self.consumer_name = Some(name.into());
        self
    }

    /// Returns the configured consumer name or a freshly generated one.
    pub fn resolve_consumer_name(&self) -> String {
        self.consumer_name
            .clone()
            .unwrap_or_else(|| format!("dms-worker-{}", uuid::Uuid::now_v7().simple()))
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(WorkerError::InvalidConfig(
                "concurrency must be at least 1".into(),
            ));
        }
        if self.max_deliveries == 0 {
            return Err(WorkerError::InvalidConfig(
                "max deliveries must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.concurrency, 1);
        assert_eq!(config.max_deliveries, 5);
        assert!(config.validate().is_ok());
        assert!(config.resolve_consumer_name().starts_with("dms-worker-"));
    }

    #[test]
    fn rejects_zero_limits() {
        assert!(WorkerConfig::default().with_concurrency(0).validate().is_err());
        assert!(WorkerConfig::default().with_max_deliveries(0).validate().is_err());
    }

    #[test]
    fn deserializes_with_defaults() {
        let config: WorkerConfig = serde_json::from_str(r#"{"concurrency":4}"#).unwrap();
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.max_deliveries, 5);
        assert_eq!(config.consumer_name, None);
    }
}
