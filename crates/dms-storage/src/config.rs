//! Storage configuration types.

use std::path::PathBuf;
use std::time::Duration;

#[cfg(feature = "config")]
use clap::{Args, ValueEnum};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display};

use crate::{StorageError, StorageResult};

const DEFAULT_REGION: &str = "us-east-1";
const DEFAULT_SCHEME: &str = "minio";
const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Storage backend kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, AsRefStr, Display)]
#[cfg_attr(feature = "config", derive(ValueEnum))]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BackendType {
    /// S3-compatible object storage (MinIO, AWS S3, R2).
    #[default]
    S3,
    /// Local filesystem, one directory per bucket.
    Fs,
    /// Process memory.
    Memory,
}

fn default_region() -> String {
    DEFAULT_REGION.to_owned()
}

fn default_scheme() -> String {
    DEFAULT_SCHEME.to_owned()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

/// Object store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "config", derive(Args))]
pub struct StorageConfig {
    /// Storage backend
    #[cfg_attr(
        feature = "config",
        arg(long = "storage-backend", env = "STORAGE_BACKEND", value_enum, default_value_t = BackendType::S3)
    )]
    #[serde(default)]
    pub storage_backend: BackendType,

    /// Endpoint of the S3-compatible service, e.g. http://minio:9000
    #[cfg_attr(
        feature = "config",
        arg(long = "storage-endpoint", env = "STORAGE_ENDPOINT")
    )]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_endpoint: Option<String>,

    /// Region of the S3-compatible service
    #[cfg_attr(
        feature = "config",
        arg(long = "storage-region", env = "STORAGE_REGION", default_value = DEFAULT_REGION)
    )]
    #[serde(default = "default_region")]
    pub storage_region: String,

    /// Access key of the S3-compatible service
    #[cfg_attr(
        feature = "config",
        arg(long = "storage-access-key", env = "STORAGE_ACCESS_KEY")
    )]
    #[serde(default, skip_serializing)]
    pub storage_access_key: Option<String>,

    /// Secret key of the S3-compatible service
    #[cfg_attr(
        feature = "config",
        arg(long = "storage-secret-key", env = "STORAGE_SECRET_KEY")
    )]
    #[serde(default, skip_serializing)]
    pub storage_secret_key: Option<String>,

    /// Root directory of the filesystem backend
    #[cfg_attr(feature = "config", arg(long = "storage-root", env = "STORAGE_ROOT"))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_root: Option<PathBuf>,

    /// Scheme written into blob locators, e.g. `minio` in minio://uploads/a.pdf
    #[cfg_attr(
        feature = "config",
        arg(long = "storage-scheme", env = "STORAGE_SCHEME", default_value = DEFAULT_SCHEME)
    )]
    #[serde(default = "default_scheme")]
    pub storage_scheme: String,

    /// Time bound of a single storage operation in seconds
    #[cfg_attr(
        feature = "config",
        arg(long = "storage-timeout", env = "STORAGE_TIMEOUT_SECS", default_value_t = DEFAULT_TIMEOUT_SECS)
    )]
    #[serde(default = "default_timeout_secs")]
    pub storage_timeout_secs: u64,
}

impl StorageConfig {
    fn with_backend(backend: BackendType) -> Self {
        Self {
            storage_backend: backend,
            storage_endpoint: None,
            storage_region: default_region(),
            storage_access_key: None,
            storage_secret_key: None,
            storage_root: None,
            storage_scheme: default_scheme(),
            storage_timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    /// S3-compatible storage at `endpoint`.
    pub fn s3(endpoint: impl Into<String>) -> Self {
        Self {
            storage_endpoint: Some(endpoint.into()),
            ..Self::with_backend(BackendType::S3)
        }
    }

    /// Filesystem storage below `root`.
    pub fn fs(root: impl Into<PathBuf>) -> Self {
        Self {
            storage_root: Some(root.into()),
            ..Self::with_backend(BackendType::Fs)
        }
    }

    /// In-memory storage.
    pub fn memory() -> Self {
        Self::with_backend(BackendType::Memory)
    }

    /// Sets the access credentials.
    #[must_use]
    pub fn with_credentials(
        mut self,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Self {
        self.storage_access_key = Some(access_key.into());
        self.storage_secret_key = Some(secret_key.into());
        self
    }

    /// Returns the operation timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.storage_timeout_secs)
    }

    /// Validates the configuration for the selected backend.
    pub fn validate(&self) -> StorageResult<()> {
        if self.storage_scheme.trim().is_empty() {
            return Err(StorageError::init("locator scheme is empty"));
        }
        if self.storage_timeout_secs == 0 {
            return Err(StorageError::init("storage timeout must be positive"));
        }

        match self.storage_backend {
            BackendType::S3 => {
                if self.storage_endpoint.is_none() {
                    return Err(StorageError::init("s3 backend requires an endpoint"));
                }
                if self.storage_access_key.is_some() != self.storage_secret_key.is_some() {
                    return Err(StorageError::init(
                        "access key and secret key must be provided together",
                    ));
                }
            }
            BackendType::Fs => {
                if self.storage_root.is_none() {
                    return Err(StorageError::init("fs backend requires a root directory"));
                }
            }
            BackendType::Memory => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_requirements() {
        assert!(StorageConfig::memory().validate().is_ok());
        assert!(StorageConfig::fs("/tmp/dms").validate().is_ok());
        assert!(StorageConfig::s3("http://minio:9000").validate().is_ok());

        let mut config = StorageConfig::s3("http://minio:9000");
        config.storage_access_key = Some("minioadmin".into());
        assert!(config.validate().is_err());

        let mut config = StorageConfig::memory();
        config.storage_backend = BackendType::Fs;
        assert!(config.validate().is_err());
    }

    #[test]
    fn backend_names() {
        assert_eq!(BackendType::S3.as_ref(), "s3");
        assert_eq!(BackendType::Memory.to_string(), "memory");
    }
}
