//! Object store client.

use std::collections::HashMap;
use std::future::IntoFuture;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use bytes::Bytes;
use opendal::{Operator, services};

use crate::TRACING_TARGET;
use crate::config::{BackendType, StorageConfig};
use crate::error::{StorageError, StorageResult};

/// Bucket/key object store backed by OpenDAL operators.
///
/// Cloning is cheap; clones share the operator cache.
#[derive(Debug, Clone)]
pub struct ObjectStore {
    config: Arc<StorageConfig>,
    operators: Arc<RwLock<HashMap<String, Operator>>>,
}

impl ObjectStore {
    /// Creates an object store from configuration.
    pub fn new(config: StorageConfig) -> StorageResult<Self> {
        config.validate()?;

        tracing::info!(
            target: TRACING_TARGET,
            backend = %config.storage_backend,
            endpoint = ?config.storage_endpoint,
            root = ?config.storage_root,
            "Object store initialized"
        );

        Ok(Self {
            config: Arc::new(config),
            operators: Arc::default(),
        })
    }

    /// Creates an empty in-memory object store.
    pub fn memory() -> Self {
        Self {
            config: Arc::new(StorageConfig::memory()),
            operators: Arc::default(),
        }
    }

    /// Returns the configuration of this store.
    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Returns the scheme used in locators of blobs held by this store.
    pub fn scheme(&self) -> &str {
        &self.config.storage_scheme
    }

    /// Checks whether a bucket exists.
    pub async fn bucket_exists(&self, bucket: &str) -> StorageResult<bool> {
        validate_bucket(bucket)?;

        match self.config.storage_backend {
            BackendType::Memory => Ok(self.cached(bucket).is_some()),
            BackendType::Fs => {
                let path = self.bucket_dir(bucket)?;
                Ok(tokio::fs::try_exists(path).await?)
            }
            BackendType::S3 => {
                let operator = self.operator(bucket)?;
                match self.bounded("bucket_exists", operator.check()).await {
                    Ok(()) => Ok(true),
                    Err(StorageError::NotFound(_)) => Ok(false),
                    Err(err) => Err(err),
                }
            }
        }
    }

    /// Creates a bucket.
    ///
    /// Creating a bucket that already exists is not an error.
    #[tracing::instrument(skip(self), target = TRACING_TARGET)]
    pub async fn create_bucket(&self, bucket: &str) -> StorageResult<()> {
        validate_bucket(bucket)?;

        match self.config.storage_backend {
            BackendType::Memory => {
                self.operator(bucket)?;
            }
            BackendType::Fs => {
                tokio::fs::create_dir_all(self.bucket_dir(bucket)?).await?;
            }
            BackendType::S3 => {
                return Err(StorageError::unsupported(format!(
                    "bucket '{bucket}' must be provisioned on the storage service"
                )));
            }
        }

        tracing::info!(target: TRACING_TARGET, bucket, "Bucket created");
        Ok(())
    }

    /// Creates the bucket unless it already exists.
    pub async fn ensure_bucket(&self, bucket: &str) -> StorageResult<()> {
        if self.bucket_exists(bucket).await? {
            return Ok(());
        }
        self.create_bucket(bucket).await
    }

    /// Reads an object.
    #[tracing::instrument(skip(self), target = TRACING_TARGET)]
    pub async fn get(&self, bucket: &str, key: &str) -> StorageResult<Bytes> {
        validate_key(key)?;
        let operator = self.existing_operator(bucket).await?;

        let data = self
            .bounded("get", operator.read(key))
            .await
            .map_err(|err| match err {
                StorageError::NotFound(_) => StorageError::NotFound(format!("{bucket}/{key}")),
                other => other,
            })?
            .to_bytes();

        tracing::debug!(
            target: TRACING_TARGET,
            bucket,
            key,
            size = data.len(),
            "Object read"
        );
        Ok(data)
    }

    /// Writes an object with the given content type.
    #[tracing::instrument(skip(self, data), fields(size = data.len()), target = TRACING_TARGET)]
    pub async fn put(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        content_type: &str,
    ) -> StorageResult<()> {
        validate_key(key)?;
        let operator = self.existing_operator(bucket).await?;

        if operator.info().full_capability().write_with_content_type {
            self.bounded(
                "put",
                operator.write_with(key, data).content_type(content_type),
            )
            .await?;
        } else {
            self.bounded("put", operator.write(key, data)).await?;
        }

        tracing::debug!(target: TRACING_TARGET, bucket, key, content_type, "Object written");
        Ok(())
    }

    /// Deletes an object. Deleting a missing object is not an error.
    #[tracing::instrument(skip(self), target = TRACING_TARGET)]
    pub async fn delete(&self, bucket: &str, key: &str) -> StorageResult<()> {
        validate_key(key)?;
        let operator = self.existing_operator(bucket).await?;
        self.bounded("delete", operator.delete(key)).await?;

        tracing::debug!(target: TRACING_TARGET, bucket, key, "Object deleted");
        Ok(())
    }

    async fn bounded<T, F>(&self, operation: &'static str, future: F) -> StorageResult<T>
    where
        F: IntoFuture<Output = opendal::Result<T>>,
    {
        let timeout = self.config.timeout();
        match tokio::time::timeout(timeout, future).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(StorageError::Timeout { operation, timeout }),
        }
    }

    /// Returns the bucket's operator, failing when the bucket is known to be missing.
    async fn existing_operator(&self, bucket: &str) -> StorageResult<Operator> {
        validate_bucket(bucket)?;
        match self.config.storage_backend {
            BackendType::Memory => self
                .cached(bucket)
                .ok_or_else(|| StorageError::BucketNotFound(bucket.to_owned())),
            BackendType::Fs if !self.bucket_exists(bucket).await? => {
                Err(StorageError::BucketNotFound(bucket.to_owned()))
            }
            BackendType::Fs | BackendType::S3 => self.operator(bucket),
        }
    }

    fn cached(&self, bucket: &str) -> Option<Operator> {
        let operators = self
            .operators
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        operators.get(bucket).cloned()
    }

    fn operator(&self, bucket: &str) -> StorageResult<Operator> {
        if let Some(operator) = self.cached(bucket) {
            return Ok(operator);
        }

        let operator = self.build_operator(bucket)?;
        let mut operators = self
            .operators
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(operators
            .entry(bucket.to_owned())
            .or_insert(operator)
            .clone())
    }

    fn build_operator(&self, bucket: &str) -> StorageResult<Operator> {
        let config = &self.config;
        let operator = match config.storage_backend {
            BackendType::S3 => {
                let mut builder = services::S3::default()
                    .bucket(bucket)
                    .region(&config.storage_region);
                if let Some(endpoint) = &config.storage_endpoint {
                    builder = builder.endpoint(endpoint);
                }
                if let (Some(access_key), Some(secret_key)) =
                    (&config.storage_access_key, &config.storage_secret_key)
                {
                    builder = builder
                        .access_key_id(access_key)
                        .secret_access_key(secret_key);
                }
                Operator::new(builder)?.finish()
            }
            BackendType::Fs => {
                let root = self.bucket_dir(bucket)?;
                let root = root
                    .to_str()
                    .ok_or_else(|| StorageError::invalid_path("root is not valid UTF-8"))?;
                Operator::new(services::Fs::default().root(root))?.finish()
            }
            BackendType::Memory => Operator::new(services::Memory::default())?.finish(),
        };
        Ok(operator)
    }

    fn bucket_dir(&self, bucket: &str) -> StorageResult<PathBuf> {
        let root = self
            .config
            .storage_root
            .as_ref()
            .ok_or_else(|| StorageError::init("fs backend requires a root directory"))?;
        Ok(root.join(bucket))
    }
}

fn validate_bucket(bucket: &str) -> StorageResult<()> {
    if bucket.is_empty() || bucket.contains(['/', '\\']) || bucket == "." || bucket == ".." {
        return Err(StorageError::invalid_path(format!(
            "invalid bucket name '{bucket}'"
        )));
    }
    Ok(())
}

fn validate_key(key: &str) -> StorageResult<()> {
    if key.is_empty() || key.ends_with('/') || key.split('/').any(|part| part == "..") {
        return Err(StorageError::invalid_path(format!("invalid object key '{key}'")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use dms_core::ErrorKind;

    use super::*;

    #[tokio::test]
    async fn memory_round_trip() {
        let store = ObjectStore::memory();
        assert!(!store.bucket_exists("uploads").await.unwrap());
        store.ensure_bucket("uploads").await.unwrap();
        store.ensure_bucket("uploads").await.unwrap();
        assert!(store.bucket_exists("uploads").await.unwrap());

        store
            .put("uploads", "7/report.pdf", Bytes::from_static(b"%PDF"), "application/pdf")
            .await
            .unwrap();
        let data = store.get("uploads", "7/report.pdf").await.unwrap();
        assert_eq!(data.as_ref(), b"%PDF");

        store.delete("uploads", "7/report.pdf").await.unwrap();
        store.delete("uploads", "7/report.pdf").await.unwrap();
        let err = store.get("uploads", "7/report.pdf").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn missing_bucket_is_not_found() {
        let store = ObjectStore::memory();
        let err = store.get("nowhere", "a.pdf").await.unwrap_err();
        assert!(matches!(err, StorageError::BucketNotFound(_)));
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn rejects_invalid_paths() {
        let store = ObjectStore::memory();
        store.create_bucket("uploads").await.unwrap();
        for key in ["", "dir/", "../escape.pdf"] {
            let err = store.get("uploads", key).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidInput, "{key}");
        }
        assert!(store.create_bucket("a/b").await.is_err());
    }

    #[tokio::test]
    async fn filesystem_buckets_are_directories() {
        let root = tempfile::tempdir().unwrap();
        let store = ObjectStore::new(StorageConfig::fs(root.path())).unwrap();

        assert!(store.get("uploads", "a.txt").await.is_err());
        store.ensure_bucket("uploads").await.unwrap();
        assert!(root.path().join("uploads").is_dir());

        store
            .put("uploads", "a.txt", Bytes::from_static(b"hello"), "text/plain")
            .await
            .unwrap();
        assert_eq!(
            std::fs::read(root.path().join("uploads").join("a.txt")).unwrap(),
            b"hello"
        );
        assert_eq!(store.get("uploads", "a.txt").await.unwrap().as_ref(), b"hello");
    }

    #[tokio::test]
    async fn s3_buckets_are_provisioned_externally() {
        let store = ObjectStore::new(StorageConfig::s3("http://127.0.0.1:9000")).unwrap();
        let err = store.create_bucket("uploads").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);
    }
}
