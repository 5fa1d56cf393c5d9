//! Startup checks for the worker's external dependencies.

use dms_nats::RetryPolicy;
use dms_storage::ObjectStore;

use crate::{Result, TRACING_TARGET_STARTUP, WorkerError};

/// Waits until the object store answers, retrying per `policy`.
///
/// A missing `bucket` is reported but does not fail the check: the store is
/// reachable and the bucket may be provisioned later. Once the policy is
/// exhausted the last failure is returned as
/// [`WorkerError::StorageUnreachable`].
#[tracing::instrument(
    skip(store, policy),
    fields(max_attempts = policy.max_attempts),
    target = TRACING_TARGET_STARTUP
)]
pub async fn verify_store(store: &ObjectStore, bucket: &str, policy: RetryPolicy) -> Result<()> {
    let max_attempts = policy.max_attempts;
    if max_attempts == 0 {
        return Err(WorkerError::InvalidConfig(
            "retry policy allows no storage checks".into(),
        ));
    }

    let mut reason = String::new();
    for attempt in 1..=max_attempts {
        match store.bucket_exists(bucket).await {
            Ok(exists) => {
                if !exists {
                    tracing::warn!(
                        target: TRACING_TARGET_STARTUP,
                        bucket,
                        "Default bucket does not exist"
                    );
                }
                tracing::info!(
                    target: TRACING_TARGET_STARTUP,
                    attempt,
                    backend = %store.config().storage_backend,
                    "Object store reachable"
                );
                return Ok(());
            }
            Err(err) => {
                tracing::warn!(
                    target: TRACING_TARGET_STARTUP,
                    attempt,
                    max_attempts,
                    error = %err,
                    "Object store check failed"
                );
                reason = err.to_string();

                if attempt < max_attempts {
                    tokio::time::sleep(policy.delay).await;
                }
            }
        }
    }

    tracing::error!(
        target: TRACING_TARGET_STARTUP,
        attempts = max_attempts,
        error = %reason,
        "Giving up on object store"
    );
    Err(WorkerError::StorageUnreachable {
        attempts: max_attempts,
        reason,
    })
}
