//! Upload side: store a document, then announce it.

use bytes::Bytes;
use dms_core::message::DocumentNotice;
use dms_core::{DocumentReference, Error, StorageLocator};
use dms_nats::{PublishError, Publisher};
use dms_storage::ObjectStore;

use crate::{Result, TRACING_TARGET_INGEST};

/// Result of a successful ingestion.
#[derive(Debug)]
pub struct Receipt {
    /// Reference to the stored document.
    pub reference: DocumentReference,
    /// Outcome of the notice publish. A failure here leaves the blob stored
    /// without a processing notice.
    pub notification: std::result::Result<(), PublishError>,
}

impl Receipt {
    /// Returns `true` when the processing notice was published.
    pub fn is_notified(&self) -> bool {
        self.notification.is_ok()
    }
}

/// Stores uploaded documents and publishes their processing notices.
#[derive(Debug, Clone)]
pub struct Ingestor {
    store: ObjectStore,
    publisher: Publisher,
    bucket: String,
    scheme: String,
    routing_key: String,
}

impl Ingestor {
    /// Creates an ingestor writing into `bucket` and announcing with `routing_key`.
    ///
    /// `scheme` is the prefix of the locators handed to consumers.
    pub fn new(
        store: ObjectStore,
        publisher: Publisher,
        bucket: impl Into<String>,
        scheme: impl Into<String>,
        routing_key: impl Into<String>,
    ) -> Self {
        Self {
            store,
            publisher,
            bucket: bucket.into(),
            scheme: scheme.into(),
            routing_key: routing_key.into(),
        }
    }

    /// Stores `data` under `<id>/<name>` and publishes its notice.
    #[tracing::instrument(skip(self, data), fields(size = data.len()), target = TRACING_TARGET_INGEST)]
    pub async fn ingest(&self, id: i64, name: &str, data: Bytes) -> Result<Receipt> {
        if name.contains(['/', '\\']) {
            return Err(Error::invalid_input()
                .with_message(format!("document name '{name}' contains a path separator"))
                .into());
        }

        let locator = StorageLocator::new(&self.scheme, &self.bucket, format!("{id}/{name}"))?;
        let reference = DocumentReference::new(id, name, locator.to_string())?;

        self.store.ensure_bucket(&self.bucket).await?;
        self.store
            .put(
                locator.bucket(),
                locator.key(),
                data,
                reference.file_type().content_type(),
            )
            .await?;

        tracing::info!(
            target: TRACING_TARGET_INGEST,
            document_id = id,
            locator = %locator,
            "Document stored"
        );

        let notice = DocumentNotice::new(reference.storage_locator()).with_document_id(id);
        let notification = match notice.encode() {
            Ok(payload) => self.publisher.publish(payload, &self.routing_key).await,
            Err(err) => Err(PublishError::from(err)),
        };

        if let Err(err) = &notification {
            tracing::warn!(
                target: TRACING_TARGET_INGEST,
                document_id = id,
                locator = %locator,
                class = err.class(),
                "Document stored without processing notice"
            );
        }

        Ok(Receipt {
            reference,
            notification,
        })
    }

    /// Deletes the blob of a document.
    ///
    /// Metadata removal does not depend on this; failures are logged and
    /// returned for the caller to record.
    #[tracing::instrument(skip(self), fields(document_id = reference.id()), target = TRACING_TARGET_INGEST)]
    pub async fn remove(&self, reference: &DocumentReference) -> Result<()> {
        let result = self.delete_blob(reference).await;
        match &result {
            Ok(()) => tracing::info!(
                target: TRACING_TARGET_INGEST,
                document_id = reference.id(),
                locator = reference.storage_locator(),
                "Document blob deleted"
            ),
            Err(err) => tracing::warn!(
                target: TRACING_TARGET_INGEST,
                document_id = reference.id(),
                locator = reference.storage_locator(),
                error = %err,
                "Failed to delete document blob"
            ),
        }
        result
    }

    async fn delete_blob(&self, reference: &DocumentReference) -> Result<()> {
        let locator: StorageLocator = reference.storage_locator().parse()?;
        self.store.delete(locator.bucket(), locator.key()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use dms_core::ErrorKind;
    use dms_nats::{MemoryBroker, MessageBroker, Topology};
    use tracing_test::traced_test;

    use super::*;

    async fn setup() -> (MemoryBroker, ObjectStore, Ingestor) {
        let broker = MemoryBroker::new();
        let topology = Topology::ingestion();
        broker.declare(&topology).await.unwrap();

        let store = ObjectStore::memory();
        let publisher = Publisher::new(Arc::new(broker.clone()), &topology.exchange);
        let ingestor = Ingestor::new(
            store.clone(),
            publisher,
            "uploads",
            "minio",
            &topology.routing_key,
        );
        (broker, store, ingestor)
    }

    #[tokio::test]
    async fn stores_blob_and_publishes_notice() {
        let (broker, store, ingestor) = setup().await;

        let receipt = ingestor
            .ingest(7, "report.pdf", Bytes::from_static(b"%PDF-1.7"))
            .await
            .unwrap();
        assert!(receipt.is_notified());
        assert_eq!(receipt.reference.storage_locator(), "minio://uploads/7/report.pdf");

        let blob = store.get("uploads", "7/report.pdf").await.unwrap();
        assert_eq!(blob.as_ref(), b"%PDF-1.7");

        let payloads = broker.queued_payloads("dms_queue");
        let notice = DocumentNotice::decode(&payloads[0]).unwrap();
        assert_eq!(notice.document_id, Some(7));
        assert_eq!(notice.locator, "minio://uploads/7/report.pdf");
    }

    #[tokio::test]
    #[traced_test]
    async fn failed_notification_keeps_the_blob() {
        let (broker, store, ingestor) = setup().await;
        broker.close().await.unwrap();

        let receipt = ingestor
            .ingest(8, "scan.png", Bytes::from_static(b"png"))
            .await
            .unwrap();
        assert!(matches!(receipt.notification, Err(PublishError::ChannelClosed(_))));
        assert!(store.get("uploads", "8/scan.png").await.is_ok());
        assert!(logs_contain("Document stored without processing notice"));
    }

    #[tokio::test]
    async fn rejects_invalid_names() {
        let (broker, _store, ingestor) = setup().await;
        for name in ["", "README", "../escape.pdf", "dir/a.pdf"] {
            let err = ingestor
                .ingest(1, name, Bytes::from_static(b"x"))
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidInput, "{name}");
        }
        assert_eq!(broker.queue_depth("dms_queue"), 0);
    }

    #[tokio::test]
    async fn remove_deletes_the_blob() {
        let (_broker, store, ingestor) = setup().await;
        let receipt = ingestor
            .ingest(9, "a.txt", Bytes::from_static(b"hello"))
            .await
            .unwrap();

        ingestor.remove(&receipt.reference).await.unwrap();
        let err = store.get("uploads", "9/a.txt").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn remove_reports_unparseable_locators() {
        let (_broker, _store, ingestor) = setup().await;
        let reference = DocumentReference::new(3, "a.pdf", "/tmp/a.pdf").unwrap();
        let err = ingestor.remove(&reference).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }
}
