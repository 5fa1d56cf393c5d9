//! `dms submit`: upload a file and announce it.

use std::sync::Arc;

use anyhow::Context;
use bytes::Bytes;
use dms_nats::{ConnectionManager, MessageBroker, NatsBroker, Publisher};
use dms_storage::ObjectStore;
use dms_worker::Ingestor;

use crate::TRACING_TARGET_STARTUP;
use crate::config::SubmitArgs;

/// Stores the file under `<id>/<name>` and publishes its notice.
pub async fn run(args: SubmitArgs) -> anyhow::Result<()> {
    args.validate()?;

    let name = args
        .file
        .file_name()
        .and_then(|name| name.to_str())
        .with_context(|| format!("'{}' has no usable file name", args.file.display()))?
        .to_owned();
    let data = tokio::fs::read(&args.file)
        .await
        .with_context(|| format!("failed to read '{}'", args.file.display()))?;

    let ingestion = args.topology.ingestion().context("invalid ingestion topology")?;
    let store = ObjectStore::new(args.storage).context("failed to initialize object store")?;
    let scheme = store.scheme().to_owned();

    let nats = &args.nats;
    let broker: Arc<dyn MessageBroker> = Arc::new(
        ConnectionManager::new(nats.retry_policy())
            .with_topology(ingestion.clone())
            .establish(|_| NatsBroker::connect(nats))
            .await
            .context("failed to connect to the message broker")?,
    );

    let publisher = Publisher::new(Arc::clone(&broker), &ingestion.exchange);
    let ingestor = Ingestor::new(
        store,
        publisher.clone(),
        args.bucket,
        scheme,
        &ingestion.routing_key,
    );

    let receipt = ingestor
        .ingest(args.id, &name, Bytes::from(data))
        .await
        .context("failed to ingest document")?;

    publisher.close().await.context("failed to flush publisher")?;
    broker.close().await.context("failed to close broker connection")?;

    let locator = receipt.reference.storage_locator();
    match receipt.notification {
        Ok(()) => {
            tracing::info!(
                target: TRACING_TARGET_STARTUP,
                document_id = args.id,
                locator,
                "Document submitted"
            );
            Ok(())
        }
        Err(err) => Err(anyhow::Error::new(err).context(format!(
            "document stored at {locator} but its processing notice was not published"
        ))),
    }
}
