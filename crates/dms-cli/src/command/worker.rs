//! `dms worker`: consume notices until a shutdown signal.

use std::sync::Arc;

use anyhow::Context;
use dms_nats::{ConnectionManager, NatsBroker};
use dms_ocr::OcrPipeline;
use dms_storage::ObjectStore;
use dms_worker::{Dispatcher, verify_store};

use crate::config::WorkerArgs;
use crate::{TRACING_TARGET_STARTUP, shutdown};

/// Connects to the broker and serves deliveries until SIGINT/SIGTERM.
pub async fn run(args: WorkerArgs) -> anyhow::Result<()> {
    args.validate()?;

    let ingestion = args.topology.ingestion().context("invalid ingestion topology")?;
    let completion = args.topology.completion().context("invalid completion topology")?;
    let dead_letter = args.topology.dead_letter().context("invalid dead-letter topology")?;

    let store = ObjectStore::new(args.storage).context("failed to initialize object store")?;
    verify_store(&store, &args.ocr.default_bucket, args.nats.retry_policy())
        .await
        .context("failed to reach the object store")?;
    let pipeline =
        OcrPipeline::from_config(store, args.ocr).context("failed to initialize OCR pipeline")?;

    let nats = &args.nats;
    let broker = ConnectionManager::new(nats.retry_policy())
        .with_topologies([ingestion.clone(), completion.clone(), dead_letter.clone()])
        .establish(|_| NatsBroker::connect(nats))
        .await
        .context("failed to connect to the message broker")?;

    let dispatcher = Dispatcher::new(Arc::new(broker), pipeline, args.worker)
        .context("failed to create dispatcher")?
        .with_topologies(ingestion, &completion, &dead_letter);

    tracing::info!(
        target: TRACING_TARGET_STARTUP,
        consumer = dispatcher.consumer_name(),
        "OCR worker ready"
    );

    let cancel = shutdown::cancel_on_signal();
    dispatcher
        .run(cancel)
        .await
        .context("dispatcher stopped with an error")?;
    Ok(())
}
