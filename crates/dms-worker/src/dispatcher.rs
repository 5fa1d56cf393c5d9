//! Delivery dispatch: decode, extract, publish, settle.

use std::sync::Arc;
use std::time::Duration;

use dms_core::ErrorKind;
use dms_core::message::{DeadLetter, DocumentNotice, OcrCompleted};
use dms_nats::{Delivery, MessageBroker, Publisher, Topology};
use dms_ocr::OcrPipeline;
use futures::StreamExt;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::{Result, TRACING_TARGET_DISPATCHER, WorkerConfig};

/// Pause after a failed receive before polling the stream again.
const RECEIVE_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Final state of one handled delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Text extracted and the completion event published.
    Acked,
    /// Returned to the queue for another attempt.
    Requeued,
    /// Published to the dead-letter pipeline and removed from the queue.
    DeadLettered,
}

impl Outcome {
    /// Returns the outcome name used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Acked => "acked",
            Self::Requeued => "requeued",
            Self::DeadLettered => "dead_lettered",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decision {
    Requeue,
    DeadLetter,
}

/// Decides what happens to a delivery whose processing failed.
fn decide(kind: ErrorKind, attempt: u32, max_deliveries: u32) -> Decision {
    if kind.is_retryable() && attempt < max_deliveries {
        Decision::Requeue
    } else {
        Decision::DeadLetter
    }
}

#[derive(Debug, Clone)]
struct Route {
    publisher: Publisher,
    routing_key: String,
}

impl Route {
    fn new(broker: &Arc<dyn MessageBroker>, topology: &Topology) -> Self {
        Self {
            publisher: Publisher::new(Arc::clone(broker), &topology.exchange),
            routing_key: topology.routing_key.clone(),
        }
    }
}

/// Consumes document notices and drives each through the OCR pipeline.
///
/// Every delivery ends in exactly one ack or nack:
///
/// | processing result                                    | settlement |
/// |------------------------------------------------------|------------|
/// | text extracted, completion event published           | ack |
/// | retryable failure below `max_deliveries`             | nack, requeue |
/// | poison payload, ineligible document, cap reached     | dead-letter, ack |
/// | dead-letter publish failed                           | nack, requeue |
#[derive(Clone)]
pub struct Dispatcher {
    broker: Arc<dyn MessageBroker>,
    pipeline: OcrPipeline,
    ingestion: Topology,
    completion: Route,
    dead_letter: Route,
    config: Arc<WorkerConfig>,
    consumer_name: Arc<str>,
}

impl Dispatcher {
    /// Creates a dispatcher on the default pipeline topologies.
    ///
    /// The broker is expected to be connected with every topology declared,
    /// see [`dms_nats::ConnectionManager`].
    pub fn new(
        broker: Arc<dyn MessageBroker>,
        pipeline: OcrPipeline,
        config: WorkerConfig,
    ) -> Result<Self> {
        config.validate()?;
        let consumer_name = config.resolve_consumer_name();

        Ok(Self {
            completion: Route::new(&broker, &Topology::completion()),
            dead_letter: Route::new(&broker, &Topology::dead_letter()),
            ingestion: Topology::ingestion(),
            broker,
            pipeline,
            config: Arc::new(config),
            consumer_name: consumer_name.into(),
        })
    }

    /// Replaces the consumed, completion and dead-letter topologies.
    #[must_use]
    pub fn with_topologies(
        mut self,
        ingestion: Topology,
        completion: &Topology,
        dead_letter: &Topology,
    ) -> Self {
        self.ingestion = ingestion;
        self.completion = Route::new(&self.broker, completion);
        self.dead_letter = Route::new(&self.broker, dead_letter);
        self
    }

    /// Returns the name identifying this consumer in logs.
    pub fn consumer_name(&self) -> &str {
        &self.consumer_name
    }

    /// Serves deliveries until `cancel` fires.
    ///
    /// With a concurrency of one, a delivery is settled before the next one
    /// is taken. On cancellation intake stops, in-flight deliveries are
    /// finished and the broker is closed.
    #[tracing::instrument(
        skip_all,
        fields(consumer = %self.consumer_name, queue = %self.ingestion.queue),
        target = TRACING_TARGET_DISPATCHER,
        name = "dispatcher"
    )]
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let mut deliveries = self.broker.subscribe(&self.ingestion).await?;
        tracing::info!(
            target: TRACING_TARGET_DISPATCHER,
            concurrency = self.config.concurrency,
            max_deliveries = self.config.max_deliveries,
            "Dispatcher started"
        );

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let tracker = TaskTracker::new();

        loop {
            let permit = tokio::select! {
                biased;

                () = cancel.cancelled() => break,
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let next = tokio::select! {
                biased;

                () = cancel.cancelled() => break,
                next = deliveries.next() => next,
            };

            let delivery = match next {
                Some(Ok(delivery)) => delivery,
                Some(Err(dms_nats::Error::Closed)) | None => {
                    tracing::warn!(target: TRACING_TARGET_DISPATCHER, "Delivery stream ended");
                    break;
                }
                Some(Err(err)) => {
                    tracing::error!(
                        target: TRACING_TARGET_DISPATCHER,
                        error = %err,
                        retry_in = ?RECEIVE_RETRY_DELAY,
                        "Failed to receive delivery"
                    );
                    drop(permit);
                    tokio::select! {
                        biased;

                        () = cancel.cancelled() => break,
                        () = tokio::time::sleep(RECEIVE_RETRY_DELAY) => continue,
                    }
                }
            };

            let dispatcher = self.clone();
            tracker.spawn(async move {
                let _permit = permit;
                let tag = delivery.tag();
                let outcome = dispatcher.handle_delivery(delivery).await;
                tracing::debug!(
                    target: TRACING_TARGET_DISPATCHER,
                    delivery_tag = tag,
                    outcome = outcome.as_str(),
                    "Delivery settled"
                );
            });
        }

        tracing::info!(
            target: TRACING_TARGET_DISPATCHER,
            in_flight = tracker.len(),
            "Shutdown requested, draining in-flight deliveries"
        );
        tracker.close();
        tracker.wait().await;
        drop(deliveries);

        self.broker.close().await?;
        tracing::info!(target: TRACING_TARGET_DISPATCHER, "Dispatcher stopped");
        Ok(())
    }

    /// Processes one delivery and settles it.
    #[tracing::instrument(
        skip_all,
        fields(delivery_tag = delivery.tag(), attempt = delivery.attempt()),
        target = TRACING_TARGET_DISPATCHER
    )]
    pub async fn handle_delivery(&self, delivery: Delivery) -> Outcome {
        let notice = match DocumentNotice::decode(delivery.payload()) {
            Ok(notice) => notice,
            Err(err) => {
                tracing::warn!(
                    target: TRACING_TARGET_DISPATCHER,
                    delivery_tag = delivery.tag(),
                    error = %err,
                    "Undecodable payload"
                );
                return self.dead_letter(delivery, err.kind(), err.to_string()).await;
            }
        };

        let extraction = match self.pipeline.process(&notice.locator).await {
            Ok(extraction) => extraction,
            Err(err) => return self.fail(delivery, err.kind(), err.to_string()).await,
        };

        let event = OcrCompleted::new(&notice, extraction.text, delivery.attempt());
        let published = match event.encode() {
            Ok(payload) => self
                .completion
                .publisher
                .publish(payload, &self.completion.routing_key)
                .await
                .map_err(|err| (err.kind(), err.to_string())),
            Err(err) => Err((err.kind(), err.to_string())),
        };

        match published {
            Ok(()) => {
                tracing::info!(
                    target: TRACING_TARGET_DISPATCHER,
                    delivery_tag = delivery.tag(),
                    document_id = ?notice.document_id,
                    locator = %notice.locator,
                    characters = event.characters,
                    "Document processed"
                );
                settle(delivery, None).await;
                Outcome::Acked
            }
            Err((kind, reason)) => self.fail(delivery, kind, reason).await,
        }
    }

    async fn fail(&self, delivery: Delivery, kind: ErrorKind, reason: String) -> Outcome {
        match decide(kind, delivery.attempt(), self.config.max_deliveries) {
            Decision::Requeue => {
                tracing::warn!(
                    target: TRACING_TARGET_DISPATCHER,
                    delivery_tag = delivery.tag(),
                    attempt = delivery.attempt(),
                    max_deliveries = self.config.max_deliveries,
                    kind = %kind,
                    error = %reason,
                    "Processing failed, requeueing"
                );
                settle(delivery, Some(true)).await;
                Outcome::Requeued
            }
            Decision::DeadLetter => self.dead_letter(delivery, kind, reason).await,
        }
    }

    async fn dead_letter(&self, delivery: Delivery, kind: ErrorKind, reason: String) -> Outcome {
        let envelope = DeadLetter::new(delivery.payload(), kind, reason, delivery.attempt());
        let published = match envelope.encode() {
            Ok(payload) => self
                .dead_letter
                .publisher
                .publish(payload, &self.dead_letter.routing_key)
                .await
                .map_err(|err| err.to_string()),
            Err(err) => Err(err.to_string()),
        };

        match published {
            Ok(()) => {
                tracing::error!(
                    target: TRACING_TARGET_DISPATCHER,
                    delivery_tag = delivery.tag(),
                    attempts = envelope.attempts,
                    kind = %envelope.kind,
                    reason = %envelope.reason,
                    "Message dead-lettered"
                );
                settle(delivery, None).await;
                Outcome::DeadLettered
            }
            Err(err) => {
                tracing::error!(
                    target: TRACING_TARGET_DISPATCHER,
                    delivery_tag = delivery.tag(),
                    error = %err,
                    "Failed to dead-letter message, requeueing"
                );
                settle(delivery, Some(true)).await;
                Outcome::Requeued
            }
        }
    }
}

/// Acks the delivery, or nacks it when `nack` carries the requeue flag.
async fn settle(delivery: Delivery, nack: Option<bool>) {
    let tag = delivery.tag();
    let result = match nack {
        None => delivery.ack().await,
        Some(requeue) => delivery.nack(requeue).await,
    };

    if let Err(err) = result {
        tracing::error!(
            target: TRACING_TARGET_DISPATCHER,
            delivery_tag = tag,
            error = %err,
            "Failed to settle delivery"
        );
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("consumer_name", &self.consumer_name)
            .field("ingestion", &self.ingestion)
            .field("completion", &self.completion)
            .field("dead_letter", &self.dead_letter)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use bytes::Bytes;
    use dms_nats::{Acknowledger, DeliveryStream, MemoryBroker, Settlement};
    use dms_ocr::{OcrConfig, OcrError, Rasterizer, Recognizer, Stage};
    use dms_storage::ObjectStore;
    use proptest::prelude::*;
    use tempfile::TempDir;
    use tracing_test::traced_test;

    use super::*;

    /// Rasterizer and recognizer that write the files the real tools would
    /// and fail recognition for the first `failures` calls.
    #[derive(Default)]
    struct FakeEngine {
        failures: u32,
        calls: AtomicU32,
        files: Mutex<Vec<String>>,
        observed: Mutex<Option<MemoryBroker>>,
        /// `(in flight, ready in the ingestion queue)` seen during recognition.
        broker_states: Mutex<Vec<(usize, usize)>>,
    }

    impl FakeEngine {
        fn failing(failures: u32) -> Arc<Self> {
            Arc::new(Self {
                failures,
                ..Self::default()
            })
        }

        fn files(&self) -> Vec<String> {
            self.files.lock().unwrap().clone()
        }

        fn observe(&self, broker: MemoryBroker) {
            *self.observed.lock().unwrap() = Some(broker);
        }

        fn broker_states(&self) -> Vec<(usize, usize)> {
            self.broker_states.lock().unwrap().clone()
        }

        fn record(&self, path: &Path) {
            let name = path.file_name().unwrap().to_string_lossy().into_owned();
            self.files.lock().unwrap().push(name);
        }
    }

    #[async_trait::async_trait]
    impl Rasterizer for FakeEngine {
        async fn rasterize(&self, input: &Path, output: &Path) -> dms_ocr::Result<()> {
            self.record(input);
            tokio::fs::write(output, b"png").await.unwrap();
            self.record(output);
            Ok(())
        }
    }

    #[async_trait::async_trait]
    impl Recognizer for FakeEngine {
        async fn recognize(&self, image: &Path, output_prefix: &Path) -> dms_ocr::Result<String> {
            self.record(image);
            let observed = self.observed.lock().unwrap().clone();
            if let Some(broker) = observed {
                // Leaves room for the dispatcher to take more than it should.
                tokio::time::sleep(Duration::from_millis(20)).await;
                let state = (broker.in_flight(), broker.queue_depth("dms_queue"));
                self.broker_states.lock().unwrap().push(state);
            }
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                return Err(OcrError::ProcessFailed {
                    stage: Stage::Recognize,
                    tool: "tesseract",
                    status: "exit status: 1".into(),
                    stderr: "Error opening data file".into(),
                });
            }
            tokio::fs::write(output_prefix.with_extension("txt"), b"Quarterly report")
                .await
                .unwrap();
            Ok("Quarterly report".to_owned())
        }
    }

    struct Harness {
        broker: MemoryBroker,
        dispatcher: Dispatcher,
        scratch: TempDir,
    }

    impl Harness {
        async fn new(engine: Arc<FakeEngine>, config: WorkerConfig) -> Self {
            let broker = MemoryBroker::new();
            for topology in [Topology::ingestion(), Topology::completion(), Topology::dead_letter()] {
                broker.declare(&topology).await.unwrap();
            }
            Self::with_broker(broker, engine, config).await
        }

        async fn with_broker(
            broker: MemoryBroker,
            engine: Arc<FakeEngine>,
            config: WorkerConfig,
        ) -> Self {
            let store = ObjectStore::memory();
            store.create_bucket("uploads").await.unwrap();
            store
                .put("uploads", "report.pdf", Bytes::from_static(b"%PDF-1.7"), "application/pdf")
                .await
                .unwrap();

            let scratch = tempfile::tempdir().unwrap();
            let ocr_config = OcrConfig::default().with_scratch_dir(scratch.path());
            let pipeline = OcrPipeline::new(store, engine.clone(), engine, ocr_config);
            let dispatcher =
                Dispatcher::new(Arc::new(broker.clone()), pipeline, config).unwrap();

            Self {
                broker,
                dispatcher,
                scratch,
            }
        }

        async fn publish(&self, payload: &'static [u8]) {
            let topology = Topology::ingestion();
            self.broker
                .publish(&topology.exchange, &topology.routing_key, Bytes::from_static(payload))
                .await
                .unwrap();
        }

        /// Runs the dispatcher until `settlements` deliveries were settled.
        async fn run_until_settled(&self, settlements: usize) -> Vec<Settlement> {
            let cancel = CancellationToken::new();
            let worker = tokio::spawn(self.dispatcher.clone().run(cancel.clone()));

            tokio::time::timeout(Duration::from_secs(10), async {
                while self.broker.settlements().len() < settlements {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            })
            .await
            .expect("deliveries were not settled in time");

            cancel.cancel();
            worker.await.unwrap().unwrap();
            self.broker.settlements()
        }

        fn scratch_is_empty(&self) -> bool {
            std::fs::read_dir(self.scratch.path()).unwrap().next().is_none()
        }
    }

    #[tokio::test]
    async fn report_pdf_is_processed_and_acked() {
        let engine = FakeEngine::failing(0);
        let harness = Harness::new(engine.clone(), WorkerConfig::default()).await;
        harness.publish(b"minio://uploads/report.pdf").await;

        let settlements = harness.run_until_settled(1).await;
        assert!(matches!(settlements[..], [Settlement::Ack { .. }]));
        assert_eq!(engine.files(), ["report.pdf", "report.png", "report.png"]);
        assert!(harness.scratch_is_empty());

        let events = harness.broker.queued_payloads("ocr_queue");
        assert_eq!(events.len(), 1);
        let event: OcrCompleted = serde_json::from_slice(&events[0]).unwrap();
        assert_eq!(event.locator, "minio://uploads/report.pdf");
        assert_eq!(event.text, "Quarterly report");
        assert_eq!(event.attempt, 1);
    }

    #[tokio::test]
    async fn recognition_failure_is_requeued_and_redelivered() {
        let engine = FakeEngine::failing(1);
        let harness = Harness::new(engine, WorkerConfig::default()).await;
        harness.publish(br#"{"version":1,"document_id":7,"locator":"minio://uploads/report.pdf"}"#)
            .await;

        let settlements = harness.run_until_settled(2).await;
        assert!(matches!(
            settlements[..],
            [Settlement::Nack { requeue: true, .. }, Settlement::Ack { .. }]
        ));
        assert!(harness.scratch_is_empty());

        let events = harness.broker.queued_payloads("ocr_queue");
        let event: OcrCompleted = serde_json::from_slice(&events[0]).unwrap();
        assert_eq!(event.document_id, Some(7));
        assert_eq!(event.attempt, 2);
    }

    #[tokio::test]
    async fn exhausted_retries_are_dead_lettered() {
        let engine = FakeEngine::failing(u32::MAX);
        let config = WorkerConfig::default().with_max_deliveries(3);
        let harness = Harness::new(engine, config).await;
        harness.publish(b"minio://uploads/report.pdf").await;

        let settlements = harness.run_until_settled(3).await;
        assert!(matches!(
            settlements[..],
            [
                Settlement::Nack { requeue: true, .. },
                Settlement::Nack { requeue: true, .. },
                Settlement::Ack { .. },
            ]
        ));
        assert_eq!(harness.broker.queue_depth("dms_queue"), 0);

        let letters = harness.broker.queued_payloads("dms_dead_letter_queue");
        assert_eq!(letters.len(), 1);
        let letter: DeadLetter = serde_json::from_slice(&letters[0]).unwrap();
        assert_eq!(letter.kind, "process_failed");
        assert_eq!(letter.attempts, 3);
        assert_eq!(letter.payload, "minio://uploads/report.pdf");
        assert!(harness.scratch_is_empty());
    }

    #[tokio::test]
    async fn poison_payload_is_dead_lettered_at_once() {
        let engine = FakeEngine::failing(0);
        let harness = Harness::new(engine.clone(), WorkerConfig::default()).await;
        harness.publish(br#"{"version":9,"locator":"minio://uploads/report.pdf"}"#).await;

        let settlements = harness.run_until_settled(1).await;
        assert!(matches!(settlements[..], [Settlement::Ack { .. }]));
        assert!(engine.files().is_empty());

        let letters = harness.broker.queued_payloads("dms_dead_letter_queue");
        let letter: DeadLetter = serde_json::from_slice(&letters[0]).unwrap();
        assert_eq!(letter.kind, "invalid_input");
        assert_eq!(letter.attempts, 1);
    }

    #[tokio::test]
    async fn ineligible_documents_are_dead_lettered_at_once() {
        let harness = Harness::new(FakeEngine::failing(0), WorkerConfig::default()).await;
        harness.publish(b"minio://uploads/archive.zip").await;

        let settlements = harness.run_until_settled(1).await;
        assert!(matches!(settlements[..], [Settlement::Ack { .. }]));
        let letters = harness.broker.queued_payloads("dms_dead_letter_queue");
        let letter: DeadLetter = serde_json::from_slice(&letters[0]).unwrap();
        assert_eq!(letter.kind, "unsupported");
    }

    #[tokio::test]
    async fn failed_completion_publish_is_requeued() {
        let broker = MemoryBroker::new();
        broker.declare(&Topology::ingestion()).await.unwrap();
        broker.declare(&Topology::dead_letter()).await.unwrap();
        let harness =
            Harness::with_broker(broker, FakeEngine::failing(0), WorkerConfig::default()).await;
        harness.publish(b"minio://uploads/report.pdf").await;

        let settlements = harness.run_until_settled(1).await;
        assert!(settlements
            .iter()
            .all(|s| matches!(s, Settlement::Nack { requeue: true, .. })));
    }

    #[tokio::test]
    async fn failed_dead_letter_publish_is_requeued() {
        let broker = MemoryBroker::new();
        broker.declare(&Topology::ingestion()).await.unwrap();
        let harness =
            Harness::with_broker(broker, FakeEngine::failing(0), WorkerConfig::default()).await;
        harness.publish(&[0xff, 0xfe, 0x00]).await;

        // The requeued message keeps coming back until the dispatcher stops.
        let settlements = harness.run_until_settled(1).await;
        assert!(settlements
            .iter()
            .all(|s| matches!(s, Settlement::Nack { requeue: true, .. })));
    }

    #[tokio::test]
    async fn cancellation_closes_the_broker() {
        let harness = Harness::new(FakeEngine::failing(0), WorkerConfig::default()).await;
        let cancel = CancellationToken::new();
        cancel.cancel();
        harness.dispatcher.clone().run(cancel).await.unwrap();

        let topology = Topology::ingestion();
        let err = harness
            .broker
            .publish(&topology.exchange, &topology.routing_key, Bytes::from_static(b"late"))
            .await
            .unwrap_err();
        assert_eq!(err.class(), "channel_closed");
    }

    #[tokio::test]
    async fn concurrent_deliveries_share_nothing() {
        let engine = FakeEngine::failing(0);
        let config = WorkerConfig::default().with_concurrency(4);
        let harness = Harness::new(engine, config).await;
        for _ in 0..8 {
            harness.publish(b"minio://uploads/report.pdf").await;
        }

        let settlements = harness.run_until_settled(8).await;
        assert!(settlements.iter().all(|s| matches!(s, Settlement::Ack { .. })));
        assert_eq!(harness.broker.queued_payloads("ocr_queue").len(), 8);
        assert!(harness.scratch_is_empty());
    }

    #[tokio::test]
    async fn single_concurrency_takes_one_delivery_at_a_time() {
        let engine = FakeEngine::failing(0);
        let harness = Harness::new(engine.clone(), WorkerConfig::default()).await;
        engine.observe(harness.broker.clone());
        for _ in 0..3 {
            harness.publish(b"minio://uploads/report.pdf").await;
        }

        let settlements = harness.run_until_settled(3).await;
        assert!(settlements.iter().all(|s| matches!(s, Settlement::Ack { .. })));
        assert_eq!(engine.broker_states(), [(1, 2), (1, 1), (1, 0)]);
    }

    #[tokio::test]
    async fn redelivered_notice_yields_the_same_outcome() {
        let engine = FakeEngine::failing(0);
        let harness = Harness::new(engine.clone(), WorkerConfig::default()).await;
        let notice = br#"{"version":1,"document_id":7,"locator":"minio://uploads/report.pdf"}"#;
        harness.publish(notice).await;
        harness.publish(notice).await;

        let settlements = harness.run_until_settled(2).await;
        assert!(matches!(
            settlements[..],
            [Settlement::Ack { .. }, Settlement::Ack { .. }]
        ));

        let events: Vec<OcrCompleted> = harness
            .broker
            .queued_payloads("ocr_queue")
            .iter()
            .map(|payload| serde_json::from_slice(payload).unwrap())
            .collect();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].text, events[1].text);
        assert_eq!(events[0].document_id, events[1].document_id);
        assert_eq!(events[0].locator, events[1].locator);
        assert_eq!(engine.files().len(), 6);
        assert!(harness.scratch_is_empty());
    }

    /// Broker whose delivery stream fails on every poll.
    #[derive(Default)]
    struct FailingStreamBroker {
        polls: Arc<AtomicU32>,
    }

    #[async_trait::async_trait]
    impl MessageBroker for FailingStreamBroker {
        async fn declare(&self, _topology: &Topology) -> dms_nats::Result<()> {
            Ok(())
        }

        async fn publish(
            &self,
            _exchange: &str,
            _routing_key: &str,
            _payload: Bytes,
        ) -> std::result::Result<(), dms_nats::PublishError> {
            Ok(())
        }

        async fn subscribe(&self, topology: &Topology) -> dms_nats::Result<DeliveryStream> {
            let polls = Arc::clone(&self.polls);
            let queue = topology.queue.clone();
            let deliveries = futures::stream::repeat_with(move || {
                polls.fetch_add(1, Ordering::SeqCst);
                Err::<Delivery, _>(dms_nats::Error::subscribe(queue.clone(), "consumer deleted"))
            });
            Ok(deliveries.boxed())
        }

        async fn flush(&self) -> dms_nats::Result<()> {
            Ok(())
        }

        async fn close(&self) -> dms_nats::Result<()> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn receive_errors_are_retried_after_a_delay() {
        let broker = Arc::new(FailingStreamBroker::default());
        let polls = Arc::clone(&broker.polls);
        let engine = FakeEngine::failing(0);
        let pipeline =
            OcrPipeline::new(ObjectStore::memory(), engine.clone(), engine, OcrConfig::default());
        let dispatcher = Dispatcher::new(broker, pipeline, WorkerConfig::default()).unwrap();

        let cancel = CancellationToken::new();
        let worker = tokio::spawn(dispatcher.run(cancel.clone()));
        tokio::time::sleep(Duration::from_millis(3500)).await;
        cancel.cancel();
        worker.await.unwrap().unwrap();

        let polls = polls.load(Ordering::SeqCst);
        assert!((3..=5).contains(&polls), "polled {polls} times");
        assert!(logs_contain("Failed to receive delivery"));
    }

    #[test]
    fn decision_is_total_over_kind_attempt_and_cap() {
        assert_eq!(decide(ErrorKind::Timeout, 1, 5), Decision::Requeue);
        assert_eq!(decide(ErrorKind::Timeout, 4, 5), Decision::Requeue);
        assert_eq!(decide(ErrorKind::Timeout, 5, 5), Decision::DeadLetter);
        assert_eq!(decide(ErrorKind::InvalidInput, 1, 5), Decision::DeadLetter);
        assert_eq!(decide(ErrorKind::Unsupported, 1, 5), Decision::DeadLetter);
    }

    /// Counts the settlements of a single delivery.
    #[derive(Clone, Default)]
    struct Recorder {
        acks: Arc<AtomicU32>,
        nacks: Arc<Mutex<Vec<bool>>>,
    }

    #[async_trait::async_trait]
    impl Acknowledger for Recorder {
        async fn ack(&self) -> dms_nats::Result<()> {
            self.acks.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn nack(&self, requeue: bool) -> dms_nats::Result<()> {
            self.nacks.lock().unwrap().push(requeue);
            Ok(())
        }
    }

    fn payload_strategy() -> impl Strategy<Value = Vec<u8>> {
        prop_oneof![
            Just(b"minio://uploads/report.pdf".to_vec()),
            Just(b"minio://uploads/missing.pdf".to_vec()),
            Just(b"minio://uploads/archive.zip".to_vec()),
            Just(br#"{"version":1,"locator":"minio://uploads/report.pdf"}"#.to_vec()),
            proptest::collection::vec(any::<u8>(), 0..32),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn every_delivery_is_settled_exactly_once(
            payload in payload_strategy(),
            attempt in 1u32..8,
            failures in 0u32..2,
            completion_declared in any::<bool>(),
            dead_letter_declared in any::<bool>(),
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();

            let (outcome, recorder) = runtime.block_on(async {
                let broker = MemoryBroker::new();
                if completion_declared {
                    broker.declare(&Topology::completion()).await.unwrap();
                }
                if dead_letter_declared {
                    broker.declare(&Topology::dead_letter()).await.unwrap();
                }
                let harness = Harness::with_broker(
                    broker,
                    FakeEngine::failing(failures),
                    WorkerConfig::default(),
                )
                .await;

                let recorder = Recorder::default();
                let delivery = Delivery::new(
                    Bytes::from(payload),
                    "dms_routing_key",
                    1,
                    attempt,
                    recorder.clone(),
                );
                let outcome = harness.dispatcher.handle_delivery(delivery).await;
                prop_assert!(harness.scratch_is_empty());
                Ok((outcome, recorder))
            })?;

            let acks = recorder.acks.load(Ordering::SeqCst);
            let nacks = recorder.nacks.lock().unwrap().clone();
            prop_assert_eq!(acks as usize + nacks.len(), 1);

            match outcome {
                Outcome::Acked | Outcome::DeadLettered => prop_assert_eq!(acks, 1),
                Outcome::Requeued => prop_assert_eq!(nacks, vec![true]),
            }
        }
    }
}
