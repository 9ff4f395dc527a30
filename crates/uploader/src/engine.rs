//! Upload engine: queue intake, orchestration and the observable surface.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::coordinator::UploadCoordinator;
use crate::error::UploadError;
use crate::progress::ProgressAggregator;
use crate::queue;
use crate::transport::GalleryTransport;
use crate::types::{ItemState, QueueSnapshot, UploadEvent};
use crate::worker::ItemWorker;

/// Cloneable handle for enqueueing file batches.
///
/// Every producer funnels into the same intake channel, so batches from
/// any number of sources serialize into one queue.
#[derive(Clone)]
pub struct QueueProducer {
    intake_tx: mpsc::Sender<Vec<PathBuf>>,
}

impl QueueProducer {
    /// Enqueues one batch of file paths.
    pub async fn enqueue(&self, paths: Vec<PathBuf>) -> Result<(), UploadError> {
        self.intake_tx
            .send(paths)
            .await
            .map_err(|_| UploadError::QueueClosed)
    }
}

/// The upload transfer engine.
///
/// Owns the intake loop that turns path batches into ordered queue items
/// and runs one task per item against the injected coordinator and
/// transport. All queue state is observable through [`Self::snapshot`] and
/// the event stream.
pub struct UploadEngine {
    intake_tx: mpsc::Sender<Vec<PathBuf>>,
    events_rx: Option<mpsc::Receiver<UploadEvent>>,
    tracker: Arc<ProgressAggregator>,
    item_cancels: Arc<Mutex<HashMap<Uuid, CancellationToken>>>,
    shutdown: CancellationToken,
    loop_handle: tokio::task::JoinHandle<()>,
}

impl UploadEngine {
    /// Spawns the engine over `transport` with `coordinator` enforcing the
    /// concurrency budgets. The coordinator is injected so callers can
    /// share one across engines or probe it from tests.
    pub fn new(
        transport: Arc<dyn GalleryTransport>,
        coordinator: Arc<UploadCoordinator>,
        config: EngineConfig,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(256);
        let (intake_tx, intake_rx) = mpsc::channel(64);
        let tracker = Arc::new(ProgressAggregator::new(events_tx));
        let item_cancels = Arc::new(Mutex::new(HashMap::new()));
        let shutdown = CancellationToken::new();

        let inner = EngineInner {
            intake_rx,
            transport,
            coordinator,
            tracker: Arc::clone(&tracker),
            config: Arc::new(config),
            item_cancels: Arc::clone(&item_cancels),
            shutdown: shutdown.clone(),
        };
        let loop_handle = tokio::spawn(run_loop(inner));

        Self {
            intake_tx,
            events_rx: Some(events_rx),
            tracker,
            item_cancels,
            shutdown,
            loop_handle,
        }
    }

    /// New producer handle feeding this engine's intake channel.
    pub fn producer(&self) -> QueueProducer {
        QueueProducer {
            intake_tx: self.intake_tx.clone(),
        }
    }

    /// Enqueues one batch of file paths.
    pub async fn enqueue(&self, paths: Vec<PathBuf>) -> Result<(), UploadError> {
        self.intake_tx
            .send(paths)
            .await
            .map_err(|_| UploadError::QueueClosed)
    }

    /// Point-in-time view of the queue.
    pub fn snapshot(&self) -> QueueSnapshot {
        self.tracker.snapshot()
    }

    /// Takes the event receiver. Subsequent calls return `None`.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<UploadEvent>> {
        self.events_rx.take()
    }

    /// Cancels one queued or active item. Returns whether the item was
    /// still cancellable; settled items are left alone.
    pub fn cancel_item(&self, id: Uuid) -> bool {
        let cancels = self.item_cancels.lock().unwrap();
        match cancels.get(&id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancels every queued and active item.
    pub fn cancel_all(&self) {
        let cancels = self.item_cancels.lock().unwrap();
        for token in cancels.values() {
            token.cancel();
        }
    }

    /// Cancels outstanding work and waits for the intake loop to stop.
    pub async fn shutdown(self) {
        self.cancel_all();
        self.shutdown.cancel();
        let _ = self.loop_handle.await;
    }
}

// ---------------------------------------------------------------------------
// Intake loop
// ---------------------------------------------------------------------------

struct EngineInner {
    intake_rx: mpsc::Receiver<Vec<PathBuf>>,
    transport: Arc<dyn GalleryTransport>,
    coordinator: Arc<UploadCoordinator>,
    tracker: Arc<ProgressAggregator>,
    config: Arc<EngineConfig>,
    item_cancels: Arc<Mutex<HashMap<Uuid, CancellationToken>>>,
    shutdown: CancellationToken,
}

async fn run_loop(mut inner: EngineInner) {
    let mut items = JoinSet::new();
    loop {
        tokio::select! {
            biased;
            _ = inner.shutdown.cancelled() => break,
            maybe_batch = inner.intake_rx.recv() => match maybe_batch {
                Some(paths) => {
                    ingest(&inner, &mut items, paths).await;
                    check_settled(&inner, &items);
                }
                None => break,
            },
            Some(result) = items.join_next() => {
                if let Err(err) = result {
                    if !err.is_cancelled() {
                        error!(error = %err, "upload task panicked");
                    }
                }
                check_settled(&inner, &items);
            }
        }
    }
    items.shutdown().await;
}

/// Stats and classifies one path batch, then spawns a task per queued item.
async fn ingest(inner: &EngineInner, items: &mut JoinSet<()>, paths: Vec<PathBuf>) {
    if paths.is_empty() {
        return;
    }
    let batch = queue::build_batch(paths, inner.config.single_part_threshold).await;
    info!(count = batch.len(), "batch enqueued");
    inner.tracker.enqueue_batch(batch.clone());

    for item in batch {
        if item.state != ItemState::Queued {
            continue;
        }
        let cancel = CancellationToken::new();
        inner
            .item_cancels
            .lock()
            .unwrap()
            .insert(item.id, cancel.clone());
        let worker = ItemWorker::new(
            Arc::clone(&inner.transport),
            Arc::clone(&inner.coordinator),
            Arc::clone(&inner.tracker),
            Arc::clone(&inner.config),
            cancel,
        );
        let tracker = Arc::clone(&inner.tracker);
        let cancels = Arc::clone(&inner.item_cancels);
        items.spawn(async move {
            match worker.run(&item).await {
                Ok(()) => tracker.item_completed(item.id),
                Err(err) => {
                    match &err {
                        UploadError::Cancelled => {
                            info!(item = %item.name, "item cancelled")
                        }
                        other => error!(item = %item.name, error = %other, "item failed"),
                    }
                    tracker.item_failed(item.id, err.to_string());
                }
            }
            cancels.lock().unwrap().remove(&item.id);
        });
    }
}

/// Once every item settled, shows the completed state for the configured
/// linger and then resets the queue to idle. A batch arriving meanwhile
/// bumps the epoch and voids the pending reset.
fn check_settled(inner: &EngineInner, items: &JoinSet<()>) {
    if !items.is_empty() {
        return;
    }
    if let Some(epoch) = inner.tracker.complete_queue() {
        info!("upload queue completed");
        let tracker = Arc::clone(&inner.tracker);
        let linger = inner.config.completed_linger;
        tokio::spawn(async move {
            tokio::time::sleep(linger).await;
            tracker.reset_if_epoch(epoch);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoordinatorLimits;
    use crate::types::QueuePhase;
    use shuttersync_gallery_api::{
        ApiError, CompleteMultipartRequest, CreateAssetRequest, MultipartTicket, SinglePartTicket,
    };
    use bytes::Bytes;
    use std::collections::HashSet;
    use std::future::Future;
    use std::io::Write;
    use std::path::Path;
    use std::pin::Pin;
    use std::time::Duration;
    use tokio::sync::watch;

    const KIB: u64 = 1024;

    /// Backend double that derives tickets from the request and can hold
    /// every transfer behind a gate until the test releases it.
    struct GatedGallery {
        chunk_size: u64,
        gate: watch::Sender<bool>,
        fail_form_names: Mutex<HashSet<String>>,
        /// Failures served per destination whose URL contains the key.
        put_failures: Mutex<HashMap<String, u32>>,
        negotiations: Mutex<Vec<String>>,
        completions: Mutex<Vec<CompleteMultipartRequest>>,
    }

    impl GatedGallery {
        fn new(chunk_size: u64, held: bool) -> Arc<Self> {
            let (gate, _) = watch::channel(!held);
            Arc::new(Self {
                chunk_size,
                gate,
                fail_form_names: Mutex::new(HashSet::new()),
                put_failures: Mutex::new(HashMap::new()),
                negotiations: Mutex::new(Vec::new()),
                completions: Mutex::new(Vec::new()),
            })
        }

        fn release(&self) {
            let _ = self.gate.send(true);
        }

        fn negotiated(&self) -> Vec<String> {
            self.negotiations.lock().unwrap().clone()
        }

        async fn pass_gate(mut rx: watch::Receiver<bool>) {
            let _ = rx.wait_for(|open| *open).await;
        }
    }

    impl GalleryTransport for GatedGallery {
        fn negotiate_single(
            &self,
            req: &CreateAssetRequest,
        ) -> Pin<Box<dyn Future<Output = Result<SinglePartTicket, ApiError>> + Send + '_>>
        {
            self.negotiations.lock().unwrap().push(req.name.clone());
            let ticket = SinglePartTicket {
                upload_url: format!("https://storage.example/form/{}", req.name),
                fields: HashMap::new(),
            };
            Box::pin(async move { Ok(ticket) })
        }

        fn negotiate_multipart(
            &self,
            req: &CreateAssetRequest,
        ) -> Pin<Box<dyn Future<Output = Result<MultipartTicket, ApiError>> + Send + '_>>
        {
            self.negotiations.lock().unwrap().push(req.name.clone());
            let count = req.content_length / self.chunk_size + 1;
            let ticket = MultipartTicket {
                part_urls: (1..=count)
                    .map(|n| format!("https://storage.example/{}/part/{n}", req.name))
                    .collect(),
                upload_id: format!("up-{}", req.name),
                storage_key: format!("assets/{}", req.name),
            };
            Box::pin(async move { Ok(ticket) })
        }

        fn put_part(
            &self,
            url: &str,
            _data: Bytes,
        ) -> Pin<Box<dyn Future<Output = Result<String, ApiError>> + Send + '_>> {
            let mut outcome = Ok(format!("etag-{url}"));
            {
                let mut failures = self.put_failures.lock().unwrap();
                for (needle, left) in failures.iter_mut() {
                    if url.contains(needle.as_str()) && *left > 0 {
                        *left -= 1;
                        outcome = Err(ApiError::Api {
                            status: 500,
                            body: "storage hiccup".into(),
                        });
                        break;
                    }
                }
            }
            let rx = self.gate.subscribe();
            Box::pin(async move {
                Self::pass_gate(rx).await;
                outcome
            })
        }

        fn post_form(
            &self,
            _ticket: &SinglePartTicket,
            file_name: &str,
            _data: Bytes,
        ) -> Pin<Box<dyn Future<Output = Result<(), ApiError>> + Send + '_>> {
            let outcome = if self.fail_form_names.lock().unwrap().contains(file_name) {
                Err(ApiError::Api {
                    status: 500,
                    body: "storage hiccup".into(),
                })
            } else {
                Ok(())
            };
            let rx = self.gate.subscribe();
            Box::pin(async move {
                Self::pass_gate(rx).await;
                outcome
            })
        }

        fn finish_multipart(
            &self,
            req: &CompleteMultipartRequest,
        ) -> Pin<Box<dyn Future<Output = Result<(), ApiError>> + Send + '_>> {
            self.completions.lock().unwrap().push(req.clone());
            Box::pin(async move { Ok(()) })
        }
    }

    fn write_file(dir: &Path, name: &str, len: u64) -> PathBuf {
        let path = dir.join(name);
        let payload: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        std::fs::File::create(&path)
            .unwrap()
            .write_all(&payload)
            .unwrap();
        path
    }

    fn engine_with(
        mock: Arc<GatedGallery>,
        limits: CoordinatorLimits,
    ) -> (UploadEngine, Arc<UploadCoordinator>) {
        let mut config = EngineConfig::new("gal-test");
        config.single_part_threshold = 40 * KIB;
        config.chunk_candidates = vec![40 * KIB];
        config.limits = limits;
        let coordinator = Arc::new(UploadCoordinator::new(limits));
        let engine = UploadEngine::new(mock, Arc::clone(&coordinator), config);
        (engine, coordinator)
    }

    async fn wait_until(mut cond: impl FnMut() -> bool, what: &str) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !cond() {
            if tokio::time::Instant::now() > deadline {
                panic!("timed out waiting for {what}");
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    async fn next_event(rx: &mut mpsc::Receiver<UploadEvent>) -> UploadEvent {
        tokio::time::timeout(Duration::from_secs(30), rx.recv())
            .await
            .expect("timed out waiting for an event")
            .expect("event channel closed")
    }

    /// Consumes events until the given phase is announced, returning
    /// everything seen on the way.
    async fn events_until_phase(
        rx: &mut mpsc::Receiver<UploadEvent>,
        phase: QueuePhase,
    ) -> Vec<UploadEvent> {
        let mut seen = Vec::new();
        loop {
            let event = next_event(rx).await;
            let done = matches!(&event, UploadEvent::PhaseChanged { phase: p } if *p == phase);
            seen.push(event);
            if done {
                return seen;
            }
        }
    }

    #[tokio::test]
    async fn mixed_batch_fills_every_budget_concurrently() {
        let dir = tempfile::tempdir().unwrap();
        // Four small files and one large one, large first on purpose.
        let mut paths = vec![write_file(dir.path(), "big.raw", 120 * KIB)];
        for n in 1..=4 {
            paths.push(write_file(dir.path(), &format!("small-{n}.jpg"), 8 * KIB));
        }

        let mock = GatedGallery::new(40 * KIB, true);
        let (engine, coordinator) = engine_with(Arc::clone(&mock), CoordinatorLimits::default());

        engine.enqueue(paths).await.unwrap();
        wait_until(
            || {
                coordinator.small_in_flight() == 4
                    && coordinator.multipart_held()
                    && coordinator.chunks_in_flight() == 3
            },
            "all budgets to fill",
        )
        .await;

        // Smalls sort ahead of the multipart item regardless of input order.
        let snapshot = engine.snapshot();
        assert_eq!(snapshot.len(), 5);
        assert!(snapshot.items[..4]
            .iter()
            .all(|i| i.name.starts_with("small-")));
        assert_eq!(snapshot.items[4].name, "big.raw");
        assert_eq!(snapshot.phase, QueuePhase::Uploading);

        mock.release();
        wait_until(
            || mock.completions.lock().unwrap().len() == 1,
            "the multipart completion",
        )
        .await;

        // 120 KiB over 40 KiB chunks is an exact multiple: three real parts.
        let completions = mock.completions.lock().unwrap();
        assert_eq!(completions[0].parts.len(), 3);
        drop(completions);

        wait_until(
            || engine.snapshot().phase != QueuePhase::Uploading,
            "the queue to settle",
        )
        .await;
        engine.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failed_item_does_not_block_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let paths = vec![
            write_file(dir.path(), "ok.jpg", 4 * KIB),
            write_file(dir.path(), "broken.jpg", 4 * KIB),
        ];

        let mock = GatedGallery::new(40 * KIB, false);
        mock.fail_form_names
            .lock()
            .unwrap()
            .insert("broken.jpg".into());
        let (mut engine, _) = engine_with(mock, CoordinatorLimits::default());
        let mut events = engine.take_events().unwrap();

        engine.enqueue(paths).await.unwrap();
        let seen = events_until_phase(&mut events, QueuePhase::Completed).await;

        let failed: Vec<_> = seen
            .iter()
            .filter_map(|e| match e {
                UploadEvent::ItemFailed { reason, .. } => Some(reason.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(failed.len(), 1);
        assert!(failed[0].contains("single-part transfer failed"));
        assert_eq!(
            seen.iter()
                .filter(|e| matches!(e, UploadEvent::ItemCompleted { .. }))
                .count(),
            1
        );
        engine.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failed_multipart_releases_the_lock_for_the_next() {
        let dir = tempfile::tempdir().unwrap();
        let paths = vec![
            write_file(dir.path(), "big-a.raw", 100 * KIB),
            write_file(dir.path(), "big-b.raw", 100 * KIB),
        ];

        let mock = GatedGallery::new(40 * KIB, false);
        mock.put_failures
            .lock()
            .unwrap()
            .insert("big-a.raw".into(), u32::MAX);
        let (mut engine, _) = engine_with(Arc::clone(&mock), CoordinatorLimits::default());
        let mut events = engine.take_events().unwrap();

        engine.enqueue(paths).await.unwrap();
        let seen = events_until_phase(&mut events, QueuePhase::Completed).await;

        let failures: Vec<_> = seen
            .iter()
            .filter_map(|e| match e {
                UploadEvent::ItemFailed { reason, .. } => Some(reason.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(failures.len(), 1);
        assert!(failures[0].contains("after 3 attempts"));
        assert_eq!(
            seen.iter()
                .filter(|e| matches!(e, UploadEvent::ItemCompleted { .. }))
                .count(),
            1
        );

        // The failed session ran first, then the survivor took the lock.
        assert_eq!(mock.negotiated(), vec!["big-a.raw", "big-b.raw"]);
        let completions = mock.completions.lock().unwrap();
        assert_eq!(completions.len(), 1);
        assert_eq!(completions[0].storage_key, "assets/big-b.raw");
        drop(completions);
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn cancelling_the_active_multipart_frees_the_lock() {
        let dir = tempfile::tempdir().unwrap();
        let first = write_file(dir.path(), "big-a.raw", 100 * KIB);
        let second = write_file(dir.path(), "big-b.raw", 100 * KIB);

        let mock = GatedGallery::new(40 * KIB, true);
        let (engine, coordinator) = engine_with(Arc::clone(&mock), CoordinatorLimits::default());

        engine.enqueue(vec![first]).await.unwrap();
        wait_until(
            || coordinator.multipart_held() && coordinator.chunks_in_flight() > 0,
            "the first session to start",
        )
        .await;

        let id = engine.snapshot().items[0].id;
        assert!(engine.cancel_item(id));
        wait_until(|| !coordinator.multipart_held(), "the lock to come back").await;

        let snapshot = engine.snapshot();
        assert_eq!(snapshot.items[0].state, ItemState::Failed);
        assert_eq!(snapshot.items[0].error.as_deref(), Some("transfer cancelled"));

        // The next multipart item can take the lock immediately.
        engine.enqueue(vec![second]).await.unwrap();
        wait_until(|| mock.negotiated().len() == 2, "the second negotiation").await;
        assert!(coordinator.multipart_held());

        mock.release();
        wait_until(
            || mock.completions.lock().unwrap().len() == 1,
            "the second session to complete",
        )
        .await;
        engine.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn queue_lingers_completed_then_returns_to_idle() {
        let dir = tempfile::tempdir().unwrap();
        let paths = vec![write_file(dir.path(), "one.jpg", 4 * KIB)];

        let mock = GatedGallery::new(40 * KIB, false);
        let (mut engine, _) = engine_with(mock, CoordinatorLimits::default());
        let mut events = engine.take_events().unwrap();

        engine.enqueue(paths).await.unwrap();
        events_until_phase(&mut events, QueuePhase::Completed).await;
        let completed_at = tokio::time::Instant::now();

        // While the completed state lingers, the queue is still populated.
        let snapshot = engine.snapshot();
        assert_eq!(snapshot.phase, QueuePhase::Completed);
        assert_eq!(snapshot.len(), 1);
        assert!((snapshot.overall - 1.0).abs() < 1e-9);

        events_until_phase(&mut events, QueuePhase::Idle).await;
        assert!(completed_at.elapsed() >= Duration::from_secs(2));
        assert!(engine.snapshot().is_empty());
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn producers_funnel_into_one_queue() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_file(dir.path(), "a.jpg", 4 * KIB);
        let b = write_file(dir.path(), "b.jpg", 4 * KIB);
        let c = write_file(dir.path(), "c.jpg", 4 * KIB);

        let mock = GatedGallery::new(40 * KIB, true);
        let (engine, _) = engine_with(Arc::clone(&mock), CoordinatorLimits::default());

        let producer_one = engine.producer();
        let producer_two = engine.producer();
        producer_one.enqueue(vec![a]).await.unwrap();
        producer_two.enqueue(vec![b]).await.unwrap();
        engine.enqueue(vec![c]).await.unwrap();

        wait_until(|| engine.snapshot().len() == 3, "all batches to land").await;
        mock.release();
        wait_until(
            || {
                engine
                    .snapshot()
                    .items
                    .iter()
                    .all(|i| i.state == ItemState::Completed)
            },
            "every item to complete",
        )
        .await;
        engine.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn unreadable_path_surfaces_as_failed_item() {
        let dir = tempfile::tempdir().unwrap();
        let ok = write_file(dir.path(), "ok.jpg", 4 * KIB);
        let gone = dir.path().join("gone.raw");

        let mock = GatedGallery::new(40 * KIB, false);
        let (mut engine, _) = engine_with(mock, CoordinatorLimits::default());
        let mut events = engine.take_events().unwrap();

        engine.enqueue(vec![ok, gone]).await.unwrap();
        let seen = events_until_phase(&mut events, QueuePhase::Completed).await;

        let failed: Vec<_> = seen
            .iter()
            .filter_map(|e| match e {
                UploadEvent::ItemFailed { reason, .. } => Some(reason.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(failed.len(), 1);
        assert!(failed[0].contains("cannot read file metadata"));
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn enqueue_after_shutdown_reports_closed_queue() {
        let mock = GatedGallery::new(40 * KIB, false);
        let (engine, _) = engine_with(mock, CoordinatorLimits::default());
        let producer = engine.producer();
        engine.shutdown().await;

        let err = producer.enqueue(vec![PathBuf::from("/tmp/x.jpg")]).await;
        assert!(matches!(err, Err(UploadError::QueueClosed)));
    }
}
