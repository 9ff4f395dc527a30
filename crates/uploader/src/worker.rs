//! Per-item transfer execution.

use std::sync::Arc;

use bytes::Bytes;
use futures_util::future::join_all;
use shuttersync_gallery_api::{
    ApiError, CompleteMultipartRequest, CreateAssetRequest, TransferMode,
};
use shuttersync_transfer::{PlannedChunk, RangeReader, TransferError, plan_chunks};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::completion::ordered_parts;
use crate::config::{EngineConfig, RetryPolicy};
use crate::coordinator::{MultipartLock, UploadCoordinator};
use crate::error::UploadError;
use crate::progress::ProgressAggregator;
use crate::transport::GalleryTransport;
use crate::types::{MultipartSession, UploadItem};

/// Executes one upload item end to end.
///
/// Budget guards drop on every exit path, so slots and the multipart lock
/// come back on success, failure and cancellation alike. Cancellation is
/// checked before each await that could block for long.
pub struct ItemWorker {
    transport: Arc<dyn GalleryTransport>,
    coordinator: Arc<UploadCoordinator>,
    tracker: Arc<ProgressAggregator>,
    config: Arc<EngineConfig>,
    cancel: CancellationToken,
}

impl ItemWorker {
    pub fn new(
        transport: Arc<dyn GalleryTransport>,
        coordinator: Arc<UploadCoordinator>,
        tracker: Arc<ProgressAggregator>,
        config: Arc<EngineConfig>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            transport,
            coordinator,
            tracker,
            config,
            cancel,
        }
    }

    /// Runs the transfer for `item` under its budget.
    pub async fn run(&self, item: &UploadItem) -> Result<(), UploadError> {
        match item.mode {
            TransferMode::Single => self.run_single(item).await,
            TransferMode::Multipart => self.run_multipart(item).await,
        }
    }

    // -----------------------------------------------------------------------
    // Single-part pipeline
    // -----------------------------------------------------------------------

    async fn run_single(&self, item: &UploadItem) -> Result<(), UploadError> {
        let _slot = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(UploadError::Cancelled),
            slot = self.coordinator.acquire_small() => slot,
        };
        self.tracker.item_started(item.id);
        info!(item = %item.name, size = item.size, "single-part transfer started");

        let req = self.asset_request(item);
        let ticket = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(UploadError::Cancelled),
            res = self.transport.negotiate_single(&req) => {
                res.map_err(|e| UploadError::Negotiation(e.to_string()))?
            }
        };

        let reader =
            RangeReader::open(&item.path).map_err(|e| UploadError::SinglePart(e.to_string()))?;
        let data = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(UploadError::Cancelled),
            res = reader.read_all() => match res {
                Ok(bytes) => Bytes::from(bytes),
                Err(err) => return Err(UploadError::SinglePart(err.to_string())),
            },
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(UploadError::Cancelled),
            res = self.transport.post_form(&ticket, &item.name, data) => {
                res.map_err(|e| UploadError::SinglePart(e.to_string()))?
            }
        }

        self.tracker.add_transferred(item.id, item.size);
        info!(item = %item.name, "single-part transfer completed");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Multipart pipeline
    // -----------------------------------------------------------------------

    async fn run_multipart(&self, item: &UploadItem) -> Result<(), UploadError> {
        let lock = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(UploadError::Cancelled),
            lock = self.coordinator.acquire_multipart() => lock,
        };
        self.tracker.item_started(item.id);
        info!(item = %item.name, size = item.size, "multipart session started");

        let req = self.asset_request(item);
        let ticket = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(UploadError::Cancelled),
            res = self.transport.negotiate_multipart(&req) => {
                res.map_err(|e| UploadError::Negotiation(e.to_string()))?
            }
        };

        let plan = plan_chunks(item.size, ticket.part_urls.len(), &self.config.chunk_candidates)
            .map_err(|e| UploadError::Negotiation(e.to_string()))?;
        let mut session = MultipartSession::new(&ticket, &plan);
        debug!(
            item = %item.name,
            parts = plan.part_count(),
            chunk_size = plan.chunk_size(),
            "chunk plan ready"
        );

        let reader = Arc::new(RangeReader::open(&item.path)?);
        // Chunks of a failing session stop starting; in-flight ones finish.
        let session_abort = CancellationToken::new();
        let lock = Arc::new(lock);

        let mut tasks = Vec::with_capacity(plan.part_count());
        for chunk in plan.chunks() {
            let ctx = ChunkContext {
                transport: Arc::clone(&self.transport),
                coordinator: Arc::clone(&self.coordinator),
                tracker: Arc::clone(&self.tracker),
                retry: self.config.retry,
                item_id: item.id,
                url: session.destinations[chunk.destination_index()].clone(),
                reader: Arc::clone(&reader),
                lock: Arc::clone(&lock),
                cancel: self.cancel.clone(),
                session_abort: session_abort.clone(),
            };
            tasks.push(tokio::spawn(upload_chunk(ctx, chunk.clone())));
        }

        // The lock stays held until every spawned chunk has settled and the
        // completion call returned, i.e. until this frame drops its Arc.
        let mut failure: Option<UploadError> = None;
        for result in join_all(tasks).await {
            let outcome = match result {
                Ok(outcome) => outcome,
                Err(join_err) => Err(UploadError::ChunkRead(TransferError::Task(
                    join_err.to_string(),
                ))),
            };
            match outcome {
                Ok(done) => session.record_etag(done.part_number, done.etag),
                Err(err) => {
                    let keep_new = match &failure {
                        None => true,
                        Some(UploadError::Cancelled) => !matches!(err, UploadError::Cancelled),
                        Some(_) => false,
                    };
                    if keep_new {
                        failure = Some(err);
                    }
                }
            }
        }
        if let Some(err) = failure {
            return Err(err);
        }

        let parts =
            ordered_parts(session.chunks()).map_err(|e| UploadError::Completion(e.to_string()))?;
        let complete_req = CompleteMultipartRequest {
            storage_key: session.storage_key.clone(),
            upload_id: session.upload_id.clone(),
            parts,
        };
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(UploadError::Cancelled),
            res = self.transport.finish_multipart(&complete_req) => {
                res.map_err(|e| UploadError::Completion(e.to_string()))?
            }
        }

        info!(
            item = %item.name,
            parts = session.chunks().len(),
            "multipart session completed"
        );
        Ok(())
    }

    fn asset_request(&self, item: &UploadItem) -> CreateAssetRequest {
        CreateAssetRequest {
            gallery_id: self.config.gallery_id.clone(),
            name: item.name.clone(),
            content_length: item.size,
            transfer_mode: item.mode,
        }
    }
}

// ---------------------------------------------------------------------------
// Chunk transfer
// ---------------------------------------------------------------------------

struct ChunkContext {
    transport: Arc<dyn GalleryTransport>,
    coordinator: Arc<UploadCoordinator>,
    tracker: Arc<ProgressAggregator>,
    retry: RetryPolicy,
    item_id: Uuid,
    url: String,
    reader: Arc<RangeReader>,
    /// Keeps the session lock alive while this chunk is in flight.
    lock: Arc<MultipartLock>,
    cancel: CancellationToken,
    session_abort: CancellationToken,
}

struct CompletedChunk {
    part_number: u32,
    etag: String,
}

/// Transfers one planned chunk under a chunk slot, retrying per policy.
/// Retries cover transfer failures only; a missing etag or a failed local
/// read is terminal and aborts the rest of the session.
async fn upload_chunk(
    ctx: ChunkContext,
    chunk: PlannedChunk,
) -> Result<CompletedChunk, UploadError> {
    let _slot = tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => return Err(UploadError::Cancelled),
        _ = ctx.session_abort.cancelled() => return Err(UploadError::Cancelled),
        slot = ctx.coordinator.acquire_chunk(&ctx.lock) => slot,
    };

    let data = tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => return Err(UploadError::Cancelled),
        res = ctx.reader.read_range(chunk.offset, chunk.len) => match res {
            Ok(bytes) => Bytes::from(bytes),
            Err(err) => {
                ctx.session_abort.cancel();
                return Err(UploadError::ChunkRead(err));
            }
        },
    };

    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let result = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return Err(UploadError::Cancelled),
            res = ctx.transport.put_part(&ctx.url, data.clone()) => res,
        };
        match result {
            Ok(etag) => {
                ctx.tracker.add_transferred(ctx.item_id, chunk.len);
                debug!(part = chunk.part_number, attempts = attempt, "chunk stored");
                return Ok(CompletedChunk {
                    part_number: chunk.part_number,
                    etag,
                });
            }
            Err(ApiError::MissingEtag) => {
                ctx.session_abort.cancel();
                return Err(UploadError::MissingEtag {
                    part: chunk.part_number,
                });
            }
            Err(err) if attempt < ctx.retry.max_attempts => {
                ctx.tracker.add_retry(ctx.item_id);
                let delay = ctx.retry.delay_for_attempt(attempt);
                warn!(
                    part = chunk.part_number,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "part transfer failed, retrying"
                );
                tokio::select! {
                    biased;
                    _ = ctx.cancel.cancelled() => return Err(UploadError::Cancelled),
                    _ = ctx.session_abort.cancelled() => return Err(UploadError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(err) => {
                ctx.session_abort.cancel();
                warn!(
                    part = chunk.part_number,
                    attempts = attempt,
                    error = %err,
                    "part transfer exhausted its retries"
                );
                return Err(UploadError::PartTransfer {
                    part: chunk.part_number,
                    attempts: attempt,
                    reason: err.to_string(),
                });
            }
        }
    }
}
