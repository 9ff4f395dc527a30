//! Queue items, multipart sessions, events and snapshots.

use std::path::PathBuf;
use std::time::Duration;

use shuttersync_gallery_api::{MultipartTicket, TransferMode};
use shuttersync_transfer::ChunkPlan;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Items
// ---------------------------------------------------------------------------

/// Lifecycle state of one upload item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemState {
    /// Waiting for a transfer slot.
    Queued,
    /// Holding a slot and transferring.
    Active,
    /// All bytes stored and acknowledged.
    Completed,
    /// Terminally failed; the rest of the queue keeps going.
    Failed,
}

impl ItemState {
    /// Completed and failed items never leave their state.
    pub fn is_terminal(self) -> bool {
        matches!(self, ItemState::Completed | ItemState::Failed)
    }
}

/// One file in the upload queue.
#[derive(Debug, Clone)]
pub struct UploadItem {
    pub id: Uuid,
    pub path: PathBuf,
    /// File name sent to the backend.
    pub name: String,
    pub size: u64,
    pub mode: TransferMode,
    pub state: ItemState,
    /// Bytes acknowledged by storage so far.
    pub transferred: u64,
    /// Part retry count across the whole item.
    pub retries: u32,
    /// Failure reason once `state` is [`ItemState::Failed`].
    pub error: Option<String>,
}

impl UploadItem {
    /// Completion fraction in `0.0..=1.0`.
    pub fn fraction(&self) -> f64 {
        match self.state {
            ItemState::Completed => 1.0,
            _ if self.size == 0 => 0.0,
            _ => (self.transferred as f64 / self.size as f64).clamp(0.0, 1.0),
        }
    }
}

// ---------------------------------------------------------------------------
// Multipart session
// ---------------------------------------------------------------------------

/// Transfer state of one planned part. `etag` is set only after the part
/// was stored successfully.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkDescriptor {
    /// 1-based part number.
    pub part_number: u32,
    pub offset: u64,
    pub len: u64,
    pub etag: Option<String>,
}

/// Server-side context of one in-flight multipart upload.
#[derive(Debug, Clone)]
pub struct MultipartSession {
    pub upload_id: String,
    pub storage_key: String,
    /// Pre-signed destination URLs, one per possible part.
    pub destinations: Vec<String>,
    pub chunk_size: u64,
    chunks: Vec<ChunkDescriptor>,
}

impl MultipartSession {
    /// Binds a negotiated ticket to its local chunk plan.
    pub fn new(ticket: &MultipartTicket, plan: &ChunkPlan) -> Self {
        let chunks = plan
            .chunks()
            .iter()
            .map(|c| ChunkDescriptor {
                part_number: c.part_number,
                offset: c.offset,
                len: c.len,
                etag: None,
            })
            .collect();
        Self {
            upload_id: ticket.upload_id.clone(),
            storage_key: ticket.storage_key.clone(),
            destinations: ticket.part_urls.clone(),
            chunk_size: plan.chunk_size(),
            chunks,
        }
    }

    /// Records the etag storage returned for `part_number`.
    pub fn record_etag(&mut self, part_number: u32, etag: String) {
        if let Some(chunk) = self
            .chunks
            .iter_mut()
            .find(|c| c.part_number == part_number)
        {
            chunk.etag = Some(etag);
        }
    }

    pub fn chunks(&self) -> &[ChunkDescriptor] {
        &self.chunks
    }
}

// ---------------------------------------------------------------------------
// Queue surface
// ---------------------------------------------------------------------------

/// Queue-level state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueuePhase {
    /// Nothing enqueued.
    Idle,
    /// At least one item not yet settled.
    Uploading,
    /// Every item settled; shown until the linger elapses.
    Completed,
}

/// Events published while the queue runs. Emission never blocks transfers;
/// events are dropped when the receiver lags behind.
#[derive(Debug, Clone)]
pub enum UploadEvent {
    BatchEnqueued { count: usize },
    ItemStarted { item_id: Uuid },
    ItemProgress { item_id: Uuid, fraction: f64, overall: f64 },
    ItemCompleted { item_id: Uuid },
    ItemFailed { item_id: Uuid, reason: String },
    PhaseChanged { phase: QueuePhase },
}

/// Point-in-time view of the whole queue.
#[derive(Debug, Clone)]
pub struct QueueSnapshot {
    pub phase: QueuePhase,
    /// Items in processing order.
    pub items: Vec<UploadItem>,
    /// 1-based position of the furthest item started, if any is active.
    pub active_index: Option<usize>,
    /// Byte-weighted overall completion in `0.0..=1.0`.
    pub overall: f64,
    /// Observed throughput in bytes per second.
    pub speed_bps: f64,
    /// Estimated time until the queue drains.
    pub eta: Option<Duration>,
    pub total_bytes: u64,
    pub transferred_bytes: u64,
}

impl QueueSnapshot {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Byte weight of one item relative to the whole queue.
    pub fn item_weight(&self, id: Uuid) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        self.items
            .iter()
            .find(|i| i.id == id)
            .map(|i| i.size as f64 / self.total_bytes as f64)
            .unwrap_or(0.0)
    }
}
