//! Error types for the upload engine.

use shuttersync_transfer::TransferError;

/// Errors produced while transferring one upload item.
///
/// Only `PartTransfer` is preceded by local retries; every other kind is
/// terminal for its item on first occurrence. An item failure never blocks
/// the rest of the queue.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    /// The backend rejected or failed the asset negotiation call.
    #[error("asset negotiation failed: {0}")]
    Negotiation(String),

    /// A chunk could not be read from local disk.
    #[error("chunk read failed: {0}")]
    ChunkRead(#[from] TransferError),

    /// One part kept failing after the full retry schedule.
    #[error("part {part} failed after {attempts} attempts: {reason}")]
    PartTransfer {
        part: u32,
        attempts: u32,
        reason: String,
    },

    /// Storage accepted a part but returned no etag for it.
    #[error("part {part} was stored without an etag")]
    MissingEtag { part: u32 },

    /// The session completion call failed.
    #[error("multipart completion rejected: {0}")]
    Completion(String),

    /// A single-part form transfer failed.
    #[error("single-part transfer failed: {0}")]
    SinglePart(String),

    /// The item was cancelled before it finished.
    #[error("transfer cancelled")]
    Cancelled,

    /// The engine intake loop is no longer running.
    #[error("upload queue is closed")]
    QueueClosed,
}
