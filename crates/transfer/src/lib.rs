//! Local transfer primitives for the upload engine.
//!
//! Chunk boundary planning, random-access range reads, and transfer-rate
//! estimation. Everything here is local: no network I/O, no queue state.

mod planner;
mod rate;
mod reader;

pub use planner::{ChunkPlan, DEFAULT_CHUNK_CANDIDATES, PlanError, PlannedChunk, plan_chunks};
pub use rate::RateMeter;
pub use reader::RangeReader;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("range {offset}+{len} exceeds file length {file_len}")]
    RangeOutOfBounds { offset: u64, len: u64, file_len: u64 },

    #[error("blocking read task failed: {0}")]
    Task(String),
}
