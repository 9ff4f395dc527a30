//! Chunk boundary planning for multipart transfers.
//!
//! The backend sizes a multipart upload as `floor(size / chunk) + 1` part
//! destinations, with the chunk size drawn from a fixed candidate set. The
//! planner inverts that: given the file size and the destination count from
//! negotiation, it recovers the chunk size the server chose and lays out the
//! matching byte ranges. Any deviation from the server formula produces
//! mismatched ranges and a failed assembly, so the boundary math lives in
//! one pure, heavily tested place.

/// Chunk sizes the backend picks from, ascending.
pub const DEFAULT_CHUNK_CANDIDATES: [u64; 3] =
    [10 * 1024 * 1024, 100 * 1024 * 1024, 250 * 1024 * 1024];

/// Errors from chunk planning.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanError {
    #[error("negotiation returned zero part destinations")]
    NoDestinations,

    #[error("no candidate chunk size yields {destinations} destinations for {file_size} bytes")]
    NoMatchingChunkSize { file_size: u64, destinations: usize },
}

/// One planned byte range. Part numbers are 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedChunk {
    pub part_number: u32,
    pub offset: u64,
    pub len: u64,
}

impl PlannedChunk {
    /// Index of this part's destination URL in the negotiated list.
    pub fn destination_index(&self) -> usize {
        (self.part_number - 1) as usize
    }
}

/// Boundary layout for one multipart session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPlan {
    chunk_size: u64,
    chunks: Vec<PlannedChunk>,
}

impl ChunkPlan {
    /// The chunk size recovered from the destination count.
    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Planned parts in ascending part-number order.
    pub fn chunks(&self) -> &[PlannedChunk] {
        &self.chunks
    }

    /// Number of parts that actually carry bytes.
    pub fn part_count(&self) -> usize {
        self.chunks.len()
    }

    /// Total bytes across all planned parts.
    pub fn planned_bytes(&self) -> u64 {
        self.chunks.iter().map(|c| c.len).sum()
    }
}

/// Computes part boundaries for a file of `file_size` bytes given the
/// destination count from negotiation.
///
/// The chunk size is the first candidate `c` with
/// `file_size / c + 1 == destinations`. When `file_size` is an exact
/// multiple of `c` the formula still counts a trailing empty part; that
/// destination is left unused and only non-empty parts are planned, so the
/// planned ranges always cover the file exactly with no gaps or overlaps.
pub fn plan_chunks(
    file_size: u64,
    destinations: usize,
    candidates: &[u64],
) -> Result<ChunkPlan, PlanError> {
    if destinations == 0 {
        return Err(PlanError::NoDestinations);
    }

    let chunk_size = candidates
        .iter()
        .copied()
        .find(|&c| c > 0 && file_size / c + 1 == destinations as u64)
        .ok_or(PlanError::NoMatchingChunkSize {
            file_size,
            destinations,
        })?;

    let mut chunks = Vec::with_capacity(destinations);
    let mut offset = 0u64;
    let mut part_number = 1u32;
    while offset < file_size {
        let len = chunk_size.min(file_size - offset);
        chunks.push(PlannedChunk {
            part_number,
            offset,
            len,
        });
        offset += len;
        part_number += 1;
    }

    Ok(ChunkPlan { chunk_size, chunks })
}
