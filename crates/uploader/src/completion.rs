//! Completion list assembly for multipart sessions.

use shuttersync_gallery_api::CompletedPart;

use crate::types::ChunkDescriptor;

/// Why a chunk set cannot be turned into a completion list.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompletionListError {
    #[error("no parts to complete")]
    Empty,
    #[error("part {part} has no etag")]
    MissingEtag { part: u32 },
    #[error("duplicate part number {part}")]
    DuplicatePart { part: u32 },
    #[error("part numbers not contiguous: expected {expected}, found {found}")]
    PartGap { expected: u32, found: u32 },
}

/// Builds the ordered `(etag, part number)` list the backend needs to
/// assemble a multipart upload.
///
/// Chunks may arrive in any completion order; the output is strictly
/// ascending by part number starting at 1, one entry per planned chunk,
/// each carrying the etag storage returned. Any gap, duplicate or missing
/// etag rejects the whole list.
pub fn ordered_parts(
    chunks: &[ChunkDescriptor],
) -> Result<Vec<CompletedPart>, CompletionListError> {
    if chunks.is_empty() {
        return Err(CompletionListError::Empty);
    }

    let mut sorted: Vec<&ChunkDescriptor> = chunks.iter().collect();
    sorted.sort_by_key(|c| c.part_number);

    let mut parts = Vec::with_capacity(sorted.len());
    let mut expected = 1u32;
    let mut previous = None;
    for chunk in sorted {
        if previous == Some(chunk.part_number) {
            return Err(CompletionListError::DuplicatePart {
                part: chunk.part_number,
            });
        }
        if chunk.part_number != expected {
            return Err(CompletionListError::PartGap {
                expected,
                found: chunk.part_number,
            });
        }
        let etag = chunk
            .etag
            .clone()
            .ok_or(CompletionListError::MissingEtag {
                part: chunk.part_number,
            })?;
        parts.push(CompletedPart {
            etag,
            part_number: chunk.part_number,
        });
        previous = Some(chunk.part_number);
        expected += 1;
    }
    Ok(parts)
}
