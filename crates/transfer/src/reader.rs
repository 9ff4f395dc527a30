//! Random-access file reads for concurrent chunk transfers.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::TransferError;

/// Read-only handle serving byte ranges of one file on demand.
///
/// The file is opened once per upload item and shared across chunk tasks.
/// Ranges use positioned reads, so concurrent tasks never contend on a seek
/// cursor, and reads run on the blocking pool. Dropping the reader closes
/// the handle; the worker's scope exit is the release point on success and
/// failure alike.
#[derive(Debug)]
pub struct RangeReader {
    file: Arc<File>,
    len: u64,
    path: PathBuf,
}

impl RangeReader {
    /// Opens `path` and records its current length.
    pub fn open(path: &Path) -> Result<Self, TransferError> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            file: Arc::new(file),
            len,
            path: path.to_path_buf(),
        })
    }

    /// File length at open time.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads exactly `len` bytes starting at `offset`.
    ///
    /// The range must lie within the file length recorded at open time.
    pub async fn read_range(&self, offset: u64, len: u64) -> Result<Vec<u8>, TransferError> {
        let out_of_bounds = Err(TransferError::RangeOutOfBounds {
            offset,
            len,
            file_len: self.len,
        });
        match offset.checked_add(len) {
            Some(end) if end <= self.len => {}
            _ => return out_of_bounds,
        }
        if len == 0 {
            return Ok(Vec::new());
        }

        let file = Arc::clone(&self.file);
        tokio::task::spawn_blocking(move || {
            let mut buf = vec![0u8; len as usize];
            read_exact_at(&file, &mut buf, offset)?;
            Ok(buf)
        })
        .await
        .map_err(|e| TransferError::Task(e.to_string()))?
    }

    /// Reads the whole file (single-part transfers).
    pub async fn read_all(&self) -> Result<Vec<u8>, TransferError> {
        self.read_range(0, self.len).await
    }
}

#[cfg(unix)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
}

#[cfg(windows)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<()> {
    use std::os::windows::fs::FileExt;
    let mut filled = 0usize;
    let mut pos = offset;
    while filled < buf.len() {
        let n = file.seek_read(&mut buf[filled..], pos)?;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "file shorter than recorded length",
            ));
        }
        filled += n;
        pos += n as u64;
    }
    Ok(())
}
