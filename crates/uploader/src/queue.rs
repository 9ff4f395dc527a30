//! Batch intake: stat, classify, order.

use std::path::PathBuf;

use shuttersync_gallery_api::TransferMode;
use tracing::warn;
use uuid::Uuid;

use crate::types::{ItemState, UploadItem};

/// Picks the transfer mode for a file of `size` bytes. A file exactly at
/// the threshold goes multipart.
pub fn transfer_mode_for(size: u64, threshold: u64) -> TransferMode {
    if size < threshold {
        TransferMode::Single
    } else {
        TransferMode::Multipart
    }
}

/// Orders one batch small-files-first. The partition is stable: relative
/// order within each class is kept, and it happens once per batch, so items
/// finishing later never reshuffle the queue.
pub fn order_batch(items: Vec<UploadItem>) -> Vec<UploadItem> {
    let (mut singles, multiparts): (Vec<_>, Vec<_>) = items
        .into_iter()
        .partition(|item| item.mode == TransferMode::Single);
    singles.extend(multiparts);
    singles
}

/// Builds ordered queue items for one enqueued batch of paths.
///
/// A path that cannot be stat'ed becomes an immediately failed item, so the
/// problem stays visible in the queue instead of silently vanishing.
pub async fn build_batch(paths: Vec<PathBuf>, threshold: u64) -> Vec<UploadItem> {
    let mut items = Vec::with_capacity(paths.len());
    for path in paths {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        match tokio::fs::metadata(&path).await {
            Ok(meta) => {
                let size = meta.len();
                items.push(UploadItem {
                    id: Uuid::new_v4(),
                    path,
                    name,
                    size,
                    mode: transfer_mode_for(size, threshold),
                    state: ItemState::Queued,
                    transferred: 0,
                    retries: 0,
                    error: None,
                });
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "cannot stat enqueued file");
                items.push(UploadItem {
                    id: Uuid::new_v4(),
                    path,
                    name,
                    size: 0,
                    mode: TransferMode::Single,
                    state: ItemState::Failed,
                    transferred: 0,
                    retries: 0,
                    error: Some(format!("cannot read file metadata: {err}")),
                });
            }
        }
    }
    order_batch(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MIB: u64 = 1024 * 1024;

    fn item(name: &str, size: u64, threshold: u64) -> UploadItem {
        UploadItem {
            id: Uuid::new_v4(),
            path: PathBuf::from(format!("/tmp/{name}")),
            name: name.into(),
            size,
            mode: transfer_mode_for(size, threshold),
            state: ItemState::Queued,
            transferred: 0,
            retries: 0,
            error: None,
        }
    }

    #[test]
    fn threshold_boundary_goes_multipart() {
        assert_eq!(
            transfer_mode_for(40 * MIB - 1, 40 * MIB),
            TransferMode::Single
        );
        assert_eq!(transfer_mode_for(40 * MIB, 40 * MIB), TransferMode::Multipart);
        assert_eq!(transfer_mode_for(0, 40 * MIB), TransferMode::Single);
    }

    #[test]
    fn order_is_stable_small_first() {
        let threshold = 40 * MIB;
        let batch = vec![
            item("big-a.raw", 100 * MIB, threshold),
            item("small-a.jpg", MIB, threshold),
            item("big-b.raw", 90 * MIB, threshold),
            item("small-b.jpg", 2 * MIB, threshold),
        ];
        let names: Vec<_> = order_batch(batch).into_iter().map(|i| i.name).collect();
        assert_eq!(names, vec!["small-a.jpg", "small-b.jpg", "big-a.raw", "big-b.raw"]);
    }

    #[tokio::test]
    async fn build_batch_stats_and_orders() {
        let dir = tempfile::tempdir().unwrap();
        let large = dir.path().join("shoot.raw");
        let small = dir.path().join("thumb.jpg");
        std::fs::File::create(&large)
            .unwrap()
            .write_all(&vec![0u8; 4096])
            .unwrap();
        std::fs::File::create(&small)
            .unwrap()
            .write_all(&vec![0u8; 100])
            .unwrap();

        let items = build_batch(vec![large, small], 1024).await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].name, "thumb.jpg");
        assert_eq!(items[0].mode, TransferMode::Single);
        assert_eq!(items[0].size, 100);
        assert_eq!(items[1].name, "shoot.raw");
        assert_eq!(items[1].mode, TransferMode::Multipart);
        assert!(items.iter().all(|i| i.state == ItemState::Queued));
    }

    #[tokio::test]
    async fn duplicate_paths_become_independent_items() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("same.jpg");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(&vec![0u8; 64])
            .unwrap();

        let items = build_batch(vec![path.clone(), path], 1024).await;
        assert_eq!(items.len(), 2);
        assert_ne!(items[0].id, items[1].id);
        assert_eq!(items[0].path, items[1].path);
    }

    #[tokio::test]
    async fn missing_file_becomes_failed_item() {
        let dir = tempfile::tempdir().unwrap();
        let gone = dir.path().join("deleted.raw");

        let items = build_batch(vec![gone], 1024).await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].state, ItemState::Failed);
        assert_eq!(items[0].name, "deleted.raw");
        assert!(items[0]
            .error
            .as_deref()
            .unwrap()
            .contains("cannot read file metadata"));
    }
}
