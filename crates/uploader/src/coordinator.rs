//! Concurrency budgets for transfers.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::CoordinatorLimits;

/// Gates how many transfers run at once.
///
/// Three budgets: N small-file slots, one exclusive multipart lock, and M
/// chunk slots that only have meaning while the lock is held. Tokio
/// semaphores queue waiters fairly, so the longest-waiting multipart item
/// takes the lock next. Acquisitions return guards whose `Drop` gives the
/// permit back, so release happens on success, failure and cancellation
/// alike. The coordinator never closes its semaphores.
pub struct UploadCoordinator {
    small: Arc<Semaphore>,
    multipart: Arc<Semaphore>,
    chunks: Arc<Semaphore>,
    limits: CoordinatorLimits,
}

/// Permit to transfer one small file.
pub struct SmallSlot {
    _permit: OwnedSemaphorePermit,
}

/// Exclusive permit to run one multipart session.
pub struct MultipartLock {
    _permit: OwnedSemaphorePermit,
}

/// Permit to transfer one chunk of the lock-holding session.
pub struct ChunkSlot {
    _permit: OwnedSemaphorePermit,
}

impl UploadCoordinator {
    pub fn new(limits: CoordinatorLimits) -> Self {
        let limits = CoordinatorLimits {
            small_slots: limits.small_slots.max(1),
            chunk_slots: limits.chunk_slots.max(1),
        };
        Self {
            small: Arc::new(Semaphore::new(limits.small_slots)),
            multipart: Arc::new(Semaphore::new(1)),
            chunks: Arc::new(Semaphore::new(limits.chunk_slots)),
            limits,
        }
    }

    /// Waits until a small-file slot is free.
    pub async fn acquire_small(&self) -> SmallSlot {
        let permit = Arc::clone(&self.small)
            .acquire_owned()
            .await
            .expect("small semaphore closed");
        SmallSlot { _permit: permit }
    }

    /// Waits until the exclusive multipart lock is free. Waiters are served
    /// in arrival order.
    pub async fn acquire_multipart(&self) -> MultipartLock {
        let permit = Arc::clone(&self.multipart)
            .acquire_owned()
            .await
            .expect("multipart semaphore closed");
        MultipartLock { _permit: permit }
    }

    /// Waits until a chunk slot is free. Callers must hold the multipart
    /// lock, which the `lock` parameter enforces at compile time.
    pub async fn acquire_chunk(&self, _lock: &MultipartLock) -> ChunkSlot {
        let permit = Arc::clone(&self.chunks)
            .acquire_owned()
            .await
            .expect("chunk semaphore closed");
        ChunkSlot { _permit: permit }
    }

    /// Small-file transfers currently holding a slot.
    pub fn small_in_flight(&self) -> usize {
        self.limits.small_slots - self.small.available_permits()
    }

    /// Whether some session currently holds the multipart lock.
    pub fn multipart_held(&self) -> bool {
        self.multipart.available_permits() == 0
    }

    /// Chunk transfers currently holding a slot.
    pub fn chunks_in_flight(&self) -> usize {
        self.limits.chunk_slots - self.chunks.available_permits()
    }

    pub fn limits(&self) -> CoordinatorLimits {
        self.limits
    }
}

impl Default for UploadCoordinator {
    fn default() -> Self {
        Self::new(CoordinatorLimits::default())
    }
}
