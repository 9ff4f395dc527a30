//! Byte-weighted progress aggregation across the queue.

use std::collections::HashMap;
use std::sync::RwLock;

use shuttersync_transfer::RateMeter;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::types::{ItemState, QueuePhase, QueueSnapshot, UploadEvent, UploadItem};

/// Tracks every item of the running queue and derives the aggregate view.
///
/// Workers report byte deltas as storage acknowledges them; the aggregate
/// completion is the byte-weighted sum of per-item fractions, so a large
/// file moves the overall number proportionally more than a small one.
/// State updates never block transfers: events are emitted with `try_send`
/// and dropped when the receiver lags.
pub struct ProgressAggregator {
    inner: RwLock<AggregatorInner>,
    rate: RateMeter,
    events_tx: mpsc::Sender<UploadEvent>,
}

struct AggregatorInner {
    items: Vec<UploadItem>,
    by_id: HashMap<Uuid, usize>,
    phase: QueuePhase,
    /// Bumped per batch; guards the delayed idle reset against late timers.
    epoch: u64,
}

impl ProgressAggregator {
    pub fn new(events_tx: mpsc::Sender<UploadEvent>) -> Self {
        Self {
            inner: RwLock::new(AggregatorInner {
                items: Vec::new(),
                by_id: HashMap::new(),
                phase: QueuePhase::Idle,
                epoch: 0,
            }),
            rate: RateMeter::new(),
            events_tx,
        }
    }

    /// Adds one ordered batch and moves the queue to uploading. Items that
    /// arrive already failed, like files that could not be stat'ed, get
    /// their failure event here.
    pub fn enqueue_batch(&self, batch: Vec<UploadItem>) {
        let count = batch.len();
        if count == 0 {
            return;
        }
        let mut already_failed = Vec::new();
        let phase_changed = {
            let mut inner = self.inner.write().unwrap();
            inner.epoch += 1;
            for item in batch {
                if item.state == ItemState::Failed {
                    already_failed
                        .push((item.id, item.error.clone().unwrap_or_default()));
                }
                let idx = inner.items.len();
                inner.by_id.insert(item.id, idx);
                inner.items.push(item);
            }
            let changed = inner.phase != QueuePhase::Uploading;
            inner.phase = QueuePhase::Uploading;
            changed
        };
        self.emit(UploadEvent::BatchEnqueued { count });
        if phase_changed {
            self.emit(UploadEvent::PhaseChanged {
                phase: QueuePhase::Uploading,
            });
        }
        for (item_id, reason) in already_failed {
            self.emit(UploadEvent::ItemFailed { item_id, reason });
        }
    }

    /// Marks an item active once it holds a transfer slot.
    pub fn item_started(&self, id: Uuid) {
        let known = {
            let mut inner = self.inner.write().unwrap();
            inner.update(id, |item| item.state = ItemState::Active)
        };
        if known {
            self.emit(UploadEvent::ItemStarted { item_id: id });
        }
    }

    /// Records `bytes` acknowledged by storage for `id`.
    pub fn add_transferred(&self, id: Uuid, bytes: u64) {
        let progress = {
            let mut inner = self.inner.write().unwrap();
            if !inner.update(id, |item| item.transferred += bytes) {
                return;
            }
            let idx = inner.by_id[&id];
            let fraction = inner.items[idx].fraction();
            (fraction, inner.overall())
        };
        self.rate.record(bytes);
        self.emit(UploadEvent::ItemProgress {
            item_id: id,
            fraction: progress.0,
            overall: progress.1,
        });
    }

    /// Counts one part retry against `id`.
    pub fn add_retry(&self, id: Uuid) {
        let mut inner = self.inner.write().unwrap();
        inner.update(id, |item| item.retries += 1);
    }

    pub fn item_completed(&self, id: Uuid) {
        let known = {
            let mut inner = self.inner.write().unwrap();
            inner.update(id, |item| {
                item.state = ItemState::Completed;
                item.transferred = item.size;
            })
        };
        if known {
            self.emit(UploadEvent::ItemCompleted { item_id: id });
        }
    }

    pub fn item_failed(&self, id: Uuid, reason: String) {
        let known = {
            let mut inner = self.inner.write().unwrap();
            inner.update(id, |item| {
                item.state = ItemState::Failed;
                item.error = Some(reason.clone());
            })
        };
        if known {
            self.emit(UploadEvent::ItemFailed {
                item_id: id,
                reason,
            });
        }
    }

    /// Whether every enqueued item reached a terminal state.
    pub fn all_settled(&self) -> bool {
        let inner = self.inner.read().unwrap();
        !inner.items.is_empty() && inner.items.iter().all(|i| i.state.is_terminal())
    }

    /// Moves the queue to completed once everything settled. Returns the
    /// epoch to pass to [`Self::reset_if_epoch`] after the linger.
    pub fn complete_queue(&self) -> Option<u64> {
        let epoch = {
            let mut inner = self.inner.write().unwrap();
            if inner.phase != QueuePhase::Uploading
                || inner.items.is_empty()
                || !inner.items.iter().all(|i| i.state.is_terminal())
            {
                return None;
            }
            inner.phase = QueuePhase::Completed;
            inner.epoch
        };
        self.emit(UploadEvent::PhaseChanged {
            phase: QueuePhase::Completed,
        });
        Some(epoch)
    }

    /// Clears the queue back to idle, unless a newer batch arrived since
    /// `epoch` was observed.
    pub fn reset_if_epoch(&self, epoch: u64) {
        let reset = {
            let mut inner = self.inner.write().unwrap();
            if inner.epoch != epoch || inner.phase != QueuePhase::Completed {
                false
            } else {
                inner.items.clear();
                inner.by_id.clear();
                inner.phase = QueuePhase::Idle;
                true
            }
        };
        if reset {
            self.rate.reset();
            self.emit(UploadEvent::PhaseChanged {
                phase: QueuePhase::Idle,
            });
        }
    }

    pub fn phase(&self) -> QueuePhase {
        self.inner.read().unwrap().phase
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        let inner = self.inner.read().unwrap();
        let total_bytes: u64 = inner.items.iter().map(|i| i.size).sum();
        let transferred_bytes: u64 = inner
            .items
            .iter()
            .map(|i| i.transferred.min(i.size))
            .sum();
        let active_index = inner
            .items
            .iter()
            .rposition(|i| i.state == ItemState::Active)
            .map(|i| i + 1);
        QueueSnapshot {
            phase: inner.phase,
            items: inner.items.clone(),
            active_index,
            overall: inner.overall(),
            speed_bps: self.rate.bytes_per_second(),
            eta: self.rate.eta(total_bytes.saturating_sub(transferred_bytes)),
            total_bytes,
            transferred_bytes,
        }
    }

    fn emit(&self, event: UploadEvent) {
        let _ = self.events_tx.try_send(event);
    }
}

impl AggregatorInner {
    fn update(&mut self, id: Uuid, apply: impl FnOnce(&mut UploadItem)) -> bool {
        match self.by_id.get(&id).copied() {
            Some(idx) => {
                apply(&mut self.items[idx]);
                true
            }
            None => false,
        }
    }

    /// Byte-weighted completion over every enqueued item.
    fn overall(&self) -> f64 {
        let total: u64 = self.items.iter().map(|i| i.size).sum();
        if total == 0 {
            let settled =
                !self.items.is_empty() && self.items.iter().all(|i| i.state.is_terminal());
            return if settled { 1.0 } else { 0.0 };
        }
        self.items
            .iter()
            .map(|i| (i.size as f64 / total as f64) * i.fraction())
            .sum()
    }
}
