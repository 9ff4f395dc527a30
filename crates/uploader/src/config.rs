//! Engine configuration.

use std::time::Duration;

use shuttersync_transfer::DEFAULT_CHUNK_CANDIDATES;

/// Files at or above this size transfer as multipart sessions.
pub const DEFAULT_SINGLE_PART_THRESHOLD: u64 = 40 * 1024 * 1024;

/// How long the completed state stays visible before the queue goes idle.
pub const DEFAULT_COMPLETED_LINGER: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// Concurrency limits
// ---------------------------------------------------------------------------

/// Slot counts enforced by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorLimits {
    /// Small files transferring at once.
    pub small_slots: usize,
    /// Chunks in flight for the multipart session holding the lock.
    pub chunk_slots: usize,
}

impl Default for CoordinatorLimits {
    fn default() -> Self {
        Self {
            small_slots: 4,
            chunk_slots: 3,
        }
    }
}

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

/// Retry schedule for failed part transfers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts per part, the first try included.
    pub max_attempts: u32,
    /// Delay before the retry that follows the first failure.
    pub base_delay: Duration,
    /// Multiplier applied to the delay after each further failure.
    pub backoff_factor: f64,
    /// Ceiling for any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let delay = self.base_delay.as_secs_f64() * self.backoff_factor.powi(exponent as i32);
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }
}

// ---------------------------------------------------------------------------
// Engine configuration
// ---------------------------------------------------------------------------

/// Top-level configuration for one [`crate::UploadEngine`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Gallery every item of this engine is uploaded into.
    pub gallery_id: String,
    /// Size boundary between single-part and multipart transfers.
    pub single_part_threshold: u64,
    /// Chunk sizes the backend may pick from, smallest first.
    pub chunk_candidates: Vec<u64>,
    /// Concurrency budgets.
    pub limits: CoordinatorLimits,
    /// Retry schedule for part transfers.
    pub retry: RetryPolicy,
    /// Completed-state display time before the queue resets to idle.
    pub completed_linger: Duration,
}

impl EngineConfig {
    /// Configuration with production defaults for `gallery_id`.
    pub fn new(gallery_id: impl Into<String>) -> Self {
        Self {
            gallery_id: gallery_id.into(),
            single_part_threshold: DEFAULT_SINGLE_PART_THRESHOLD,
            chunk_candidates: DEFAULT_CHUNK_CANDIDATES.to_vec(),
            limits: CoordinatorLimits::default(),
            retry: RetryPolicy::default(),
            completed_linger: DEFAULT_COMPLETED_LINGER,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_limits() {
        let limits = CoordinatorLimits::default();
        assert_eq!(limits.small_slots, 4);
        assert_eq!(limits.chunk_slots, 3);
    }

    #[test]
    fn retry_delays_double_from_base() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(4));
    }

    #[test]
    fn retry_delay_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_secs(1),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(5),
        };
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(5));
        assert_eq!(policy.delay_for_attempt(9), Duration::from_secs(5));
    }

    #[test]
    fn engine_config_defaults() {
        let config = EngineConfig::new("gal-1");
        assert_eq!(config.gallery_id, "gal-1");
        assert_eq!(config.single_part_threshold, 40 * 1024 * 1024);
        assert_eq!(config.chunk_candidates, DEFAULT_CHUNK_CANDIDATES.to_vec());
        assert_eq!(config.completed_linger, Duration::from_secs(2));
        assert_eq!(config.retry.max_attempts, 3);
    }
}
