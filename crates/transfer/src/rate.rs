//! Sliding-window transfer rate estimation.

use std::sync::Mutex;
use std::time::{Duration, Instant};

const DEFAULT_WINDOW: Duration = Duration::from_secs(5);
const DEFAULT_MAX_SAMPLES: usize = 100;

struct Sample {
    bytes: u64,
    at: Instant,
}

/// Estimates transfer speed from byte samples inside a sliding window.
///
/// Chunk and file completions feed samples; the snapshot path asks for
/// bytes/second and an ETA. Old samples age out of the window so the rate
/// follows current throughput rather than the whole session average.
pub struct RateMeter {
    inner: Mutex<MeterInner>,
}

struct MeterInner {
    samples: Vec<Sample>,
    window: Duration,
    max_samples: usize,
}

impl RateMeter {
    /// Creates a meter with the default 5 s window and 100-sample cap.
    pub fn new() -> Self {
        Self::with_window(DEFAULT_WINDOW, DEFAULT_MAX_SAMPLES)
    }

    pub fn with_window(window: Duration, max_samples: usize) -> Self {
        Self {
            inner: Mutex::new(MeterInner {
                samples: Vec::new(),
                window,
                max_samples,
            }),
        }
    }

    /// Records `bytes` transferred at the current instant.
    pub fn record(&self, bytes: u64) {
        let mut inner = self.inner.lock().unwrap();
        let now = Instant::now();
        inner.samples.push(Sample { bytes, at: now });

        // Age out samples older than the window.
        let cutoff = now - inner.window;
        inner.samples.retain(|sample| sample.at >= cutoff);

        // Cap retained samples.
        if inner.samples.len() > inner.max_samples {
            let excess = inner.samples.len() - inner.max_samples;
            inner.samples.drain(..excess);
        }
    }

    /// Average speed in bytes/second across the window.
    ///
    /// Returns 0.0 with fewer than 2 samples.
    pub fn bytes_per_second(&self) -> f64 {
        let inner = self.inner.lock().unwrap();
        if inner.samples.len() < 2 {
            return 0.0;
        }

        let first = &inner.samples[0];
        let last = &inner.samples[inner.samples.len() - 1];
        let elapsed = last.at.duration_since(first.at);
        if elapsed.is_zero() {
            return 0.0;
        }

        let total: u64 = inner.samples.iter().map(|s| s.bytes).sum();
        total as f64 / elapsed.as_secs_f64()
    }

    /// Estimated time to move `remaining_bytes` at the current speed.
    ///
    /// Returns `None` while the speed is unknown or zero.
    pub fn eta(&self, remaining_bytes: u64) -> Option<Duration> {
        let speed = self.bytes_per_second();
        if speed <= 0.0 {
            return None;
        }
        Some(Duration::from_secs_f64(remaining_bytes as f64 / speed))
    }

    /// Drops all samples (queue reset).
    pub fn reset(&self) {
        self.inner.lock().unwrap().samples.clear();
    }
}

impl Default for RateMeter {
    fn default() -> Self {
        Self::new()
    }
}
