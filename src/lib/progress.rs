//! Progress tracking utilities
//!
//! A thread-safe progress tracker for logging progress over units or spikes
//! at regular intervals. Workers on the rayon pool share one tracker and
//! call it from their own threads; logs are emitted when the shared count
//! crosses interval boundaries.

use std::sync::atomic::{AtomicU64, Ordering};

use log::info;

/// Thread-safe progress tracker that logs when the count crosses multiples
/// of an interval.
///
/// # Example
/// ```
/// use spikepost_lib::progress::ProgressTracker;
///
/// let tracker = ProgressTracker::new("Extracted waveforms for units").with_interval(50);
/// for _ in 0..120 {
///     tracker.record(1); // logs at 50 and 100
/// }
/// tracker.log_final(); // logs "Extracted waveforms for units 120 (complete)"
/// ```
pub struct ProgressTracker {
    /// Logging interval; progress is logged when the count crosses multiples of this.
    interval: u64,
    /// Message prefix for log output.
    message: String,
    /// Shared count of items processed.
    count: AtomicU64,
}

impl ProgressTracker {
    /// Creates a tracker with a count of 0 and a default interval of 100.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self { interval: 100, message: message.into(), count: AtomicU64::new(0) }
    }

    /// Sets the logging interval.
    #[must_use]
    pub fn with_interval(mut self, interval: u64) -> Self {
        self.interval = interval.max(1);
        self
    }

    /// Atomically adds `additional` to the count, logging once for every
    /// interval boundary crossed. Returns `true` if the new count landed
    /// exactly on an interval boundary.
    pub fn record(&self, additional: u64) -> bool {
        if additional == 0 {
            let count = self.count.load(Ordering::Relaxed);
            return count > 0 && count % self.interval == 0;
        }

        let prev = self.count.fetch_add(additional, Ordering::Relaxed);
        let new_count = prev + additional;

        for i in (prev / self.interval + 1)..=(new_count / self.interval) {
            info!("{} {}", self.message, i * self.interval);
        }

        new_count % self.interval == 0
    }

    /// Logs the final count unless the last `record` call already logged it.
    pub fn log_final(&self) {
        if !self.record(0) {
            let count = self.count.load(Ordering::Relaxed);
            if count > 0 {
                info!("{} {} (complete)", self.message, count);
            }
        }
    }

    /// The current count.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}
