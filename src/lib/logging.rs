//! Formatting helpers for log output.
//!
//! Consistent, human-readable formatting of counts, durations and rates,
//! plus a small timer for logging how long a pipeline step took.

use std::time::{Duration, Instant};

/// Formats an integer count with thousands separators.
///
/// # Example
/// ```
/// use spikepost_lib::logging::format_count;
///
/// assert_eq!(format_count(950), "950");
/// assert_eq!(format_count(1_234_567), "1,234,567");
/// ```
#[must_use]
pub fn format_count(count: u64) -> String {
    let digits = count.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Formats a fraction (0.0-1.0) as a percentage with the given decimals.
///
/// # Example
/// ```
/// use spikepost_lib::logging::format_percent;
///
/// assert_eq!(format_percent(0.9543, 2), "95.43%");
/// assert_eq!(format_percent(0.5, 1), "50.0%");
/// ```
#[must_use]
pub fn format_percent(value: f64, decimals: usize) -> String {
    format!("{:.decimals$}%", value * 100.0, decimals = decimals)
}

/// Formats a duration in human-readable form ("45s", "2m 15s", "1h 30m").
#[must_use]
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        let mins = secs / 60;
        let rem = secs % 60;
        if rem == 0 { format!("{mins}m") } else { format!("{mins}m {rem}s") }
    } else {
        let hours = secs / 3600;
        let mins = (secs % 3600) / 60;
        if mins == 0 { format!("{hours}h") } else { format!("{hours}h {mins}m") }
    }
}

/// Step timing helper.
///
/// Logs the step name at construction, and the elapsed time with an item
/// count at completion.
///
/// # Example
/// ```no_run
/// use spikepost_lib::logging::StepTimer;
///
/// let timer = StepTimer::new("Computing spike amplitudes");
/// // ... do work over units ...
/// timer.log_completion(42); // "Computing spike amplitudes done: 42 units in 3s"
/// ```
pub struct StepTimer {
    step: String,
    start_time: Instant,
}

impl StepTimer {
    /// Creates a new timer and logs the start of the step.
    #[must_use]
    pub fn new(step: &str) -> Self {
        log::info!("{step} ...");
        Self { step: step.to_string(), start_time: Instant::now() }
    }

    /// Elapsed time since the timer was created.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Logs completion of the step with a unit count.
    pub fn log_completion(&self, units: u64) {
        log::info!(
            "{} done: {} units in {}",
            self.step,
            format_count(units),
            format_duration(self.elapsed())
        );
    }
}
