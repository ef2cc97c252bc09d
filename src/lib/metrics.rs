//! Structured metric tables and TSV output.
//!
//! Tabular per-unit artifacts (template metrics, quality metrics) are
//! written as TSV files with one row per unit. This module provides the
//! [`Metric`] trait and the shared writer with consistent error handling.
//!
//! Missing values serialize as empty cells: a metric that is undefined for
//! a unit (for example below its minimum spike count) is represented as
//! `Option::None`, never as a silent zero.

use std::path::Path;

use anyhow::{Context, Result};
use fgoxide::io::DelimFile;
use serde::Serialize;

/// Number of decimal places used for float metrics.
pub const FLOAT_PRECISION: usize = 6;

/// Formats a float value with the standard precision for metric tables.
///
/// # Example
/// ```
/// use spikepost_lib::metrics::format_float;
/// assert_eq!(format_float(0.9), "0.900000");
/// ```
#[must_use]
pub fn format_float(value: f64) -> String {
    format!("{value:.FLOAT_PRECISION$}")
}

/// A per-unit metric row that can be serialized to a TSV table.
pub trait Metric: Serialize + Clone {
    /// Human-readable name for this metric table, used in error messages
    /// and output file naming.
    fn metric_name() -> &'static str;
}

/// Write metric rows to a TSV file with consistent error handling.
///
/// # Errors
/// Returns an error if the file cannot be created or written to
pub fn write_metrics<P: AsRef<Path>, T: Metric>(path: P, rows: &[T]) -> Result<()> {
    let path_ref = path.as_ref();
    DelimFile::default().write_tsv(&path_ref, rows).with_context(|| {
        format!("Failed to write {} metrics: {}", T::metric_name(), path_ref.display())
    })
}
