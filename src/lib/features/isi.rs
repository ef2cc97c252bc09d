//! Inter-spike-interval histograms.
//!
//! Per unit, the distribution of consecutive spike intervals within a
//! window, binned at a fixed width. Intervals beyond the window are not
//! counted.

use std::path::Path;

use serde::Serialize;

use crate::config::HistogramConfig;
use crate::errors::Result;
use crate::sorting::Sorting;
use crate::storage;
use crate::validation::validate_bin_within_window;

/// ISI histograms for all units.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IsiHistograms {
    pub unit_ids: Vec<u32>,
    pub window_ms: f64,
    pub bin_ms: f64,
    /// `counts[i][b]`: intervals of `unit_ids[i]` in bin `b`; bins span
    /// [0, window) at `bin_ms` width.
    pub counts: Vec<Vec<u32>>,
}

impl IsiHistograms {
    /// Persists the histograms as `isi_histograms.json` under `folder`.
    ///
    /// # Errors
    /// Returns an error on I/O failure
    pub fn save(&self, folder: &Path) -> Result<()> {
        storage::write_json(&folder.join("isi_histograms.json"), self)
    }
}

/// Computes the per-unit ISI histograms.
///
/// # Errors
/// Returns a configuration error for an invalid window/bin combination
pub fn compute_isi_histograms(
    sorting: &Sorting,
    config: &HistogramConfig,
) -> Result<IsiHistograms> {
    validate_bin_within_window(config.bin_ms, config.window_ms, "isis")?;

    let fs = sorting.sampling_frequency();
    let num_bins = (config.window_ms / config.bin_ms).round() as usize;
    let unit_ids = sorting.unit_ids().to_vec();

    let mut counts = Vec::with_capacity(unit_ids.len());
    for &unit_id in &unit_ids {
        let train = sorting.spike_train(unit_id)?;
        let mut hist = vec![0_u32; num_bins];
        for pair in train.windows(2) {
            let isi_ms = (pair[1] - pair[0]) as f64 / fs * 1000.0;
            if isi_ms < config.window_ms {
                hist[(isi_ms / config.bin_ms) as usize] += 1;
            }
        }
        counts.push(hist);
    }

    Ok(IsiHistograms { unit_ids, window_ms: config.window_ms, bin_ms: config.bin_ms, counts })
}
