//! Auto- and cross-correlograms.
//!
//! For every ordered unit pair, spike time differences within a +/- half
//! window are binned into a histogram. The diagonal holds each unit's
//! autocorrelogram (zero-lag self pairs excluded).

use std::path::Path;

use rayon::prelude::*;
use serde::Serialize;

use crate::config::HistogramConfig;
use crate::errors::Result;
use crate::sorting::Sorting;
use crate::storage;
use crate::validation::validate_bin_within_window;

/// Correlogram counts for all unit pairs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Correlograms {
    pub unit_ids: Vec<u32>,
    pub window_ms: f64,
    pub bin_ms: f64,
    /// `counts[i][j][b]`: spikes of `unit_ids[j]` at lag bin `b` relative
    /// to spikes of `unit_ids[i]`; bins span [-window/2, +window/2).
    pub counts: Vec<Vec<Vec<u32>>>,
}

impl Correlograms {
    /// Number of lag bins per pair.
    #[must_use]
    pub fn num_bins(&self) -> usize {
        (self.window_ms / self.bin_ms).round() as usize
    }

    /// Persists the correlograms as `correlograms.json` under `folder`.
    ///
    /// # Errors
    /// Returns an error on I/O failure
    pub fn save(&self, folder: &Path) -> Result<()> {
        storage::write_json(&folder.join("correlograms.json"), self)
    }
}

/// Histogram of lags of `train_b` relative to `train_a`.
fn pair_correlogram(
    train_a: &[u64],
    train_b: &[u64],
    half_window_frames: f64,
    bin_frames: f64,
    num_bins: usize,
    auto: bool,
) -> Vec<u32> {
    let mut counts = vec![0_u32; num_bins];
    let mut lo = 0_usize;
    for (ai, &ta) in train_a.iter().enumerate() {
        let ta = ta as i64;
        // Advance the left edge of b's candidate window.
        while lo < train_b.len() && ((train_b[lo] as i64 - ta) as f64) < -half_window_frames {
            lo += 1;
        }
        for (bi, &tb) in train_b.iter().enumerate().skip(lo) {
            let dt = (tb as i64 - ta) as f64;
            if dt >= half_window_frames {
                break;
            }
            if auto && ai == bi {
                continue;
            }
            let bin = ((dt + half_window_frames) / bin_frames) as usize;
            if bin < num_bins {
                counts[bin] += 1;
            }
        }
    }
    counts
}

/// Computes correlograms for every ordered unit pair.
///
/// # Errors
/// Returns a configuration error for an invalid window/bin combination
pub fn compute_correlograms(
    sorting: &Sorting,
    config: &HistogramConfig,
    pool: &rayon::ThreadPool,
) -> Result<Correlograms> {
    validate_bin_within_window(config.bin_ms, config.window_ms, "correlograms")?;

    let fs = sorting.sampling_frequency();
    let half_window_frames = config.window_ms / 2.0 / 1000.0 * fs;
    let bin_frames = config.bin_ms / 1000.0 * fs;
    let num_bins = (config.window_ms / config.bin_ms).round() as usize;

    let unit_ids = sorting.unit_ids().to_vec();
    let trains: Vec<&[u64]> =
        unit_ids.iter().map(|&id| sorting.spike_train(id)).collect::<Result<_>>()?;

    let counts: Vec<Vec<Vec<u32>>> = pool.install(|| {
        (0..unit_ids.len())
            .into_par_iter()
            .map(|i| {
                (0..unit_ids.len())
                    .map(|j| {
                        pair_correlogram(
                            trains[i],
                            trains[j],
                            half_window_frames,
                            bin_frames,
                            num_bins,
                            i == j,
                        )
                    })
                    .collect()
            })
            .collect()
    });

    Ok(Correlograms { unit_ids, window_ms: config.window_ms, bin_ms: config.bin_ms, counts })
}
