//! Waveform-shape metrics per unit.
//!
//! Measured on the unit's peak-channel mean template after linear
//! upsampling: trough-to-peak time, peak/trough ratio, half width, and
//! repolarization/recovery slopes. A metric that cannot be measured on a
//! template (no trough, no zero crossing) is undefined for that unit and
//! serializes as an empty cell.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::{PeakSign, TemplateMetricsConfig};
use crate::errors::Result;
use crate::metrics::{Metric, write_metrics};
use crate::waveforms::WaveformExtractor;

/// Window after the positive peak over which the recovery slope is fit (ms).
const RECOVERY_WINDOW_MS: f64 = 0.7;

/// Shape metrics for one unit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemplateMetricsRow {
    pub unit_id: u32,
    /// Trough-to-peak time (s).
    pub peak_to_valley: Option<f64>,
    /// Positive peak amplitude over trough magnitude.
    pub peak_trough_ratio: Option<f64>,
    /// Width of the trough at half amplitude (s).
    pub half_width: Option<f64>,
    /// Slope from trough to the following zero crossing (units/s).
    pub repolarization_slope: Option<f64>,
    /// Slope over the window after the positive peak (units/s).
    pub recovery_slope: Option<f64>,
}

impl Metric for TemplateMetricsRow {
    fn metric_name() -> &'static str {
        "template"
    }
}

/// Writes the rows as `template_metrics.tsv` under `folder`.
///
/// # Errors
/// Returns an error on I/O failure
pub fn save_template_metrics(folder: &Path, rows: &[TemplateMetricsRow]) -> anyhow::Result<()> {
    write_metrics(folder.join("template_metrics.tsv"), rows)
}

/// Linear upsampling by an integer factor.
fn upsample(template: &[f32], factor: usize) -> Vec<f64> {
    if template.len() < 2 || factor <= 1 {
        return template.iter().map(|&v| f64::from(v)).collect();
    }
    let mut out = Vec::with_capacity((template.len() - 1) * factor + 1);
    for pair in template.windows(2) {
        let (a, b) = (f64::from(pair[0]), f64::from(pair[1]));
        for k in 0..factor {
            out.push(a + (b - a) * k as f64 / factor as f64);
        }
    }
    out.push(f64::from(template[template.len() - 1]));
    out
}

/// Least-squares slope of `values` against time at `fs` (units/s).
fn regression_slope(values: &[f64], fs: f64) -> Option<f64> {
    let n = values.len();
    if n < 3 {
        return None;
    }
    let xs: Vec<f64> = (0..n).map(|i| i as f64 / fs).collect();
    let mean_x = xs.iter().sum::<f64>() / n as f64;
    let mean_y = values.iter().sum::<f64>() / n as f64;
    let mut cov = 0.0;
    let mut var = 0.0;
    for (x, y) in xs.iter().zip(values.iter()) {
        cov += (x - mean_x) * (y - mean_y);
        var += (x - mean_x) * (x - mean_x);
    }
    (var > 0.0).then(|| cov / var)
}

fn metrics_for_template(unit_id: u32, template: &[f64], fs_up: f64) -> TemplateMetricsRow {
    let mut row = TemplateMetricsRow { unit_id, ..TemplateMetricsRow::default() };

    let Some(trough_idx) = template
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i)
    else {
        return row;
    };
    let trough_val = template[trough_idx];
    if trough_val >= 0.0 {
        // No negative trough: the shape metrics are not meaningful.
        return row;
    }

    // Positive peak after the trough.
    if let Some((peak_rel, &peak_val)) = template[trough_idx..]
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
    {
        let peak_idx = trough_idx + peak_rel;
        if peak_idx > trough_idx {
            row.peak_to_valley = Some((peak_idx - trough_idx) as f64 / fs_up);
            row.peak_trough_ratio = Some(peak_val / trough_val.abs());

            // Recovery slope over a fixed window after the peak.
            let recovery_frames = (RECOVERY_WINDOW_MS / 1000.0 * fs_up) as usize;
            let end = (peak_idx + recovery_frames).min(template.len());
            row.recovery_slope = regression_slope(&template[peak_idx..end], fs_up);
        }
    }

    // Half width: extent of the region below half the trough amplitude.
    let half = trough_val / 2.0;
    let left = (0..trough_idx).rev().find(|&i| template[i] > half).map_or(0, |i| i + 1);
    let right = ((trough_idx + 1)..template.len())
        .find(|&i| template[i] > half)
        .unwrap_or(template.len());
    if right > left {
        row.half_width = Some((right - left) as f64 / fs_up);
    }

    // Repolarization slope: trough to the first zero crossing after it.
    if let Some(zero_idx) = ((trough_idx + 1)..template.len()).find(|&i| template[i] >= 0.0) {
        row.repolarization_slope = regression_slope(&template[trough_idx..=zero_idx], fs_up);
    }

    row
}

/// Computes shape metrics for every unit of the sparse representation.
///
/// Metrics are measured on the unit's extremum channel; the optional
/// sparsity radius override narrows which channels are candidates for
/// that extremum.
///
/// # Errors
/// Returns an error if a unit is missing from the waveforms
pub fn compute_template_metrics(
    waveforms: &WaveformExtractor,
    config: &TemplateMetricsConfig,
) -> Result<Vec<TemplateMetricsRow>> {
    let channel_locations = waveforms.channel_locations();
    let mut rows = Vec::with_capacity(waveforms.units().len());

    for unit in waveforms.units() {
        let nch = unit.channel_indices.len();
        let frames = waveforms.samples_per_waveform();

        // Candidate channels for the extremum, optionally radius-restricted
        // around the strongest channel.
        let peak_global = waveforms.peak_channel(unit.unit_id, PeakSign::Both)?;
        let candidates: Vec<usize> = match config.sparsity_radius_um {
            None => (0..nch).collect(),
            Some(radius) => {
                let peak_loc = channel_locations[peak_global];
                (0..nch)
                    .filter(|&ci| {
                        let loc = channel_locations[unit.channel_indices[ci]];
                        let dx = f64::from(loc[0] - peak_loc[0]);
                        let dy = f64::from(loc[1] - peak_loc[1]);
                        (dx * dx + dy * dy).sqrt() <= radius
                    })
                    .collect()
            }
        };

        let best_ci = candidates
            .iter()
            .copied()
            .max_by(|&a, &b| {
                let amp = |ci: usize| {
                    (0..frames)
                        .map(|f| unit.mean[f * nch + ci].abs())
                        .fold(0.0_f32, f32::max)
                };
                amp(a).total_cmp(&amp(b))
            })
            .unwrap_or(0);

        let channel_template: Vec<f32> =
            (0..frames).map(|f| unit.mean[f * nch + best_ci]).collect();
        let upsampled = upsample(&channel_template, config.upsampling_factor);
        let fs_up = waveforms.sampling_frequency() * config.upsampling_factor as f64;
        rows.push(metrics_for_template(unit.unit_id, &upsampled, fs_up));
    }

    Ok(rows)
}
