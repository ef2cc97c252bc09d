//! Composite per-unit quality metrics.
//!
//! The last stage of the feature pipeline: a battery of scalar statistics
//! judging how well isolated and well behaved each unit's spikes are. It
//! reads the sparse waveform representation plus the sibling artifacts
//! (amplitudes, locations, similarity, template metrics, principal
//! components), which is why it must run after everything else.
//!
//! A metric that cannot be computed for a unit - below its minimum spike
//! count, or with no other units to compare against - is reported as
//! undefined (`None`, an empty TSV cell), never as a silent zero. Metrics
//! outside the configured allowlist stay undefined for every unit.

use std::path::Path;

use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ChiSquared, ContinuousCDF};

use crate::config::{
    AmplitudeCutoffParams, DriftParams, IsiViolationParams, MetricName, NnIsolationParams,
    PresenceRatioParams, QualityMetricsConfig, RpViolationParams, SlidingRpParams,
};
use crate::errors::Result;
use crate::features::amplitudes::SpikeAmplitudes;
use crate::features::locations::{SpikeLocations, UnitLocations};
use crate::features::pca::PrincipalComponents;
use crate::features::similarity::TemplateSimilarity;
use crate::features::template_metrics::TemplateMetricsRow;
use crate::metrics::{Metric, write_metrics};
use crate::recording::Recording;
use crate::sorting::Sorting;
use crate::waveforms::{WaveformExtractor, subsample_indices};

/// Frames sampled when estimating a channel's noise level.
const NOISE_SAMPLE_FRAMES: usize = 10_000;

/// Everything the metric battery reads. All sibling artifacts of the
/// feature pipeline fan into this final stage.
pub struct QualityInputs<'a> {
    pub recording: &'a Recording,
    pub sorting: &'a Sorting,
    pub waveforms: &'a WaveformExtractor,
    pub amplitudes: &'a SpikeAmplitudes,
    pub unit_locations: &'a UnitLocations,
    pub spike_locations: &'a SpikeLocations,
    pub similarity: &'a TemplateSimilarity,
    pub template_metrics: &'a [TemplateMetricsRow],
    pub pca: &'a PrincipalComponents,
}

/// One row of the quality metric table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityMetricsRow {
    pub unit_id: u32,
    pub num_spikes: Option<u64>,
    pub firing_rate: Option<f64>,
    pub presence_ratio: Option<f64>,
    pub snr: Option<f64>,
    pub isi_violations_ratio: Option<f64>,
    pub isi_violations_count: Option<u64>,
    pub rp_contamination: Option<f64>,
    pub rp_violations: Option<u64>,
    pub sliding_rp_violation: Option<f64>,
    pub amplitude_cutoff: Option<f64>,
    pub amplitude_median: Option<f64>,
    pub drift_ptp: Option<f64>,
    pub drift_std: Option<f64>,
    pub drift_mad: Option<f64>,
    pub isolation_distance: Option<f64>,
    pub l_ratio: Option<f64>,
    pub d_prime: Option<f64>,
    pub nn_hit_rate: Option<f64>,
    pub nn_miss_rate: Option<f64>,
    pub nn_isolation: Option<f64>,
    pub nn_noise_overlap: Option<f64>,
}

impl Metric for QualityMetricsRow {
    fn metric_name() -> &'static str {
        "quality"
    }
}

/// Writes the rows as `quality_metrics.tsv` under `folder`.
///
/// # Errors
/// Returns an error on I/O failure
pub fn save_quality_metrics(folder: &Path, rows: &[QualityMetricsRow]) -> anyhow::Result<()> {
    write_metrics(folder.join("quality_metrics.tsv"), rows)
}

fn median(values: &mut [f64]) -> f64 {
    values.sort_by(|a, b| a.total_cmp(b));
    let n = values.len();
    if n % 2 == 1 { values[n / 2] } else { (values[n / 2 - 1] + values[n / 2]) / 2.0 }
}

/// Fraction of fixed-duration bins that contain at least one spike.
fn presence_ratio(
    train: &[u64],
    fs: f64,
    duration_s: f64,
    params: &PresenceRatioParams,
) -> Option<f64> {
    let num_bins = (duration_s / params.bin_duration_s).floor() as usize;
    if num_bins < 1 {
        return None;
    }
    let bin_frames = params.bin_duration_s * fs;
    let mut occupied = vec![false; num_bins];
    for &t in train {
        let bin = (t as f64 / bin_frames) as usize;
        if bin < num_bins {
            occupied[bin] = true;
        }
    }
    Some(occupied.iter().filter(|&&b| b).count() as f64 / num_bins as f64)
}

/// ISI violation count and Hill contamination ratio.
fn isi_violations(
    train: &[u64],
    fs: f64,
    duration_s: f64,
    params: &IsiViolationParams,
) -> (Option<u64>, Option<f64>) {
    if train.len() < 2 {
        return (None, None);
    }
    let threshold_s = params.isi_threshold_ms / 1000.0;
    let min_isi_s = params.min_isi_ms / 1000.0;
    let count = train
        .windows(2)
        .filter(|pair| {
            let isi_s = (pair[1] - pair[0]) as f64 / fs;
            isi_s < threshold_s
        })
        .count() as u64;
    let n = train.len() as f64;
    let violation_window = 2.0 * n * n * (threshold_s - min_isi_s);
    let ratio =
        (violation_window > 0.0).then(|| count as f64 * duration_s / violation_window);
    (Some(count), ratio)
}

/// Refractory-period violation pairs and Llobet contamination estimate.
fn rp_violations(
    train: &[u64],
    fs: f64,
    duration_s: f64,
    params: &RpViolationParams,
) -> (Option<u64>, Option<f64>) {
    if train.len() < 2 {
        return (None, None);
    }
    let refractory_frames = params.refractory_period_ms / 1000.0 * fs;
    let censored_frames = params.censored_period_ms / 1000.0 * fs;

    // All ordered pairs within the refractory period, censored pairs excluded.
    let mut violations = 0_u64;
    for (i, &ta) in train.iter().enumerate() {
        for &tb in &train[i + 1..] {
            let dt = (tb - ta) as f64;
            if dt > refractory_frames {
                break;
            }
            if dt > censored_frames {
                violations += 1;
            }
        }
    }

    let n = train.len() as f64;
    let t_r = (params.refractory_period_ms - params.censored_period_ms) / 1000.0;
    if t_r <= 0.0 {
        return (Some(violations), None);
    }
    let inner = 1.0 - violations as f64 * duration_s / (n * n * t_r);
    let contamination = if inner < 0.0 { 1.0 } else { 1.0 - inner.sqrt() };
    (Some(violations), Some(contamination))
}

/// Minimum contamination across a scan of candidate refractory periods.
fn sliding_rp_violation(
    train: &[u64],
    fs: f64,
    duration_s: f64,
    params: &SlidingRpParams,
) -> Option<f64> {
    if train.len() < 2 {
        return None;
    }
    let mut best: Option<f64> = None;
    let mut rp_ms = params.exclude_ref_period_below_ms + params.bin_size_ms;
    while rp_ms <= params.max_ref_period_ms {
        let rp = RpViolationParams { refractory_period_ms: rp_ms, censored_period_ms: 0.0 };
        if let (_, Some(contamination)) = rp_violations(train, fs, duration_s, &rp) {
            best = Some(best.map_or(contamination, |b: f64| b.min(contamination)));
        }
        rp_ms += params.bin_size_ms;
    }
    best
}

/// Symmetric gaussian smoothing of a histogram.
fn gaussian_smooth(hist: &[f64], sigma: f64) -> Vec<f64> {
    if sigma <= 0.0 {
        return hist.to_vec();
    }
    let radius = (3.0 * sigma).ceil() as i64;
    let kernel: Vec<f64> =
        (-radius..=radius).map(|k| (-0.5 * (k as f64 / sigma).powi(2)).exp()).collect();
    let norm: f64 = kernel.iter().sum();
    let n = hist.len() as i64;
    (0..n)
        .map(|i| {
            let mut acc = 0.0;
            for (ki, k) in (-radius..=radius).enumerate() {
                let j = (i + k).clamp(0, n - 1);
                acc += hist[j as usize] * kernel[ki];
            }
            acc / norm
        })
        .collect()
}

/// Estimated fraction of missed spikes from the amplitude distribution
/// (Hill's method on the magnitude histogram).
fn amplitude_cutoff(amplitudes: &[f32], params: &AmplitudeCutoffParams) -> Option<f64> {
    let bins = params.num_histogram_bins;
    if bins == 0 || amplitudes.len() / bins < params.amplitudes_bins_min_ratio {
        return None;
    }
    let magnitudes: Vec<f64> = amplitudes.iter().map(|&a| f64::from(a.abs())).collect();
    let lo = magnitudes.iter().cloned().fold(f64::MAX, f64::min);
    let hi = magnitudes.iter().cloned().fold(f64::MIN, f64::max);
    if hi <= lo {
        return None;
    }
    let width = (hi - lo) / bins as f64;
    let mut hist = vec![0.0_f64; bins];
    for &m in &magnitudes {
        let bin = (((m - lo) / width) as usize).min(bins - 1);
        hist[bin] += 1.0;
    }
    let pdf = gaussian_smooth(&hist, params.histogram_smoothing_value);

    // The detector misses small spikes: the truncated side is the low-
    // magnitude tail, while the high-magnitude tail is complete. Find the
    // point left of the mode whose density matches the complete tail's
    // end level; the mass at or below it estimates the truncation.
    let peak = pdf
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i)?;
    let tail_level = pdf[pdf.len() - 1];
    let cut = (0..=peak)
        .min_by(|&a, &b| (pdf[a] - tail_level).abs().total_cmp(&(pdf[b] - tail_level).abs()))?;
    let total: f64 = pdf.iter().sum();
    let missing: f64 = pdf[..=cut].iter().sum();
    Some((missing / total).min(0.5))
}

/// Drift statistics from per-interval medians of spike depth (y).
fn drift_metrics(
    train: &[u64],
    locations_y: &[f32],
    fs: f64,
    duration_s: f64,
    params: &DriftParams,
) -> (Option<f64>, Option<f64>, Option<f64>) {
    let num_bins = (duration_s / params.interval_s).floor() as usize;
    if num_bins < params.min_num_bins {
        return (None, None, None);
    }
    let bin_frames = params.interval_s * fs;
    let mut per_bin: Vec<Vec<f64>> = vec![Vec::new(); num_bins];
    for (&t, &y) in train.iter().zip(locations_y.iter()) {
        let bin = (t as f64 / bin_frames) as usize;
        if bin < num_bins {
            per_bin[bin].push(f64::from(y));
        }
    }
    let mut medians: Vec<f64> = per_bin
        .iter_mut()
        .filter(|b| b.len() >= params.min_spikes_per_interval)
        .map(|b| median(b))
        .collect();
    if medians.len() < params.min_num_bins {
        return (None, None, None);
    }

    let ptp = medians.iter().cloned().fold(f64::MIN, f64::max)
        - medians.iter().cloned().fold(f64::MAX, f64::min);
    let mean = medians.iter().sum::<f64>() / medians.len() as f64;
    let std = (medians.iter().map(|m| (m - mean) * (m - mean)).sum::<f64>()
        / medians.len() as f64)
        .sqrt();
    let med = median(&mut medians);
    let mut deviations: Vec<f64> = medians.iter().map(|m| (m - med).abs()).collect();
    let mad = median(&mut deviations);
    (Some(ptp), Some(std), Some(mad))
}

fn mean_vector(rows: &[Vec<f64>]) -> DVector<f64> {
    let dims = rows[0].len();
    let mut mean = DVector::zeros(dims);
    for row in rows {
        mean += DVector::from_column_slice(row);
    }
    mean / rows.len() as f64
}

fn covariance_matrix(rows: &[Vec<f64>], mean: &DVector<f64>) -> DMatrix<f64> {
    let dims = mean.len();
    let mut cov = DMatrix::zeros(dims, dims);
    for row in rows {
        let centered = DVector::from_column_slice(row) - mean;
        cov += &centered * centered.transpose();
    }
    cov / (rows.len() as f64 - 1.0).max(1.0)
}

/// Mahalanobis-based isolation distance and L-ratio of `own` against
/// `others`, both expressed in the same feature space.
fn isolation_and_l_ratio(own: &[Vec<f64>], others: &[Vec<f64>]) -> (Option<f64>, Option<f64>) {
    if own.len() < 2 || others.is_empty() {
        return (None, None);
    }
    let mean = mean_vector(own);
    let cov = covariance_matrix(own, &mean);
    let Some(inv) = cov.clone().try_inverse() else {
        return (None, None);
    };

    let mut squared: Vec<f64> = others
        .iter()
        .map(|row| {
            let centered = DVector::from_column_slice(row) - &mean;
            (centered.transpose() * &inv * &centered)[(0, 0)]
        })
        .collect();
    squared.sort_by(|a, b| a.total_cmp(b));

    let isolation = (others.len() >= own.len()).then(|| squared[own.len() - 1]);

    let dof = own[0].len() as f64;
    let l_ratio = ChiSquared::new(dof).ok().map(|chi| {
        let sum: f64 = squared.iter().map(|&d2| 1.0 - chi.cdf(d2)).sum();
        sum / own.len() as f64
    });
    (isolation, l_ratio)
}

/// Fisher discriminant separation between `own` and `others`.
fn d_prime(own: &[Vec<f64>], others: &[Vec<f64>]) -> Option<f64> {
    if own.len() < 2 || others.len() < 2 {
        return None;
    }
    let mean_own = mean_vector(own);
    let mean_others = mean_vector(others);
    let pooled = covariance_matrix(own, &mean_own) * (own.len() as f64 - 1.0)
        + covariance_matrix(others, &mean_others) * (others.len() as f64 - 1.0);
    let pooled = pooled / (own.len() + others.len()) as f64;
    let axis = pooled.try_inverse()? * (&mean_own - &mean_others);

    let project = |rows: &[Vec<f64>]| -> Vec<f64> {
        rows.iter().map(|row| DVector::from_column_slice(row).dot(&axis)).collect()
    };
    let own_proj = project(own);
    let other_proj = project(others);
    let stats = |v: &[f64]| -> (f64, f64) {
        let mean = v.iter().sum::<f64>() / v.len() as f64;
        let var = v.iter().map(|x| (x - mean) * (x - mean)).sum::<f64>() / (v.len() as f64 - 1.0);
        (mean, var)
    };
    let (m1, v1) = stats(&own_proj);
    let (m2, v2) = stats(&other_proj);
    let denom = (0.5 * (v1 + v2)).sqrt();
    (denom > 0.0).then(|| (m1 - m2).abs() / denom)
}

fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Fraction of each query point's k nearest neighbors (among both clouds)
/// that belong to `target`.
fn knn_fraction_in_target(
    queries: &[Vec<f64>],
    own_is_target: bool,
    target: &[Vec<f64>],
    other: &[Vec<f64>],
    k: usize,
) -> f64 {
    let mut total = 0.0;
    for (qi, q) in queries.iter().enumerate() {
        // Distances to target cloud (skip self when querying from it).
        let mut neighbors: Vec<(f64, bool)> = Vec::with_capacity(target.len() + other.len());
        for (ti, t) in target.iter().enumerate() {
            if own_is_target && ti == qi {
                continue;
            }
            neighbors.push((squared_distance(q, t), true));
        }
        for (oi, o) in other.iter().enumerate() {
            if !own_is_target && oi == qi {
                continue;
            }
            neighbors.push((squared_distance(q, o), false));
        }
        neighbors.sort_by(|a, b| a.0.total_cmp(&b.0));
        let k_eff = k.min(neighbors.len());
        if k_eff == 0 {
            continue;
        }
        let hits = neighbors[..k_eff].iter().filter(|(_, is_target)| *is_target).count();
        total += hits as f64 / k_eff as f64;
    }
    total / queries.len() as f64
}

/// Nearest-neighbor hit rate (unit spikes whose neighbors are unit spikes)
/// and miss rate (other spikes whose neighbors are unit spikes).
fn nearest_neighbor_rates(
    own: &[Vec<f64>],
    others: &[Vec<f64>],
    min_spikes: usize,
    n_neighbors: usize,
) -> (Option<f64>, Option<f64>) {
    if own.len() < min_spikes || others.is_empty() {
        return (None, None);
    }
    let hit = knn_fraction_in_target(own, true, own, others, n_neighbors);
    let miss = knn_fraction_in_target(others, false, own, others, n_neighbors);
    (Some(hit), Some(miss))
}

/// Whether a metric is in the configured allowlist.
fn wants(config: &QualityMetricsConfig, name: MetricName) -> bool {
    config.metric_names.contains(&name)
}

#[allow(clippy::too_many_lines)]
fn unit_row(
    inputs: &QualityInputs<'_>,
    config: &QualityMetricsConfig,
    unit_id: u32,
) -> Result<QualityMetricsRow> {
    let qm = &config.qm_params;
    let recording = inputs.recording;
    let fs = recording.sampling_frequency();
    let duration_s = recording.duration_s();
    let train = inputs.sorting.spike_train(unit_id)?;

    let mut row = QualityMetricsRow { unit_id, ..QualityMetricsRow::default() };

    if wants(config, MetricName::NumSpikes) {
        row.num_spikes = Some(train.len() as u64);
    }
    if wants(config, MetricName::FiringRate) && duration_s > 0.0 {
        row.firing_rate = Some(train.len() as f64 / duration_s);
    }
    if wants(config, MetricName::PresenceRatio) {
        row.presence_ratio = presence_ratio(train, fs, duration_s, &qm.presence_ratio);
    }
    if wants(config, MetricName::Snr) {
        let peak_channel = inputs.waveforms.peak_channel(unit_id, qm.snr.peak_sign)?;
        let peak_sample = inputs.waveforms.peak_sample(unit_id, qm.snr.peak_sign)?;
        let unit = inputs
            .waveforms
            .unit(unit_id)
            .ok_or(crate::errors::SpikepostError::UnitNotFound { unit_id })?;
        let ci = unit.channel_indices.iter().position(|&c| c == peak_channel).unwrap_or(0);
        let peak_value =
            unit.mean[peak_sample * unit.channel_indices.len() + ci].abs();
        let noise = recording.noise_level_mad(
            peak_channel,
            inputs.waveforms.params().return_scaled,
            NOISE_SAMPLE_FRAMES,
        );
        row.snr = (noise > 0.0).then(|| f64::from(peak_value) / f64::from(noise));
    }
    if wants(config, MetricName::IsiViolation) {
        let (count, ratio) = isi_violations(train, fs, duration_s, &qm.isi_violation);
        row.isi_violations_count = count;
        row.isi_violations_ratio = ratio;
    }
    if wants(config, MetricName::RpViolation) {
        let (count, contamination) = rp_violations(train, fs, duration_s, &qm.rp_violation);
        row.rp_violations = count;
        row.rp_contamination = contamination;
    }
    if wants(config, MetricName::SlidingRpViolation) {
        row.sliding_rp_violation =
            sliding_rp_violation(train, fs, duration_s, &qm.sliding_rp_violation);
    }

    let unit_amplitudes = inputs.amplitudes.unit(unit_id);
    if wants(config, MetricName::AmplitudeCutoff) {
        row.amplitude_cutoff =
            unit_amplitudes.and_then(|amps| amplitude_cutoff(amps, &qm.amplitude_cutoff));
    }
    if wants(config, MetricName::AmplitudeMedian) {
        row.amplitude_median = unit_amplitudes.and_then(|amps| {
            (!amps.is_empty()).then(|| {
                let mut values: Vec<f64> = amps.iter().map(|&a| f64::from(a)).collect();
                median(&mut values)
            })
        });
    }
    if wants(config, MetricName::Drift) {
        if let Some(locations) = inputs.spike_locations.unit(unit_id) {
            let ys: Vec<f32> = locations.iter().map(|l| l[1]).collect();
            let (ptp, std, mad) = drift_metrics(train, &ys, fs, duration_s, &qm.drift);
            row.drift_ptp = ptp;
            row.drift_std = std;
            row.drift_mad = mad;
        }
    }

    // PCA-space metrics compare this unit's spikes against every other
    // unit's spikes projected into this unit's channel space.
    let needs_pca_space = wants(config, MetricName::IsolationDistance)
        || wants(config, MetricName::LRatio)
        || wants(config, MetricName::DPrime)
        || wants(config, MetricName::NearestNeighbor)
        || wants(config, MetricName::NnIsolation)
        || wants(config, MetricName::NnNoiseOverlap);
    if needs_pca_space {
        let own = inputs.pca.unit(unit_id).map(|p| p.rows()).unwrap_or_default();
        let channels = inputs
            .waveforms
            .unit(unit_id)
            .ok_or(crate::errors::SpikepostError::UnitNotFound { unit_id })?
            .channel_indices
            .clone();

        let cap = qm.nearest_neighbor.max_spikes;
        let mut per_other_unit: Vec<(u32, Vec<Vec<f64>>)> = Vec::new();
        for &other_id in inputs.sorting.unit_ids() {
            if other_id == unit_id {
                continue;
            }
            let other_train = inputs.sorting.spike_train(other_id)?;
            let sampled: Vec<u64> = subsample_indices(other_train.len(), cap)
                .into_iter()
                .map(|i| other_train[i])
                .collect();
            per_other_unit
                .push((other_id, inputs.pca.project_spikes(recording, &sampled, &channels)));
        }
        let others: Vec<Vec<f64>> =
            per_other_unit.iter().flat_map(|(_, rows)| rows.iter().cloned()).collect();

        if wants(config, MetricName::IsolationDistance) || wants(config, MetricName::LRatio) {
            let (isolation, l_ratio) = isolation_and_l_ratio(&own, &others);
            if wants(config, MetricName::IsolationDistance) {
                row.isolation_distance = isolation;
            }
            if wants(config, MetricName::LRatio) {
                row.l_ratio = l_ratio;
            }
        }
        if wants(config, MetricName::DPrime) {
            row.d_prime = d_prime(&own, &others);
        }
        if wants(config, MetricName::NearestNeighbor) {
            let (hit, miss) = nearest_neighbor_rates(
                &own,
                &others,
                qm.nearest_neighbor.min_spikes,
                qm.nearest_neighbor.n_neighbors,
            );
            row.nn_hit_rate = hit;
            row.nn_miss_rate = miss;
        }
        if wants(config, MetricName::NnIsolation) {
            row.nn_isolation =
                nn_isolation(inputs, unit_id, &own, &per_other_unit, &qm.nn_isolation);
        }
        if wants(config, MetricName::NnNoiseOverlap) {
            row.nn_noise_overlap =
                nn_noise_overlap(inputs, &own, &channels, &qm.nn_noise_overlap);
        }
    }

    Ok(row)
}

/// Worst-case (minimum) pairwise NN isolation against the other units
/// whose estimated location lies within the configured radius.
fn nn_isolation(
    inputs: &QualityInputs<'_>,
    unit_id: u32,
    own: &[Vec<f64>],
    per_other_unit: &[(u32, Vec<Vec<f64>>)],
    params: &NnIsolationParams,
) -> Option<f64> {
    if own.len() < params.min_spikes || per_other_unit.is_empty() {
        return None;
    }
    let unit_loc = inputs.unit_locations.unit(unit_id)?;
    let mut worst: Option<f64> = None;
    for (other_id, other) in per_other_unit {
        if other.is_empty() {
            continue;
        }
        if let Some(other_loc) = inputs.unit_locations.unit(*other_id) {
            let dx = f64::from(other_loc[0] - unit_loc[0]);
            let dy = f64::from(other_loc[1] - unit_loc[1]);
            if (dx * dx + dy * dy).sqrt() > params.radius_um {
                continue;
            }
        }
        let hit = knn_fraction_in_target(own, true, own, other, params.n_neighbors);
        worst = Some(worst.map_or(hit, |w: f64| w.min(hit)));
    }
    worst
}

/// Fraction of the unit's nearest neighbors that are noise snippets drawn
/// evenly from the recording.
fn nn_noise_overlap(
    inputs: &QualityInputs<'_>,
    own: &[Vec<f64>],
    channels: &[usize],
    params: &NnIsolationParams,
) -> Option<f64> {
    if own.len() < params.min_spikes {
        return None;
    }
    let frames = inputs.waveforms.samples_per_waveform() as u64;
    let nbefore = inputs.waveforms.nbefore() as u64;
    let num_samples = inputs.recording.num_samples();
    if num_samples <= frames {
        return None;
    }
    let count = own.len().min(params.max_spikes);
    let usable = num_samples - frames;
    let times: Vec<u64> =
        (0..count).map(|i| nbefore + usable * i as u64 / count as u64).collect();
    let noise = inputs.pca.project_spikes(inputs.recording, &times, channels);
    if noise.is_empty() {
        return None;
    }
    let hit = knn_fraction_in_target(own, true, own, &noise, params.n_neighbors);
    Some(1.0 - hit)
}

/// Computes the metric battery for every unit.
///
/// # Errors
/// Returns an error if a unit is missing from an input artifact
pub fn compute_quality_metrics(
    inputs: &QualityInputs<'_>,
    config: &QualityMetricsConfig,
    pool: &rayon::ThreadPool,
) -> Result<Vec<QualityMetricsRow>> {
    let unit_ids: Vec<u32> = inputs.sorting.unit_ids().to_vec();
    if config.n_jobs > 1 {
        pool.install(|| {
            unit_ids.par_iter().map(|&id| unit_row(inputs, config, id)).collect()
        })
    } else {
        unit_ids.iter().map(|&id| unit_row(inputs, config, id)).collect()
    }
}
