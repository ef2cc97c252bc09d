//! Waveform representation: per-unit, per-channel snippet aggregates.
//!
//! Everything downstream of deduplication derives from this structure. For
//! each unit, a window around up to `max_spikes_per_unit` spikes (chosen by
//! deterministic, evenly spaced subsampling) is averaged per channel into a
//! mean template, optionally with a standard-deviation template. The channel
//! set per unit is either the full probe (raw pass) or the unit's sparsity
//! channels (sparse pass).
//!
//! Two instances exist per block: the raw dense one, scoped to the
//! dedup/sparsity step and reclaimed afterwards, and the sparse one that is
//! persisted and read by every feature computation.
//!
//! On disk: `waveforms.json` manifest plus `templates.bin` (little-endian
//! `f32`, per unit: mean values then std values). Saves are deterministic,
//! so rebuilding from identical inputs yields identical bytes.

use std::path::Path;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::{PeakSign, WaveformConfig};
use crate::errors::{Result, SpikepostError};
use crate::progress::ProgressTracker;
use crate::recording::Recording;
use crate::sorting::Sorting;
use crate::sparsity::ChannelSparsity;
use crate::storage;

/// Manifest file name inside a waveform folder.
const MANIFEST_FILE: &str = "waveforms.json";
/// Template payload file name inside a waveform folder.
const TEMPLATES_FILE: &str = "templates.bin";

/// Snippet aggregates for one unit.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitWaveforms {
    pub unit_id: u32,
    /// Global channel indices this unit's templates cover, ascending.
    pub channel_indices: Vec<usize>,
    /// Total spikes in the unit's train.
    pub num_spikes: u64,
    /// Spikes that actually entered the aggregate (subsampled, in-bounds).
    pub num_sampled: u64,
    /// Mean template, frame-major over `channel_indices`.
    pub mean: Vec<f32>,
    /// Standard-deviation template, same layout, when requested.
    pub std: Option<Vec<f32>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct UnitManifest {
    unit_id: u32,
    channel_indices: Vec<usize>,
    num_spikes: u64,
    num_sampled: u64,
    has_std: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WaveformManifest {
    params: WaveformConfig,
    sampling_frequency: f64,
    nbefore: usize,
    nafter: usize,
    channel_ids: Vec<String>,
    channel_locations: Vec<[f32; 2]>,
    units: Vec<UnitManifest>,
}

/// Unit-indexed, channel-indexed snippet aggregate store.
#[derive(Debug, Clone)]
pub struct WaveformExtractor {
    params: WaveformConfig,
    sampling_frequency: f64,
    nbefore: usize,
    nafter: usize,
    channel_ids: Vec<String>,
    channel_locations: Vec<[f32; 2]>,
    units: Vec<UnitWaveforms>,
}

/// Deterministic, evenly spaced subsample of `n` spikes down to `max`.
pub(crate) fn subsample_indices(n: usize, max: usize) -> Vec<usize> {
    if n <= max {
        (0..n).collect()
    } else {
        (0..max).map(|i| i * n / max).collect()
    }
}

fn extract_unit(
    recording: &Recording,
    unit_id: u32,
    train: &[u64],
    channel_indices: Vec<usize>,
    nbefore: usize,
    nafter: usize,
    params: &WaveformConfig,
) -> UnitWaveforms {
    let frames = nbefore + nafter;
    let nch = channel_indices.len();
    let mut sums = vec![0.0_f64; frames * nch];
    let mut sq_sums = vec![0.0_f64; frames * nch];
    let mut snippet = vec![0.0_f32; frames * nch];
    let mut num_sampled = 0_u64;

    for i in subsample_indices(train.len(), params.max_spikes_per_unit) {
        let spike_idx = train[i];
        let start = spike_idx as i64 - nbefore as i64;
        // Spikes whose window leaves the recording are excluded from the aggregate.
        if !recording.fill_snippet(start, frames, &channel_indices, params.return_scaled, &mut snippet)
        {
            continue;
        }
        num_sampled += 1;
        for (i, &v) in snippet.iter().enumerate() {
            sums[i] += f64::from(v);
            sq_sums[i] += f64::from(v) * f64::from(v);
        }
    }

    let n = num_sampled as f64;
    let mean: Vec<f32> =
        sums.iter().map(|&s| if num_sampled == 0 { 0.0 } else { (s / n) as f32 }).collect();
    let std = params.compute_std.then(|| {
        sums.iter()
            .zip(sq_sums.iter())
            .map(|(&s, &sq)| {
                if num_sampled < 2 {
                    0.0
                } else {
                    let var = (sq - s * s / n) / (n - 1.0);
                    var.max(0.0).sqrt() as f32
                }
            })
            .collect()
    });

    UnitWaveforms {
        unit_id,
        channel_indices,
        num_spikes: train.len() as u64,
        num_sampled,
        mean,
        std,
    }
}

impl WaveformExtractor {
    /// Extracts waveform aggregates for every unit of `sorting`.
    ///
    /// With `sparsity`, each unit is restricted to its mask channels
    /// (the sparse pass); without it, all channels are used (the raw pass).
    /// Per-unit work runs on the given worker pool; units are disjoint, so
    /// no write overlaps another unit's write.
    ///
    /// # Errors
    /// Returns an error if a unit is missing from the sparsity mask
    pub fn extract(
        recording: &Recording,
        sorting: &Sorting,
        sparsity: Option<&ChannelSparsity>,
        params: &WaveformConfig,
        pool: &rayon::ThreadPool,
        progress: Option<&ProgressTracker>,
    ) -> Result<Self> {
        let fs = recording.sampling_frequency();
        let nbefore = (params.ms_before / 1000.0 * fs).round() as usize;
        let nafter = (params.ms_after / 1000.0 * fs).round() as usize;

        // Resolve each unit's channel subset before going parallel.
        let mut jobs: Vec<(u32, &[u64], Vec<usize>)> = Vec::with_capacity(sorting.num_units());
        for &unit_id in sorting.unit_ids() {
            let channel_indices = match sparsity {
                Some(mask) => mask.unit_channel_indices(unit_id)?,
                None => (0..recording.num_channels()).collect(),
            };
            jobs.push((unit_id, sorting.spike_train(unit_id)?, channel_indices));
        }

        let units: Vec<UnitWaveforms> = pool.install(|| {
            jobs.into_par_iter()
                .map(|(unit_id, train, channels)| {
                    let unit =
                        extract_unit(recording, unit_id, train, channels, nbefore, nafter, params);
                    if let Some(tracker) = progress {
                        tracker.record(1);
                    }
                    unit
                })
                .collect()
        });
        if let Some(tracker) = progress {
            tracker.log_final();
        }

        Ok(Self {
            params: params.clone(),
            sampling_frequency: fs,
            nbefore,
            nafter,
            channel_ids: recording.channel_ids().to_vec(),
            channel_locations: recording.channel_locations().to_vec(),
            units,
        })
    }

    /// Persists the extractor to `folder`; with `overwrite`, an existing
    /// folder is replaced wholesale.
    ///
    /// # Errors
    /// Returns an error if the folder exists without `overwrite`, or on I/O failure
    pub fn save(&self, folder: &Path, overwrite: bool) -> Result<()> {
        storage::create_fresh_dir(folder, overwrite)?;
        let manifest = WaveformManifest {
            params: self.params.clone(),
            sampling_frequency: self.sampling_frequency,
            nbefore: self.nbefore,
            nafter: self.nafter,
            channel_ids: self.channel_ids.clone(),
            channel_locations: self.channel_locations.clone(),
            units: self
                .units
                .iter()
                .map(|u| UnitManifest {
                    unit_id: u.unit_id,
                    channel_indices: u.channel_indices.clone(),
                    num_spikes: u.num_spikes,
                    num_sampled: u.num_sampled,
                    has_std: u.std.is_some(),
                })
                .collect(),
        };
        storage::write_json(&folder.join(MANIFEST_FILE), &manifest)?;

        let mut payload = Vec::new();
        for unit in &self.units {
            payload.extend_from_slice(&unit.mean);
            if let Some(std) = &unit.std {
                payload.extend_from_slice(std);
            }
        }
        storage::write_f32_bin(&folder.join(TEMPLATES_FILE), &payload)
    }

    /// Loads an extractor previously written by [`WaveformExtractor::save`].
    ///
    /// # Errors
    /// Returns an error if the manifest or payload is missing or inconsistent
    pub fn load(folder: &Path) -> Result<Self> {
        let manifest: WaveformManifest = storage::read_json(&folder.join(MANIFEST_FILE))?;
        let frames = manifest.nbefore + manifest.nafter;
        let total: usize = manifest
            .units
            .iter()
            .map(|u| frames * u.channel_indices.len() * if u.has_std { 2 } else { 1 })
            .sum();
        let payload = storage::read_f32_bin(&folder.join(TEMPLATES_FILE), total)?;

        let mut units = Vec::with_capacity(manifest.units.len());
        let mut offset = 0;
        for u in &manifest.units {
            let len = frames * u.channel_indices.len();
            let mean = payload[offset..offset + len].to_vec();
            offset += len;
            let std = u.has_std.then(|| {
                let s = payload[offset..offset + len].to_vec();
                offset += len;
                s
            });
            units.push(UnitWaveforms {
                unit_id: u.unit_id,
                channel_indices: u.channel_indices.clone(),
                num_spikes: u.num_spikes,
                num_sampled: u.num_sampled,
                mean,
                std,
            });
        }

        Ok(Self {
            params: manifest.params,
            sampling_frequency: manifest.sampling_frequency,
            nbefore: manifest.nbefore,
            nafter: manifest.nafter,
            channel_ids: manifest.channel_ids,
            channel_locations: manifest.channel_locations,
            units,
        })
    }

    #[must_use]
    pub fn params(&self) -> &WaveformConfig {
        &self.params
    }

    #[must_use]
    pub fn sampling_frequency(&self) -> f64 {
        self.sampling_frequency
    }

    /// Frames before the spike sample in each snippet.
    #[must_use]
    pub fn nbefore(&self) -> usize {
        self.nbefore
    }

    /// Frames per snippet.
    #[must_use]
    pub fn samples_per_waveform(&self) -> usize {
        self.nbefore + self.nafter
    }

    /// Total probe channel count (not per-unit subset size).
    #[must_use]
    pub fn num_channels(&self) -> usize {
        self.channel_ids.len()
    }

    #[must_use]
    pub fn channel_ids(&self) -> &[String] {
        &self.channel_ids
    }

    #[must_use]
    pub fn channel_locations(&self) -> &[[f32; 2]] {
        &self.channel_locations
    }

    #[must_use]
    pub fn units(&self) -> &[UnitWaveforms] {
        &self.units
    }

    #[must_use]
    pub fn unit_ids(&self) -> Vec<u32> {
        self.units.iter().map(|u| u.unit_id).collect()
    }

    /// The aggregate for one unit, if present.
    #[must_use]
    pub fn unit(&self, unit_id: u32) -> Option<&UnitWaveforms> {
        self.units.iter().find(|u| u.unit_id == unit_id)
    }

    /// Mean template of one unit embedded into the full channel space
    /// (zeros on channels outside the unit's subset), frame-major.
    ///
    /// # Errors
    /// Returns an error if the unit id is unknown
    pub fn dense_template(&self, unit_id: u32) -> Result<Vec<f32>> {
        let unit = self.unit(unit_id).ok_or(SpikepostError::UnitNotFound { unit_id })?;
        let frames = self.samples_per_waveform();
        let nch = self.num_channels();
        let mut dense = vec![0.0_f32; frames * nch];
        for frame in 0..frames {
            for (ci, &ch) in unit.channel_indices.iter().enumerate() {
                dense[frame * nch + ch] = unit.mean[frame * unit.channel_indices.len() + ci];
            }
        }
        Ok(dense)
    }

    /// The unit's extremum channel (global index) under a peak sign.
    ///
    /// # Errors
    /// Returns an error if the unit id is unknown
    pub fn peak_channel(&self, unit_id: u32, peak_sign: PeakSign) -> Result<usize> {
        let unit = self.unit(unit_id).ok_or(SpikepostError::UnitNotFound { unit_id })?;
        let nch = unit.channel_indices.len();
        let mut best_ci = 0;
        let mut best = f32::MIN;
        for ci in 0..nch {
            let score = (0..self.samples_per_waveform())
                .map(|frame| {
                    let v = unit.mean[frame * nch + ci];
                    match peak_sign {
                        PeakSign::Neg => -v,
                        PeakSign::Pos => v,
                        PeakSign::Both => v.abs(),
                    }
                })
                .fold(f32::MIN, f32::max);
            if score > best {
                best = score;
                best_ci = ci;
            }
        }
        Ok(unit.channel_indices[best_ci])
    }

    /// Frame index of the unit's extremum on its peak channel.
    ///
    /// # Errors
    /// Returns an error if the unit id is unknown
    pub fn peak_sample(&self, unit_id: u32, peak_sign: PeakSign) -> Result<usize> {
        let unit = self.unit(unit_id).ok_or(SpikepostError::UnitNotFound { unit_id })?;
        let peak_channel = self.peak_channel(unit_id, peak_sign)?;
        let ci = unit.channel_indices.iter().position(|&c| c == peak_channel).unwrap_or(0);
        let nch = unit.channel_indices.len();
        let mut best_frame = 0;
        let mut best = f32::MIN;
        for frame in 0..self.samples_per_waveform() {
            let v = unit.mean[frame * nch + ci];
            let score = match peak_sign {
                PeakSign::Neg => -v,
                PeakSign::Pos => v,
                PeakSign::Both => v.abs(),
            };
            if score > best {
                best = score;
                best_frame = frame;
            }
        }
        Ok(best_frame)
    }

    /// Peak-to-peak amplitude of the unit's mean template per covered
    /// channel, as `(global channel index, amplitude)` pairs.
    ///
    /// # Errors
    /// Returns an error if the unit id is unknown
    pub fn ptp_amplitudes(&self, unit_id: u32) -> Result<Vec<(usize, f32)>> {
        let unit = self.unit(unit_id).ok_or(SpikepostError::UnitNotFound { unit_id })?;
        let nch = unit.channel_indices.len();
        let mut out = Vec::with_capacity(nch);
        for (ci, &ch) in unit.channel_indices.iter().enumerate() {
            let mut lo = f32::MAX;
            let mut hi = f32::MIN;
            for frame in 0..self.samples_per_waveform() {
                let v = unit.mean[frame * nch + ci];
                lo = lo.min(v);
                hi = hi.max(v);
            }
            out.push((ch, hi - lo));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::fs;
    use tempfile::TempDir;

    fn single_thread_pool() -> rayon::ThreadPool {
        rayon::ThreadPoolBuilder::new().num_threads(1).build().unwrap()
    }

    /// Recording with a rectangular pulse on channel 1 around each spike.
    fn pulse_recording(spike_times: &[u64]) -> Recording {
        let num_samples = 1000;
        let mut traces = vec![0.0_f32; num_samples * 2];
        for &t in spike_times {
            for dt in 0..3 {
                traces[(t as usize + dt) * 2 + 1] = -10.0;
            }
        }
        Recording::new(
            vec!["c0".to_string(), "c1".to_string()],
            vec![[0.0, 0.0], [0.0, 20.0]],
            1000.0,
            traces,
            2.0,
            0.0,
        )
        .unwrap()
    }

    fn pulse_sorting(spike_times: Vec<u64>) -> Sorting {
        let mut trains = BTreeMap::new();
        trains.insert(1, spike_times);
        Sorting::new(vec![1], 1000.0, trains).unwrap()
    }

    fn raw_params() -> WaveformConfig {
        WaveformConfig {
            ms_before: 2.0,
            ms_after: 4.0,
            max_spikes_per_unit: 100,
            return_scaled: false,
            compute_std: true,
        }
    }

    #[test]
    fn test_subsample_indices() {
        assert_eq!(subsample_indices(3, 5), vec![0, 1, 2]);
        assert_eq!(subsample_indices(10, 5), vec![0, 2, 4, 6, 8]);
        let idx = subsample_indices(1000, 7);
        assert_eq!(idx.len(), 7);
        assert!(idx.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_extract_mean_template() {
        let recording = pulse_recording(&[100, 200, 300]);
        let sorting = pulse_sorting(vec![100, 200, 300]);
        let pool = single_thread_pool();

        let we =
            WaveformExtractor::extract(&recording, &sorting, None, &raw_params(), &pool, None)
                .unwrap();

        // 1 kHz sampling: 2 ms before = 2 frames, 4 ms after = 4 frames.
        assert_eq!(we.nbefore(), 2);
        assert_eq!(we.samples_per_waveform(), 6);

        let unit = we.unit(1).unwrap();
        assert_eq!(unit.num_spikes, 3);
        assert_eq!(unit.num_sampled, 3);
        // Channel 1 at the spike sample (frame nbefore) is the pulse value.
        let nch = unit.channel_indices.len();
        assert_eq!(nch, 2);
        assert!((unit.mean[we.nbefore() * nch + 1] - -10.0).abs() < 1e-6);
        // Channel 0 stays flat.
        assert!(unit.mean[we.nbefore() * nch].abs() < 1e-6);
        // Identical snippets have zero deviation.
        assert!(unit.std.as_ref().unwrap().iter().all(|&s| s.abs() < 1e-6));
    }

    #[test]
    fn test_extract_scaled() {
        let recording = pulse_recording(&[100]);
        let sorting = pulse_sorting(vec![100]);
        let pool = single_thread_pool();
        let params = WaveformConfig { return_scaled: true, ..raw_params() };

        let we =
            WaveformExtractor::extract(&recording, &sorting, None, &params, &pool, None).unwrap();
        let unit = we.unit(1).unwrap();
        // gain_to_uv = 2.0
        assert!((unit.mean[we.nbefore() * 2 + 1] - -20.0).abs() < 1e-6);
    }

    #[test]
    fn test_edge_spikes_are_excluded() {
        let recording = pulse_recording(&[1, 500]);
        let sorting = pulse_sorting(vec![1, 500]);
        let pool = single_thread_pool();

        let we =
            WaveformExtractor::extract(&recording, &sorting, None, &raw_params(), &pool, None)
                .unwrap();
        let unit = we.unit(1).unwrap();
        // Spike at sample 1 has no room for the 2-frame pre-window.
        assert_eq!(unit.num_spikes, 2);
        assert_eq!(unit.num_sampled, 1);
    }

    #[test]
    fn test_peak_channel_and_sample() {
        let recording = pulse_recording(&[100, 200]);
        let sorting = pulse_sorting(vec![100, 200]);
        let pool = single_thread_pool();

        let we =
            WaveformExtractor::extract(&recording, &sorting, None, &raw_params(), &pool, None)
                .unwrap();
        assert_eq!(we.peak_channel(1, PeakSign::Neg).unwrap(), 1);
        assert_eq!(we.peak_channel(1, PeakSign::Both).unwrap(), 1);
        assert_eq!(we.peak_sample(1, PeakSign::Neg).unwrap(), we.nbefore());
    }

    #[test]
    fn test_ptp_amplitudes() {
        let recording = pulse_recording(&[100]);
        let sorting = pulse_sorting(vec![100]);
        let pool = single_thread_pool();

        let we =
            WaveformExtractor::extract(&recording, &sorting, None, &raw_params(), &pool, None)
                .unwrap();
        let ptp = we.ptp_amplitudes(1).unwrap();
        assert_eq!(ptp.len(), 2);
        assert!(ptp[0].1.abs() < 1e-6);
        assert!((ptp[1].1 - 10.0).abs() < 1e-6);
    }

    #[test]
    fn test_dense_template_matches_full_extraction() {
        let recording = pulse_recording(&[100]);
        let sorting = pulse_sorting(vec![100]);
        let pool = single_thread_pool();

        let we =
            WaveformExtractor::extract(&recording, &sorting, None, &raw_params(), &pool, None)
                .unwrap();
        let dense = we.dense_template(1).unwrap();
        assert_eq!(dense.len(), we.samples_per_waveform() * we.num_channels());
        assert_eq!(dense, we.unit(1).unwrap().mean);
    }

    #[test]
    fn test_save_load_roundtrip_bit_identical() {
        let dir = TempDir::new().unwrap();
        let recording = pulse_recording(&[100, 200, 300]);
        let sorting = pulse_sorting(vec![100, 200, 300]);
        let pool = single_thread_pool();

        let we =
            WaveformExtractor::extract(&recording, &sorting, None, &raw_params(), &pool, None)
                .unwrap();
        let folder = dir.path().join("waveforms");
        we.save(&folder, false).unwrap();

        let loaded = WaveformExtractor::load(&folder).unwrap();
        assert_eq!(loaded.unit_ids(), we.unit_ids());
        let (a, b) = (we.unit(1).unwrap(), loaded.unit(1).unwrap());
        assert_eq!(a.num_spikes, b.num_spikes);
        assert_eq!(a.num_sampled, b.num_sampled);
        for (x, y) in a.mean.iter().zip(b.mean.iter()) {
            assert_eq!(x.to_bits(), y.to_bits());
        }
    }

    #[test]
    fn test_rebuild_with_overwrite_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let recording = pulse_recording(&[100, 200, 300]);
        let sorting = pulse_sorting(vec![100, 200, 300]);
        let pool = single_thread_pool();
        let folder = dir.path().join("waveforms");

        let we1 =
            WaveformExtractor::extract(&recording, &sorting, None, &raw_params(), &pool, None)
                .unwrap();
        we1.save(&folder, true).unwrap();
        let first_manifest = fs::read(folder.join("waveforms.json")).unwrap();
        let first_templates = fs::read(folder.join("templates.bin")).unwrap();

        let we2 =
            WaveformExtractor::extract(&recording, &sorting, None, &raw_params(), &pool, None)
                .unwrap();
        we2.save(&folder, true).unwrap();
        assert_eq!(first_manifest, fs::read(folder.join("waveforms.json")).unwrap());
        assert_eq!(first_templates, fs::read(folder.join("templates.bin")).unwrap());
    }

    #[test]
    fn test_save_refuses_existing_without_overwrite() {
        let dir = TempDir::new().unwrap();
        let recording = pulse_recording(&[100]);
        let sorting = pulse_sorting(vec![100]);
        let pool = single_thread_pool();
        let folder = dir.path().join("waveforms");

        let we =
            WaveformExtractor::extract(&recording, &sorting, None, &raw_params(), &pool, None)
                .unwrap();
        we.save(&folder, false).unwrap();
        assert!(we.save(&folder, false).is_err());
    }
}
