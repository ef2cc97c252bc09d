//! Preprocessed recording access.
//!
//! A recording is an ordered multichannel sampled signal persisted as a
//! folder: `recording.json` (channel ids and physical locations, sampling
//! rate, sample count, scaling) plus `traces.bin` (little-endian `f32`,
//! frame-major: all channels of sample 0, then sample 1, ...). Recordings
//! are produced by the upstream preprocessing capsule and are read-only
//! for the duration of a block.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SpikepostError};
use crate::storage;
use crate::validation::{validate_dir_exists, validate_unique_ids};

/// Manifest file name inside a recording folder.
const MANIFEST_FILE: &str = "recording.json";
/// Trace payload file name inside a recording folder.
const TRACES_FILE: &str = "traces.bin";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct RecordingManifest {
    channel_ids: Vec<String>,
    /// Per-channel probe coordinates (um), same order as `channel_ids`.
    channel_locations: Vec<[f32; 2]>,
    sampling_frequency: f64,
    num_samples: u64,
    gain_to_uv: f32,
    offset_to_uv: f32,
}

/// An in-memory preprocessed recording.
#[derive(Debug, Clone)]
pub struct Recording {
    manifest: RecordingManifest,
    /// Frame-major traces: `traces[sample * num_channels + channel]`.
    traces: Vec<f32>,
}

impl Recording {
    /// Builds a recording from its parts. Intended for tests and dataset
    /// generation; pipeline inputs come from [`Recording::load`].
    ///
    /// # Errors
    /// Returns an error if ids/locations/trace lengths are inconsistent
    pub fn new(
        channel_ids: Vec<String>,
        channel_locations: Vec<[f32; 2]>,
        sampling_frequency: f64,
        traces: Vec<f32>,
        gain_to_uv: f32,
        offset_to_uv: f32,
    ) -> Result<Self> {
        validate_unique_ids(&channel_ids, "channel_ids")?;
        if channel_locations.len() != channel_ids.len() {
            return Err(SpikepostError::DataIntegrity {
                context: "recording".to_string(),
                reason: format!(
                    "{} channel locations for {} channels",
                    channel_locations.len(),
                    channel_ids.len()
                ),
            });
        }
        let num_channels = channel_ids.len();
        if num_channels == 0 || traces.len() % num_channels != 0 {
            return Err(SpikepostError::DataIntegrity {
                context: "recording".to_string(),
                reason: format!(
                    "Trace length {} is not a multiple of channel count {num_channels}",
                    traces.len()
                ),
            });
        }
        let manifest = RecordingManifest {
            channel_ids,
            channel_locations,
            sampling_frequency,
            num_samples: (traces.len() / num_channels) as u64,
            gain_to_uv,
            offset_to_uv,
        };
        Ok(Self { manifest, traces })
    }

    /// Loads a recording folder written by the preprocessing capsule.
    ///
    /// # Errors
    /// Returns an error if the manifest or trace payload is missing or
    /// inconsistent
    pub fn load(folder: &Path) -> Result<Self> {
        validate_dir_exists(folder, "Recording folder")?;
        let manifest: RecordingManifest = storage::read_json(&folder.join(MANIFEST_FILE))?;
        let expected = manifest.num_samples as usize * manifest.channel_ids.len();
        let traces = storage::read_f32_bin(&folder.join(TRACES_FILE), expected)?;
        validate_unique_ids(&manifest.channel_ids, "channel_ids")?;
        if manifest.channel_locations.len() != manifest.channel_ids.len() {
            return Err(SpikepostError::DataIntegrity {
                context: folder.display().to_string(),
                reason: "Channel location count does not match channel count".to_string(),
            });
        }
        Ok(Self { manifest, traces })
    }

    /// Persists the recording to `folder`.
    ///
    /// # Errors
    /// Returns an error if the folder exists without `overwrite`, or on I/O failure
    pub fn save(&self, folder: &Path, overwrite: bool) -> Result<()> {
        storage::create_fresh_dir(folder, overwrite)?;
        storage::write_json(&folder.join(MANIFEST_FILE), &self.manifest)?;
        storage::write_f32_bin(&folder.join(TRACES_FILE), &self.traces)
    }

    #[must_use]
    pub fn num_channels(&self) -> usize {
        self.manifest.channel_ids.len()
    }

    #[must_use]
    pub fn num_samples(&self) -> u64 {
        self.manifest.num_samples
    }

    #[must_use]
    pub fn sampling_frequency(&self) -> f64 {
        self.manifest.sampling_frequency
    }

    /// Total duration in seconds.
    #[must_use]
    pub fn duration_s(&self) -> f64 {
        self.manifest.num_samples as f64 / self.manifest.sampling_frequency
    }

    #[must_use]
    pub fn channel_ids(&self) -> &[String] {
        &self.manifest.channel_ids
    }

    #[must_use]
    pub fn channel_locations(&self) -> &[[f32; 2]] {
        &self.manifest.channel_locations
    }

    /// Index of a channel id, if present.
    #[must_use]
    pub fn channel_index(&self, channel_id: &str) -> Option<usize> {
        self.manifest.channel_ids.iter().position(|id| id == channel_id)
    }

    /// One sample of one channel, optionally scaled to microvolts.
    #[must_use]
    pub fn sample(&self, frame: u64, channel: usize, scaled: bool) -> f32 {
        let raw = self.traces[frame as usize * self.num_channels() + channel];
        if scaled { raw * self.manifest.gain_to_uv + self.manifest.offset_to_uv } else { raw }
    }

    /// Copies a `num_frames`-long snippet of the given channels starting at
    /// `start` into `out` (frame-major over `channels`). Returns `false`
    /// without touching `out` when the window leaves the recording bounds.
    #[must_use]
    pub fn fill_snippet(
        &self,
        start: i64,
        num_frames: usize,
        channels: &[usize],
        scaled: bool,
        out: &mut [f32],
    ) -> bool {
        debug_assert_eq!(out.len(), num_frames * channels.len());
        if start < 0 || start as u64 + num_frames as u64 > self.manifest.num_samples {
            return false;
        }
        let start = start as u64;
        for frame in 0..num_frames {
            for (ci, &channel) in channels.iter().enumerate() {
                out[frame * channels.len() + ci] = self.sample(start + frame as u64, channel, scaled);
            }
        }
        true
    }

    /// Robust noise level of one channel: median absolute deviation scaled
    /// to the standard deviation of a normal distribution, estimated over
    /// up to `max_frames` evenly spaced samples.
    #[must_use]
    pub fn noise_level_mad(&self, channel: usize, scaled: bool, max_frames: usize) -> f32 {
        let n = self.manifest.num_samples as usize;
        if n == 0 || max_frames == 0 {
            return 0.0;
        }
        let step = (n / max_frames.min(n)).max(1);
        let mut values: Vec<f32> =
            (0..n).step_by(step).map(|t| self.sample(t as u64, channel, scaled)).collect();

        let median = |v: &mut Vec<f32>| -> f32 {
            v.sort_by(|a, b| a.total_cmp(b));
            v[v.len() / 2]
        };
        let med = median(&mut values);
        let mut deviations: Vec<f32> = values.iter().map(|v| (v - med).abs()).collect();
        median(&mut deviations) / 0.674_489_75
    }
}
