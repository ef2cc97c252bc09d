//! Per-spike amplitudes.
//!
//! For each unit, the amplitude of every spike in its train is read from
//! the traces at the unit's template extremum (peak channel, peak sample
//! offset). Amplitudes cover the full train, not the subsampled set used
//! for templates.

use std::collections::BTreeMap;
use std::path::Path;

use rayon::prelude::*;
use serde::Serialize;

use crate::config::{AmplitudeConfig, AmplitudeOutput};
use crate::errors::Result;
use crate::recording::Recording;
use crate::sorting::Sorting;
use crate::storage;
use crate::waveforms::WaveformExtractor;

/// Per-unit spike amplitude vectors.
#[derive(Debug, Clone, PartialEq)]
pub struct SpikeAmplitudes {
    output: AmplitudeOutput,
    by_unit: BTreeMap<u32, Vec<f32>>,
}

/// On-disk layout, selected by the `output` option.
#[derive(Serialize)]
#[serde(tag = "layout", rename_all = "snake_case")]
enum AmplitudesFile<'a> {
    Concatenated { unit_index: Vec<u32>, amplitudes: Vec<f32> },
    ByUnit { units: &'a BTreeMap<u32, Vec<f32>> },
}

impl SpikeAmplitudes {
    /// Amplitudes of one unit's spikes, in train order.
    #[must_use]
    pub fn unit(&self, unit_id: u32) -> Option<&[f32]> {
        self.by_unit.get(&unit_id).map(Vec::as_slice)
    }

    /// All amplitudes flattened in unit order, with a parallel unit-id vector.
    #[must_use]
    pub fn concatenated(&self) -> (Vec<u32>, Vec<f32>) {
        let mut unit_index = Vec::new();
        let mut amplitudes = Vec::new();
        for (&unit_id, values) in &self.by_unit {
            unit_index.extend(std::iter::repeat(unit_id).take(values.len()));
            amplitudes.extend_from_slice(values);
        }
        (unit_index, amplitudes)
    }

    /// Persists the amplitudes as `spike_amplitudes.json` under `folder`,
    /// in the configured layout.
    ///
    /// # Errors
    /// Returns an error on I/O failure
    pub fn save(&self, folder: &Path) -> Result<()> {
        let path = folder.join("spike_amplitudes.json");
        match self.output {
            AmplitudeOutput::Concatenated => {
                let (unit_index, amplitudes) = self.concatenated();
                storage::write_json(&path, &AmplitudesFile::Concatenated { unit_index, amplitudes })
            }
            AmplitudeOutput::ByUnit => {
                storage::write_json(&path, &AmplitudesFile::ByUnit { units: &self.by_unit })
            }
        }
    }
}

/// Computes per-spike amplitudes for every unit of the sparse representation.
///
/// Spikes whose extremum sample falls outside the recording (first/last
/// window of the block) take the nearest in-bounds sample.
///
/// # Errors
/// Returns an error if a unit is missing from the waveforms or sorting
pub fn compute_spike_amplitudes(
    waveforms: &WaveformExtractor,
    recording: &Recording,
    sorting: &Sorting,
    config: &AmplitudeConfig,
    pool: &rayon::ThreadPool,
) -> Result<SpikeAmplitudes> {
    let mut jobs = Vec::with_capacity(sorting.num_units());
    for &unit_id in sorting.unit_ids() {
        let peak_channel = waveforms.peak_channel(unit_id, config.peak_sign)?;
        let peak_offset =
            waveforms.peak_sample(unit_id, config.peak_sign)? as i64 - waveforms.nbefore() as i64;
        jobs.push((unit_id, sorting.spike_train(unit_id)?, peak_channel, peak_offset));
    }

    let last_frame = recording.num_samples().saturating_sub(1) as i64;
    let by_unit: BTreeMap<u32, Vec<f32>> = pool.install(|| {
        jobs.into_par_iter()
            .map(|(unit_id, train, peak_channel, peak_offset)| {
                let values = train
                    .iter()
                    .map(|&t| {
                        let frame = (t as i64 + peak_offset).clamp(0, last_frame);
                        recording.sample(frame as u64, peak_channel, config.return_scaled)
                    })
                    .collect();
                (unit_id, values)
            })
            .collect()
    });

    Ok(SpikeAmplitudes { output: config.output, by_unit })
}
