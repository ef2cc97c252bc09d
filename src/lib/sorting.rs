//! Spike-sorted unit assignments.
//!
//! A sorting assigns discrete spike events (sample indices) to unit ids.
//! It is produced by the upstream sorting capsule and is read-only here,
//! apart from unit selection during deduplication. Persisted as a single
//! `sorting.json` per folder; save/load round-trips are bit-identical so
//! a working copy stored next to a block's outputs is self-contained.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SpikepostError};
use crate::recording::Recording;
use crate::storage;
use crate::validation::{validate_dir_exists, validate_unique_ids};

/// Manifest file name inside a sorting folder.
const SORTING_FILE: &str = "sorting.json";

/// A unit-to-spike-train assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Sorting {
    /// Unit ids in presentation order (independent of map order).
    unit_ids: Vec<u32>,
    sampling_frequency: f64,
    /// Per-unit ascending spike sample indices.
    spike_trains: BTreeMap<u32, Vec<u64>>,
}

impl Sorting {
    /// Builds a sorting, validating id uniqueness and spike ordering.
    ///
    /// # Errors
    /// Returns an error on duplicate ids, a missing train, or an unsorted train
    pub fn new(
        unit_ids: Vec<u32>,
        sampling_frequency: f64,
        spike_trains: BTreeMap<u32, Vec<u64>>,
    ) -> Result<Self> {
        validate_unique_ids(&unit_ids, "unit_ids")?;
        for &unit_id in &unit_ids {
            let train = spike_trains.get(&unit_id).ok_or(SpikepostError::UnitNotFound { unit_id })?;
            if train.windows(2).any(|w| w[0] > w[1]) {
                return Err(SpikepostError::DataIntegrity {
                    context: format!("unit {unit_id}"),
                    reason: "Spike train is not sorted ascending".to_string(),
                });
            }
        }
        Ok(Self { unit_ids, sampling_frequency, spike_trains })
    }

    /// Loads a sorting folder written by the sorting capsule (or by
    /// [`Sorting::save`]).
    ///
    /// # Errors
    /// Returns an error if the file is missing or fails validation
    pub fn load(folder: &Path) -> Result<Self> {
        validate_dir_exists(folder, "Sorting folder")?;
        let sorting: Sorting = storage::read_json(&folder.join(SORTING_FILE))?;
        Self::new(sorting.unit_ids, sorting.sampling_frequency, sorting.spike_trains)
    }

    /// Persists the sorting to `folder`.
    ///
    /// # Errors
    /// Returns an error if the folder exists without `overwrite`, or on I/O failure
    pub fn save(&self, folder: &Path, overwrite: bool) -> Result<()> {
        storage::create_fresh_dir(folder, overwrite)?;
        storage::write_json(&folder.join(SORTING_FILE), self)
    }

    #[must_use]
    pub fn unit_ids(&self) -> &[u32] {
        &self.unit_ids
    }

    #[must_use]
    pub fn num_units(&self) -> usize {
        self.unit_ids.len()
    }

    #[must_use]
    pub fn sampling_frequency(&self) -> f64 {
        self.sampling_frequency
    }

    /// The ascending spike train of one unit.
    ///
    /// # Errors
    /// Returns an error if the unit id is unknown
    pub fn spike_train(&self, unit_id: u32) -> Result<&[u64]> {
        self.spike_trains
            .get(&unit_id)
            .map(Vec::as_slice)
            .ok_or(SpikepostError::UnitNotFound { unit_id })
    }

    /// Spike count of one unit.
    ///
    /// # Errors
    /// Returns an error if the unit id is unknown
    pub fn num_spikes(&self, unit_id: u32) -> Result<usize> {
        self.spike_train(unit_id).map(<[u64]>::len)
    }

    /// Total spike count across units.
    #[must_use]
    pub fn total_num_spikes(&self) -> usize {
        self.unit_ids.iter().map(|id| self.spike_trains[id].len()).sum()
    }

    /// A new sorting restricted to `unit_ids`, preserving the given order.
    ///
    /// # Errors
    /// Returns an error if any requested id is unknown
    pub fn select_units(&self, unit_ids: &[u32]) -> Result<Sorting> {
        let mut spike_trains = BTreeMap::new();
        for &unit_id in unit_ids {
            let train =
                self.spike_trains.get(&unit_id).ok_or(SpikepostError::UnitNotFound { unit_id })?;
            spike_trains.insert(unit_id, train.clone());
        }
        Sorting::new(unit_ids.to_vec(), self.sampling_frequency, spike_trains)
    }

    /// Checks this sorting against the recording it was sorted from.
    ///
    /// A spike index at or beyond the recording length, or a sampling-rate
    /// mismatch, means the pair does not belong together; the block must
    /// abort rather than silently truncate.
    ///
    /// # Errors
    /// Returns a data-integrity error describing the first mismatch
    pub fn validate_against(&self, recording: &Recording, context: &str) -> Result<()> {
        let fs_delta = (self.sampling_frequency - recording.sampling_frequency()).abs();
        if fs_delta > 1e-6 * recording.sampling_frequency() {
            return Err(SpikepostError::DataIntegrity {
                context: context.to_string(),
                reason: format!(
                    "Sorting sampling rate {} Hz does not match recording {} Hz",
                    self.sampling_frequency,
                    recording.sampling_frequency()
                ),
            });
        }
        for &unit_id in &self.unit_ids {
            if let Some(&last) = self.spike_trains[&unit_id].last() {
                if last >= recording.num_samples() {
                    return Err(SpikepostError::DataIntegrity {
                        context: context.to_string(),
                        reason: format!(
                            "Unit {unit_id} spike index {last} exceeds recording length {}",
                            recording.num_samples()
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}
