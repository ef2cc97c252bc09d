//! Channel sparsity: which channels belong to which unit.
//!
//! The mask is computed once against the full, pre-dedup unit set from the
//! raw waveform representation (each unit keeps the channels within a
//! physical radius of its peak channel), then re-indexed to the surviving
//! units in their deduplicated order. A unit always includes its own peak
//! channel, so every mask row has at least one `true` entry.

use serde::{Deserialize, Serialize};

use crate::config::PeakSign;
use crate::errors::{Result, SpikepostError};
use crate::validation::validate_positive;
use crate::waveforms::WaveformExtractor;

/// Boolean unit-by-channel mask, row order aligned with `unit_ids`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelSparsity {
    unit_ids: Vec<u32>,
    channel_ids: Vec<String>,
    mask: Vec<Vec<bool>>,
}

impl ChannelSparsity {
    /// Builds a sparsity mask from explicit parts.
    ///
    /// # Errors
    /// Returns an error if row/column counts disagree or a row is all-false
    pub fn new(unit_ids: Vec<u32>, channel_ids: Vec<String>, mask: Vec<Vec<bool>>) -> Result<Self> {
        if mask.len() != unit_ids.len() {
            return Err(SpikepostError::DataIntegrity {
                context: "sparsity".to_string(),
                reason: format!("{} mask rows for {} units", mask.len(), unit_ids.len()),
            });
        }
        for (row, &unit_id) in mask.iter().zip(unit_ids.iter()) {
            if row.len() != channel_ids.len() {
                return Err(SpikepostError::DataIntegrity {
                    context: "sparsity".to_string(),
                    reason: format!(
                        "Unit {unit_id} mask row has {} entries for {} channels",
                        row.len(),
                        channel_ids.len()
                    ),
                });
            }
            if !row.iter().any(|&b| b) {
                return Err(SpikepostError::DataIntegrity {
                    context: "sparsity".to_string(),
                    reason: format!("Unit {unit_id} mask row selects no channels"),
                });
            }
        }
        Ok(Self { unit_ids, channel_ids, mask })
    }

    /// Computes radius sparsity from a raw waveform representation.
    ///
    /// For every unit, channels within `radius_um` of the unit's peak
    /// channel location are kept. The peak channel itself is always within
    /// radius zero of itself, so each row is non-empty by construction.
    ///
    /// # Errors
    /// Returns a configuration error if `radius_um` is not positive
    pub fn compute(waveforms: &WaveformExtractor, radius_um: f64) -> Result<Self> {
        validate_positive(radius_um, "sparsity.radius_um")?;

        let locations = waveforms.channel_locations();
        let mut mask = Vec::with_capacity(waveforms.units().len());
        for unit in waveforms.units() {
            let peak = waveforms.peak_channel(unit.unit_id, PeakSign::Both)?;
            let peak_loc = locations[peak];
            let row: Vec<bool> = locations
                .iter()
                .map(|loc| {
                    let dx = f64::from(loc[0] - peak_loc[0]);
                    let dy = f64::from(loc[1] - peak_loc[1]);
                    (dx * dx + dy * dy).sqrt() <= radius_um
                })
                .collect();
            mask.push(row);
        }
        Self::new(waveforms.unit_ids(), waveforms.channel_ids().to_vec(), mask)
    }

    /// Re-indexes the mask to `unit_ids`, preserving that exact order.
    ///
    /// The mask may have been computed against the full unit set in any
    /// order; the result's rows follow the deduplicated set's order.
    ///
    /// # Errors
    /// Returns an error if a requested unit is not in the mask
    pub fn select_units(&self, unit_ids: &[u32]) -> Result<ChannelSparsity> {
        let mut mask = Vec::with_capacity(unit_ids.len());
        for &unit_id in unit_ids {
            let row_idx = self
                .unit_ids
                .iter()
                .position(|&id| id == unit_id)
                .ok_or(SpikepostError::UnitNotFound { unit_id })?;
            mask.push(self.mask[row_idx].clone());
        }
        Self::new(unit_ids.to_vec(), self.channel_ids.clone(), mask)
    }

    #[must_use]
    pub fn unit_ids(&self) -> &[u32] {
        &self.unit_ids
    }

    #[must_use]
    pub fn channel_ids(&self) -> &[String] {
        &self.channel_ids
    }

    #[must_use]
    pub fn mask(&self) -> &[Vec<bool>] {
        &self.mask
    }

    /// Ascending channel indices selected for one unit.
    ///
    /// # Errors
    /// Returns an error if the unit id is not in the mask
    pub fn unit_channel_indices(&self, unit_id: u32) -> Result<Vec<usize>> {
        let row_idx = self
            .unit_ids
            .iter()
            .position(|&id| id == unit_id)
            .ok_or(SpikepostError::UnitNotFound { unit_id })?;
        Ok(self.mask[row_idx]
            .iter()
            .enumerate()
            .filter_map(|(i, &b)| b.then_some(i))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WaveformConfig;
    use crate::recording::Recording;
    use crate::sorting::Sorting;
    use std::collections::BTreeMap;

    /// Linear probe with 20 um channel spacing; one unit peaking on each
    /// of the requested channels.
    fn waveforms_with_peaks(peaks: &[(u32, usize)]) -> WaveformExtractor {
        let num_channels = 4;
        let num_samples = 400;
        let mut traces = vec![0.0_f32; num_samples * num_channels];
        let mut trains = BTreeMap::new();
        let mut unit_ids = Vec::new();
        for (i, &(unit_id, peak_channel)) in peaks.iter().enumerate() {
            let t = 100 + i * 50;
            traces[t * num_channels + peak_channel] = -20.0;
            trains.insert(unit_id, vec![t as u64]);
            unit_ids.push(unit_id);
        }
        let recording = Recording::new(
            (0..num_channels).map(|c| format!("ch{c}")).collect(),
            (0..num_channels).map(|c| [0.0, 20.0 * c as f32]).collect(),
            1000.0,
            traces,
            1.0,
            0.0,
        )
        .unwrap();
        let sorting = Sorting::new(unit_ids, 1000.0, trains).unwrap();
        let pool = rayon::ThreadPoolBuilder::new().num_threads(1).build().unwrap();
        let params = WaveformConfig {
            ms_before: 1.0,
            ms_after: 2.0,
            max_spikes_per_unit: 10,
            return_scaled: false,
            compute_std: false,
        };
        WaveformExtractor::extract(&recording, &sorting, None, &params, &pool, None).unwrap()
    }

    #[test]
    fn test_compute_radius_selects_nearby_channels() {
        let we = waveforms_with_peaks(&[(1, 0), (2, 3)]);
        // 25 um radius on a 20 um pitch probe: peak plus immediate neighbor.
        let sparsity = ChannelSparsity::compute(&we, 25.0).unwrap();

        assert_eq!(sparsity.unit_ids(), &[1, 2]);
        assert_eq!(sparsity.mask()[0], vec![true, true, false, false]);
        assert_eq!(sparsity.mask()[1], vec![false, false, true, true]);
        assert_eq!(sparsity.unit_channel_indices(2).unwrap(), vec![2, 3]);
    }

    #[test]
    fn test_compute_rejects_non_positive_radius() {
        let we = waveforms_with_peaks(&[(1, 0)]);
        let err = ChannelSparsity::compute(&we, 0.0).unwrap_err();
        assert!(err.to_string().contains("radius_um"));
        assert!(ChannelSparsity::compute(&we, -10.0).is_err());
    }

    #[test]
    fn test_every_row_contains_peak_channel() {
        let we = waveforms_with_peaks(&[(1, 0), (2, 1), (3, 2), (4, 3)]);
        // Radius smaller than the channel pitch: each row is just its peak.
        let sparsity = ChannelSparsity::compute(&we, 5.0).unwrap();
        for (row, &(_, peak)) in sparsity.mask().iter().zip([(1, 0), (2, 1), (3, 2), (4, 3)].iter())
        {
            assert!(row[peak]);
            assert_eq!(row.iter().filter(|&&b| b).count(), 1);
        }
    }

    #[test]
    fn test_select_units_preserves_requested_order() {
        let we = waveforms_with_peaks(&[(1, 0), (2, 1), (3, 2)]);
        let sparsity = ChannelSparsity::compute(&we, 25.0).unwrap();

        // Any permutation of the original ordering is honored exactly.
        for order in [vec![3, 1], vec![1, 3], vec![2, 3, 1], vec![3, 2, 1]] {
            let selected = sparsity.select_units(&order).unwrap();
            assert_eq!(selected.unit_ids(), order.as_slice());
            for (i, &unit_id) in order.iter().enumerate() {
                let original_row =
                    &sparsity.mask()[sparsity.unit_ids().iter().position(|&u| u == unit_id).unwrap()];
                assert_eq!(&selected.mask()[i], original_row);
            }
        }
    }

    #[test]
    fn test_select_units_unknown_id() {
        let we = waveforms_with_peaks(&[(1, 0)]);
        let sparsity = ChannelSparsity::compute(&we, 25.0).unwrap();
        assert!(sparsity.select_units(&[1, 42]).is_err());
    }

    #[test]
    fn test_new_rejects_empty_row() {
        let result = ChannelSparsity::new(
            vec![1],
            vec!["ch0".to_string(), "ch1".to_string()],
            vec![vec![false, false]],
        );
        assert!(result.unwrap_err().to_string().contains("selects no channels"));
    }
}
