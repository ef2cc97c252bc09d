//! Redundant-unit removal.
//!
//! Spike sorters routinely report the same neuron twice (split across
//! shanks, or re-detected with a timing offset). Units whose mean templates
//! on the full channel set are near-identical are merged by dropping the
//! weaker of the pair. Similarity is cosine similarity of the flattened
//! dense templates from the raw waveform pass.

use itertools::Itertools;
use serde::Serialize;

use crate::errors::{Result, SpikepostError};
use crate::features::similarity::cosine_similarity;
use crate::sorting::Sorting;
use crate::validation::validate_unit_fraction;
use crate::waveforms::WaveformExtractor;

/// One unit dropped during deduplication.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemovedUnit {
    /// The dropped unit.
    pub removed_id: u32,
    /// The unit it duplicated.
    pub kept_id: u32,
    /// Template similarity that triggered the removal.
    pub similarity: f64,
}

/// Structured per-block dedup outcome.
///
/// This record is the source of truth for how many units were removed;
/// free text is rendered from it only at the provenance boundary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlockSummary {
    pub block_name: String,
    pub units_before: usize,
    pub units_after: usize,
    pub removed: Vec<RemovedUnit>,
}

impl BlockSummary {
    #[must_use]
    pub fn removed_count(&self) -> usize {
        self.removed.len()
    }

    /// Renders the human-readable note line for the provenance record.
    #[must_use]
    pub fn render_note(&self) -> String {
        format!("{}:\n- Removed {} duplicated units.\n", self.block_name, self.removed_count())
    }
}

/// Removes units judged redundant with another unit.
///
/// For every unit pair whose template similarity exceeds `threshold`, the
/// weaker unit is dropped: fewer spikes loses, and on a spike-count tie the
/// larger id loses. Pairs are resolved in descending similarity order, so
/// the strongest duplicates are settled first. The surviving sorting keeps
/// the original unit order; output ids are a strict subset of input ids.
///
/// # Errors
/// Returns a configuration error if `threshold` is not in (0, 1), and a
/// data-integrity error if deduplication leaves no units
pub fn remove_redundant_units(
    waveforms: &WaveformExtractor,
    sorting: &Sorting,
    threshold: f64,
) -> Result<(Sorting, Vec<RemovedUnit>)> {
    validate_unit_fraction(threshold, "duplicate_threshold")?;

    let unit_ids = sorting.unit_ids();
    let templates: Vec<Vec<f32>> =
        unit_ids.iter().map(|&id| waveforms.dense_template(id)).collect::<Result<_>>()?;

    // All pairs above threshold, strongest first; ties broken by id pair
    // so the outcome is independent of iteration order.
    let mut candidates: Vec<(f64, usize, usize)> = (0..unit_ids.len())
        .tuple_combinations()
        .filter_map(|(i, j)| {
            let similarity = cosine_similarity(&templates[i], &templates[j]);
            (similarity > threshold).then_some((similarity, i, j))
        })
        .collect();
    candidates.sort_by(|a, b| {
        b.0.total_cmp(&a.0).then_with(|| (a.1, a.2).cmp(&(b.1, b.2)))
    });

    let mut alive = vec![true; unit_ids.len()];
    let mut removed = Vec::new();
    for (similarity, i, j) in candidates {
        if !alive[i] || !alive[j] {
            continue;
        }
        let spikes_i = sorting.num_spikes(unit_ids[i])?;
        let spikes_j = sorting.num_spikes(unit_ids[j])?;
        // Weaker unit loses: fewer spikes, tie broken toward the larger id.
        let (loser, winner) = if spikes_i < spikes_j {
            (i, j)
        } else if spikes_j < spikes_i {
            (j, i)
        } else if unit_ids[i] > unit_ids[j] {
            (i, j)
        } else {
            (j, i)
        };
        alive[loser] = false;
        removed.push(RemovedUnit {
            removed_id: unit_ids[loser],
            kept_id: unit_ids[winner],
            similarity,
        });
    }

    let survivors: Vec<u32> =
        unit_ids.iter().zip(alive.iter()).filter_map(|(&id, &a)| a.then_some(id)).collect();
    if survivors.is_empty() {
        return Err(SpikepostError::DataIntegrity {
            context: "deduplication".to_string(),
            reason: "Deduplicated unit set is empty".to_string(),
        });
    }

    log::info!(
        "Number of original units: {} -- Number of units after de-duplication: {}",
        unit_ids.len(),
        survivors.len()
    );

    Ok((sorting.select_units(&survivors)?, removed))
}
