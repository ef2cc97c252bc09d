//! Library-level pipeline properties over realistic synthetic blocks.

use tempfile::TempDir;

use spikepost_lib::config::{JobConfig, PostprocessingConfig, WaveformConfig};
use spikepost_lib::dedup::remove_redundant_units;
use spikepost_lib::features::run_feature_pipeline;
use spikepost_lib::sorting::Sorting;
use spikepost_lib::sparsity::ChannelSparsity;
use spikepost_lib::waveforms::WaveformExtractor;

use crate::helpers::dataset::{build_dataset, duplicated_units_block, UnitSpec};

fn pool() -> rayon::ThreadPool {
    JobConfig { n_jobs: 2, ..JobConfig::default() }.build_pool().unwrap()
}

#[test]
fn test_dedup_summary_count_matches_unit_delta() {
    let (recording, sorting) = duplicated_units_block();
    let raw = WaveformExtractor::extract(
        &recording,
        &sorting,
        None,
        &WaveformConfig::raw_pass(),
        &pool(),
        None,
    )
    .unwrap();

    let (deduplicated, removed) = remove_redundant_units(&raw, &sorting, 0.9).unwrap();
    assert_eq!(sorting.num_units() - deduplicated.num_units(), removed.len());
    for unit_id in deduplicated.unit_ids() {
        assert!(sorting.unit_ids().contains(unit_id));
    }
}

#[test]
fn test_sparsity_rows_follow_dedup_order_for_any_permutation() {
    // Unit ids deliberately out of numeric order.
    let (recording, sorting) = build_dataset(
        6,
        20_000,
        10_000.0,
        &[
            UnitSpec { unit_id: 9, peak_channel: 0, amplitude: 12.0, period: 120, phase: 30 },
            UnitSpec { unit_id: 2, peak_channel: 2, amplitude: 14.0, period: 150, phase: 60 },
            UnitSpec { unit_id: 17, peak_channel: 4, amplitude: 11.0, period: 180, phase: 90 },
            UnitSpec { unit_id: 5, peak_channel: 5, amplitude: 13.0, period: 140, phase: 45 },
        ],
    );
    let raw = WaveformExtractor::extract(
        &recording,
        &sorting,
        None,
        &WaveformConfig::raw_pass(),
        &pool(),
        None,
    )
    .unwrap();
    let sparsity = ChannelSparsity::compute(&raw, 30.0).unwrap();

    for order in [vec![5, 9, 2], vec![17, 5, 2, 9], vec![2, 17]] {
        let selected = sparsity.select_units(&order).unwrap();
        assert_eq!(selected.unit_ids(), order.as_slice());
        // Every row keeps at least its peak channel.
        for row in selected.mask() {
            assert!(row.iter().any(|&b| b));
        }
    }
}

#[test]
fn test_sorting_and_waveforms_roundtrip_on_dataset() {
    let temp = TempDir::new().unwrap();
    let (recording, sorting) = duplicated_units_block();

    let sorting_folder = temp.path().join("sorting");
    sorting.save(&sorting_folder, false).unwrap();
    let loaded = Sorting::load(&sorting_folder).unwrap();
    assert_eq!(loaded.unit_ids(), sorting.unit_ids());
    for &id in sorting.unit_ids() {
        assert_eq!(loaded.spike_train(id).unwrap(), sorting.spike_train(id).unwrap());
    }

    let we = WaveformExtractor::extract(
        &recording,
        &sorting,
        None,
        &WaveformConfig::sparse_pass(),
        &pool(),
        None,
    )
    .unwrap();
    let wf_folder = temp.path().join("waveforms");
    we.save(&wf_folder, false).unwrap();
    let loaded = WaveformExtractor::load(&wf_folder).unwrap();
    assert_eq!(loaded.unit_ids(), we.unit_ids());
    for &id in &we.unit_ids() {
        let (a, b) = (we.unit(id).unwrap(), loaded.unit(id).unwrap());
        assert_eq!(a.num_spikes, b.num_spikes);
        for (x, y) in a.mean.iter().zip(b.mean.iter()) {
            assert_eq!(x.to_bits(), y.to_bits());
        }
    }
}

#[test]
fn test_feature_pipeline_produces_aligned_artifacts() {
    let temp = TempDir::new().unwrap();
    let (recording, sorting) = duplicated_units_block();
    let pool = pool();
    let config = PostprocessingConfig::default();

    let raw = WaveformExtractor::extract(
        &recording,
        &sorting,
        None,
        &config.waveforms_deduplicate,
        &pool,
        None,
    )
    .unwrap();
    let (deduplicated, _) =
        remove_redundant_units(&raw, &sorting, config.duplicate_threshold).unwrap();
    let sparsity = ChannelSparsity::compute(&raw, config.sparsity.radius_um)
        .unwrap()
        .select_units(deduplicated.unit_ids())
        .unwrap();
    let sparse = WaveformExtractor::extract(
        &recording,
        &deduplicated,
        Some(&sparsity),
        &config.waveforms,
        &pool,
        None,
    )
    .unwrap();

    let artifacts =
        run_feature_pipeline(&recording, &deduplicated, &sparse, &config, &pool, temp.path())
            .unwrap();

    let unit_ids = deduplicated.unit_ids();
    // Every artifact is keyed by the deduplicated unit set.
    for &id in unit_ids {
        assert!(artifacts.amplitudes.unit(id).is_some());
        assert_eq!(
            artifacts.amplitudes.unit(id).unwrap().len(),
            deduplicated.num_spikes(id).unwrap()
        );
        assert!(artifacts.unit_locations.unit(id).is_some());
        assert!(artifacts.spike_locations.unit(id).is_some());
        assert!(artifacts.principal_components.unit(id).is_some());
    }
    assert_eq!(artifacts.correlograms.unit_ids, unit_ids);
    assert_eq!(artifacts.isi_histograms.unit_ids, unit_ids);
    assert_eq!(artifacts.similarity.unit_ids, unit_ids);
    assert_eq!(artifacts.template_metrics.len(), unit_ids.len());
    assert_eq!(artifacts.quality_metrics.len(), unit_ids.len());

    // Similarity of the surviving duplicate pair's channels stays sane.
    for i in 0..unit_ids.len() {
        assert!((artifacts.similarity.matrix[i][i] - 1.0).abs() < 1e-9);
    }
}

#[test]
fn test_low_spike_unit_has_undefined_cutoff_but_defined_counts() {
    let temp = TempDir::new().unwrap();
    // Unit 3 fires only a handful of times.
    let (recording, sorting) = build_dataset(
        4,
        30_000,
        10_000.0,
        &[
            UnitSpec { unit_id: 1, peak_channel: 0, amplitude: 14.0, period: 100, phase: 40 },
            UnitSpec { unit_id: 3, peak_channel: 3, amplitude: 12.0, period: 6000, phase: 100 },
        ],
    );
    let pool = pool();
    let config = PostprocessingConfig::default();

    let raw = WaveformExtractor::extract(
        &recording,
        &sorting,
        None,
        &config.waveforms_deduplicate,
        &pool,
        None,
    )
    .unwrap();
    let sparsity = ChannelSparsity::compute(&raw, config.sparsity.radius_um)
        .unwrap()
        .select_units(sorting.unit_ids())
        .unwrap();
    let sparse = WaveformExtractor::extract(
        &recording,
        &sorting,
        Some(&sparsity),
        &config.waveforms,
        &pool,
        None,
    )
    .unwrap();

    let artifacts =
        run_feature_pipeline(&recording, &sorting, &sparse, &config, &pool, temp.path()).unwrap();

    let row = artifacts.quality_metrics.iter().find(|r| r.unit_id == 3).unwrap();
    // Always-computable metrics are present.
    assert_eq!(row.num_spikes, Some(5));
    assert!(row.firing_rate.is_some());
    // Below the histogram's minimum spike requirement: explicitly undefined.
    assert!(row.amplitude_cutoff.is_none());
}
