//! End-to-end CLI tests for the postprocess command.
//!
//! These tests run the actual `spikepost postprocess` binary over
//! synthetic data folders and validate the on-disk outputs: sparse
//! waveforms, derived artifacts, metric tables, and the provenance record.

use std::fs;
use std::path::Path;

use tempfile::TempDir;

use crate::helpers::dataset::{clean_block, duplicated_units_block, spikepost_cmd, write_block};

fn run_postprocess(data: &Path, results: &Path, scratch: &Path) -> std::process::ExitStatus {
    spikepost_cmd()
        .args([
            "postprocess",
            "--data-dir",
            data.to_str().unwrap(),
            "--results-dir",
            results.to_str().unwrap(),
            "--scratch-dir",
            scratch.to_str().unwrap(),
            "--threads",
            "2",
        ])
        .status()
        .expect("Failed to run postprocess command")
}

#[test]
fn test_postprocess_two_blocks_end_to_end() {
    let temp = TempDir::new().unwrap();
    let data = temp.path().join("data");
    let results = temp.path().join("results");
    let scratch = temp.path().join("scratch");

    let (rec_a, sort_a) = duplicated_units_block();
    write_block(&data, "block0", &rec_a, &sort_a);
    let (rec_b, sort_b) = clean_block();
    write_block(&data, "block1", &rec_b, &sort_b);

    let status = run_postprocess(&data, &results, &scratch);
    assert!(status.success(), "postprocess failed");

    for block in ["block0", "block1"] {
        let block_folder = results.join("postprocessed").join(block);
        // Sparse waveforms plus every derived artifact.
        for file in [
            "waveforms.json",
            "templates.bin",
            "spike_amplitudes.json",
            "unit_locations.json",
            "spike_locations.json",
            "correlograms.json",
            "isi_histograms.json",
            "template_similarity.json",
            "template_metrics.tsv",
            "principal_components.json",
            "principal_components.bin",
            "quality_metrics.tsv",
        ] {
            assert!(block_folder.join(file).exists(), "{block}: missing {file}");
        }
        // Self-contained working copy of the deduplicated sorting.
        assert!(results
            .join("postprocessed")
            .join(format!("{block}_sorting"))
            .join("sorting.json")
            .exists());
    }

    // Raw-pass scratch storage was reclaimed.
    assert!(!scratch.join("tmp").join("postprocessed").join("block0").exists());
    assert!(!scratch.join("tmp").join("postprocessed").join("block1").exists());
}

#[test]
fn test_postprocess_removes_duplicate_and_records_provenance() {
    let temp = TempDir::new().unwrap();
    let data = temp.path().join("data");
    let results = temp.path().join("results");
    let scratch = temp.path().join("scratch");

    let (recording, sorting) = duplicated_units_block();
    write_block(&data, "block0", &recording, &sorting);

    let status = run_postprocess(&data, &results, &scratch);
    assert!(status.success());

    // Unit 11 (fewer spikes, same template as 10) was removed.
    let sorting_json = fs::read_to_string(
        results.join("postprocessed").join("block0_sorting").join("sorting.json"),
    )
    .unwrap();
    let saved: serde_json::Value = serde_json::from_str(&sorting_json).unwrap();
    let unit_ids: Vec<u64> = saved["unit_ids"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_u64().unwrap())
        .collect();
    assert_eq!(unit_ids, vec![10, 20]);

    // One provenance record for the run, listing the block and the delta.
    let provenance = fs::read_to_string(
        results.join("data_processes").join("postprocessing.json"),
    )
    .unwrap();
    let record: serde_json::Value = serde_json::from_str(&provenance).unwrap();
    assert_eq!(record["name"], "Ephys postprocessing");
    assert_eq!(record["parameters"]["block_names"][0], "block0");
    assert!(record["notes"]
        .as_str()
        .unwrap()
        .contains("Removed 1 duplicated units."));
    assert!((record["parameters"]["duplicate_threshold"].as_f64().unwrap() - 0.9).abs() < 1e-12);
}

#[test]
fn test_quality_metrics_table_has_unit_rows() {
    let temp = TempDir::new().unwrap();
    let data = temp.path().join("data");
    let results = temp.path().join("results");
    let scratch = temp.path().join("scratch");

    let (recording, sorting) = clean_block();
    write_block(&data, "block0", &recording, &sorting);

    let status = run_postprocess(&data, &results, &scratch);
    assert!(status.success());

    let table = fs::read_to_string(
        results.join("postprocessed").join("block0").join("quality_metrics.tsv"),
    )
    .unwrap();
    let lines: Vec<&str> = table.lines().collect();
    // Header plus one row per surviving unit.
    assert_eq!(lines.len(), 3);
    assert!(lines[0].starts_with("unit_id\t"));
    assert!(lines[0].contains("snr"));
    assert!(lines[0].contains("isolation_distance"));
    assert!(lines[1].starts_with("1\t"));
    assert!(lines[2].starts_with("2\t"));
}

#[test]
fn test_rerun_with_same_inputs_is_idempotent() {
    let temp = TempDir::new().unwrap();
    let data = temp.path().join("data");
    let results = temp.path().join("results");
    let scratch = temp.path().join("scratch");

    let (recording, sorting) = clean_block();
    write_block(&data, "block0", &recording, &sorting);

    assert!(run_postprocess(&data, &results, &scratch).success());
    let folder = results.join("postprocessed").join("block0");
    let manifest = fs::read(folder.join("waveforms.json")).unwrap();
    let templates = fs::read(folder.join("templates.bin")).unwrap();

    // Second run overwrites the sparse representation with identical bytes.
    assert!(run_postprocess(&data, &results, &scratch).success());
    assert_eq!(manifest, fs::read(folder.join("waveforms.json")).unwrap());
    assert_eq!(templates, fs::read(folder.join("templates.bin")).unwrap());
}

#[test]
fn test_custom_params_file_is_honored() {
    let temp = TempDir::new().unwrap();
    let data = temp.path().join("data");
    let results = temp.path().join("results");
    let scratch = temp.path().join("scratch");

    let (recording, sorting) = clean_block();
    write_block(&data, "block0", &recording, &sorting);

    // Restrict the metric battery to spike counts only.
    let params = temp.path().join("params.json");
    fs::write(
        &params,
        r#"{ "quality_metrics": { "metric_names": ["num_spikes", "firing_rate"] } }"#,
    )
    .unwrap();

    let status = spikepost_cmd()
        .args([
            "postprocess",
            "--data-dir",
            data.to_str().unwrap(),
            "--results-dir",
            results.to_str().unwrap(),
            "--scratch-dir",
            scratch.to_str().unwrap(),
            "--params",
            params.to_str().unwrap(),
        ])
        .status()
        .unwrap();
    assert!(status.success());

    // Metrics outside the allowlist stay undefined: the snr column is empty.
    let table = fs::read_to_string(
        results.join("postprocessed").join("block0").join("quality_metrics.tsv"),
    )
    .unwrap();
    let header: Vec<&str> = table.lines().next().unwrap().split('\t').collect();
    let row: Vec<&str> = table.lines().nth(1).unwrap().split('\t').collect();
    let col = |name: &str| header.iter().position(|&h| h == name).unwrap();
    assert!(!row[col("num_spikes")].is_empty());
    assert!(row[col("snr")].is_empty());

    // The provenance record carries the narrowed allowlist.
    let provenance =
        fs::read_to_string(results.join("data_processes").join("postprocessing.json")).unwrap();
    let record: serde_json::Value = serde_json::from_str(&provenance).unwrap();
    let names = record["parameters"]["quality_metrics"]["metric_names"].as_array().unwrap();
    assert_eq!(names.len(), 2);
}
