//! Error-path tests: preconditions, configuration errors, data mismatches.

use std::fs;

use tempfile::TempDir;

use crate::helpers::dataset::{clean_block, spikepost_cmd, write_block};

#[test]
fn test_missing_preprocessed_folder_exits_with_code_2() {
    let temp = TempDir::new().unwrap();
    let data = temp.path().join("data");
    fs::create_dir_all(data.join("spikesorted")).unwrap();

    let results = temp.path().join("results");
    let output = spikepost_cmd()
        .args([
            "postprocess",
            "--data-dir",
            data.to_str().unwrap(),
            "--results-dir",
            results.to_str().unwrap(),
            "--scratch-dir",
            temp.path().join("scratch").to_str().unwrap(),
        ])
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("'preprocessed' folder not found"));
    // Terminated before any block: no results were produced.
    assert!(!results.join("postprocessed").exists());
}

#[test]
fn test_missing_spikesorted_folder_exits_with_code_3() {
    let temp = TempDir::new().unwrap();
    let data = temp.path().join("data");
    let (recording, sorting) = clean_block();
    write_block(&data, "block0", &recording, &sorting);
    fs::remove_dir_all(data.join("spikesorted")).unwrap();

    let results = temp.path().join("results");
    let output = spikepost_cmd()
        .args([
            "postprocess",
            "--data-dir",
            data.to_str().unwrap(),
            "--results-dir",
            results.to_str().unwrap(),
            "--scratch-dir",
            temp.path().join("scratch").to_str().unwrap(),
        ])
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(3));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("'spikesorted' folder not found"));
    assert!(!results.join("postprocessed").exists());
}

#[test]
fn test_block_without_sorted_output_fails_run() {
    let temp = TempDir::new().unwrap();
    let data = temp.path().join("data");
    let (recording, sorting) = clean_block();
    write_block(&data, "block0", &recording, &sorting);
    // A second preprocessed block with no spikesorted counterpart.
    recording.save(&data.join("preprocessed").join("block1"), false).unwrap();

    let output = spikepost_cmd()
        .args([
            "postprocess",
            "--data-dir",
            data.to_str().unwrap(),
            "--results-dir",
            temp.path().join("results").to_str().unwrap(),
            "--scratch-dir",
            temp.path().join("scratch").to_str().unwrap(),
        ])
        .output()
        .unwrap();

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Could not find spikesorted output for block1"));
}

fn run_with_params(params_json: &str) -> std::process::Output {
    let temp = TempDir::new().unwrap();
    let data = temp.path().join("data");
    let (recording, sorting) = clean_block();
    write_block(&data, "block0", &recording, &sorting);

    let params = temp.path().join("params.json");
    fs::write(&params, params_json).unwrap();

    spikepost_cmd()
        .args([
            "postprocess",
            "--data-dir",
            data.to_str().unwrap(),
            "--results-dir",
            temp.path().join("results").to_str().unwrap(),
            "--scratch-dir",
            temp.path().join("scratch").to_str().unwrap(),
            "--params",
            params.to_str().unwrap(),
        ])
        .output()
        .unwrap()
}

#[test]
fn test_zero_sparsity_radius_is_rejected_before_computation() {
    let output = run_with_params(r#"{ "sparsity": { "radius_um": 0.0 } }"#);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("radius_um"));
}

#[test]
fn test_unknown_parameter_key_is_rejected() {
    let output = run_with_params(r#"{ "correlograms": { "window_ms": 100.0, "bin_ms": 2.0, "mystery": 1 } }"#);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("mystery"));
}

#[test]
fn test_unknown_metric_name_is_rejected() {
    let output =
        run_with_params(r#"{ "quality_metrics": { "metric_names": ["snr", "sparkliness"] } }"#);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("sparkliness"));
}

#[test]
fn test_invalid_duplicate_threshold_is_rejected() {
    let output = run_with_params(r#"{ "duplicate_threshold": 1.0 }"#);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("duplicate_threshold"));
}

#[test]
fn test_out_of_bounds_spike_is_a_data_integrity_error() {
    let temp = TempDir::new().unwrap();
    let data = temp.path().join("data");
    let (recording, sorting) = clean_block();
    write_block(&data, "block0", &recording, &sorting);

    // Corrupt the sorting: a spike index beyond the recording length.
    let sorting_path = data.join("spikesorted").join("block0").join("sorting.json");
    let mut value: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&sorting_path).unwrap()).unwrap();
    value["spike_trains"]["1"]
        .as_array_mut()
        .unwrap()
        .push(serde_json::json!(9_999_999));
    fs::write(&sorting_path, serde_json::to_string(&value).unwrap()).unwrap();

    let output = spikepost_cmd()
        .args([
            "postprocess",
            "--data-dir",
            data.to_str().unwrap(),
            "--results-dir",
            temp.path().join("results").to_str().unwrap(),
            "--scratch-dir",
            temp.path().join("scratch").to_str().unwrap(),
        ])
        .output()
        .unwrap();

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("exceeds recording length"));
}
