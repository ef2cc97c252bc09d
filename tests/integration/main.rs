//! Integration tests for spikepost.
//!
//! These tests validate end-to-end workflows that span multiple modules,
//! including runs of the actual `spikepost` binary over synthetic
//! recording/sorting folders.

mod helpers;
mod test_error_paths;
mod test_pipeline_roundtrip;
mod test_postprocess_command;
