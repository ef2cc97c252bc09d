//! Common CLI options shared across commands.
//!
//! Shared argument structures composed into command structs with
//! `#[command(flatten)]`.

use std::path::PathBuf;

use clap::Args;

use spikepost_lib::config::JobConfig;

/// Data, results and scratch folder options.
///
/// Defaults follow the capsule layout: the command runs from a working
/// directory with sibling `data`, `results` and `scratch` folders.
#[derive(Debug, Clone, Args)]
pub struct DataOptions {
    /// Input data folder (holds `preprocessed/` and `spikesorted/`)
    #[arg(short = 'd', long = "data-dir", default_value = "../data")]
    pub data_dir: PathBuf,

    /// Results folder for persisted artifacts and provenance
    #[arg(short = 'o', long = "results-dir", default_value = "../results")]
    pub results_dir: PathBuf,

    /// Scratch folder for the raw waveform pass (reclaimed per block)
    #[arg(long = "scratch-dir", default_value = "../scratch")]
    pub scratch_dir: PathBuf,
}

/// Worker pool options for per-unit numeric work.
///
/// The resolved pool is built once per run and threaded explicitly into
/// every computation; it is never installed as process-global state.
#[derive(Debug, Clone, Args)]
pub struct ThreadingOptions {
    /// Number of worker threads (default: all available cores)
    #[arg(long = "threads")]
    pub threads: Option<usize>,

    /// Duration of a processing chunk in seconds for trace-scanning work
    #[arg(long = "chunk-duration", default_value_t = 1.0)]
    pub chunk_duration: f64,

    /// Disable interval progress logging
    #[arg(long = "no-progress", default_value_t = false)]
    pub no_progress: bool,
}

impl Default for ThreadingOptions {
    fn default() -> Self {
        Self { threads: None, chunk_duration: 1.0, no_progress: false }
    }
}

impl ThreadingOptions {
    /// Resolves the CLI options into the run-wide job configuration.
    #[must_use]
    pub fn to_job_config(&self) -> JobConfig {
        JobConfig {
            n_jobs: self.threads.map_or(-1, |t| t as i64),
            chunk_duration_s: self.chunk_duration,
            progress_bar: !self.no_progress,
        }
    }
}
