//! Block postprocessing command.
//!
//! Iterates over the recorded blocks of a session, and for each one:
//! deduplicates the sorted units against the raw waveform pass, derives
//! the channel sparsity mask, rebuilds the sparse waveform representation,
//! and runs the derived-feature battery. Blocks run strictly sequentially;
//! the only cross-block state is the per-block summary list and run
//! timing. One provenance record is written after all blocks finish.
//!
//! # Input layout
//!
//! ```text
//! data/
//!   preprocessed/<block>/      recording.json + traces.bin
//!   spikesorted/<block>/       sorting.json
//! ```
//!
//! A `preprocessing_output_test` folder switches the run into test mode,
//! reading the `*_output_test` variants instead. A missing `preprocessed`
//! folder terminates the process with exit code 2, a missing `spikesorted`
//! folder with exit code 3, before any block is touched.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::Parser;
use log::{debug, error, info};

use spikepost_lib::config::PostprocessingConfig;
use spikepost_lib::dedup::{BlockSummary, remove_redundant_units};
use spikepost_lib::errors::InputKind;
use spikepost_lib::features::run_feature_pipeline;
use spikepost_lib::logging::format_percent;
use spikepost_lib::progress::ProgressTracker;
use spikepost_lib::provenance::ProvenanceRecord;
use spikepost_lib::recording::Recording;
use spikepost_lib::sorting::Sorting;
use spikepost_lib::sparsity::ChannelSparsity;
use spikepost_lib::storage;
use spikepost_lib::waveforms::WaveformExtractor;

use crate::commands::command::Command;
use crate::commands::common::{DataOptions, ThreadingOptions};
use crate::version;

/// Per-block pipeline stage, carried in logs and error context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockStage {
    Located,
    RawWaveformsBuilt,
    Deduplicated,
    SparsityComputed,
    SparseWaveformsBuilt,
    FeaturesComputed,
    Done,
}

/// Postprocess spike-sorted blocks: dedup, sparsity, waveforms, features.
#[derive(Parser, Debug)]
pub struct Postprocess {
    #[command(flatten)]
    pub io: DataOptions,

    #[command(flatten)]
    pub threading: ThreadingOptions,

    /// Optional JSON parameter file (unknown keys are rejected)
    #[arg(short = 'p', long = "params")]
    pub params: Option<PathBuf>,
}

/// Resolved input folders for a run, after the test-mode switch.
struct InputFolders {
    preprocessed: PathBuf,
    spikesorted: PathBuf,
}

impl Postprocess {
    /// Applies the test-mode switch and checks both input preconditions.
    ///
    /// Missing inputs terminate the process with the input's distinct exit
    /// code - a precondition failure, before any block is processed.
    fn locate_inputs(&self) -> InputFolders {
        let data = &self.io.data_dir;
        let folders = if data.join("preprocessing_output_test").is_dir() {
            info!("*** TEST MODE ***");
            InputFolders {
                preprocessed: data.join("preprocessing_output_test").join("preprocessed"),
                spikesorted: data.join("spikesorting_output_test").join("spikesorted"),
            }
        } else {
            InputFolders {
                preprocessed: data.join(InputKind::Preprocessed.folder_name()),
                spikesorted: data.join(InputKind::Spikesorted.folder_name()),
            }
        };

        for (kind, path) in [
            (InputKind::Preprocessed, &folders.preprocessed),
            (InputKind::Spikesorted, &folders.spikesorted),
        ] {
            if !path.is_dir() {
                error!("'{kind}' folder not found: {}. Exiting", path.display());
                std::process::exit(kind.exit_code());
            }
        }
        folders
    }

    /// Blocks are the sub-folders of the preprocessed input, by name.
    fn list_blocks(preprocessed: &Path) -> Result<Vec<String>> {
        let mut blocks = Vec::new();
        let entries = std::fs::read_dir(preprocessed)
            .with_context(|| format!("Failed to list {}", preprocessed.display()))?;
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                blocks.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        blocks.sort();
        Ok(blocks)
    }
}

impl Command for Postprocess {
    fn execute(&self, command_line: &str) -> Result<()> {
        debug!("Invocation: {command_line}");
        info!("POSTPROCESSING");
        let start_date_time = Utc::now();
        let run_timer = Instant::now();

        let folders = self.locate_inputs();

        let config = match &self.params {
            Some(path) => PostprocessingConfig::load(path)
                .with_context(|| format!("Failed to load parameters from {}", path.display()))?,
            None => PostprocessingConfig::default(),
        };
        config.validate()?;
        let job = self.threading.to_job_config();
        let pool = job.build_pool()?;
        info!("Using {} worker threads", job.resolve_threads());

        let blocks = Postprocess::list_blocks(&folders.preprocessed)?;
        if blocks.is_empty() {
            bail!("No recording blocks found in {}", folders.preprocessed.display());
        }

        let mut summaries: Vec<BlockSummary> = Vec::with_capacity(blocks.len());
        for block_name in &blocks {
            let summary = run_block(
                block_name,
                &folders,
                &self.io.results_dir,
                &self.io.scratch_dir,
                &config,
                &job,
                &pool,
            )
            .with_context(|| format!("Postprocessing failed for block '{block_name}'"))?;
            info!(
                "{}: {} units -> {} units ({} removed, {})",
                block_name,
                summary.units_before,
                summary.units_after,
                summary.removed_count(),
                format_percent(summary.removed_count() as f64 / summary.units_before.max(1) as f64, 1)
            );
            summaries.push(summary);
        }

        let record = ProvenanceRecord::new(
            version::VERSION,
            start_date_time,
            Utc::now(),
            &self.io.data_dir,
            &self.io.results_dir,
            config,
            job,
            &summaries,
        );
        let process_folder = self.io.results_dir.join("data_processes");
        std::fs::create_dir_all(&process_folder)
            .with_context(|| format!("Failed to create {}", process_folder.display()))?;
        record.write(&process_folder.join("postprocessing.json"))?;

        info!("POSTPROCESSING time: {:.2}s", run_timer.elapsed().as_secs_f64());
        Ok(())
    }
}

fn advance(stage: &mut BlockStage, next: BlockStage, block_name: &str) {
    debug!("{block_name}: stage {:?} -> {next:?}", *stage);
    *stage = next;
}

/// Runs the whole per-block pipeline and returns its dedup summary.
#[allow(clippy::too_many_arguments)]
fn run_block(
    block_name: &str,
    folders: &InputFolders,
    results_dir: &Path,
    scratch_dir: &Path,
    config: &PostprocessingConfig,
    job: &spikepost_lib::config::JobConfig,
    pool: &rayon::ThreadPool,
) -> Result<BlockSummary> {
    let mut stage = BlockStage::Located;
    debug!("{block_name}: stage {stage:?}");

    let recording_folder = folders.preprocessed.join(block_name);
    let sorted_folder = folders.spikesorted.join(block_name);
    if !sorted_folder.is_dir() {
        bail!("Could not find spikesorted output for {block_name}");
    }
    let recording = Recording::load(&recording_folder)?;
    let sorting = Sorting::load(&sorted_folder)?;
    sorting.validate_against(&recording, block_name)?;
    info!(
        "{block_name}: {} channels, {:.1}s, {} units",
        recording.num_channels(),
        recording.duration_s(),
        sorting.num_units()
    );

    // Raw pass: small unscaled waveforms, only for dedup/sparsity decisions.
    let progress = job
        .progress_bar
        .then(|| ProgressTracker::new(format!("{block_name}: raw waveforms, units")).with_interval(50));
    let raw_folder = scratch_dir.join("tmp").join("postprocessed").join(block_name);
    let raw_waveforms = WaveformExtractor::extract(
        &recording,
        &sorting,
        None,
        &config.waveforms_deduplicate,
        pool,
        progress.as_ref(),
    )?;
    raw_waveforms.save(&raw_folder, true)?;
    advance(&mut stage, BlockStage::RawWaveformsBuilt, block_name);

    let (sorting_deduplicated, removed) =
        remove_redundant_units(&raw_waveforms, &sorting, config.duplicate_threshold)?;
    advance(&mut stage, BlockStage::Deduplicated, block_name);

    // Sparsity is computed against the full unit set, then re-indexed to
    // the deduplicated set in its order.
    let sparsity_full = ChannelSparsity::compute(&raw_waveforms, config.sparsity.radius_um)?;
    let sparsity = sparsity_full.select_units(sorting_deduplicated.unit_ids())?;
    advance(&mut stage, BlockStage::SparsityComputed, block_name);

    // The raw pass's scratch storage must be reclaimed before the sparse
    // rebuild to bound peak disk usage.
    storage::reclaim_dir(&raw_folder)?;
    drop(raw_waveforms);

    // Persist a working copy of the deduplicated sorting so the block's
    // output folder is self-contained.
    let sorting_copy_folder = results_dir.join("postprocessed").join(format!("{block_name}_sorting"));
    sorting_deduplicated.save(&sorting_copy_folder, true)?;

    info!("{block_name}: saving sparse de-duplicated waveform extractor folder");
    let progress = job
        .progress_bar
        .then(|| ProgressTracker::new(format!("{block_name}: sparse waveforms, units")).with_interval(50));
    let sparse_folder = results_dir.join("postprocessed").join(block_name);
    let sparse_waveforms = WaveformExtractor::extract(
        &recording,
        &sorting_deduplicated,
        Some(&sparsity),
        &config.waveforms,
        pool,
        progress.as_ref(),
    )?;
    sparse_waveforms.save(&sparse_folder, true)?;
    advance(&mut stage, BlockStage::SparseWaveformsBuilt, block_name);

    run_feature_pipeline(
        &recording,
        &sorting_deduplicated,
        &sparse_waveforms,
        config,
        pool,
        &sparse_folder,
    )?;
    advance(&mut stage, BlockStage::FeaturesComputed, block_name);

    let summary = BlockSummary {
        block_name: block_name.to_string(),
        units_before: sorting.num_units(),
        units_after: sorting_deduplicated.num_units(),
        removed,
    };
    advance(&mut stage, BlockStage::Done, block_name);
    debug!("{block_name}: {stage:?}");
    Ok(summary)
}
