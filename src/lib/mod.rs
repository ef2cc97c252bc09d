#![deny(unsafe_code)]
// Clippy lint configuration for CI
// These lints are allowed because:
// - cast_*: Signal-processing code intentionally casts between numeric types
// - missing_*_doc: Documentation improvements tracked separately
// - needless_pass_by_value: Some APIs designed for ownership transfer
// - module_name_repetitions: Artifact types carry their module's name
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::needless_pass_by_value,
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::needless_range_loop,
    clippy::uninlined_format_args
)]

//! # spikepost - spike-sorting postprocessing library
//!
//! Core library for postprocessing spike-sorted extracellular recordings:
//! for each recorded block it removes duplicate units, derives a channel
//! sparsity mask, rebuilds a sparse waveform representation, and computes
//! a battery of per-unit and per-spike features.
//!
//! ## Overview
//!
//! ### Core pipeline
//!
//! - **[`recording`]** / **[`sorting`]** - read-only block inputs from the
//!   upstream preprocessing and sorting capsules
//! - **[`waveforms`]** - per-unit, per-channel snippet aggregates; the
//!   representation everything downstream reads
//! - **[`dedup`]** - redundant-unit removal by template similarity
//! - **[`sparsity`]** - radius-based unit-by-channel masks
//! - **[`features`]** - the ordered derived-artifact battery (amplitudes,
//!   locations, correlograms, ISI, similarity, template metrics, PCA,
//!   quality metrics)
//!
//! ### Utilities
//!
//! - **[`config`]** - statically validated parameter structs, rejected at
//!   parse time on unknown keys
//! - **[`storage`]** - folder-backed JSON + binary persistence
//! - **[`provenance`]** - the per-run provenance record
//! - **[`validation`]** - parameter validation with consistent messages
//! - **[`progress`]** / **[`logging`]** - progress tracking and log formatting
//! - **[`metrics`]** - TSV metric tables
//!
//! ## Example
//!
//! ```no_run
//! use spikepost_lib::config::{JobConfig, WaveformConfig};
//! use spikepost_lib::dedup::remove_redundant_units;
//! use spikepost_lib::recording::Recording;
//! use spikepost_lib::sorting::Sorting;
//! use spikepost_lib::waveforms::WaveformExtractor;
//!
//! # fn main() -> anyhow::Result<()> {
//! let recording = Recording::load("preprocessed/block0".as_ref())?;
//! let sorting = Sorting::load("spikesorted/block0".as_ref())?;
//! let pool = JobConfig::default().build_pool()?;
//!
//! let raw = WaveformExtractor::extract(
//!     &recording,
//!     &sorting,
//!     None,
//!     &WaveformConfig::raw_pass(),
//!     &pool,
//!     None,
//! )?;
//! let (deduplicated, removed) = remove_redundant_units(&raw, &sorting, 0.9)?;
//! println!("removed {} duplicate units", removed.len());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dedup;
pub mod errors;
pub mod features;
pub mod logging;
pub mod metrics;
pub mod progress;
pub mod provenance;
pub mod recording;
pub mod sorting;
pub mod sparsity;
pub mod storage;
pub mod validation;
pub mod waveforms;

// Re-export the types most callers touch.
pub use config::{JobConfig, PostprocessingConfig};
pub use dedup::{BlockSummary, remove_redundant_units};
pub use errors::{InputKind, Result, SpikepostError};
pub use recording::Recording;
pub use sorting::Sorting;
pub use sparsity::ChannelSparsity;
pub use waveforms::WaveformExtractor;
