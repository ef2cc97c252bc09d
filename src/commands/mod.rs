//! CLI command implementations for spikepost.
//!
//! Each submodule implements one command; [`command`] defines the shared
//! [`command::Command`] trait and [`common`] the shared argument structs.
//!
//! # Commands
//!
//! - [`postprocess`] - run the per-block postprocessing pipeline
//!   (deduplication, sparsity, sparse waveforms, derived features)

#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss,
    clippy::missing_errors_doc,
    clippy::uninlined_format_args
)]

pub mod command;
pub mod common;
pub mod postprocess;
