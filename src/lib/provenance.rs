//! Run provenance record.
//!
//! One structured record per run, written after all blocks finish. The
//! record carries the fully resolved parameter set and the explicit list
//! of every processed block name; free-text notes are rendered from the
//! structured per-block dedup summaries only here, at the serialization
//! boundary.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::{JobConfig, PostprocessingConfig};
use crate::dedup::BlockSummary;
use crate::errors::Result;
use crate::storage;

/// Process name recorded in provenance output.
pub const PROCESS_NAME: &str = "Ephys postprocessing";
/// Code reference recorded in provenance output.
pub const CODE_URL: &str = "https://github.com/allenneuraldynamics-forks/spikepost";

/// The resolved parameter set as recorded, including every processed
/// block name rather than a single implicitly-last label.
#[derive(Debug, Clone, Serialize)]
pub struct ProvenanceParameters {
    #[serde(flatten)]
    pub postprocessing: PostprocessingConfig,
    pub job: JobConfig,
    pub block_names: Vec<String>,
}

/// One provenance record per run.
#[derive(Debug, Clone, Serialize)]
pub struct ProvenanceRecord {
    pub name: String,
    pub version: String,
    pub start_date_time: DateTime<Utc>,
    pub end_date_time: DateTime<Utc>,
    pub input_location: String,
    pub output_location: String,
    pub code_url: String,
    pub parameters: ProvenanceParameters,
    pub notes: String,
}

impl ProvenanceRecord {
    /// Assembles the record for a finished run.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        version: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        input_location: &Path,
        output_location: &Path,
        config: PostprocessingConfig,
        job: JobConfig,
        summaries: &[BlockSummary],
    ) -> Self {
        Self {
            name: PROCESS_NAME.to_string(),
            version: version.to_string(),
            start_date_time: start,
            end_date_time: end,
            input_location: input_location.display().to_string(),
            output_location: output_location.display().to_string(),
            code_url: CODE_URL.to_string(),
            parameters: ProvenanceParameters {
                postprocessing: config,
                job,
                block_names: summaries.iter().map(|s| s.block_name.clone()).collect(),
            },
            notes: render_notes(summaries),
        }
    }

    /// Writes the record as pretty-printed JSON.
    ///
    /// # Errors
    /// Returns an error on I/O or serialization failure
    pub fn write(&self, path: &Path) -> Result<()> {
        storage::write_json(path, self)
    }
}

/// Renders the per-block dedup summaries into the free-text notes field.
#[must_use]
pub fn render_notes(summaries: &[BlockSummary]) -> String {
    summaries.iter().map(BlockSummary::render_note).collect()
}
