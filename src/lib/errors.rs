//! Custom error types for postprocessing operations.

use std::path::Path;

use thiserror::Error;

/// Result type alias for postprocessing operations
pub type Result<T> = std::result::Result<T, SpikepostError>;

/// The kind of pipeline input that was expected on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    /// The preprocessed recording folder produced by the preprocessing capsule.
    Preprocessed,
    /// The spike-sorted output folder produced by the sorting capsule.
    Spikesorted,
}

impl InputKind {
    /// Process exit code used when this input is missing.
    ///
    /// Missing inputs are precondition failures: the run terminates before
    /// any block is processed, with a distinct code per input kind.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            InputKind::Preprocessed => 2,
            InputKind::Spikesorted => 3,
        }
    }

    /// Folder name conventionally used for this input.
    #[must_use]
    pub fn folder_name(&self) -> &'static str {
        match self {
            InputKind::Preprocessed => "preprocessed",
            InputKind::Spikesorted => "spikesorted",
        }
    }
}

impl std::fmt::Display for InputKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.folder_name())
    }
}

/// Error type for postprocessing operations
#[derive(Error, Debug)]
pub enum SpikepostError {
    /// Invalid parameter value provided
    #[error("Invalid parameter '{parameter}': {reason}")]
    InvalidParameter {
        /// The parameter name
        parameter: String,
        /// Explanation of why it's invalid
        reason: String,
    },

    /// A required input folder was not found
    #[error("'{kind}' folder not found: {path}")]
    MissingInput {
        /// Which pipeline input is missing
        kind: InputKind,
        /// The path that was checked
        path: String,
    },

    /// The recording and sorting for a block disagree
    #[error("Data integrity error in {context}: {reason}")]
    DataIntegrity {
        /// Block or step where the mismatch was detected
        context: String,
        /// Explanation of the mismatch
        reason: String,
    },

    /// A unit id was requested that the sorting does not contain
    #[error("Unit {unit_id} not found in sorting")]
    UnitNotFound {
        /// The missing unit id
        unit_id: u32,
    },

    /// Too few spikes to compute a statistic that requires a minimum count
    #[error("Unit {unit_id}: {what} requires at least {required} spikes, got {actual}")]
    InsufficientSpikes {
        /// The unit id
        unit_id: u32,
        /// The statistic being computed
        what: String,
        /// Minimum required spike count
        required: usize,
        /// Actual spike count
        actual: usize,
    },

    /// Filesystem error with path context
    #[error("I/O error on '{path}': {source}")]
    Io {
        /// The path involved
        path: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// JSON (de)serialization error with path context
    #[error("Invalid JSON in '{path}': {source}")]
    Json {
        /// The file involved
        path: String,
        /// Underlying error
        #[source]
        source: serde_json::Error,
    },
}

impl SpikepostError {
    /// Wraps an I/O error with the path it occurred on.
    pub fn io(path: &Path, source: std::io::Error) -> Self {
        SpikepostError::Io { path: path.display().to_string(), source }
    }

    /// Wraps a JSON error with the file it occurred on.
    pub fn json(path: &Path, source: serde_json::Error) -> Self {
        SpikepostError::Json { path: path.display().to_string(), source }
    }
}
