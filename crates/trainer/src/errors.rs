use std::path::{Path, PathBuf};

use belay_forest_core::ForestError;
use thiserror::Error;

/// Errors returned by the training pipeline.
///
/// Every variant is fatal to the run; nothing is written to disk unless the
/// whole pipeline succeeds.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Input missing, unparsable, empty, or unusable
    #[error("dataset error: {0}")]
    Dataset(String),

    #[error("insufficient data: need at least {required} usable transactions, found {available}")]
    InsufficientData { required: usize, available: usize },

    /// Split or configuration cannot be satisfied
    #[error("validation error: {0}")]
    Validation(String),

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("training error: {0}")]
    Training(String),
}

impl PipelineError {
    pub fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Process exit status for this failure
    pub fn exit_code(&self) -> u8 {
        match self {
            PipelineError::Dataset(_) => 2,
            PipelineError::InsufficientData { .. } => 3,
            PipelineError::Validation(_) => 4,
            PipelineError::Io { .. } => 5,
            PipelineError::Training(_) => 6,
        }
    }
}

impl From<ForestError> for PipelineError {
    fn from(err: ForestError) -> Self {
        PipelineError::Training(err.to_string())
    }
}
