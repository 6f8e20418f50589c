//! JSON dataset loading and sample containers
//!
//! Reads the collector's JSON array of transaction records and holds the
//! numeric (features, target) pairs the learner consumes.

use std::path::Path;

use crate::errors::PipelineError;
use crate::record::TransactionRecord;

/// Load a JSON array of transaction records
pub fn load_records<P: AsRef<Path>>(path: P) -> Result<Vec<TransactionRecord>, PipelineError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|err| {
        PipelineError::Dataset(format!("failed to read {}: {}", path.display(), err))
    })?;

    let records: Vec<TransactionRecord> = serde_json::from_str(&content).map_err(|err| {
        PipelineError::Dataset(format!("failed to parse {}: {}", path.display(), err))
    })?;

    if records.is_empty() {
        return Err(PipelineError::Dataset(format!(
            "{} contains no transactions",
            path.display()
        )));
    }

    Ok(records)
}

/// Success/failure breakdown of a record set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Composition {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl Composition {
    pub fn of(records: &[TransactionRecord]) -> Self {
        let succeeded = records.iter().filter(|r| r.success).count();
        Self {
            total: records.len(),
            succeeded,
            failed: records.len() - succeeded,
        }
    }

    pub fn success_percent(&self) -> f64 {
        percent(self.succeeded, self.total)
    }

    pub fn failure_percent(&self) -> f64 {
        percent(self.failed, self.total)
    }
}

fn percent(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}

/// Training samples: feature rows aligned with targets
#[derive(Clone, Debug, PartialEq)]
pub struct Dataset {
    pub features: Vec<Vec<f64>>,
    pub targets: Vec<f64>,
}

impl Dataset {
    pub fn new(features: Vec<Vec<f64>>, targets: Vec<f64>) -> Self {
        debug_assert_eq!(features.len(), targets.len());
        Self { features, targets }
    }

    /// Get number of samples
    pub fn len(&self) -> usize {
        self.features.len()
    }

    /// Check if dataset is empty
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Rows at `indices`, in the given order
    pub fn subset(&self, indices: &[usize]) -> Dataset {
        Dataset {
            features: indices.iter().map(|&i| self.features[i].clone()).collect(),
            targets: indices.iter().map(|&i| self.targets[i]).collect(),
        }
    }
}
