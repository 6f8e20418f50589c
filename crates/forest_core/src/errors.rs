//! Error types for the forest core

use thiserror::Error;

/// Errors raised while validating or evaluating a forest model
#[derive(Error, Debug)]
pub enum ForestError {
    /// Input row does not match the width the model was trained on
    #[error("Feature count mismatch: model expects {expected}, got {actual}")]
    FeatureCount { expected: usize, actual: usize },

    /// Structural problem in a tree or in the model envelope
    #[error("Invalid model: {0}")]
    InvalidModel(String),

    /// Operation not defined for this model kind
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for forest operations
pub type Result<T> = std::result::Result<T, ForestError>;
