//! Random-forest core for BELAY transaction models
//!
//! Holds the fitted-model side of the training pipeline:
//!
//! Modules:
//! - `tree`: flat decision-tree arenas, traversal, impurity-based importances
//! - `forest`: forest envelope, hyperparameters, the [`Ensemble`] trait
//! - `serialization`: canonical JSON and BLAKE3 hashing helpers
//! - `errors`: error type for validation and inference

pub mod errors;
pub mod forest;
pub mod serialization;
pub mod tree;

pub use errors::ForestError;
pub use forest::{
    argmax, ClassWeight, Ensemble, ForestModel, ForestParams, MaxFeatures, ModelKind,
    MODEL_VERSION,
};
pub use serialization::{canonical_json_string, hash_bytes_hex, write_canonical_json};
pub use tree::{Node, Tree};
