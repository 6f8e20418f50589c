//! BELAY trainer - deterministic offline training of transaction models
//!
//! Fits random-forest models over collected transaction records and writes
//! a replayable artifact plus a JSON metadata sidecar. Three pipelines are
//! preset (see [`PipelineKind`]); all share the same five stages.

pub mod cart;
pub mod config;
pub mod dataset;
pub mod deterministic;
pub mod errors;
pub mod evaluate;
pub mod features;
pub mod learner;
pub mod persist;
pub mod pipeline;
pub mod record;
pub mod report;
pub mod split;

pub use config::{PipelineConfig, PipelineKind, Settings};
pub use dataset::{load_records, Composition, Dataset};
pub use deterministic::LcgRng;
pub use errors::PipelineError;
pub use evaluate::{evaluate, EvaluationReport, Metrics};
pub use features::{FeatureBuilder, FeatureColumn, FeatureSchema, Filter, TargetColumn};
pub use learner::{Learner, RandomForestLearner};
pub use persist::{ModelArtifact, ModelMetadata, Persister, Prediction};
pub use pipeline::{run, run_with, TrainingOutcome};
pub use record::{ProgramKey, TransactionRecord};
pub use split::{Split, SplitStrategy};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
