//! End-to-end training run
//!
//! load → build features → split → fit → evaluate → persist, once, in that
//! order. Any failure aborts the run before anything reaches disk.

use std::collections::BTreeMap;
use std::path::PathBuf;

use tracing::{debug, info};

use crate::config::PipelineConfig;
use crate::dataset::{load_records, Composition};
use crate::errors::PipelineError;
use crate::evaluate::{evaluate, EvaluationReport};
use crate::features::{ColumnStats, FeatureBuilder};
use crate::learner::{Learner, RandomForestLearner};
use crate::persist::{ModelArtifact, ModelMetadata, Persister, RunSummary};

/// What a successful run produced
#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub report: EvaluationReport,
    /// Metadata as written, including `model_hash`
    pub metadata: ModelMetadata,
    pub composition: Composition,
    pub stats: Vec<ColumnStats>,
    pub model_path: PathBuf,
    pub metadata_path: PathBuf,
}

/// Run `config` with the default random-forest learner
pub fn run(config: &PipelineConfig) -> Result<TrainingOutcome, PipelineError> {
    run_with(config, &RandomForestLearner)
}

pub fn run_with<L: Learner>(
    config: &PipelineConfig,
    learner: &L,
) -> Result<TrainingOutcome, PipelineError> {
    config.validate()?;
    info!(
        "Training {} pipeline: target {}, {} features",
        config.kind,
        config.target.name(),
        config.columns.len()
    );

    info!("Loading transactions from {}", config.input.display());
    let records = load_records(&config.input)?;
    let composition = Composition::of(&records);
    info!(
        "Loaded {} transactions: {} succeeded ({:.1}%), {} failed ({:.1}%)",
        composition.total,
        composition.succeeded,
        composition.success_percent(),
        composition.failed,
        composition.failure_percent()
    );

    let builder = FeatureBuilder {
        columns: config.columns.clone(),
        target: config.target,
        filters: config.filters.clone(),
        program_key: config.program_key,
        min_samples: config.min_samples,
    };
    let features = builder.build(&records)?;
    for stat in &features.stats {
        debug!(
            "{}: min {} max {} median {} ({} imputed)",
            stat.column, stat.min, stat.max, stat.median, stat.imputed
        );
    }

    let split = config.split_strategy().split(&features.dataset.targets)?;
    let train = features.dataset.subset(&split.train);
    let test = features.dataset.subset(&split.test);
    info!(
        "Split {} samples: {} train, {} test{}",
        features.dataset.len(),
        train.len(),
        test.len(),
        if config.stratify { " (stratified)" } else { "" }
    );

    let model = learner.fit(
        config.target.kind(),
        &train.features,
        &train.targets,
        &config.forest,
    )?;

    let report = evaluate(&model, &features.schema.names(), &test)?;

    let imputed_values: BTreeMap<String, f64> = features
        .stats
        .iter()
        .filter(|stat| stat.imputed > 0)
        .map(|stat| (stat.column.name().to_string(), stat.median))
        .collect();

    let artifact = ModelArtifact {
        schema: features.schema,
        model,
    };
    let metadata = ModelMetadata::describe(
        &artifact,
        &config.forest,
        &report,
        RunSummary {
            pipeline: config.kind.name(),
            train_samples: train.len(),
            test_samples: test.len(),
            trained_on_transactions: features.usable_records,
            total_dataset: composition.total,
            imputed_values,
        },
    );

    let persister = Persister::new(&config.model_path, &config.metadata_path);
    let metadata = persister.persist(&artifact, metadata)?;
    info!("Model hash {}", metadata.model_hash);

    Ok(TrainingOutcome {
        report,
        metadata,
        composition,
        stats: features.stats,
        model_path: persister.model_path,
        metadata_path: persister.metadata_path,
    })
}
