//! Model artifacts and metadata sidecars
//!
//! Both payloads are serialized in memory first, staged as temporary files
//! next to their destinations and renamed into place, so a failed run never
//! leaves a half-written artifact behind.

use belay_forest_core::{
    canonical_json_string, hash_bytes_hex, Ensemble, ForestModel, ForestParams,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{error, info};

use crate::errors::PipelineError;
use crate::evaluate::{EvaluationReport, Metrics};
use crate::features::FeatureSchema;
use crate::record::TransactionRecord;

/// Fitted model bundled with the schema it must be fed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact<M = ForestModel> {
    pub schema: FeatureSchema,
    pub model: M,
}

/// One inference result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub value: f64,
    /// Probability of the predicted class (classifiers only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

impl<M> ModelArtifact<M>
where
    M: Ensemble + Serialize + DeserializeOwned,
{
    pub fn to_bytes(&self) -> Result<Vec<u8>, PipelineError> {
        bincode::serialize(self)
            .map_err(|err| PipelineError::Training(format!("failed to encode model: {}", err)))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PipelineError> {
        let artifact: Self = bincode::deserialize(bytes)
            .map_err(|err| PipelineError::Dataset(format!("failed to decode model: {}", err)))?;
        artifact
            .model
            .validate()
            .map_err(|err| PipelineError::Dataset(format!("corrupt model artifact: {}", err)))?;
        if artifact.schema.fill_values.len() != artifact.schema.columns.len() {
            return Err(PipelineError::Dataset(format!(
                "schema has {} fill values for {} columns",
                artifact.schema.fill_values.len(),
                artifact.schema.columns.len()
            )));
        }
        if artifact.schema.columns.len() != artifact.model.n_features() {
            return Err(PipelineError::Dataset(format!(
                "model expects {} features but its schema lists {}",
                artifact.model.n_features(),
                artifact.schema.columns.len()
            )));
        }
        Ok(artifact)
    }

    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let bytes = fs::read(path).map_err(|err| PipelineError::io(path, err))?;
        Self::from_bytes(&bytes)
    }

    /// Replay the training schema on `records` and predict each one
    pub fn predict_records(
        &self,
        records: &[TransactionRecord],
    ) -> Result<Vec<Prediction>, PipelineError> {
        let rows: Vec<Vec<f64>> = records.iter().map(|r| self.schema.vector(r)).collect();
        let values = self.model.predict(&rows)?;

        let confidences: Vec<Option<f64>> = if self.model.classes().is_empty() {
            vec![None; rows.len()]
        } else {
            self.model
                .predict_proba(&rows)?
                .into_iter()
                .map(|proba| proba.into_iter().reduce(f64::max))
                .collect()
        };

        Ok(values
            .into_iter()
            .zip(confidences)
            .map(|(value, confidence)| Prediction { value, confidence })
            .collect())
    }
}

/// Metric block of the metadata document, flattened into the top level
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricFields {
    Regression {
        mae: f64,
        rmse: f64,
        r2_score: f64,
        accuracy_percent: f64,
    },
    Classification {
        accuracy: f64,
        precision: f64,
        recall: f64,
        f1_score: f64,
        accuracy_percent: f64,
        confusion_matrix: [[u64; 2]; 2],
    },
}

impl From<&Metrics> for MetricFields {
    fn from(metrics: &Metrics) -> Self {
        match metrics {
            Metrics::Regression(m) => MetricFields::Regression {
                mae: m.mae,
                rmse: m.rmse,
                r2_score: m.r2,
                accuracy_percent: m.accuracy_percent,
            },
            Metrics::Classification(m) => MetricFields::Classification {
                accuracy: m.accuracy,
                precision: m.precision,
                recall: m.recall,
                f1_score: m.f1,
                accuracy_percent: m.accuracy_percent,
                confusion_matrix: m.confusion.rows(),
            },
        }
    }
}

/// JSON sidecar describing a trained model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub model_type: String,
    pub pipeline: String,
    pub target_column: String,
    pub n_estimators: usize,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub random_state: u64,
    pub class_weight: Option<String>,
    pub feature_columns: Vec<String>,
    pub train_samples: usize,
    pub test_samples: usize,
    #[serde(flatten)]
    pub metrics: MetricFields,
    pub feature_importances: BTreeMap<String, f64>,
    /// Median fill value per column that had absent values
    pub imputed_values: BTreeMap<String, f64>,
    pub trained_on_transactions: usize,
    pub total_dataset: usize,
    /// BLAKE3 of the model artifact bytes
    pub model_hash: String,
    pub trained_at: String,
}

/// Inputs to [`ModelMetadata::describe`] that are not on the model itself
#[derive(Debug, Clone)]
pub struct RunSummary<'a> {
    pub pipeline: &'a str,
    pub train_samples: usize,
    pub test_samples: usize,
    pub trained_on_transactions: usize,
    pub total_dataset: usize,
    pub imputed_values: BTreeMap<String, f64>,
}

impl ModelMetadata {
    /// Metadata for `artifact` fitted with `params`; `model_hash` is filled
    /// in by the persister
    pub fn describe<M: Ensemble>(
        artifact: &ModelArtifact<M>,
        params: &ForestParams,
        report: &EvaluationReport,
        summary: RunSummary<'_>,
    ) -> Self {
        Self {
            model_type: artifact.model.kind().model_type().to_string(),
            pipeline: summary.pipeline.to_string(),
            target_column: artifact.schema.target.name().to_string(),
            n_estimators: params.n_estimators,
            max_depth: params.max_depth,
            min_samples_split: params.min_samples_split,
            min_samples_leaf: params.min_samples_leaf,
            random_state: params.seed,
            class_weight: params.class_weight.map(|w| w.name().to_string()),
            feature_columns: artifact.schema.names(),
            train_samples: summary.train_samples,
            test_samples: summary.test_samples,
            metrics: MetricFields::from(&report.metrics),
            feature_importances: report
                .importances
                .iter()
                .map(|r| (r.feature.clone(), r.importance))
                .collect(),
            imputed_values: summary.imputed_values,
            trained_on_transactions: summary.trained_on_transactions,
            total_dataset: summary.total_dataset,
            model_hash: String::new(),
            trained_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Writes an artifact and its metadata atomically
#[derive(Debug, Clone)]
pub struct Persister {
    pub model_path: PathBuf,
    pub metadata_path: PathBuf,
}

impl Persister {
    pub fn new(model_path: impl Into<PathBuf>, metadata_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
            metadata_path: metadata_path.into(),
        }
    }

    /// Write both files; returns the metadata as written (with `model_hash`)
    pub fn persist<M>(
        &self,
        artifact: &ModelArtifact<M>,
        mut metadata: ModelMetadata,
    ) -> Result<ModelMetadata, PipelineError>
    where
        M: Ensemble + Serialize + DeserializeOwned,
    {
        let model_bytes = artifact.to_bytes()?;
        metadata.model_hash = hash_bytes_hex(&model_bytes);
        let metadata_json = canonical_json_string(&metadata).map_err(|err| {
            PipelineError::Training(format!("failed to encode metadata: {}", err))
        })?;

        let staged_model = stage(&self.model_path, &model_bytes)?;
        let staged_metadata = stage(&self.metadata_path, metadata_json.as_bytes())?;
        let backup = self.backup_model()?;

        info!("Saving model to {}", self.model_path.display());
        staged_model
            .persist(&self.model_path)
            .map_err(|err| PipelineError::io(&self.model_path, err.error))?;

        info!("Saving metadata to {}", self.metadata_path.display());
        if let Err(err) = staged_metadata.persist(&self.metadata_path) {
            self.roll_back_model(backup)?;
            return Err(PipelineError::io(&self.metadata_path, err.error));
        }

        // the backup is deleted on drop once both files are in place
        drop(backup);
        Ok(metadata)
    }

    /// Copy the model currently at `model_path`, if any, next to it
    fn backup_model(&self) -> Result<Option<NamedTempFile>, PipelineError> {
        if !self.model_path.is_file() {
            return Ok(None);
        }
        let backup = NamedTempFile::new_in(staging_dir(&self.model_path))
            .map_err(|err| PipelineError::io(&self.model_path, err))?;
        fs::copy(&self.model_path, backup.path())
            .map_err(|err| PipelineError::io(&self.model_path, err))?;
        Ok(Some(backup))
    }

    /// Put the previous model back, or remove the new one if there was none
    fn roll_back_model(&self, backup: Option<NamedTempFile>) -> Result<(), PipelineError> {
        let restored = match backup {
            Some(backup) => backup.persist(&self.model_path).map(|_| ()).map_err(|err| err.error),
            None => fs::remove_file(&self.model_path),
        };
        restored.map_err(|err| {
            error!(
                "Failed to roll back {} after metadata write failed: {}",
                self.model_path.display(),
                err
            );
            PipelineError::io(&self.model_path, err)
        })
    }
}

fn staging_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

/// Write `bytes` to a temporary file in `path`'s directory
fn stage(path: &Path, bytes: &[u8]) -> Result<NamedTempFile, PipelineError> {
    let dir = staging_dir(path);
    fs::create_dir_all(dir).map_err(|err| PipelineError::io(dir, err))?;

    let mut file = NamedTempFile::new_in(dir).map_err(|err| PipelineError::io(dir, err))?;
    file.write_all(bytes)
        .and_then(|_| file.as_file().sync_all())
        .map_err(|err| PipelineError::io(path, err))?;
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{FeatureColumn, TargetColumn};
    use crate::record::ProgramKey;
    use belay_forest_core::{ModelKind, Node, Tree};

    fn artifact() -> ModelArtifact {
        let mut root = Node::internal(0, 0, 5.0, 1.0, 4.0);
        root.left = 1;
        root.right = 2;
        let model = ForestModel::new(
            ModelKind::Regressor,
            2,
            vec![],
            ForestParams::regressor(),
            vec![Tree::new(vec![
                root,
                Node::leaf(1, vec![100.0], 0.0, 2.0),
                Node::leaf(2, vec![200.0], 0.0, 2.0),
            ])],
        )
        .unwrap();

        ModelArtifact {
            schema: FeatureSchema {
                columns: vec![FeatureColumn::InstructionCount, FeatureColumn::ProgramJupiter],
                target: TargetColumn::ComputeUnitsUsed,
                program_key: ProgramKey::Program,
                fill_values: vec![7.0, 0.0],
            },
            model,
        }
    }

    fn metadata() -> ModelMetadata {
        ModelMetadata {
            model_type: "RandomForestRegressor".to_string(),
            pipeline: "compute-units".to_string(),
            target_column: "computeUnitsUsed".to_string(),
            n_estimators: 1,
            max_depth: Some(15),
            min_samples_split: 5,
            min_samples_leaf: 2,
            random_state: 42,
            class_weight: None,
            feature_columns: vec!["instructionCount".to_string(), "program_jupiter".to_string()],
            train_samples: 8,
            test_samples: 2,
            metrics: MetricFields::Regression {
                mae: 1.0,
                rmse: 2.0,
                r2_score: 0.5,
                accuracy_percent: 50.0,
            },
            feature_importances: BTreeMap::new(),
            imputed_values: BTreeMap::new(),
            trained_on_transactions: 10,
            total_dataset: 12,
            model_hash: String::new(),
            trained_at: "2025-10-25T01:01:37Z".to_string(),
        }
    }

    #[test]
    fn test_artifact_bytes_round_trip() {
        let artifact = artifact();
        let decoded = ModelArtifact::<ForestModel>::from_bytes(&artifact.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, artifact);
    }

    #[test]
    fn test_predict_replays_schema() {
        let artifact = artifact();
        let records = vec![
            TransactionRecord {
                instruction_count: Some(3.0),
                ..Default::default()
            },
            // absent value falls back to the stored median (7.0)
            TransactionRecord::default(),
        ];
        let predictions = artifact.predict_records(&records).unwrap();
        assert_eq!(predictions[0].value, 100.0);
        assert_eq!(predictions[1].value, 200.0);
        assert_eq!(predictions[0].confidence, None);
    }

    #[test]
    fn test_persist_writes_both_files() {
        let dir = tempfile::tempdir().unwrap();
        let persister = Persister::new(
            dir.path().join("nested/model.bin"),
            dir.path().join("nested/model_metadata.json"),
        );

        let written = persister.persist(&artifact(), metadata()).unwrap();
        assert_eq!(written.model_hash.len(), 64);

        let loaded = ModelArtifact::<ForestModel>::load(&persister.model_path).unwrap();
        assert_eq!(loaded, artifact());

        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&persister.metadata_path).unwrap()).unwrap();
        assert_eq!(json["mae"], 1.0);
        assert_eq!(json["feature_columns"][1], "program_jupiter");
        assert_eq!(json["model_hash"], written.model_hash.as_str());

        let parsed: ModelMetadata = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, written);

        // no staging files left behind
        let entries = fs::read_dir(dir.path().join("nested")).unwrap().count();
        assert_eq!(entries, 2);
    }

    #[test]
    fn test_persist_overwrites_existing() {
        let dir = tempfile::tempdir().unwrap();
        let persister = Persister::new(dir.path().join("m.bin"), dir.path().join("m.json"));
        fs::write(&persister.model_path, b"stale").unwrap();

        persister.persist(&artifact(), metadata()).unwrap();
        assert_ne!(fs::read(&persister.model_path).unwrap(), b"stale".to_vec());
    }

    #[test]
    fn test_metadata_failure_keeps_previous_model() {
        let dir = tempfile::tempdir().unwrap();
        let persister = Persister::new(dir.path().join("model.bin"), dir.path().join("meta.json"));
        fs::write(&persister.model_path, b"previous good model").unwrap();
        // a non-empty directory cannot be replaced by a rename
        fs::create_dir(&persister.metadata_path).unwrap();
        fs::write(persister.metadata_path.join("keep"), b"x").unwrap();

        let err = persister.persist(&artifact(), metadata()).unwrap_err();
        assert!(matches!(err, PipelineError::Io { .. }));
        assert_eq!(fs::read(&persister.model_path).unwrap(), b"previous good model".to_vec());

        let entries = fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(entries, 2);
    }

    #[test]
    fn test_metadata_failure_without_previous_model_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let persister = Persister::new(dir.path().join("model.bin"), dir.path().join("meta.json"));
        fs::create_dir(&persister.metadata_path).unwrap();
        fs::write(persister.metadata_path.join("keep"), b"x").unwrap();

        let err = persister.persist(&artifact(), metadata()).unwrap_err();
        assert!(matches!(err, PipelineError::Io { .. }));
        assert!(!persister.model_path.exists());
    }

    #[test]
    fn test_corrupt_artifact_rejected_on_load() {
        let mut no_classes = artifact();
        no_classes.model.kind = ModelKind::Classifier;
        no_classes.model.classes.clear();

        let mut backward_child = artifact();
        backward_child.model.trees[0].nodes[0].left = 0;

        let mut short_fill = artifact();
        short_fill.schema.fill_values.pop();

        for tampered in [no_classes, backward_child, short_fill] {
            let bytes = tampered.to_bytes().unwrap();
            let err = ModelArtifact::<ForestModel>::from_bytes(&bytes).unwrap_err();
            assert!(matches!(err, PipelineError::Dataset(_)), "{:?}", err);
        }
    }

    #[test]
    fn test_unwritable_directory_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"file").unwrap();

        let persister = Persister::new(blocker.join("model.bin"), blocker.join("meta.json"));
        let err = persister.persist(&artifact(), metadata()).unwrap_err();
        assert!(matches!(err, PipelineError::Io { .. }));
        assert!(!blocker.join("model.bin").exists());
    }
}
