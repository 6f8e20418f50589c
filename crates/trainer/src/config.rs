//! Pipeline presets and layered configuration
//!
//! A run starts from the preset of its [`PipelineKind`] and is overridden, in
//! order, by an optional TOML file, `BELAY_*` environment variables and
//! command-line flags. Every layer is a [`Settings`] of optional values.

use belay_forest_core::ForestParams;
use config::{Config, ConfigError, Environment, File as ConfigFile};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::errors::PipelineError;
use crate::features::{FeatureColumn, Filter, TargetColumn};
use crate::record::ProgramKey;
use crate::split::SplitStrategy;

/// Environment variable prefix (`BELAY_SEED`, `BELAY_FOREST__N_ESTIMATORS`)
pub const ENV_PREFIX: &str = "BELAY";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum PipelineKind {
    /// Regress compute units consumed by successful transactions
    ComputeUnits,
    /// Regress the priority fee paid by successful transactions
    PriorityFee,
    /// Classify transactions as succeeded or failed
    Success,
}

impl PipelineKind {
    pub fn name(self) -> &'static str {
        match self {
            PipelineKind::ComputeUnits => "compute-units",
            PipelineKind::PriorityFee => "priority-fee",
            PipelineKind::Success => "success",
        }
    }
}

impl fmt::Display for PipelineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Fully resolved configuration of one training run
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub kind: PipelineKind,
    pub input: PathBuf,
    pub model_path: PathBuf,
    pub metadata_path: PathBuf,
    /// Ordered feature columns; this order is the model contract
    pub columns: Vec<FeatureColumn>,
    pub target: TargetColumn,
    pub filters: Vec<Filter>,
    pub program_key: ProgramKey,
    /// Usable transactions required after filtering (0 disables the check)
    pub min_samples: usize,
    pub test_fraction: f64,
    pub stratify: bool,
    /// Forest hyperparameters; `forest.seed` also seeds the split
    pub forest: ForestParams,
}

impl PipelineConfig {
    pub fn preset(kind: PipelineKind) -> Self {
        use FeatureColumn::*;

        match kind {
            PipelineKind::ComputeUnits => Self {
                kind,
                input: PathBuf::from("data/labeled_transactions.json"),
                model_path: PathBuf::from("data/model.bin"),
                metadata_path: PathBuf::from("data/model_metadata.json"),
                columns: vec![
                    InstructionCount,
                    AccountCount,
                    DataSize,
                    PriorityFee,
                    NetworkCongestion,
                    ProgramJupiter,
                    ProgramRaydium,
                ],
                target: TargetColumn::ComputeUnitsUsed,
                filters: vec![Filter::Successful, Filter::HasComputeUnits],
                program_key: ProgramKey::Program,
                min_samples: 50,
                test_fraction: 0.2,
                stratify: false,
                forest: ForestParams::regressor(),
            },
            PipelineKind::PriorityFee => Self {
                kind,
                input: PathBuf::from("data/ml_training_data.json"),
                model_path: PathBuf::from("models/priority_fee_model.bin"),
                metadata_path: PathBuf::from("models/priority_fee_metadata.json"),
                columns: vec![
                    InstructionCount,
                    AccountCount,
                    ComputeUnitsUsed,
                    SlotTime,
                    ProgramJupiter,
                    ProgramRaydium,
                ],
                target: TargetColumn::PriorityFee,
                filters: vec![Filter::Successful, Filter::PositiveFee],
                program_key: ProgramKey::ProgramId,
                min_samples: 50,
                test_fraction: 0.2,
                stratify: false,
                forest: ForestParams::regressor(),
            },
            PipelineKind::Success => Self {
                kind,
                input: PathBuf::from("data/ml_training_data.json"),
                model_path: PathBuf::from("models/success_classifier.bin"),
                metadata_path: PathBuf::from("models/success_classifier_metadata.json"),
                columns: vec![
                    InstructionCount,
                    AccountCount,
                    ComputeUnitsUsed,
                    PriorityFee,
                    SlotTime,
                    ProgramJupiter,
                    ProgramRaydium,
                ],
                target: TargetColumn::Success,
                filters: Vec::new(),
                program_key: ProgramKey::ProgramId,
                min_samples: 0,
                test_fraction: 0.2,
                stratify: true,
                forest: ForestParams::classifier(),
            },
        }
    }

    /// Apply every override present in `settings`
    pub fn apply(&mut self, settings: &Settings) -> Result<(), PipelineError> {
        if let Some(input) = &settings.input {
            self.input = input.clone();
        }
        if let Some(path) = &settings.model_path {
            self.model_path = path.clone();
        }
        if let Some(path) = &settings.metadata_path {
            self.metadata_path = path.clone();
        }
        if let Some(features) = &settings.features {
            self.columns = parse_all(features)?;
        }
        if let Some(filters) = &settings.filters {
            self.filters = parse_all(filters)?;
        }
        if let Some(key) = &settings.program_key {
            self.program_key = key.parse().map_err(PipelineError::Validation)?;
        }
        if let Some(min_samples) = settings.min_samples {
            self.min_samples = min_samples;
        }
        if let Some(fraction) = settings.test_fraction {
            self.test_fraction = fraction;
        }
        if let Some(stratify) = settings.stratify {
            self.stratify = stratify;
        }
        if let Some(seed) = settings.seed {
            self.forest.seed = seed;
        }
        if let Some(threads) = settings.threads {
            self.forest.threads = threads;
        }

        let forest = &settings.forest;
        if let Some(n) = forest.n_estimators {
            self.forest.n_estimators = n;
        }
        if let Some(depth) = forest.max_depth {
            // 0 means unbounded
            self.forest.max_depth = (depth > 0).then_some(depth);
        }
        if let Some(split) = forest.min_samples_split {
            self.forest.min_samples_split = split;
        }
        if let Some(leaf) = forest.min_samples_leaf {
            self.forest.min_samples_leaf = leaf;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.columns.is_empty() {
            return Err(PipelineError::Validation(
                "at least one feature column is required".to_string(),
            ));
        }
        for (i, column) in self.columns.iter().enumerate() {
            if self.columns[..i].contains(column) {
                return Err(PipelineError::Validation(format!(
                    "feature column {} listed twice",
                    column
                )));
            }
            if column.name() == self.target.name() {
                return Err(PipelineError::Validation(format!(
                    "target {} cannot also be a feature",
                    column
                )));
            }
        }
        if !(self.test_fraction > 0.0 && self.test_fraction < 1.0) {
            return Err(PipelineError::Validation(format!(
                "test fraction must be in (0, 1), got {}",
                self.test_fraction
            )));
        }
        if self.stratify && self.target != TargetColumn::Success {
            return Err(PipelineError::Validation(format!(
                "stratified splitting needs a class target, not {}",
                self.target.name()
            )));
        }
        self.forest
            .validate()
            .map_err(|err| PipelineError::Validation(err.to_string()))
    }

    pub fn split_strategy(&self) -> SplitStrategy {
        SplitStrategy {
            test_fraction: self.test_fraction,
            seed: self.forest.seed,
            stratify: self.stratify,
        }
    }
}

fn parse_all<T>(values: &[String]) -> Result<Vec<T>, PipelineError>
where
    T: std::str::FromStr<Err = String>,
{
    values
        .iter()
        .map(|value| value.trim().parse().map_err(PipelineError::Validation))
        .collect()
}

/// One configuration layer; `None` leaves the lower layer untouched
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub input: Option<PathBuf>,
    pub model_path: Option<PathBuf>,
    pub metadata_path: Option<PathBuf>,
    pub features: Option<Vec<String>>,
    pub filters: Option<Vec<String>>,
    pub program_key: Option<String>,
    pub min_samples: Option<usize>,
    pub test_fraction: Option<f64>,
    pub seed: Option<u64>,
    pub stratify: Option<bool>,
    pub threads: Option<usize>,
    pub log_level: Option<String>,
    /// `pretty` (default) or `json`
    pub log_format: Option<String>,
    pub forest: ForestSettings,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestSettings {
    pub n_estimators: Option<usize>,
    /// 0 = unbounded
    pub max_depth: Option<usize>,
    pub min_samples_split: Option<usize>,
    pub min_samples_leaf: Option<usize>,
}

impl Settings {
    /// Read the optional TOML file at `path`, then `BELAY_*` variables
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(ConfigFile::from(path));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("features")
                .with_list_parse_key("filters"),
        );

        builder.build()?.try_deserialize()
    }

    /// `other` on top of `self`
    pub fn overlay(self, other: Settings) -> Settings {
        Settings {
            input: other.input.or(self.input),
            model_path: other.model_path.or(self.model_path),
            metadata_path: other.metadata_path.or(self.metadata_path),
            features: other.features.or(self.features),
            filters: other.filters.or(self.filters),
            program_key: other.program_key.or(self.program_key),
            min_samples: other.min_samples.or(self.min_samples),
            test_fraction: other.test_fraction.or(self.test_fraction),
            seed: other.seed.or(self.seed),
            stratify: other.stratify.or(self.stratify),
            threads: other.threads.or(self.threads),
            log_level: other.log_level.or(self.log_level),
            log_format: other.log_format.or(self.log_format),
            forest: ForestSettings {
                n_estimators: other.forest.n_estimators.or(self.forest.n_estimators),
                max_depth: other.forest.max_depth.or(self.forest.max_depth),
                min_samples_split: other
                    .forest
                    .min_samples_split
                    .or(self.forest.min_samples_split),
                min_samples_leaf: other
                    .forest
                    .min_samples_leaf
                    .or(self.forest.min_samples_leaf),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_presets_match_pipelines() {
        let cu = PipelineConfig::preset(PipelineKind::ComputeUnits);
        assert_eq!(cu.columns.len(), 7);
        assert_eq!(cu.min_samples, 50);
        assert_eq!(cu.program_key, ProgramKey::Program);
        assert_eq!(cu.forest.class_weight, None);

        let fee = PipelineConfig::preset(PipelineKind::PriorityFee);
        assert_eq!(
            fee.columns.iter().map(|c| c.name()).collect::<Vec<_>>(),
            vec![
                "instructionCount",
                "accountCount",
                "computeUnitsUsed",
                "slotTime",
                "program_jupiter",
                "program_raydium"
            ]
        );

        let success = PipelineConfig::preset(PipelineKind::Success);
        assert!(success.stratify);
        assert!(success.filters.is_empty());
        assert_eq!(success.forest.class_weight, Some(belay_forest_core::ClassWeight::Balanced));

        for kind in [PipelineKind::ComputeUnits, PipelineKind::PriorityFee, PipelineKind::Success] {
            PipelineConfig::preset(kind).validate().unwrap();
        }
    }

    #[test]
    fn test_apply_overrides() {
        let mut config = PipelineConfig::preset(PipelineKind::ComputeUnits);
        let settings = Settings {
            seed: Some(7),
            features: Some(vec!["instructionCount".to_string(), " dataSize".to_string()]),
            program_key: Some("auto".to_string()),
            forest: ForestSettings {
                n_estimators: Some(10),
                max_depth: Some(0),
                ..Default::default()
            },
            ..Default::default()
        };
        config.apply(&settings).unwrap();

        assert_eq!(config.forest.seed, 7);
        assert_eq!(config.split_strategy().seed, 7);
        assert_eq!(config.columns, vec![FeatureColumn::InstructionCount, FeatureColumn::DataSize]);
        assert_eq!(config.program_key, ProgramKey::Auto);
        assert_eq!(config.forest.n_estimators, 10);
        assert_eq!(config.forest.max_depth, None);
        // untouched
        assert_eq!(config.min_samples, 50);
    }

    #[test]
    fn test_apply_rejects_unknown_names() {
        let mut config = PipelineConfig::preset(PipelineKind::Success);
        let settings = Settings {
            filters: Some(vec!["cheap".to_string()]),
            ..Default::default()
        };
        assert!(matches!(config.apply(&settings), Err(PipelineError::Validation(_))));
    }

    #[test]
    fn test_validate() {
        let mut config = PipelineConfig::preset(PipelineKind::ComputeUnits);
        config.columns.push(FeatureColumn::ComputeUnitsUsed);
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::preset(PipelineKind::ComputeUnits);
        config.stratify = true;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::preset(PipelineKind::Success);
        config.forest.n_estimators = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_overlay_prefers_upper_layer() {
        let lower = Settings {
            seed: Some(1),
            threads: Some(2),
            forest: ForestSettings {
                n_estimators: Some(50),
                ..Default::default()
            },
            ..Default::default()
        };
        let upper = Settings {
            seed: Some(9),
            ..Default::default()
        };
        let merged = lower.overlay(upper);
        assert_eq!(merged.seed, Some(9));
        assert_eq!(merged.threads, Some(2));
        assert_eq!(merged.forest.n_estimators, Some(50));
    }

    #[test]
    fn test_load_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "min_samples = 10\nfeatures = [\"slotTime\"]\n\n[forest]\nn_estimators = 25"
        )
        .unwrap();

        let settings = Settings::load(Some(file.path())).unwrap();
        assert_eq!(settings.min_samples, Some(10));
        assert_eq!(settings.features, Some(vec!["slotTime".to_string()]));
        assert_eq!(settings.forest.n_estimators, Some(25));
        assert_eq!(settings.forest.max_depth, None);
    }

    #[test]
    fn test_missing_config_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Settings::load(Some(&dir.path().join("absent.toml"))).is_err());
    }
}
