//! Random-forest model with deterministic inference
//!
//! A forest averages the leaf payloads of its trees: regression trees carry
//! `[mean]`, classification trees carry per-class probabilities over
//! `classes`. Evaluation order is fixed, so identical models and inputs
//! produce identical outputs on every platform.

use serde::{Deserialize, Serialize};

use crate::errors::{ForestError, Result};
use crate::tree::Tree;

/// Current model envelope version
pub const MODEL_VERSION: u32 = 1;

/// What the forest predicts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelKind {
    Regressor,
    Classifier,
}

impl ModelKind {
    /// Name recorded in model metadata
    pub fn model_type(self) -> &'static str {
        match self {
            ModelKind::Regressor => "RandomForestRegressor",
            ModelKind::Classifier => "RandomForestClassifier",
        }
    }
}

/// Number of candidate features drawn at each split
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MaxFeatures {
    All,
    Sqrt,
    Count(usize),
}

impl MaxFeatures {
    /// Resolve against the actual feature count (always at least 1)
    pub fn resolve(self, n_features: usize) -> usize {
        let n = match self {
            MaxFeatures::All => n_features,
            MaxFeatures::Sqrt => (n_features as f64).sqrt().floor() as usize,
            MaxFeatures::Count(count) => count.min(n_features),
        };
        n.max(1)
    }
}

/// Per-class sample weighting for classifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClassWeight {
    /// `n_samples / (n_classes * class_count)`
    Balanced,
}

impl ClassWeight {
    pub fn name(self) -> &'static str {
        match self {
            ClassWeight::Balanced => "balanced",
        }
    }
}

/// Forest hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForestParams {
    pub n_estimators: usize,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub max_features: MaxFeatures,
    pub bootstrap: bool,
    pub class_weight: Option<ClassWeight>,
    pub seed: u64,
    /// Worker threads for tree construction (0 = all cores); not part of
    /// the fitted model
    #[serde(skip)]
    pub threads: usize,
}

impl ForestParams {
    /// Regressor defaults: 100 trees, depth 15, split 5, leaf 2, seed 42
    pub fn regressor() -> Self {
        Self {
            n_estimators: 100,
            max_depth: Some(15),
            min_samples_split: 5,
            min_samples_leaf: 2,
            max_features: MaxFeatures::All,
            bootstrap: true,
            class_weight: None,
            seed: 42,
            threads: 0,
        }
    }

    /// Classifier defaults: regressor settings plus sqrt feature sampling
    /// and balanced class weights
    pub fn classifier() -> Self {
        Self {
            max_features: MaxFeatures::Sqrt,
            class_weight: Some(ClassWeight::Balanced),
            ..Self::regressor()
        }
    }

    pub fn for_kind(kind: ModelKind) -> Self {
        match kind {
            ModelKind::Regressor => Self::regressor(),
            ModelKind::Classifier => Self::classifier(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.n_estimators == 0 {
            return Err(ForestError::InvalidModel(
                "n_estimators must be at least 1".to_string(),
            ));
        }
        if self.min_samples_split < 2 {
            return Err(ForestError::InvalidModel(
                "min_samples_split must be at least 2".to_string(),
            ));
        }
        if self.min_samples_leaf == 0 {
            return Err(ForestError::InvalidModel(
                "min_samples_leaf must be at least 1".to_string(),
            ));
        }
        if self.max_depth == Some(0) {
            return Err(ForestError::InvalidModel(
                "max_depth must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for ForestParams {
    fn default() -> Self {
        Self::regressor()
    }
}

/// The narrow seam between the pipeline and whatever fitted the model
pub trait Ensemble {
    fn kind(&self) -> ModelKind;

    fn n_features(&self) -> usize;

    /// Predicted target per row (class label for classifiers)
    fn predict(&self, rows: &[Vec<f64>]) -> Result<Vec<f64>>;

    /// Class probabilities per row, ordered as [`Ensemble::classes`]
    fn predict_proba(&self, rows: &[Vec<f64>]) -> Result<Vec<Vec<f64>>>;

    /// Class labels known to a classifier (empty for regressors)
    fn classes(&self) -> &[f64];

    /// Per-feature importance in training column order, summing to 1.0
    fn feature_importances(&self) -> Vec<f64>;

    /// Structural check run on models read back from storage
    fn validate(&self) -> Result<()>;
}

/// Fitted random forest
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ForestModel {
    pub version: u32,
    pub kind: ModelKind,
    pub n_features: usize,
    /// Sorted class labels (classifiers only)
    pub classes: Vec<f64>,
    pub params: ForestParams,
    pub trees: Vec<Tree>,
}

impl ForestModel {
    pub fn new(
        kind: ModelKind,
        n_features: usize,
        classes: Vec<f64>,
        params: ForestParams,
        trees: Vec<Tree>,
    ) -> Result<Self> {
        let model = Self {
            version: MODEL_VERSION,
            kind,
            n_features,
            classes,
            params,
            trees,
        };
        model.validate()?;
        Ok(model)
    }

    /// Width of every leaf payload
    pub fn leaf_width(&self) -> usize {
        match self.kind {
            ModelKind::Regressor => 1,
            ModelKind::Classifier => self.classes.len(),
        }
    }

    /// Validate model structure
    pub fn validate(&self) -> Result<()> {
        if self.version != MODEL_VERSION {
            return Err(ForestError::InvalidModel(format!(
                "Unsupported model version: {}",
                self.version
            )));
        }
        if self.n_features == 0 {
            return Err(ForestError::InvalidModel("model has no features".to_string()));
        }
        if self.trees.is_empty() {
            return Err(ForestError::InvalidModel("model has no trees".to_string()));
        }
        if self.kind == ModelKind::Classifier && self.classes.is_empty() {
            return Err(ForestError::InvalidModel(
                "classifier has no classes".to_string(),
            ));
        }

        let width = self.leaf_width();
        for (i, tree) in self.trees.iter().enumerate() {
            tree.validate(self.n_features, width).map_err(|e| {
                ForestError::InvalidModel(format!("Tree {} validation failed: {}", i, e))
            })?;
        }
        Ok(())
    }

    /// Mean leaf payload over all trees for a single row
    fn mean_leaf(&self, row: &[f64]) -> Result<Vec<f64>> {
        if row.len() != self.n_features {
            return Err(ForestError::FeatureCount {
                expected: self.n_features,
                actual: row.len(),
            });
        }

        let mut acc = vec![0.0; self.leaf_width()];
        for tree in &self.trees {
            for (slot, value) in acc.iter_mut().zip(tree.leaf_value(row)?) {
                *slot += value;
            }
        }

        let n = self.trees.len() as f64;
        for slot in &mut acc {
            *slot /= n;
        }
        Ok(acc)
    }

    /// Predict a single row
    pub fn predict_row(&self, row: &[f64]) -> Result<f64> {
        let mean = self.mean_leaf(row)?;
        match self.kind {
            ModelKind::Regressor => Ok(mean[0]),
            ModelKind::Classifier => Ok(self.classes[argmax(&mean)]),
        }
    }

    /// Class probabilities for a single row
    pub fn predict_proba_row(&self, row: &[f64]) -> Result<Vec<f64>> {
        if self.kind != ModelKind::Classifier {
            return Err(ForestError::Unsupported(
                "predict_proba on a regressor".to_string(),
            ));
        }
        self.mean_leaf(row)
    }
}

impl Ensemble for ForestModel {
    fn kind(&self) -> ModelKind {
        self.kind
    }

    fn n_features(&self) -> usize {
        self.n_features
    }

    fn predict(&self, rows: &[Vec<f64>]) -> Result<Vec<f64>> {
        rows.iter().map(|row| self.predict_row(row)).collect()
    }

    fn predict_proba(&self, rows: &[Vec<f64>]) -> Result<Vec<Vec<f64>>> {
        rows.iter().map(|row| self.predict_proba_row(row)).collect()
    }

    fn classes(&self) -> &[f64] {
        &self.classes
    }

    fn validate(&self) -> Result<()> {
        ForestModel::validate(self)
    }

    fn feature_importances(&self) -> Vec<f64> {
        let mut importances = vec![0.0; self.n_features];
        for tree in &self.trees {
            for (slot, value) in importances
                .iter_mut()
                .zip(tree.feature_importances(self.n_features))
            {
                *slot += value;
            }
        }

        let total: f64 = importances.iter().sum();
        if total > 0.0 {
            importances.iter_mut().for_each(|v| *v /= total);
        } else {
            // No split reduced impurity anywhere: spread evenly.
            let uniform = 1.0 / self.n_features as f64;
            importances.iter_mut().for_each(|v| *v = uniform);
        }
        importances
    }
}

/// Index of the largest value; ties resolve to the lowest index
pub fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, value) in values.iter().enumerate().skip(1) {
        if *value > values[best] {
            best = i;
        }
    }
    best
}
