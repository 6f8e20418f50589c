//! Random-forest learner
//!
//! Bagged CART trees with per-tree seeds derived up front from the master
//! seed, so the fitted forest is identical whatever the thread count.

use belay_forest_core::{ClassWeight, Ensemble, ForestModel, ForestParams, ModelKind, Tree};
use rayon::prelude::*;
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info};

use crate::cart::{CartBuilder, Criterion, TreeConfig};
use crate::deterministic::{mix_seed, LcgRng};
use crate::errors::PipelineError;

/// Anything that can fit an [`Ensemble`] from numeric rows
pub trait Learner {
    type Model: Ensemble + Serialize + DeserializeOwned;

    fn fit(
        &self,
        kind: ModelKind,
        features: &[Vec<f64>],
        targets: &[f64],
        params: &ForestParams,
    ) -> Result<Self::Model, PipelineError>;
}

/// Default learner backed by `belay-forest-core`
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomForestLearner;

impl Learner for RandomForestLearner {
    type Model = ForestModel;

    fn fit(
        &self,
        kind: ModelKind,
        features: &[Vec<f64>],
        targets: &[f64],
        params: &ForestParams,
    ) -> Result<ForestModel, PipelineError> {
        params.validate()?;

        let n_samples = features.len();
        if n_samples == 0 {
            return Err(PipelineError::Training("training set is empty".to_string()));
        }
        if targets.len() != n_samples {
            return Err(PipelineError::Training(format!(
                "{} feature rows but {} targets",
                n_samples,
                targets.len()
            )));
        }

        let feature_count = features[0].len();
        if feature_count == 0 {
            return Err(PipelineError::Training("rows have no features".to_string()));
        }
        if let Some(i) = features.iter().position(|row| row.len() != feature_count) {
            return Err(PipelineError::Training(format!(
                "row {} has {} features, expected {}",
                i,
                features[i].len(),
                feature_count
            )));
        }
        if features.iter().flatten().chain(targets).any(|v| !v.is_finite()) {
            return Err(PipelineError::Training(
                "training data contains non-finite values".to_string(),
            ));
        }

        let (classes, encoded, class_weights) = match kind {
            ModelKind::Regressor => (Vec::new(), targets.to_vec(), Vec::new()),
            ModelKind::Classifier => encode_classes(targets, params.class_weight),
        };
        let criterion = match kind {
            ModelKind::Regressor => Criterion::SquaredError,
            ModelKind::Classifier => Criterion::Gini {
                n_classes: classes.len(),
            },
        };

        let tree_config = TreeConfig {
            max_depth: params.max_depth,
            min_samples_split: params.min_samples_split,
            min_samples_leaf: params.min_samples_leaf,
            max_features: params.max_features.resolve(feature_count),
            criterion,
        };

        info!(
            "Fitting {} trees on {} samples x {} features",
            params.n_estimators, n_samples, feature_count
        );

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(params.threads)
            .build()
            .map_err(|err| PipelineError::Training(format!("thread pool: {}", err)))?;

        let build_tree = |tree_idx: usize| -> Tree {
            let mut rng = LcgRng::new(mix_seed(params.seed, tree_idx as u64));
            let mut weights = if params.bootstrap {
                let mut counts = vec![0.0; n_samples];
                for _ in 0..n_samples {
                    counts[rng.next_range(n_samples)] += 1.0;
                }
                counts
            } else {
                vec![1.0; n_samples]
            };
            if !class_weights.is_empty() {
                for (weight, &class) in weights.iter_mut().zip(&encoded) {
                    *weight *= class_weights[class as usize];
                }
            }

            let builder = CartBuilder::new(features, &encoded, &weights, tree_config.clone());
            let tree = builder.build(&mut rng);
            debug!(
                "Tree {}/{}: {} nodes, {} leaves, depth {}",
                tree_idx + 1,
                params.n_estimators,
                tree.nodes.len(),
                tree.leaf_count(),
                tree.depth()
            );
            tree
        };

        let trees: Vec<Tree> =
            pool.install(|| (0..params.n_estimators).into_par_iter().map(build_tree).collect());

        Ok(ForestModel::new(
            kind,
            feature_count,
            classes,
            params.clone(),
            trees,
        )?)
    }
}

/// Sorted class labels, targets re-encoded as class indices, and per-class
/// weights (empty when unweighted)
fn encode_classes(
    targets: &[f64],
    class_weight: Option<ClassWeight>,
) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
    let mut classes = targets.to_vec();
    classes.sort_by(f64::total_cmp);
    classes.dedup();

    let encoded: Vec<f64> = targets
        .iter()
        .map(|t| classes.partition_point(|c| c < t) as f64)
        .collect();

    let weights = match class_weight {
        None => Vec::new(),
        Some(ClassWeight::Balanced) => {
            let mut counts = vec![0usize; classes.len()];
            for &class in &encoded {
                counts[class as usize] += 1;
            }
            let n = targets.len() as f64;
            let k = classes.len() as f64;
            counts.iter().map(|&c| n / (k * c as f64)).collect()
        }
    };

    (classes, encoded, weights)
}
