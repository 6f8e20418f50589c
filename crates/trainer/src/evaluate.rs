//! Held-out evaluation
//!
//! Produces an [`EvaluationReport`]: pure data, no printing. See
//! [`crate::report`] for console rendering.

use belay_forest_core::{argmax, Ensemble, ModelKind};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::dataset::Dataset;
use crate::errors::PipelineError;

/// Number of individual test predictions kept for review
pub const SAMPLE_PREDICTIONS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegressionMetrics {
    pub mae: f64,
    pub rmse: f64,
    pub r2: f64,
    pub accuracy_percent: f64,
}

/// Binary confusion counts with 1 as the positive class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub true_negative: u64,
    pub false_positive: u64,
    pub false_negative: u64,
    pub true_positive: u64,
}

impl ConfusionMatrix {
    /// `[[tn, fp], [fn, tp]]`
    pub fn rows(&self) -> [[u64; 2]; 2] {
        [
            [self.true_negative, self.false_positive],
            [self.false_negative, self.true_positive],
        ]
    }

    pub fn total(&self) -> u64 {
        self.true_negative + self.false_positive + self.false_negative + self.true_positive
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassificationMetrics {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub accuracy_percent: f64,
    pub confusion: ConfusionMatrix,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Metrics {
    Regression(RegressionMetrics),
    Classification(ClassificationMetrics),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedImportance {
    pub feature: String,
    pub importance: f64,
}

/// One test row shown for human review
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SamplePrediction {
    Regression {
        actual: f64,
        predicted: f64,
        abs_error: f64,
        /// 0 when `actual` is 0
        pct_error: f64,
    },
    Classification {
        actual: bool,
        predicted: bool,
        /// Probability the model assigns to its own prediction
        confidence: f64,
        matched: bool,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationReport {
    pub metrics: Metrics,
    /// Descending by importance; ties keep training column order
    pub importances: Vec<RankedImportance>,
    pub samples: Vec<SamplePrediction>,
}

/// Evaluate `model` on `test`; `feature_names` in training column order
pub fn evaluate<M: Ensemble>(
    model: &M,
    feature_names: &[String],
    test: &Dataset,
) -> Result<EvaluationReport, PipelineError> {
    if test.is_empty() {
        return Err(PipelineError::Validation("test set is empty".to_string()));
    }
    if feature_names.len() != model.n_features() {
        return Err(PipelineError::Validation(format!(
            "{} feature names for a model with {} features",
            feature_names.len(),
            model.n_features()
        )));
    }

    let predicted = model.predict(&test.features)?;
    let importances = rank_importances(feature_names, &model.feature_importances());

    let (metrics, samples) = match model.kind() {
        ModelKind::Regressor => {
            let metrics = regression_metrics(&test.targets, &predicted);
            let samples = test
                .targets
                .iter()
                .zip(&predicted)
                .take(SAMPLE_PREDICTIONS)
                .map(|(&actual, &predicted)| {
                    let abs_error = (actual - predicted).abs();
                    SamplePrediction::Regression {
                        actual,
                        predicted,
                        abs_error,
                        pct_error: if actual != 0.0 {
                            abs_error / actual.abs() * 100.0
                        } else {
                            0.0
                        },
                    }
                })
                .collect();
            (Metrics::Regression(metrics), samples)
        }
        ModelKind::Classifier => {
            let metrics = classification_metrics(&test.targets, &predicted);
            let shown = SAMPLE_PREDICTIONS.min(test.len());
            let probabilities = model.predict_proba(&test.features[..shown])?;
            let samples = test
                .targets
                .iter()
                .zip(&predicted)
                .zip(probabilities)
                .map(|((&actual, &predicted), proba)| SamplePrediction::Classification {
                    actual: is_positive(actual),
                    predicted: is_positive(predicted),
                    confidence: proba.get(argmax(&proba)).copied().unwrap_or(0.0),
                    matched: is_positive(actual) == is_positive(predicted),
                })
                .collect();
            (Metrics::Classification(metrics), samples)
        }
    };

    Ok(EvaluationReport {
        metrics,
        importances,
        samples,
    })
}

fn is_positive(label: f64) -> bool {
    label >= 0.5
}

/// MAE, RMSE and R² (constant actuals: 1.0 if predicted exactly, else 0.0)
pub fn regression_metrics(actual: &[f64], predicted: &[f64]) -> RegressionMetrics {
    let n = actual.len().max(1) as f64;

    let mae = actual
        .iter()
        .zip(predicted)
        .map(|(a, p)| (a - p).abs())
        .sum::<f64>()
        / n;
    let ss_res: f64 = actual.iter().zip(predicted).map(|(a, p)| (a - p).powi(2)).sum();
    let rmse = (ss_res / n).sqrt();

    let mean = actual.iter().sum::<f64>() / n;
    let ss_tot: f64 = actual.iter().map(|a| (a - mean).powi(2)).sum();
    let r2 = if ss_tot > 0.0 {
        1.0 - ss_res / ss_tot
    } else {
        warn!("Test targets are constant; R² reported as {}", if ss_res == 0.0 { 1 } else { 0 });
        if ss_res == 0.0 {
            1.0
        } else {
            0.0
        }
    };

    RegressionMetrics {
        mae,
        rmse,
        r2,
        accuracy_percent: r2 * 100.0,
    }
}

/// Accuracy, precision, recall and F1 for labels in {0, 1}; undefined
/// ratios are reported as 0.0
pub fn classification_metrics(actual: &[f64], predicted: &[f64]) -> ClassificationMetrics {
    let mut confusion = ConfusionMatrix::default();
    for (&a, &p) in actual.iter().zip(predicted) {
        match (is_positive(a), is_positive(p)) {
            (false, false) => confusion.true_negative += 1,
            (false, true) => confusion.false_positive += 1,
            (true, false) => confusion.false_negative += 1,
            (true, true) => confusion.true_positive += 1,
        }
    }

    let ratio = |num: u64, den: u64| if den == 0 { 0.0 } else { num as f64 / den as f64 };
    let tp = confusion.true_positive;
    let accuracy = ratio(tp + confusion.true_negative, confusion.total());
    let precision = ratio(tp, tp + confusion.false_positive);
    let recall = ratio(tp, tp + confusion.false_negative);
    let f1 = if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    };

    ClassificationMetrics {
        accuracy,
        precision,
        recall,
        f1,
        accuracy_percent: accuracy * 100.0,
        confusion,
    }
}

/// Pair names with importances and sort descending (stable)
pub fn rank_importances(names: &[String], importances: &[f64]) -> Vec<RankedImportance> {
    let mut ranked: Vec<RankedImportance> = names
        .iter()
        .zip(importances)
        .map(|(name, &importance)| RankedImportance {
            feature: name.clone(),
            importance,
        })
        .collect();
    ranked.sort_by(|a, b| b.importance.total_cmp(&a.importance));
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use belay_forest_core::{ForestModel, ForestParams, Node, Tree};

    #[test]
    fn test_regression_metrics() {
        let metrics = regression_metrics(&[1.0, 2.0, 3.0, 4.0], &[1.0, 2.0, 3.0, 6.0]);
        assert_eq!(metrics.mae, 0.5);
        assert_eq!(metrics.rmse, 1.0);
        // ss_tot = 5, ss_res = 4
        assert!((metrics.r2 - 0.2).abs() < 1e-12);
        assert!((metrics.accuracy_percent - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_r2_with_constant_actuals() {
        assert_eq!(regression_metrics(&[2.0, 2.0], &[2.0, 2.0]).r2, 1.0);
        assert_eq!(regression_metrics(&[2.0, 2.0], &[2.0, 3.0]).r2, 0.0);
    }

    #[test]
    fn test_classification_metrics() {
        let actual = [1.0, 1.0, 1.0, 0.0, 0.0, 1.0];
        let predicted = [1.0, 0.0, 1.0, 1.0, 0.0, 1.0];
        let metrics = classification_metrics(&actual, &predicted);

        assert_eq!(metrics.confusion.rows(), [[1, 1], [1, 3]]);
        assert!((metrics.accuracy - 4.0 / 6.0).abs() < 1e-12);
        assert_eq!(metrics.precision, 0.75);
        assert_eq!(metrics.recall, 0.75);
        assert_eq!(metrics.f1, 0.75);
    }

    #[test]
    fn test_zero_division_reported_as_zero() {
        let metrics = classification_metrics(&[0.0, 0.0], &[0.0, 0.0]);
        assert_eq!(metrics.accuracy, 1.0);
        assert_eq!(metrics.precision, 0.0);
        assert_eq!(metrics.recall, 0.0);
        assert_eq!(metrics.f1, 0.0);
    }

    #[test]
    fn test_rank_is_stable_descending() {
        let names: Vec<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        let ranked = rank_importances(&names, &[0.25, 0.5, 0.25]);
        let order: Vec<&str> = ranked.iter().map(|r| r.feature.as_str()).collect();
        assert_eq!(order, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_evaluate_classifier_samples() {
        let mut root = Node::internal(0, 0, 0.5, 0.5, 2.0);
        root.left = 1;
        root.right = 2;
        let model = ForestModel::new(
            ModelKind::Classifier,
            1,
            vec![0.0, 1.0],
            ForestParams::classifier(),
            vec![Tree::new(vec![
                root,
                Node::leaf(1, vec![0.9, 0.1], 0.0, 1.0),
                Node::leaf(2, vec![0.2, 0.8], 0.0, 1.0),
            ])],
        )
        .unwrap();

        let test = Dataset::new(vec![vec![0.0], vec![1.0], vec![1.0]], vec![0.0, 1.0, 0.0]);
        let report = evaluate(&model, &["x".to_string()], &test).unwrap();

        assert_eq!(report.samples.len(), 3);
        match &report.samples[2] {
            SamplePrediction::Classification {
                actual,
                predicted,
                confidence,
                matched,
            } => {
                assert!(!actual);
                assert!(predicted);
                assert!((confidence - 0.8).abs() < 1e-12);
                assert!(!matched);
            }
            other => panic!("unexpected sample: {:?}", other),
        }
        assert_eq!(report.importances[0].feature, "x");
        assert!((report.importances[0].importance - 1.0).abs() < 1e-12);
    }
}
