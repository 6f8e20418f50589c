//! Console rendering of evaluation reports

use crate::evaluate::{EvaluationReport, Metrics, SamplePrediction};
use crate::features::TargetColumn;

/// Width of the importance bar at importance 1.0
const BAR_WIDTH: f64 = 50.0;

/// Render `report` as display lines; values use `target`'s unit and precision
pub fn render(report: &EvaluationReport, target: TargetColumn) -> Vec<String> {
    let mut lines = Vec::new();
    let unit = target.unit();
    let p = target.precision();

    lines.push("Model performance:".to_string());
    match &report.metrics {
        Metrics::Regression(m) => {
            lines.push(format!("  MAE:      {:.p$} {}", m.mae, unit, p = p));
            lines.push(format!("  RMSE:     {:.p$} {}", m.rmse, unit, p = p));
            lines.push(format!("  R² score: {:.3}", m.r2));
            lines.push(format!("  Accuracy: {:.1}%", m.accuracy_percent));
        }
        Metrics::Classification(m) => {
            lines.push(format!("  Accuracy:  {:.3} ({:.1}%)", m.accuracy, m.accuracy_percent));
            lines.push(format!("  Precision: {:.3}", m.precision));
            lines.push(format!("  Recall:    {:.3}", m.recall));
            lines.push(format!("  F1 score:  {:.3}", m.f1));
            let [[tn, fp], [fn_, tp]] = m.confusion.rows();
            lines.push("Confusion matrix:".to_string());
            lines.push(format!("  True neg:  {} | False pos: {}", tn, fp));
            lines.push(format!("  False neg: {} | True pos:  {}", fn_, tp));
        }
    }

    lines.push("Feature importance:".to_string());
    for ranked in &report.importances {
        let bar = "█".repeat((ranked.importance * BAR_WIDTH) as usize);
        lines.push(format!(
            "  {:20} {} {:.3}",
            ranked.feature, bar, ranked.importance
        ));
    }

    lines.push(format!("Sample predictions (first {} test rows):", report.samples.len()));
    for sample in &report.samples {
        lines.push(match sample {
            SamplePrediction::Regression {
                actual,
                predicted,
                abs_error,
                pct_error,
            } => format!(
                "  Actual: {:.p$} {u} | Predicted: {:.p$} {u} | Error: {:.p$} {u} ({:.1}%)",
                actual,
                predicted,
                abs_error,
                pct_error,
                p = p,
                u = unit
            ),
            SamplePrediction::Classification {
                actual,
                predicted,
                confidence,
                matched,
            } => format!(
                "  {} Actual: {:7} | Predicted: {:7} | Confidence: {:.1}%",
                if *matched { "✓" } else { "✗" },
                outcome(*actual),
                outcome(*predicted),
                confidence * 100.0
            ),
        });
    }

    lines
}

fn outcome(success: bool) -> &'static str {
    if success {
        "Success"
    } else {
        "Failure"
    }
}
