//! Intent evaluation metrics.
//!
//! Precision and F1 are support-weighted averages over the labels seen in
//! either the gold or the predicted sequence.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Per-label scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelReport {
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    pub support: usize,
}

/// Aggregate metrics for one evaluation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationMetrics {
    pub report: BTreeMap<String, LabelReport>,
    pub precision: f64,
    pub f1_score: f64,
    pub accuracy: f64,
}

/// One evaluated example.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentPrediction {
    pub text: String,
    pub intent: String,
    pub predicted: String,
    pub confidence: f64,
}

/// The `intent_evaluation` section of an evaluation response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentEvaluation {
    pub report: BTreeMap<String, LabelReport>,
    pub predictions: Vec<IntentPrediction>,
    pub precision: f64,
    pub f1_score: f64,
    pub accuracy: f64,
}

/// Full evaluation response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub intent_evaluation: IntentEvaluation,
}

impl EvaluationResult {
    /// Compute metrics for `predictions` and wrap them.
    pub fn from_predictions(predictions: Vec<IntentPrediction>) -> Self {
        let y_true: Vec<&str> = predictions.iter().map(|p| p.intent.as_str()).collect();
        let y_pred: Vec<&str> = predictions.iter().map(|p| p.predicted.as_str()).collect();
        let metrics = evaluation_metrics(&y_true, &y_pred);
        Self {
            intent_evaluation: IntentEvaluation {
                report: metrics.report,
                predictions,
                precision: metrics.precision,
                f1_score: metrics.f1_score,
                accuracy: metrics.accuracy,
            },
        }
    }
}

/// Replace missing labels with `""`.
pub fn clean_intent_label(label: Option<&str>) -> String {
    label.unwrap_or_default().to_string()
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 { 0.0 } else { num as f64 / den as f64 }
}

/// Compute the per-label report plus weighted precision, weighted F1 and accuracy.
pub fn evaluation_metrics(y_true: &[&str], y_pred: &[&str]) -> EvaluationMetrics {
    let labels: BTreeSet<&str> = y_true.iter().chain(y_pred).copied().collect();
    let pairs: Vec<(&str, &str)> = y_true.iter().copied().zip(y_pred.iter().copied()).collect();

    let mut report = BTreeMap::new();
    let (mut weighted_precision, mut weighted_f1) = (0.0, 0.0);
    for label in labels {
        let tp = pairs.iter().filter(|(t, p)| *t == label && *p == label).count();
        let predicted = pairs.iter().filter(|(_, p)| *p == label).count();
        let support = pairs.iter().filter(|(t, _)| *t == label).count();

        let precision = ratio(tp, predicted);
        let recall = ratio(tp, support);
        let f1_score = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };
        weighted_precision += precision * support as f64;
        weighted_f1 += f1_score * support as f64;
        report.insert(
            label.to_string(),
            LabelReport {
                precision,
                recall,
                f1_score,
                support,
            },
        );
    }

    let total = pairs.len();
    let correct = pairs.iter().filter(|(t, p)| t == p).count();
    let norm = if total == 0 { 1.0 } else { total as f64 };
    EvaluationMetrics {
        report,
        precision: weighted_precision / norm,
        f1_score: weighted_f1 / norm,
        accuracy: ratio(correct, total),
    }
}
