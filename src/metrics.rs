//! Binary classification scores for evaluating fraud predictions.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassificationMetrics {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MetricsError {
    #[error("no samples to score")]
    Empty,
    #[error("y_true has {truth} samples but y_pred has {predicted}")]
    LengthMismatch { truth: usize, predicted: usize },
    #[error("invalid binary label: '{0}'")]
    InvalidLabel(String),
}

/// Precision, recall and F1 fall back to 0.0 when their denominator is zero.
pub fn classification_metrics(
    y_true: &[bool],
    y_pred: &[bool],
) -> Result<ClassificationMetrics, MetricsError> {
    if y_true.len() != y_pred.len() {
        return Err(MetricsError::LengthMismatch {
            truth: y_true.len(),
            predicted: y_pred.len(),
        });
    }
    if y_true.is_empty() {
        return Err(MetricsError::Empty);
    }

    let mut tp = 0u64;
    let mut fp = 0u64;
    let mut fn_ = 0u64;
    let mut correct = 0u64;
    for (truth, predicted) in y_true.iter().zip(y_pred) {
        match (*truth, *predicted) {
            (true, true) => tp += 1,
            (false, true) => fp += 1,
            (true, false) => fn_ += 1,
            (false, false) => {}
        }
        if truth == predicted {
            correct += 1;
        }
    }

    let precision = ratio(tp, tp + fp);
    let recall = ratio(tp, tp + fn_);
    let f1 = if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    };

    Ok(ClassificationMetrics {
        accuracy: ratio(correct, y_true.len() as u64),
        precision,
        recall,
        f1,
    })
}

pub fn parse_binary_label(raw: &str) -> Result<bool, MetricsError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "1.0" | "true" | "yes" => Ok(true),
        "0" | "0.0" | "false" | "no" => Ok(false),
        _ => Err(MetricsError::InvalidLabel(raw.to_string())),
    }
}

pub fn parse_binary_labels(raw: &[String]) -> Result<Vec<bool>, MetricsError> {
    raw.iter().map(|value| parse_binary_label(value)).collect()
}

fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}
