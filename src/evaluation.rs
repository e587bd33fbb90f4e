//! Held-out classification metrics and the model persistence gate.

use crate::error::{PipelineError, PipelineResult, Stage};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::info;

/// Precision, recall, F1 and support of one class
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

impl ClassMetrics {
    fn from_counts(tp: usize, fp: usize, fn_: usize) -> Self {
        let precision = ratio(tp, tp + fp);
        let recall = ratio(tp, tp + fn_);
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };
        Self {
            precision,
            recall,
            f1,
            support: tp + fn_,
        }
    }
}

/// Binary confusion matrix laid out as `[[tn, fp], [fn, tp]]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub true_negatives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
    pub true_positives: usize,
}

impl ConfusionMatrix {
    pub fn from_labels(actual: &[u8], predicted: &[u8]) -> Self {
        let mut matrix = Self::default();
        for (&a, &p) in actual.iter().zip(predicted) {
            match (a, p) {
                (1, 1) => matrix.true_positives += 1,
                (1, _) => matrix.false_negatives += 1,
                (_, 1) => matrix.false_positives += 1,
                _ => matrix.true_negatives += 1,
            }
        }
        matrix
    }

    pub fn as_rows(&self) -> [[usize; 2]; 2] {
        [
            [self.true_negatives, self.false_positives],
            [self.false_negatives, self.true_positives],
        ]
    }

    pub fn total(&self) -> usize {
        self.true_negatives + self.false_positives + self.false_negatives + self.true_positives
    }
}

/// One operating point of the ROC curve
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RocPoint {
    pub false_positive_rate: f64,
    pub true_positive_rate: f64,
    /// Score at or above which records are called positive
    pub threshold: f64,
}

/// ROC curve and its area
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RocCurve {
    pub points: Vec<RocPoint>,
    pub auc: f64,
}

impl RocCurve {
    /// Curve with a point per distinct score, starting at (0, 0).
    ///
    /// AUC is the trapezoidal area; with a class absent it is 0.5 and the
    /// curve is the diagonal.
    pub fn compute(actual: &[u8], scores: &[f64]) -> Self {
        let positives = actual.iter().filter(|&&a| a == 1).count();
        let negatives = actual.len() - positives;
        if positives == 0 || negatives == 0 {
            return Self {
                points: vec![
                    RocPoint {
                        false_positive_rate: 0.0,
                        true_positive_rate: 0.0,
                        threshold: f64::INFINITY,
                    },
                    RocPoint {
                        false_positive_rate: 1.0,
                        true_positive_rate: 1.0,
                        threshold: f64::NEG_INFINITY,
                    },
                ],
                auc: 0.5,
            };
        }

        let mut order: Vec<usize> = (0..scores.len()).collect();
        order.sort_by(|&a, &b| scores[b].partial_cmp(&scores[a]).unwrap_or(Ordering::Equal));

        let mut points = vec![RocPoint {
            false_positive_rate: 0.0,
            true_positive_rate: 0.0,
            threshold: f64::INFINITY,
        }];
        let (mut tp, mut fp) = (0usize, 0usize);
        let mut i = 0;
        while i < order.len() {
            let threshold = scores[order[i]];
            while i < order.len() && scores[order[i]] == threshold {
                if actual[order[i]] == 1 {
                    tp += 1;
                } else {
                    fp += 1;
                }
                i += 1;
            }
            points.push(RocPoint {
                false_positive_rate: fp as f64 / negatives as f64,
                true_positive_rate: tp as f64 / positives as f64,
                threshold,
            });
        }

        let auc = points
            .windows(2)
            .map(|w| {
                (w[1].false_positive_rate - w[0].false_positive_rate)
                    * (w[1].true_positive_rate + w[0].true_positive_rate)
                    / 2.0
            })
            .sum();

        Self { points, auc }
    }
}

/// Metrics of one held-out evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationReport {
    /// Low-risk class (label 0)
    pub negative: ClassMetrics,
    /// High-risk class (label 1)
    pub positive: ClassMetrics,
    pub accuracy: f64,
    pub macro_avg: ClassMetrics,
    pub weighted_avg: ClassMetrics,
    pub confusion: ConfusionMatrix,
    pub roc: RocCurve,
}

impl ClassificationReport {
    /// Positive-class recall; the only metric used for gating
    pub fn recall(&self) -> f64 {
        self.positive.recall
    }

    pub fn auc(&self) -> f64 {
        self.roc.auc
    }

    pub fn log_report(&self) {
        let [[tn, fp], [fn_, tp]] = self.confusion.as_rows();
        info!("╔══════════════════════════════════════════════════════════════╗");
        info!("║                    CLASSIFICATION REPORT                     ║");
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!("║             precision    recall  f1-score   support          ║");
        for (name, m) in [
            ("Low Risk ", &self.negative),
            ("High Risk", &self.positive),
            ("macro avg", &self.macro_avg),
            ("wght avg ", &self.weighted_avg),
        ] {
            info!(
                "║ {}  {:>9.2} {:>9.2} {:>9.2} {:>9}          ║",
                name, m.precision, m.recall, m.f1, m.support
            );
        }
        info!(
            "║ accuracy {:>33.2} {:>9}          ║",
            self.accuracy,
            self.confusion.total()
        );
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!("║ Confusion matrix: [[{:>5}, {:>5}], [{:>5}, {:>5}]]            ║", tn, fp, fn_, tp);
        info!("║ ROC AUC: {:>6.3}                                              ║", self.auc());
        info!("╚══════════════════════════════════════════════════════════════╝");
    }
}

/// Computes `ClassificationReport`s from held-out predictions
#[derive(Debug, Clone, Copy, Default)]
pub struct Evaluator;

impl Evaluator {
    pub fn new() -> Self {
        Self
    }

    pub fn evaluate(
        &self,
        actual: &[u8],
        predicted: &[u8],
        scores: &[f64],
    ) -> PipelineResult<ClassificationReport> {
        if actual.len() != predicted.len() || actual.len() != scores.len() {
            return Err(PipelineError::InvalidParameter {
                stage: Stage::Evaluation,
                message: format!(
                    "length mismatch: {} labels, {} predictions, {} scores",
                    actual.len(),
                    predicted.len(),
                    scores.len()
                ),
            });
        }
        if actual.is_empty() {
            return Err(PipelineError::EmptyDataset {
                stage: Stage::Evaluation,
            });
        }

        let confusion = ConfusionMatrix::from_labels(actual, predicted);
        let positive = ClassMetrics::from_counts(
            confusion.true_positives,
            confusion.false_positives,
            confusion.false_negatives,
        );
        let negative = ClassMetrics::from_counts(
            confusion.true_negatives,
            confusion.false_negatives,
            confusion.false_positives,
        );

        let total = confusion.total();
        let accuracy = ratio(confusion.true_positives + confusion.true_negatives, total);
        let macro_avg = ClassMetrics {
            precision: (negative.precision + positive.precision) / 2.0,
            recall: (negative.recall + positive.recall) / 2.0,
            f1: (negative.f1 + positive.f1) / 2.0,
            support: total,
        };
        let weight = |f: fn(&ClassMetrics) -> f64| {
            (f(&negative) * negative.support as f64 + f(&positive) * positive.support as f64)
                / total as f64
        };
        let weighted_avg = ClassMetrics {
            precision: weight(|m| m.precision),
            recall: weight(|m| m.recall),
            f1: weight(|m| m.f1),
            support: total,
        };

        let report = ClassificationReport {
            negative,
            positive,
            accuracy,
            macro_avg,
            weighted_avg,
            confusion,
            roc: RocCurve::compute(actual, scores),
        };

        info!(
            recall = report.recall(),
            precision = report.positive.precision,
            auc = report.auc(),
            accuracy,
            "Model evaluated"
        );
        Ok(report)
    }
}

/// Decides whether a trained model is good enough to persist
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PersistenceGate {
    threshold: f64,
}

impl PersistenceGate {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Strictly greater: recall equal to the threshold does not pass
    pub fn passes(&self, recall: f64) -> bool {
        recall > self.threshold
    }
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_confusion_layout() {
        let matrix = ConfusionMatrix::from_labels(&[0, 0, 1, 1, 1], &[0, 1, 0, 1, 1]);
        assert_eq!(matrix.as_rows(), [[1, 1], [1, 2]]);
    }

    #[test]
    fn test_per_class_metrics() {
        let actual = [0, 0, 0, 1, 1];
        let predicted = [0, 1, 0, 1, 0];
        let scores = [0.1, 0.6, 0.2, 0.9, 0.4];
        let report = Evaluator::new().evaluate(&actual, &predicted, &scores).unwrap();

        assert_relative_eq!(report.positive.precision, 0.5);
        assert_relative_eq!(report.positive.recall, 0.5);
        assert_relative_eq!(report.negative.recall, 2.0 / 3.0);
        assert_eq!(report.positive.support, 2);
        assert_relative_eq!(report.accuracy, 0.6);
        assert_relative_eq!(report.recall(), 0.5);
    }

    #[test]
    fn test_zero_division_is_zero() {
        let report = Evaluator::new()
            .evaluate(&[0, 1], &[0, 0], &[0.1, 0.2])
            .unwrap();
        assert_eq!(report.positive.precision, 0.0);
        assert_eq!(report.positive.f1, 0.0);
    }

    #[test]
    fn test_roc_auc() {
        let perfect = RocCurve::compute(&[0, 0, 1, 1], &[0.1, 0.2, 0.8, 0.9]);
        assert_relative_eq!(perfect.auc, 1.0);
        assert_eq!(perfect.points.first().unwrap().false_positive_rate, 0.0);
        let last = perfect.points.last().unwrap();
        assert_eq!((last.false_positive_rate, last.true_positive_rate), (1.0, 1.0));

        let worst = RocCurve::compute(&[1, 1, 0, 0], &[0.1, 0.2, 0.8, 0.9]);
        assert_relative_eq!(worst.auc, 0.0);

        let tied = RocCurve::compute(&[0, 1], &[0.5, 0.5]);
        assert_relative_eq!(tied.auc, 0.5);
    }

    #[test]
    fn test_roc_single_class() {
        let roc = RocCurve::compute(&[0, 0, 0], &[0.1, 0.5, 0.9]);
        assert_eq!(roc.auc, 0.5);
    }

    #[test]
    fn test_gate_boundary_is_exclusive() {
        let gate = PersistenceGate::new(0.39);
        assert!(!gate.passes(0.39));
        assert!(gate.passes(0.40));
        assert!(!gate.passes(0.2));
    }

    #[test]
    fn test_length_mismatch() {
        assert!(Evaluator::new().evaluate(&[0, 1], &[0], &[0.1, 0.2]).is_err());
    }
}
