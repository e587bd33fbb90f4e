//! Minority oversampling for imbalanced training splits.

use crate::error::{PipelineError, PipelineResult, Stage};
use crate::types::EncodedFrame;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Row counts per class before and after balancing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceReport {
    pub negatives_before: usize,
    pub positives_before: usize,
    pub negatives_after: usize,
    pub positives_after: usize,
}

/// Class-balanced training set
#[derive(Debug, Clone)]
pub struct BalancedSet {
    pub features: EncodedFrame,
    pub labels: Vec<u8>,
    pub report: BalanceReport,
}

/// Oversamples the minority class with replacement up to the majority count.
#[derive(Debug, Clone, Copy)]
pub struct ClassBalancer {
    seed: u64,
}

impl ClassBalancer {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    /// Output rows: every majority row in input order, then the resampled
    /// minority rows. Equal class counts return the input unchanged. Only
    /// apply this to the training split.
    pub fn balance(&self, features: &EncodedFrame, labels: &[u8]) -> PipelineResult<BalancedSet> {
        if labels.len() != features.n_rows() {
            return Err(PipelineError::InvalidParameter {
                stage: Stage::Balancing,
                message: format!("{} labels for {} rows", labels.len(), features.n_rows()),
            });
        }

        let rows_of = |class: u8| -> Vec<usize> {
            labels
                .iter()
                .enumerate()
                .filter(|(_, &l)| l == class)
                .map(|(i, _)| i)
                .collect()
        };
        let negatives = rows_of(0);
        let positives = rows_of(1);

        for (rows, label) in [(&negatives, 0u8), (&positives, 1u8)] {
            if rows.is_empty() {
                return Err(PipelineError::EmptyClass {
                    stage: Stage::Balancing,
                    label,
                });
            }
        }

        if negatives.len() == positives.len() {
            debug!(rows = labels.len(), "Classes already balanced, keeping rows as-is");
            return Ok(BalancedSet {
                features: features.clone(),
                labels: labels.to_vec(),
                report: BalanceReport {
                    negatives_before: negatives.len(),
                    positives_before: positives.len(),
                    negatives_after: negatives.len(),
                    positives_after: positives.len(),
                },
            });
        }

        let (majority, minority, minority_label) = if positives.len() < negatives.len() {
            (&negatives, &positives, 1u8)
        } else {
            (&positives, &negatives, 0u8)
        };

        let mut rng = StdRng::seed_from_u64(self.seed);
        let resampled: Vec<usize> = (0..majority.len())
            .map(|_| minority[rng.gen_range(0..minority.len())])
            .collect();

        let rows: Vec<usize> = majority.iter().chain(resampled.iter()).copied().collect();
        let balanced_labels: Vec<u8> = rows.iter().map(|&r| labels[r]).collect();

        let (negatives_after, positives_after) = if minority_label == 1 {
            (majority.len(), resampled.len())
        } else {
            (resampled.len(), majority.len())
        };
        let report = BalanceReport {
            negatives_before: negatives.len(),
            positives_before: positives.len(),
            negatives_after,
            positives_after,
        };

        info!(
            negatives_before = report.negatives_before,
            positives_before = report.positives_before,
            rows_after = rows.len(),
            "Training split balanced"
        );

        Ok(BalancedSet {
            features: features.select_rows(&rows),
            labels: balanced_labels,
            report,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;
    use std::collections::HashSet;

    fn imbalanced() -> (EncodedFrame, Vec<u8>) {
        let values = Array2::from_shape_fn((10, 2), |(i, j)| (i * 10 + j) as f64);
        let frame = EncodedFrame::new(vec!["a".into(), "b".into()], values).unwrap();
        let labels = vec![0, 0, 1, 0, 0, 0, 1, 0, 0, 0];
        (frame, labels)
    }

    #[test]
    fn test_balance_equalizes_counts() {
        let (frame, labels) = imbalanced();
        let balanced = ClassBalancer::new(42).balance(&frame, &labels).unwrap();

        assert_eq!(balanced.features.n_rows(), 16);
        assert_eq!(balanced.labels.iter().filter(|&&l| l == 0).count(), 8);
        assert_eq!(balanced.labels.iter().filter(|&&l| l == 1).count(), 8);
        assert_eq!(balanced.report.positives_before, 2);
        assert_eq!(balanced.report.positives_after, 8);
    }

    #[test]
    fn test_oversampling_never_fabricates_rows() {
        let (frame, labels) = imbalanced();
        let balanced = ClassBalancer::new(42).balance(&frame, &labels).unwrap();

        let minority: HashSet<Vec<u64>> = [2usize, 6]
            .iter()
            .map(|&r| frame.row(r).iter().map(|v| v.to_bits()).collect())
            .collect();
        for (i, label) in balanced.labels.iter().enumerate() {
            if *label == 1 {
                let row: Vec<u64> = balanced.features.row(i).iter().map(|v| v.to_bits()).collect();
                assert!(minority.contains(&row));
            }
        }
    }

    #[test]
    fn test_balance_is_seeded() {
        let (frame, labels) = imbalanced();
        let a = ClassBalancer::new(1).balance(&frame, &labels).unwrap();
        let b = ClassBalancer::new(1).balance(&frame, &labels).unwrap();
        assert_eq!(a.features, b.features);
        assert_eq!(a.labels, b.labels);
    }

    #[test]
    fn test_negative_minority_is_oversampled() {
        let (frame, labels) = imbalanced();
        let flipped: Vec<u8> = labels.iter().map(|l| 1 - l).collect();
        let balanced = ClassBalancer::new(3).balance(&frame, &flipped).unwrap();
        assert_eq!(balanced.report.negatives_after, 8);
        assert_eq!(balanced.report.positives_after, 8);
    }

    #[test]
    fn test_tie_keeps_every_row_once() {
        let values = Array2::from_shape_fn((6, 1), |(i, _)| [0.0, 1.0, 10.0, 11.0, 12.0, 13.0][i]);
        let frame = EncodedFrame::new(vec!["x".into()], values).unwrap();
        let labels: Vec<u8> = vec![0, 0, 0, 1, 1, 1];
        let balanced = ClassBalancer::new(0).balance(&frame, &labels).unwrap();

        assert_eq!(balanced.features, frame);
        assert_eq!(balanced.labels, labels);
        assert_eq!(balanced.report.positives_after, 3);
        assert_eq!(balanced.report.negatives_after, 3);
    }

    #[test]
    fn test_missing_class_is_an_error() {
        let (frame, _) = imbalanced();
        let err = ClassBalancer::new(1).balance(&frame, &[0; 10]).unwrap_err();
        assert!(matches!(err, PipelineError::EmptyClass { label: 1, .. }));
    }
}
