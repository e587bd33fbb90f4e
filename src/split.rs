//! Stratified train/test split.

use crate::error::{PipelineError, PipelineResult, Stage};
use crate::types::EncodedFrame;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::info;

/// Row partition of an encoded frame
#[derive(Debug, Clone)]
pub struct TrainTestSplit {
    pub train: EncodedFrame,
    pub train_labels: Vec<u8>,
    pub test: EncodedFrame,
    pub test_labels: Vec<u8>,
    /// Original row positions of the test rows
    pub test_rows: Vec<usize>,
}

/// Hold out `test_size` of each class, shuffled with a seeded RNG.
///
/// Per class, `round(n_class * test_size)` rows go to the test split, so
/// both splits keep the label ratio of the full set.
pub fn stratified_split(
    features: &EncodedFrame,
    labels: &[u8],
    test_size: f64,
    seed: u64,
) -> PipelineResult<TrainTestSplit> {
    if !(0.0..1.0).contains(&test_size) {
        return Err(PipelineError::InvalidParameter {
            stage: Stage::Split,
            message: format!("test size must be in [0, 1), got {test_size}"),
        });
    }
    if labels.len() != features.n_rows() {
        return Err(PipelineError::InvalidParameter {
            stage: Stage::Split,
            message: format!(
                "{} labels for {} rows",
                labels.len(),
                features.n_rows()
            ),
        });
    }
    if labels.is_empty() {
        return Err(PipelineError::EmptyDataset { stage: Stage::Split });
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut train_rows = Vec::new();
    let mut test_rows = Vec::new();

    for class in [0u8, 1u8] {
        let mut rows: Vec<usize> = labels
            .iter()
            .enumerate()
            .filter(|(_, &l)| l == class)
            .map(|(i, _)| i)
            .collect();
        rows.shuffle(&mut rng);
        let n_test = (rows.len() as f64 * test_size).round() as usize;
        test_rows.extend_from_slice(&rows[..n_test]);
        train_rows.extend_from_slice(&rows[n_test..]);
    }

    train_rows.shuffle(&mut rng);
    test_rows.shuffle(&mut rng);

    info!(
        train = train_rows.len(),
        test = test_rows.len(),
        test_size,
        "Stratified split complete"
    );

    Ok(TrainTestSplit {
        train: features.select_rows(&train_rows),
        train_labels: train_rows.iter().map(|&r| labels[r]).collect(),
        test: features.select_rows(&test_rows),
        test_labels: test_rows.iter().map(|&r| labels[r]).collect(),
        test_rows,
    })
}
