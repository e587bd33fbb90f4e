//! Exact TreeSHAP attributions for the risk forest.
//!
//! Implements the path-dependent algorithm of Lundberg et al. (2020),
//! "From local explanations to global understanding with explainable AI
//! for trees". Attributions explain the high-risk probability: for every
//! record, `base_value + sum(contributions) == predict_proba(record)`.

use crate::models::classifier::TrainedModel;
use crate::models::forest::{DecisionTree, Node};
use crate::types::EncodedFrame;
use ndarray::{Array2, ArrayView1, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::debug;

/// Per-request explanation failures
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExplainError {
    #[error("cannot explain an empty sample")]
    EmptySample,

    #[error("sample columns do not match the trained schema: {0}")]
    SchemaMismatch(String),

    #[error("non-finite value in column `{column}` at record {record}")]
    NonFinite { record: usize, column: String },

    #[error("model has no trees")]
    EmptyModel,
}

/// Mean absolute contribution of one feature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureContribution {
    pub feature: String,
    pub mean_abs: f64,
}

/// Per-record, per-feature contributions for a sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribution {
    columns: Vec<String>,
    /// `[records x features]`
    values: Array2<f64>,
    base_value: f64,
}

impl Attribution {
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    /// Expected forest output with no feature known
    pub fn base_value(&self) -> f64 {
        self.base_value
    }

    pub fn n_records(&self) -> usize {
        self.values.nrows()
    }

    pub fn record(&self, index: usize) -> ArrayView1<'_, f64> {
        self.values.row(index)
    }

    /// Mean absolute contribution per feature, in schema order
    pub fn mean_abs(&self) -> Vec<f64> {
        if self.values.nrows() == 0 {
            return vec![0.0; self.columns.len()];
        }
        self.values
            .mapv(f64::abs)
            .mean_axis(Axis(0))
            .map(|m| m.to_vec())
            .unwrap_or_else(|| vec![0.0; self.columns.len()])
    }

    /// Top `top_n` features by mean absolute contribution, descending.
    /// Ties keep schema order.
    pub fn ranking(&self, top_n: usize) -> Vec<FeatureContribution> {
        let mut ranked: Vec<FeatureContribution> = self
            .columns
            .iter()
            .zip(self.mean_abs())
            .map(|(feature, mean_abs)| FeatureContribution {
                feature: feature.clone(),
                mean_abs,
            })
            .collect();
        ranked.sort_by(|a, b| b.mean_abs.partial_cmp(&a.mean_abs).unwrap_or(Ordering::Equal));
        ranked.truncate(top_n);
        ranked
    }

    /// Check `base + sum(row) == prediction` for every record within `tolerance`
    pub fn verify(&self, predictions: &[f64], tolerance: f64) -> bool {
        predictions.len() == self.n_records()
            && self
                .values
                .outer_iter()
                .zip(predictions)
                .all(|(row, p)| (self.base_value + row.sum() - p).abs() <= tolerance)
    }
}

/// Computes attributions against one trained model
#[derive(Debug, Clone, Copy)]
pub struct Explainer<'a> {
    model: &'a TrainedModel,
}

impl<'a> Explainer<'a> {
    pub fn new(model: &'a TrainedModel) -> Self {
        Self { model }
    }

    /// Expected model output, shared by every attribution
    pub fn base_value(&self) -> f64 {
        self.model.forest().expected_value()
    }

    /// Attribute every record of a schema-aligned sample.
    ///
    /// Works for any sample size from one record up; the result for a
    /// record does not depend on the rest of the sample.
    pub fn explain(&self, sample: &EncodedFrame) -> Result<Attribution, ExplainError> {
        let schema = self.model.schema();
        if sample.columns() != schema.columns() {
            let detail = schema
                .check(sample.columns(), crate::error::Stage::Explanation)
                .err()
                .map(|e| e.to_string())
                .unwrap_or_default();
            return Err(ExplainError::SchemaMismatch(detail));
        }
        if sample.is_empty() {
            return Err(ExplainError::EmptySample);
        }
        let forest = self.model.forest();
        if forest.n_trees() == 0 {
            return Err(ExplainError::EmptyModel);
        }
        if let Some(((record, column), _)) = sample
            .values()
            .indexed_iter()
            .find(|(_, v)| !v.is_finite())
        {
            return Err(ExplainError::NonFinite {
                record,
                column: sample.columns()[column].clone(),
            });
        }

        let n_features = sample.n_columns();
        let n_trees = forest.n_trees() as f64;
        let rows: Vec<Vec<f64>> = (0..sample.n_rows())
            .into_par_iter()
            .map(|i| {
                let row = sample.row(i);
                let mut phi = vec![0.0; n_features];
                for tree in forest.trees() {
                    tree_shap(tree, row, &mut phi);
                }
                phi.iter_mut().for_each(|v| *v /= n_trees);
                phi
            })
            .collect();

        let mut values = Array2::zeros((rows.len(), n_features));
        for (i, phi) in rows.iter().enumerate() {
            for (j, v) in phi.iter().enumerate() {
                values[[i, j]] = *v;
            }
        }

        debug!(
            records = values.nrows(),
            features = n_features,
            "Computed TreeSHAP attributions"
        );

        Ok(Attribution {
            columns: sample.columns().to_vec(),
            values,
            base_value: self.base_value(),
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct PathElement {
    feature: Option<usize>,
    zero_fraction: f64,
    one_fraction: f64,
    weight: f64,
}

/// Add one tree's contributions for `row` into `phi`
fn tree_shap(tree: &DecisionTree, row: ArrayView1<'_, f64>, phi: &mut [f64]) {
    recurse(tree, row, phi, 0, &[], 1.0, 1.0, None);
}

#[allow(clippy::too_many_arguments)]
fn recurse(
    tree: &DecisionTree,
    row: ArrayView1<'_, f64>,
    phi: &mut [f64],
    node: usize,
    parent_path: &[PathElement],
    zero_fraction: f64,
    one_fraction: f64,
    feature: Option<usize>,
) {
    let mut path = parent_path.to_vec();
    extend(&mut path, zero_fraction, one_fraction, feature);

    match tree.node(node) {
        Node::Leaf { value, .. } => {
            for i in 1..path.len() {
                let w = unwound_sum(&path, i);
                let el = path[i];
                if let Some(f) = el.feature {
                    phi[f] += w * (el.one_fraction - el.zero_fraction) * value;
                }
            }
        }
        Node::Split {
            feature: split,
            threshold,
            left,
            right,
            cover,
        } => {
            let (hot, cold) = if row[*split] <= *threshold {
                (*left, *right)
            } else {
                (*right, *left)
            };
            let hot_zero = tree.node(hot).cover() / cover;
            let cold_zero = tree.node(cold).cover() / cover;

            let mut incoming_zero = 1.0;
            let mut incoming_one = 1.0;
            if let Some(k) = path.iter().position(|e| e.feature == Some(*split)) {
                incoming_zero = path[k].zero_fraction;
                incoming_one = path[k].one_fraction;
                unwind(&mut path, k);
            }

            recurse(
                tree,
                row,
                phi,
                hot,
                &path,
                hot_zero * incoming_zero,
                incoming_one,
                Some(*split),
            );
            recurse(
                tree,
                row,
                phi,
                cold,
                &path,
                cold_zero * incoming_zero,
                0.0,
                Some(*split),
            );
        }
    }
}

fn extend(path: &mut Vec<PathElement>, zero_fraction: f64, one_fraction: f64, feature: Option<usize>) {
    let depth = path.len();
    path.push(PathElement {
        feature,
        zero_fraction,
        one_fraction,
        weight: if depth == 0 { 1.0 } else { 0.0 },
    });
    let scale = (depth + 1) as f64;
    for i in (0..depth).rev() {
        path[i + 1].weight += one_fraction * path[i].weight * (i + 1) as f64 / scale;
        path[i].weight = zero_fraction * path[i].weight * (depth - i) as f64 / scale;
    }
}

fn unwind(path: &mut Vec<PathElement>, index: usize) {
    let depth = path.len() - 1;
    let one = path[index].one_fraction;
    let zero = path[index].zero_fraction;
    let scale = (depth + 1) as f64;
    let mut next = path[depth].weight;

    for i in (0..depth).rev() {
        if one != 0.0 {
            let tmp = path[i].weight;
            path[i].weight = next * scale / ((i + 1) as f64 * one);
            next = tmp - path[i].weight * zero * (depth - i) as f64 / scale;
        } else {
            path[i].weight = path[i].weight * scale / (zero * (depth - i) as f64);
        }
    }

    for i in index..depth {
        path[i].feature = path[i + 1].feature;
        path[i].zero_fraction = path[i + 1].zero_fraction;
        path[i].one_fraction = path[i + 1].one_fraction;
    }
    path.pop();
}

fn unwound_sum(path: &[PathElement], index: usize) -> f64 {
    let depth = path.len() - 1;
    let one = path[index].one_fraction;
    let zero = path[index].zero_fraction;
    let mut next = path[depth].weight;
    let mut total = 0.0;

    if one != 0.0 {
        for i in (0..depth).rev() {
            let tmp = next / ((i + 1) as f64 * one);
            total += tmp;
            next = path[i].weight - tmp * zero * (depth - i) as f64;
        }
    } else {
        for i in (0..depth).rev() {
            total += path[i].weight / (zero * (depth - i) as f64);
        }
    }
    total * (depth + 1) as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::models::classifier::RiskClassifier;
    use crate::schema::{CategoricalColumns, EncodedSchema};
    use approx::assert_relative_eq;

    fn trained() -> (TrainedModel, EncodedFrame) {
        let columns: Vec<String> = ["driver", "minor", "constant"].map(String::from).to_vec();
        let values = Array2::from_shape_fn((80, 3), |(i, j)| match j {
            0 => (i % 40) as f64,
            1 => ((i * 13) % 7) as f64,
            _ => 1.0,
        });
        let labels: Vec<u8> = (0..80)
            .map(|i| ((i % 40) >= 28 || ((i * 13) % 7 == 6 && (i % 40) > 20)) as u8)
            .collect();
        let schema = EncodedSchema::new(columns.clone(), CategoricalColumns::new(vec![]));
        let frame = EncodedFrame::new(columns, values).unwrap();

        let mut config = AppConfig::default().model;
        config.n_estimators = 20;
        config.max_depth = 6;
        config.min_samples_leaf = 2;
        let model = RiskClassifier::new(&config)
            .train(&frame, &labels, &schema)
            .unwrap();
        (model, frame)
    }

    #[test]
    fn test_contributions_sum_to_prediction() {
        let (model, frame) = trained();
        let attribution = Explainer::new(&model).explain(&frame).unwrap();
        let predictions = model.predict_proba(&frame).unwrap();

        assert_eq!(attribution.n_records(), 80);
        assert!(attribution.verify(&predictions, 1e-9));
    }

    #[test]
    fn test_per_tree_contributions_are_additive() {
        let (model, frame) = trained();
        let tree = &model.forest().trees()[0];
        let row = frame.row(35);
        let mut phi = vec![0.0; 3];
        tree_shap(tree, row, &mut phi);
        assert_relative_eq!(
            tree.expected_value() + phi.iter().sum::<f64>(),
            tree.predict_row(row),
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_unused_feature_gets_zero() {
        let (model, frame) = trained();
        let attribution = Explainer::new(&model).explain(&frame).unwrap();
        assert!(attribution.values().column(2).iter().all(|v| *v == 0.0));
        assert_eq!(attribution.ranking(3)[0].feature, "driver");
    }

    #[test]
    fn test_single_record_matches_batch() {
        let (model, frame) = trained();
        let explainer = Explainer::new(&model);
        let batch = explainer.explain(&frame).unwrap();
        let single = explainer.explain(&frame.select_rows(&[7])).unwrap();

        assert_eq!(single.n_records(), 1);
        for (a, b) in single.record(0).iter().zip(batch.record(7).iter()) {
            assert_relative_eq!(*a, *b, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_ranking_ties_keep_schema_order() {
        let attribution = Attribution {
            columns: ["a", "b", "c"].map(String::from).to_vec(),
            values: ndarray::array![[0.1, -0.3, 0.3], [0.1, 0.3, -0.3]],
            base_value: 0.2,
        };
        let ranking = attribution.ranking(2);
        assert_eq!(ranking.len(), 2);
        assert_eq!(ranking[0].feature, "b");
        assert_eq!(ranking[1].feature, "c");
        assert_relative_eq!(ranking[0].mean_abs, 0.3);
    }

    #[test]
    fn test_empty_sample_and_misaligned_sample() {
        let (model, frame) = trained();
        let explainer = Explainer::new(&model);

        let empty = frame.select_rows(&[]);
        assert_eq!(explainer.explain(&empty).unwrap_err(), ExplainError::EmptySample);

        let narrow = frame.without_columns(&["minor"]);
        assert!(matches!(
            explainer.explain(&narrow),
            Err(ExplainError::SchemaMismatch(_))
        ));
    }
}
