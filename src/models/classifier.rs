//! Supervised high-risk classifier bound to its training schema

use crate::config::ModelConfig;
use crate::error::{PipelineError, PipelineResult, Stage};
use crate::models::forest::{RandomForest, TreeParams};
use crate::schema::EncodedSchema;
use crate::types::prediction::label_for_probability;
use crate::types::EncodedFrame;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::info;

/// Label and probability for one scored record
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassScore {
    pub label: u8,
    pub probability: f64,
}

/// Split count of one encoded feature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureImportance {
    pub feature: String,
    pub splits: usize,
}

/// Trains `TrainedModel`s with cost-sensitive class weights
#[derive(Debug, Clone)]
pub struct RiskClassifier {
    n_estimators: usize,
    max_depth: usize,
    min_samples_leaf: usize,
    class_weights: [f64; 2],
    seed: u64,
}

impl RiskClassifier {
    pub fn new(config: &ModelConfig) -> Self {
        Self {
            n_estimators: config.n_estimators,
            max_depth: config.max_depth,
            min_samples_leaf: config.min_samples_leaf,
            class_weights: [config.negative_weight, config.positive_weight],
            seed: config.seed,
        }
    }

    /// Fit a forest on a balanced, encoded training set.
    ///
    /// `features` must carry exactly the columns of `schema`.
    pub fn train(
        &self,
        features: &EncodedFrame,
        labels: &[u8],
        schema: &EncodedSchema,
    ) -> PipelineResult<TrainedModel> {
        schema.check(features.columns(), Stage::Training)?;
        if features.is_empty() {
            return Err(PipelineError::EmptyDataset {
                stage: Stage::Training,
            });
        }
        if labels.len() != features.n_rows() {
            return Err(PipelineError::InvalidParameter {
                stage: Stage::Training,
                message: format!("{} labels for {} rows", labels.len(), features.n_rows()),
            });
        }
        for label in [0u8, 1u8] {
            if !labels.contains(&label) {
                return Err(PipelineError::EmptyClass {
                    stage: Stage::Training,
                    label,
                });
            }
        }
        if self.n_estimators == 0 {
            return Err(PipelineError::InvalidParameter {
                stage: Stage::Training,
                message: "n_estimators must be at least 1".to_string(),
            });
        }

        let params = TreeParams {
            max_depth: self.max_depth,
            min_samples_leaf: self.min_samples_leaf,
            max_features: (features.n_columns() as f64).sqrt().ceil() as usize,
            class_weights: self.class_weights,
        };

        let start = Instant::now();
        let forest = RandomForest::fit(
            features.values().view(),
            labels,
            self.n_estimators,
            params,
            self.seed,
        );

        info!(
            trees = forest.n_trees(),
            rows = features.n_rows(),
            features = features.n_columns(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Risk classifier trained"
        );

        Ok(TrainedModel {
            schema: schema.clone(),
            forest,
            trained_at: Utc::now(),
        })
    }
}

/// A fitted forest together with the schema it was trained on.
///
/// Immutable after training; every prediction path checks the input
/// columns against `schema` and never pads or reorders on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedModel {
    schema: EncodedSchema,
    forest: RandomForest,
    trained_at: DateTime<Utc>,
}

impl TrainedModel {
    pub fn schema(&self) -> &EncodedSchema {
        &self.schema
    }

    pub fn forest(&self) -> &RandomForest {
        &self.forest
    }

    pub fn trained_at(&self) -> DateTime<Utc> {
        self.trained_at
    }

    /// High-risk probability per record
    pub fn predict_proba(&self, frame: &EncodedFrame) -> PipelineResult<Vec<f64>> {
        self.schema.check(frame.columns(), Stage::Scoring)?;
        Ok(self.forest.predict_proba(frame.values().view()))
    }

    /// Label and probability per record
    pub fn predict(&self, frame: &EncodedFrame) -> PipelineResult<Vec<ClassScore>> {
        Ok(self
            .predict_proba(frame)?
            .into_iter()
            .map(|probability| ClassScore {
                label: label_for_probability(probability),
                probability,
            })
            .collect())
    }

    /// Features ranked by how often the forest splits on them
    pub fn feature_importance(&self) -> Vec<FeatureImportance> {
        let mut importance: Vec<FeatureImportance> = self
            .schema
            .columns()
            .iter()
            .zip(self.forest.split_counts())
            .map(|(feature, splits)| FeatureImportance {
                feature: feature.clone(),
                splits,
            })
            .collect();
        importance.sort_by(|a, b| b.splits.cmp(&a.splits));
        importance
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::schema::CategoricalColumns;
    use ndarray::Array2;

    fn training_set() -> (EncodedFrame, Vec<u8>, EncodedSchema) {
        let columns: Vec<String> = ["amount_band", "noise"].map(String::from).to_vec();
        let values = Array2::from_shape_fn((60, 2), |(i, j)| {
            if j == 0 {
                (i % 30) as f64
            } else {
                ((i * 7) % 5) as f64
            }
        });
        let labels = (0..60).map(|i| ((i % 30) >= 20) as u8).collect();
        let schema = EncodedSchema::new(columns.clone(), CategoricalColumns::new(vec![]));
        (EncodedFrame::new(columns, values).unwrap(), labels, schema)
    }

    fn classifier() -> RiskClassifier {
        let mut config = AppConfig::default().model;
        config.n_estimators = 15;
        config.min_samples_leaf = 1;
        RiskClassifier::new(&config)
    }

    #[test]
    fn test_train_and_predict() {
        let (frame, labels, schema) = training_set();
        let model = classifier().train(&frame, &labels, &schema).unwrap();
        let scores = model.predict(&frame).unwrap();

        assert_eq!(scores.len(), 60);
        let correct = scores
            .iter()
            .zip(&labels)
            .filter(|(s, &l)| s.label == l)
            .count();
        assert!(correct >= 55, "only {correct} of 60 correct");
        assert_eq!(model.feature_importance()[0].feature, "amount_band");
    }

    #[test]
    fn test_predict_rejects_misaligned_frame() {
        let (frame, labels, schema) = training_set();
        let model = classifier().train(&frame, &labels, &schema).unwrap();

        let reordered = EncodedFrame::new(
            vec!["noise".to_string(), "amount_band".to_string()],
            frame.values().clone(),
        )
        .unwrap();
        let err = model.predict(&reordered).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::SchemaMismatch {
                stage: Stage::Scoring,
                ..
            }
        ));

        let narrow = frame.without_columns(&["noise"]);
        assert!(model.predict_proba(&narrow).is_err());
    }

    #[test]
    fn test_train_requires_both_classes() {
        let (frame, _, schema) = training_set();
        let err = classifier().train(&frame, &[0; 60], &schema).unwrap_err();
        assert!(matches!(err, PipelineError::EmptyClass { label: 1, .. }));
    }

    #[test]
    fn test_training_is_deterministic() {
        let (frame, labels, schema) = training_set();
        let a = classifier().train(&frame, &labels, &schema).unwrap();
        let b = classifier().train(&frame, &labels, &schema).unwrap();
        assert_eq!(a.forest(), b.forest());
    }
}
