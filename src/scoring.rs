//! Interactive scoring of single policies and ad hoc slices.
//!
//! Inputs go through the same encoder the model was trained with and are
//! then aligned to the trained schema, so a record carrying only a subset
//! of categories (or unseen ones) still scores against the full feature
//! space.

use crate::alignment::SchemaAligner;
use crate::config::{DataConfig, ExplainConfig};
use crate::encoder::Encoder;
use crate::error::{PipelineError, PipelineResult, Stage};
use crate::explain::{Attribution, Explainer, FeatureContribution};
use crate::feature_engineer::FeatureEngineer;
use crate::models::classifier::{ClassScore, TrainedModel};
use crate::types::{Column, ColumnData, EncodedFrame, RiskPrediction, Table};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Date used for the derived date parts of a fresh input
const DEFAULT_DATE_PARTS: [f64; 3] = [2020.0, 6.0, 15.0];

/// Value of one input field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InputValue {
    Number(f64),
    Text(String),
}

/// One policy to score, as ordered field/value pairs
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PolicyInput {
    fields: Vec<(String, InputValue)>,
}

impl PolicyInput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fields(&self) -> &[(String, InputValue)] {
        &self.fields
    }

    pub fn get(&self, name: &str) -> Option<&InputValue> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Set a field, replacing an existing value in place
    pub fn set(&mut self, name: impl Into<String>, value: InputValue) -> &mut Self {
        let name = name.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => *existing = value,
            None => self.fields.push((name, value)),
        }
        self
    }

    pub fn set_number(&mut self, name: impl Into<String>, value: f64) -> &mut Self {
        self.set(name, InputValue::Number(value))
    }

    pub fn set_text(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.set(name, InputValue::Text(value.into()))
    }

    /// Single-row table holding the input fields
    pub fn to_table(&self) -> PipelineResult<Table> {
        let columns = self
            .fields
            .iter()
            .map(|(name, value)| match value {
                InputValue::Number(v) => Column::numeric(name.clone(), vec![Some(*v)]),
                InputValue::Text(v) => Column::text(name.clone(), vec![Some(v.clone())]),
            })
            .collect();
        Table::new(columns)
    }
}

/// Everything needed to score and explain records after a training run
#[derive(Debug, Clone)]
pub struct ScoringContext {
    model: TrainedModel,
    engineer: FeatureEngineer,
    encoder: Encoder,
    template: PolicyInput,
    explain: ExplainConfig,
}

impl ScoringContext {
    /// Bind a trained model to its encoder. `training` is the engineered,
    /// segmented table the model was fitted on; it seeds the input template.
    pub fn new(
        model: TrainedModel,
        encoder: Encoder,
        training: &Table,
        data: &DataConfig,
        explain: &ExplainConfig,
    ) -> Self {
        let template = build_template(training, &encoder, data);
        Self {
            model,
            engineer: FeatureEngineer::new(data),
            encoder,
            template,
            explain: explain.clone(),
        }
    }

    pub fn model(&self) -> &TrainedModel {
        &self.model
    }

    pub fn encoder(&self) -> &Encoder {
        &self.encoder
    }

    /// Default input: numeric fields at the training mean, categorical
    /// fields at their most frequent value, date parts at 2020-06-15
    pub fn input_template(&self) -> PolicyInput {
        self.template.clone()
    }

    /// Expand raw date columns, encode, and align to the trained schema.
    ///
    /// Derived date parts already present are kept; a raw date column
    /// replaces them, and an unparseable date fails with `DateParse`.
    pub fn encode_aligned(&self, table: &Table) -> PipelineResult<EncodedFrame> {
        let expanded = self.engineer.expand_dates(table)?;
        let encoded = self.encoder.encode_features(&expanded)?;
        Ok(SchemaAligner::new(self.model.schema()).align(&encoded))
    }

    /// Score one policy
    pub fn score_input(&self, input: &PolicyInput) -> PipelineResult<RiskPrediction> {
        let frame = self.encode_aligned(&input.to_table()?)?;
        let probability = self
            .model
            .predict_proba(&frame)?
            .first()
            .copied()
            .ok_or(PipelineError::EmptyDataset {
                stage: Stage::Scoring,
            })?;
        let prediction = RiskPrediction::from_probability(probability);

        info!(
            prediction_id = %prediction.prediction_id,
            prediction = prediction.risk_level.as_str(),
            probability,
            "Policy scored"
        );
        Ok(prediction)
    }

    /// Bulk re-scoring of an engineered table
    pub fn score_table(&self, table: &Table) -> PipelineResult<Vec<ClassScore>> {
        let frame = self.encode_aligned(table)?;
        self.model.predict(&frame)
    }

    /// Attribution for a single policy
    pub fn explain_input(&self, input: &PolicyInput) -> PipelineResult<Attribution> {
        let frame = self.encode_aligned(&input.to_table()?)?;
        Ok(Explainer::new(&self.model).explain(&frame)?)
    }

    /// Top contributors over every row of an engineered table
    pub fn explain_table(&self, table: &Table) -> PipelineResult<Vec<FeatureContribution>> {
        let frame = self.encode_aligned(table)?;
        let attribution = Explainer::new(&self.model).explain(&frame)?;
        debug!(rows = table.n_rows(), "Explained table slice");
        Ok(attribution.ranking(self.explain.top_n))
    }
}

fn build_template(training: &Table, encoder: &Encoder, data: &DataConfig) -> PolicyInput {
    let mut input = PolicyInput::new();
    let mut date_parts: BTreeMap<String, f64> = BTreeMap::new();
    for date in &data.date_columns {
        for (name, value) in FeatureEngineer::date_feature_names(date)
            .into_iter()
            .zip(DEFAULT_DATE_PARTS)
        {
            date_parts.insert(name, value);
        }
    }

    for column in training.columns() {
        let name = column.name.as_str();
        if name == data.amount_column || name == data.label_column {
            continue;
        }
        if let Some(part) = date_parts.get(name) {
            input.set_number(name, *part);
            continue;
        }
        match &column.data {
            ColumnData::Numeric(values) if !encoder.categorical().contains(name) => {
                let present: Vec<f64> = values.iter().flatten().copied().collect();
                let mean = if present.is_empty() {
                    0.0
                } else {
                    present.iter().sum::<f64>() / present.len() as f64
                };
                input.set_number(name, mean);
            }
            ColumnData::Numeric(values) => {
                let cells: Vec<String> = values.iter().flatten().map(|v| v.to_string()).collect();
                if let Some(mode) = most_frequent(cells.iter().map(String::as_str)) {
                    input.set_text(name, mode);
                }
            }
            ColumnData::Text(values) => {
                if let Some(mode) = most_frequent(values.iter().flatten().map(String::as_str)) {
                    input.set_text(name, mode);
                }
            }
        }
    }
    input
}

/// Most frequent value; ties go to the smallest value
fn most_frequent<'a, I: Iterator<Item = &'a str>>(values: I) -> Option<String> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for value in values {
        *counts.entry(value).or_insert(0) += 1;
    }
    let best = counts.values().copied().max()?;
    counts
        .into_iter()
        .find(|(_, c)| *c == best)
        .map(|(v, _)| v.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::pipeline::Pipeline;
    use crate::testing::SyntheticDataset;

    fn context() -> ScoringContext {
        let mut config = AppConfig::default();
        config.model.n_estimators = 20;
        let dir = tempfile::tempdir().unwrap();
        config.evaluation.model_path = dir.path().join("model.json").display().to_string();
        let raw = SyntheticDataset::new(300, 11).table().unwrap();
        Pipeline::new(config).run(&raw).unwrap().scoring
    }

    #[test]
    fn test_most_frequent_breaks_ties_low() {
        assert_eq!(most_frequent(["b", "a", "b", "a"].into_iter()), Some("a".to_string()));
        assert_eq!(most_frequent(["x", "y", "y"].into_iter()), Some("y".to_string()));
        assert_eq!(most_frequent(std::iter::empty()), None);
    }

    #[test]
    fn test_template_has_defaults() {
        let template = context().input_template();
        assert_eq!(
            template.get("claim_date_year"),
            Some(&InputValue::Number(2020.0))
        );
        assert_eq!(
            template.get("policy_start_date_day"),
            Some(&InputValue::Number(15.0))
        );
        assert!(matches!(template.get("location"), Some(InputValue::Text(_))));
        assert!(matches!(template.get("age"), Some(InputValue::Number(_))));
        assert!(template.get("claim_amount_SZL").is_none());
        assert!(template.get("claim_risk").is_none());
    }

    #[test]
    fn test_score_template_and_unknown_category() {
        let context = context();
        let prediction = context.score_input(&context.input_template()).unwrap();
        assert!((0.0..=1.0).contains(&prediction.probability));

        let mut unseen = context.input_template();
        unseen.set_text("location", "Atlantis");
        let prediction = context.score_input(&unseen).unwrap();
        assert!((0.0..=1.0).contains(&prediction.probability));
    }

    #[test]
    fn test_partial_input_scores() {
        let context = context();
        let mut partial = PolicyInput::new();
        partial.set_text("claim_type", "Theft");
        let prediction = context.score_input(&partial).unwrap();
        assert_eq!(prediction.label, u8::from(prediction.probability > 0.5));
    }

    #[test]
    fn test_raw_date_is_expanded_before_encoding() {
        let context = context();
        let mut raw = context.input_template();
        raw.set_text("claim_date", "2023-05-01");
        let frame = context.encode_aligned(&raw.to_table().unwrap()).unwrap();

        let value = |name: &str| frame.column(name).unwrap()[0];
        assert_eq!(value("claim_date_year"), 2023.0);
        assert_eq!(value("claim_date_month"), 5.0);
        assert_eq!(value("claim_date_day"), 1.0);

        let mut parts = context.input_template();
        parts
            .set_number("claim_date_year", 2023.0)
            .set_number("claim_date_month", 5.0)
            .set_number("claim_date_day", 1.0);
        assert_eq!(
            context.score_input(&raw).unwrap().probability,
            context.score_input(&parts).unwrap().probability
        );
    }

    #[test]
    fn test_unparseable_input_date_is_rejected() {
        let context = context();
        let mut input = context.input_template();
        input.set_text("claim_date", "sometime last spring");
        let err = context.score_input(&input).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::DateParse { ref column, .. } if column == "claim_date"
        ));
    }

    #[test]
    fn test_explain_input_single_record() {
        let context = context();
        let input = context.input_template();
        let attribution = context.explain_input(&input).unwrap();
        let probability = context.score_input(&input).unwrap().probability;

        assert_eq!(attribution.n_records(), 1);
        assert!(attribution.verify(&[probability], 1e-9));
        assert_eq!(attribution.ranking(5).len(), 5);
    }
}
