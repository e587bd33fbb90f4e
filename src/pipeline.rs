//! End-to-end training run.
//!
//! Stages run strictly in order and each consumes the previous stage's
//! output by value; the first failing stage aborts the run with its
//! stage-tagged error, so nothing downstream sees partial state.

use crate::balancer::{BalanceReport, ClassBalancer};
use crate::config::AppConfig;
use crate::encoder::Encoder;
use crate::error::{PipelineResult, Stage};
use crate::evaluation::{ClassificationReport, Evaluator, PersistenceGate};
use crate::explain::{Attribution, ExplainError, Explainer, FeatureContribution};
use crate::feature_engineer::{EngineeredData, FeatureEngineer};
use crate::insights::{Kpis, RiskBreakdown};
use crate::models::{ClassScore, ModelStore, PersistOutcome, RiskClassifier, TrainedModel};
use crate::schema::EncodedSchema;
use crate::scoring::ScoringContext;
use crate::segmentation::{SegmentAssigner, SegmentModel};
use crate::split::stratified_split;
use crate::types::{EncodedFrame, Table};
use std::time::Instant;
use tracing::{info, warn};

/// Everything a run produces
#[derive(Debug, Clone)]
pub struct RunOutput {
    /// Engineered table with the segment column appended
    pub engineered: EngineeredData,
    pub segments: SegmentModel,
    pub schema: EncodedSchema,
    pub balance: BalanceReport,
    pub test_features: EncodedFrame,
    pub test_labels: Vec<u8>,
    pub test_predictions: Vec<ClassScore>,
    pub report: ClassificationReport,
    pub persisted: PersistOutcome,
    /// Attribution over the sampled held-out records
    pub attribution: Result<Attribution, ExplainError>,
    pub breakdown: RiskBreakdown,
    pub summary: RunSummary,
    /// Trained model and encoder, ready for interactive scoring
    pub scoring: ScoringContext,
}

impl RunOutput {
    pub fn model(&self) -> &TrainedModel {
        self.scoring.model()
    }

    pub fn table(&self) -> &Table {
        &self.engineered.table
    }

    pub fn predicted_labels(&self) -> Vec<u8> {
        self.test_predictions.iter().map(|s| s.label).collect()
    }
}

/// Headline results of a run
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub kpis: Kpis,
    pub recall: f64,
    pub precision: f64,
    pub model_saved: bool,
    pub top_features: Vec<FeatureContribution>,
    pub elapsed_ms: u64,
}

impl RunSummary {
    pub fn log_summary(&self) {
        info!("╔══════════════════════════════════════════════════════════════╗");
        info!("║             CLAIM RISK PIPELINE - RUN SUMMARY                ║");
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!(
            "║ Total Policies: {:>8}  │  High Risk: {:>6.1}%              ║",
            self.kpis.total_policies, self.kpis.high_risk_percent
        );
        info!(
            "║ Model AUC:      {:>8.3}  │  Missing Values Imputed: {:>6} ║",
            self.kpis.auc, self.kpis.missing_values_imputed
        );
        info!(
            "║ Recall (High):  {:>8.3}  │  Precision (High): {:>8.3}    ║",
            self.recall, self.precision
        );
        info!(
            "║ Model Saved: {:>5}  │  Elapsed: {:>8} ms                    ║",
            self.model_saved, self.elapsed_ms
        );
        if !self.top_features.is_empty() {
            info!("╠══════════════════════════════════════════════════════════════╣");
            info!("║ Top Features (mean |SHAP|):                                  ║");
            for contribution in &self.top_features {
                info!(
                    "║   {:<40} {:>10.4}         ║",
                    contribution.feature, contribution.mean_abs
                );
            }
        }
        info!("╚══════════════════════════════════════════════════════════════╝");
    }
}

/// Runs every stage from raw records to an evaluated, explained model
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: AppConfig,
}

impl Pipeline {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Load the configured dataset and check the required columns
    pub fn load_dataset(&self) -> PipelineResult<Table> {
        let table = Table::from_csv_path(&self.config.data.path)?;
        table.require_columns(&self.config.data.required_columns, Stage::Ingestion)?;
        Ok(table)
    }

    pub fn run(&self, raw: &Table) -> PipelineResult<RunOutput> {
        let start = Instant::now();
        let config = &self.config;
        let data = &config.data;

        raw.require_columns(&data.required_columns, Stage::Ingestion)?;
        info!(rows = raw.n_rows(), columns = raw.n_columns(), "Starting pipeline run");

        let mut engineered = FeatureEngineer::new(data).engineer(raw)?;

        let (segmented, segments) =
            SegmentAssigner::new(&config.segmentation, data).fit_assign(&engineered.table)?;
        engineered.table = segmented;

        let encoder = Encoder::discover(&engineered.table, data);
        let encoded = encoder.fit(&engineered.table)?;

        let split = stratified_split(
            &encoded.features,
            &encoded.labels,
            config.model.test_size,
            config.model.seed,
        )?;
        let balanced =
            ClassBalancer::new(config.model.seed).balance(&split.train, &split.train_labels)?;

        let model = RiskClassifier::new(&config.model).train(
            &balanced.features,
            &balanced.labels,
            &encoded.schema,
        )?;

        let test_predictions = model.predict(&split.test)?;
        let predicted: Vec<u8> = test_predictions.iter().map(|s| s.label).collect();
        let scores: Vec<f64> = test_predictions.iter().map(|s| s.probability).collect();
        let report = Evaluator::new().evaluate(&split.test_labels, &predicted, &scores)?;
        report.log_report();

        let store = ModelStore::new(
            &config.evaluation.model_path,
            PersistenceGate::new(config.evaluation.recall_threshold),
        );
        let persisted = store.persist_if_passing(&model, &report)?;

        let sample = split
            .test
            .sample(config.explain.sample_size, config.explain.seed);
        let attribution = Explainer::new(&model).explain(&sample);
        let top_features = match &attribution {
            Ok(attribution) => attribution.ranking(config.explain.top_n),
            Err(e) => {
                warn!(error = %e, "Global attribution unavailable");
                Vec::new()
            }
        };

        let kpis = Kpis::compute(
            &engineered.table,
            &data.label_column,
            report.auc(),
            engineered.missing_values,
        )?;
        let breakdown = RiskBreakdown::compute(&engineered.table, data)?;

        let summary = RunSummary {
            kpis,
            recall: report.recall(),
            precision: report.positive.precision,
            model_saved: persisted.is_saved(),
            top_features,
            elapsed_ms: start.elapsed().as_millis() as u64,
        };

        let scoring = ScoringContext::new(model, encoder, &engineered.table, data, &config.explain);

        info!(
            recall = summary.recall,
            auc = report.auc(),
            model_saved = summary.model_saved,
            elapsed_ms = summary.elapsed_ms,
            "Pipeline run complete"
        );

        Ok(RunOutput {
            engineered,
            segments,
            schema: encoded.schema,
            balance: balanced.report,
            test_features: split.test,
            test_labels: split.test_labels,
            test_predictions,
            report,
            persisted,
            attribution,
            breakdown,
            summary,
            scoring,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use crate::testing::SyntheticDataset;

    fn config(dir: &tempfile::TempDir) -> AppConfig {
        let mut config = AppConfig::default();
        config.model.n_estimators = 15;
        config.evaluation.model_path = dir.path().join("rf_model.json").display().to_string();
        config
    }

    #[test]
    fn test_run_produces_consistent_output() {
        let dir = tempfile::tempdir().unwrap();
        let raw = SyntheticDataset::new(250, 3).table().unwrap();
        let output = Pipeline::new(config(&dir)).run(&raw).unwrap();

        assert_eq!(output.balance.negatives_after, output.balance.positives_after);
        assert_eq!(output.test_predictions.len(), output.test_labels.len());
        assert_eq!(output.test_features.columns(), output.schema.columns());
        assert!(output.table().contains("customer_segment"));
        assert!(!output.table().contains("claim_date"));
        assert_eq!(output.summary.kpis.total_policies, 250);
        assert_eq!(
            output.persisted.is_saved(),
            dir.path().join("rf_model.json").exists()
        );
        assert!(output.attribution.is_ok());
    }

    #[test]
    fn test_missing_required_column_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let raw = SyntheticDataset::new(50, 3).table().unwrap().without_columns(&["claim_date"]);
        let err = Pipeline::new(config(&dir)).run(&raw).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::MissingColumn {
                stage: Stage::Ingestion,
                ..
            }
        ));
    }
}
