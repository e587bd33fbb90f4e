//! Configuration management for the claim risk pipeline

use anyhow::{Context, Result};
use config::{Config, File};
use serde::Deserialize;
use std::path::Path;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub data: DataConfig,
    pub segmentation: SegmentationConfig,
    pub model: ModelConfig,
    pub evaluation: EvaluationConfig,
    pub explain: ExplainConfig,
    pub output: OutputConfig,
    pub logging: LoggingConfig,
}

/// Input dataset layout
#[derive(Debug, Clone, Deserialize)]
pub struct DataConfig {
    /// CSV file holding the policy/claim records
    pub path: String,
    /// Raw claim amount column the label is derived from
    #[serde(default = "default_amount_column")]
    pub amount_column: String,
    /// Name of the derived binary label
    #[serde(default = "default_label_column")]
    pub label_column: String,
    /// Quantile of the claim amount at which a claim becomes high risk
    #[serde(default = "default_label_quantile")]
    pub label_quantile: f64,
    /// Date columns expanded into year/month/day features
    #[serde(default = "default_date_columns")]
    pub date_columns: Vec<String>,
    /// Categorical columns always one-hot encoded (others are discovered)
    #[serde(default = "default_categorical_columns")]
    pub categorical_columns: Vec<String>,
    /// Columns that must be present at ingestion
    #[serde(default = "default_required_columns")]
    pub required_columns: Vec<String>,
    /// Column the segment id is written to
    #[serde(default = "default_segment_column")]
    pub segment_column: String,
}

fn default_amount_column() -> String {
    "claim_amount_SZL".to_string()
}

fn default_label_column() -> String {
    "claim_risk".to_string()
}

fn default_label_quantile() -> f64 {
    0.75
}

fn default_date_columns() -> Vec<String> {
    vec!["policy_start_date".to_string(), "claim_date".to_string()]
}

fn default_categorical_columns() -> Vec<String> {
    [
        "claim_type",
        "gender",
        "location",
        "policy_type",
        "insurance_provider",
        "customer_segment",
    ]
    .iter()
    .map(|c| c.to_string())
    .collect()
}

fn default_required_columns() -> Vec<String> {
    [
        "claim_amount_SZL",
        "claim_type",
        "gender",
        "location",
        "policy_type",
        "insurance_provider",
        "policy_start_date",
        "claim_date",
        "Latitude",
        "Longitude",
    ]
    .iter()
    .map(|c| c.to_string())
    .collect()
}

fn default_segment_column() -> String {
    "customer_segment".to_string()
}

/// Customer segmentation (k-means) settings
#[derive(Debug, Clone, Deserialize)]
pub struct SegmentationConfig {
    pub clusters: usize,
    #[serde(default = "default_max_iter")]
    pub max_iter: usize,
    #[serde(default = "default_n_init")]
    pub n_init: usize,
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
    pub seed: u64,
}

fn default_max_iter() -> usize {
    300
}

fn default_n_init() -> usize {
    10
}

fn default_tolerance() -> f64 {
    1e-4
}

/// Random forest and split settings
#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    pub n_estimators: usize,
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    /// Misclassification weight of low-risk rows
    pub negative_weight: f64,
    /// Misclassification weight of high-risk rows
    pub positive_weight: f64,
    /// Fraction of rows held out for evaluation
    pub test_size: f64,
    pub seed: u64,
}

/// Evaluation and persistence gate settings
#[derive(Debug, Clone, Deserialize)]
pub struct EvaluationConfig {
    /// Positive-class recall a model must exceed to be saved
    pub recall_threshold: f64,
    /// Where the model snapshot is written
    pub model_path: String,
}

/// Explainability settings
#[derive(Debug, Clone, Deserialize)]
pub struct ExplainConfig {
    /// Records sampled from the held-out set for the global ranking
    pub sample_size: usize,
    /// Features kept in the ranked attribution table
    pub top_n: usize,
    pub seed: u64,
}

/// Output locations
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    pub dir: String,
    #[serde(default = "default_prediction_log")]
    pub prediction_log: String,
}

fn default_prediction_log() -> String {
    "prediction_log.csv".to_string()
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (json, pretty)
    pub format: String,
}

impl AppConfig {
    /// Load configuration from file
    pub fn load() -> Result<Self> {
        Self::load_from_path("config/config.toml")
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from(path.as_ref()))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data: DataConfig {
                path: "data/eswatini_insurance_final_dataset.csv".to_string(),
                amount_column: default_amount_column(),
                label_column: default_label_column(),
                label_quantile: default_label_quantile(),
                date_columns: default_date_columns(),
                categorical_columns: default_categorical_columns(),
                required_columns: default_required_columns(),
                segment_column: default_segment_column(),
            },
            segmentation: SegmentationConfig {
                clusters: 4,
                max_iter: default_max_iter(),
                n_init: default_n_init(),
                tolerance: default_tolerance(),
                seed: 42,
            },
            model: ModelConfig {
                n_estimators: 300,
                max_depth: 15,
                min_samples_leaf: 5,
                negative_weight: 1.0,
                positive_weight: 2.5,
                test_size: 0.2,
                seed: 42,
            },
            evaluation: EvaluationConfig {
                recall_threshold: 0.39,
                model_path: "models/rf_model.json".to_string(),
            },
            explain: ExplainConfig {
                sample_size: 50,
                top_n: 5,
                seed: 42,
            },
            output: OutputConfig {
                dir: "output".to_string(),
                prediction_log: default_prediction_log(),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        }
    }
}
