//! Claim Risk Pipeline Library
//!
//! Batch training and explainability pipeline for insurance claim risk:
//! feature engineering, customer segmentation, a class-weighted random
//! forest, gated model persistence and exact tree attributions.

pub mod alignment;
pub mod balancer;
pub mod config;
pub mod encoder;
pub mod error;
pub mod evaluation;
pub mod explain;
pub mod export;
pub mod feature_engineer;
pub mod insights;
pub mod models;
pub mod pipeline;
pub mod prediction_log;
pub mod schema;
pub mod scoring;
pub mod segmentation;
pub mod split;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod types;

pub use config::AppConfig;
pub use error::{PipelineError, PipelineResult, Stage};
pub use explain::{Attribution, ExplainError, Explainer};
pub use models::{ModelStore, RiskClassifier, TrainedModel};
pub use pipeline::{Pipeline, RunOutput};
pub use scoring::{PolicyInput, ScoringContext};
pub use types::{EncodedFrame, RiskPrediction, Table};
