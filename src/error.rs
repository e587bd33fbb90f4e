//! Stage-tagged error types for the risk pipeline

use std::fmt;

pub type PipelineResult<T> = Result<T, PipelineError>;

/// Pipeline stage that produced an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Ingestion,
    FeatureEngineering,
    Segmentation,
    Encoding,
    Split,
    Balancing,
    Training,
    Evaluation,
    Persistence,
    Alignment,
    Scoring,
    Explanation,
    PredictionLog,
    Export,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Ingestion => "ingestion",
            Stage::FeatureEngineering => "feature engineering",
            Stage::Segmentation => "segmentation",
            Stage::Encoding => "encoding",
            Stage::Split => "train/test split",
            Stage::Balancing => "class balancing",
            Stage::Training => "training",
            Stage::Evaluation => "evaluation",
            Stage::Persistence => "persistence",
            Stage::Alignment => "schema alignment",
            Stage::Scoring => "scoring",
            Stage::Explanation => "explanation",
            Stage::PredictionLog => "prediction log",
            Stage::Export => "export",
        };
        f.write_str(name)
    }
}

/// Errors raised by pipeline stages.
///
/// Irrecoverable conditions abort the run; the variant always names the
/// stage and, when known, the offending column/row.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("{stage}: required column `{column}` is missing")]
    MissingColumn { stage: Stage, column: String },

    #[error("{stage}: column `{column}` is not {expected}")]
    ColumnType {
        stage: Stage,
        column: String,
        expected: &'static str,
    },

    #[error("feature engineering: cannot parse date in column `{column}` at row {row}: {value:?}")]
    DateParse {
        column: String,
        row: usize,
        value: String,
    },

    #[error("{stage}: dataset is empty")]
    EmptyDataset { stage: Stage },

    #[error("{stage}: no rows with label {label}")]
    EmptyClass { stage: Stage, label: u8 },

    #[error("{stage}: column set does not match the trained schema (expected {expected} columns, found {found}; first difference: {detail})")]
    SchemaMismatch {
        stage: Stage,
        expected: usize,
        found: usize,
        detail: String,
    },

    #[error("{stage}: invalid parameter: {message}")]
    InvalidParameter { stage: Stage, message: String },

    #[error("{stage}: I/O failure: {source}")]
    Io {
        stage: Stage,
        #[source]
        source: std::io::Error,
    },

    #[error("{stage}: CSV failure: {source}")]
    Csv {
        stage: Stage,
        #[source]
        source: csv::Error,
    },

    #[error("{stage}: JSON failure: {source}")]
    Json {
        stage: Stage,
        #[source]
        source: serde_json::Error,
    },

    #[error("explanation failed: {0}")]
    Explain(#[from] crate::explain::ExplainError),
}

impl PipelineError {
    /// Stage the error originated from
    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::MissingColumn { stage, .. }
            | PipelineError::ColumnType { stage, .. }
            | PipelineError::EmptyDataset { stage }
            | PipelineError::EmptyClass { stage, .. }
            | PipelineError::SchemaMismatch { stage, .. }
            | PipelineError::InvalidParameter { stage, .. }
            | PipelineError::Io { stage, .. }
            | PipelineError::Csv { stage, .. }
            | PipelineError::Json { stage, .. } => *stage,
            PipelineError::DateParse { .. } => Stage::FeatureEngineering,
            PipelineError::Explain(_) => Stage::Explanation,
        }
    }

    pub(crate) fn io(stage: Stage) -> impl FnOnce(std::io::Error) -> Self {
        move |source| PipelineError::Io { stage, source }
    }

    pub(crate) fn csv(stage: Stage) -> impl FnOnce(csv::Error) -> Self {
        move |source| PipelineError::Csv { stage, source }
    }

    pub(crate) fn json(stage: Stage) -> impl FnOnce(serde_json::Error) -> Self {
        move |source| PipelineError::Json { stage, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_names_stage_and_column() {
        let err = PipelineError::MissingColumn {
            stage: Stage::Ingestion,
            column: "claim_date".to_string(),
        };
        assert_eq!(err.stage(), Stage::Ingestion);
        assert_eq!(
            err.to_string(),
            "ingestion: required column `claim_date` is missing"
        );
    }

    #[test]
    fn test_date_parse_is_feature_engineering() {
        let err = PipelineError::DateParse {
            column: "claim_date".to_string(),
            row: 3,
            value: "Unknown".to_string(),
        };
        assert_eq!(err.stage(), Stage::FeatureEngineering);
        assert!(err.to_string().contains("row 3"));
    }
}
