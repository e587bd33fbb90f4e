//! Downloadable CSV exports of a run

use crate::error::{PipelineError, PipelineResult, Stage};
use crate::explain::FeatureContribution;
use crate::types::{EncodedFrame, Table};
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::info;

pub const CLEANED_DATA_FILE: &str = "cleaned_data.csv";
pub const PREDICTIONS_FILE: &str = "predictions.csv";
pub const ATTRIBUTION_FILE: &str = "shap_top_features.csv";

/// Column appended to the predictions export
pub const PREDICTED_COLUMN: &str = "Predicted_Risk";

/// Writes export files into one output directory
#[derive(Debug, Clone)]
pub struct Exporter {
    dir: PathBuf,
}

impl Exporter {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn create(&self, name: &str) -> PipelineResult<(PathBuf, BufWriter<File>)> {
        fs::create_dir_all(&self.dir).map_err(PipelineError::io(Stage::Export))?;
        let path = self.dir.join(name);
        let file = File::create(&path).map_err(PipelineError::io(Stage::Export))?;
        Ok((path, BufWriter::new(file)))
    }

    /// Engineered, segmented dataset
    pub fn write_cleaned(&self, table: &Table) -> PipelineResult<PathBuf> {
        let (path, writer) = self.create(CLEANED_DATA_FILE)?;
        table.to_csv_writer(writer)?;
        info!(path = %path.display(), rows = table.n_rows(), "Cleaned data exported");
        Ok(path)
    }

    /// Held-out features with the predicted label as the last column
    pub fn write_predictions(&self, features: &EncodedFrame, predicted: &[u8]) -> PipelineResult<PathBuf> {
        if predicted.len() != features.n_rows() {
            return Err(PipelineError::InvalidParameter {
                stage: Stage::Export,
                message: format!(
                    "{} predictions for {} rows",
                    predicted.len(),
                    features.n_rows()
                ),
            });
        }
        let (path, writer) = self.create(PREDICTIONS_FILE)?;
        let mut wtr = csv::Writer::from_writer(writer);

        let mut header: Vec<&str> = features.columns().iter().map(String::as_str).collect();
        header.push(PREDICTED_COLUMN);
        wtr.write_record(&header)
            .map_err(PipelineError::csv(Stage::Export))?;

        for (i, label) in predicted.iter().enumerate() {
            let mut record: Vec<String> = features.row(i).iter().map(|v| v.to_string()).collect();
            record.push(label.to_string());
            wtr.write_record(&record)
                .map_err(PipelineError::csv(Stage::Export))?;
        }
        wtr.flush().map_err(PipelineError::io(Stage::Export))?;

        info!(path = %path.display(), rows = predicted.len(), "Predictions exported");
        Ok(path)
    }

    /// Ranked attribution table with header `Feature,SHAP Value`
    pub fn write_attribution(&self, ranking: &[FeatureContribution]) -> PipelineResult<PathBuf> {
        let (path, writer) = self.create(ATTRIBUTION_FILE)?;
        let mut wtr = csv::Writer::from_writer(writer);
        wtr.write_record(["Feature", "SHAP Value"])
            .map_err(PipelineError::csv(Stage::Export))?;
        for contribution in ranking {
            let value = contribution.mean_abs.to_string();
            wtr.write_record([contribution.feature.as_str(), value.as_str()])
                .map_err(PipelineError::csv(Stage::Export))?;
        }
        wtr.flush().map_err(PipelineError::io(Stage::Export))?;

        info!(path = %path.display(), features = ranking.len(), "Attribution exported");
        Ok(path)
    }
}
