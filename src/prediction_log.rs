//! Append-only CSV log of interactive predictions

use crate::error::{PipelineError, PipelineResult, Stage};
use crate::types::{RiskLevel, RiskPrediction};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// One row of the prediction log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionLogEntry {
    pub timestamp: DateTime<Utc>,
    pub prediction: RiskLevel,
    pub probability_high_risk: f64,
}

impl From<&RiskPrediction> for PredictionLogEntry {
    fn from(prediction: &RiskPrediction) -> Self {
        Self {
            timestamp: prediction.timestamp,
            prediction: prediction.risk_level,
            probability_high_risk: prediction.probability,
        }
    }
}

/// Prediction history file with header
/// `timestamp,prediction,probability_high_risk`
#[derive(Debug, Clone)]
pub struct PredictionLog {
    path: PathBuf,
}

impl PredictionLog {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one prediction; the file and its header are created on first write
    pub fn append(&self, prediction: &RiskPrediction) -> PipelineResult<()> {
        let exists = self.path.exists();
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(PipelineError::io(Stage::PredictionLog))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(PipelineError::io(Stage::PredictionLog))?;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(!exists)
            .from_writer(file);
        writer
            .serialize(PredictionLogEntry::from(prediction))
            .map_err(PipelineError::csv(Stage::PredictionLog))?;
        writer.flush().map_err(PipelineError::io(Stage::PredictionLog))?;

        info!(path = %self.path.display(), "Prediction saved to log");
        Ok(())
    }

    /// Full history in write order; a missing file is an empty history
    pub fn read_all(&self) -> PipelineResult<Vec<PredictionLogEntry>> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "No prediction history");
            return Ok(Vec::new());
        }
        let mut reader =
            csv::Reader::from_path(&self.path).map_err(PipelineError::csv(Stage::PredictionLog))?;
        reader
            .deserialize()
            .collect::<Result<Vec<PredictionLogEntry>, _>>()
            .map_err(PipelineError::csv(Stage::PredictionLog))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_write_creates_header() {
        let dir = tempfile::tempdir().unwrap();
        let log = PredictionLog::new(dir.path().join("logs").join("prediction_log.csv"));

        log.append(&RiskPrediction::from_probability(0.82)).unwrap();
        log.append(&RiskPrediction::from_probability(0.12)).unwrap();

        let contents = fs::read_to_string(log.path()).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines[0], "timestamp,prediction,probability_high_risk");
        assert_eq!(lines.len(), 3);
        assert!(lines[1].contains("High Risk"));
        assert!(lines[2].contains("Low Risk"));
    }

    #[test]
    fn test_read_all_round_trips_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let log = PredictionLog::new(dir.path().join("prediction_log.csv"));
        assert!(log.read_all().unwrap().is_empty());

        let first = RiskPrediction::from_probability(0.7);
        let second = RiskPrediction::from_probability(0.3);
        log.append(&first).unwrap();
        log.append(&second).unwrap();

        let entries = log.read_all().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], PredictionLogEntry::from(&first));
        assert_eq!(entries[1].prediction, RiskLevel::Low);
    }
}
