//! Gated persistence of trained models as JSON snapshots

use crate::error::{PipelineError, PipelineResult, Stage};
use crate::evaluation::{ClassificationReport, PersistenceGate};
use crate::models::classifier::TrainedModel;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Snapshot format version written into every artifact
pub const SNAPSHOT_VERSION: u32 = 1;

/// Serialized model plus the metadata it was accepted with
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSnapshot {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    pub recall: f64,
    pub auc: f64,
    /// Fingerprint of the embedded schema
    pub schema_fingerprint: String,
    pub model: TrainedModel,
}

/// Result of a persistence attempt
#[derive(Debug, Clone, PartialEq)]
pub enum PersistOutcome {
    Saved { path: PathBuf, recall: f64 },
    Skipped { recall: f64, threshold: f64 },
}

impl PersistOutcome {
    pub fn is_saved(&self) -> bool {
        matches!(self, PersistOutcome::Saved { .. })
    }
}

/// Writes and reads the single model snapshot
#[derive(Debug, Clone)]
pub struct ModelStore {
    path: PathBuf,
    gate: PersistenceGate,
}

impl ModelStore {
    pub fn new<P: Into<PathBuf>>(path: P, gate: PersistenceGate) -> Self {
        Self {
            path: path.into(),
            gate,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Save `model` only if its positive-class recall passes the gate.
    ///
    /// A skipped model is not written; any earlier snapshot is left alone.
    pub fn persist_if_passing(
        &self,
        model: &TrainedModel,
        report: &ClassificationReport,
    ) -> PipelineResult<PersistOutcome> {
        let recall = report.recall();
        if !self.gate.passes(recall) {
            warn!(
                recall,
                threshold = self.gate.threshold(),
                "Model not saved: recall does not exceed threshold"
            );
            return Ok(PersistOutcome::Skipped {
                recall,
                threshold: self.gate.threshold(),
            });
        }

        let snapshot = ModelSnapshot {
            version: SNAPSHOT_VERSION,
            saved_at: Utc::now(),
            recall,
            auc: report.auc(),
            schema_fingerprint: model.schema().fingerprint().to_string(),
            model: model.clone(),
        };
        self.write(&snapshot)?;

        info!(
            path = %self.path.display(),
            recall,
            fingerprint = %snapshot.schema_fingerprint,
            "Model saved"
        );
        Ok(PersistOutcome::Saved {
            path: self.path.clone(),
            recall,
        })
    }

    fn write(&self, snapshot: &ModelSnapshot) -> PipelineResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(PipelineError::io(Stage::Persistence))?;
        }
        let file = fs::File::create(&self.path).map_err(PipelineError::io(Stage::Persistence))?;
        write_snapshot(file, snapshot)
    }

    /// Read the snapshot back; the embedded schema travels with the model
    pub fn load(&self) -> PipelineResult<ModelSnapshot> {
        let file = fs::File::open(&self.path).map_err(PipelineError::io(Stage::Persistence))?;
        let snapshot: ModelSnapshot = serde_json::from_reader(BufReader::new(file))
            .map_err(PipelineError::json(Stage::Persistence))?;

        if snapshot.schema_fingerprint != snapshot.model.schema().fingerprint() {
            return Err(PipelineError::SchemaMismatch {
                stage: Stage::Persistence,
                expected: snapshot.model.schema().len(),
                found: snapshot.model.schema().len(),
                detail: "snapshot fingerprint does not match its schema".to_string(),
            });
        }

        info!(
            path = %self.path.display(),
            version = snapshot.version,
            recall = snapshot.recall,
            "Model loaded"
        );
        Ok(snapshot)
    }
}

/// Serialize through a buffer and flush, so a failed final write is an error
fn write_snapshot<W: Write>(writer: W, snapshot: &ModelSnapshot) -> PipelineResult<()> {
    let mut writer = BufWriter::new(writer);
    serde_json::to_writer(&mut writer, snapshot).map_err(PipelineError::json(Stage::Persistence))?;
    writer.flush().map_err(PipelineError::io(Stage::Persistence))
}
