//! Encoded feature schema shared by training and inference.

use crate::error::{PipelineError, PipelineResult, Stage};
use crate::types::{ColumnData, Table};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Columns one-hot encoded by the `Encoder`, captured once at training time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoricalColumns {
    columns: Vec<String>,
}

impl CategoricalColumns {
    pub fn new(columns: Vec<String>) -> Self {
        Self { columns }
    }

    /// Base columns (in order) plus every other text column of `table`
    /// that is neither a date column nor excluded.
    pub fn discover<S: AsRef<str>>(
        table: &Table,
        base: &[S],
        date_columns: &[S],
        excluded: &[S],
    ) -> Self {
        let mut columns: Vec<String> = base.iter().map(|c| c.as_ref().to_string()).collect();
        for column in table.columns() {
            let name = column.name.as_str();
            let is_text = matches!(column.data, ColumnData::Text(_));
            let skip = date_columns.iter().any(|d| d.as_ref() == name)
                || excluded.iter().any(|e| e.as_ref() == name)
                || columns.iter().any(|c| c == name);
            if is_text && !skip {
                columns.push(name.to_string());
            }
        }
        Self { columns }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn contains(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }
}

/// Ordered column set of the encoded training features.
///
/// The single source of truth for column presence and order: every frame
/// scored by a trained model must carry exactly these columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedSchema {
    columns: Vec<String>,
    categorical: CategoricalColumns,
    fingerprint: String,
}

impl EncodedSchema {
    pub fn new(columns: Vec<String>, categorical: CategoricalColumns) -> Self {
        let fingerprint = fingerprint(&columns);
        Self {
            columns,
            categorical,
            fingerprint,
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn categorical(&self) -> &CategoricalColumns {
        &self.categorical
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn index_of(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    /// SHA-256 over the ordered column names; identifies the schema version
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Fail with `SchemaMismatch` unless `columns` equals the schema exactly
    pub fn check(&self, columns: &[String], stage: Stage) -> PipelineResult<()> {
        if columns == self.columns.as_slice() {
            return Ok(());
        }
        let detail = self
            .columns
            .iter()
            .zip(columns.iter())
            .enumerate()
            .find(|(_, (expected, found))| expected != found)
            .map(|(idx, (expected, found))| {
                format!("position {idx}: expected `{expected}`, found `{found}`")
            })
            .unwrap_or_else(|| "column count differs".to_string());
        Err(PipelineError::SchemaMismatch {
            stage,
            expected: self.columns.len(),
            found: columns.len(),
            detail,
        })
    }
}

fn fingerprint(columns: &[String]) -> String {
    let mut hasher = Sha256::new();
    for column in columns {
        hasher.update(column.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}
