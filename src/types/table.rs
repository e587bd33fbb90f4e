//! Columnar policy/claim table.
//!
//! A `Table` is an immutable value: every transformation returns a new
//! table, so stage ordering (label before imputation, dates before
//! encoding) stays explicit at the call site.

use crate::error::{PipelineError, PipelineResult, Stage};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use tracing::{debug, info};

/// Cell markers treated as missing when reading CSV input
const MISSING_MARKERS: [&str; 7] = ["", "NA", "N/A", "NaN", "nan", "null", "NULL"];

/// Values of a single column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ColumnData {
    Numeric(Vec<Option<f64>>),
    Text(Vec<Option<String>>),
}

impl ColumnData {
    pub fn len(&self) -> usize {
        match self {
            ColumnData::Numeric(v) => v.len(),
            ColumnData::Text(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, ColumnData::Numeric(_))
    }

    /// Number of missing cells
    pub fn missing_count(&self) -> usize {
        match self {
            ColumnData::Numeric(v) => v.iter().filter(|x| x.is_none()).count(),
            ColumnData::Text(v) => v.iter().filter(|x| x.is_none()).count(),
        }
    }

    fn select(&self, rows: &[usize]) -> ColumnData {
        match self {
            ColumnData::Numeric(v) => ColumnData::Numeric(rows.iter().map(|&r| v[r]).collect()),
            ColumnData::Text(v) => {
                ColumnData::Text(rows.iter().map(|&r| v[r].clone()).collect())
            }
        }
    }

    /// Display form of a cell; missing cells are empty
    pub fn cell_string(&self, row: usize) -> String {
        match self {
            ColumnData::Numeric(v) => v[row].map(|x| x.to_string()).unwrap_or_default(),
            ColumnData::Text(v) => v[row].clone().unwrap_or_default(),
        }
    }
}

/// Named column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub data: ColumnData,
}

impl Column {
    pub fn numeric(name: impl Into<String>, values: Vec<Option<f64>>) -> Self {
        Self {
            name: name.into(),
            data: ColumnData::Numeric(values),
        }
    }

    pub fn text(name: impl Into<String>, values: Vec<Option<String>>) -> Self {
        Self {
            name: name.into(),
            data: ColumnData::Text(values),
        }
    }
}

/// Ordered set of equally long columns. Rows are identified by position.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Table {
    columns: Vec<Column>,
    n_rows: usize,
}

impl Table {
    /// Build a table, checking that all columns have the same length
    /// and unique names.
    pub fn new(columns: Vec<Column>) -> PipelineResult<Self> {
        let n_rows = columns.first().map(|c| c.data.len()).unwrap_or(0);
        let mut seen = HashSet::new();
        for column in &columns {
            if column.data.len() != n_rows {
                return Err(PipelineError::InvalidParameter {
                    stage: Stage::Ingestion,
                    message: format!(
                        "column `{}` has {} rows, expected {}",
                        column.name,
                        column.data.len(),
                        n_rows
                    ),
                });
            }
            if !seen.insert(column.name.as_str()) {
                return Err(PipelineError::InvalidParameter {
                    stage: Stage::Ingestion,
                    message: format!("duplicate column `{}`", column.name),
                });
            }
        }
        Ok(Self { columns, n_rows })
    }

    /// Rebuild a table from columns already known to share `n_rows` rows
    /// and unique names.
    pub(crate) fn from_parts(columns: Vec<Column>, n_rows: usize) -> Self {
        debug_assert!(columns.iter().all(|c| c.data.len() == n_rows));
        Self { columns, n_rows }
    }

    /// Load a table from a CSV file
    pub fn from_csv_path<P: AsRef<Path>>(path: P) -> PipelineResult<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading data...");
        let file = File::open(path).map_err(PipelineError::io(Stage::Ingestion))?;
        let table = Self::from_reader(file)?;
        info!(
            rows = table.n_rows(),
            columns = table.n_columns(),
            "Data loaded successfully"
        );
        Ok(table)
    }

    /// Load a table from CSV data.
    ///
    /// A column is numeric when every non-missing cell parses as `f64`.
    pub fn from_reader<R: Read>(reader: R) -> PipelineResult<Self> {
        let mut rdr = csv::Reader::from_reader(reader);
        let headers: Vec<String> = rdr
            .headers()
            .map_err(PipelineError::csv(Stage::Ingestion))?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();

        let mut raw: Vec<Vec<Option<String>>> = vec![Vec::new(); headers.len()];
        for record in rdr.records() {
            let record = record.map_err(PipelineError::csv(Stage::Ingestion))?;
            for (idx, cells) in raw.iter_mut().enumerate() {
                let cell = record.get(idx).map(str::trim).unwrap_or("");
                if MISSING_MARKERS.contains(&cell) {
                    cells.push(None);
                } else {
                    cells.push(Some(cell.to_string()));
                }
            }
        }

        let columns = headers
            .into_iter()
            .zip(raw)
            .map(|(name, cells)| {
                let parsed: Option<Vec<Option<f64>>> = cells
                    .iter()
                    .map(|cell| match cell {
                        None => Some(None),
                        Some(s) => s.parse::<f64>().ok().map(Some),
                    })
                    .collect();
                match parsed {
                    Some(values) => Column::numeric(name, values),
                    None => Column::text(name, cells),
                }
            })
            .collect();

        Self::new(columns)
    }

    /// Write the table as CSV (missing cells are written empty)
    pub fn to_csv_writer<W: Write>(&self, writer: W) -> PipelineResult<()> {
        let mut wtr = csv::Writer::from_writer(writer);
        wtr.write_record(self.column_names())
            .map_err(PipelineError::csv(Stage::Export))?;
        for row in 0..self.n_rows {
            let record: Vec<String> = self
                .columns
                .iter()
                .map(|c| c.data.cell_string(row))
                .collect();
            wtr.write_record(&record)
                .map_err(PipelineError::csv(Stage::Export))?;
        }
        wtr.flush().map_err(PipelineError::io(Stage::Export))?;
        Ok(())
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.n_rows == 0
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Numeric values of a column, `None` if absent or textual
    pub fn numeric(&self, name: &str) -> Option<&[Option<f64>]> {
        match self.column(name).map(|c| &c.data) {
            Some(ColumnData::Numeric(v)) => Some(v),
            _ => None,
        }
    }

    /// Text values of a column, `None` if absent or numeric
    pub fn text(&self, name: &str) -> Option<&[Option<String>]> {
        match self.column(name).map(|c| &c.data) {
            Some(ColumnData::Text(v)) => Some(v),
            _ => None,
        }
    }

    /// Names of all numeric columns, in table order
    pub fn numeric_column_names(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| c.data.is_numeric())
            .map(|c| c.name.as_str())
            .collect()
    }

    /// Total number of missing cells
    pub fn missing_count(&self) -> usize {
        self.columns.iter().map(|c| c.data.missing_count()).sum()
    }

    /// Fail with `MissingColumn` for the first required column not present
    pub fn require_columns<S: AsRef<str>>(&self, required: &[S], stage: Stage) -> PipelineResult<()> {
        for name in required {
            if !self.contains(name.as_ref()) {
                return Err(PipelineError::MissingColumn {
                    stage,
                    column: name.as_ref().to_string(),
                });
            }
        }
        Ok(())
    }

    /// Return a new table with `column` replacing a same-named column in
    /// place, or appended at the end.
    pub fn with_column(&self, column: Column) -> PipelineResult<Self> {
        let mut columns = self.columns.clone();
        match columns.iter_mut().find(|c| c.name == column.name) {
            Some(existing) => *existing = column,
            None => columns.push(column),
        }
        Self::new(columns)
    }

    /// Return a new table without the named columns (absent names are ignored)
    pub fn without_columns<S: AsRef<str>>(&self, names: &[S]) -> Self {
        let columns: Vec<Column> = self
            .columns
            .iter()
            .filter(|c| !names.iter().any(|n| n.as_ref() == c.name))
            .cloned()
            .collect();
        let n_rows = if columns.is_empty() { 0 } else { self.n_rows };
        Self { columns, n_rows }
    }

    /// Return a new table holding the given rows, in the given order
    pub fn select_rows(&self, rows: &[usize]) -> Self {
        Self {
            columns: self
                .columns
                .iter()
                .map(|c| Column {
                    name: c.name.clone(),
                    data: c.data.select(rows),
                })
                .collect(),
            n_rows: rows.len(),
        }
    }

    /// Rows whose text column `name` equals `value`
    pub fn filter_text_eq(&self, name: &str, value: &str) -> Self {
        let rows: Vec<usize> = match self.text(name) {
            Some(values) => values
                .iter()
                .enumerate()
                .filter(|(_, v)| v.as_deref() == Some(value))
                .map(|(i, _)| i)
                .collect(),
            None => Vec::new(),
        };
        debug!(column = name, value, rows = rows.len(), "Filtered table");
        self.select_rows(&rows)
    }

    /// Distinct values of a text column in first-seen order
    pub fn distinct_text(&self, name: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        self.text(name)
            .unwrap_or(&[])
            .iter()
            .flatten()
            .filter(|v| seen.insert(v.as_str()))
            .cloned()
            .collect()
    }
}
