//! All-numeric encoded record set.

use crate::error::{PipelineError, PipelineResult, Stage};
use ndarray::{Array2, ArrayView1, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

/// Named numeric matrix with one row per record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodedFrame {
    columns: Vec<String>,
    values: Array2<f64>,
}

impl EncodedFrame {
    pub fn new(columns: Vec<String>, values: Array2<f64>) -> PipelineResult<Self> {
        if columns.len() != values.ncols() {
            return Err(PipelineError::InvalidParameter {
                stage: Stage::Encoding,
                message: format!(
                    "{} column names for a matrix with {} columns",
                    columns.len(),
                    values.ncols()
                ),
            });
        }
        Ok(Self { columns, values })
    }

    /// Frame whose column count already matches the matrix width
    pub(crate) fn from_parts(columns: Vec<String>, values: Array2<f64>) -> Self {
        debug_assert_eq!(columns.len(), values.ncols());
        Self { columns, values }
    }

    /// Frame with the given columns and zero rows
    pub fn empty(columns: Vec<String>) -> Self {
        let n = columns.len();
        Self {
            columns,
            values: Array2::zeros((0, n)),
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    pub fn n_rows(&self) -> usize {
        self.values.nrows()
    }

    pub fn n_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.n_rows() == 0
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn column(&self, name: &str) -> Option<ArrayView1<'_, f64>> {
        self.column_index(name).map(|idx| self.values.column(idx))
    }

    pub fn row(&self, index: usize) -> ArrayView1<'_, f64> {
        self.values.row(index)
    }

    /// Rows at the given positions (duplicates allowed), in the given order
    pub fn select_rows(&self, rows: &[usize]) -> Self {
        Self {
            columns: self.columns.clone(),
            values: self.values.select(Axis(0), rows),
        }
    }

    /// Frame without the named columns (absent names are ignored)
    pub fn without_columns<S: AsRef<str>>(&self, names: &[S]) -> Self {
        let keep: Vec<usize> = self
            .columns
            .iter()
            .enumerate()
            .filter(|(_, c)| !names.iter().any(|n| n.as_ref() == c.as_str()))
            .map(|(i, _)| i)
            .collect();
        Self {
            columns: keep.iter().map(|&i| self.columns[i].clone()).collect(),
            values: self.values.select(Axis(1), &keep),
        }
    }

    /// Up to `n` distinct rows drawn without replacement with a seeded RNG.
    pub fn sample(&self, n: usize, seed: u64) -> Self {
        let n = n.min(self.n_rows());
        let mut rng = StdRng::seed_from_u64(seed);
        let rows = rand::seq::index::sample(&mut rng, self.n_rows(), n).into_vec();
        self.select_rows(&rows)
    }
}
