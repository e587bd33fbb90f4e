//! One-hot encoding of engineered tables into numeric frames.
//!
//! Layout: non-categorical numeric columns in table order, then for each
//! categorical column (in `CategoricalColumns` order) one `<column>_<value>`
//! indicator per observed value, values sorted ascending. No value is
//! dropped, so every category gets its own column.

use crate::config::DataConfig;
use crate::error::{PipelineError, PipelineResult, Stage};
use crate::schema::{CategoricalColumns, EncodedSchema};
use crate::types::{ColumnData, EncodedFrame, Table};
use ndarray::Array2;
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Encoded training features with their labels and schema
#[derive(Debug, Clone)]
pub struct EncodedTraining {
    pub features: EncodedFrame,
    pub labels: Vec<u8>,
    pub schema: EncodedSchema,
}

/// One-hot encoder bound to a fixed categorical column list.
#[derive(Debug, Clone)]
pub struct Encoder {
    categorical: CategoricalColumns,
    /// Target-family columns removed from the feature frame
    excluded: Vec<String>,
    label_column: String,
}

impl Encoder {
    pub fn new(categorical: CategoricalColumns, data: &DataConfig) -> Self {
        Self {
            categorical,
            excluded: vec![data.amount_column.clone(), data.label_column.clone()],
            label_column: data.label_column.clone(),
        }
    }

    /// Capture the categorical columns of an engineered, segmented table.
    pub fn discover(table: &Table, data: &DataConfig) -> Self {
        let excluded = vec![data.amount_column.clone(), data.label_column.clone()];
        let categorical = CategoricalColumns::discover(
            table,
            &data.categorical_columns,
            &data.date_columns,
            &excluded,
        );
        debug!(columns = ?categorical.columns(), "Categorical columns discovered");
        Self::new(categorical, data)
    }

    pub fn categorical(&self) -> &CategoricalColumns {
        &self.categorical
    }

    /// Encode the training table: features, labels and the canonical schema.
    ///
    /// Every categorical column must be present.
    pub fn fit(&self, table: &Table) -> PipelineResult<EncodedTraining> {
        table.require_columns(self.categorical.columns(), Stage::Encoding)?;
        let labels = self.labels(table)?;
        let features = self.encode_features(table)?;
        let schema = EncodedSchema::new(features.columns().to_vec(), self.categorical.clone());

        info!(
            rows = features.n_rows(),
            columns = schema.len(),
            fingerprint = %schema.fingerprint(),
            "Encoded training features"
        );

        Ok(EncodedTraining {
            features,
            labels,
            schema,
        })
    }

    /// One-hot encode `table` and drop the target-family columns.
    ///
    /// Categorical columns absent from `table` are skipped and text columns
    /// outside the categorical list are dropped; reconciling the result with
    /// a trained schema is the `SchemaAligner`'s job.
    pub fn encode_features(&self, table: &Table) -> PipelineResult<EncodedFrame> {
        let frame = self.encode(table)?;
        Ok(frame.without_columns(&self.excluded))
    }

    /// One-hot encode every column of `table`
    pub fn encode(&self, table: &Table) -> PipelineResult<EncodedFrame> {
        let n_rows = table.n_rows();
        let mut names: Vec<String> = Vec::new();
        let mut columns: Vec<Vec<f64>> = Vec::new();

        for column in table.columns() {
            if self.categorical.contains(&column.name) {
                continue;
            }
            match &column.data {
                ColumnData::Numeric(values) => {
                    names.push(column.name.clone());
                    columns.push(values.iter().map(|v| v.unwrap_or(0.0)).collect());
                }
                ColumnData::Text(_) => {
                    debug!(column = %column.name, "Dropping non-categorical text column");
                }
            }
        }

        for name in self.categorical.columns() {
            let Some(column) = table.column(name) else {
                continue;
            };
            let cells = category_values(&column.data);
            let categories: BTreeSet<&str> = cells.iter().flatten().map(String::as_str).collect();
            for category in categories {
                names.push(format!("{name}_{category}"));
                columns.push(
                    cells
                        .iter()
                        .map(|cell| if cell.as_deref() == Some(category) { 1.0 } else { 0.0 })
                        .collect(),
                );
            }
        }

        let mut values = Array2::zeros((n_rows, names.len()));
        for (j, column) in columns.iter().enumerate() {
            for (i, value) in column.iter().enumerate() {
                values[[i, j]] = *value;
            }
        }
        EncodedFrame::new(names, values)
    }

    /// Binary labels of the table (missing counts as 0)
    pub fn labels(&self, table: &Table) -> PipelineResult<Vec<u8>> {
        let values = table
            .numeric(&self.label_column)
            .ok_or_else(|| PipelineError::MissingColumn {
                stage: Stage::Encoding,
                column: self.label_column.clone(),
            })?;
        Ok(values
            .iter()
            .map(|v| if v.unwrap_or(0.0) >= 0.5 { 1 } else { 0 })
            .collect())
    }
}

/// Category strings of a column; numeric categories use their display form
fn category_values(data: &ColumnData) -> Vec<Option<String>> {
    match data {
        ColumnData::Text(values) => values.clone(),
        ColumnData::Numeric(values) => values.iter().map(|v| v.map(|x| x.to_string())).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::types::Column;

    fn data_config() -> DataConfig {
        let mut data = AppConfig::default().data;
        data.categorical_columns = vec!["location".to_string(), "customer_segment".to_string()];
        data
    }

    fn table() -> Table {
        Table::new(vec![
            Column::numeric("claim_amount_SZL", vec![Some(10.0), Some(20.0), Some(30.0)]),
            Column::text(
                "location",
                vec![Some("Manzini".into()), Some("Hhohho".into()), Some("Manzini".into())],
            ),
            Column::numeric("age", vec![Some(30.0), Some(40.0), Some(50.0)]),
            Column::text("agent", vec![Some("b".into()), Some("a".into()), Some("b".into())]),
            Column::numeric("claim_risk", vec![Some(0.0), Some(0.0), Some(1.0)]),
            Column::text(
                "customer_segment",
                vec![Some("1".into()), Some("0".into()), Some("1".into())],
            ),
        ])
        .unwrap()
    }

    #[test]
    fn test_fit_layout_matches_one_hot_convention() {
        let encoder = Encoder::discover(&table(), &data_config());
        let encoded = encoder.fit(&table()).unwrap();

        assert_eq!(
            encoded.schema.columns(),
            &[
                "age",
                "location_Hhohho",
                "location_Manzini",
                "customer_segment_0",
                "customer_segment_1",
                "agent_a",
                "agent_b",
            ]
            .map(String::from)
        );
        assert_eq!(encoded.labels, vec![0, 0, 1]);
        assert_eq!(encoded.features.row(0).to_vec(), vec![30.0, 0.0, 1.0, 0.0, 1.0, 0.0, 1.0]);
    }

    #[test]
    fn test_single_record_only_observed_categories() {
        let encoder = Encoder::discover(&table(), &data_config());
        let single = table().select_rows(&[1]).without_columns(&["claim_risk"]);
        let frame = encoder.encode_features(&single).unwrap();

        assert_eq!(
            frame.columns(),
            &["age", "location_Hhohho", "customer_segment_0", "agent_a"].map(String::from)
        );
    }

    #[test]
    fn test_fit_requires_categorical_columns() {
        let encoder = Encoder::discover(&table(), &data_config());
        let err = encoder
            .fit(&table().without_columns(&["location"]))
            .unwrap_err();
        assert!(matches!(err, PipelineError::MissingColumn { .. }));
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let encoder = Encoder::discover(&table(), &data_config());
        let a = encoder.fit(&table()).unwrap();
        let b = encoder.fit(&table()).unwrap();
        assert_eq!(a.schema, b.schema);
        assert_eq!(a.features, b.features);
    }
}
