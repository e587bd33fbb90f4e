//! Feature engineering for claim risk training and scoring.
//!
//! Turns a raw policy/claim table into analyzable columns in three
//! ordered steps:
//!
//! 1. derive the `claim_risk` label from the raw amount distribution,
//! 2. impute missing values (numeric median, then "Unknown"),
//! 3. replace each date column with year/month/day integer columns.
//!
//! The label must be derived before imputation so imputed amounts never
//! move the quantile threshold.

use crate::config::DataConfig;
use crate::error::{PipelineError, PipelineResult, Stage};
use crate::types::{Column, ColumnData, Table};
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Literal used for missing categorical values
pub const UNKNOWN_CATEGORY: &str = "Unknown";

const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%Y/%m/%d", "%d/%m/%Y"];
const DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

/// Threshold and class balance of the derived label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelSummary {
    /// Claim amount at the configured quantile
    pub threshold: f64,
    /// Rows labeled high risk
    pub positives: usize,
    /// Total rows
    pub total: usize,
}

impl LabelSummary {
    /// Share of high-risk rows (0.0 - 1.0)
    pub fn positive_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.positives as f64 / self.total as f64
        }
    }
}

/// Values used to fill missing cells
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImputationValues {
    /// Median per numeric column, in table order
    pub medians: Vec<(String, f64)>,
    /// Numeric cells filled with a median
    pub numeric_cells: usize,
    /// Text cells filled with "Unknown"
    pub text_cells: usize,
}

impl ImputationValues {
    pub fn median(&self, column: &str) -> Option<f64> {
        self.medians
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, m)| *m)
    }

    /// Total cells imputed
    pub fn cells_imputed(&self) -> usize {
        self.numeric_cells + self.text_cells
    }
}

/// Output of the full engineering step
#[derive(Debug, Clone)]
pub struct EngineeredData {
    pub table: Table,
    pub label: LabelSummary,
    pub imputation: ImputationValues,
    /// Missing cells in the raw input
    pub missing_values: usize,
}

/// Deterministic feature engineering over policy/claim tables.
#[derive(Debug, Clone)]
pub struct FeatureEngineer {
    amount_column: String,
    label_column: String,
    label_quantile: f64,
    date_columns: Vec<String>,
}

impl FeatureEngineer {
    pub fn new(config: &DataConfig) -> Self {
        Self {
            amount_column: config.amount_column.clone(),
            label_column: config.label_column.clone(),
            label_quantile: config.label_quantile,
            date_columns: config.date_columns.clone(),
        }
    }

    pub fn label_column(&self) -> &str {
        &self.label_column
    }

    pub fn amount_column(&self) -> &str {
        &self.amount_column
    }

    pub fn date_columns(&self) -> &[String] {
        &self.date_columns
    }

    /// Names of the derived columns for a date column, in output order
    pub fn date_feature_names(column: &str) -> [String; 3] {
        [
            format!("{column}_year"),
            format!("{column}_month"),
            format!("{column}_day"),
        ]
    }

    /// Run label derivation, imputation and date expansion in that order.
    pub fn engineer(&self, raw: &Table) -> PipelineResult<EngineeredData> {
        let missing_values = raw.missing_count();
        let (labeled, label) = self.derive_label(raw)?;
        let (imputed, imputation) = self.impute(&labeled);
        let table = self.expand_dates(&imputed)?;

        info!(
            rows = table.n_rows(),
            columns = table.n_columns(),
            threshold = label.threshold,
            positive_rate = label.positive_rate(),
            imputed = imputation.cells_imputed(),
            "Feature engineering complete"
        );

        Ok(EngineeredData {
            table,
            label,
            imputation,
            missing_values,
        })
    }

    /// Append the binary label: 1 iff amount >= quantile of the raw amounts.
    ///
    /// Rows with a missing amount are labeled 0.
    pub fn derive_label(&self, table: &Table) -> PipelineResult<(Table, LabelSummary)> {
        let amounts = self.amounts(table)?;
        let observed: Vec<f64> = amounts.iter().flatten().copied().collect();
        let threshold = quantile(&observed, self.label_quantile).ok_or(
            PipelineError::EmptyDataset {
                stage: Stage::FeatureEngineering,
            },
        )?;

        let labels: Vec<Option<f64>> = amounts
            .iter()
            .map(|amount| match amount {
                Some(a) if *a >= threshold => Some(1.0),
                _ => Some(0.0),
            })
            .collect();
        let positives = labels.iter().filter(|l| **l == Some(1.0)).count();

        let summary = LabelSummary {
            threshold,
            positives,
            total: labels.len(),
        };
        debug!(
            threshold,
            positives,
            total = summary.total,
            "Derived claim risk label"
        );

        let labeled = table.with_column(Column::numeric(self.label_column.clone(), labels))?;
        Ok((labeled, summary))
    }

    /// Fill numeric gaps with the column median, then text gaps with "Unknown".
    ///
    /// Medians are computed over the table passed in, so a changed dataset
    /// gets fresh medians. Columns with no observed value are left as-is.
    pub fn impute(&self, table: &Table) -> (Table, ImputationValues) {
        let mut imputation = ImputationValues::default();

        let numeric_pass: Vec<Column> = table
            .columns()
            .iter()
            .map(|column| match &column.data {
                ColumnData::Numeric(values) => {
                    let observed: Vec<f64> = values.iter().flatten().copied().collect();
                    match median(&observed) {
                        Some(m) => {
                            imputation.medians.push((column.name.clone(), m));
                            imputation.numeric_cells += values.len() - observed.len();
                            Column::numeric(
                                column.name.clone(),
                                values.iter().map(|v| Some(v.unwrap_or(m))).collect(),
                            )
                        }
                        None => column.clone(),
                    }
                }
                ColumnData::Text(_) => column.clone(),
            })
            .collect();

        let columns: Vec<Column> = numeric_pass
            .into_iter()
            .map(|column| match column.data {
                ColumnData::Text(values) => {
                    let filled: Vec<Option<String>> = values
                        .into_iter()
                        .map(|v| {
                            if v.is_none() {
                                imputation.text_cells += 1;
                            }
                            Some(v.unwrap_or_else(|| UNKNOWN_CATEGORY.to_string()))
                        })
                        .collect();
                    Column::text(column.name, filled)
                }
                data => Column {
                    name: column.name,
                    data,
                },
            })
            .collect();

        // Column names and lengths are unchanged.
        (Table::from_parts(columns, table.n_rows()), imputation)
    }

    /// Replace each configured date column with `_year`, `_month`, `_day`
    /// columns appended at the end. Absent date columns are skipped; an
    /// unparseable cell is fatal.
    pub fn expand_dates(&self, table: &Table) -> PipelineResult<Table> {
        let mut expanded = table.clone();

        for name in &self.date_columns {
            let Some(column) = table.column(name) else {
                debug!(column = %name, "Date column absent, skipping");
                continue;
            };

            let dates = parse_date_column(name, &column.data)?;
            let [year_name, month_name, day_name] = Self::date_feature_names(name);
            expanded = expanded
                .with_column(Column::numeric(
                    year_name,
                    dates.iter().map(|d| Some(d.year() as f64)).collect(),
                ))?
                .with_column(Column::numeric(
                    month_name,
                    dates.iter().map(|d| Some(d.month() as f64)).collect(),
                ))?
                .with_column(Column::numeric(
                    day_name,
                    dates.iter().map(|d| Some(d.day() as f64)).collect(),
                ))?
                .without_columns(&[name]);
        }

        Ok(expanded)
    }

    fn amounts<'a>(&self, table: &'a Table) -> PipelineResult<&'a [Option<f64>]> {
        if table.is_empty() {
            return Err(PipelineError::EmptyDataset {
                stage: Stage::FeatureEngineering,
            });
        }
        match table.column(&self.amount_column) {
            None => Err(PipelineError::MissingColumn {
                stage: Stage::FeatureEngineering,
                column: self.amount_column.clone(),
            }),
            Some(Column {
                data: ColumnData::Numeric(values),
                ..
            }) => Ok(values),
            Some(_) => Err(PipelineError::ColumnType {
                stage: Stage::FeatureEngineering,
                column: self.amount_column.clone(),
                expected: "numeric",
            }),
        }
    }
}

fn parse_date_column(name: &str, data: &ColumnData) -> PipelineResult<Vec<NaiveDate>> {
    let cells: Vec<Option<String>> = match data {
        ColumnData::Text(values) => values.clone(),
        ColumnData::Numeric(values) => values.iter().map(|v| v.map(|x| x.to_string())).collect(),
    };

    cells
        .iter()
        .enumerate()
        .map(|(row, cell)| {
            cell.as_deref()
                .and_then(parse_date)
                .ok_or_else(|| PipelineError::DateParse {
                    column: name.to_string(),
                    row,
                    value: cell.clone().unwrap_or_default(),
                })
        })
        .collect()
}

/// Parse a date or date-time string into its calendar date
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(value, fmt).ok())
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
                .map(|dt| dt.date())
        })
        .or_else(|| {
            DateTime::parse_from_rfc3339(value)
                .ok()
                .map(|dt| dt.date_naive())
        })
}

/// Quantile with linear interpolation between closest ranks.
pub fn quantile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let position = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let fraction = position - lower as f64;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * fraction)
}

pub fn median(values: &[f64]) -> Option<f64> {
    quantile(values, 0.5)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use approx::assert_relative_eq;

    fn engineer() -> FeatureEngineer {
        FeatureEngineer::new(&AppConfig::default().data)
    }

    fn raw_table() -> Table {
        Table::new(vec![
            Column::numeric(
                "claim_amount_SZL",
                vec![Some(100.0), Some(200.0), None, Some(400.0), Some(500.0)],
            ),
            Column::text(
                "claim_type",
                vec![
                    Some("Theft".into()),
                    None,
                    Some("Fire".into()),
                    Some("Fire".into()),
                    Some("Theft".into()),
                ],
            ),
            Column::numeric("age", vec![Some(30.0), None, Some(50.0), Some(40.0), None]),
            Column::text(
                "claim_date",
                vec![
                    Some("2023-01-05".into()),
                    Some("2023-02-10".into()),
                    Some("2022-12-31".into()),
                    Some("2024-07-04".into()),
                    Some("2021-03-15".into()),
                ],
            ),
        ])
        .unwrap()
    }

    #[test]
    fn test_quantile_linear_interpolation() {
        let values = [100.0, 200.0, 400.0, 500.0];
        assert_relative_eq!(quantile(&values, 0.75).unwrap(), 425.0);
        assert_relative_eq!(median(&values).unwrap(), 300.0);
        assert_eq!(quantile(&[], 0.5), None);
        assert_eq!(quantile(&[7.0], 0.75), Some(7.0));
    }

    #[test]
    fn test_label_uses_raw_amounts() {
        let (labeled, summary) = engineer().derive_label(&raw_table()).unwrap();

        assert_relative_eq!(summary.threshold, 425.0);
        assert_eq!(summary.positives, 1);
        assert_eq!(
            labeled.numeric("claim_risk").unwrap(),
            &[Some(0.0), Some(0.0), Some(0.0), Some(0.0), Some(1.0)]
        );
    }

    #[test]
    fn test_label_before_impute_ignores_imputed_amounts() {
        let fe = engineer();
        let raw = raw_table();
        let (_, before) = fe.derive_label(&raw).unwrap();
        let (imputed, _) = fe.impute(&raw);
        let (_, after) = fe.derive_label(&imputed).unwrap();

        // imputing the median first shifts the threshold
        assert_relative_eq!(before.threshold, 425.0);
        assert_relative_eq!(after.threshold, 400.0);
    }

    #[test]
    fn test_impute_median_then_unknown() {
        let (imputed, values) = engineer().impute(&raw_table());

        assert_eq!(
            imputed.numeric("age").unwrap(),
            &[Some(30.0), Some(40.0), Some(50.0), Some(40.0), Some(40.0)]
        );
        assert_eq!(imputed.numeric("claim_amount_SZL").unwrap()[2], Some(300.0));
        assert_eq!(imputed.text("claim_type").unwrap()[1].as_deref(), Some("Unknown"));
        assert_eq!(values.median("age"), Some(40.0));
        assert_eq!(values.numeric_cells, 3);
        assert_eq!(values.text_cells, 1);
        assert_eq!(imputed.missing_count(), 0);
    }

    #[test]
    fn test_impute_keeps_shape_and_column_order() {
        let raw = raw_table()
            .with_column(Column::numeric("premium", vec![None; 5]))
            .unwrap();
        let (imputed, values) = engineer().impute(&raw);

        assert_eq!(imputed.n_rows(), 5);
        assert_eq!(imputed.column_names(), raw.column_names());
        // nothing observed, so nothing to fill with
        assert_eq!(imputed.numeric("premium").unwrap(), &[None; 5]);
        assert_eq!(values.median("premium"), None);
        assert_eq!(imputed.text("claim_date"), raw.text("claim_date"));
    }

    #[test]
    fn test_expand_dates_appends_parts_and_drops_source() {
        let table = engineer().expand_dates(&raw_table()).unwrap();

        assert!(!table.contains("claim_date"));
        let names = table.column_names();
        assert_eq!(
            &names[names.len() - 3..],
            &["claim_date_year", "claim_date_month", "claim_date_day"]
        );
        assert_eq!(table.numeric("claim_date_year").unwrap()[3], Some(2024.0));
        assert_eq!(table.numeric("claim_date_month").unwrap()[3], Some(7.0));
        assert_eq!(table.numeric("claim_date_day").unwrap()[3], Some(4.0));
    }

    #[test]
    fn test_absent_date_column_is_tolerated() {
        let table = raw_table().without_columns(&["claim_date"]);
        let expanded = engineer().expand_dates(&table).unwrap();
        assert_eq!(expanded, table);
    }

    #[test]
    fn test_unparseable_date_is_fatal() {
        let table = raw_table()
            .with_column(Column::text(
                "claim_date",
                vec![
                    Some("2023-01-05".into()),
                    Some("Unknown".into()),
                    Some("2022-12-31".into()),
                    Some("2024-07-04".into()),
                    Some("2021-03-15".into()),
                ],
            ))
            .unwrap();

        let err = engineer().expand_dates(&table).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::DateParse { row: 1, ref value, .. } if value == "Unknown"
        ));
    }

    #[test]
    fn test_parse_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2023, 1, 5);
        assert_eq!(parse_date("2023-01-05"), expected);
        assert_eq!(parse_date("2023/01/05"), expected);
        assert_eq!(parse_date("05/01/2023"), expected);
        assert_eq!(parse_date("2023-01-05 10:30:00"), expected);
        assert_eq!(parse_date("2023-01-05T10:30:00"), expected);
        assert_eq!(parse_date("not a date"), None);
    }

    #[test]
    fn test_engineer_is_deterministic() {
        let fe = engineer();
        let first = fe.engineer(&raw_table()).unwrap();
        let second = fe.engineer(&raw_table()).unwrap();
        assert_eq!(first.table, second.table);
        assert_eq!(first.missing_values, 4);
    }

    #[test]
    fn test_missing_amount_column() {
        let table = raw_table().without_columns(&["claim_amount_SZL"]);
        let err = engineer().derive_label(&table).unwrap_err();
        assert!(matches!(err, PipelineError::MissingColumn { .. }));
    }
}
