//! Aggregate views over a scored run: KPIs, group risk, drill-downs.

use crate::config::{AppConfig, DataConfig};
use crate::error::{PipelineError, PipelineResult, Stage};
use crate::explain::{ExplainError, FeatureContribution};
use crate::feature_engineer::UNKNOWN_CATEGORY;
use crate::scoring::ScoringContext;
use crate::types::Table;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};

/// Histogram bins used for amount distributions
pub const HISTOGRAM_BINS: usize = 20;

/// Rows sampled from a location for its attribution
pub const LOCATION_SAMPLE_ROWS: usize = 20;

/// Headline numbers of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Kpis {
    pub total_policies: usize,
    pub high_risk_percent: f64,
    pub auc: f64,
    pub missing_values_imputed: usize,
}

impl Kpis {
    pub fn compute(
        table: &Table,
        label_column: &str,
        auc: f64,
        missing_values_imputed: usize,
    ) -> PipelineResult<Self> {
        let labels = table
            .numeric(label_column)
            .ok_or_else(|| PipelineError::MissingColumn {
                stage: Stage::Evaluation,
                column: label_column.to_string(),
            })?;
        let positives = labels.iter().filter(|v| v.unwrap_or(0.0) >= 0.5).count();
        let total = table.n_rows();
        let high_risk_percent = if total == 0 {
            0.0
        } else {
            positives as f64 / total as f64 * 100.0
        };
        Ok(Self {
            total_policies: total,
            high_risk_percent,
            auc,
            missing_values_imputed,
        })
    }
}

/// Mean label of one group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupRisk {
    /// One value per grouping column
    pub keys: Vec<String>,
    pub mean_risk: f64,
    pub count: usize,
}

/// Mean risk label per distinct combination of `group_columns`, sorted by key
pub fn risk_by_group<S: AsRef<str>>(
    table: &Table,
    group_columns: &[S],
    label_column: &str,
) -> PipelineResult<Vec<GroupRisk>> {
    table.require_columns(group_columns, Stage::Evaluation)?;
    let labels = table
        .numeric(label_column)
        .ok_or_else(|| PipelineError::MissingColumn {
            stage: Stage::Evaluation,
            column: label_column.to_string(),
        })?;
    let columns: Vec<_> = group_columns
        .iter()
        .filter_map(|c| table.column(c.as_ref()))
        .collect();

    let mut groups: BTreeMap<Vec<String>, (f64, usize)> = BTreeMap::new();
    for (row, label) in labels.iter().enumerate() {
        let keys: Vec<String> = columns
            .iter()
            .map(|c| {
                let cell = c.data.cell_string(row);
                if cell.is_empty() {
                    UNKNOWN_CATEGORY.to_string()
                } else {
                    cell
                }
            })
            .collect();
        let entry = groups.entry(keys).or_insert((0.0, 0));
        entry.0 += label.unwrap_or(0.0);
        entry.1 += 1;
    }

    Ok(groups
        .into_iter()
        .map(|(keys, (sum, count))| GroupRisk {
            keys,
            mean_risk: sum / count as f64,
            count,
        })
        .collect())
}

/// Group risk tables shown for a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskBreakdown {
    pub by_location: Vec<GroupRisk>,
    pub by_claim_type: Vec<GroupRisk>,
    pub by_segment: Vec<GroupRisk>,
    pub by_location_segment: Vec<GroupRisk>,
}

impl RiskBreakdown {
    pub fn compute(table: &Table, data: &DataConfig) -> PipelineResult<Self> {
        let label = data.label_column.as_str();
        let segment = data.segment_column.as_str();
        Ok(Self {
            by_location: risk_by_group(table, &["location"], label)?,
            by_claim_type: risk_by_group(table, &["claim_type"], label)?,
            by_segment: risk_by_group(table, &[segment], label)?,
            by_location_segment: risk_by_group(table, &["location", segment], label)?,
        })
    }
}

/// One equal-width amount bin split by risk label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramBin {
    pub lower: f64,
    pub upper: f64,
    pub low_risk: usize,
    pub high_risk: usize,
}

/// Amount distribution of a slice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DistributionView {
    Histogram(Vec<HistogramBin>),
    /// Used when the amount has at most one distinct value
    RiskCounts { low_risk: usize, high_risk: usize },
}

/// Amount histogram by label, or per-label counts when the amount column
/// cannot be binned
pub fn amount_distribution(
    table: &Table,
    amount_column: &str,
    label_column: &str,
    bins: usize,
) -> PipelineResult<DistributionView> {
    let amounts = table
        .numeric(amount_column)
        .ok_or_else(|| PipelineError::MissingColumn {
            stage: Stage::Evaluation,
            column: amount_column.to_string(),
        })?;
    let labels = table
        .numeric(label_column)
        .ok_or_else(|| PipelineError::MissingColumn {
            stage: Stage::Evaluation,
            column: label_column.to_string(),
        })?;
    let is_high = |row: usize| labels[row].unwrap_or(0.0) >= 0.5;

    let distinct: BTreeSet<u64> = amounts.iter().flatten().map(|v| v.to_bits()).collect();
    if distinct.len() <= 1 || bins == 0 {
        warn!(
            column = amount_column,
            rows = table.n_rows(),
            "Not enough variance for a histogram, using risk counts"
        );
        let high_risk = (0..table.n_rows()).filter(|&r| is_high(r)).count();
        return Ok(DistributionView::RiskCounts {
            low_risk: table.n_rows() - high_risk,
            high_risk,
        });
    }

    let present: Vec<(usize, f64)> = amounts
        .iter()
        .enumerate()
        .filter_map(|(r, v)| v.map(|x| (r, x)))
        .collect();
    let min = present.iter().map(|(_, v)| *v).fold(f64::INFINITY, f64::min);
    let max = present.iter().map(|(_, v)| *v).fold(f64::NEG_INFINITY, f64::max);
    let width = (max - min) / bins as f64;

    let mut histogram: Vec<HistogramBin> = (0..bins)
        .map(|i| HistogramBin {
            lower: min + width * i as f64,
            upper: if i + 1 == bins { max } else { min + width * (i + 1) as f64 },
            low_risk: 0,
            high_risk: 0,
        })
        .collect();
    for (row, value) in present {
        let bin = (((value - min) / width) as usize).min(bins - 1);
        if is_high(row) {
            histogram[bin].high_risk += 1;
        } else {
            histogram[bin].low_risk += 1;
        }
    }
    Ok(DistributionView::Histogram(histogram))
}

/// Slice selected for a drill-down
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrillDown {
    Segment(String),
    Location(String),
}

/// Distribution and top contributors of one slice
#[derive(Debug, Clone)]
pub struct DrillDownReport {
    pub slice: DrillDown,
    pub rows: usize,
    pub distribution: DistributionView,
    /// Failures stay local to the request
    pub attribution: Result<Vec<FeatureContribution>, ExplainError>,
}

/// Builds drill-down views over the engineered, segmented table of a run
pub struct InsightBuilder<'a> {
    table: &'a Table,
    scoring: &'a ScoringContext,
    config: &'a AppConfig,
}

impl<'a> InsightBuilder<'a> {
    pub fn new(table: &'a Table, scoring: &'a ScoringContext, config: &'a AppConfig) -> Self {
        Self {
            table,
            scoring,
            config,
        }
    }

    /// Segments explain every member; locations a seeded sample of up to
    /// `LOCATION_SAMPLE_ROWS` rows.
    pub fn drill_down(&self, slice: DrillDown) -> PipelineResult<DrillDownReport> {
        let data = &self.config.data;
        let subset = match &slice {
            DrillDown::Segment(id) => self.table.filter_text_eq(&data.segment_column, id),
            DrillDown::Location(name) => self.table.filter_text_eq("location", name),
        };

        let distribution = amount_distribution(
            &subset,
            &data.amount_column,
            &data.label_column,
            HISTOGRAM_BINS,
        )?;

        let explained = match &slice {
            DrillDown::Segment(_) => subset.clone(),
            DrillDown::Location(_) => sample_rows(&subset, LOCATION_SAMPLE_ROWS, self.config.explain.seed),
        };
        let attribution = match self.scoring.explain_table(&explained) {
            Ok(ranking) => Ok(ranking),
            Err(PipelineError::Explain(e)) => {
                warn!(slice = ?slice, error = %e, "Drill-down attribution failed");
                Err(e)
            }
            Err(other) => return Err(other),
        };

        info!(slice = ?slice, rows = subset.n_rows(), "Drill-down computed");
        Ok(DrillDownReport {
            slice,
            rows: subset.n_rows(),
            distribution,
            attribution,
        })
    }
}

fn sample_rows(table: &Table, n: usize, seed: u64) -> Table {
    let n = n.min(table.n_rows());
    let mut rng = StdRng::seed_from_u64(seed);
    let rows = rand::seq::index::sample(&mut rng, table.n_rows(), n).into_vec();
    table.select_rows(&rows)
}
