//! Customer segmentation with seeded k-means.
//!
//! Every record gets a segment id (`"0"`..`"k-1"`) computed from the
//! numeric feature subspace, excluding the risk label so the target never
//! leaks into the segmentation.

use crate::config::{DataConfig, SegmentationConfig};
use crate::error::{PipelineError, PipelineResult, Stage};
use crate::types::{Column, Table};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Fitted segmentation: centroids over named numeric columns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentModel {
    /// Numeric columns the centroids live in, in order
    pub feature_columns: Vec<String>,
    /// One row per segment
    pub centroids: Array2<f64>,
    /// Sum of squared distances of records to their centroid
    pub inertia: f64,
}

impl SegmentModel {
    pub fn n_segments(&self) -> usize {
        self.centroids.nrows()
    }

    /// Nearest centroid for each row of `features` (ties go to the lower id)
    pub fn assign_rows(&self, features: ArrayView2<'_, f64>) -> Vec<usize> {
        features
            .rows()
            .into_iter()
            .map(|row| nearest(&self.centroids, row).0)
            .collect()
    }

    /// Segment ids for the records of `table`.
    ///
    /// Feature columns absent from the table count as 0.
    pub fn assign(&self, table: &Table) -> Vec<usize> {
        let features = feature_matrix(table, &self.feature_columns);
        self.assign_rows(features.view())
    }
}

/// Segment id as stored in the categorical segment column
pub fn segment_label(segment: usize) -> String {
    segment.to_string()
}

/// Unsupervised segment assignment over numeric features.
#[derive(Debug, Clone)]
pub struct SegmentAssigner {
    clusters: usize,
    max_iter: usize,
    n_init: usize,
    tolerance: f64,
    seed: u64,
    label_column: String,
    segment_column: String,
}

impl SegmentAssigner {
    pub fn new(config: &SegmentationConfig, data: &DataConfig) -> Self {
        Self {
            clusters: config.clusters,
            max_iter: config.max_iter.max(1),
            n_init: config.n_init.max(1),
            tolerance: config.tolerance,
            seed: config.seed,
            label_column: data.label_column.clone(),
            segment_column: data.segment_column.clone(),
        }
    }

    pub fn segment_column(&self) -> &str {
        &self.segment_column
    }

    /// Numeric columns used for clustering: all numeric columns but the label
    pub fn feature_columns(&self, table: &Table) -> Vec<String> {
        table
            .numeric_column_names()
            .into_iter()
            .filter(|name| *name != self.label_column)
            .map(str::to_string)
            .collect()
    }

    /// Fit k-means (k-means++ seeding, best of `n_init` restarts).
    pub fn fit(&self, table: &Table) -> PipelineResult<SegmentModel> {
        if self.clusters == 0 {
            return Err(PipelineError::InvalidParameter {
                stage: Stage::Segmentation,
                message: "cluster count must be at least 1".to_string(),
            });
        }
        if table.is_empty() {
            return Err(PipelineError::EmptyDataset {
                stage: Stage::Segmentation,
            });
        }
        let feature_columns = self.feature_columns(table);
        if feature_columns.is_empty() {
            return Err(PipelineError::InvalidParameter {
                stage: Stage::Segmentation,
                message: "no numeric feature columns to cluster".to_string(),
            });
        }

        let features = feature_matrix(table, &feature_columns);
        let tolerance = self.tolerance * mean_variance(features.view());
        let mut rng = StdRng::seed_from_u64(self.seed);

        let mut best: Option<(Array2<f64>, f64)> = None;
        for run in 0..self.n_init {
            let initial = kmeans_plus_plus(features.view(), self.clusters, &mut rng);
            let (centroids, inertia, iterations) =
                lloyd(features.view(), initial, self.max_iter, tolerance);
            debug!(run, inertia, iterations, "k-means run finished");
            if best.as_ref().map_or(true, |(_, b)| inertia < *b) {
                best = Some((centroids, inertia));
            }
        }

        let (centroids, inertia) = best.ok_or(PipelineError::InvalidParameter {
            stage: Stage::Segmentation,
            message: "no k-means run completed".to_string(),
        })?;

        Ok(SegmentModel {
            feature_columns,
            centroids,
            inertia,
        })
    }

    /// Fit the segmentation and append the segment column to a new table.
    pub fn fit_assign(&self, table: &Table) -> PipelineResult<(Table, SegmentModel)> {
        let model = self.fit(table)?;
        let segmented = self.assign(table, &model)?;

        info!(
            segments = model.n_segments(),
            features = model.feature_columns.len(),
            inertia = model.inertia,
            "Customer segmentation complete"
        );
        Ok((segmented, model))
    }

    /// Append the segment column computed by an already fitted model
    pub fn assign(&self, table: &Table, model: &SegmentModel) -> PipelineResult<Table> {
        let labels = model
            .assign(table)
            .into_iter()
            .map(|s| Some(segment_label(s)))
            .collect();
        table.with_column(Column::text(self.segment_column.clone(), labels))
    }
}

/// Dense row-major matrix of the named numeric columns; missing → 0.
fn feature_matrix(table: &Table, columns: &[String]) -> Array2<f64> {
    let mut matrix = Array2::zeros((table.n_rows(), columns.len()));
    for (j, name) in columns.iter().enumerate() {
        if let Some(values) = table.numeric(name) {
            for (i, value) in values.iter().enumerate() {
                matrix[[i, j]] = value.unwrap_or(0.0);
            }
        }
    }
    matrix
}

fn mean_variance(features: ArrayView2<'_, f64>) -> f64 {
    if features.nrows() == 0 || features.ncols() == 0 {
        return 0.0;
    }
    features.var_axis(Axis(0), 0.0).mean().unwrap_or(0.0)
}

fn squared_distance(a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum()
}

fn nearest(centroids: &Array2<f64>, row: ArrayView1<'_, f64>) -> (usize, f64) {
    let mut best = (0, f64::INFINITY);
    for (idx, centroid) in centroids.rows().into_iter().enumerate() {
        let d = squared_distance(row, centroid);
        if d < best.1 {
            best = (idx, d);
        }
    }
    best
}

/// k-means++ seeding. When every remaining point coincides with a chosen
/// centroid the next centroid is drawn uniformly, which may duplicate one.
fn kmeans_plus_plus(features: ArrayView2<'_, f64>, k: usize, rng: &mut StdRng) -> Array2<f64> {
    let n = features.nrows();
    let mut centroids = Array2::zeros((k, features.ncols()));
    centroids
        .row_mut(0)
        .assign(&features.row(rng.gen_range(0..n)));

    let mut distances: Array1<f64> = features
        .rows()
        .into_iter()
        .map(|row| squared_distance(row, centroids.row(0)))
        .collect();

    for c in 1..k {
        let total: f64 = distances.sum();
        let chosen = if total > 0.0 {
            let target = rng.gen::<f64>() * total;
            let mut cumulative = 0.0;
            let mut chosen = n - 1;
            for (i, d) in distances.iter().enumerate() {
                cumulative += d;
                if cumulative > target {
                    chosen = i;
                    break;
                }
            }
            chosen
        } else {
            rng.gen_range(0..n)
        };

        centroids.row_mut(c).assign(&features.row(chosen));
        for (i, row) in features.rows().into_iter().enumerate() {
            let d = squared_distance(row, centroids.row(c));
            if d < distances[i] {
                distances[i] = d;
            }
        }
    }

    centroids
}

/// Lloyd iterations until the centroid shift drops to `tolerance`, the
/// assignment stops changing, or `max_iter` is hit. Empty clusters keep
/// their previous centroid.
fn lloyd(
    features: ArrayView2<'_, f64>,
    mut centroids: Array2<f64>,
    max_iter: usize,
    tolerance: f64,
) -> (Array2<f64>, f64, usize) {
    let k = centroids.nrows();
    let mut assignment: Vec<usize> = vec![usize::MAX; features.nrows()];
    let mut iterations = 0;

    for _ in 0..max_iter {
        iterations += 1;
        let mut changed = false;
        for (i, row) in features.rows().into_iter().enumerate() {
            let (cluster, _) = nearest(&centroids, row);
            if assignment[i] != cluster {
                assignment[i] = cluster;
                changed = true;
            }
        }

        let mut sums = Array2::<f64>::zeros(centroids.raw_dim());
        let mut counts = vec![0usize; k];
        for (i, row) in features.rows().into_iter().enumerate() {
            let mut target = sums.row_mut(assignment[i]);
            target += &row;
            counts[assignment[i]] += 1;
        }

        let mut shift = 0.0;
        for c in 0..k {
            if counts[c] == 0 {
                continue;
            }
            let updated = &sums.row(c) / counts[c] as f64;
            shift += squared_distance(updated.view(), centroids.row(c));
            centroids.row_mut(c).assign(&updated);
        }

        if !changed || shift <= tolerance {
            break;
        }
    }

    let inertia = features
        .rows()
        .into_iter()
        .map(|row| nearest(&centroids, row).1)
        .sum();
    (centroids, inertia, iterations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    fn assigner(clusters: usize) -> SegmentAssigner {
        let mut config = AppConfig::default();
        config.segmentation.clusters = clusters;
        SegmentAssigner::new(&config.segmentation, &config.data)
    }

    fn two_blobs() -> Table {
        let xs = vec![0.0, 0.1, 0.2, 10.0, 10.1, 10.2];
        let ys = vec![0.0, 0.2, 0.1, 5.0, 5.1, 5.2];
        Table::new(vec![
            Column::numeric("x", xs.into_iter().map(Some).collect()),
            Column::numeric("y", ys.into_iter().map(Some).collect()),
            Column::numeric(
                "claim_risk",
                vec![Some(1.0), Some(0.0), Some(1.0), Some(0.0), Some(1.0), Some(0.0)],
            ),
            Column::text("location", vec![Some("A".into()); 6]),
        ])
        .unwrap()
    }

    #[test]
    fn test_label_excluded_from_features() {
        let columns = assigner(2).feature_columns(&two_blobs());
        assert_eq!(columns, vec!["x".to_string(), "y".to_string()]);
    }

    #[test]
    fn test_separates_blobs() {
        let (table, model) = assigner(2).fit_assign(&two_blobs()).unwrap();
        let segments = table.text("customer_segment").unwrap();

        assert_eq!(model.n_segments(), 2);
        assert_eq!(segments[0], segments[1]);
        assert_eq!(segments[1], segments[2]);
        assert_eq!(segments[3], segments[4]);
        assert_ne!(segments[0], segments[3]);
    }

    #[test]
    fn test_seeded_fit_is_reproducible() {
        let a = assigner(3).fit(&two_blobs()).unwrap();
        let b = assigner(3).fit(&two_blobs()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_fewer_distinct_points_than_clusters() {
        let table = Table::new(vec![Column::numeric("x", vec![Some(1.0); 5])]).unwrap();
        let (segmented, model) = assigner(4).fit_assign(&table).unwrap();

        assert_eq!(model.n_segments(), 4);
        assert_eq!(model.inertia, 0.0);
        let segments = segmented.text("customer_segment").unwrap();
        assert_eq!(segments.len(), 5);
        assert!(segments.iter().all(|s| s.as_deref() == Some("0")));
    }

    #[test]
    fn test_zero_clusters_rejected() {
        assert!(assigner(0).fit(&two_blobs()).is_err());
    }

    #[test]
    fn test_assign_new_records() {
        let (_, model) = assigner(2).fit_assign(&two_blobs()).unwrap();
        let queries = Table::new(vec![
            Column::numeric("x", vec![Some(9.9), Some(0.05)]),
            Column::numeric("y", vec![Some(5.0), Some(0.1)]),
        ])
        .unwrap();
        let fitted = model.assign(&two_blobs());
        let assigned = model.assign(&queries);
        assert_eq!(assigned[0], fitted[3]);
        assert_eq!(assigned[1], fitted[0]);
    }
}
