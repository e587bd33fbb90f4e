//! Bagged CART forest with class-weighted Gini splits.
//!
//! Every node records its cover (the weighted sample mass that reached it
//! during fitting); TreeSHAP depends on these covers.

use ndarray::{ArrayView1, ArrayView2};
use rand::rngs::StdRng;
use rand::seq::index;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Smallest impurity decrease accepted for a split
const MIN_IMPURITY_DECREASE: f64 = 1e-12;

/// Tree growth parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TreeParams {
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    /// Candidate features drawn per split
    pub max_features: usize,
    /// Sample weight of each class, indexed by label
    pub class_weights: [f64; 2],
}

/// A node of a fitted tree. `x[feature] <= threshold` goes left.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
        cover: f64,
    },
    Leaf {
        /// Weighted fraction of high-risk rows
        value: f64,
        cover: f64,
    },
}

impl Node {
    pub fn cover(&self) -> f64 {
        match self {
            Node::Split { cover, .. } | Node::Leaf { cover, .. } => *cover,
        }
    }
}

/// Single classification tree; node 0 is the root
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    nodes: Vec<Node>,
}

impl DecisionTree {
    /// Grow a tree on `rows` (indices into `features`, duplicates allowed).
    pub fn fit(
        features: ArrayView2<'_, f64>,
        labels: &[u8],
        rows: &mut [usize],
        params: &TreeParams,
        rng: &mut StdRng,
    ) -> Self {
        let mut builder = TreeBuilder {
            features,
            labels,
            params,
            nodes: Vec::new(),
        };
        builder.grow(rows, 0, rng);
        Self {
            nodes: builder.nodes,
        }
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, index: usize) -> &Node {
        &self.nodes[index]
    }

    /// Leaf probability for one row
    pub fn predict_row(&self, row: ArrayView1<'_, f64>) -> f64 {
        let mut index = 0;
        loop {
            match &self.nodes[index] {
                Node::Leaf { value, .. } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                    ..
                } => {
                    index = if row[*feature] <= *threshold { *left } else { *right };
                }
            }
        }
    }

    /// Cover-weighted mean leaf value, i.e. the tree output with no
    /// feature known
    pub fn expected_value(&self) -> f64 {
        self.expected_from(0)
    }

    fn expected_from(&self, index: usize) -> f64 {
        match &self.nodes[index] {
            Node::Leaf { value, .. } => *value,
            Node::Split {
                left, right, cover, ..
            } => {
                if *cover <= 0.0 {
                    return 0.0;
                }
                let l = self.nodes[*left].cover();
                let r = self.nodes[*right].cover();
                (l * self.expected_from(*left) + r * self.expected_from(*right)) / cover
            }
        }
    }

    pub fn depth(&self) -> usize {
        self.depth_from(0)
    }

    fn depth_from(&self, index: usize) -> usize {
        match &self.nodes[index] {
            Node::Leaf { .. } => 0,
            Node::Split { left, right, .. } => {
                1 + self.depth_from(*left).max(self.depth_from(*right))
            }
        }
    }
}

struct TreeBuilder<'a, 'b> {
    features: ArrayView2<'a, f64>,
    labels: &'b [u8],
    params: &'b TreeParams,
    nodes: Vec<Node>,
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    impurity: f64,
}

impl TreeBuilder<'_, '_> {
    fn weight(&self, row: usize) -> f64 {
        self.params.class_weights[self.labels[row] as usize]
    }

    fn class_mass(&self, rows: &[usize]) -> (f64, f64) {
        rows.iter().fold((0.0, 0.0), |(total, positive), &r| {
            let w = self.weight(r);
            let pos = if self.labels[r] == 1 { w } else { 0.0 };
            (total + w, positive + pos)
        })
    }

    fn grow(&mut self, rows: &mut [usize], depth: usize, rng: &mut StdRng) -> usize {
        let (total, positive) = self.class_mass(rows);
        let value = if total > 0.0 { positive / total } else { 0.0 };
        let index = self.nodes.len();
        self.nodes.push(Node::Leaf {
            value,
            cover: total,
        });

        let pure = positive <= 0.0 || positive >= total;
        if depth >= self.params.max_depth
            || rows.len() < 2 * self.params.min_samples_leaf.max(1)
            || pure
        {
            return index;
        }

        let Some(split) = self.best_split(rows, total, positive, rng) else {
            return index;
        };

        let mid = partition(rows, |&r| self.features[[r, split.feature]] <= split.threshold);
        let (left_rows, right_rows) = rows.split_at_mut(mid);
        let left = self.grow(left_rows, depth + 1, rng);
        let right = self.grow(right_rows, depth + 1, rng);

        self.nodes[index] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
            cover: total,
        };
        index
    }

    fn best_split(
        &self,
        rows: &[usize],
        total: f64,
        positive: f64,
        rng: &mut StdRng,
    ) -> Option<BestSplit> {
        let n_features = self.features.ncols();
        let k = self.params.max_features.clamp(1, n_features.max(1));
        if n_features == 0 {
            return None;
        }

        let parent = total * gini(total, positive);
        let min_leaf = self.params.min_samples_leaf.max(1);
        let mut best: Option<BestSplit> = None;
        let mut sorted: Vec<usize> = rows.to_vec();

        for feature in index::sample(rng, n_features, k).into_iter() {
            sorted.sort_by(|&a, &b| {
                self.features[[a, feature]]
                    .partial_cmp(&self.features[[b, feature]])
                    .unwrap_or(Ordering::Equal)
            });

            let mut left_total = 0.0;
            let mut left_positive = 0.0;
            for i in 1..sorted.len() {
                let prev = sorted[i - 1];
                let w = self.weight(prev);
                left_total += w;
                if self.labels[prev] == 1 {
                    left_positive += w;
                }

                if i < min_leaf || sorted.len() - i < min_leaf {
                    continue;
                }
                let lo = self.features[[prev, feature]];
                let hi = self.features[[sorted[i], feature]];
                if hi <= lo {
                    continue;
                }

                let right_total = total - left_total;
                let right_positive = positive - left_positive;
                let impurity = left_total * gini(left_total, left_positive)
                    + right_total * gini(right_total, right_positive);

                if best.as_ref().map_or(true, |b| impurity < b.impurity) {
                    let mut threshold = lo + (hi - lo) / 2.0;
                    if threshold >= hi {
                        threshold = lo;
                    }
                    best = Some(BestSplit {
                        feature,
                        threshold,
                        impurity,
                    });
                }
            }
        }

        best.filter(|b| parent - b.impurity > MIN_IMPURITY_DECREASE * total.max(1.0))
    }
}

fn gini(total: f64, positive: f64) -> f64 {
    if total <= 0.0 {
        return 0.0;
    }
    let p = positive / total;
    1.0 - p * p - (1.0 - p) * (1.0 - p)
}

/// Stable-enough in-place partition; returns the size of the `true` prefix
fn partition<F: Fn(&usize) -> bool>(rows: &mut [usize], pred: F) -> usize {
    let mut mid = 0;
    for i in 0..rows.len() {
        if pred(&rows[i]) {
            rows.swap(mid, i);
            mid += 1;
        }
    }
    mid
}

/// Bootstrap-aggregated ensemble of `DecisionTree`s
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    trees: Vec<DecisionTree>,
    n_features: usize,
    params: TreeParams,
}

impl RandomForest {
    /// Fit `n_estimators` trees in parallel. Tree `i` draws its bootstrap
    /// sample and feature subsets from `seed + i`, so the result does not
    /// depend on thread scheduling.
    pub fn fit(
        features: ArrayView2<'_, f64>,
        labels: &[u8],
        n_estimators: usize,
        params: TreeParams,
        seed: u64,
    ) -> Self {
        let n_rows = features.nrows();
        let trees = (0..n_estimators)
            .into_par_iter()
            .map(|i| {
                let mut rng = StdRng::seed_from_u64(seed.wrapping_add(i as u64));
                let mut rows: Vec<usize> = (0..n_rows).map(|_| rng.gen_range(0..n_rows)).collect();
                DecisionTree::fit(features, labels, &mut rows, &params, &mut rng)
            })
            .collect();

        Self {
            trees,
            n_features: features.ncols(),
            params,
        }
    }

    pub fn trees(&self) -> &[DecisionTree] {
        &self.trees
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn params(&self) -> &TreeParams {
        &self.params
    }

    /// Mean tree probability for one row
    pub fn predict_row(&self, row: ArrayView1<'_, f64>) -> f64 {
        if self.trees.is_empty() {
            return 0.0;
        }
        self.trees.iter().map(|t| t.predict_row(row)).sum::<f64>() / self.trees.len() as f64
    }

    pub fn predict_proba(&self, features: ArrayView2<'_, f64>) -> Vec<f64> {
        (0..features.nrows())
            .into_par_iter()
            .map(|i| self.predict_row(features.row(i)))
            .collect()
    }

    /// Mean of the trees' expected values
    pub fn expected_value(&self) -> f64 {
        if self.trees.is_empty() {
            return 0.0;
        }
        self.trees.iter().map(DecisionTree::expected_value).sum::<f64>() / self.trees.len() as f64
    }

    /// Number of splits on each feature across the forest
    pub fn split_counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.n_features];
        for tree in &self.trees {
            for node in tree.nodes() {
                if let Node::Split { feature, .. } = node {
                    counts[*feature] += 1;
                }
            }
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{array, Array2};

    fn params() -> TreeParams {
        TreeParams {
            max_depth: 5,
            min_samples_leaf: 1,
            max_features: 2,
            class_weights: [1.0, 1.0],
        }
    }

    fn separable() -> (Array2<f64>, Vec<u8>) {
        let x = Array2::from_shape_fn((40, 2), |(i, j)| if j == 0 { i as f64 } else { 1.0 });
        let y = (0..40).map(|i| (i >= 30) as u8).collect();
        (x, y)
    }

    #[test]
    fn test_tree_learns_threshold() {
        let (x, y) = separable();
        let mut rows: Vec<usize> = (0..40).collect();
        let mut rng = StdRng::seed_from_u64(1);
        let tree = DecisionTree::fit(x.view(), &y, &mut rows, &params(), &mut rng);

        assert_eq!(tree.predict_row(array![35.0, 1.0].view()), 1.0);
        assert_eq!(tree.predict_row(array![5.0, 1.0].view()), 0.0);
        match tree.node(0) {
            Node::Split {
                feature, threshold, ..
            } => {
                assert_eq!(*feature, 0);
                assert_relative_eq!(*threshold, 29.5);
            }
            other => panic!("expected split at root, got {other:?}"),
        }
    }

    #[test]
    fn test_covers_add_up() {
        let (x, y) = separable();
        let mut rows: Vec<usize> = (0..40).collect();
        let mut rng = StdRng::seed_from_u64(1);
        let weighted = TreeParams {
            class_weights: [1.0, 2.5],
            ..params()
        };
        let tree = DecisionTree::fit(x.view(), &y, &mut rows, &weighted, &mut rng);

        assert_relative_eq!(tree.node(0).cover(), 30.0 + 10.0 * 2.5);
        for node in tree.nodes() {
            if let Node::Split {
                left, right, cover, ..
            } = node
            {
                let sum = tree.node(*left).cover() + tree.node(*right).cover();
                assert_relative_eq!(*cover, sum);
            }
        }
    }

    #[test]
    fn test_min_samples_leaf_and_depth_bound() {
        let (x, y) = separable();
        let mut rows: Vec<usize> = (0..40).collect();
        let mut rng = StdRng::seed_from_u64(1);
        let shallow = TreeParams {
            max_depth: 1,
            min_samples_leaf: 15,
            ..params()
        };
        let tree = DecisionTree::fit(x.view(), &y, &mut rows, &shallow, &mut rng);
        assert!(tree.depth() <= 1);
    }

    #[test]
    fn test_tree_fits_with_short_lived_params() {
        let (x, y) = separable();
        let view = x.view();
        let tree = {
            let local = TreeParams {
                max_depth: 2,
                ..params()
            };
            let mut rows: Vec<usize> = (0..40).collect();
            let mut rng = StdRng::seed_from_u64(5);
            DecisionTree::fit(view, &y, &mut rows, &local, &mut rng)
        };
        assert!(tree.depth() <= 2);
        assert_eq!(tree.predict_row(view.row(39)), 1.0);
    }

    #[test]
    fn test_forest_is_reproducible() {
        let (x, y) = separable();
        let a = RandomForest::fit(x.view(), &y, 10, params(), 42);
        let b = RandomForest::fit(x.view(), &y, 10, params(), 42);
        assert_eq!(a, b);
        assert_eq!(a.predict_proba(x.view()), b.predict_proba(x.view()));
    }

    #[test]
    fn test_forest_probabilities_in_unit_interval() {
        let (x, y) = separable();
        let forest = RandomForest::fit(x.view(), &y, 20, params(), 7);
        for p in forest.predict_proba(x.view()) {
            assert!((0.0..=1.0).contains(&p));
        }
        assert!(forest.predict_row(array![39.0, 1.0].view()) > 0.5);
        assert!(forest.split_counts()[0] > 0);
        assert_eq!(forest.split_counts()[1], 0);
    }

    #[test]
    fn test_expected_value_is_root_mean() {
        let (x, y) = separable();
        let mut rows: Vec<usize> = (0..40).collect();
        let mut rng = StdRng::seed_from_u64(3);
        let tree = DecisionTree::fit(x.view(), &y, &mut rows, &params(), &mut rng);
        assert_relative_eq!(tree.expected_value(), 10.0 / 40.0, epsilon = 1e-12);
    }
}
