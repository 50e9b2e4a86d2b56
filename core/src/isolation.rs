//! Isolation forest.
//!
//! Random axis-aligned splits isolate points; short average path length
//! means easy to isolate, which means abnormal. Each leaf stores its
//! depth plus the expected remaining path `c(size)` for the rows that
//! shared it, so scoring is a plain tree walk.

use crate::{
    error::{RiskError, RiskResult},
    rng::{Stage, StageRng},
    tree::{Node, Tree},
};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IsolationParams {
    pub n_estimators: usize,
    /// Rows drawn per tree, capped at the training size.
    pub max_samples: usize,
    pub seed: u64,
}

impl Default for IsolationParams {
    fn default() -> Self {
        Self { n_estimators: 100, max_samples: 256, seed: 42 }
    }
}

impl IsolationParams {
    pub fn validate(&self) -> RiskResult<()> {
        if self.n_estimators == 0 || self.max_samples == 0 {
            return Err(RiskError::Configuration(
                "isolation.n_estimators and isolation.max_samples must be >= 1".into(),
            ));
        }
        Ok(())
    }
}

/// Average path length of an unsuccessful BST search over `n` points.
pub fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsolationForest {
    trees: Vec<Tree>,
    sample_size: usize,
    params: IsolationParams,
}

impl IsolationForest {
    pub fn fit(x: &Array2<f64>, params: &IsolationParams) -> RiskResult<Self> {
        params.validate()?;
        let n = x.nrows();
        if n == 0 {
            return Err(RiskError::Dataset("isolation forest needs at least one row".into()));
        }
        let sample_size = params.max_samples.min(n);
        let height_limit = (sample_size as f64).log2().ceil().max(0.0) as usize;
        let mut rng = StageRng::for_stage(params.seed, Stage::Isolation);

        let trees = (0..params.n_estimators)
            .map(|_| {
                let mut tree_rng = rng.fork("isolation_tree");
                let rows = tree_rng.sample_indices(n, sample_size);
                let mut builder = Builder { x, rng: tree_rng, height_limit, tree: Tree::new() };
                builder.grow(rows, 0);
                builder.tree
            })
            .collect::<Vec<_>>();

        log::debug!(
            "isolation: {} trees, {} rows per tree, height limit {}",
            trees.len(),
            sample_size,
            height_limit
        );

        Ok(Self { trees, sample_size, params: params.clone() })
    }

    pub fn params(&self) -> &IsolationParams {
        &self.params
    }

    pub fn sample_size(&self) -> usize {
        self.sample_size
    }

    /// Mean path length across trees for one row.
    pub fn path_length(&self, row: &[f64]) -> f64 {
        if self.trees.is_empty() {
            return 0.0;
        }
        self.trees.iter().map(|t| t.predict(row)).sum::<f64>() / self.trees.len() as f64
    }

    /// `-2^(-E[h] / c(sample_size))`: in [-1, 0], lower is more abnormal.
    pub fn score_row(&self, row: &[f64]) -> f64 {
        let c = average_path_length(self.sample_size);
        if c <= 0.0 {
            return -1.0;
        }
        -(2f64.powf(-self.path_length(row) / c))
    }

    pub fn score_samples(&self, x: &Array2<f64>) -> Vec<f64> {
        x.rows().into_iter().map(|r| self.score_row(&r.to_vec())).collect()
    }
}

struct Builder<'a> {
    x: &'a Array2<f64>,
    rng: StageRng,
    height_limit: usize,
    tree: Tree,
}

impl Builder<'_> {
    fn grow(&mut self, rows: Vec<usize>, depth: usize) -> usize {
        let size = rows.len();
        let leaf = Node::Leaf {
            value: depth as f64 + average_path_length(size),
            cover: size as f64,
        };
        if depth >= self.height_limit || size <= 1 {
            return self.tree.push(leaf);
        }

        // Only features that still vary can isolate anything.
        let ranges: Vec<(usize, f64, f64)> = (0..self.x.ncols())
            .filter_map(|f| {
                let (lo, hi) = rows.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &i| {
                    let v = self.x[[i, f]];
                    (lo.min(v), hi.max(v))
                });
                (hi > lo).then_some((f, lo, hi))
            })
            .collect();
        if ranges.is_empty() {
            return self.tree.push(leaf);
        }

        let (feature, lo, hi) = ranges[self.rng.next_below(ranges.len())];
        let threshold = self.rng.uniform(lo, hi);
        let (left, right): (Vec<usize>, Vec<usize>) =
            rows.iter().partition(|&&i| self.x[[i, feature]] <= threshold);

        let idx = self.tree.push(leaf);
        let l = self.grow(left, depth + 1);
        let r = self.grow(right, depth + 1);
        self.tree.set(
            idx,
            Node::Split { feature, threshold, left: l, right: r, cover: size as f64 },
        );
        idx
    }
}
