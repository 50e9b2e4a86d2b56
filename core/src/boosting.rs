//! Gradient-boosted regression trees on the logistic loss.
//!
//! Second-order boosting: each round fits a tree to the gradient and
//! hessian of the log loss, leaf weight `-G / (H + lambda)` shrunk by the
//! learning rate. Node cover is the hessian sum. Output is a margin; the
//! probability is its sigmoid.

use crate::{
    error::{RiskError, RiskResult},
    rng::{Stage, StageRng},
    stats::sigmoid,
    tree::{Node, Tree, TreeEnsemble},
    types::{Label, FRAUD},
};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BoostingParams {
    pub n_estimators: usize,
    pub max_depth: usize,
    pub learning_rate: f64,
    pub subsample: f64,
    pub colsample_bytree: f64,
    /// Weight on fraud rows. None derives negatives / positives.
    pub scale_pos_weight: Option<f64>,
    pub lambda: f64,
    pub min_child_weight: f64,
    pub seed: u64,
}

impl Default for BoostingParams {
    fn default() -> Self {
        Self {
            n_estimators: 200,
            max_depth: 10,
            learning_rate: 0.1,
            subsample: 0.8,
            colsample_bytree: 0.8,
            scale_pos_weight: None,
            lambda: 1.0,
            min_child_weight: 1.0,
            seed: 42,
        }
    }
}

impl BoostingParams {
    pub fn validate(&self) -> RiskResult<()> {
        let bad = |msg: &str| Err(RiskError::Configuration(format!("boosting.{msg}")));
        if self.n_estimators == 0 {
            return bad("n_estimators must be >= 1");
        }
        if self.max_depth == 0 {
            return bad("max_depth must be >= 1");
        }
        if !(self.learning_rate > 0.0 && self.learning_rate <= 1.0) {
            return bad("learning_rate must lie in (0, 1]");
        }
        if !(self.subsample > 0.0 && self.subsample <= 1.0) {
            return bad("subsample must lie in (0, 1]");
        }
        if !(self.colsample_bytree > 0.0 && self.colsample_bytree <= 1.0) {
            return bad("colsample_bytree must lie in (0, 1]");
        }
        if self.lambda < 0.0 || self.min_child_weight < 0.0 {
            return bad("lambda and min_child_weight must be >= 0");
        }
        if matches!(self.scale_pos_weight, Some(w) if w <= 0.0) {
            return bad("scale_pos_weight must be > 0");
        }
        Ok(())
    }
}

/// negatives / positives, or 1 when either class is absent.
pub fn auto_scale_pos_weight(y: &[Label]) -> f64 {
    let pos = y.iter().filter(|&&l| l == FRAUD).count();
    let neg = y.len() - pos;
    if pos == 0 || neg == 0 {
        1.0
    } else {
        neg as f64 / pos as f64
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBoostedTrees {
    feature_names: Vec<String>,
    trees: Vec<Tree>,
    base_margin: f64,
    scale_pos_weight: f64,
    params: BoostingParams,
}

impl GradientBoostedTrees {
    pub fn fit(
        feature_names: Vec<String>,
        x: &Array2<f64>,
        y: &[Label],
        params: &BoostingParams,
    ) -> RiskResult<Self> {
        params.validate()?;
        let n = x.nrows();
        if n == 0 || n != y.len() {
            return Err(RiskError::Dataset(format!(
                "boosting needs matching non-empty rows and labels, got {n} rows and {} labels",
                y.len()
            )));
        }

        let spw = params.scale_pos_weight.unwrap_or_else(|| auto_scale_pos_weight(y));
        let weights: Vec<f64> = y.iter().map(|&l| if l == FRAUD { spw } else { 1.0 }).collect();
        let target: Vec<f64> = y.iter().map(|&l| f64::from(l)).collect();

        let n_features = x.ncols();
        let n_rows = ((n as f64) * params.subsample).round().max(1.0) as usize;
        let n_cols = ((n_features as f64) * params.colsample_bytree).round().max(1.0) as usize;

        let mut rng = StageRng::for_stage(params.seed, Stage::Boosting);
        let base_margin = 0.0;
        let mut margin = vec![base_margin; n];
        let mut grad = vec![0.0; n];
        let mut hess = vec![0.0; n];
        let mut trees = Vec::with_capacity(params.n_estimators);

        for _ in 0..params.n_estimators {
            for i in 0..n {
                let p = sigmoid(margin[i]);
                grad[i] = (p - target[i]) * weights[i];
                hess[i] = (p * (1.0 - p)).max(1e-16) * weights[i];
            }

            let mut rows = rng.sample_indices(n, n_rows);
            rows.sort_unstable();
            let mut cols = rng.sample_indices(n_features, n_cols);
            cols.sort_unstable();

            let mut grower = Grower {
                x,
                grad: &grad,
                hess: &hess,
                cols: &cols,
                params,
                tree: Tree::new(),
            };
            grower.grow(rows, 0);
            let tree = grower.tree;

            for (i, m) in margin.iter_mut().enumerate() {
                *m += tree.predict(&x.row(i).to_vec());
            }
            trees.push(tree);
        }

        log::info!(
            "boosting: fitted {} rounds on {} rows (scale_pos_weight={spw:.3})",
            trees.len(),
            n
        );

        Ok(Self {
            feature_names,
            trees,
            base_margin,
            scale_pos_weight: spw,
            params: params.clone(),
        })
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn params(&self) -> &BoostingParams {
        &self.params
    }

    pub fn scale_pos_weight(&self) -> f64 {
        self.scale_pos_weight
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn predict_margin(&self, row: &[f64]) -> f64 {
        self.ensemble().predict(row)
    }

    pub fn predict_row(&self, row: &[f64]) -> f64 {
        sigmoid(self.predict_margin(row))
    }

    pub fn predict_proba(&self, x: &Array2<f64>) -> Vec<f64> {
        x.rows()
            .into_iter()
            .map(|r| self.predict_row(&r.to_vec()))
            .collect()
    }

    /// Trees in margin space: attributions explain the log-odds.
    pub fn ensemble(&self) -> TreeEnsemble<'_> {
        TreeEnsemble {
            trees: &self.trees,
            tree_weight: 1.0,
            base: self.base_margin,
        }
    }
}

struct Grower<'a> {
    x: &'a Array2<f64>,
    grad: &'a [f64],
    hess: &'a [f64],
    cols: &'a [usize],
    params: &'a BoostingParams,
    tree: Tree,
}

struct Split {
    feature: usize,
    threshold: f64,
    gain: f64,
}

impl Grower<'_> {
    fn grow(&mut self, rows: Vec<usize>, depth: usize) -> usize {
        let (g, h) = self.sums(&rows);
        let idx = self.tree.push(Node::Leaf {
            value: -g / (h + self.params.lambda) * self.params.learning_rate,
            cover: h,
        });
        if depth >= self.params.max_depth || rows.len() < 2 {
            return idx;
        }
        let Some(split) = self.best_split(&rows, g, h) else {
            return idx;
        };

        let (left, right): (Vec<usize>, Vec<usize>) = rows
            .iter()
            .partition(|&&i| self.x[[i, split.feature]] <= split.threshold);
        let l = self.grow(left, depth + 1);
        let r = self.grow(right, depth + 1);
        self.tree.set(
            idx,
            Node::Split {
                feature: split.feature,
                threshold: split.threshold,
                left: l,
                right: r,
                cover: h,
            },
        );
        idx
    }

    fn sums(&self, rows: &[usize]) -> (f64, f64) {
        rows.iter()
            .fold((0.0, 0.0), |(g, h), &i| (g + self.grad[i], h + self.hess[i]))
    }

    fn score(&self, g: f64, h: f64) -> f64 {
        g * g / (h + self.params.lambda)
    }

    fn best_split(&self, rows: &[usize], g: f64, h: f64) -> Option<Split> {
        let parent = self.score(g, h);
        let min_child = self.params.min_child_weight;
        let mut best: Option<Split> = None;

        for &feature in self.cols {
            let mut order: Vec<(f64, usize)> =
                rows.iter().map(|&i| (self.x[[i, feature]], i)).collect();
            order.sort_by(|a, b| a.0.total_cmp(&b.0));

            let mut gl = 0.0;
            let mut hl = 0.0;
            for k in 0..order.len() - 1 {
                let i = order[k].1;
                gl += self.grad[i];
                hl += self.hess[i];
                let (v, next) = (order[k].0, order[k + 1].0);
                if v == next {
                    continue;
                }
                let (gr, hr) = (g - gl, h - hl);
                if hl < min_child || hr < min_child {
                    continue;
                }
                let gain = 0.5 * (self.score(gl, hl) + self.score(gr, hr) - parent);
                if gain > 1e-12 && best.as_ref().map_or(true, |b| gain > b.gain) {
                    let mut threshold = (v + next) / 2.0;
                    if threshold >= next {
                        threshold = v;
                    }
                    best = Some(Split { feature, threshold, gain });
                }
            }
        }
        best
    }
}
