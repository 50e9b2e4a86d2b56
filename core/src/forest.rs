//! Bagged CART classifier (random forest).
//!
//! Each tree is grown on a bootstrap sample with Gini impurity, a random
//! feature subset per split and balanced class weights. Leaves hold the
//! weighted fraud fraction, so the forest probability is the mean leaf
//! value across trees.

use crate::{
    error::{RiskError, RiskResult},
    rng::{Stage, StageRng},
    tree::{Node, Tree, TreeEnsemble},
    types::{Label, FRAUD},
};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaxFeatures {
    Sqrt,
    Log2,
    All,
}

impl MaxFeatures {
    pub fn resolve(self, n_features: usize) -> usize {
        let n = n_features as f64;
        let k = match self {
            MaxFeatures::Sqrt => n.sqrt() as usize,
            MaxFeatures::Log2 => n.log2() as usize,
            MaxFeatures::All => n_features,
        };
        k.clamp(1, n_features.max(1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassWeight {
    /// Each class weighted `n / (2 * n_class)`.
    Balanced,
    Uniform,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ForestParams {
    pub n_estimators: usize,
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub max_features: MaxFeatures,
    pub class_weight: ClassWeight,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 200,
            max_depth: 20,
            min_samples_split: 10,
            min_samples_leaf: 4,
            max_features: MaxFeatures::Sqrt,
            class_weight: ClassWeight::Balanced,
            seed: 42,
        }
    }
}

impl ForestParams {
    pub fn validate(&self) -> RiskResult<()> {
        if self.n_estimators == 0 {
            return Err(RiskError::Configuration("forest.n_estimators must be >= 1".into()));
        }
        if self.max_depth == 0 {
            return Err(RiskError::Configuration("forest.max_depth must be >= 1".into()));
        }
        if self.min_samples_split < 2 {
            return Err(RiskError::Configuration("forest.min_samples_split must be >= 2".into()));
        }
        if self.min_samples_leaf == 0 {
            return Err(RiskError::Configuration("forest.min_samples_leaf must be >= 1".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    feature_names: Vec<String>,
    trees: Vec<Tree>,
    importances: Vec<f64>,
    params: ForestParams,
}

impl RandomForest {
    /// Fit on rows already ordered as `feature_names`.
    pub fn fit(
        feature_names: Vec<String>,
        x: &Array2<f64>,
        y: &[Label],
        params: &ForestParams,
    ) -> RiskResult<Self> {
        params.validate()?;
        if x.nrows() == 0 || x.nrows() != y.len() {
            return Err(RiskError::Dataset(format!(
                "forest needs matching non-empty rows and labels, got {} rows and {} labels",
                x.nrows(),
                y.len()
            )));
        }

        let n_features = x.ncols();
        let weights = class_weights(y, params.class_weight);
        let n_try = params.max_features.resolve(n_features);
        let mut rng = StageRng::for_stage(params.seed, Stage::Forest);

        let mut trees = Vec::with_capacity(params.n_estimators);
        let mut importances = vec![0.0; n_features];

        for _ in 0..params.n_estimators {
            let mut tree_rng = rng.fork("forest_tree");
            let n = y.len();
            let bootstrap: Vec<usize> = (0..n).map(|_| tree_rng.next_below(n)).collect();

            let mut grower = Grower {
                x,
                y,
                weights: &weights,
                params,
                n_try,
                rng: tree_rng,
                tree: Tree::new(),
                importance: vec![0.0; n_features],
            };
            grower.grow(bootstrap, 0);

            let total: f64 = grower.importance.iter().sum();
            if total > 0.0 {
                for (acc, v) in importances.iter_mut().zip(&grower.importance) {
                    *acc += v / total;
                }
            }
            trees.push(grower.tree);
        }

        let total: f64 = importances.iter().sum();
        if total > 0.0 {
            for v in &mut importances {
                *v /= total;
            }
        }

        log::info!(
            "forest: fitted {} trees on {} rows x {} features",
            trees.len(),
            x.nrows(),
            n_features
        );

        Ok(Self {
            feature_names,
            trees,
            importances,
            params: params.clone(),
        })
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn params(&self) -> &ForestParams {
        &self.params
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    /// Normalised mean impurity decrease per feature; sums to 1 unless
    /// no tree ever split.
    pub fn feature_importances(&self) -> &[f64] {
        &self.importances
    }

    pub fn predict_row(&self, row: &[f64]) -> f64 {
        self.ensemble().predict(row)
    }

    /// Fraud-class probability per row.
    pub fn predict_proba(&self, x: &Array2<f64>) -> Vec<f64> {
        x.rows()
            .into_iter()
            .map(|r| self.predict_row(&r.to_vec()))
            .collect()
    }

    pub fn ensemble(&self) -> TreeEnsemble<'_> {
        TreeEnsemble {
            trees: &self.trees,
            tree_weight: 1.0 / self.trees.len().max(1) as f64,
            base: 0.0,
        }
    }
}

fn class_weights(y: &[Label], mode: ClassWeight) -> Vec<f64> {
    match mode {
        ClassWeight::Uniform => vec![1.0; y.len()],
        ClassWeight::Balanced => {
            let n = y.len() as f64;
            let n_pos = y.iter().filter(|&&l| l == FRAUD).count() as f64;
            let n_neg = n - n_pos;
            let w_pos = if n_pos > 0.0 { n / (2.0 * n_pos) } else { 1.0 };
            let w_neg = if n_neg > 0.0 { n / (2.0 * n_neg) } else { 1.0 };
            y.iter()
                .map(|&l| if l == FRAUD { w_pos } else { w_neg })
                .collect()
        }
    }
}

/// Weighted Gini impurity of a node with total weight `w` and fraud weight `wp`.
fn gini(w: f64, wp: f64) -> f64 {
    if w <= 0.0 {
        return 0.0;
    }
    let p = wp / w;
    1.0 - p * p - (1.0 - p) * (1.0 - p)
}

struct Split {
    feature: usize,
    threshold: f64,
    impurity: f64,
}

struct Grower<'a> {
    x: &'a Array2<f64>,
    y: &'a [Label],
    weights: &'a [f64],
    params: &'a ForestParams,
    n_try: usize,
    rng: StageRng,
    tree: Tree,
    importance: Vec<f64>,
}

impl Grower<'_> {
    fn grow(&mut self, samples: Vec<usize>, depth: usize) -> usize {
        let (w, wp) = self.totals(&samples);
        let idx = self.tree.push(Node::Leaf {
            value: if w > 0.0 { wp / w } else { 0.0 },
            cover: w,
        });

        let pure = wp <= 0.0 || wp >= w;
        if pure || depth >= self.params.max_depth || samples.len() < self.params.min_samples_split {
            return idx;
        }

        let Some(split) = self.best_split(&samples) else {
            return idx;
        };

        let (left, right): (Vec<usize>, Vec<usize>) = samples
            .iter()
            .partition(|&&i| self.x[[i, split.feature]] <= split.threshold);

        self.importance[split.feature] += w * gini(w, wp) - split.impurity;

        let l = self.grow(left, depth + 1);
        let r = self.grow(right, depth + 1);
        self.tree.set(
            idx,
            Node::Split {
                feature: split.feature,
                threshold: split.threshold,
                left: l,
                right: r,
                cover: w,
            },
        );
        idx
    }

    fn totals(&self, samples: &[usize]) -> (f64, f64) {
        samples.iter().fold((0.0, 0.0), |(w, wp), &i| {
            let wi = self.weights[i];
            (w + wi, if self.y[i] == FRAUD { wp + wi } else { wp })
        })
    }

    /// Lowest weighted child impurity over a random feature subset.
    fn best_split(&mut self, samples: &[usize]) -> Option<Split> {
        let min_leaf = self.params.min_samples_leaf;
        let n = samples.len();
        let (w_total, wp_total) = self.totals(samples);
        let mut best: Option<Split> = None;

        for feature in self.rng.sample_indices(self.x.ncols(), self.n_try) {
            let mut order: Vec<(f64, usize)> =
                samples.iter().map(|&i| (self.x[[i, feature]], i)).collect();
            order.sort_by(|a, b| a.0.total_cmp(&b.0));

            let mut wl = 0.0;
            let mut wpl = 0.0;
            for k in 0..n - 1 {
                let i = order[k].1;
                wl += self.weights[i];
                if self.y[i] == FRAUD {
                    wpl += self.weights[i];
                }
                let (v, next) = (order[k].0, order[k + 1].0);
                if v == next || k + 1 < min_leaf || n - k - 1 < min_leaf {
                    continue;
                }
                let wr = w_total - wl;
                let wpr = wp_total - wpl;
                let impurity = wl * gini(wl, wpl) + wr * gini(wr, wpr);
                if best.as_ref().map_or(true, |b| impurity < b.impurity) {
                    let mut threshold = (v + next) / 2.0;
                    if threshold >= next {
                        threshold = v;
                    }
                    best = Some(Split { feature, threshold, impurity });
                }
            }
        }
        best
    }
}
