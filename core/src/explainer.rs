//! Additive per-feature attributions for fraud predictions.
//!
//! Two backends, picked by what the model can tell us about itself:
//!   - Tree ensembles expose their trees, so attributions are exact
//!     path-dependent TreeSHAP in the model's raw output space
//!     (probability for the forest, log-odds margin for boosting).
//!   - Anything else is treated as a black box: Monte-Carlo permutation
//!     Shapley values against a background sample of at most 100 rows.
//!
//! In both cases `base_value + sum(contributions)` reproduces the output
//! being explained, for sampling as well as for trees.

use crate::{
    boosting::GradientBoostedTrees,
    error::{RiskError, RiskResult},
    forest::RandomForest,
    fraud::FraudDetector,
    frame::FeatureFrame,
    rng::{Stage, StageRng},
    stats::mean,
    tree::TreeEnsemble,
};
use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};

pub const MAX_BACKGROUND_ROWS: usize = 100;
pub const DEFAULT_TOP_N: usize = 10;
pub const DEFAULT_PERMUTATIONS: usize = 64;
const MAX_REASONS: usize = 5;
const EXPLAINER_SEED: u64 = 42;

/// What the explainer needs from a model.
pub trait AttributionModel {
    /// Column order the model was trained on.
    fn feature_names(&self) -> &[String];

    /// Fraud-class output for rows already in `feature_names` order.
    fn predict_positive(&self, x: &Array2<f64>) -> Vec<f64>;

    /// The model's trees, when it is a tree ensemble.
    fn tree_structure(&self) -> Option<TreeEnsemble<'_>> {
        None
    }
}

impl AttributionModel for RandomForest {
    fn feature_names(&self) -> &[String] {
        RandomForest::feature_names(self)
    }

    fn predict_positive(&self, x: &Array2<f64>) -> Vec<f64> {
        self.predict_proba(x)
    }

    fn tree_structure(&self) -> Option<TreeEnsemble<'_>> {
        Some(self.ensemble())
    }
}

impl AttributionModel for GradientBoostedTrees {
    fn feature_names(&self) -> &[String] {
        GradientBoostedTrees::feature_names(self)
    }

    fn predict_positive(&self, x: &Array2<f64>) -> Vec<f64> {
        self.predict_proba(x)
    }

    fn tree_structure(&self) -> Option<TreeEnsemble<'_>> {
        Some(self.ensemble())
    }
}

/// The blended ensemble has no single tree structure.
impl AttributionModel for FraudDetector {
    fn feature_names(&self) -> &[String] {
        FraudDetector::feature_names(self)
    }

    fn predict_positive(&self, x: &Array2<f64>) -> Vec<f64> {
        self.components_aligned(x).into_iter().map(|c| c.ensemble).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskDirection {
    Increases,
    Decreases,
}

impl RiskDirection {
    fn of(contribution: f64) -> Self {
        if contribution > 0.0 {
            RiskDirection::Increases
        } else {
            RiskDirection::Decreases
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskDirection::Increases => "increases",
            RiskDirection::Decreases => "decreases",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureContribution {
    pub feature: String,
    pub value: f64,
    pub contribution: f64,
    pub direction: RiskDirection,
    pub rank: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Explanation {
    pub index: usize,
    pub top_features: Vec<FeatureContribution>,
    pub reasons: Vec<String>,
    pub base_value: f64,
    /// Sum over every feature, not only the kept ones.
    pub total_contribution: f64,
}

enum Strategy {
    Tree,
    Permutation {
        background: Array2<f64>,
        base_value: f64,
        permutations: usize,
    },
}

pub struct ModelExplainer<'m, M: AttributionModel + ?Sized> {
    model: &'m M,
    strategy: Strategy,
    seed: u64,
}

impl<'m, M: AttributionModel + ?Sized> ModelExplainer<'m, M> {
    pub fn initialize(model: &'m M, background: Option<&FeatureFrame>) -> RiskResult<Self> {
        Self::initialize_with(model, background, DEFAULT_PERMUTATIONS, EXPLAINER_SEED)
    }

    pub fn initialize_with(
        model: &'m M,
        background: Option<&FeatureFrame>,
        permutations: usize,
        seed: u64,
    ) -> RiskResult<Self> {
        if model.tree_structure().is_some() {
            log::info!("explainer: using exact tree attributions");
            return Ok(Self { model, strategy: Strategy::Tree, seed });
        }

        let Some(background) = background else {
            return Err(RiskError::Configuration(
                "explainer needs background data for a model without tree structure".into(),
            ));
        };
        if background.nrows() == 0 {
            return Err(RiskError::Configuration("explainer background is empty".into()));
        }
        if permutations == 0 {
            return Err(RiskError::Configuration("explainer needs at least one permutation".into()));
        }

        let aligned = background.select(model.feature_names())?;
        let mut rng = StageRng::for_stage(seed, Stage::Explainer);
        let mut rows = rng.sample_indices(aligned.nrows(), MAX_BACKGROUND_ROWS);
        rows.sort_unstable();
        let background = aligned.select(Axis(0), &rows);
        let base_value = mean(&model.predict_positive(&background));

        log::info!(
            "explainer: using permutation sampling over {} background rows",
            background.nrows()
        );
        Ok(Self {
            model,
            strategy: Strategy::Permutation { background, base_value, permutations },
            seed,
        })
    }

    pub fn uses_tree_path(&self) -> bool {
        matches!(self.strategy, Strategy::Tree)
    }

    pub fn base_value(&self) -> f64 {
        match &self.strategy {
            Strategy::Tree => self
                .model
                .tree_structure()
                .map(|t| t.expected_value())
                .unwrap_or(0.0),
            Strategy::Permutation { base_value, .. } => *base_value,
        }
    }

    /// Attribution matrix, one row per input row, trained column order.
    pub fn attributions(&self, x: &FeatureFrame) -> RiskResult<Array2<f64>> {
        let aligned = x.select(self.model.feature_names())?;
        Ok(self.attributions_aligned(&aligned))
    }

    fn attributions_aligned(&self, x: &Array2<f64>) -> Array2<f64> {
        let d = x.ncols();
        let mut out = Array2::zeros((x.nrows(), d));
        match &self.strategy {
            Strategy::Tree => {
                if let Some(trees) = self.model.tree_structure() {
                    for (i, row) in x.rows().into_iter().enumerate() {
                        let phi = trees.shap_values(&row.to_vec(), d);
                        out.row_mut(i).assign(&ndarray::ArrayView1::from(&phi));
                    }
                }
            }
            Strategy::Permutation { background, permutations, .. } => {
                let mut rng = StageRng::for_stage(self.seed, Stage::Explainer);
                for (i, row) in x.rows().into_iter().enumerate() {
                    let phi = self.sample_row(&row.to_vec(), background, *permutations, &mut rng);
                    out.row_mut(i).assign(&ndarray::ArrayView1::from(&phi));
                }
            }
        }
        out
    }

    /// One permutation walks from a background row to `row`, switching
    /// features in a random order; each switch's output change is that
    /// feature's marginal contribution.
    ///
    /// The walk count is rounded up to a whole number of passes over the
    /// background so every row starts equally often, which keeps
    /// `base_value + sum(phi)` equal to the output at `row`.
    fn sample_row(
        &self,
        row: &[f64],
        background: &Array2<f64>,
        permutations: usize,
        rng: &mut StageRng,
    ) -> Vec<f64> {
        let d = row.len();
        let n_background = background.nrows();
        let walks = permutations.div_ceil(n_background) * n_background;
        let mut phi = vec![0.0; d];
        let mut order: Vec<usize> = (0..d).collect();

        for p in 0..walks {
            rng.shuffle(&mut order);
            let start = background.row(p % n_background);

            let mut walk = Array2::zeros((d + 1, d));
            walk.row_mut(0).assign(&start);
            for (step, &j) in order.iter().enumerate() {
                let mut next = walk.row(step).to_owned();
                next[j] = row[j];
                walk.row_mut(step + 1).assign(&next);
            }
            let out = self.model.predict_positive(&walk);
            for (step, &j) in order.iter().enumerate() {
                phi[j] += out[step + 1] - out[step];
            }
        }
        for v in &mut phi {
            *v /= walks as f64;
        }
        phi
    }

    pub fn explain(&self, x: &FeatureFrame, top_n: usize) -> RiskResult<Vec<Explanation>> {
        let names = self.model.feature_names();
        let aligned = x.select(names)?;
        let phi = self.attributions_aligned(&aligned);
        let base_value = self.base_value();
        log::debug!("explainer: attributing {} rows", aligned.nrows());

        let explanations = (0..aligned.nrows())
            .map(|i| {
                let mut order: Vec<usize> = (0..names.len()).collect();
                order.sort_by(|&a, &b| phi[[i, b]].abs().total_cmp(&phi[[i, a]].abs()));

                let top_features: Vec<FeatureContribution> = order
                    .iter()
                    .take(top_n)
                    .enumerate()
                    .map(|(rank, &j)| FeatureContribution {
                        feature: names[j].clone(),
                        value: aligned[[i, j]],
                        contribution: phi[[i, j]],
                        direction: RiskDirection::of(phi[[i, j]]),
                        rank: rank + 1,
                    })
                    .collect();

                let reasons = top_features
                    .iter()
                    .take(MAX_REASONS)
                    .map(|f| {
                        format!(
                            "{} ({:.4}) {} fraud risk by {:.4}",
                            f.feature,
                            f.value,
                            f.direction.as_str(),
                            f.contribution.abs()
                        )
                    })
                    .collect();

                Explanation {
                    index: i,
                    top_features,
                    reasons,
                    base_value,
                    total_contribution: phi.row(i).sum(),
                }
            })
            .collect();
        Ok(explanations)
    }

    /// Mean |contribution| per feature over `x`, largest first.
    pub fn global_importance(&self, x: &FeatureFrame) -> RiskResult<Vec<(String, f64)>> {
        let phi = self.attributions(x)?;
        let names = self.model.feature_names();
        let mut ranked: Vec<(String, f64)> = (0..names.len())
            .map(|j| {
                let col = phi.column(j);
                let m = if col.is_empty() {
                    0.0
                } else {
                    col.iter().map(|v| v.abs()).sum::<f64>() / col.len() as f64
                };
                (names[j].clone(), m)
            })
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        Ok(ranked)
    }
}
