//! Two-model fraud classifier.
//!
//! A class-balanced random forest and a gradient-boosted ensemble are
//! trained on the same rows. The reported probability is the fixed blend
//! `0.6 * forest + 0.4 * boosted`.
//!
//! Artifacts per version: `random_forest_v{v}.json`,
//! `gradient_boosting_v{v}.json`, `fraud_metadata_v{v}.json`.

use crate::{
    artifacts::ArtifactStore,
    boosting::{BoostingParams, GradientBoostedTrees},
    error::{RiskError, RiskResult},
    features::FeatureVector,
    forest::{ForestParams, RandomForest},
    frame::FeatureFrame,
    metrics::{ClassificationMetrics, TrainingMetrics},
    types::{Label, FRAUD, LEGIT},
};
use chrono::{DateTime, Utc};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

pub const FOREST_FAMILY: &str = "random_forest";
pub const BOOSTING_FAMILY: &str = "gradient_boosting";
pub const METADATA_FAMILY: &str = "fraud_metadata";

pub const DEFAULT_THRESHOLD: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnsembleWeights {
    pub forest: f64,
    pub boosted: f64,
}

impl Default for EnsembleWeights {
    fn default() -> Self {
        Self { forest: 0.6, boosted: 0.4 }
    }
}

impl EnsembleWeights {
    pub fn combine(&self, p_forest: f64, p_boosted: f64) -> f64 {
        self.forest * p_forest + self.boosted * p_boosted
    }
}

/// Per-row probabilities from each estimator and their blend.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ComponentScores {
    pub forest: f64,
    pub boosted: f64,
    pub ensemble: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub forest: ClassificationMetrics,
    pub boosted: ClassificationMetrics,
    pub ensemble: ClassificationMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FraudMetadata {
    feature_names: Vec<String>,
    metrics: TrainingMetrics,
    trained_at: DateTime<Utc>,
    ensemble_weights: EnsembleWeights,
}

#[derive(Debug, Clone)]
pub struct FraudDetector {
    feature_names: Vec<String>,
    forest: RandomForest,
    boosted: GradientBoostedTrees,
    weights: EnsembleWeights,
    metrics: TrainingMetrics,
}

impl FraudDetector {
    /// Fit both estimators on the training split and score them on the
    /// test split. The feature order is taken from `x_train`.
    pub fn train(
        x_train: &FeatureFrame,
        y_train: &[Label],
        x_test: &FeatureFrame,
        y_test: &[Label],
        forest_params: &ForestParams,
        boosting_params: &BoostingParams,
    ) -> RiskResult<Self> {
        check_labels(x_train, y_train, "training")?;
        check_labels(x_test, y_test, "test")?;
        if !y_train.contains(&FRAUD) || !y_train.contains(&LEGIT) {
            return Err(RiskError::Dataset(
                "training labels must contain both fraud and legitimate rows".into(),
            ));
        }

        let feature_names = x_train.columns().to_vec();
        log::info!(
            "fraud: training on {} rows x {} features",
            x_train.nrows(),
            feature_names.len()
        );

        let forest = RandomForest::fit(feature_names.clone(), x_train.data(), y_train, forest_params)?;
        let boosted =
            GradientBoostedTrees::fit(feature_names.clone(), x_train.data(), y_train, boosting_params)?;

        let mut detector = Self {
            feature_names,
            forest,
            boosted,
            weights: EnsembleWeights::default(),
            metrics: TrainingMetrics {
                forest: ClassificationMetrics::default(),
                boosted: ClassificationMetrics::default(),
                ensemble: ClassificationMetrics::default(),
                train_samples: x_train.nrows(),
                test_samples: x_test.nrows(),
                feature_count: x_train.ncols(),
                trained_at: Utc::now(),
            },
        };

        let eval = detector.evaluate(x_test, y_test)?;
        detector.metrics.forest = eval.forest;
        detector.metrics.boosted = eval.boosted;
        detector.metrics.ensemble = eval.ensemble;

        log::info!(
            "fraud: ensemble auc={:.4} f1={:.4} (forest auc={:.4}, boosted auc={:.4})",
            eval.ensemble.auc_roc,
            eval.ensemble.f1,
            eval.forest.auc_roc,
            eval.boosted.auc_roc
        );
        Ok(detector)
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn metrics(&self) -> &TrainingMetrics {
        &self.metrics
    }

    pub fn weights(&self) -> EnsembleWeights {
        self.weights
    }

    pub fn forest(&self) -> &RandomForest {
        &self.forest
    }

    pub fn boosted(&self) -> &GradientBoostedTrees {
        &self.boosted
    }

    /// Rows reordered to the trained feature order.
    pub fn align(&self, x: &FeatureFrame) -> RiskResult<Array2<f64>> {
        x.select(&self.feature_names)
    }

    pub fn components(&self, x: &FeatureFrame) -> RiskResult<Vec<ComponentScores>> {
        Ok(self.components_aligned(&self.align(x)?))
    }

    pub(crate) fn components_aligned(&self, x: &Array2<f64>) -> Vec<ComponentScores> {
        self.forest
            .predict_proba(x)
            .into_iter()
            .zip(self.boosted.predict_proba(x))
            .map(|(forest, boosted)| ComponentScores {
                forest,
                boosted,
                ensemble: self.weights.combine(forest, boosted),
            })
            .collect()
    }

    pub fn predict_proba(&self, x: &FeatureFrame) -> RiskResult<Vec<f64>> {
        Ok(self.components(x)?.into_iter().map(|c| c.ensemble).collect())
    }

    /// Fraud (1) when the ensemble probability is at or above `threshold`.
    pub fn predict(&self, x: &FeatureFrame, threshold: f64) -> RiskResult<Vec<Label>> {
        Ok(self
            .predict_proba(x)?
            .into_iter()
            .map(|p| to_label(p, threshold))
            .collect())
    }

    /// Ensemble probability for a single feature vector.
    pub fn score(&self, features: &FeatureVector) -> RiskResult<f64> {
        let row = features.to_row(&self.feature_names)?;
        let x = Array2::from_shape_vec((1, row.len()), row)?;
        Ok(self.components_aligned(&x)[0].ensemble)
    }

    pub fn evaluate(&self, x: &FeatureFrame, y: &[Label]) -> RiskResult<Evaluation> {
        check_labels(x, y, "evaluation")?;
        let scores = self.components(x)?;
        let metrics_for = |pick: fn(&ComponentScores) -> f64| {
            let probs: Vec<f64> = scores.iter().map(pick).collect();
            let preds: Vec<Label> = probs.iter().map(|&p| to_label(p, DEFAULT_THRESHOLD)).collect();
            ClassificationMetrics::compute(y, &preds, &probs)
        };
        Ok(Evaluation {
            forest: metrics_for(|c| c.forest),
            boosted: metrics_for(|c| c.boosted),
            ensemble: metrics_for(|c| c.ensemble),
        })
    }

    /// Features ranked by the forest's mean impurity decrease.
    pub fn feature_importance(&self, top_n: usize) -> Vec<(String, f64)> {
        let mut ranked: Vec<(String, f64)> = self
            .feature_names
            .iter()
            .cloned()
            .zip(self.forest.feature_importances().iter().copied())
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked.truncate(top_n);
        ranked
    }

    pub fn save(&self, store: &ArtifactStore, version: &str) -> RiskResult<()> {
        store.put(FOREST_FAMILY, version, &self.forest)?;
        store.put(BOOSTING_FAMILY, version, &self.boosted)?;
        store.put(
            METADATA_FAMILY,
            version,
            &FraudMetadata {
                feature_names: self.feature_names.clone(),
                metrics: self.metrics.clone(),
                trained_at: self.metrics.trained_at,
                ensemble_weights: self.weights,
            },
        )?;
        log::info!("fraud: saved version {version} to {}", store.root().display());
        Ok(())
    }

    pub fn load(store: &ArtifactStore, version: &str) -> RiskResult<Self> {
        store.require(&[FOREST_FAMILY, BOOSTING_FAMILY, METADATA_FAMILY], version)?;
        let forest: RandomForest = store.get(FOREST_FAMILY, version)?;
        let boosted: GradientBoostedTrees = store.get(BOOSTING_FAMILY, version)?;
        let meta: FraudMetadata = store.get(METADATA_FAMILY, version)?;

        if forest.feature_names() != meta.feature_names || boosted.feature_names() != meta.feature_names {
            return Err(RiskError::Configuration(format!(
                "fraud artifacts for version {version} disagree on feature order"
            )));
        }

        log::info!("fraud: loaded version {version} ({} features)", meta.feature_names.len());
        Ok(Self {
            feature_names: meta.feature_names,
            forest,
            boosted,
            weights: meta.ensemble_weights,
            metrics: meta.metrics,
        })
    }
}

fn to_label(p: f64, threshold: f64) -> Label {
    if p >= threshold {
        FRAUD
    } else {
        LEGIT
    }
}

fn check_labels(x: &FeatureFrame, y: &[Label], what: &str) -> RiskResult<()> {
    if x.nrows() != y.len() {
        return Err(RiskError::Dataset(format!(
            "{what} split has {} rows but {} labels",
            x.nrows(),
            y.len()
        )));
    }
    if x.nrows() == 0 {
        return Err(RiskError::Dataset(format!("{what} split is empty")));
    }
    Ok(())
}
