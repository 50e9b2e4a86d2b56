//! Novelty detection over legitimate behaviour.
//!
//! Fit a StandardScaler and an IsolationForest on legitimate rows only.
//! The decision threshold is the contamination percentile of the
//! in-sample novelty scores. Scores are reported sign-inverted so that
//! higher means more anomalous.

use crate::{
    artifacts::ArtifactStore,
    error::{RiskError, RiskResult},
    frame::FeatureFrame,
    isolation::{IsolationForest, IsolationParams},
    scaler::StandardScaler,
    stats::percentile,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const MODEL_FAMILY: &str = "isolation_forest";
pub const SCALER_FAMILY: &str = "anomaly_scaler";
pub const METADATA_FAMILY: &str = "anomaly_metadata";

pub const DEFAULT_CONTAMINATION: f64 = 0.1;
pub const DEFAULT_FEATURE_THRESHOLD: f64 = 2.0;

pub const ANOMALY: i8 = -1;
pub const NORMAL: i8 = 1;

const MAX_UNUSUAL_FEATURES: usize = 5;
const MAX_REASONS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Above,
    Below,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnusualFeature {
    pub feature: String,
    pub value: f64,
    /// |z| against the legitimate training population.
    pub deviation: f64,
    pub direction: Direction,
    pub rank: usize,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyExplanation {
    pub index: usize,
    pub unusual_features: Vec<UnusualFeature>,
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AnomalyMetadata {
    feature_names: Vec<String>,
    threshold: f64,
    contamination: f64,
    trained_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct AnomalyDetector {
    feature_names: Vec<String>,
    scaler: StandardScaler,
    forest: IsolationForest,
    threshold: f64,
    contamination: f64,
    trained_at: DateTime<Utc>,
}

impl AnomalyDetector {
    pub fn train(
        x_legit: &FeatureFrame,
        contamination: f64,
        params: &IsolationParams,
    ) -> RiskResult<Self> {
        if !(contamination > 0.0 && contamination <= 0.5) {
            return Err(RiskError::Configuration(format!(
                "contamination must lie in (0, 0.5], got {contamination}"
            )));
        }
        if x_legit.nrows() == 0 {
            return Err(RiskError::Dataset("anomaly detector needs legitimate rows".into()));
        }

        let feature_names = x_legit.columns().to_vec();
        let scaler = StandardScaler::fit(x_legit.data())?;
        let scaled = scaler.transform(x_legit.data());
        let forest = IsolationForest::fit(&scaled, params)?;

        let in_sample = forest.score_samples(&scaled);
        let threshold = percentile(&in_sample, contamination * 100.0);

        log::info!(
            "anomaly: trained on {} legitimate rows, threshold {:.4}",
            x_legit.nrows(),
            threshold
        );

        Ok(Self {
            feature_names,
            scaler,
            forest,
            threshold,
            contamination,
            trained_at: Utc::now(),
        })
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    /// Threshold on raw `score_samples` (lower is more abnormal).
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// The same threshold in reported-score space (higher is more abnormal).
    pub fn score_threshold(&self) -> f64 {
        -self.threshold
    }

    pub fn contamination(&self) -> f64 {
        self.contamination
    }

    pub fn trained_at(&self) -> DateTime<Utc> {
        self.trained_at
    }

    /// Raw `score_samples` after alignment and scaling.
    fn raw_scores(&self, x: &FeatureFrame) -> RiskResult<Vec<f64>> {
        let aligned = x.select(&self.feature_names)?;
        Ok(self.forest.score_samples(&self.scaler.transform(&aligned)))
    }

    /// Labels (-1 anomaly, 1 normal) and anomaly scores.
    pub fn predict(&self, x: &FeatureFrame) -> RiskResult<(Vec<i8>, Vec<f64>)> {
        let raw = self.raw_scores(x)?;
        let labels = raw
            .iter()
            .map(|&s| if s < self.threshold { ANOMALY } else { NORMAL })
            .collect();
        let scores = raw.iter().map(|s| -s).collect();
        Ok((labels, scores))
    }

    pub fn is_anomaly(&self, x: &FeatureFrame) -> RiskResult<Vec<bool>> {
        Ok(self.predict(x)?.0.into_iter().map(|l| l == ANOMALY).collect())
    }

    pub fn anomaly_score(&self, x: &FeatureFrame) -> RiskResult<Vec<f64>> {
        Ok(self.predict(x)?.1)
    }

    /// Per row, features whose |z| exceeds `feature_threshold`, largest
    /// first: up to five features and three reason strings.
    pub fn explain_anomaly(
        &self,
        x: &FeatureFrame,
        feature_threshold: f64,
    ) -> RiskResult<Vec<AnomalyExplanation>> {
        let aligned = x.select(&self.feature_names)?;
        let scaled = self.scaler.transform(&aligned);

        let explanations = (0..aligned.nrows())
            .map(|i| {
                let mut unusual: Vec<(usize, f64)> = scaled
                    .row(i)
                    .iter()
                    .enumerate()
                    .filter(|(_, z)| z.abs() > feature_threshold)
                    .map(|(j, &z)| (j, z))
                    .collect();
                unusual.sort_by(|a, b| b.1.abs().total_cmp(&a.1.abs()));
                unusual.truncate(MAX_UNUSUAL_FEATURES);

                let unusual_features: Vec<UnusualFeature> = unusual
                    .into_iter()
                    .enumerate()
                    .map(|(rank, (j, z))| {
                        let name = &self.feature_names[j];
                        UnusualFeature {
                            feature: name.clone(),
                            value: aligned[[i, j]],
                            deviation: z.abs(),
                            direction: if z >= 0.0 { Direction::Above } else { Direction::Below },
                            rank: rank + 1,
                            reason: format!("{name} is {:.2} standard deviations from normal", z.abs()),
                        }
                    })
                    .collect();
                let reasons = unusual_features
                    .iter()
                    .take(MAX_REASONS)
                    .map(|f| f.reason.clone())
                    .collect();
                AnomalyExplanation { index: i, unusual_features, reasons }
            })
            .collect();
        Ok(explanations)
    }

    pub fn save(&self, store: &ArtifactStore, version: &str) -> RiskResult<()> {
        store.put(MODEL_FAMILY, version, &self.forest)?;
        store.put(SCALER_FAMILY, version, &self.scaler)?;
        store.put(
            METADATA_FAMILY,
            version,
            &AnomalyMetadata {
                feature_names: self.feature_names.clone(),
                threshold: self.threshold,
                contamination: self.contamination,
                trained_at: self.trained_at,
            },
        )?;
        log::info!("anomaly: saved version {version}");
        Ok(())
    }

    pub fn load(store: &ArtifactStore, version: &str) -> RiskResult<Self> {
        store.require(&[MODEL_FAMILY, SCALER_FAMILY, METADATA_FAMILY], version)?;
        let forest: IsolationForest = store.get(MODEL_FAMILY, version)?;
        let scaler: StandardScaler = store.get(SCALER_FAMILY, version)?;
        let meta: AnomalyMetadata = store.get(METADATA_FAMILY, version)?;
        if scaler.n_features() != meta.feature_names.len() {
            return Err(RiskError::Configuration(format!(
                "anomaly scaler for version {version} has {} columns, metadata lists {}",
                scaler.n_features(),
                meta.feature_names.len()
            )));
        }
        log::info!("anomaly: loaded version {version}");
        Ok(Self {
            feature_names: meta.feature_names,
            scaler,
            forest,
            threshold: meta.threshold,
            contamination: meta.contamination,
            trained_at: meta.trained_at,
        })
    }
}
