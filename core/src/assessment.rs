//! Inference glue: one wallet in, one scored assessment out.

use crate::{
    anomaly::DEFAULT_FEATURE_THRESHOLD,
    error::{RiskError, RiskResult},
    explainer::{Explanation, ModelExplainer, DEFAULT_TOP_N},
    features::{FeatureEngineer, FeatureVector},
    frame::FeatureFrame,
    fraud::DEFAULT_THRESHOLD,
    manager::ModelSet,
    types::WalletHistory,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub wallet_address: String,
    pub fraud_probability: f64,
    /// floor(probability * 100).
    pub risk_score: u8,
    pub is_fraud: bool,
    /// 0 at probability 0.5, 1 at either extreme.
    pub confidence: f64,
    pub is_anomaly: bool,
    pub anomaly_score: f64,
    pub anomaly_threshold: f64,
    pub anomaly_reasons: Vec<String>,
    pub model_version: String,
    pub assessed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<Explanation>,
}

#[derive(Debug, Clone)]
pub struct RiskAssessor {
    engineer: FeatureEngineer,
    feature_threshold: f64,
}

impl Default for RiskAssessor {
    fn default() -> Self {
        Self::new(DEFAULT_FEATURE_THRESHOLD)
    }
}

impl RiskAssessor {
    /// `feature_threshold` is the |z| above which a feature counts as unusual.
    pub fn new(feature_threshold: f64) -> Self {
        Self {
            engineer: FeatureEngineer::new(),
            feature_threshold,
        }
    }

    pub fn assess(
        &self,
        models: &ModelSet,
        wallet_address: &str,
        features: &FeatureVector,
    ) -> RiskResult<RiskAssessment> {
        self.check(features)?;

        let fraud = models.fraud();
        let p = fraud.score(features)?;

        let anomaly = models.anomaly();
        let frame = single_row(anomaly.feature_names(), features)?;
        let (labels, scores) = anomaly.predict(&frame)?;
        let reasons = anomaly
            .explain_anomaly(&frame, self.feature_threshold)?
            .into_iter()
            .next()
            .map(|e| e.reasons)
            .unwrap_or_default();

        let assessment = RiskAssessment {
            wallet_address: wallet_address.to_lowercase(),
            fraud_probability: p,
            risk_score: (p * 100.0).floor().clamp(0.0, 100.0) as u8,
            is_fraud: p >= DEFAULT_THRESHOLD,
            confidence: (p - 0.5).abs() * 2.0,
            is_anomaly: labels.first().is_some_and(|&l| l == crate::anomaly::ANOMALY),
            anomaly_score: scores.first().copied().unwrap_or(0.0),
            anomaly_threshold: anomaly.score_threshold(),
            anomaly_reasons: reasons,
            model_version: models.version().to_string(),
            assessed_at: Utc::now(),
            explanation: None,
        };
        log::debug!(
            "assessment: {} p={:.4} score={} anomaly={}",
            assessment.wallet_address,
            p,
            assessment.risk_score,
            assessment.is_anomaly
        );
        Ok(assessment)
    }

    /// Extract features from the raw history, then assess.
    pub fn assess_wallet(&self, models: &ModelSet, wallet: &WalletHistory) -> RiskResult<RiskAssessment> {
        let features = self
            .engineer
            .extract(&wallet.transactions, &wallet.address, wallet.balance);
        self.assess(models, &wallet.address, &features)
    }

    /// Assess and attach the forest's top contributing features.
    pub fn explain(
        &self,
        models: &ModelSet,
        wallet_address: &str,
        features: &FeatureVector,
        top_n: Option<usize>,
    ) -> RiskResult<RiskAssessment> {
        let mut assessment = self.assess(models, wallet_address, features)?;
        let forest = models.fraud().forest();
        let explainer = ModelExplainer::initialize(forest, None)?;
        let frame = single_row(forest.feature_names(), features)?;
        assessment.explanation = explainer
            .explain(&frame, top_n.unwrap_or(DEFAULT_TOP_N))?
            .into_iter()
            .next();
        Ok(assessment)
    }

    fn check(&self, features: &FeatureVector) -> RiskResult<()> {
        if self.engineer.validate(features) {
            return Ok(());
        }
        let missing = features.missing_keys();
        if !missing.is_empty() {
            return Err(RiskError::Schema { missing });
        }
        let bad: Vec<&str> = features
            .ordered()
            .filter(|(_, v)| !v.is_finite())
            .map(|(n, _)| n)
            .collect();
        Err(RiskError::FeatureExtraction(format!("non-finite features: {bad:?}")))
    }
}

fn single_row(columns: &[String], features: &FeatureVector) -> RiskResult<FeatureFrame> {
    let row = features.to_row(columns)?;
    FeatureFrame::from_rows(columns.to_vec(), &[row])
}
