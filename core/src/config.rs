use crate::{
    anomaly::{DEFAULT_CONTAMINATION, DEFAULT_FEATURE_THRESHOLD},
    boosting::BoostingParams,
    data::DataOptions,
    error::{RiskError, RiskResult},
    forest::ForestParams,
    isolation::IsolationParams,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModelsConfig {
    /// Version loaded at startup and written by the trainer by default.
    pub version: String,
    pub model_dir: PathBuf,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            version: "1.0.0".into(),
            model_dir: PathBuf::from("data/trained_models"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnomalyConfig {
    /// Expected share of abnormal rows; sets the decision threshold.
    pub contamination: f64,
    /// |z| above which a feature is reported as unusual.
    pub feature_threshold: f64,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            contamination: DEFAULT_CONTAMINATION,
            feature_threshold: DEFAULT_FEATURE_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LearningConfig {
    pub auto_retrain: bool,
    /// Feedback records needed before a retrain is signalled.
    pub min_training_samples: usize,
    /// Holds feedback.jsonl.
    pub data_dir: PathBuf,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            auto_retrain: true,
            min_training_samples: 1000,
            data_dir: PathBuf::from("data/training_data"),
        }
    }
}

/// Minimum ensemble test metrics for a run to count as healthy.
/// Failing a gate is logged and recorded, not fatal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QualityGates {
    pub min_accuracy: f64,
    pub min_precision: f64,
    pub min_recall: f64,
}

impl Default for QualityGates {
    fn default() -> Self {
        Self {
            min_accuracy: 0.90,
            min_precision: 0.85,
            min_recall: 0.80,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceConfig {
    pub models: ModelsConfig,
    pub forest: ForestParams,
    pub boosting: BoostingParams,
    pub isolation: IsolationParams,
    pub anomaly: AnomalyConfig,
    pub data: DataOptions,
    pub learning: LearningConfig,
    pub quality: QualityGates,
    /// SQLite training ledger. None disables run recording.
    pub ledger_path: Option<PathBuf>,
}

impl ServiceConfig {
    /// Load from a JSON file. Missing sections take their defaults;
    /// unknown keys are an error.
    /// In tests, use ServiceConfig::default_test().
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let config: ServiceConfig = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Invalid config {path}: {e}"))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> RiskResult<()> {
        self.forest.validate()?;
        self.boosting.validate()?;
        self.isolation.validate()?;
        self.data.validate()?;
        let c = self.anomaly.contamination;
        if !(c > 0.0 && c <= 0.5) {
            return Err(RiskError::Configuration(format!(
                "anomaly.contamination must lie in (0, 0.5], got {c}"
            )));
        }
        if self.models.version.trim().is_empty() {
            return Err(RiskError::Configuration("models.version is empty".into()));
        }
        Ok(())
    }

    /// Small, fast settings for tests. Paths are relative; tests point
    /// them at a temp directory.
    pub fn default_test() -> Self {
        Self {
            models: ModelsConfig {
                version: "test".into(),
                model_dir: PathBuf::from("models"),
            },
            forest: ForestParams {
                n_estimators: 25,
                max_depth: 8,
                min_samples_split: 4,
                min_samples_leaf: 2,
                ..ForestParams::default()
            },
            boosting: BoostingParams {
                n_estimators: 25,
                max_depth: 4,
                learning_rate: 0.3,
                ..BoostingParams::default()
            },
            isolation: IsolationParams {
                n_estimators: 50,
                ..IsolationParams::default()
            },
            anomaly: AnomalyConfig::default(),
            data: DataOptions::default(),
            learning: LearningConfig {
                auto_retrain: true,
                min_training_samples: 10,
                data_dir: PathBuf::from("feedback"),
            },
            quality: QualityGates::default(),
            ledger_path: None,
        }
    }

    /// Re-root every relative path under `root`.
    pub fn rooted_at(mut self, root: &std::path::Path) -> Self {
        self.models.model_dir = root.join(&self.models.model_dir);
        self.learning.data_dir = root.join(&self.learning.data_dir);
        self.ledger_path = self.ledger_path.map(|p| root.join(p));
        self
    }
}
