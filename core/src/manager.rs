//! The active model set and its lifecycle.
//!
//! A ModelSet is immutable once built. The manager holds at most one
//! behind an RwLock; readers clone the Arc and keep scoring against it
//! while a retrain builds the next set, which `install` swaps in whole.

use crate::{
    anomaly::{self, AnomalyDetector},
    artifacts::ArtifactStore,
    error::{RiskError, RiskResult},
    fraud::{self, FraudDetector},
    types::Version,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{
    collections::BTreeMap,
    sync::{Arc, RwLock},
};

/// Every artifact family a saved ModelSet owns.
pub const ARTIFACT_FAMILIES: [&str; 6] = [
    fraud::FOREST_FAMILY,
    fraud::BOOSTING_FAMILY,
    fraud::METADATA_FAMILY,
    anomaly::MODEL_FAMILY,
    anomaly::SCALER_FAMILY,
    anomaly::METADATA_FAMILY,
];

#[derive(Debug)]
pub struct ModelSet {
    version: Version,
    fraud: FraudDetector,
    anomaly: AnomalyDetector,
    loaded_at: DateTime<Utc>,
}

impl ModelSet {
    pub fn new(version: impl Into<Version>, fraud: FraudDetector, anomaly: AnomalyDetector) -> Self {
        Self {
            version: version.into(),
            fraud,
            anomaly,
            loaded_at: Utc::now(),
        }
    }

    pub fn load(store: &ArtifactStore, version: &str) -> RiskResult<Self> {
        let fraud = FraudDetector::load(store, version)?;
        let anomaly = AnomalyDetector::load(store, version)?;
        Ok(Self::new(version, fraud, anomaly))
    }

    /// True when any artifact for `version` is already in `store`.
    pub fn is_saved(store: &ArtifactStore, version: &str) -> bool {
        ARTIFACT_FAMILIES.iter().any(|f| store.exists(f, version))
    }

    pub fn save(&self, store: &ArtifactStore) -> RiskResult<()> {
        self.fraud.save(store, &self.version)?;
        self.anomaly.save(store, &self.version)
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn fraud(&self) -> &FraudDetector {
        &self.fraud
    }

    pub fn anomaly(&self) -> &AnomalyDetector {
        &self.anomaly
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelStatus {
    pub models_loaded: bool,
    pub model_version: Option<Version>,
    pub load_time: Option<DateTime<Utc>>,
    pub fraud_detector: bool,
    pub anomaly_detector: bool,
    pub fraud_detector_metrics: Option<BTreeMap<String, f64>>,
}

pub struct ModelManager {
    store: ArtifactStore,
    active: RwLock<Option<Arc<ModelSet>>>,
}

impl ModelManager {
    pub fn new(store: ArtifactStore) -> Self {
        Self {
            store,
            active: RwLock::new(None),
        }
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Load both detectors for `version`. Missing artifacts leave the
    /// manager not-ready and return Ok(false); other failures propagate.
    pub fn load_all(&self, version: &str) -> RiskResult<bool> {
        log::info!("manager: loading models version {version}");
        match ModelSet::load(&self.store, version) {
            Ok(set) => {
                self.install(set);
                Ok(true)
            }
            Err(e) if e.is_artifact_not_found() => {
                log::warn!("manager: models not found ({e}); train before use");
                self.clear();
                Ok(false)
            }
            Err(e) => {
                log::error!("manager: failed to load version {version}: {e}");
                self.clear();
                Err(e)
            }
        }
    }

    /// Make `set` the active set. Readers holding the previous Arc keep it.
    pub fn install(&self, set: ModelSet) {
        let version = set.version.clone();
        let mut slot = self.active.write().unwrap_or_else(|p| p.into_inner());
        *slot = Some(Arc::new(set));
        log::info!("manager: version {version} is active");
    }

    fn clear(&self) {
        *self.active.write().unwrap_or_else(|p| p.into_inner()) = None;
    }

    pub fn current(&self) -> Option<Arc<ModelSet>> {
        self.active.read().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// The active set, or NotReady.
    pub fn require(&self) -> RiskResult<Arc<ModelSet>> {
        self.current().ok_or(RiskError::NotReady)
    }

    pub fn is_ready(&self) -> bool {
        self.current().is_some()
    }

    pub fn status(&self) -> ModelStatus {
        match self.current() {
            Some(set) => ModelStatus {
                models_loaded: true,
                model_version: Some(set.version.clone()),
                load_time: Some(set.loaded_at),
                fraud_detector: true,
                anomaly_detector: true,
                fraud_detector_metrics: Some(set.fraud.metrics().to_map()),
            },
            None => ModelStatus {
                models_loaded: false,
                model_version: None,
                load_time: None,
                fraud_detector: false,
                anomaly_detector: false,
                fraud_detector_metrics: None,
            },
        }
    }
}
