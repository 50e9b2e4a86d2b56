//! Training orchestration: offline runs from a dataset, plus the
//! feedback loop that decides when a retrain is due.
//!
//! A run never touches the active models. It builds a fresh ModelSet,
//! saves it, records it in the ledger and hands it back; the owner
//! installs it into the ModelManager.

use crate::{
    anomaly::AnomalyDetector,
    artifacts::ArtifactStore,
    config::ServiceConfig,
    data::DataLoader,
    error::{RiskError, RiskResult},
    feedback::{FeedbackRecord, FeedbackStore},
    fraud::FraudDetector,
    ledger::{TrainingLedger, TrainingRun},
    manager::{ModelManager, ModelSet},
    metrics::TrainingMetrics,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RetrainScope {
    #[default]
    All,
    Forest,
    Boosting,
    Isolation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackReceipt {
    pub feedback_id: Uuid,
    pub feedback_count: usize,
    pub will_retrain: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrainOutcome {
    pub success: bool,
    pub message: String,
    pub feedback_processed: usize,
}

#[derive(Debug)]
pub struct TrainingReport {
    pub models: ModelSet,
    pub metrics: TrainingMetrics,
    /// Quality gates the ensemble missed; empty when healthy.
    pub gate_failures: Vec<String>,
}

pub struct TrainingOrchestrator {
    config: ServiceConfig,
    feedback: FeedbackStore,
    store: ArtifactStore,
    ledger: Option<TrainingLedger>,
}

impl TrainingOrchestrator {
    pub fn new(config: ServiceConfig) -> RiskResult<Self> {
        config.validate()?;
        let feedback = FeedbackStore::open(&config.learning.data_dir)?;
        let store = ArtifactStore::open(&config.models.model_dir)?;
        let ledger = match &config.ledger_path {
            Some(path) => {
                let ledger = TrainingLedger::open(path)?;
                ledger.migrate()?;
                Some(ledger)
            }
            None => None,
        };
        Ok(Self { config, feedback, store, ledger })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn artifact_store(&self) -> &ArtifactStore {
        &self.store
    }

    pub fn ledger(&self) -> Option<&TrainingLedger> {
        self.ledger.as_ref()
    }

    // ── Feedback ───────────────────────────────────────────────

    pub fn store_feedback(&self, record: &FeedbackRecord) -> RiskResult<Uuid> {
        self.feedback.append(record)
    }

    pub fn feedback_count(&self) -> RiskResult<usize> {
        self.feedback.count()
    }

    pub fn load_feedback(&self) -> RiskResult<Vec<FeedbackRecord>> {
        self.feedback.load()
    }

    /// Store a record and report whether enough feedback has built up
    /// for an automatic retrain.
    pub fn submit_feedback(&self, record: &FeedbackRecord) -> RiskResult<FeedbackReceipt> {
        let feedback_id = self.store_feedback(record)?;
        let feedback_count = self.feedback_count()?;
        let learning = &self.config.learning;
        Ok(FeedbackReceipt {
            feedback_id,
            feedback_count,
            will_retrain: learning.auto_retrain && feedback_count >= learning.min_training_samples,
        })
    }

    /// Retrain unless too little feedback has arrived; `force` skips the check.
    pub fn request_retrain(
        &self,
        manager: &ModelManager,
        scope: RetrainScope,
        force: bool,
    ) -> RiskResult<RetrainOutcome> {
        if !force {
            let have = self.feedback_count()?;
            let need = self.config.learning.min_training_samples;
            if have < need {
                return Ok(RetrainOutcome {
                    success: false,
                    message: format!("Not enough training samples. Need {need}, have {have}"),
                    feedback_processed: 0,
                });
            }
        }
        self.retrain(manager, scope)
    }

    /// Read back all feedback for a retrain. The active set is left as is;
    /// folding feedback into a new model set is not implemented yet.
    pub fn retrain(&self, manager: &ModelManager, scope: RetrainScope) -> RiskResult<RetrainOutcome> {
        let active = manager
            .current()
            .map(|s| s.version().to_string())
            .unwrap_or_else(|| "none".into());
        log::info!("training: retrain requested ({scope:?}), active version {active}");

        let records = self.load_feedback()?;
        if records.is_empty() {
            log::warn!("training: no feedback data available for retraining");
            return Ok(RetrainOutcome {
                success: false,
                message: "No feedback data".into(),
                feedback_processed: 0,
            });
        }
        let correct = records.iter().filter(|r| r.correct_prediction).count();
        log::info!(
            "training: processed {} feedback entries ({} correct predictions)",
            records.len(),
            correct
        );
        Ok(RetrainOutcome {
            success: true,
            message: "Retraining completed".into(),
            feedback_processed: records.len(),
        })
    }

    // ── Offline training ───────────────────────────────────────

    /// Full pipeline: load and split the dataset, train both detectors,
    /// save every artifact under `version` and record the run.
    ///
    /// A version is written once. If the store or the ledger already
    /// holds it, the run is refused before any training starts.
    pub fn train_from_dataset(&self, path: impl AsRef<Path>, version: &str) -> RiskResult<TrainingReport> {
        let path = path.as_ref();
        if ModelSet::is_saved(&self.store, version) {
            return Err(RiskError::DuplicateVersion(version.to_string()));
        }
        if let Some(ledger) = &self.ledger {
            if ledger.run(version)?.is_some() {
                return Err(RiskError::DuplicateVersion(version.to_string()));
            }
        }

        log::info!("training: version {version} from {}", path.display());
        let split = DataLoader::new(self.config.data.clone()).load_and_prepare(path)?;

        let fraud = FraudDetector::train(
            &split.x_train,
            &split.y_train,
            &split.x_test,
            &split.y_test,
            &self.config.forest,
            &self.config.boosting,
        )?;

        let legit = split.legit_training_rows();
        log::info!("training: anomaly detector on {} legitimate rows", legit.nrows());
        let anomaly = AnomalyDetector::train(&legit, self.config.anomaly.contamination, &self.config.isolation)?;

        let metrics = fraud.metrics().clone();
        let gate_failures = self.quality_failures(&metrics);
        for failure in &gate_failures {
            log::warn!("training: quality gate missed: {failure}");
        }

        let models = ModelSet::new(version, fraud, anomaly);
        models.save(&self.store)?;

        if let Some(ledger) = &self.ledger {
            ledger.record_run(&TrainingRun::from_metrics(
                version,
                &path.display().to_string(),
                &metrics,
                models.anomaly().threshold(),
                gate_failures.is_empty(),
            ))?;
        }

        log::info!("training: version {version} complete");
        Ok(TrainingReport { models, metrics, gate_failures })
    }

    fn quality_failures(&self, metrics: &TrainingMetrics) -> Vec<String> {
        let q = &self.config.quality;
        let m = &metrics.ensemble;
        [
            ("accuracy", m.accuracy, q.min_accuracy),
            ("precision", m.precision, q.min_precision),
            ("recall", m.recall, q.min_recall),
        ]
        .into_iter()
        .filter(|(_, value, min)| value < min)
        .map(|(name, value, min)| format!("{name} {value:.4} < {min:.2}"))
        .collect()
    }
}
