//! Training runs, the active model set, feedback, and end-to-end scoring.

use std::io::Write;
use std::path::Path;
use wallet_risk_core::{
    assessment::RiskAssessor,
    artifacts::ArtifactStore,
    config::ServiceConfig,
    error::RiskError,
    feedback::FeedbackRecord,
    features::{FeatureEngineer, FeatureVector, FEATURE_NAMES},
    forecast::{BehaviorForecaster, RiskTrend},
    ledger::{TrainingLedger, TrainingRun},
    manager::ModelManager,
    metrics::TrainingMetrics,
    rng::{Stage, StageRng},
    training::{RetrainScope, TrainingOrchestrator},
    types::{Transaction, WalletHistory},
};

/// Kaggle-style wallet export: 300 rows, one in five fraudulent.
fn write_dataset(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("transaction_dataset.csv");
    let mut f = std::fs::File::create(&path).unwrap();
    writeln!(
        f,
        "Unnamed: 0,Index,Address,FLAG,Avg min between sent tnx,Avg min between received tnx,\
         Sent tnx,Received Tnx,Unique Sent To Addresses,avg val sent,max val sent,total ether balance,\
         total transactions (including tnx to create contract,Some Exchange Score"
    )
    .unwrap();
    let mut rng = StageRng::for_stage(21, Stage::Split);
    for i in 0..300 {
        let fraud = i % 5 == 0;
        let (gap, sent, balance) = if fraud {
            (rng.uniform(1.0, 50.0), rng.uniform(40.0, 90.0), rng.uniform(0.0, 0.02))
        } else {
            (rng.uniform(200.0, 9000.0), rng.uniform(1.0, 35.0), rng.uniform(0.05, 20.0))
        };
        let received = rng.uniform(1.0, 40.0);
        let avg = rng.uniform(0.1, 2.0);
        writeln!(
            f,
            "{i},{i},0x{i:040x},{},{gap:.2},{:.2},{sent:.0},{received:.0},{:.0},{avg:.4},{:.4},{balance:.5},{:.0},{:.3}",
            u8::from(fraud),
            rng.uniform(10.0, 5000.0),
            sent * 0.6,
            avg * rng.uniform(1.0, 4.0),
            sent + received,
            rng.uniform(0.0, 1.0),
        )
        .unwrap();
    }
    path
}

fn test_config(root: &Path) -> ServiceConfig {
    let mut config = ServiceConfig::default_test();
    config.data.restrict_to_schema = true;
    config.ledger_path = Some("ledger.db".into());
    config.rooted_at(root)
}

/// Offline run: models saved, run recorded, version reusable only once.
#[test]
fn train_from_dataset_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let dataset = write_dataset(dir.path());
    let orchestrator = TrainingOrchestrator::new(test_config(dir.path())).unwrap();

    let report = orchestrator.train_from_dataset(&dataset, "1.0.0").unwrap();
    let names = report.models.fraud().feature_names();
    assert!(!names.is_empty());
    assert!(
        names.iter().all(|n| FEATURE_NAMES.contains(&n.as_str())),
        "schema-restricted training kept off-schema columns: {names:?}"
    );
    assert!(!names.iter().any(|n| n == "some_exchange_score"));
    assert_eq!(report.models.anomaly().feature_names(), names);
    assert_eq!(report.metrics.test_samples, 60);
    assert!(report.metrics.ensemble.auc_roc > 0.9, "auc {}", report.metrics.ensemble.auc_roc);

    let store = orchestrator.artifact_store();
    for family in [
        "random_forest",
        "gradient_boosting",
        "fraud_metadata",
        "isolation_forest",
        "anomaly_scaler",
        "anomaly_metadata",
    ] {
        assert!(store.exists(family, "1.0.0"), "missing {family} artifact");
    }

    let run = orchestrator.ledger().unwrap().run("1.0.0").unwrap().unwrap();
    assert_eq!(run.test_samples, 60);
    assert_eq!(run.passed_quality, report.gate_failures.is_empty());
    assert_eq!(run.metrics.get("ensemble_auc_roc").copied(), Some(report.metrics.ensemble.auc_roc));

    match orchestrator.train_from_dataset(&dataset, "1.0.0") {
        Err(RiskError::DuplicateVersion(v)) => assert_eq!(v, "1.0.0"),
        other => panic!("expected duplicate version, got {other:?}"),
    }
}

/// Without a ledger, saved artifacts alone block reuse of a version and
/// the first run's files stay as written.
#[test]
fn saved_version_is_never_overwritten_without_ledger() {
    let dir = tempfile::tempdir().unwrap();
    let dataset = write_dataset(dir.path());
    let mut config = test_config(dir.path());
    config.ledger_path = None;
    let orchestrator = TrainingOrchestrator::new(config.clone()).unwrap();
    assert!(orchestrator.ledger().is_none());

    orchestrator.train_from_dataset(&dataset, "1.0.0").unwrap();
    let store = orchestrator.artifact_store();
    let before: serde_json::Value = store.get("random_forest", "1.0.0").unwrap();

    config.forest.seed = 7;
    let reseeded = TrainingOrchestrator::new(config).unwrap();
    match reseeded.train_from_dataset(&dataset, "1.0.0") {
        Err(RiskError::DuplicateVersion(v)) => assert_eq!(v, "1.0.0"),
        other => panic!("expected duplicate version, got {other:?}"),
    }
    let after: serde_json::Value = store.get("random_forest", "1.0.0").unwrap();
    assert_eq!(before, after, "refused run must leave the saved forest untouched");

    reseeded.train_from_dataset(&dataset, "1.0.1").unwrap();
    assert!(store.exists("random_forest", "1.0.1"));
}

/// Missing artifacts degrade the manager instead of failing.
#[test]
fn manager_without_artifacts_is_not_ready() {
    let dir = tempfile::tempdir().unwrap();
    let manager = ModelManager::new(ArtifactStore::open(dir.path()).unwrap());

    assert!(!manager.load_all("1.0.0").unwrap());
    assert!(!manager.is_ready());
    assert!(matches!(manager.require(), Err(RiskError::NotReady)));
    let status = manager.status();
    assert!(!status.models_loaded);
    assert_eq!(status.model_version, None);
}

/// A loaded set scores wallets; installing a newer set leaves readers
/// of the old one untouched.
#[test]
fn manager_serves_and_swaps_model_sets() {
    let dir = tempfile::tempdir().unwrap();
    let dataset = write_dataset(dir.path());
    let orchestrator = TrainingOrchestrator::new(test_config(dir.path())).unwrap();
    orchestrator.train_from_dataset(&dataset, "1.0.0").unwrap();

    let manager = ModelManager::new(orchestrator.artifact_store().clone());
    assert!(manager.load_all("1.0.0").unwrap());
    let status = manager.status();
    assert!(status.models_loaded && status.fraud_detector && status.anomaly_detector);
    assert_eq!(status.model_version.as_deref(), Some("1.0.0"));
    assert!(status.fraud_detector_metrics.unwrap().contains_key("ensemble_f1"));

    let held = manager.require().unwrap();
    let next = orchestrator.train_from_dataset(&dataset, "1.1.0").unwrap();
    manager.install(next.models);
    assert_eq!(held.version(), "1.0.0", "a held set must not change under the reader");
    assert_eq!(manager.require().unwrap().version(), "1.1.0");

    // The old version stays loadable by name.
    assert!(manager.load_all("1.0.0").unwrap());
    assert_eq!(manager.require().unwrap().version(), "1.0.0");
}

/// Scoring a raw history and a feature vector through the active set.
#[test]
fn assessment_of_wallets() {
    let dir = tempfile::tempdir().unwrap();
    let dataset = write_dataset(dir.path());
    let orchestrator = TrainingOrchestrator::new(test_config(dir.path())).unwrap();
    let models = orchestrator.train_from_dataset(&dataset, "1.0.0").unwrap().models;
    let assessor = RiskAssessor::default();

    let wallet = WalletHistory {
        address: "0xABCDEF".into(),
        balance: 0,
        transactions: (0..6)
            .map(|i| Transaction::new("0xabcdef", "0xpeer", 10u128.pow(17), 1_700_000_000 + i * 120))
            .collect(),
    };
    let a = assessor.assess_wallet(&models, &wallet).unwrap();
    assert_eq!(a.wallet_address, "0xabcdef");
    assert_eq!(a.model_version, "1.0.0");
    assert_eq!(u32::from(a.risk_score), (a.fraud_probability * 100.0).floor() as u32);
    assert_eq!(a.is_fraud, a.fraud_probability >= 0.5);
    assert!((a.confidence - (a.fraud_probability - 0.5).abs() * 2.0).abs() < 1e-12);
    assert_eq!(a.anomaly_threshold, models.anomaly().score_threshold());
    assert!(a.anomaly_reasons.len() <= 3);
    assert!(a.explanation.is_none());

    let features = FeatureEngineer::new().extract(&wallet.transactions, &wallet.address, 0);
    let explained = assessor.explain(&models, &wallet.address, &features, Some(3)).unwrap();
    let explanation = explained.explanation.expect("explain attaches attributions");
    assert!(explanation.top_features.len() <= 3);
    assert!(explanation
        .top_features
        .iter()
        .all(|f| models.fraud().feature_names().contains(&f.feature)));

    let mut broken = FeatureVector::zeros();
    broken.remove("sent_tnx");
    match assessor.assess(&models, "0xabc", &broken) {
        Err(RiskError::Schema { missing }) => assert_eq!(missing, vec!["sent_tnx".to_string()]),
        other => panic!("expected schema error, got {other:?}"),
    }

    let mut nan = FeatureVector::zeros();
    nan.set("avg_val_sent", f64::NAN);
    assert!(matches!(
        assessor.assess(&models, "0xabc", &nan),
        Err(RiskError::FeatureExtraction(_))
    ));

    let mut forecaster = BehaviorForecaster::new(42);
    let forecast = forecaster.forecast(&wallet.transactions, f64::from(a.risk_score), &features, 7);
    assert_eq!(forecast.predicted_transaction_count, 42, "6 tx in one active day over 7 days");
    assert_eq!(forecast.trend, RiskTrend::Increasing);
    assert_eq!(forecast.confidence, 0.6);
    assert!((0.0..=100.0).contains(&forecast.projected_risk));
}

/// Reaching min_training_samples flips will_retrain; one short does not.
#[test]
fn feedback_signals_retrain_at_threshold() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = TrainingOrchestrator::new(test_config(dir.path())).unwrap();
    let need = orchestrator.config().learning.min_training_samples;
    let manager = ModelManager::new(orchestrator.artifact_store().clone());

    let outcome = orchestrator.retrain(&manager, RetrainScope::All).unwrap();
    assert!(!outcome.success);
    assert_eq!(outcome.message, "No feedback data");

    for i in 0..need - 1 {
        let record = FeedbackRecord::new(&format!("0xW{i}"), i % 2 == 0, false, 30.0, None, None);
        let receipt = orchestrator.submit_feedback(&record).unwrap();
        assert_eq!(receipt.feedback_id, record.id);
        assert_eq!(receipt.feedback_count, i + 1);
        assert!(!receipt.will_retrain, "{} records must not trigger a retrain", i + 1);
    }

    let outcome = orchestrator.request_retrain(&manager, RetrainScope::All, false).unwrap();
    assert!(!outcome.success);
    assert_eq!(
        outcome.message,
        format!("Not enough training samples. Need {need}, have {}", need - 1)
    );

    let last = FeedbackRecord::new("0xlast", true, true, 91.0, Some("confirmed".into()), Some("analyst".into()));
    let receipt = orchestrator.submit_feedback(&last).unwrap();
    assert_eq!(receipt.feedback_count, need);
    assert!(receipt.will_retrain);

    let outcome = orchestrator.request_retrain(&manager, RetrainScope::Forest, false).unwrap();
    assert!(outcome.success);
    assert_eq!(outcome.feedback_processed, need);
    assert!(!manager.is_ready(), "feedback retrain does not install models");
}

/// With auto_retrain off the threshold never signals.
#[test]
fn auto_retrain_disabled_never_signals() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.learning.auto_retrain = false;
    config.learning.min_training_samples = 1;
    let orchestrator = TrainingOrchestrator::new(config).unwrap();
    let receipt = orchestrator
        .submit_feedback(&FeedbackRecord::new("0xa", true, true, 80.0, None, None))
        .unwrap();
    assert!(!receipt.will_retrain);
}

/// The ledger refuses a second run under the same version.
#[test]
fn ledger_rejects_duplicate_versions() {
    let ledger = TrainingLedger::in_memory().unwrap();
    ledger.migrate().unwrap();
    let metrics = TrainingMetrics {
        forest: Default::default(),
        boosted: Default::default(),
        ensemble: Default::default(),
        train_samples: 10,
        test_samples: 5,
        feature_count: 3,
        trained_at: chrono::Utc::now(),
    };
    ledger
        .record_run(&TrainingRun::from_metrics("1.0.0", "a.csv", &metrics, -0.55, false))
        .unwrap();
    let err = ledger
        .record_run(&TrainingRun::from_metrics("1.0.0", "b.csv", &metrics, -0.50, true))
        .unwrap_err();
    assert!(matches!(err, RiskError::DuplicateVersion(ref v) if v == "1.0.0"), "got {err}");

    let runs = ledger.runs().unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].dataset, "a.csv");
}
