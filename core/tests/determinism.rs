//! Two training runs, same seed, same data.
//! They must produce byte-identical artifacts.
//! Any divergence means a stage is reading an unseeded source.

use wallet_risk_core::{
    anomaly::AnomalyDetector,
    artifacts::ArtifactStore,
    boosting::BoostingParams,
    forest::ForestParams,
    frame::FeatureFrame,
    fraud::FraudDetector,
    isolation::IsolationParams,
    rng::{Stage, StageRng},
    types::{Label, FRAUD, LEGIT},
};

fn dataset(seed: u64) -> (FeatureFrame, Vec<Label>) {
    let mut rng = StageRng::for_stage(seed, Stage::Split);
    let mut rows = Vec::new();
    let mut labels = Vec::new();
    for i in 0..200 {
        let fraud = i % 5 == 0;
        let shift = if fraud { 3.0 } else { 0.0 };
        rows.push((0..5).map(|_| rng.uniform(0.0, 4.0) + shift).collect());
        labels.push(if fraud { FRAUD } else { LEGIT });
    }
    let columns = (0..5).map(|j| format!("f{j}")).collect();
    (FeatureFrame::from_rows(columns, &rows).unwrap(), labels)
}

fn train_and_save(dir: &std::path::Path, seed: u64) -> ArtifactStore {
    let (x, y) = dataset(99);
    let forest = ForestParams { n_estimators: 15, seed, ..ForestParams::default() };
    let boosting = BoostingParams { n_estimators: 15, max_depth: 4, seed, ..BoostingParams::default() };
    let isolation = IsolationParams { n_estimators: 30, seed, ..IsolationParams::default() };

    let store = ArtifactStore::open(dir).unwrap();
    FraudDetector::train(&x, &y, &x, &y, &forest, &boosting)
        .unwrap()
        .save(&store, "1.0.0")
        .unwrap();
    AnomalyDetector::train(&x, 0.1, &isolation)
        .unwrap()
        .save(&store, "1.0.0")
        .unwrap();
    store
}

fn artifact(store: &ArtifactStore, family: &str) -> serde_json::Value {
    let mut v: serde_json::Value = store.get(family, "1.0.0").unwrap();
    // Wall-clock fields are the only permitted difference.
    if let Some(obj) = v.as_object_mut() {
        obj.remove("trained_at");
        if let Some(metrics) = obj.get_mut("metrics").and_then(|m| m.as_object_mut()) {
            metrics.remove("trained_at");
        }
    }
    v
}

#[test]
fn same_seed_produces_identical_models() {
    const SEED: u64 = 0xDEAD_BEEF_CAFE_1234;
    let a = tempfile::tempdir().unwrap();
    let b = tempfile::tempdir().unwrap();
    let store_a = train_and_save(a.path(), SEED);
    let store_b = train_and_save(b.path(), SEED);

    for family in [
        "random_forest",
        "gradient_boosting",
        "fraud_metadata",
        "isolation_forest",
        "anomaly_scaler",
        "anomaly_metadata",
    ] {
        assert_eq!(
            artifact(&store_a, family),
            artifact(&store_b, family),
            "{family} diverged between runs with the same seed"
        );
    }
}

#[test]
fn different_seed_produces_different_forest() {
    let a = tempfile::tempdir().unwrap();
    let b = tempfile::tempdir().unwrap();
    let store_a = train_and_save(a.path(), 1);
    let store_b = train_and_save(b.path(), 2);
    assert_ne!(
        artifact(&store_a, "random_forest"),
        artifact(&store_b, "random_forest"),
        "Different seeds produced identical forests"
    );
}
