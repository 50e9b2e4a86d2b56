//! Fraud ensemble: combination rule, thresholds, persistence, attributions.

use wallet_risk_core::{
    artifacts::ArtifactStore,
    boosting::BoostingParams,
    error::RiskError,
    explainer::ModelExplainer,
    forest::ForestParams,
    frame::FeatureFrame,
    fraud::FraudDetector,
    rng::{Stage, StageRng},
    types::{Label, FRAUD, LEGIT},
};

const COLUMNS: [&str; 4] = ["sent_tnx", "avg_val_sent", "total_ether_balance", "unique_sent_to_addresses"];

/// Fraud rows send often, in small amounts, and hold little balance.
fn synthetic(n: usize, seed: u64) -> (FeatureFrame, Vec<Label>) {
    let mut rng = StageRng::for_stage(seed, Stage::Split);
    let mut rows = Vec::with_capacity(n);
    let mut labels = Vec::with_capacity(n);
    for i in 0..n {
        let fraud = i % 4 == 0;
        let row = if fraud {
            vec![
                rng.uniform(40.0, 80.0),
                rng.uniform(0.01, 0.2),
                rng.uniform(0.0, 0.05),
                rng.uniform(30.0, 60.0),
            ]
        } else {
            vec![
                rng.uniform(1.0, 45.0),
                rng.uniform(0.1, 3.0),
                rng.uniform(0.02, 5.0),
                rng.uniform(1.0, 35.0),
            ]
        };
        rows.push(row);
        labels.push(if fraud { FRAUD } else { LEGIT });
    }
    let columns = COLUMNS.iter().map(|c| c.to_string()).collect();
    (FeatureFrame::from_rows(columns, &rows).unwrap(), labels)
}

fn small_params() -> (ForestParams, BoostingParams) {
    (
        ForestParams {
            n_estimators: 20,
            max_depth: 6,
            ..ForestParams::default()
        },
        BoostingParams {
            n_estimators: 20,
            max_depth: 3,
            learning_rate: 0.3,
            ..BoostingParams::default()
        },
    )
}

fn trained() -> (FraudDetector, FeatureFrame, Vec<Label>) {
    let (x_train, y_train) = synthetic(240, 1);
    let (x_test, y_test) = synthetic(80, 2);
    let (fp, bp) = small_params();
    let detector = FraudDetector::train(&x_train, &y_train, &x_test, &y_test, &fp, &bp).unwrap();
    (detector, x_test, y_test)
}

/// The ensemble is exactly 0.6 * forest + 0.4 * boosted, inside [0, 1].
#[test]
fn ensemble_is_fixed_weighted_blend() {
    let (detector, x_test, _) = trained();
    for c in detector.components(&x_test).unwrap() {
        let expected = 0.6 * c.forest + 0.4 * c.boosted;
        assert!(
            (c.ensemble - expected).abs() < 1e-12,
            "ensemble {} != 0.6*{} + 0.4*{}",
            c.ensemble,
            c.forest,
            c.boosted
        );
        assert!((0.0..=1.0).contains(&c.ensemble), "probability {} out of range", c.ensemble);
    }
}

/// predict(x, t) is predict_proba(x) >= t, and t never moves the probabilities.
#[test]
fn predict_thresholds_probabilities() {
    let (detector, x_test, _) = trained();
    let before = detector.predict_proba(&x_test).unwrap();
    for t in [0.1, 0.5, 0.9] {
        let labels = detector.predict(&x_test, t).unwrap();
        let expected: Vec<Label> = before.iter().map(|&p| if p >= t { FRAUD } else { LEGIT }).collect();
        assert_eq!(labels, expected, "threshold {t} disagrees with probabilities");
        assert_eq!(detector.predict_proba(&x_test).unwrap(), before);
    }
}

/// Separable synthetic data should be learned well by the ensemble.
#[test]
fn training_metrics_are_recorded_per_estimator() {
    let (detector, x_test, y_test) = trained();
    let m = detector.metrics();
    assert_eq!(m.train_samples, 240);
    assert_eq!(m.test_samples, 80);
    assert_eq!(m.feature_count, COLUMNS.len());
    assert!(m.ensemble.auc_roc > 0.9, "ensemble auc {}", m.ensemble.auc_roc);

    let eval = detector.evaluate(&x_test, &y_test).unwrap();
    assert_eq!(eval.ensemble, m.ensemble, "evaluate must reproduce the stored test metrics");
}

/// Input column order does not matter; a missing column is a schema error.
#[test]
fn scoring_follows_trained_column_order() {
    let (detector, x_test, _) = trained();
    let baseline = detector.predict_proba(&x_test).unwrap();

    let reversed: Vec<String> = COLUMNS.iter().rev().map(|c| c.to_string()).collect();
    let shuffled = FeatureFrame::new(reversed.clone(), x_test.select(&reversed).unwrap()).unwrap();
    assert_eq!(detector.predict_proba(&shuffled).unwrap(), baseline);

    let partial: Vec<String> = COLUMNS[..3].iter().map(|c| c.to_string()).collect();
    let missing = FeatureFrame::new(partial.clone(), x_test.select(&partial).unwrap()).unwrap();
    match detector.predict_proba(&missing) {
        Err(RiskError::Schema { missing }) => assert_eq!(missing, vec!["unique_sent_to_addresses".to_string()]),
        other => panic!("expected schema error, got {other:?}"),
    }
}

/// load(save(v)) scores identically and keeps the feature order.
#[test]
fn save_load_round_trip() {
    let (detector, x_test, _) = trained();
    let dir = tempfile::tempdir().unwrap();
    let store = ArtifactStore::open(dir.path()).unwrap();
    detector.save(&store, "1.0.0").unwrap();

    for family in ["random_forest", "gradient_boosting", "fraud_metadata"] {
        assert!(store.exists(family, "1.0.0"), "{family} artifact missing after save");
    }

    let loaded = FraudDetector::load(&store, "1.0.0").unwrap();
    assert_eq!(loaded.feature_names(), detector.feature_names());
    assert_eq!(loaded.predict_proba(&x_test).unwrap(), detector.predict_proba(&x_test).unwrap());
    assert_eq!(loaded.metrics(), detector.metrics());
}

/// Loading a version with a missing artifact reports which file is absent.
#[test]
fn load_missing_artifact_is_not_found() {
    let (detector, _, _) = trained();
    let dir = tempfile::tempdir().unwrap();
    let store = ArtifactStore::open(dir.path()).unwrap();
    detector.save(&store, "2.0.0").unwrap();
    std::fs::remove_file(store.path_for("gradient_boosting", "2.0.0")).unwrap();

    let err = FraudDetector::load(&store, "2.0.0").unwrap_err();
    assert!(err.is_artifact_not_found(), "expected ArtifactNotFound, got {err}");
}

/// Feature importance is sorted, truncated and names trained columns only.
#[test]
fn feature_importance_ranked_descending() {
    let (detector, _, _) = trained();
    let top = detector.feature_importance(3);
    assert_eq!(top.len(), 3);
    assert!(top.windows(2).all(|w| w[0].1 >= w[1].1), "importances not descending: {top:?}");
    assert!(top.iter().all(|(name, _)| COLUMNS.contains(&name.as_str())));
}

/// Tree attributions plus base value reconstruct each estimator's output.
#[test]
fn tree_attributions_are_additive() {
    let (detector, x_test, _) = trained();

    let forest = detector.forest();
    let explainer = ModelExplainer::initialize(forest, None).unwrap();
    assert!(explainer.uses_tree_path());
    let phi = explainer.attributions(&x_test).unwrap();
    let probs = forest.predict_proba(&detector.align(&x_test).unwrap());
    for (i, p) in probs.iter().enumerate() {
        let total = explainer.base_value() + phi.row(i).sum();
        assert!((total - p).abs() < 1e-9, "row {i}: base + phi = {total}, forest = {p}");
    }

    let boosted = detector.boosted();
    let explainer = ModelExplainer::initialize(boosted, None).unwrap();
    let phi = explainer.attributions(&x_test).unwrap();
    let aligned = detector.align(&x_test).unwrap();
    for i in 0..aligned.nrows() {
        let row = aligned.row(i).to_vec();
        let total = explainer.base_value() + phi.row(i).sum();
        let margin = boosted.predict_margin(&row);
        assert!((total - margin).abs() < 1e-9, "row {i}: base + phi = {total}, margin = {margin}");
    }
}

/// Explanations come back ranked by |contribution| in trained names.
#[test]
fn explanation_ranks_and_reasons() {
    let (detector, x_test, _) = trained();
    let explainer = ModelExplainer::initialize(detector.forest(), None).unwrap();
    let explanations = explainer.explain(&x_test.take_rows(&[0, 1]), 3).unwrap();
    assert_eq!(explanations.len(), 2);
    for e in &explanations {
        assert_eq!(e.top_features.len(), 3);
        assert!(e.reasons.len() <= 3);
        let ranks: Vec<usize> = e.top_features.iter().map(|f| f.rank).collect();
        assert_eq!(ranks, vec![1, 2, 3]);
        assert!(e
            .top_features
            .windows(2)
            .all(|w| w[0].contribution.abs() >= w[1].contribution.abs()));
        assert!(e.reasons[0].contains("fraud risk by"), "reason: {}", e.reasons[0]);
    }

    let global = explainer.global_importance(&x_test).unwrap();
    assert_eq!(global.len(), COLUMNS.len());
    assert!(global.windows(2).all(|w| w[0].1 >= w[1].1));
}

/// The blended detector has no tree path and needs background rows.
#[test]
fn blended_model_needs_background() {
    let (detector, x_test, _) = trained();
    match ModelExplainer::initialize(&detector, None) {
        Err(RiskError::Configuration(_)) => {}
        Err(e) => panic!("expected configuration error, got {e}"),
        Ok(_) => panic!("explainer must refuse a non-tree model without background"),
    }

    let explainer = ModelExplainer::initialize(&detector, Some(&x_test)).unwrap();
    assert!(!explainer.uses_tree_path());
    let explanations = explainer.explain(&x_test.take_rows(&[0]), 2).unwrap();
    assert_eq!(explanations[0].top_features.len(), 2);
}

/// Training without both classes present is a dataset error.
#[test]
fn single_class_training_rejected() {
    let (x, _) = synthetic(40, 3);
    let all_legit = vec![LEGIT; 40];
    let (fp, bp) = small_params();
    let err = FraudDetector::train(&x, &all_legit, &x, &all_legit, &fp, &bp).unwrap_err();
    assert!(matches!(err, RiskError::Dataset(_)), "got {err}");
}
