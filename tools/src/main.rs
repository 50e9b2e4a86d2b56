//! risk-trainer: offline training and one-shot scoring for wallet-risk-core.
//!
//! Usage:
//!   risk-trainer --dataset transaction_dataset.csv --version 1.0.0
//!   risk-trainer --config service.json --dataset data.csv --ledger runs.db
//!   risk-trainer --score wallet.json --model-dir data/trained_models --version 1.0.0

use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use wallet_risk_core::{
    assessment::RiskAssessor,
    artifacts::ArtifactStore,
    config::ServiceConfig,
    explainer::DEFAULT_TOP_N,
    features::FeatureEngineer,
    forecast::{BehaviorForecaster, DEFAULT_WINDOW_DAYS},
    manager::ModelManager,
    training::{TrainingOrchestrator, TrainingReport},
    types::WalletHistory,
};

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let mut config = match arg_str(&args, "--config") {
        Some(path) => ServiceConfig::load(path)?,
        None => ServiceConfig::default(),
    };

    if let Some(dir) = arg_str(&args, "--model-dir") {
        config.models.model_dir = PathBuf::from(dir);
    }
    if let Some(version) = arg_str(&args, "--version") {
        config.models.version = version.to_string();
    }
    if let Some(ledger) = arg_str(&args, "--ledger") {
        config.ledger_path = Some(PathBuf::from(ledger));
    }
    config.data.seed = parse_arg(&args, "--seed", config.data.seed);
    config.data.test_size = parse_arg(&args, "--test-size", config.data.test_size);
    if args.iter().any(|a| a == "--no-balance") {
        config.data.balance = false;
    }
    if args.iter().any(|a| a == "--schema-only") {
        config.data.restrict_to_schema = true;
    }
    config.validate()?;

    match arg_str(&args, "--score") {
        Some(wallet) => score(&config, wallet),
        None => train(config, arg_str(&args, "--dataset").unwrap_or("transaction_dataset.csv")),
    }
}

fn train(config: ServiceConfig, dataset: &str) -> Result<()> {
    println!("wallet-risk: risk-trainer");
    println!("  dataset:   {dataset}");
    println!("  version:   {}", config.models.version);
    println!("  model_dir: {}", config.models.model_dir.display());
    println!("  seed:      {}", config.data.seed);
    println!("  balance:   {}", config.data.balance);
    println!();

    let version = config.models.version.clone();
    let orchestrator = TrainingOrchestrator::new(config)?;
    let started = std::time::Instant::now();
    let report = orchestrator
        .train_from_dataset(dataset, &version)
        .with_context(|| format!("training version {version} from {dataset}"))?;

    print_summary(&report, started.elapsed().as_secs_f64());
    Ok(())
}

fn score(config: &ServiceConfig, wallet_path: &str) -> Result<()> {
    let raw = std::fs::read_to_string(wallet_path)
        .with_context(|| format!("reading wallet file {wallet_path}"))?;
    let wallet: WalletHistory = serde_json::from_str(&raw)
        .with_context(|| format!("parsing wallet file {wallet_path}"))?;

    let manager = ModelManager::new(ArtifactStore::open(&config.models.model_dir)?);
    if !manager.load_all(&config.models.version)? {
        anyhow::bail!(
            "no models for version {} in {}; train first",
            config.models.version,
            config.models.model_dir.display()
        );
    }
    let models = manager.require()?;
    log::info!("trainer: scoring {} with version {}", wallet.address, models.version());

    let features = FeatureEngineer::new().extract(&wallet.transactions, &wallet.address, wallet.balance);
    let assessor = RiskAssessor::new(config.anomaly.feature_threshold);
    let assessment = assessor.explain(&models, &wallet.address, &features, Some(DEFAULT_TOP_N))?;

    let mut forecaster = BehaviorForecaster::new(config.data.seed);
    let forecast = forecaster.forecast(
        &wallet.transactions,
        f64::from(assessment.risk_score),
        &features,
        DEFAULT_WINDOW_DAYS,
    );

    let out = serde_json::json!({
        "assessment": assessment,
        "forecast": forecast,
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

fn print_summary(report: &TrainingReport, elapsed_secs: f64) {
    let m = &report.metrics;
    println!("=== Training Summary ===");
    println!("Version:         {}", report.models.version());
    println!("Train samples:   {}", m.train_samples);
    println!("Test samples:    {}", m.test_samples);
    println!("Features:        {}", m.feature_count);
    println!();
    println!("{:<10} {:>9} {:>9} {:>9} {:>9} {:>9}", "model", "accuracy", "precision", "recall", "f1", "auc");
    for (name, c) in [("forest", &m.forest), ("boosted", &m.boosted), ("ensemble", &m.ensemble)] {
        println!(
            "{:<10} {:>9.4} {:>9.4} {:>9.4} {:>9.4} {:>9.4}",
            name, c.accuracy, c.precision, c.recall, c.f1, c.auc_roc
        );
    }
    println!();
    println!("Anomaly threshold: {:.4}", report.models.anomaly().score_threshold());
    println!("Top features:");
    for (name, importance) in report.models.fraud().feature_importance(10) {
        println!("  {name:<45} {importance:.4}");
    }
    if report.gate_failures.is_empty() {
        println!("Quality gates:   passed");
    } else {
        println!("Quality gates:   MISSED ({})", report.gate_failures.join(", "));
    }
    println!("Elapsed:         {elapsed_secs:.1}s");
}

fn arg_str<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2).find(|w| w[0] == flag).map(|w| w[1].as_str())
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}
