//! wallet-risk-core: fraud and anomaly scoring for wallet transaction histories.
//!
//! Features are extracted from a wallet's history, scored by a tree
//! ensemble and an isolation forest, and explained by per-feature
//! attributions. Training, artifact persistence and the feedback loop
//! live alongside the scoring path.

pub mod error;
pub mod rng;
pub mod stats;
pub mod types;

pub mod features;
pub mod frame;
pub mod metrics;

pub mod boosting;
pub mod forest;
pub mod isolation;
pub mod scaler;
pub mod tree;

pub mod anomaly;
pub mod explainer;
pub mod fraud;

pub mod artifacts;
pub mod config;
pub mod data;
pub mod feedback;
pub mod ledger;

pub mod assessment;
pub mod forecast;
pub mod manager;
pub mod training;
