//! Short-horizon behaviour forecast.
//!
//! A heuristic, not a trained model: activity rate extrapolation for the
//! transaction count and a factor count for the risk trend. Only the
//! shape of the projection is stable; its jitter comes from a seeded
//! stream so equal seeds give equal forecasts.

use crate::{
    features::FeatureVector,
    rng::{Stage, StageRng},
    types::Transaction,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_WINDOW_DAYS: u32 = 7;
const SECONDS_PER_DAY: i64 = 86_400;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskTrend {
    Increasing,
    Decreasing,
    Stable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BehaviorForecast {
    pub predicted_transaction_count: u64,
    pub trend: RiskTrend,
    pub projected_risk: f64,
    pub confidence: f64,
    pub window_days: u32,
}

pub struct BehaviorForecaster {
    rng: StageRng,
}

impl BehaviorForecaster {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StageRng::for_stage(seed, Stage::Forecast),
        }
    }

    /// Transactions per active day times the window. Zero with fewer
    /// than two transactions.
    pub fn predict_transaction_count(&self, transactions: &[Transaction], window_days: u32) -> u64 {
        if transactions.len() < 2 {
            return 0;
        }
        let stamps: Vec<i64> = transactions
            .iter()
            .filter_map(|t| t.timestamp.trim().parse::<i64>().ok())
            .collect();
        let (Some(first), Some(last)) = (stamps.iter().min(), stamps.iter().max()) else {
            return 0;
        };
        let span = last.checked_sub(*first).unwrap_or(i64::MAX);
        let days_active = (span / SECONDS_PER_DAY).max(1);
        let per_day = transactions.len() as f64 / days_active as f64;
        (per_day * f64::from(window_days)).floor().max(0.0) as u64
    }

    /// Trend from risk-raising and risk-lowering signals, with the
    /// projected 0–100 risk for the end of the window.
    pub fn predict_risk_evolution(&mut self, current_risk: f64, features: &FeatureVector) -> (f64, RiskTrend) {
        let get = |name: &str| features.get(name).unwrap_or(0.0);
        let mut up = 0;
        let mut down = 0;

        let sent_gap = get("avg_min_between_sent_tnx");
        if sent_gap > 0.0 && sent_gap < 60.0 {
            up += 1;
        }
        let total = get("total_transactions");
        if total < 10.0 {
            up += 1;
        } else if total > 100.0 {
            down += 1;
        }
        if get("total_ether_balance") < 0.01 {
            up += 1;
        }
        let avg_sent = get("avg_val_sent");
        if avg_sent > 0.0 && get("max_val_sent") > avg_sent * 10.0 {
            up += 1;
        }

        let (trend, lo, hi) = match up.cmp(&down) {
            std::cmp::Ordering::Greater => (RiskTrend::Increasing, 1.1, 1.2),
            std::cmp::Ordering::Less => (RiskTrend::Decreasing, 0.8, 0.9),
            std::cmp::Ordering::Equal => (RiskTrend::Stable, 0.95, 1.05),
        };
        let projected = (current_risk * self.rng.uniform(lo, hi)).clamp(0.0, 100.0);
        (projected, trend)
    }

    pub fn confidence(transaction_count: usize) -> f64 {
        match transaction_count {
            0..=4 => 0.3,
            5..=19 => 0.6,
            _ => 0.85,
        }
    }

    pub fn forecast(
        &mut self,
        transactions: &[Transaction],
        current_risk: f64,
        features: &FeatureVector,
        window_days: u32,
    ) -> BehaviorForecast {
        let predicted_transaction_count = self.predict_transaction_count(transactions, window_days);
        let (projected_risk, trend) = self.predict_risk_evolution(current_risk, features);
        BehaviorForecast {
            predicted_transaction_count,
            trend,
            projected_risk,
            confidence: Self::confidence(transactions.len()),
            window_days,
        }
    }
}
