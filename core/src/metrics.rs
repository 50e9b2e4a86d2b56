//! Classification metrics.
//!
//! Fraud batches are often single-class, so every metric that would be
//! undefined (no predicted positives, no actual positives, one class only
//! for AUC) reports 0.0 instead of failing.

use crate::types::{Label, FRAUD};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct ClassificationMetrics {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub auc_roc: f64,
}

impl ClassificationMetrics {
    pub fn compute(y_true: &[Label], y_pred: &[Label], y_score: &[f64]) -> Self {
        Self {
            accuracy: accuracy(y_true, y_pred),
            precision: precision(y_true, y_pred),
            recall: recall(y_true, y_pred),
            f1: f1(y_true, y_pred),
            auc_roc: auc_roc(y_true, y_score),
        }
    }
}

/// Held-out evaluation for both base estimators and the ensemble.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingMetrics {
    pub forest: ClassificationMetrics,
    pub boosted: ClassificationMetrics,
    pub ensemble: ClassificationMetrics,
    pub train_samples: usize,
    pub test_samples: usize,
    pub feature_count: usize,
    pub trained_at: DateTime<Utc>,
}

impl TrainingMetrics {
    /// Flat `metric name → value` view, e.g. `ensemble_auc_roc`.
    pub fn to_map(&self) -> BTreeMap<String, f64> {
        let mut map = BTreeMap::new();
        for (prefix, m) in [
            ("forest", &self.forest),
            ("boosted", &self.boosted),
            ("ensemble", &self.ensemble),
        ] {
            map.insert(format!("{prefix}_accuracy"), m.accuracy);
            map.insert(format!("{prefix}_precision"), m.precision);
            map.insert(format!("{prefix}_recall"), m.recall);
            map.insert(format!("{prefix}_f1"), m.f1);
            map.insert(format!("{prefix}_auc_roc"), m.auc_roc);
        }
        map.insert("train_samples".into(), self.train_samples as f64);
        map.insert("test_samples".into(), self.test_samples as f64);
        map.insert("feature_count".into(), self.feature_count as f64);
        map
    }
}

struct Confusion {
    tp: usize,
    fp: usize,
    fn_: usize,
}

fn confusion(y_true: &[Label], y_pred: &[Label]) -> Confusion {
    let mut c = Confusion { tp: 0, fp: 0, fn_: 0 };
    for (&t, &p) in y_true.iter().zip(y_pred) {
        match (t == FRAUD, p == FRAUD) {
            (true, true) => c.tp += 1,
            (false, true) => c.fp += 1,
            (true, false) => c.fn_ += 1,
            (false, false) => {}
        }
    }
    c
}

pub fn accuracy(y_true: &[Label], y_pred: &[Label]) -> f64 {
    if y_true.is_empty() {
        return 0.0;
    }
    let hits = y_true.iter().zip(y_pred).filter(|(t, p)| t == p).count();
    hits as f64 / y_true.len() as f64
}

pub fn precision(y_true: &[Label], y_pred: &[Label]) -> f64 {
    let c = confusion(y_true, y_pred);
    ratio(c.tp, c.tp + c.fp)
}

pub fn recall(y_true: &[Label], y_pred: &[Label]) -> f64 {
    let c = confusion(y_true, y_pred);
    ratio(c.tp, c.tp + c.fn_)
}

pub fn f1(y_true: &[Label], y_pred: &[Label]) -> f64 {
    let p = precision(y_true, y_pred);
    let r = recall(y_true, y_pred);
    if p + r == 0.0 {
        0.0
    } else {
        2.0 * p * r / (p + r)
    }
}

/// Area under the ROC curve via the rank-sum statistic, ties averaged.
pub fn auc_roc(y_true: &[Label], y_score: &[f64]) -> f64 {
    let n_pos = y_true.iter().filter(|&&t| t == FRAUD).count();
    let n_neg = y_true.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return 0.0;
    }

    let mut order: Vec<usize> = (0..y_score.len()).collect();
    order.sort_by(|&a, &b| y_score[a].total_cmp(&y_score[b]));

    let mut ranks = vec![0.0; y_score.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && y_score[order[j + 1]] == y_score[order[i]] {
            j += 1;
        }
        // 1-based average rank for the tie group [i, j]
        let avg = (i + j) as f64 / 2.0 + 1.0;
        for &k in &order[i..=j] {
            ranks[k] = avg;
        }
        i = j + 1;
    }

    let pos_rank_sum: f64 = y_true
        .iter()
        .zip(&ranks)
        .filter(|(t, _)| **t == FRAUD)
        .map(|(_, r)| r)
        .sum();
    let u = pos_rank_sum - (n_pos * (n_pos + 1)) as f64 / 2.0;
    u / (n_pos * n_neg) as f64
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perfect_ranking_has_auc_one() {
        let auc = auc_roc(&[0, 0, 1, 1], &[0.1, 0.2, 0.8, 0.9]);
        assert!((auc - 1.0).abs() < 1e-12);
    }

    #[test]
    fn tied_scores_give_half_auc() {
        let auc = auc_roc(&[0, 1, 0, 1], &[0.5, 0.5, 0.5, 0.5]);
        assert!((auc - 0.5).abs() < 1e-12);
    }

    #[test]
    fn single_class_batch_reports_zero_not_error() {
        let y = [0, 0, 0];
        let pred = [0, 0, 0];
        let m = ClassificationMetrics::compute(&y, &pred, &[0.1, 0.2, 0.3]);
        assert_eq!(m.accuracy, 1.0);
        assert_eq!(m.precision, 0.0);
        assert_eq!(m.recall, 0.0);
        assert_eq!(m.f1, 0.0);
        assert_eq!(m.auc_roc, 0.0);
    }

    #[test]
    fn precision_recall_f1() {
        let y = [1, 1, 0, 0];
        let pred = [1, 0, 1, 0];
        assert_eq!(precision(&y, &pred), 0.5);
        assert_eq!(recall(&y, &pred), 0.5);
        assert_eq!(f1(&y, &pred), 0.5);
        assert_eq!(accuracy(&y, &pred), 0.5);
    }
}
