//! SQLite ledger of completed training runs.
//!
//! RULE: Only ledger.rs talks to the database.
//! A run row and its metrics are written once, in one transaction, and
//! never changed; the schema enforces this with update triggers.

use crate::{
    error::{RiskError, RiskResult},
    metrics::TrainingMetrics,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, path::Path};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingRun {
    pub version: String,
    pub dataset: String,
    pub train_samples: usize,
    pub test_samples: usize,
    pub feature_count: usize,
    pub anomaly_threshold: f64,
    pub passed_quality: bool,
    pub trained_at: DateTime<Utc>,
    pub metrics: BTreeMap<String, f64>,
}

impl TrainingRun {
    pub fn from_metrics(
        version: &str,
        dataset: &str,
        metrics: &TrainingMetrics,
        anomaly_threshold: f64,
        passed_quality: bool,
    ) -> Self {
        Self {
            version: version.to_string(),
            dataset: dataset.to_string(),
            train_samples: metrics.train_samples,
            test_samples: metrics.test_samples,
            feature_count: metrics.feature_count,
            anomaly_threshold,
            passed_quality,
            trained_at: metrics.trained_at,
            metrics: metrics.to_map(),
        }
    }
}

pub struct TrainingLedger {
    conn: Connection,
}

impl TrainingLedger {
    /// Open (or create) the ledger database at `path`.
    pub fn open(path: impl AsRef<Path>) -> RiskResult<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> RiskResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn })
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> RiskResult<()> {
        self.conn
            .execute_batch(include_str!("../../migrations/001_training_ledger.sql"))?;
        Ok(())
    }

    pub fn record_run(&self, run: &TrainingRun) -> RiskResult<()> {
        if self.run(&run.version)?.is_some() {
            return Err(RiskError::DuplicateVersion(run.version.clone()));
        }
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO training_run
                (version, dataset, train_samples, test_samples, feature_count,
                 anomaly_threshold, passed_quality, trained_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                run.version,
                run.dataset,
                run.train_samples as i64,
                run.test_samples as i64,
                run.feature_count as i64,
                run.anomaly_threshold,
                run.passed_quality,
                run.trained_at.to_rfc3339(),
            ],
        )?;
        let run_id = tx.last_insert_rowid();
        for (name, value) in &run.metrics {
            tx.execute(
                "INSERT INTO training_metric (run_id, name, value) VALUES (?1, ?2, ?3)",
                params![run_id, name, value],
            )?;
        }
        tx.commit()?;
        log::info!("ledger: recorded training run {}", run.version);
        Ok(())
    }

    pub fn run(&self, version: &str) -> RiskResult<Option<TrainingRun>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, version, dataset, train_samples, test_samples, feature_count,
                        anomaly_threshold, passed_quality, trained_at
                 FROM training_run WHERE version = ?1",
                params![version],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        RunRow {
                            version: row.get(1)?,
                            dataset: row.get(2)?,
                            train_samples: row.get::<_, i64>(3)? as usize,
                            test_samples: row.get::<_, i64>(4)? as usize,
                            feature_count: row.get::<_, i64>(5)? as usize,
                            anomaly_threshold: row.get(6)?,
                            passed_quality: row.get(7)?,
                            trained_at: row.get(8)?,
                        },
                    ))
                },
            )
            .optional()?;
        match row {
            Some((id, r)) => Ok(Some(self.hydrate(id, r)?)),
            None => Ok(None),
        }
    }

    /// Every recorded run, oldest first.
    pub fn runs(&self) -> RiskResult<Vec<TrainingRun>> {
        let mut stmt = self
            .conn
            .prepare("SELECT version FROM training_run ORDER BY id ASC")?;
        let versions = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        let mut out = Vec::with_capacity(versions.len());
        for v in versions {
            if let Some(run) = self.run(&v)? {
                out.push(run);
            }
        }
        Ok(out)
    }

    fn hydrate(&self, id: i64, r: RunRow) -> RiskResult<TrainingRun> {
        let mut stmt = self
            .conn
            .prepare("SELECT name, value FROM training_metric WHERE run_id = ?1")?;
        let metrics = stmt
            .query_map(params![id], |row| Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?)))?
            .collect::<Result<BTreeMap<_, _>, _>>()?;
        let trained_at = DateTime::parse_from_rfc3339(&r.trained_at)
            .map_err(|e| anyhow::anyhow!("bad trained_at '{}' for run {}: {e}", r.trained_at, r.version))?
            .with_timezone(&Utc);
        Ok(TrainingRun {
            version: r.version,
            dataset: r.dataset,
            train_samples: r.train_samples,
            test_samples: r.test_samples,
            feature_count: r.feature_count,
            anomaly_threshold: r.anomaly_threshold,
            passed_quality: r.passed_quality,
            trained_at,
            metrics,
        })
    }
}

struct RunRow {
    version: String,
    dataset: String,
    train_samples: usize,
    test_samples: usize,
    feature_count: usize,
    anomaly_threshold: f64,
    passed_quality: bool,
    trained_at: String,
}
