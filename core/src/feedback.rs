//! Append-only store of labelled feedback, one JSON object per line.

use crate::error::RiskResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    fs::{self, OpenOptions},
    io::{BufRead, BufReader, Write},
    path::{Path, PathBuf},
};
use uuid::Uuid;

pub const FEEDBACK_FILE: &str = "feedback.jsonl";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub id: Uuid,
    /// Lower-cased.
    pub wallet_address: String,
    pub actual_fraud: bool,
    pub predicted_fraud: bool,
    pub risk_score: f64,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub submitter_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub correct_prediction: bool,
}

impl FeedbackRecord {
    pub fn new(
        wallet_address: &str,
        actual_fraud: bool,
        predicted_fraud: bool,
        risk_score: f64,
        notes: Option<String>,
        submitter_id: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            wallet_address: wallet_address.to_lowercase(),
            actual_fraud,
            predicted_fraud,
            risk_score,
            notes,
            submitter_id,
            timestamp: Utc::now(),
            correct_prediction: actual_fraud == predicted_fraud,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FeedbackStore {
    path: PathBuf,
}

impl FeedbackStore {
    /// Store rooted at `data_dir`, which is created if missing.
    pub fn open(data_dir: impl AsRef<Path>) -> RiskResult<Self> {
        fs::create_dir_all(data_dir.as_ref())?;
        Ok(Self {
            path: data_dir.as_ref().join(FEEDBACK_FILE),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, record: &FeedbackRecord) -> RiskResult<Uuid> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        file.write_all(line.as_bytes())?;
        log::info!("feedback: stored {} for {}", record.id, record.wallet_address);
        Ok(record.id)
    }

    /// Non-blank lines in the file, corrupt or not.
    pub fn count(&self) -> RiskResult<usize> {
        if !self.path.exists() {
            return Ok(0);
        }
        let reader = BufReader::new(fs::File::open(&self.path)?);
        let mut n = 0;
        for line in reader.lines() {
            if !line?.trim().is_empty() {
                n += 1;
            }
        }
        Ok(n)
    }

    /// Every parseable record; corrupt lines are skipped with a warning.
    pub fn load(&self) -> RiskResult<Vec<FeedbackRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let reader = BufReader::new(fs::File::open(&self.path)?);
        let mut out = Vec::new();
        for (n, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<FeedbackRecord>(&line) {
                Ok(r) => out.push(r),
                Err(e) => log::warn!("feedback: skipping invalid line {}: {e}", n + 1),
            }
        }
        Ok(out)
    }
}
