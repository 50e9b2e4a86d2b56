//! Shared primitive types used across the crate.

use serde::{Deserialize, Serialize};

/// Binary class label. 1 = fraud, 0 = legitimate.
pub type Label = u8;

pub const FRAUD: Label = 1;
pub const LEGIT: Label = 0;

/// A model version string, e.g. "1.0.0".
pub type Version = String;

/// One on-chain transaction as returned by a chain explorer.
///
/// Value and timestamp arrive as decimal strings; they are parsed
/// during feature extraction, not at deserialization time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Transaction {
    pub from: String,
    pub to: String,
    /// Value in wei.
    pub value: String,
    /// Unix timestamp in seconds.
    #[serde(rename = "timeStamp", alias = "timestamp")]
    pub timestamp: String,
}

impl Transaction {
    pub fn new(from: &str, to: &str, value_wei: u128, timestamp: i64) -> Self {
        Self {
            from: from.to_string(),
            to: to.to_string(),
            value: value_wei.to_string(),
            timestamp: timestamp.to_string(),
        }
    }
}

/// A wallet's raw history plus its current balance in wei.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WalletHistory {
    pub address: String,
    #[serde(default)]
    pub balance: u128,
    #[serde(default)]
    pub transactions: Vec<Transaction>,
}
