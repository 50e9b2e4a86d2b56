//! Wallet feature extraction.
//!
//! Turns a raw transaction list into the fixed 41-field vector every
//! model in this crate is trained on. The schema order below is the
//! binding column order for training matrices; do not reorder it.
//!
//! Fields that need data this crate does not ingest (contract
//! interactions, contract creation, ERC-20 transfers) are zero-filled
//! placeholders. They stay in the schema so vectors line up with the
//! public wallet-fraud training datasets.

use crate::{
    error::{RiskError, RiskResult},
    types::Transaction,
};
use serde::{ser::SerializeMap, Deserialize, Serialize, Serializer};
use std::collections::{HashMap, HashSet};

// ── Schema ───────────────────────────────────────────────────────────────────

pub const FEATURE_COUNT: usize = 41;

/// Wei per ether.
const WEI_PER_ETHER: f64 = 1e18;

pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    // Transaction counts and totals
    "total_transactions",
    "total_ether_sent",
    "total_ether_received",
    "total_ether_sent_contracts",
    "total_ether_balance",
    "total_erc20_tnxs",
    // Value statistics
    "avg_val_received",
    "avg_val_sent",
    "avg_value_sent_to_contract",
    "max_value_received",
    "max_val_sent",
    "max_value_sent_to_contract",
    "min_value_received",
    "min_val_sent",
    "min_value_sent_to_contract",
    // Timing
    "time_diff_between_first_and_last_mins",
    "avg_min_between_sent_tnx",
    "avg_min_between_received_tnx",
    // Counterparties
    "sent_tnx",
    "received_tnx",
    "number_of_created_contracts",
    "unique_received_from_addresses",
    "unique_sent_to_addresses",
    // ERC-20 aggregates (placeholders)
    "erc20_total_ether_received",
    "erc20_total_ether_sent",
    "erc20_total_ether_sent_contract",
    "erc20_uniq_sent_addr",
    "erc20_uniq_rec_addr",
    "erc20_uniq_rec_contract_addr",
    "erc20_avg_time_between_sent_tnx",
    "erc20_avg_time_between_rec_tnx",
    "erc20_avg_time_between_rec_2_tnx",
    "erc20_avg_time_between_contract_tnx",
    "erc20_min_val_rec",
    "erc20_max_val_rec",
    "erc20_avg_val_rec",
    "erc20_min_val_sent",
    "erc20_max_val_sent",
    "erc20_avg_val_sent",
    "erc20_uniq_sent_token_name",
    "erc20_uniq_rec_token_name",
];

/// Schema as owned strings, the form stored in model metadata.
pub fn feature_names() -> Vec<String> {
    FEATURE_NAMES.iter().map(|s| s.to_string()).collect()
}

// ── FeatureVector ────────────────────────────────────────────────────────────

/// Named feature values for one wallet.
///
/// Vectors built by [`FeatureEngineer`] always carry every schema key.
/// Vectors deserialized from callers may not; run [`FeatureEngineer::validate`]
/// before scoring. Serialization walks the schema order, then any extra keys
/// in name order.
#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
#[serde(transparent)]
pub struct FeatureVector {
    values: HashMap<String, f64>,
}

impl FeatureVector {
    /// The all-zero vector. Also the degraded result of a failed extraction.
    pub fn zeros() -> Self {
        Self {
            values: FEATURE_NAMES.iter().map(|n| (n.to_string(), 0.0)).collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

    pub fn set(&mut self, name: &str, value: f64) {
        self.values.insert(name.to_string(), value);
    }

    pub fn remove(&mut self, name: &str) -> Option<f64> {
        self.values.remove(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Schema keys absent from this vector, in schema order.
    pub fn missing_keys(&self) -> Vec<String> {
        FEATURE_NAMES
            .iter()
            .filter(|n| !self.values.contains_key(**n))
            .map(|n| n.to_string())
            .collect()
    }

    /// Values in schema order. Missing keys read as 0.0.
    pub fn ordered(&self) -> impl Iterator<Item = (&'static str, f64)> + '_ {
        FEATURE_NAMES
            .iter()
            .map(move |n| (*n, self.values.get(*n).copied().unwrap_or(0.0)))
    }

    /// Values laid out in `columns` order. Fails on any absent column.
    pub fn to_row(&self, columns: &[String]) -> RiskResult<Vec<f64>> {
        let missing: Vec<&String> = columns
            .iter()
            .filter(|c| !self.values.contains_key(c.as_str()))
            .collect();
        if !missing.is_empty() {
            return Err(RiskError::schema(missing.into_iter().cloned()));
        }
        Ok(columns.iter().map(|c| self.values[c.as_str()]).collect())
    }
}

impl Serialize for FeatureVector {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for name in FEATURE_NAMES.iter() {
            if let Some(v) = self.values.get(*name) {
                map.serialize_entry(name, v)?;
            }
        }
        let schema: HashSet<&str> = FEATURE_NAMES.iter().copied().collect();
        let mut extras: Vec<(&String, &f64)> = self
            .values
            .iter()
            .filter(|(k, _)| !schema.contains(k.as_str()))
            .collect();
        extras.sort_by(|a, b| a.0.cmp(b.0));
        for (k, v) in extras {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

// ── FeatureEngineer ──────────────────────────────────────────────────────────

#[derive(Debug, Default, Clone, Copy)]
pub struct FeatureEngineer;

/// Parsed view of one transaction, values already in ether.
struct ParsedTx {
    from: String,
    to: String,
    value: f64,
    timestamp: i64,
}

impl FeatureEngineer {
    pub fn new() -> Self {
        Self
    }

    pub fn feature_names(&self) -> Vec<String> {
        feature_names()
    }

    /// Extract the feature vector for a wallet.
    ///
    /// Never fails: if the history cannot be parsed the all-zero vector is
    /// returned and the failure is logged. Use [`Self::extract_checked`] to see
    /// the error instead.
    pub fn extract(
        &self,
        transactions: &[Transaction],
        wallet_address: &str,
        wallet_balance: u128,
    ) -> FeatureVector {
        match self.extract_checked(transactions, wallet_address, wallet_balance) {
            Ok(features) => {
                log::info!(
                    "features: extracted {} features for {}",
                    features.len(),
                    wallet_address.to_lowercase()
                );
                features
            }
            Err(e) => {
                log::error!("features: extraction failed for {wallet_address}, using zero vector: {e}");
                FeatureVector::zeros()
            }
        }
    }

    pub fn extract_checked(
        &self,
        transactions: &[Transaction],
        wallet_address: &str,
        wallet_balance: u128,
    ) -> RiskResult<FeatureVector> {
        let address = wallet_address.to_lowercase();
        let txs = transactions
            .iter()
            .map(parse_tx)
            .collect::<RiskResult<Vec<ParsedTx>>>()?;

        let sent: Vec<&ParsedTx> = txs.iter().filter(|t| t.from == address).collect();
        let received: Vec<&ParsedTx> = txs.iter().filter(|t| t.to == address).collect();

        let mut f = FeatureVector::zeros();

        f.set("total_transactions", txs.len() as f64);
        f.set("sent_tnx", sent.len() as f64);
        f.set("received_tnx", received.len() as f64);

        f.set("total_ether_sent", sent.iter().map(|t| t.value).sum());
        f.set("total_ether_received", received.iter().map(|t| t.value).sum());
        f.set("total_ether_balance", wallet_balance as f64 / WEI_PER_ETHER);

        let (avg, max, min) = value_stats(&sent);
        f.set("avg_val_sent", avg);
        f.set("max_val_sent", max);
        f.set("min_val_sent", min);

        let (avg, max, min) = value_stats(&received);
        f.set("avg_val_received", avg);
        f.set("max_value_received", max);
        f.set("min_value_received", min);

        if txs.len() > 1 {
            let first = txs.iter().map(|t| t.timestamp).min().unwrap_or(0);
            let last = txs.iter().map(|t| t.timestamp).max().unwrap_or(0);
            f.set(
                "time_diff_between_first_and_last_mins",
                span_seconds(first, last)? as f64 / 60.0,
            );
        }
        f.set("avg_min_between_sent_tnx", mean_gap_minutes(&sent)?);
        f.set("avg_min_between_received_tnx", mean_gap_minutes(&received)?);

        f.set(
            "unique_sent_to_addresses",
            sent.iter().map(|t| t.to.as_str()).collect::<HashSet<_>>().len() as f64,
        );
        f.set(
            "unique_received_from_addresses",
            received.iter().map(|t| t.from.as_str()).collect::<HashSet<_>>().len() as f64,
        );

        if let Some((name, _)) = f.ordered().find(|(_, v)| !v.is_finite()) {
            return Err(RiskError::FeatureExtraction(format!(
                "{name} is not finite"
            )));
        }
        Ok(f)
    }

    /// True when every schema key is present and finite.
    pub fn validate(&self, features: &FeatureVector) -> bool {
        let missing = features.missing_keys();
        if !missing.is_empty() {
            log::warn!("features: missing features {missing:?}");
            return false;
        }
        features.ordered().all(|(_, v)| v.is_finite())
    }
}

fn parse_tx(tx: &Transaction) -> RiskResult<ParsedTx> {
    let value = parse_wei(&tx.value)?;
    let timestamp = tx.timestamp.trim().parse::<i64>().map_err(|e| {
        RiskError::FeatureExtraction(format!("bad timestamp {:?}: {e}", tx.timestamp))
    })?;
    Ok(ParsedTx {
        from: tx.from.to_lowercase(),
        to: tx.to.to_lowercase(),
        value: value / WEI_PER_ETHER,
        timestamp,
    })
}

/// Wei amounts overflow u64 routinely; accept u128 first, then plain floats.
fn parse_wei(raw: &str) -> RiskResult<f64> {
    let raw = raw.trim();
    if let Ok(v) = raw.parse::<u128>() {
        return Ok(v as f64);
    }
    match raw.parse::<f64>() {
        Ok(v) if v.is_finite() && v >= 0.0 => Ok(v),
        _ => Err(RiskError::FeatureExtraction(format!("bad value {raw:?}"))),
    }
}

fn value_stats(txs: &[&ParsedTx]) -> (f64, f64, f64) {
    if txs.is_empty() {
        return (0.0, 0.0, 0.0);
    }
    let sum: f64 = txs.iter().map(|t| t.value).sum();
    let max = txs.iter().map(|t| t.value).fold(f64::MIN, f64::max);
    let min = txs.iter().map(|t| t.value).fold(f64::MAX, f64::min);
    (sum / txs.len() as f64, max, min)
}

/// Seconds from `first` to `last`. Fails when the span leaves i64.
fn span_seconds(first: i64, last: i64) -> RiskResult<i64> {
    last.checked_sub(first).ok_or_else(|| {
        RiskError::FeatureExtraction(format!("timestamp span {first}..{last} overflows"))
    })
}

/// Mean of consecutive sorted-timestamp deltas, in minutes.
fn mean_gap_minutes(txs: &[&ParsedTx]) -> RiskResult<f64> {
    if txs.len() < 2 {
        return Ok(0.0);
    }
    let mut times: Vec<i64> = txs.iter().map(|t| t.timestamp).collect();
    times.sort_unstable();
    let mut total = 0.0;
    for w in times.windows(2) {
        total += span_seconds(w[0], w[1])? as f64 / 60.0;
    }
    Ok(total / (times.len() - 1) as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    const WALLET: &str = "0xAbC0000000000000000000000000000000000001";
    const ETH: u128 = 1_000_000_000_000_000_000;

    #[test]
    fn schema_has_41_unique_names() {
        let unique: HashSet<&str> = FEATURE_NAMES.iter().copied().collect();
        assert_eq!(FEATURE_NAMES.len(), 41);
        assert_eq!(unique.len(), 41);
    }

    #[test]
    fn empty_history_is_all_zero() {
        let f = FeatureEngineer::new().extract(&[], WALLET, 0);
        assert_eq!(f.len(), FEATURE_COUNT);
        assert!(f.ordered().all(|(_, v)| v == 0.0));
        assert!(FeatureEngineer::new().validate(&f));
    }

    #[test]
    fn sent_and_received_split_case_insensitively() {
        let me = WALLET.to_lowercase();
        let txs = vec![
            Transaction::new(WALLET, "0xb", 2 * ETH, 1_000),
            Transaction::new(&me, "0xC", ETH, 1_600),
            Transaction::new("0xd", &WALLET.to_uppercase().replace("0X", "0x"), 4 * ETH, 1_300),
        ];
        let f = FeatureEngineer::new().extract(&txs, WALLET, 5 * ETH);

        assert_eq!(f.get("total_transactions"), Some(3.0));
        assert_eq!(f.get("sent_tnx"), Some(2.0));
        assert_eq!(f.get("received_tnx"), Some(1.0));
        assert_eq!(f.get("total_ether_sent"), Some(3.0));
        assert_eq!(f.get("avg_val_sent"), Some(1.5));
        assert_eq!(f.get("max_val_sent"), Some(2.0));
        assert_eq!(f.get("min_val_sent"), Some(1.0));
        assert_eq!(f.get("total_ether_received"), Some(4.0));
        assert_eq!(f.get("total_ether_balance"), Some(5.0));
        assert_eq!(f.get("unique_sent_to_addresses"), Some(2.0));
        assert_eq!(f.get("unique_received_from_addresses"), Some(1.0));
        // 1000 → 1600 seconds across all transactions
        assert_eq!(f.get("time_diff_between_first_and_last_mins"), Some(10.0));
        assert_eq!(f.get("avg_min_between_sent_tnx"), Some(10.0));
        assert_eq!(f.get("avg_min_between_received_tnx"), Some(0.0));
    }

    #[test]
    fn mean_gap_uses_sorted_timestamps() {
        let txs = vec![
            Transaction::new(WALLET, "0xb", ETH, 600),
            Transaction::new(WALLET, "0xb", ETH, 0),
            Transaction::new(WALLET, "0xb", ETH, 240),
        ];
        let f = FeatureEngineer::new().extract(&txs, WALLET, 0);
        // gaps: 4 min, 6 min
        assert_eq!(f.get("avg_min_between_sent_tnx"), Some(5.0));
    }

    #[test]
    fn unparseable_value_falls_back_to_zero_vector() {
        let mut bad = Transaction::new(WALLET, "0xb", ETH, 10);
        bad.value = "lots".into();
        let engineer = FeatureEngineer::new();

        assert!(engineer.extract_checked(&[bad.clone()], WALLET, 0).is_err());
        let f = engineer.extract(&[bad], WALLET, 0);
        assert_eq!(f, FeatureVector::zeros());
    }

    #[test]
    fn validate_rejects_missing_keys() {
        let mut f = FeatureVector::zeros();
        f.remove("sent_tnx");
        assert!(!FeatureEngineer::new().validate(&f));
        assert_eq!(f.missing_keys(), vec!["sent_tnx".to_string()]);
    }

    #[test]
    fn to_row_follows_requested_order() {
        let mut f = FeatureVector::zeros();
        f.set("sent_tnx", 3.0);
        f.set("received_tnx", 7.0);
        let row = f
            .to_row(&["received_tnx".to_string(), "sent_tnx".to_string()])
            .unwrap();
        assert_eq!(row, vec![7.0, 3.0]);

        let err = f.to_row(&["nope".to_string()]).unwrap_err();
        assert!(matches!(err, RiskError::Schema { .. }));
    }

    #[test]
    fn serializes_in_schema_order() {
        let json = serde_json::to_string(&FeatureVector::zeros()).unwrap();
        let first = json.find("total_transactions").unwrap();
        let last = json.find("erc20_uniq_rec_token_name").unwrap();
        assert!(first < last);
    }
}
