//! Feature extraction: fixed schema, zero defaults, degraded fallback.

use wallet_risk_core::{
    features::{FeatureEngineer, FEATURE_COUNT, FEATURE_NAMES},
    types::Transaction,
};

const ME: &str = "0xMe";
const ETH: u128 = 1_000_000_000_000_000_000;

/// An empty history yields all 41 keys, every one zero.
#[test]
fn empty_history_is_all_zero() {
    let engineer = FeatureEngineer::new();
    let f = engineer.extract(&[], ME, 0);
    assert_eq!(f.len(), FEATURE_COUNT);
    assert!(engineer.validate(&f));
    for (name, value) in f.ordered() {
        assert_eq!(value, 0.0, "{name} should default to zero");
    }
}

/// Sent and received split on a case-insensitive address match.
#[test]
fn counts_sums_and_gaps() {
    let txs = vec![
        Transaction::new("0xme", "0xa", 2 * ETH, 1_000),
        Transaction::new("0xME", "0xb", 4 * ETH, 1_600),
        Transaction::new("0xa", "0xMe", ETH, 2_200),
        Transaction::new("0xme", "0xa", ETH / 2, 4_000),
    ];
    let f = FeatureEngineer::new().extract(&txs, ME, 3 * ETH);

    assert_eq!(f.get("total_transactions"), Some(4.0));
    assert_eq!(f.get("sent_tnx"), Some(3.0));
    assert_eq!(f.get("received_tnx"), Some(1.0));
    assert_eq!(f.get("total_ether_sent"), Some(6.5));
    assert_eq!(f.get("total_ether_received"), Some(1.0));
    assert_eq!(f.get("total_ether_balance"), Some(3.0));
    assert_eq!(f.get("max_val_sent"), Some(4.0));
    assert_eq!(f.get("min_val_sent"), Some(0.5));
    assert_eq!(f.get("unique_sent_to_addresses"), Some(2.0));
    assert_eq!(f.get("unique_received_from_addresses"), Some(1.0));
    // Sent gaps: 600 s and 2400 s.
    assert_eq!(f.get("avg_min_between_sent_tnx"), Some(25.0));
    assert_eq!(f.get("avg_min_between_received_tnx"), Some(0.0), "one event has no gap");
    assert_eq!(f.get("time_diff_between_first_and_last_mins"), Some(50.0));
}

/// Placeholders for data the extractor never sees stay zero.
#[test]
fn token_fields_are_zero_placeholders() {
    let txs = vec![Transaction::new("0xme", "0xa", ETH, 10), Transaction::new("0xa", "0xme", ETH, 20)];
    let f = FeatureEngineer::new().extract(&txs, ME, ETH);
    for name in FEATURE_NAMES.iter().filter(|n| n.starts_with("erc20") || n.contains("contract")) {
        assert_eq!(f.get(name), Some(0.0), "{name} must stay a zero placeholder");
    }
}

/// A malformed transaction degrades to the all-zero vector instead of failing.
#[test]
fn malformed_history_falls_back_to_zero_vector() {
    let mut bad = Transaction::new("0xme", "0xa", ETH, 10);
    bad.timestamp = "yesterday".into();
    let engineer = FeatureEngineer::new();
    assert!(engineer.extract_checked(&[bad.clone()], ME, ETH).is_err());

    let f = engineer.extract(&[bad], ME, ETH);
    assert!(engineer.validate(&f));
    assert!(f.ordered().all(|(_, v)| v == 0.0));
}

/// Vectors serialise in schema order regardless of how they were built.
#[test]
fn schema_order_is_binding() {
    let f = FeatureEngineer::new().extract(&[], ME, 0);
    let names: Vec<&str> = f.ordered().map(|(n, _)| n).collect();
    assert_eq!(names, FEATURE_NAMES.to_vec());
    assert_eq!(FeatureEngineer::new().feature_names().len(), FEATURE_COUNT);
}

/// Timestamps at the ends of the i64 range cannot be differenced; the
/// extractor reports that instead of overflowing.
#[test]
fn extreme_timestamps_fall_back_to_zero_vector() {
    let txs = vec![
        Transaction::new("0xme", "0xa", ETH, i64::MIN),
        Transaction::new("0xme", "0xb", ETH, i64::MAX),
    ];
    let engineer = FeatureEngineer::new();
    assert!(engineer.extract_checked(&txs, ME, ETH).is_err());

    let f = engineer.extract(&txs, ME, ETH);
    assert!(engineer.validate(&f));
    assert!(f.ordered().all(|(_, v)| v == 0.0), "overflow must degrade to zeros");
}
