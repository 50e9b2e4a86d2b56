//! Offline data preparation: CSV → clean numeric frame → stratified,
//! imbalance-corrected train/test split.
//!
//! RULE: balancing touches the training split only. The test split is
//! drawn first and returned exactly as drawn.

use crate::{
    error::{RiskError, RiskResult},
    features::FEATURE_NAMES,
    frame::FeatureFrame,
    rng::{Stage, StageRng},
    stats::{mean, median},
    types::{Label, FRAUD, LEGIT},
};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, path::Path};

/// Index-like columns that leak row order into the model.
pub const LEAKAGE_COLUMNS: [&str; 6] = ["", "Unnamed: 0", "Index", "index", "id", "ID"];

/// SMOTE raises minority:majority to this ratio.
pub const OVERSAMPLE_RATIO: f64 = 0.5;
/// Undersampling then brings minority:majority to this ratio.
pub const UNDERSAMPLE_RATIO: f64 = 0.8;
pub const SMOTE_NEIGHBOURS: usize = 5;

/// Source headers whose normalised form differs from the schema name.
const HEADER_ALIASES: [(&str, &str); 2] = [
    ("total_transactions_including_tnx_to_create_contract", "total_transactions"),
    ("max_val_sent_to_contract", "max_value_sent_to_contract"),
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DataOptions {
    pub target_column: String,
    pub test_size: f64,
    pub balance: bool,
    pub seed: u64,
    /// Rewrite headers to snake_case schema names ("Sent tnx" → "sent_tnx").
    pub normalize_headers: bool,
    /// Keep only columns that belong to the extraction schema.
    pub restrict_to_schema: bool,
}

impl Default for DataOptions {
    fn default() -> Self {
        Self {
            target_column: "FLAG".into(),
            test_size: 0.2,
            balance: true,
            seed: 42,
            normalize_headers: true,
            restrict_to_schema: false,
        }
    }
}

impl DataOptions {
    pub fn validate(&self) -> RiskResult<()> {
        if !(self.test_size > 0.0 && self.test_size < 1.0) {
            return Err(RiskError::Configuration(format!(
                "data.test_size must lie in (0, 1), got {}",
                self.test_size
            )));
        }
        Ok(())
    }
}

/// Raw CSV contents: headers plus string cells.
#[derive(Debug, Clone, Default)]
pub struct TabularDataset {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl TabularDataset {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self { headers, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn column(&self, j: usize) -> impl Iterator<Item = &str> {
        self.rows.iter().map(move |r| r.get(j).map(String::as_str).unwrap_or(""))
    }
}

#[derive(Debug, Clone)]
pub struct TrainTestSplit {
    pub x_train: FeatureFrame,
    pub y_train: Vec<Label>,
    pub x_test: FeatureFrame,
    pub y_test: Vec<Label>,
}

impl TrainTestSplit {
    pub fn feature_names(&self) -> &[String] {
        self.x_train.columns()
    }

    /// Training rows labelled legitimate, for the anomaly detector.
    pub fn legit_training_rows(&self) -> FeatureFrame {
        let idx: Vec<usize> = self
            .y_train
            .iter()
            .enumerate()
            .filter(|(_, l)| **l == LEGIT)
            .map(|(i, _)| i)
            .collect();
        self.x_train.take_rows(&idx)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColumnStats {
    pub mean: f64,
    /// Sample standard deviation (n - 1).
    pub std: f64,
    pub min: f64,
    pub max: f64,
    pub median: f64,
}

#[derive(Debug, Clone, Default)]
pub struct DataLoader {
    options: DataOptions,
}

impl DataLoader {
    pub fn new(options: DataOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &DataOptions {
        &self.options
    }

    pub fn load(&self, path: impl AsRef<Path>) -> RiskResult<TabularDataset> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(RiskError::Dataset(format!("dataset not found: {}", path.display())));
        }
        let mut reader = csv::ReaderBuilder::new().has_headers(true).from_path(path)?;
        let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        let mut rows = Vec::new();
        for record in reader.records() {
            rows.push(record?.iter().map(str::to_string).collect());
        }
        log::info!(
            "data: loaded {} rows x {} columns from {}",
            rows.len(),
            headers.len(),
            path.display()
        );
        Ok(TabularDataset { headers, rows })
    }

    /// Split off the target, drop leakage and non-numeric columns, fill
    /// gaps with column medians.
    pub fn preprocess(
        &self,
        dataset: &TabularDataset,
        target_column: &str,
    ) -> RiskResult<(FeatureFrame, Vec<Label>)> {
        if dataset.is_empty() {
            return Err(RiskError::Dataset("dataset has no rows".into()));
        }
        let Some(target) = dataset.headers.iter().position(|h| h == target_column) else {
            return Err(RiskError::Dataset(format!(
                "target column '{target_column}' not found"
            )));
        };

        let labels = dataset
            .column(target)
            .enumerate()
            .map(|(i, cell)| {
                parse_label(cell).ok_or_else(|| {
                    RiskError::Dataset(format!("row {i}: unreadable label '{cell}'"))
                })
            })
            .collect::<RiskResult<Vec<_>>>()?;

        let leaked: Vec<&str> = dataset
            .headers
            .iter()
            .filter(|h| LEAKAGE_COLUMNS.contains(&h.as_str()))
            .map(String::as_str)
            .collect();
        if !leaked.is_empty() {
            log::warn!("data: dropping index columns (leakage): {leaked:?}");
        }

        let mut columns: Vec<String> = Vec::new();
        let mut values: Vec<Vec<f64>> = Vec::new();
        let mut non_numeric = Vec::new();
        let mut off_schema = Vec::new();

        for (j, header) in dataset.headers.iter().enumerate() {
            if j == target || LEAKAGE_COLUMNS.contains(&header.as_str()) {
                continue;
            }
            let Some(col) = parse_numeric(dataset.column(j)) else {
                non_numeric.push(header.clone());
                continue;
            };
            let name = if self.options.normalize_headers {
                normalize_header(header)
            } else {
                header.clone()
            };
            if self.options.restrict_to_schema && !FEATURE_NAMES.contains(&name.as_str()) {
                off_schema.push(name);
                continue;
            }
            if columns.contains(&name) {
                log::warn!("data: duplicate column '{name}' after normalisation, keeping the first");
                continue;
            }
            columns.push(name);
            values.push(fill_with_median(col));
        }

        if !non_numeric.is_empty() {
            log::info!("data: dropping non-numeric columns: {non_numeric:?}");
        }
        if !off_schema.is_empty() {
            log::info!("data: dropping columns outside the feature schema: {off_schema:?}");
        }
        if columns.is_empty() {
            return Err(RiskError::Dataset("no numeric feature columns remain".into()));
        }

        let n = dataset.len();
        let data = Array2::from_shape_fn((n, columns.len()), |(i, j)| values[j][i]);
        log::info!("data: {} feature columns after preprocessing", columns.len());
        Ok((FeatureFrame::new(columns, data)?, labels))
    }

    /// Stratified split; optionally SMOTE then undersample the training part.
    pub fn split_and_balance(
        &self,
        x: &FeatureFrame,
        y: &[Label],
        test_size: f64,
        balance: bool,
    ) -> RiskResult<TrainTestSplit> {
        if x.nrows() != y.len() {
            return Err(RiskError::Dataset(format!(
                "{} rows but {} labels",
                x.nrows(),
                y.len()
            )));
        }
        if !(test_size > 0.0 && test_size < 1.0) {
            return Err(RiskError::Configuration(format!(
                "test_size must lie in (0, 1), got {test_size}"
            )));
        }

        let seed = self.options.seed;
        let (train_idx, test_idx) = stratified_split(y, test_size, &mut StageRng::for_stage(seed, Stage::Split));
        let x_test = x.take_rows(&test_idx);
        let y_test: Vec<Label> = test_idx.iter().map(|&i| y[i]).collect();
        let mut x_train = x.take_rows(&train_idx);
        let mut y_train: Vec<Label> = train_idx.iter().map(|&i| y[i]).collect();

        log::info!("data: train {} rows, test {} rows", x_train.nrows(), x_test.nrows());

        if balance {
            if !y_train.contains(&FRAUD) || !y_train.contains(&LEGIT) {
                return Err(RiskError::Dataset(
                    "training split holds a single class, nothing to balance".into(),
                ));
            }
            let (bx, by) = smote(
                x_train.data(),
                &y_train,
                OVERSAMPLE_RATIO,
                SMOTE_NEIGHBOURS,
                &mut StageRng::for_stage(seed, Stage::Oversample),
            )?;
            let (bx, by) = undersample(&bx, &by, UNDERSAMPLE_RATIO, &mut StageRng::for_stage(seed, Stage::Undersample));
            let fraud = by.iter().filter(|&&l| l == FRAUD).count();
            log::info!(
                "data: balanced train {} rows (fraud {}, legitimate {})",
                by.len(),
                fraud,
                by.len() - fraud
            );
            x_train = FeatureFrame::new(x_train.columns().to_vec(), bx)?;
            y_train = by;
        }

        Ok(TrainTestSplit { x_train, y_train, x_test, y_test })
    }

    pub fn feature_statistics(&self, x: &FeatureFrame) -> BTreeMap<String, ColumnStats> {
        x.columns()
            .iter()
            .enumerate()
            .map(|(j, name)| {
                let col: Vec<f64> = x.data().column(j).to_vec();
                let m = mean(&col);
                let std = if col.len() > 1 {
                    (col.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (col.len() - 1) as f64).sqrt()
                } else {
                    0.0
                };
                let stats = ColumnStats {
                    mean: m,
                    std,
                    min: col.iter().copied().fold(f64::INFINITY, f64::min),
                    max: col.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                    median: median(&col).unwrap_or(0.0),
                };
                (name.clone(), stats)
            })
            .collect()
    }

    /// Load, preprocess and split in one go, using the loader's options.
    pub fn load_and_prepare(&self, path: impl AsRef<Path>) -> RiskResult<TrainTestSplit> {
        self.options.validate()?;
        let dataset = self.load(path)?;
        let (x, y) = self.preprocess(&dataset, &self.options.target_column)?;
        let fraud = y.iter().filter(|&&l| l == FRAUD).count();
        log::info!(
            "data: fraud {} ({:.2}%), legitimate {}",
            fraud,
            100.0 * fraud as f64 / y.len() as f64,
            y.len() - fraud
        );
        self.split_and_balance(&x, &y, self.options.test_size, self.options.balance)
    }
}

/// "Avg min between sent tnx" → "avg_min_between_sent_tnx".
pub fn normalize_header(header: &str) -> String {
    let mut out = String::with_capacity(header.len());
    for c in header.trim().chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('_') && !out.is_empty() {
            out.push('_');
        }
    }
    while out.ends_with('_') {
        out.pop();
    }
    HEADER_ALIASES
        .iter()
        .find(|(from, _)| *from == out)
        .map(|(_, to)| to.to_string())
        .unwrap_or(out)
}

fn parse_label(cell: &str) -> Option<Label> {
    match cell.trim().to_ascii_lowercase().as_str() {
        "1" | "1.0" | "true" => Some(FRAUD),
        "0" | "0.0" | "false" => Some(LEGIT),
        _ => None,
    }
}

/// Cells as f64, blanks as NaN. None if any non-blank cell is not a number.
fn parse_numeric<'a>(cells: impl Iterator<Item = &'a str>) -> Option<Vec<f64>> {
    cells
        .map(|c| {
            let c = c.trim();
            if c.is_empty() {
                Some(f64::NAN)
            } else {
                c.parse::<f64>().ok()
            }
        })
        .collect()
}

fn fill_with_median(mut col: Vec<f64>) -> Vec<f64> {
    let fill = median(&col).unwrap_or(0.0);
    for v in &mut col {
        if !v.is_finite() {
            *v = fill;
        }
    }
    col
}

/// Per-class shuffle, then `round(test_size * class_size)` rows of each
/// class go to test. Both index lists come back sorted.
pub fn stratified_split(y: &[Label], test_size: f64, rng: &mut StageRng) -> (Vec<usize>, Vec<usize>) {
    let mut train = Vec::new();
    let mut test = Vec::new();
    for class in [LEGIT, FRAUD] {
        let mut idx: Vec<usize> = (0..y.len()).filter(|&i| y[i] == class).collect();
        rng.shuffle(&mut idx);
        let n_test = ((idx.len() as f64) * test_size).round() as usize;
        let n_test = n_test.min(idx.len());
        test.extend_from_slice(&idx[..n_test]);
        train.extend_from_slice(&idx[n_test..]);
    }
    train.sort_unstable();
    test.sort_unstable();
    (train, test)
}

fn class_counts(y: &[Label]) -> (Label, usize, usize) {
    let fraud = y.iter().filter(|&&l| l == FRAUD).count();
    let legit = y.len() - fraud;
    if fraud <= legit {
        (FRAUD, fraud, legit)
    } else {
        (LEGIT, legit, fraud)
    }
}

/// Synthetic minority rows on segments to one of the `k` nearest
/// minority neighbours until minority:majority reaches `ratio`.
pub fn smote(
    x: &Array2<f64>,
    y: &[Label],
    ratio: f64,
    k: usize,
    rng: &mut StageRng,
) -> RiskResult<(Array2<f64>, Vec<Label>)> {
    let (minority, n_min, n_maj) = class_counts(y);
    let target = (ratio * n_maj as f64) as usize;
    if target <= n_min {
        return Ok((x.clone(), y.to_vec()));
    }
    if n_min < 2 {
        log::warn!("data: {n_min} minority rows, skipping oversampling");
        return Ok((x.clone(), y.to_vec()));
    }

    let min_idx: Vec<usize> = (0..y.len()).filter(|&i| y[i] == minority).collect();
    let k = k.min(n_min - 1);
    let neighbours: Vec<Vec<usize>> = min_idx
        .iter()
        .map(|&i| {
            let mut d: Vec<(f64, usize)> = min_idx
                .iter()
                .filter(|&&j| j != i)
                .map(|&j| {
                    let dist: f64 = x
                        .row(i)
                        .iter()
                        .zip(x.row(j).iter())
                        .map(|(a, b)| (a - b).powi(2))
                        .sum();
                    (dist, j)
                })
                .collect();
            d.sort_by(|a, b| a.0.total_cmp(&b.0));
            d.into_iter().take(k).map(|(_, j)| j).collect()
        })
        .collect();

    let n_new = target - n_min;
    let d = x.ncols();
    let mut flat: Vec<f64> = x.iter().copied().collect();
    flat.reserve(n_new * d);
    for _ in 0..n_new {
        let a = rng.next_below(min_idx.len());
        let nn = &neighbours[a];
        let b = nn[rng.next_below(nn.len())];
        let gap = rng.next_f64();
        let base = x.row(min_idx[a]);
        let other = x.row(b);
        flat.extend(base.iter().zip(other.iter()).map(|(p, q)| p + gap * (q - p)));
    }
    let mut labels = y.to_vec();
    labels.extend(std::iter::repeat(minority).take(n_new));

    let out = Array2::from_shape_vec((labels.len(), d), flat)?;
    Ok((out, labels))
}

/// Drop random majority rows until minority:majority reaches `ratio`.
pub fn undersample(
    x: &Array2<f64>,
    y: &[Label],
    ratio: f64,
    rng: &mut StageRng,
) -> (Array2<f64>, Vec<Label>) {
    let (minority, n_min, n_maj) = class_counts(y);
    if n_min < 2 {
        log::warn!("data: {n_min} minority rows, skipping undersampling");
        return (x.clone(), y.to_vec());
    }
    let target = (n_min as f64 / ratio) as usize;
    if n_maj <= target {
        return (x.clone(), y.to_vec());
    }
    let maj_idx: Vec<usize> = (0..y.len()).filter(|&i| y[i] != minority).collect();
    let mut keep: Vec<usize> = rng
        .sample_indices(maj_idx.len(), target)
        .into_iter()
        .map(|k| maj_idx[k])
        .chain((0..y.len()).filter(|&i| y[i] == minority))
        .collect();
    keep.sort_unstable();
    let labels = keep.iter().map(|&i| y[i]).collect();
    (x.select(ndarray::Axis(0), &keep), labels)
}
