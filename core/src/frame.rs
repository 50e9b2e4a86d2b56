//! Named-column feature matrices.
//!
//! Every model entry point takes a FeatureFrame and selects its trained
//! columns by name. Column position in a caller's frame carries no meaning.

use crate::{
    error::{RiskError, RiskResult},
    features::{FeatureVector, FEATURE_NAMES},
};
use ndarray::{Array2, ArrayView1, Axis};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub struct FeatureFrame {
    columns: Vec<String>,
    data: Array2<f64>,
}

impl FeatureFrame {
    pub fn new(columns: Vec<String>, data: Array2<f64>) -> RiskResult<Self> {
        if columns.len() != data.ncols() {
            return Err(RiskError::Dataset(format!(
                "{} column names for {} columns",
                columns.len(),
                data.ncols()
            )));
        }
        Ok(Self { columns, data })
    }

    /// Build from row-major values.
    pub fn from_rows(columns: Vec<String>, rows: &[Vec<f64>]) -> RiskResult<Self> {
        let ncols = columns.len();
        if let Some(bad) = rows.iter().find(|r| r.len() != ncols) {
            return Err(RiskError::Dataset(format!(
                "row has {} values, expected {ncols}",
                bad.len()
            )));
        }
        let flat: Vec<f64> = rows.iter().flatten().copied().collect();
        let data = Array2::from_shape_vec((rows.len(), ncols), flat)?;
        Ok(Self { columns, data })
    }

    /// One row per vector, columns in schema order.
    pub fn from_vectors(vectors: &[FeatureVector]) -> RiskResult<Self> {
        let columns: Vec<String> = FEATURE_NAMES.iter().map(|s| s.to_string()).collect();
        let rows = vectors
            .iter()
            .map(|v| v.to_row(&columns))
            .collect::<RiskResult<Vec<_>>>()?;
        Self::from_rows(columns, &rows)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn data(&self) -> &Array2<f64> {
        &self.data
    }

    pub fn nrows(&self) -> usize {
        self.data.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.data.ncols()
    }

    pub fn row(&self, i: usize) -> ArrayView1<'_, f64> {
        self.data.row(i)
    }

    pub fn value(&self, row: usize, column: &str) -> Option<f64> {
        let j = self.columns.iter().position(|c| c == column)?;
        Some(self.data[[row, j]])
    }

    /// Matrix with exactly `names` as columns, in that order.
    /// Any name the frame lacks is reported as a schema error.
    pub fn select(&self, names: &[String]) -> RiskResult<Array2<f64>> {
        let index: HashMap<&str, usize> = self
            .columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.as_str(), i))
            .collect();
        let mut positions = Vec::with_capacity(names.len());
        let mut missing = Vec::new();
        for name in names {
            match index.get(name.as_str()) {
                Some(&j) => positions.push(j),
                None => missing.push(name.clone()),
            }
        }
        if !missing.is_empty() {
            return Err(RiskError::Schema { missing });
        }
        Ok(self.data.select(Axis(1), &positions))
    }

    /// Same columns, subset of rows.
    pub fn take_rows(&self, indices: &[usize]) -> Self {
        Self {
            columns: self.columns.clone(),
            data: self.data.select(Axis(0), indices),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn select_reorders_columns_by_name() {
        let frame = FeatureFrame::from_rows(
            names(&["a", "b", "c"]),
            &[vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]],
        )
        .unwrap();
        let m = frame.select(&names(&["c", "a"])).unwrap();
        assert_eq!(m.row(0).to_vec(), vec![3.0, 1.0]);
        assert_eq!(m.row(1).to_vec(), vec![6.0, 4.0]);
    }

    #[test]
    fn select_reports_every_missing_column() {
        let frame = FeatureFrame::from_rows(names(&["a"]), &[vec![1.0]]).unwrap();
        match frame.select(&names(&["a", "x", "y"])) {
            Err(RiskError::Schema { missing }) => assert_eq!(missing, names(&["x", "y"])),
            other => panic!("expected schema error, got {other:?}"),
        }
    }

    #[test]
    fn ragged_rows_are_rejected() {
        let err = FeatureFrame::from_rows(names(&["a", "b"]), &[vec![1.0]]);
        assert!(err.is_err());
    }
}
