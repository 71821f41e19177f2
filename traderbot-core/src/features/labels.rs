//! Supervised labels from a transformed table.
//!
//! For horizon `h`, the label of row `t` is the target's value at `t + h`.
//! The first row is dropped (its returns are undefined) and so are the last
//! `h` rows (their label lies past the end of the table).

use crate::domain::FeatureTable;
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum LabelError {
    #[error("forecast horizon must be at least 1")]
    ZeroHorizon,

    #[error("target column '{0}' is not in the table")]
    UnknownTarget(String),

    #[error("{rows} rows leave nothing to label at horizon {horizon}")]
    TooShort { rows: usize, horizon: usize },

    #[error("raw target has {actual} values, table has {expected}")]
    RawLengthMismatch { expected: usize, actual: usize },

    #[error("invalid split fractions train={train} valid={valid}")]
    InvalidSplit { train: f64, valid: f64 },
}

/// Features with one label and one untransformed target value per row.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledDataset {
    /// Transformed table without the target column.
    pub features: FeatureTable,
    /// Transformed target `horizon` rows ahead.
    pub labels: Vec<Option<f64>>,
    /// Untransformed target at the same future row as `labels`.
    pub raw_target: Vec<Option<f64>>,
    pub target: String,
    pub horizon: usize,
}

/// Chronological train/validation/test partition.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetSplit {
    pub train: LabeledDataset,
    pub valid: LabeledDataset,
    pub test: LabeledDataset,
}

impl DatasetSplit {
    /// `(name, part)` in time order.
    pub fn parts(&self) -> [(&'static str, &LabeledDataset); 3] {
        [("train", &self.train), ("valid", &self.valid), ("test", &self.test)]
    }
}

/// Shift `target` back by `horizon` rows and truncate.
///
/// `raw_target` holds the target before percent-change conversion, one value
/// per row of `table`.
pub fn generate_labels(
    table: &FeatureTable,
    raw_target: &[Option<f64>],
    target: &str,
    horizon: usize,
) -> Result<LabeledDataset, LabelError> {
    if horizon == 0 {
        return Err(LabelError::ZeroHorizon);
    }
    let n = table.len();
    if raw_target.len() != n {
        return Err(LabelError::RawLengthMismatch {
            expected: n,
            actual: raw_target.len(),
        });
    }
    let target_col = table
        .column(target)
        .ok_or_else(|| LabelError::UnknownTarget(target.to_string()))?
        .to_vec();
    if n < horizon + 2 {
        return Err(LabelError::TooShort { rows: n, horizon });
    }

    let mut features = table.slice_rows(1..n - horizon);
    features.remove_column(target);
    let labels = target_col[1 + horizon..].to_vec();
    let raw_target = raw_target[1 + horizon..].to_vec();

    Ok(LabeledDataset {
        features,
        labels,
        raw_target,
        target: target.to_string(),
        horizon,
    })
}

impl LabeledDataset {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn index(&self) -> &[DateTime<Utc>] {
        self.features.index()
    }

    fn select(&self, keep: &[usize]) -> LabeledDataset {
        LabeledDataset {
            features: self.features.select_rows(keep),
            labels: keep.iter().map(|&i| self.labels[i]).collect(),
            raw_target: keep.iter().map(|&i| self.raw_target[i]).collect(),
            target: self.target.clone(),
            horizon: self.horizon,
        }
    }

    /// Rows where every feature and the label are defined.
    pub fn drop_incomplete(&self) -> LabeledDataset {
        let keep: Vec<usize> = (0..self.len())
            .filter(|&i| self.labels[i].is_some() && self.features.row_is_complete(i))
            .collect();
        self.select(&keep)
    }

    /// Split in time order: the first `train` fraction, then `valid`, then
    /// the remainder as test.
    pub fn split_chronological(&self, train: f64, valid: f64) -> Result<DatasetSplit, LabelError> {
        let ok = |f: f64| (0.0..=1.0).contains(&f);
        if !ok(train) || !ok(valid) || train + valid > 1.0 {
            return Err(LabelError::InvalidSplit { train, valid });
        }
        let n = self.len();
        let n_train = (n as f64 * train).floor() as usize;
        let n_valid = ((n as f64 * valid).floor() as usize).min(n - n_train);
        let part = |start: usize, end: usize| self.select(&(start..end).collect::<Vec<_>>());
        Ok(DatasetSplit {
            train: part(0, n_train),
            valid: part(n_train, n_train + n_valid),
            test: part(n_train + n_valid, n),
        })
    }
}
