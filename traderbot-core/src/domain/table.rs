//! Wide, time-indexed table of named feature columns.
//!
//! Cells are `Option<f64>`: a missing value is `None`, never NaN. Every
//! stage that can produce an undefined number (interpolation edges, division
//! by zero, returns on a zero base) writes `None` and leaves the decision of
//! what to do with it to the caller.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::ops::Range;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum TableError {
    #[error("duplicate column '{0}'")]
    DuplicateColumn(String),

    #[error("unknown column '{0}'")]
    UnknownColumn(String),

    #[error("column '{column}' has {actual} values, index has {expected}")]
    LengthMismatch {
        column: String,
        expected: usize,
        actual: usize,
    },

    #[error("index is not strictly increasing at position {0}")]
    UnsortedIndex(usize),
}

/// Column-major table keyed by interval start.
///
/// Invariants: the index is strictly increasing (no duplicates), column names
/// are unique, and every column has exactly one cell per index entry.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FeatureTable {
    index: Vec<DateTime<Utc>>,
    names: Vec<String>,
    columns: Vec<Vec<Option<f64>>>,
}

impl FeatureTable {
    /// Empty table over the given index.
    pub fn with_index(index: Vec<DateTime<Utc>>) -> Result<Self, TableError> {
        if let Some(pos) = index.windows(2).position(|w| w[0] >= w[1]) {
            return Err(TableError::UnsortedIndex(pos + 1));
        }
        Ok(Self {
            index,
            names: Vec::new(),
            columns: Vec::new(),
        })
    }

    pub fn index(&self) -> &[DateTime<Utc>] {
        &self.index
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn column_names(&self) -> &[String] {
        &self.names
    }

    pub fn width(&self) -> usize {
        self.names.len()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    pub fn column(&self, name: &str) -> Option<&[Option<f64>]> {
        self.position(name).map(|i| self.columns[i].as_slice())
    }

    /// Iterate `(name, cells)` pairs in insertion order.
    pub fn columns(&self) -> impl Iterator<Item = (&str, &[Option<f64>])> {
        self.names
            .iter()
            .zip(&self.columns)
            .map(|(n, c)| (n.as_str(), c.as_slice()))
    }

    pub fn push_column(
        &mut self,
        name: impl Into<String>,
        values: Vec<Option<f64>>,
    ) -> Result<(), TableError> {
        let name = name.into();
        if self.has_column(&name) {
            return Err(TableError::DuplicateColumn(name));
        }
        if values.len() != self.index.len() {
            return Err(TableError::LengthMismatch {
                column: name,
                expected: self.index.len(),
                actual: values.len(),
            });
        }
        self.names.push(name);
        self.columns.push(values);
        Ok(())
    }

    /// Replace the cells of an existing column.
    pub fn replace_column(
        &mut self,
        name: &str,
        values: Vec<Option<f64>>,
    ) -> Result<(), TableError> {
        let pos = self
            .position(name)
            .ok_or_else(|| TableError::UnknownColumn(name.to_string()))?;
        if values.len() != self.index.len() {
            return Err(TableError::LengthMismatch {
                column: name.to_string(),
                expected: self.index.len(),
                actual: values.len(),
            });
        }
        self.columns[pos] = values;
        Ok(())
    }

    /// Rewrite the cells of every column in place. Column lengths cannot
    /// change, so the table stays rectangular.
    pub fn update_columns(&mut self, mut f: impl FnMut(&[DateTime<Utc>], &mut [Option<f64>])) {
        for column in &mut self.columns {
            f(&self.index, column.as_mut_slice());
        }
    }

    pub fn remove_column(&mut self, name: &str) -> Option<Vec<Option<f64>>> {
        let pos = self.position(name)?;
        self.names.remove(pos);
        Some(self.columns.remove(pos))
    }

    /// Whether every cell in row `i` holds a value.
    pub fn row_is_complete(&self, i: usize) -> bool {
        i < self.len() && self.columns.iter().all(|c| c[i].is_some())
    }

    /// Copy of the rows in `range` (clamped to the table length).
    pub fn slice_rows(&self, range: Range<usize>) -> FeatureTable {
        let end = range.end.min(self.len());
        let start = range.start.min(end);
        FeatureTable {
            index: self.index[start..end].to_vec(),
            names: self.names.clone(),
            columns: self
                .columns
                .iter()
                .map(|c| c[start..end].to_vec())
                .collect(),
        }
    }

    /// Copy of the rows whose positions appear in `keep` (ascending).
    pub fn select_rows(&self, keep: &[usize]) -> FeatureTable {
        FeatureTable {
            index: keep.iter().map(|&i| self.index[i]).collect(),
            names: self.names.clone(),
            columns: self
                .columns
                .iter()
                .map(|c| keep.iter().map(|&i| c[i]).collect())
                .collect(),
        }
    }

    /// Check the structural invariants. Cheap enough to call in tests and
    /// after deserialization.
    pub fn validate(&self) -> Result<(), TableError> {
        if let Some(pos) = self.index.windows(2).position(|w| w[0] >= w[1]) {
            return Err(TableError::UnsortedIndex(pos + 1));
        }
        let mut seen = HashSet::new();
        for (name, col) in self.names.iter().zip(&self.columns) {
            if !seen.insert(name.as_str()) {
                return Err(TableError::DuplicateColumn(name.clone()));
            }
            if col.len() != self.index.len() {
                return Err(TableError::LengthMismatch {
                    column: name.clone(),
                    expected: self.index.len(),
                    actual: col.len(),
                });
            }
        }
        Ok(())
    }
}
