//! Outer-join per-series interval rows onto a common time index.
//!
//! Every (source, symbol) series contributes one column per selected field,
//! named by [`column_name`]. The index is the sorted union of every interval
//! start seen in any series. Interior gaps are filled by time-weighted linear
//! interpolation; leading and trailing gaps stay `None` and are removed by
//! [`drop_incomplete_edges`].

use crate::domain::{Field, FeatureTable, IntervalRow, SourceKind, TableError};
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AlignError {
    #[error("source {source_kind} {symbol} produced no rows")]
    MissingSource {
        source_kind: SourceKind,
        symbol: String,
    },

    #[error("nothing to align: no series configured")]
    NoSeries,

    #[error("no interval has a value in every column ({columns} columns over {rows} rows)")]
    NoOverlap { rows: usize, columns: usize },

    #[error(transparent)]
    Table(#[from] TableError),
}

/// `{symbol}_{source}_{field}`.
///
/// Source and field names never contain `_`, so splitting from the right
/// recovers the triple and distinct triples never share a name.
pub fn column_name(symbol: &str, source: SourceKind, field: Field) -> String {
    format!("{symbol}_{source}_{field}")
}

/// Resampled rows of one (source, symbol) pair and the fields to project.
#[derive(Debug, Clone)]
pub struct NamedSeries {
    pub source: SourceKind,
    pub symbol: String,
    pub fields: Vec<Field>,
    pub rows: Vec<IntervalRow>,
}

impl NamedSeries {
    pub fn column_names(&self) -> impl Iterator<Item = String> + '_ {
        self.fields
            .iter()
            .map(|&f| column_name(&self.symbol, self.source, f))
    }
}

/// Join all series and interpolate interior gaps.
///
/// Fails if any series is empty: a configured source never silently drops
/// out of the table.
pub fn align(series: &[NamedSeries]) -> Result<FeatureTable, AlignError> {
    if series.is_empty() {
        return Err(AlignError::NoSeries);
    }
    if let Some(empty) = series.iter().find(|s| s.rows.is_empty()) {
        return Err(AlignError::MissingSource {
            source_kind: empty.source,
            symbol: empty.symbol.clone(),
        });
    }

    let index: Vec<DateTime<Utc>> = series
        .iter()
        .flat_map(|s| s.rows.iter().map(|r| r.interval_start))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let position: HashMap<DateTime<Utc>, usize> =
        index.iter().enumerate().map(|(i, &t)| (t, i)).collect();

    let mut table = FeatureTable::with_index(index)?;
    for s in series {
        for &field in &s.fields {
            let mut column = vec![None; table.len()];
            for row in &s.rows {
                let value = row.field(field);
                if value.is_finite() {
                    column[position[&row.interval_start]] = Some(value);
                }
            }
            table.push_column(column_name(&s.symbol, s.source, field), column)?;
        }
    }

    Ok(interpolate(&table))
}

/// Fill interior gaps of every column; edges are left untouched.
///
/// Applying this to an already interpolated table returns it unchanged.
pub fn interpolate(table: &FeatureTable) -> FeatureTable {
    let mut out = table.clone();
    out.update_columns(fill_interior);
    out
}

/// Time-weighted linear fill between the nearest known neighbours.
pub fn interpolate_column(index: &[DateTime<Utc>], column: &[Option<f64>]) -> Vec<Option<f64>> {
    let mut out = column.to_vec();
    fill_interior(index, &mut out);
    out
}

fn fill_interior(index: &[DateTime<Utc>], column: &mut [Option<f64>]) {
    let mut prev: Option<(usize, f64)> = None;
    for i in 0..column.len() {
        let Some(v1) = column[i] else { continue };
        if let Some((p, v0)) = prev {
            if i - p > 1 {
                let t0 = index[p].timestamp_millis() as f64;
                let span = index[i].timestamp_millis() as f64 - t0;
                for j in p + 1..i {
                    let w = (index[j].timestamp_millis() as f64 - t0) / span;
                    column[j] = Some(v0 + (v1 - v0) * w);
                }
            }
        }
        prev = Some((i, v1));
    }
}

/// Keep the longest run of rows in which every column has a value.
///
/// After [`interpolate`] the only gaps left are at the edges, so this trims
/// rows before the latest first observation and after the earliest last
/// observation.
pub fn drop_incomplete_edges(table: &FeatureTable) -> Result<FeatureTable, AlignError> {
    let mut first = 0;
    let mut last = table.len();
    for (_, column) in table.columns() {
        let lead = column.iter().position(Option::is_some).unwrap_or(column.len());
        let trail = column
            .iter()
            .rposition(Option::is_some)
            .map_or(0, |p| p + 1);
        first = first.max(lead);
        last = last.min(trail);
    }
    if first >= last {
        return Err(AlignError::NoOverlap {
            rows: table.len(),
            columns: table.width(),
        });
    }
    Ok(table.slice_rows(first..last))
}
