//! Raw time-stamped observations as returned by a collector.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which provider a series comes from.
///
/// The string form never contains `_`, which keeps generated column names
/// unambiguous (see [`crate::features::align::column_name`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Exchange trade feed (tick-level trades).
    Kraken,
    /// Exchange candle feed.
    Gdax,
    /// Search-interest timeline.
    Trends,
    /// Blockchain statistics from a local CSV export.
    Blockchain,
    /// Comment sentiment from a social feed.
    Reddit,
    /// Seeded random walk for offline runs.
    Synthetic,
}

impl SourceKind {
    pub const ALL: [SourceKind; 6] = [
        SourceKind::Kraken,
        SourceKind::Gdax,
        SourceKind::Trends,
        SourceKind::Blockchain,
        SourceKind::Reddit,
        SourceKind::Synthetic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Kraken => "kraken",
            SourceKind::Gdax => "gdax",
            SourceKind::Trends => "trends",
            SourceKind::Blockchain => "blockchain",
            SourceKind::Reddit => "reddit",
            SourceKind::Synthetic => "synthetic",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SourceKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown source '{s}'"))
    }
}

/// One observation: a trade, a candle close, a search-interest point, a
/// blockchain statistic or a scored comment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub timestamp: DateTime<Utc>,
    /// Price for market feeds, level for everything else.
    pub value: f64,
    /// Traded size, or a count weight (1.0) for event feeds.
    pub size: f64,
    pub source: SourceKind,
}

impl RawRecord {
    pub fn new(timestamp: DateTime<Utc>, value: f64, size: f64, source: SourceKind) -> Self {
        Self {
            timestamp,
            value,
            size,
            source,
        }
    }
}

/// Sort by timestamp and drop repeated timestamps, keeping the first
/// occurrence in fetch order.
///
/// The sort is stable, so "first" means first fetched: when two pages overlap
/// on a boundary sample, the copy from the earlier page survives.
pub fn sort_dedup_first(records: &mut Vec<RawRecord>) {
    records.sort_by_key(|r| r.timestamp);
    records.dedup_by_key(|r| r.timestamp);
}
