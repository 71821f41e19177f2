//! Fixed-width time buckets and the OHLCV row produced per bucket.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Bucket width. Boundaries are multiples of the width counted from the
/// Unix epoch, so every bucket start is independent of the requested range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct Interval {
    minutes: u32,
}

impl Interval {
    /// `None` for a zero-width interval.
    pub fn from_minutes(minutes: u32) -> Option<Self> {
        (minutes > 0).then_some(Self { minutes })
    }

    pub fn minutes(&self) -> u32 {
        self.minutes
    }

    pub fn seconds(&self) -> i64 {
        i64::from(self.minutes) * 60
    }

    pub fn duration(&self) -> Duration {
        Duration::minutes(i64::from(self.minutes))
    }

    /// Start of the bucket containing `ts`.
    pub fn floor(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let rem = ts.timestamp().rem_euclid(self.seconds());
        ts - Duration::seconds(rem) - Duration::nanoseconds(i64::from(ts.timestamp_subsec_nanos()))
    }

    pub fn is_aligned(&self, ts: DateTime<Utc>) -> bool {
        self.floor(ts) == ts
    }
}

impl TryFrom<u32> for Interval {
    type Error = String;

    fn try_from(minutes: u32) -> Result<Self, Self::Error> {
        Interval::from_minutes(minutes).ok_or_else(|| "interval must be at least one minute".into())
    }
}

impl From<Interval> for u32 {
    fn from(interval: Interval) -> u32 {
        interval.minutes
    }
}

/// Summary of one bucket for one series.
///
/// Invariant: `low <= open, close <= high`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IntervalRow {
    pub interval_start: DateTime<Utc>,
    pub low: f64,
    pub high: f64,
    pub open: f64,
    pub close: f64,
    pub volume: f64,
}

impl IntervalRow {
    pub fn field(&self, field: Field) -> f64 {
        match field {
            Field::Low => self.low,
            Field::High => self.high,
            Field::Open => self.open,
            Field::Close => self.close,
            Field::Volume => self.volume,
        }
    }
}

/// Column of an [`IntervalRow`] that can be projected into the feature table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Field {
    Low,
    High,
    Open,
    Close,
    Volume,
}

impl Field {
    pub const ALL: [Field; 5] = [Field::Low, Field::High, Field::Open, Field::Close, Field::Volume];

    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Low => "low",
            Field::High => "high",
            Field::Open => "open",
            Field::Close => "close",
            Field::Volume => "volume",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Field {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Field::ALL
            .iter()
            .copied()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| format!("unknown field '{s}'"))
    }
}
