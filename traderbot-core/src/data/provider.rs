//! Collector trait and structured fetch errors.
//!
//! A collector fetches raw records for one symbol over a half-open range
//! `[start, end)`. A collector may be shared by several series running on
//! separate threads; its provider client paces them as one stream.

use crate::domain::{RawRecord, SourceKind};
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors raised while collecting from a provider.
///
/// Every variant names the provider and symbol so a failed run can be
/// attributed without digging through logs.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error(
        "{provider} {symbol}: gave up after {attempts} attempts for {start} .. {end}: {last}"
    )]
    RetriesExhausted {
        provider: SourceKind,
        symbol: String,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        attempts: u32,
        last: String,
    },

    #[error("{provider} {symbol}: malformed data: {reason}")]
    Malformed {
        provider: SourceKind,
        symbol: String,
        reason: String,
    },

    #[error("{provider} {symbol}: invalid request: {reason}")]
    InvalidRequest {
        provider: SourceKind,
        symbol: String,
        reason: String,
    },

    #[error("{provider} {symbol}: cannot read {path}: {reason}")]
    Io {
        provider: SourceKind,
        symbol: String,
        path: String,
        reason: String,
    },
}

impl FetchError {
    pub fn provider(&self) -> SourceKind {
        match self {
            FetchError::RetriesExhausted { provider, .. }
            | FetchError::Malformed { provider, .. }
            | FetchError::InvalidRequest { provider, .. }
            | FetchError::Io { provider, .. } => *provider,
        }
    }

    pub(crate) fn invalid(provider: SourceKind, symbol: &str, reason: impl Into<String>) -> Self {
        FetchError::InvalidRequest {
            provider,
            symbol: symbol.to_string(),
            reason: reason.into(),
        }
    }
}

/// A data source that can fetch raw records over a time range.
pub trait Collector: Send + Sync {
    /// Which provider this collector talks to.
    fn source(&self) -> SourceKind;

    /// Fetch every record for `symbol` in `[start, end)`.
    ///
    /// The result is sorted ascending by timestamp with no repeated
    /// timestamps (first fetched wins). An empty result is not an error.
    fn fetch_range(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<RawRecord>, FetchError>;
}

/// Reject empty or inverted ranges before any request goes out.
pub(crate) fn check_range(
    provider: SourceKind,
    symbol: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<(), FetchError> {
    if start >= end {
        return Err(FetchError::invalid(
            provider,
            symbol,
            format!("empty range {start} .. {end}"),
        ));
    }
    Ok(())
}

/// Keep records inside `[start, end)`, then sort and dedup (first wins).
pub(crate) fn finish_records(
    mut records: Vec<RawRecord>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Vec<RawRecord> {
    records.retain(|r| r.timestamp >= start && r.timestamp < end);
    crate::domain::record::sort_dedup_first(&mut records);
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn error_message_names_provider_symbol_and_range() {
        let err = FetchError::RetriesExhausted {
            provider: SourceKind::Gdax,
            symbol: "BTC-USD".into(),
            start: Utc.with_ymd_and_hms(2018, 1, 1, 0, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2018, 1, 2, 0, 0, 0).unwrap(),
            attempts: 3,
            last: "HTTP 502".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("gdax"));
        assert!(msg.contains("BTC-USD"));
        assert!(msg.contains("2018-01-01"));
        assert!(msg.contains("HTTP 502"));
        assert_eq!(err.provider(), SourceKind::Gdax);
    }

    #[test]
    fn inverted_range_rejected() {
        let t = Utc.with_ymd_and_hms(2018, 1, 1, 0, 0, 0).unwrap();
        assert!(check_range(SourceKind::Kraken, "XBTUSD", t, t).is_err());
    }

    #[test]
    fn finish_filters_to_half_open_range() {
        let t0 = Utc.with_ymd_and_hms(2018, 1, 1, 0, 0, 0).unwrap();
        let rec = |m: i64| {
            RawRecord::new(
                t0 + chrono::Duration::minutes(m),
                m as f64,
                1.0,
                SourceKind::Kraken,
            )
        };
        let out = finish_records(
            vec![rec(10), rec(-1), rec(0), rec(60)],
            t0,
            t0 + chrono::Duration::minutes(60),
        );
        let mins: Vec<f64> = out.iter().map(|r| r.value).collect();
        assert_eq!(mins, vec![0.0, 10.0]);
    }
}
