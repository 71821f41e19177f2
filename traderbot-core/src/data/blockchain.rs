//! Blockchain statistics from a manually compiled CSV export.
//!
//! No suitable historical API exists for these statistics, so the collector
//! reads a local file with the header
//! `Timestamp,Hashrate,Addresses,Supply,Trx_Fee,Daily_Trx`. The symbol names
//! the column to emit.

use super::provider::{check_range, finish_records, Collector, FetchError};
use crate::domain::{RawRecord, SourceKind};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use std::path::PathBuf;

pub const STAT_COLUMNS: [&str; 5] = ["Hashrate", "Addresses", "Supply", "Trx_Fee", "Daily_Trx"];

pub struct BlockchainStats {
    csv_path: PathBuf,
}

impl BlockchainStats {
    pub fn new(csv_path: impl Into<PathBuf>) -> Self {
        Self {
            csv_path: csv_path.into(),
        }
    }

    fn malformed(&self, symbol: &str, reason: String) -> FetchError {
        FetchError::Malformed {
            provider: SourceKind::Blockchain,
            symbol: symbol.to_string(),
            reason: format!("{}: {reason}", self.csv_path.display()),
        }
    }
}

/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS` and bare dates (midnight UTC).
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|n| n.and_utc())
}

impl Collector for BlockchainStats {
    fn source(&self) -> SourceKind {
        SourceKind::Blockchain
    }

    fn fetch_range(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<RawRecord>, FetchError> {
        check_range(self.source(), symbol, start, end)?;
        if !STAT_COLUMNS.contains(&symbol) {
            return Err(FetchError::invalid(
                self.source(),
                symbol,
                format!("unknown statistic, expected one of {STAT_COLUMNS:?}"),
            ));
        }

        let mut reader = csv::Reader::from_path(&self.csv_path).map_err(|e| FetchError::Io {
            provider: self.source(),
            symbol: symbol.to_string(),
            path: self.csv_path.display().to_string(),
            reason: e.to_string(),
        })?;

        let headers = reader
            .headers()
            .map_err(|e| self.malformed(symbol, e.to_string()))?
            .clone();
        let find = |name: &str| headers.iter().position(|h| h.trim() == name);
        let ts_col = find("Timestamp")
            .ok_or_else(|| self.malformed(symbol, "missing Timestamp column".into()))?;
        let value_col =
            find(symbol).ok_or_else(|| self.malformed(symbol, format!("missing {symbol} column")))?;

        let mut records = Vec::new();
        for (line, row) in reader.records().enumerate() {
            let row = row.map_err(|e| self.malformed(symbol, e.to_string()))?;
            let raw_ts = row.get(ts_col).unwrap_or_default();
            let ts = parse_timestamp(raw_ts).ok_or_else(|| {
                self.malformed(symbol, format!("row {}: bad timestamp '{raw_ts}'", line + 2))
            })?;
            if ts < start || ts >= end {
                continue;
            }
            let raw_value = row.get(value_col).unwrap_or_default().trim();
            let value: f64 = raw_value.parse().map_err(|_| {
                self.malformed(
                    symbol,
                    format!("row {}: non-numeric {symbol} '{raw_value}'", line + 2),
                )
            })?;
            records.push(RawRecord::new(ts, value, 1.0, SourceKind::Blockchain));
        }

        tracing::info!(
            provider = "blockchain",
            symbol,
            rows = records.len(),
            path = %self.csv_path.display(),
            "read blockchain stats"
        );
        Ok(finish_records(records, start, end))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::io::Write;

    fn write_csv(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f
    }

    const SAMPLE: &str = "Timestamp,Hashrate,Addresses,Supply,Trx_Fee,Daily_Trx
2018-01-01,15000000,900000,16775000,120.5,300000
2018-01-02,15100000,910000,16777000,130.0,0
2018-01-03 00:00:00,15200000,920000,16779000,125.0,310000
";

    #[test]
    fn timestamp_formats() {
        let midnight = Utc.with_ymd_and_hms(2018, 1, 2, 0, 0, 0).unwrap();
        assert_eq!(parse_timestamp("2018-01-02"), Some(midnight));
        assert_eq!(parse_timestamp("2018-01-02 00:00:00"), Some(midnight));
        assert_eq!(parse_timestamp("2018-01-02T00:00:00Z"), Some(midnight));
        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[test]
    fn reads_requested_column_in_range() {
        let f = write_csv(SAMPLE);
        let c = BlockchainStats::new(f.path());
        let recs = c
            .fetch_range(
                "Trx_Fee",
                Utc.with_ymd_and_hms(2018, 1, 1, 0, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2018, 1, 3, 0, 0, 0).unwrap(),
            )
            .unwrap();
        let values: Vec<f64> = recs.iter().map(|r| r.value).collect();
        assert_eq!(values, vec![120.5, 130.0]);
    }

    #[test]
    fn unknown_statistic_rejected() {
        let f = write_csv(SAMPLE);
        let c = BlockchainStats::new(f.path());
        let err = c
            .fetch_range(
                "Difficulty",
                Utc.with_ymd_and_hms(2018, 1, 1, 0, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2018, 2, 1, 0, 0, 0).unwrap(),
            )
            .unwrap_err();
        assert!(matches!(err, FetchError::InvalidRequest { .. }));
    }

    #[test]
    fn non_numeric_cell_is_malformed() {
        let f = write_csv("Timestamp,Hashrate,Addresses,Supply,Trx_Fee,Daily_Trx\n2018-01-01,abc,1,1,1,1\n");
        let c = BlockchainStats::new(f.path());
        let err = c
            .fetch_range(
                "Hashrate",
                Utc.with_ymd_and_hms(2018, 1, 1, 0, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2018, 2, 1, 0, 0, 0).unwrap(),
            )
            .unwrap_err();
        assert!(matches!(err, FetchError::Malformed { .. }));
    }

    #[test]
    fn missing_file_is_io_error() {
        let c = BlockchainStats::new("/nonexistent/blockchain.csv");
        let err = c
            .fetch_range(
                "Hashrate",
                Utc.with_ymd_and_hms(2018, 1, 1, 0, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2018, 2, 1, 0, 0, 0).unwrap(),
            )
            .unwrap_err();
        assert!(matches!(err, FetchError::Io { .. }));
    }
}
