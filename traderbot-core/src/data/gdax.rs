//! Exchange candle feed (GDAX / Coinbase `products/{pair}/candles`).
//!
//! The endpoint returns at most `max_points` candles per request, so a range
//! is split into windows of `max_points * granularity` and fetched in order.
//! Candles come back newest-first; each one becomes a single record carrying
//! the close price and the candle volume.

use super::paginate::page_windows;
use super::provider::{check_range, finish_records, Collector, FetchError};
use super::retry::{ProviderClient, RequestContext};
use crate::domain::{RawRecord, SourceKind};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde_json::Value;

/// Granularities (seconds) the candle endpoint accepts.
pub const SUPPORTED_GRANULARITIES: [i64; 6] = [60, 300, 900, 3600, 21_600, 86_400];

pub struct GdaxCandles {
    client: ProviderClient,
    base_url: String,
    granularity_secs: i64,
    max_points: u32,
}

impl GdaxCandles {
    pub fn new(
        client: ProviderClient,
        base_url: impl Into<String>,
        granularity_secs: i64,
        max_points: u32,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            granularity_secs,
            max_points,
        }
    }

    /// Width of one request window.
    pub fn page_span(&self) -> Duration {
        Duration::seconds(self.granularity_secs * i64::from(self.max_points.max(1)))
    }

    fn url(&self, symbol: &str) -> String {
        format!(
            "{}/products/{symbol}/candles",
            self.base_url.trim_end_matches('/')
        )
    }

    /// `[[time, low, high, open, close, volume], ...]`
    fn parse_page(body: &str) -> Result<Vec<RawRecord>, String> {
        let rows: Vec<Vec<Value>> = serde_json::from_str(body).map_err(|e| e.to_string())?;
        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            if row.len() < 6 {
                return Err(format!("candle has {} fields", row.len()));
            }
            let time = row[0].as_i64().ok_or("bad candle time")?;
            let close = row[4].as_f64().ok_or("bad close")?;
            let volume = row[5].as_f64().ok_or("bad volume")?;
            let timestamp =
                DateTime::from_timestamp(time, 0).ok_or_else(|| format!("bad time {time}"))?;
            records.push(RawRecord::new(timestamp, close, volume, SourceKind::Gdax));
        }
        records.sort_by_key(|r| r.timestamp);
        Ok(records)
    }
}

fn iso(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

impl Collector for GdaxCandles {
    fn source(&self) -> SourceKind {
        SourceKind::Gdax
    }

    fn fetch_range(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<RawRecord>, FetchError> {
        check_range(self.source(), symbol, start, end)?;
        if !SUPPORTED_GRANULARITIES.contains(&self.granularity_secs) {
            return Err(FetchError::invalid(
                self.source(),
                symbol,
                format!(
                    "granularity {}s not one of {SUPPORTED_GRANULARITIES:?}",
                    self.granularity_secs
                ),
            ));
        }

        let url = self.url(symbol);
        let mut records = Vec::new();

        for (slice_start, slice_end) in page_windows(start, end, self.page_span()) {
            let ctx = RequestContext {
                provider: self.source(),
                symbol,
                start: slice_start,
                end: slice_end,
            };
            let query = vec![
                ("start".to_string(), iso(slice_start)),
                ("end".to_string(), iso(slice_end)),
                ("granularity".to_string(), self.granularity_secs.to_string()),
            ];
            let page = self
                .client
                .get_with_retry(ctx, &url, &query, Self::parse_page)?;
            tracing::info!(
                provider = "gdax",
                symbol,
                from = %slice_start,
                to = %slice_end,
                candles = page.len(),
                "fetched candle page"
            );
            records.extend(page);
        }

        Ok(finish_records(records, start, end))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_newest_first_candles_into_ascending_records() {
        let body = "[[1515003600, 99.0, 105.0, 100.0, 104.0, 12.5],
                     [1515000000, 95.0, 101.0, 96.0, 100.0, 7.0]]";
        let recs = GdaxCandles::parse_page(body).unwrap();
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0].timestamp.timestamp(), 1_515_000_000);
        assert_eq!(recs[0].value, 100.0);
        assert_eq!(recs[1].size, 12.5);
    }

    #[test]
    fn short_candle_rejected() {
        assert!(GdaxCandles::parse_page("[[1515000000, 1.0]]").is_err());
    }

    #[test]
    fn empty_page_parses() {
        assert!(GdaxCandles::parse_page("[]").unwrap().is_empty());
    }

    #[test]
    fn iso_timestamps_have_no_fraction() {
        let ts = DateTime::from_timestamp(1_515_000_000, 0).unwrap();
        assert_eq!(iso(ts), "2018-01-03T17:20:00Z");
    }
}
