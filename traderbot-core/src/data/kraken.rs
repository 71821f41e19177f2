//! Exchange trade feed (Kraken public `Trades` endpoint).
//!
//! The endpoint takes a `since` cursor in nanoseconds and returns up to ~1000
//! trades after it, plus a `last` cursor for the next page. Backfilling a
//! range therefore walks the cursor forward until it passes the end.

use super::paginate::advance_cursor;
use super::provider::{check_range, finish_records, Collector, FetchError};
use super::retry::{ProviderClient, RequestContext};
use crate::domain::{RawRecord, SourceKind};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

const NANOS: i64 = 1_000_000_000;

#[derive(Debug, Deserialize)]
struct TradesResponse {
    #[serde(default)]
    error: Vec<String>,
    result: Option<serde_json::Map<String, Value>>,
}

/// One parsed page: trades and the cursor the provider wants next.
#[derive(Debug)]
struct TradePage {
    trades: Vec<RawRecord>,
    last: i64,
}

pub struct KrakenTrades {
    client: ProviderClient,
    base_url: String,
}

impl KrakenTrades {
    pub fn new(client: ProviderClient, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    fn url(&self) -> String {
        format!("{}/0/public/Trades", self.base_url.trim_end_matches('/'))
    }

    fn parse_page(body: &str) -> Result<TradePage, String> {
        let resp: TradesResponse = serde_json::from_str(body).map_err(|e| e.to_string())?;
        if !resp.error.is_empty() {
            return Err(resp.error.join("; "));
        }
        let result = resp.result.ok_or("missing result")?;

        let last = match result.get("last") {
            Some(Value::String(s)) => s.parse::<i64>().map_err(|e| format!("last: {e}"))?,
            Some(Value::Number(n)) => n.as_i64().ok_or("last: not an integer")?,
            _ => return Err("missing last cursor".into()),
        };

        // The pair key varies (XBTUSD is reported as XXBTZUSD), so take the
        // one entry that is not the cursor.
        let rows = result
            .iter()
            .find(|(k, _)| k.as_str() != "last")
            .and_then(|(_, v)| v.as_array())
            .ok_or("missing trade array")?;

        let mut trades = Vec::with_capacity(rows.len());
        for row in rows {
            trades.push(parse_trade(row)?);
        }
        Ok(TradePage { trades, last })
    }
}

/// `[price, volume, time, side, type, misc, ...]` with price and volume as
/// decimal strings and time as fractional Unix seconds.
fn parse_trade(row: &Value) -> Result<RawRecord, String> {
    let cells = row.as_array().ok_or("trade is not an array")?;
    if cells.len() < 3 {
        return Err(format!("trade has {} fields", cells.len()));
    }
    let price = number(&cells[0]).ok_or("bad price")?;
    let volume = number(&cells[1]).ok_or("bad volume")?;
    let time = number(&cells[2]).ok_or("bad time")?;

    let secs = time.floor();
    let nanos = ((time - secs) * 1e9).round().min(999_999_999.0) as u32;
    let timestamp =
        DateTime::from_timestamp(secs as i64, nanos).ok_or_else(|| format!("bad time {time}"))?;
    Ok(RawRecord::new(timestamp, price, volume, SourceKind::Kraken))
}

fn number(v: &Value) -> Option<f64> {
    let x = match v {
        Value::String(s) => s.parse::<f64>().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    };
    x.filter(|x| x.is_finite())
}

fn to_nanos(provider: SourceKind, symbol: &str, ts: DateTime<Utc>) -> Result<i64, FetchError> {
    ts.timestamp_nanos_opt()
        .ok_or_else(|| FetchError::invalid(provider, symbol, format!("{ts} out of range")))
}

impl Collector for KrakenTrades {
    fn source(&self) -> SourceKind {
        SourceKind::Kraken
    }

    fn fetch_range(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<RawRecord>, FetchError> {
        check_range(self.source(), symbol, start, end)?;
        let end_ns = to_nanos(self.source(), symbol, end)?;
        let mut cursor = to_nanos(self.source(), symbol, start)?;

        let url = self.url();
        let mut records = Vec::new();

        while cursor < end_ns {
            let slice_start = DateTime::from_timestamp_nanos(cursor);
            let ctx = RequestContext {
                provider: self.source(),
                symbol,
                start: slice_start,
                end,
            };
            let query = vec![
                ("pair".to_string(), symbol.to_string()),
                ("since".to_string(), cursor.to_string()),
            ];
            let page = self
                .client
                .get_with_retry(ctx, &url, &query, Self::parse_page)?;

            tracing::info!(
                provider = "kraken",
                symbol,
                from = %slice_start,
                trades = page.trades.len(),
                "fetched trade page"
            );

            if page.trades.is_empty() {
                break;
            }
            // A stalled `last` still moves past the newest trade returned.
            let newest = page
                .trades
                .iter()
                .filter_map(|t| t.timestamp.timestamp_nanos_opt())
                .max()
                .map_or(cursor, |n| n.saturating_add(1));
            records.extend(page.trades);
            cursor = advance_cursor(cursor, page.last.max(newest));
        }

        Ok(finish_records(records, start, end))
    }
}
