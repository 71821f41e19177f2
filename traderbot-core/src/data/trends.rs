//! Search-interest timeline.
//!
//! Interest is only reported at daily resolution for spans up to roughly six
//! months, so longer ranges are fetched in 180-day windows. A symbol may
//! carry a region after `@` (`bitcoin@US`); without one the worldwide series
//! is requested.

use super::paginate::page_windows;
use super::provider::{check_range, finish_records, Collector, FetchError};
use super::retry::{ProviderClient, RequestContext};
use crate::domain::{RawRecord, SourceKind};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct TimelineResponse {
    #[serde(default)]
    timeline: Vec<TimelinePoint>,
}

#[derive(Debug, Deserialize)]
struct TimelinePoint {
    time: i64,
    value: f64,
}

/// Topic and optional region parsed from a symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrendQuery<'a> {
    pub topic: &'a str,
    pub geo: &'a str,
}

impl<'a> TrendQuery<'a> {
    pub fn parse(symbol: &'a str) -> Option<Self> {
        let (topic, geo) = symbol.split_once('@').unwrap_or((symbol, ""));
        let topic = topic.trim();
        (!topic.is_empty()).then_some(TrendQuery {
            topic,
            geo: geo.trim(),
        })
    }
}

pub struct SearchTrends {
    client: ProviderClient,
    base_url: String,
    window: Duration,
    granularity_secs: i64,
}

impl SearchTrends {
    pub fn new(
        client: ProviderClient,
        base_url: impl Into<String>,
        window_days: u32,
        granularity_secs: i64,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            window: Duration::days(i64::from(window_days.max(1))),
            granularity_secs,
        }
    }

    fn parse_page(body: &str) -> Result<Vec<RawRecord>, String> {
        let resp: TimelineResponse = serde_json::from_str(body).map_err(|e| e.to_string())?;
        resp.timeline
            .into_iter()
            .filter(|p| p.value.is_finite())
            .map(|p| {
                DateTime::from_timestamp(p.time, 0)
                    .map(|ts| RawRecord::new(ts, p.value, 1.0, SourceKind::Trends))
                    .ok_or_else(|| format!("bad time {}", p.time))
            })
            .collect()
    }
}

impl Collector for SearchTrends {
    fn source(&self) -> SourceKind {
        SourceKind::Trends
    }

    fn fetch_range(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<RawRecord>, FetchError> {
        check_range(self.source(), symbol, start, end)?;
        let query_spec = TrendQuery::parse(symbol)
            .ok_or_else(|| FetchError::invalid(self.source(), symbol, "empty topic"))?;

        let mut records = Vec::new();

        for (slice_start, slice_end) in page_windows(start, end, self.window) {
            let ctx = RequestContext {
                provider: self.source(),
                symbol,
                start: slice_start,
                end: slice_end,
            };
            let query = vec![
                ("q".to_string(), query_spec.topic.to_string()),
                ("geo".to_string(), query_spec.geo.to_string()),
                (
                    "start".to_string(),
                    slice_start.to_rfc3339_opts(SecondsFormat::Secs, true),
                ),
                (
                    "end".to_string(),
                    slice_end.to_rfc3339_opts(SecondsFormat::Secs, true),
                ),
                ("granularity".to_string(), self.granularity_secs.to_string()),
            ];
            let page =
                self.client
                    .get_with_retry(ctx, &self.base_url, &query, Self::parse_page)?;
            tracing::info!(
                provider = "trends",
                symbol,
                from = %slice_start,
                to = %slice_end,
                points = page.len(),
                "fetched interest page"
            );
            records.extend(page);
        }

        Ok(finish_records(records, start, end))
    }
}
