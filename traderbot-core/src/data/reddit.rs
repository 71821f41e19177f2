//! Comment sentiment from a subreddit.
//!
//! Comments are pulled from a search endpoint in pages of at most
//! `max_points`, oldest first, with an inclusive `after` cursor in Unix
//! seconds. Paging stops at the first empty page or once the cursor passes
//! the end of the range. Each kept comment is scored and becomes a record with weight 1,
//! so the resampled volume of an interval is its comment count.
//!
//! A symbol is `subreddit` or `subreddit#ENTITY`; with an entity only
//! comments mentioning that coin are kept.

use super::paginate::advance_cursor;
use super::provider::{check_range, finish_records, Collector, FetchError};
use super::retry::{ProviderClient, RequestContext};
use super::sentiment::{Entity, SentimentScorer};
use crate::domain::{RawRecord, SourceKind};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;

/// Comments this short carry no usable sentiment.
pub const MIN_COMMENT_LEN: usize = 10;

#[derive(Debug, Deserialize)]
struct CommentPage {
    #[serde(default)]
    data: Vec<Comment>,
}

#[derive(Debug, Deserialize)]
struct Comment {
    created_utc: i64,
    #[serde(default)]
    body: String,
}

pub struct RedditSentiment {
    client: ProviderClient,
    base_url: String,
    max_points: u32,
    scorer: Arc<dyn SentimentScorer>,
}

impl RedditSentiment {
    pub fn new(
        client: ProviderClient,
        base_url: impl Into<String>,
        max_points: u32,
        scorer: Arc<dyn SentimentScorer>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            max_points: max_points.max(1),
            scorer,
        }
    }

    fn parse_page(body: &str) -> Result<Vec<Comment>, String> {
        let page: CommentPage = serde_json::from_str(body).map_err(|e| e.to_string())?;
        Ok(page.data)
    }

    fn split_symbol(&self, symbol: &str) -> Result<(String, Option<Entity>), FetchError> {
        let (sub, entity) = match symbol.split_once('#') {
            Some((sub, ent)) => (
                sub,
                Some(
                    ent.parse::<Entity>()
                        .map_err(|e| FetchError::invalid(self.source(), symbol, e))?,
                ),
            ),
            None => (symbol, None),
        };
        let sub = sub.trim();
        if sub.is_empty() {
            return Err(FetchError::invalid(self.source(), symbol, "empty subreddit"));
        }
        Ok((sub.to_string(), entity))
    }
}

impl Collector for RedditSentiment {
    fn source(&self) -> SourceKind {
        SourceKind::Reddit
    }

    fn fetch_range(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<RawRecord>, FetchError> {
        check_range(self.source(), symbol, start, end)?;
        let (subreddit, entity) = self.split_symbol(symbol)?;

        let end_secs = end.timestamp();
        let mut cursor = start.timestamp();
        let mut records = Vec::new();
        let mut discarded = 0usize;

        while cursor < end_secs {
            let slice_start = DateTime::from_timestamp(cursor, 0).unwrap_or(start);
            let ctx = RequestContext {
                provider: self.source(),
                symbol,
                start: slice_start,
                end,
            };
            let query = vec![
                ("subreddit".to_string(), subreddit.clone()),
                ("after".to_string(), cursor.to_string()),
                ("before".to_string(), end_secs.to_string()),
                ("size".to_string(), self.max_points.to_string()),
                ("sort".to_string(), "asc".to_string()),
            ];
            let comments =
                self.client
                    .get_with_retry(ctx, &self.base_url, &query, Self::parse_page)?;

            tracing::info!(
                provider = "reddit",
                symbol,
                from = %slice_start,
                comments = comments.len(),
                "fetched comment page"
            );

            // Providers may cap pages below `max_points`; only an empty page
            // means the range is exhausted.
            let Some(newest) = comments.iter().map(|c| c.created_utc).max() else {
                break;
            };

            for comment in comments {
                let text = comment.body.trim();
                if text.chars().count() <= MIN_COMMENT_LEN {
                    discarded += 1;
                    continue;
                }
                if entity.is_some_and(|e| !e.mentioned_in(text)) {
                    discarded += 1;
                    continue;
                }
                let Some(ts) = DateTime::from_timestamp(comment.created_utc, 0) else {
                    discarded += 1;
                    continue;
                };
                let score = self.scorer.score(text).clamp(-1.0, 1.0);
                records.push(RawRecord::new(ts, score, 1.0, SourceKind::Reddit));
            }

            cursor = advance_cursor(cursor, newest.saturating_add(1));
        }

        if discarded > 0 {
            tracing::debug!(symbol, discarded, "dropped short or off-topic comments");
        }
        Ok(finish_records(records, start, end))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::retry::{RecordingSleeper, RetryPolicy};
    use crate::data::sentiment::LexiconScorer;
    use crate::data::transport::{HttpResponse, ScriptedTransport};
    use chrono::TimeZone;
    use std::time::Duration;

    fn collector(t: Arc<ScriptedTransport>, max_points: u32) -> RedditSentiment {
        let client = ProviderClient::new(
            t,
            Arc::new(RecordingSleeper::new()),
            RetryPolicy::default(),
            Duration::from_secs(1),
        );
        RedditSentiment::new(
            client,
            "https://example.test/comments",
            max_points,
            Arc::new(LexiconScorer::default()),
        )
    }

    #[test]
    fn filters_short_and_off_topic_comments() {
        let t = Arc::new(ScriptedTransport::new(vec![
            Ok(HttpResponse::ok(
                r#"{"data":[
                    {"created_utc":1515000000,"body":"eth to the moon, bullish"},
                    {"created_utc":1515000060,"body":"lol"},
                    {"created_utc":1515000120,"body":"bitcoin is going to crash hard"}
                ]}"#,
            )),
            Ok(HttpResponse::ok(r#"{"data":[]}"#)),
        ]));
        let c = collector(t.clone(), 100);

        let recs = c
            .fetch_range(
                "CryptoCurrency#ETH",
                Utc.timestamp_opt(1_514_999_000, 0).unwrap(),
                Utc.timestamp_opt(1_515_100_000, 0).unwrap(),
            )
            .unwrap();

        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].value, 1.0);
        assert_eq!(recs[0].size, 1.0);
        let reqs = t.requests();
        assert_eq!(reqs.len(), 2);
        assert_eq!(reqs[0].param("subreddit"), Some("CryptoCurrency"));
        assert_eq!(reqs[1].param("after"), Some("1515000121"));
    }

    #[test]
    fn full_pages_advance_past_newest_comment() {
        let t = Arc::new(ScriptedTransport::new(vec![
            Ok(HttpResponse::ok(
                r#"{"data":[
                    {"created_utc":100,"body":"first comment about nothing"},
                    {"created_utc":200,"body":"second comment about nothing"}
                ]}"#,
            )),
            Ok(HttpResponse::ok(r#"{"data":[]}"#)),
        ]));
        let c = collector(t.clone(), 2);

        let recs = c
            .fetch_range(
                "CryptoCurrency",
                Utc.timestamp_opt(0, 0).unwrap(),
                Utc.timestamp_opt(1000, 0).unwrap(),
            )
            .unwrap();

        assert_eq!(recs.len(), 2);
        let reqs = t.requests();
        assert_eq!(reqs.len(), 2);
        assert_eq!(reqs[0].param("after"), Some("0"));
        assert_eq!(reqs[1].param("after"), Some("201"));
    }

    #[test]
    fn bad_entity_rejected() {
        let t = Arc::new(ScriptedTransport::new(vec![]));
        let c = collector(t, 10);
        let err = c
            .fetch_range(
                "CryptoCurrency#DOGE",
                Utc.timestamp_opt(0, 0).unwrap(),
                Utc.timestamp_opt(10, 0).unwrap(),
            )
            .unwrap_err();
        assert!(matches!(err, FetchError::InvalidRequest { .. }));
    }

    /// Serves `total` comments one minute apart, at most `cap` per page,
    /// honouring the inclusive `after` cursor.
    fn capped_server(total: i64, cap: usize) -> ScriptedTransport {
        ScriptedTransport::from_fn(move |req| {
            let after: i64 = req.param("after").and_then(|v| v.parse().ok()).unwrap_or(0);
            let rows: Vec<String> = (0..total)
                .map(|i| 60 + i * 60)
                .filter(|&ts| ts >= after)
                .take(cap)
                .map(|ts| format!(r#"{{"created_utc":{ts},"body":"comment number {ts}"}}"#))
                .collect();
            Ok(HttpResponse::ok(format!(r#"{{"data":[{}]}}"#, rows.join(","))))
        })
    }

    #[test]
    fn short_pages_keep_paging_until_empty() {
        let t = Arc::new(capped_server(250, 100));
        let c = collector(t.clone(), 500);

        let recs = c
            .fetch_range(
                "CryptoCurrency",
                Utc.timestamp_opt(0, 0).unwrap(),
                Utc.timestamp_opt(100_000, 0).unwrap(),
            )
            .unwrap();

        assert_eq!(recs.len(), 250);
        // 100 + 100 + 50, then the empty page.
        assert_eq!(t.request_count(), 4);
    }

    #[test]
    fn paging_stops_at_range_end() {
        let t = Arc::new(capped_server(250, 100));
        let c = collector(t.clone(), 500);

        // The 100th comment sits on the end boundary, so the first page
        // carries the cursor past the end without an empty page.
        let recs = c
            .fetch_range(
                "CryptoCurrency",
                Utc.timestamp_opt(0, 0).unwrap(),
                Utc.timestamp_opt(6_000, 0).unwrap(),
            )
            .unwrap();

        assert_eq!(recs.len(), 99);
        assert_eq!(t.request_count(), 1);
    }
}
