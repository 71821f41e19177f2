//! Pagination, retry and pacing behaviour of the HTTP collectors, driven by a
//! scripted transport and a recording sleeper (no network, no real waiting).

use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::{Arc, Mutex};
use std::time::{Duration as StdDuration, Instant};
use traderbot_core::config::SourceSpec;
use traderbot_core::data::gdax::GdaxCandles;
use traderbot_core::data::kraken::KrakenTrades;
use traderbot_core::data::trends::SearchTrends;
use traderbot_core::data::transport::RecordedRequest;
use traderbot_core::data::{
    collect_all, CollectOptions, Collector, CollectorSet, FetchError, HttpResponse, NoProgress,
    ProviderClient, RecordingSleeper, RetryPolicy, ScriptedTransport, ThreadSleeper,
    TransportError,
};
use traderbot_core::domain::{Field, SourceKind};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2018, 1, 1, 0, 0, 0).unwrap()
}

fn client(
    transport: Arc<ScriptedTransport>,
    sleeper: Arc<RecordingSleeper>,
    min_delay_ms: u64,
) -> ProviderClient {
    ProviderClient::new(
        transport,
        sleeper,
        RetryPolicy::default(),
        StdDuration::from_millis(min_delay_ms),
    )
}

fn param_time(req: &RecordedRequest, key: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(req.param(key).unwrap())
        .unwrap()
        .with_timezone(&Utc)
}

// ── Window pagination ────────────────────────────────────────────────

/// Each window answers with a candle at its start, one an hour later, and
/// one on its end boundary (the next window's first sample).
fn overlapping_candles(req: &RecordedRequest) -> Result<HttpResponse, TransportError> {
    let start = param_time(req, "start").timestamp();
    let end = param_time(req, "end").timestamp();
    let body = format!(
        "[[{end}, 1, 1, 1, 111.0, 1], [{}, 1, 1, 1, 2.0, 1], [{start}, 1, 1, 1, 1.0, 1]]",
        start + 3600
    );
    Ok(HttpResponse::ok(body))
}

#[test]
fn gdax_splits_range_into_three_windows() {
    let transport = Arc::new(ScriptedTransport::from_fn(overlapping_candles));
    let sleeper = Arc::new(RecordingSleeper::new());
    let gdax = GdaxCandles::new(client(transport.clone(), sleeper.clone(), 500), "http://gdax", 3600, 200);

    let end = t0() + gdax.page_span() * 3;
    let records = gdax.fetch_range("BTC-USD", t0(), end).unwrap();

    let requests = transport.requests();
    assert_eq!(requests.len(), 3);
    assert!(requests.iter().all(|r| r.url == "http://gdax/products/BTC-USD/candles"));
    let starts: Vec<_> = requests.iter().map(|r| param_time(r, "start")).collect();
    assert!(starts.windows(2).all(|w| w[0] < w[1]));
    for pair in requests.windows(2) {
        assert_eq!(param_time(&pair[0], "end"), param_time(&pair[1], "start"));
    }

    // 3 windows x 2 interior samples; the shared boundaries collapse and the
    // sample at `end` is outside the half-open range.
    assert_eq!(records.len(), 6);
    assert!(records.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    assert!(records.iter().all(|r| r.timestamp < end));

    // First fetched wins: the boundary sample comes from the earlier page.
    let boundary = records
        .iter()
        .find(|r| r.timestamp == t0() + gdax.page_span())
        .unwrap();
    assert_eq!(boundary.value, 111.0);

    // Pacing: every request after the first waits the minimum delay.
    assert_eq!(
        sleeper.sleeps(),
        vec![StdDuration::from_millis(500), StdDuration::from_millis(500)]
    );
}

#[test]
fn gdax_partial_last_window() {
    let transport = Arc::new(ScriptedTransport::from_fn(|_| Ok(HttpResponse::ok("[]"))));
    let sleeper = Arc::new(RecordingSleeper::new());
    let gdax = GdaxCandles::new(client(transport.clone(), sleeper, 0), "http://gdax", 3600, 200);

    let end = t0() + gdax.page_span() * 2 + Duration::hours(5);
    let records = gdax.fetch_range("BTC-USD", t0(), end).unwrap();
    assert!(records.is_empty());
    assert_eq!(transport.request_count(), 3);
    assert_eq!(param_time(&transport.requests()[2], "end"), end);
}

#[test]
fn trends_uses_180_day_windows_and_region() {
    let transport = Arc::new(ScriptedTransport::from_fn(|req| {
        let start = param_time(req, "start").timestamp();
        Ok(HttpResponse::ok(format!(
            r#"{{"timeline":[{{"time":{start},"value":42.0}}]}}"#
        )))
    }));
    let sleeper = Arc::new(RecordingSleeper::new());
    let trends = SearchTrends::new(
        client(transport.clone(), sleeper.clone(), 1000),
        "http://trends",
        180,
        86_400,
    );

    let records = trends
        .fetch_range("bitcoin@US", t0(), t0() + Duration::days(400))
        .unwrap();
    let requests = transport.requests();
    assert_eq!(requests.len(), 3);
    assert_eq!(requests[0].param("q"), Some("bitcoin"));
    assert_eq!(requests[0].param("geo"), Some("US"));
    assert_eq!(param_time(&requests[1], "start"), t0() + Duration::days(180));
    assert_eq!(records.len(), 3);
    assert_eq!(sleeper.total(), StdDuration::from_secs(2));
}

// ── Cursor pagination ────────────────────────────────────────────────

/// Always returns one trade ten minutes after `since` and reports `last`
/// equal to `since`, i.e. the provider cursor never moves on its own.
fn stalled_trades(req: &RecordedRequest) -> Result<HttpResponse, TransportError> {
    let since: i64 = req.param("since").unwrap().parse().unwrap();
    let trade_secs = since / 1_000_000_000 + 600;
    Ok(HttpResponse::ok(format!(
        r#"{{"error":[],"result":{{"XXBTZUSD":[["100.0","1.0",{trade_secs},"b","l",""]],"last":"{since}"}}}}"#
    )))
}

#[test]
fn kraken_stalled_cursor_still_terminates() {
    let transport = Arc::new(ScriptedTransport::from_fn(stalled_trades));
    let sleeper = Arc::new(RecordingSleeper::new());
    let kraken = KrakenTrades::new(client(transport.clone(), sleeper, 1000), "http://kraken");

    let records = kraken
        .fetch_range("XBTUSD", t0(), t0() + Duration::hours(1))
        .unwrap();

    let cursors: Vec<i64> = transport
        .requests()
        .iter()
        .map(|r| r.param("since").unwrap().parse().unwrap())
        .collect();
    assert_eq!(cursors.len(), 6);
    assert!(cursors.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(records.len(), 5);
    assert_eq!(records[0].timestamp, t0() + Duration::minutes(10));
}

#[test]
fn kraken_stops_on_empty_page() {
    let transport = Arc::new(ScriptedTransport::new(vec![
        Ok(HttpResponse::ok(
            r#"{"error":[],"result":{"XXBTZUSD":[["100.0","1.0",1514764860,"b","l",""]],"last":"1514764860000000000"}}"#,
        )),
        Ok(HttpResponse::ok(r#"{"error":[],"result":{"XXBTZUSD":[],"last":"1514764860000000000"}}"#)),
    ]));
    let sleeper = Arc::new(RecordingSleeper::new());
    let kraken = KrakenTrades::new(client(transport.clone(), sleeper, 0), "http://kraken");

    let records = kraken
        .fetch_range("XBTUSD", t0(), t0() + Duration::days(1))
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(transport.request_count(), 2);
}

// ── Pacing ───────────────────────────────────────────────────────────

#[test]
fn parallel_series_share_one_provider_pace() {
    let sent: Arc<Mutex<Vec<Instant>>> = Arc::new(Mutex::new(Vec::new()));
    let log = sent.clone();
    let transport = Arc::new(ScriptedTransport::from_fn(move |req| {
        log.lock().unwrap().push(Instant::now());
        stalled_trades(req)
    }));
    let client = ProviderClient::new(
        transport.clone(),
        Arc::new(ThreadSleeper),
        RetryPolicy::default(),
        StdDuration::from_millis(100),
    );
    let mut set = CollectorSet::new();
    set.insert(
        SourceKind::Kraken,
        Arc::new(KrakenTrades::new(client, "http://kraken")),
    );
    let specs: Vec<SourceSpec> = ["XBTUSD", "ETHUSD"]
        .iter()
        .map(|symbol| SourceSpec {
            source: SourceKind::Kraken,
            symbol: symbol.to_string(),
            fields: vec![Field::Close],
        })
        .collect();

    let results = collect_all(
        &set,
        None,
        &specs,
        t0(),
        t0() + Duration::minutes(30),
        CollectOptions::default(),
        &NoProgress,
    );
    assert!(results.iter().all(|r| r.is_ok()));

    // Three pages per series, all six requests spaced by the provider delay
    // regardless of which series sent them.
    let mut times = sent.lock().unwrap().clone();
    times.sort();
    assert_eq!(times.len(), 6);
    let min_gap = times
        .windows(2)
        .map(|w| w[1].duration_since(w[0]))
        .min()
        .unwrap();
    assert!(min_gap >= StdDuration::from_millis(95), "min gap {min_gap:?}");
}

// ── Retry ────────────────────────────────────────────────────────────

#[test]
fn retries_exhausted_names_provider_symbol_and_range() {
    let transport = Arc::new(ScriptedTransport::new(vec![
        Ok(HttpResponse::status(502, "bad gateway")),
        Err(TransportError::Timeout("30s".into())),
        Ok(HttpResponse::status(429, "slow down")),
    ]));
    let sleeper = Arc::new(RecordingSleeper::new());
    let gdax = GdaxCandles::new(client(transport.clone(), sleeper.clone(), 0), "http://gdax", 3600, 200);

    let err = gdax
        .fetch_range("BTC-USD", t0(), t0() + Duration::hours(10))
        .unwrap_err();
    match &err {
        FetchError::RetriesExhausted {
            symbol,
            start,
            end,
            attempts,
            last,
            ..
        } => {
            assert_eq!(symbol, "BTC-USD");
            assert_eq!(*start, t0());
            assert_eq!(*end, t0() + Duration::hours(10));
            assert_eq!(*attempts, 3);
            assert!(last.contains("429"));
        }
        other => panic!("expected RetriesExhausted, got {other:?}"),
    }
    assert!(err.to_string().contains("gdax"));
    assert_eq!(transport.request_count(), 3);

    // Backoff 500ms then 750ms (factor 1.5); nothing before the first try.
    let sleeps: Vec<StdDuration> = sleeper
        .sleeps()
        .into_iter()
        .filter(|d| !d.is_zero())
        .collect();
    assert_eq!(
        sleeps,
        vec![StdDuration::from_millis(500), StdDuration::from_millis(750)]
    );
}

#[test]
fn transient_failure_recovers() {
    let transport = Arc::new(ScriptedTransport::new(vec![
        Ok(HttpResponse::status(503, "")),
        Ok(HttpResponse::ok("not json")),
        Ok(HttpResponse::ok("[[1514764800, 1, 1, 1, 5.0, 2]]")),
    ]));
    let sleeper = Arc::new(RecordingSleeper::new());
    let gdax = GdaxCandles::new(client(transport.clone(), sleeper, 0), "http://gdax", 3600, 200);

    let records = gdax
        .fetch_range("BTC-USD", t0(), t0() + Duration::hours(1))
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].value, 5.0);
    assert_eq!(transport.request_count(), 3);
}

#[test]
fn empty_success_is_not_retried() {
    let transport = Arc::new(ScriptedTransport::new(vec![Ok(HttpResponse::ok("[]"))]));
    let sleeper = Arc::new(RecordingSleeper::new());
    let gdax = GdaxCandles::new(client(transport.clone(), sleeper.clone(), 0), "http://gdax", 3600, 200);

    let records = gdax
        .fetch_range("BTC-USD", t0(), t0() + Duration::hours(1))
        .unwrap();
    assert!(records.is_empty());
    assert_eq!(transport.request_count(), 1);
    assert_eq!(sleeper.total(), StdDuration::ZERO);
}
