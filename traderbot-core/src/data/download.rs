//! Collection orchestrator: picks a collector per source, consults the raw
//! cache first, fetches on a miss and writes the result back.
//!
//! Independent (source, symbol) series are collected on the rayon pool. Each
//! collector paces its own requests, so nothing is shared between threads
//! except the read-only collector set and the cache directory.

use super::blockchain::BlockchainStats;
use super::cache::{CacheError, CacheLookup, RawCache};
use super::gdax::GdaxCandles;
use super::kraken::KrakenTrades;
use super::provider::{Collector, FetchError};
use super::reddit::RedditSentiment;
use super::retry::{ProviderClient, RetryPolicy, Sleeper, ThreadSleeper};
use super::sentiment::LexiconScorer;
use super::synthetic::SyntheticWalk;
use super::transport::{HttpTransport, ReqwestTransport, TransportError};
use super::trends::SearchTrends;
use crate::config::{PipelineConfig, SourceSpec};
use crate::domain::{RawRecord, SourceKind};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CollectError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("no collector registered for source {0}")]
    NoCollector(SourceKind),

    #[error("offline: no usable cache entry for {source_kind} {symbol} over {start} .. {end}")]
    OfflineMiss {
        source_kind: SourceKind,
        symbol: String,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}

/// Collector per configured source kind.
#[derive(Clone, Default)]
pub struct CollectorSet {
    collectors: HashMap<SourceKind, Arc<dyn Collector>>,
}

impl CollectorSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, kind: SourceKind, collector: Arc<dyn Collector>) {
        self.collectors.insert(kind, collector);
    }

    pub fn get(&self, kind: SourceKind) -> Option<&dyn Collector> {
        self.collectors.get(&kind).map(|c| c.as_ref())
    }

    /// Live collectors; each HTTP provider gets its own client.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, TransportError> {
        let http = &config.providers.http;
        let mut transports: HashMap<SourceKind, Arc<dyn HttpTransport>> = HashMap::new();
        for kind in [SourceKind::Kraken, SourceKind::Gdax, SourceKind::Trends, SourceKind::Reddit] {
            if config.uses(kind) {
                let transport = ReqwestTransport::new(http.timeout(), &http.user_agent)?;
                transports.insert(kind, Arc::new(transport));
            }
        }
        Ok(Self::build(config, |kind| transports.get(&kind).cloned(), Arc::new(ThreadSleeper)))
    }

    /// Collectors sharing one transport and sleeper, for offline testing
    /// against scripted responses.
    pub fn with_transport(
        config: &PipelineConfig,
        transport: Arc<dyn HttpTransport>,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        Self::build(config, |_| Some(transport.clone()), sleeper)
    }

    fn build(
        config: &PipelineConfig,
        transport_for: impl Fn(SourceKind) -> Option<Arc<dyn HttpTransport>>,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        let p = &config.providers;
        let client = |transport: Arc<dyn HttpTransport>, retry: &RetryPolicy, delay_ms: u64| {
            ProviderClient::new(
                transport,
                sleeper.clone(),
                retry.clone(),
                Duration::from_millis(delay_ms),
            )
        };

        let mut set = CollectorSet::new();
        if let Some(t) = transport_for(SourceKind::Kraken) {
            let c = client(t, &p.kraken.retry, p.kraken.min_delay_ms);
            set.insert(SourceKind::Kraken, Arc::new(KrakenTrades::new(c, &p.kraken.base_url)));
        }
        if let Some(t) = transport_for(SourceKind::Gdax) {
            let c = client(t, &p.gdax.retry, p.gdax.min_delay_ms);
            set.insert(
                SourceKind::Gdax,
                Arc::new(GdaxCandles::new(
                    c,
                    &p.gdax.base_url,
                    p.gdax.granularity_secs,
                    p.gdax.max_points,
                )),
            );
        }
        if let Some(t) = transport_for(SourceKind::Trends) {
            let c = client(t, &p.trends.retry, p.trends.min_delay_ms);
            set.insert(
                SourceKind::Trends,
                Arc::new(SearchTrends::new(
                    c,
                    &p.trends.base_url,
                    p.trends.window_days,
                    p.trends.granularity_secs,
                )),
            );
        }
        if let Some(t) = transport_for(SourceKind::Reddit) {
            let c = client(t, &p.reddit.retry, p.reddit.min_delay_ms);
            set.insert(
                SourceKind::Reddit,
                Arc::new(RedditSentiment::new(
                    c,
                    &p.reddit.base_url,
                    p.reddit.max_points,
                    Arc::new(LexiconScorer::default()),
                )),
            );
        }
        if config.uses(SourceKind::Blockchain) {
            set.insert(
                SourceKind::Blockchain,
                Arc::new(BlockchainStats::new(&p.blockchain.csv_path)),
            );
        }
        if config.uses(SourceKind::Synthetic) {
            set.insert(SourceKind::Synthetic, synthetic_walk(config));
        }
        set
    }

    /// A seeded random walk standing in for every configured source.
    pub fn synthetic(config: &PipelineConfig) -> Self {
        let walk = synthetic_walk(config);
        let mut set = CollectorSet::new();
        for spec in &config.sources {
            set.insert(spec.source, walk.clone());
        }
        set
    }
}

fn synthetic_walk(config: &PipelineConfig) -> Arc<dyn Collector> {
    Arc::new(SyntheticWalk::new(chrono::Duration::seconds(
        config.providers.synthetic.spacing_secs,
    )))
}

/// Where a series' records came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    Cache,
    Fetched,
    /// Fetched because the cache entry was corrupt.
    Refetched,
    Synthetic,
}

#[derive(Debug, Clone)]
pub struct CollectedSeries {
    pub source: SourceKind,
    pub symbol: String,
    pub records: Vec<RawRecord>,
    pub origin: Origin,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CollectOptions {
    /// Ignore cached entries and re-fetch.
    pub force: bool,
    /// Never call a collector; every series must come from the cache.
    pub offline: bool,
}

/// Progress callbacks for a batch. Called from worker threads.
pub trait CollectProgress: Send + Sync {
    fn on_start(&self, source: SourceKind, symbol: &str, index: usize, total: usize);

    fn on_complete(
        &self,
        source: SourceKind,
        symbol: &str,
        index: usize,
        total: usize,
        result: &Result<CollectedSeries, CollectError>,
    );

    fn on_batch_complete(&self, succeeded: usize, failed: usize, total: usize);
}

/// Reports progress through `tracing`.
pub struct LogProgress;

impl CollectProgress for LogProgress {
    fn on_start(&self, source: SourceKind, symbol: &str, index: usize, total: usize) {
        tracing::info!("[{}/{total}] collecting {source} {symbol}", index + 1);
    }

    fn on_complete(
        &self,
        source: SourceKind,
        symbol: &str,
        _index: usize,
        _total: usize,
        result: &Result<CollectedSeries, CollectError>,
    ) {
        match result {
            Ok(series) => tracing::info!(
                records = series.records.len(),
                origin = ?series.origin,
                "done {source} {symbol}"
            ),
            Err(e) => tracing::error!("failed {source} {symbol}: {e}"),
        }
    }

    fn on_batch_complete(&self, succeeded: usize, failed: usize, total: usize) {
        tracing::info!(succeeded, failed, total, "collection finished");
    }
}

/// Discards progress.
pub struct NoProgress;

impl CollectProgress for NoProgress {
    fn on_start(&self, _: SourceKind, _: &str, _: usize, _: usize) {}
    fn on_complete(
        &self,
        _: SourceKind,
        _: &str,
        _: usize,
        _: usize,
        _: &Result<CollectedSeries, CollectError>,
    ) {
    }
    fn on_batch_complete(&self, _: usize, _: usize, _: usize) {}
}

/// Collect one series: cache first (unless forced), then the collector.
///
/// A missing or corrupt cache entry falls back to fetching; a failed cache
/// write is logged and otherwise ignored.
pub fn collect_series(
    collectors: &CollectorSet,
    cache: Option<&RawCache>,
    spec: &SourceSpec,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    opts: CollectOptions,
) -> Result<CollectedSeries, CollectError> {
    let collector = collectors.get(spec.source);
    let done = |records: Vec<RawRecord>, origin: Origin| CollectedSeries {
        source: spec.source,
        symbol: spec.symbol.clone(),
        records,
        origin,
    };

    if let Some(c) = collector.filter(|c| c.source() == SourceKind::Synthetic) {
        let records = c.fetch_range(&spec.symbol, start, end)?;
        return Ok(done(records, Origin::Synthetic));
    }

    let mut origin = Origin::Fetched;
    if let (Some(cache), false) = (cache, opts.force) {
        match cache.lookup(spec.source, &spec.symbol, start, end) {
            CacheLookup::Hit(records) => {
                tracing::debug!(source = %spec.source, symbol = %spec.symbol, "cache hit");
                return Ok(done(records, Origin::Cache));
            }
            CacheLookup::Miss => {}
            CacheLookup::Corrupt(reason) => {
                tracing::warn!(
                    source = %spec.source,
                    symbol = %spec.symbol,
                    "corrupt cache entry, re-fetching: {reason}"
                );
                origin = Origin::Refetched;
            }
        }
    }

    if opts.offline {
        return Err(CollectError::OfflineMiss {
            source_kind: spec.source,
            symbol: spec.symbol.clone(),
            start,
            end,
        });
    }

    let collector = collector.ok_or(CollectError::NoCollector(spec.source))?;
    let records = collector.fetch_range(&spec.symbol, start, end)?;
    if let Some(cache) = cache {
        match cache.write(spec.source, &spec.symbol, start, end, &records) {
            Ok(_) | Err(CacheError::Empty { .. }) => {}
            Err(e) => tracing::warn!(
                source = %spec.source,
                symbol = %spec.symbol,
                "cache write failed: {e}"
            ),
        }
    }
    Ok(done(records, origin))
}

/// Collect every series in parallel. Results come back in `specs` order.
pub fn collect_all(
    collectors: &CollectorSet,
    cache: Option<&RawCache>,
    specs: &[SourceSpec],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    opts: CollectOptions,
    progress: &dyn CollectProgress,
) -> Vec<Result<CollectedSeries, CollectError>> {
    let total = specs.len();
    let results: Vec<_> = specs
        .par_iter()
        .enumerate()
        .map(|(i, spec)| {
            progress.on_start(spec.source, &spec.symbol, i, total);
            let result = collect_series(collectors, cache, spec, start, end, opts);
            progress.on_complete(spec.source, &spec.symbol, i, total, &result);
            result
        })
        .collect();

    let failed = results.iter().filter(|r| r.is_err()).count();
    progress.on_batch_complete(total - failed, failed, total);
    results
}

/// Summary of a batch download.
#[derive(Debug)]
pub struct DownloadSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub from_cache: usize,
    pub records: usize,
    pub errors: Vec<(String, CollectError)>,
}

impl DownloadSummary {
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }
}

/// Fill the cache for every configured series.
pub fn download_all(
    config: &PipelineConfig,
    collectors: &CollectorSet,
    cache: &RawCache,
    force: bool,
    progress: &dyn CollectProgress,
) -> DownloadSummary {
    let opts = CollectOptions {
        force,
        offline: false,
    };
    let results = collect_all(
        collectors,
        Some(cache),
        &config.sources,
        config.start,
        config.end,
        opts,
        progress,
    );

    let mut summary = DownloadSummary {
        total: results.len(),
        succeeded: 0,
        failed: 0,
        from_cache: 0,
        records: 0,
        errors: Vec::new(),
    };
    for (spec, result) in config.sources.iter().zip(results) {
        match result {
            Ok(series) => {
                summary.succeeded += 1;
                summary.records += series.records.len();
                if series.origin == Origin::Cache {
                    summary.from_cache += 1;
                }
            }
            Err(e) => {
                summary.failed += 1;
                summary.errors.push((format!("{} {}", spec.source, spec.symbol), e));
            }
        }
    }
    summary
}
