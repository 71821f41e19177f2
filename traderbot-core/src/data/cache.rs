//! Parquet cache of raw downloads, partitioned by source and symbol.
//!
//! Layout: `{cache_dir}/source={SOURCE}/symbol={SYMBOL}/records.parquet`
//!
//! - Atomic writes (write to .tmp, rename into place)
//! - Metadata sidecar per entry (covered range, record count, hash, provenance)
//! - Integrity validation on load (schema check, hash check)
//! - Quarantine for corrupt files (`records.parquet.quarantined`)
//!
//! A miss or a corrupt entry is never fatal: the caller re-fetches and
//! overwrites the entry.

use crate::domain::{RawRecord, SourceKind};
use chrono::{DateTime, Utc};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

const RECORDS_FILE: &str = "records.parquet";
const META_FILE: &str = "meta.json";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O error at {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("parquet error: {0}")]
    Parquet(String),

    #[error("cache validation failed: {0}")]
    Validation(String),

    #[error("nothing to cache for {source_kind} {symbol}")]
    Empty {
        source_kind: SourceKind,
        symbol: String,
    },
}

fn io_err(path: &Path, e: impl std::fmt::Display) -> CacheError {
    CacheError::Io {
        path: path.display().to_string(),
        reason: e.to_string(),
    }
}

/// Metadata sidecar for a cached (source, symbol) entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheMeta {
    pub source: SourceKind,
    pub symbol: String,
    /// Requested range the records cover, half-open.
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub record_count: usize,
    pub data_hash: String,
    /// Source tag carried by the records (differs from `source` for
    /// synthetic stand-ins).
    pub provenance: SourceKind,
    pub cached_at: DateTime<Utc>,
}

impl CacheMeta {
    pub fn covers(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.start <= start && self.end >= end
    }
}

/// Outcome of a cache lookup.
#[derive(Debug)]
pub enum CacheLookup {
    /// Records for the requested range, sorted by timestamp.
    Hit(Vec<RawRecord>),
    /// No entry, or the entry does not cover the requested range.
    Miss,
    /// An entry exists but could not be read; it has been quarantined.
    Corrupt(String),
}

pub struct RawCache {
    cache_dir: PathBuf,
}

impl RawCache {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// `{cache_dir}/source={SOURCE}/symbol={SYMBOL}/`
    fn entry_dir(&self, source: SourceKind, symbol: &str) -> PathBuf {
        self.cache_dir
            .join(format!("source={source}"))
            .join(format!("symbol={}", path_safe(symbol)))
    }

    fn records_path(&self, source: SourceKind, symbol: &str) -> PathBuf {
        self.entry_dir(source, symbol).join(RECORDS_FILE)
    }

    fn meta_path(&self, source: SourceKind, symbol: &str) -> PathBuf {
        self.entry_dir(source, symbol).join(META_FILE)
    }

    /// Store the records fetched for `[start, end)`, replacing any previous
    /// entry.
    pub fn write(
        &self,
        source: SourceKind,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        records: &[RawRecord],
    ) -> Result<CacheMeta, CacheError> {
        let Some(first) = records.first() else {
            return Err(CacheError::Empty {
                source_kind: source,
                symbol: symbol.to_string(),
            });
        };

        let dir = self.entry_dir(source, symbol);
        fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;

        let df = records_to_dataframe(records)?;
        let path = self.records_path(source, symbol);
        let tmp_path = path.with_extension("parquet.tmp");
        write_parquet(&df, &tmp_path)?;
        fs::rename(&tmp_path, &path).map_err(|e| {
            if let Err(cleanup) = fs::remove_file(&tmp_path) {
                tracing::debug!(path = %tmp_path.display(), "leaving temp file: {cleanup}");
            }
            io_err(&path, format!("atomic rename failed: {e}"))
        })?;

        let meta = CacheMeta {
            source,
            symbol: symbol.to_string(),
            start,
            end,
            record_count: records.len(),
            data_hash: hash_records(records),
            provenance: first.source,
            cached_at: Utc::now(),
        };
        let meta_json = serde_json::to_string_pretty(&meta)
            .map_err(|e| CacheError::Validation(format!("meta serialization: {e}")))?;
        let meta_path = self.meta_path(source, symbol);
        fs::write(&meta_path, meta_json).map_err(|e| io_err(&meta_path, e))?;

        Ok(meta)
    }

    pub fn get_meta(&self, source: SourceKind, symbol: &str) -> Option<CacheMeta> {
        let content = fs::read_to_string(self.meta_path(source, symbol)).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// Records for `[start, end)` if a valid entry covers that range.
    pub fn lookup(
        &self,
        source: SourceKind,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> CacheLookup {
        let path = self.records_path(source, symbol);
        let meta_path = self.meta_path(source, symbol);
        if !path.exists() {
            return CacheLookup::Miss;
        }

        let meta = match fs::read_to_string(&meta_path)
            .map_err(|e| e.to_string())
            .and_then(|c| serde_json::from_str::<CacheMeta>(&c).map_err(|e| e.to_string()))
        {
            Ok(meta) => meta,
            Err(reason) => return self.quarantine(&path, format!("unreadable meta.json: {reason}")),
        };
        if !meta.covers(start, end) {
            return CacheLookup::Miss;
        }

        match load_and_validate(&path, &meta) {
            Ok(mut records) => {
                records.retain(|r| r.timestamp >= start && r.timestamp < end);
                CacheLookup::Hit(records)
            }
            Err(e) => self.quarantine(&path, e.to_string()),
        }
    }

    fn quarantine(&self, path: &Path, reason: String) -> CacheLookup {
        let target = path.with_extension("parquet.quarantined");
        tracing::warn!(
            path = %path.display(),
            "quarantining corrupt cache file: {reason}"
        );
        if let Err(e) = fs::rename(path, &target) {
            tracing::warn!(path = %path.display(), "could not quarantine: {e}");
        }
        CacheLookup::Corrupt(reason)
    }

    /// Metadata of every readable entry, sorted by source then symbol.
    pub fn status(&self) -> Result<Vec<CacheMeta>, CacheError> {
        if !self.cache_dir.exists() {
            return Ok(Vec::new());
        }
        let mut metas = Vec::new();
        for source_dir in read_partitions(&self.cache_dir, "source=")? {
            for symbol_dir in read_partitions(&source_dir, "symbol=")? {
                let content = match fs::read_to_string(symbol_dir.join(META_FILE)) {
                    Ok(c) => c,
                    Err(_) => continue,
                };
                if let Ok(meta) = serde_json::from_str::<CacheMeta>(&content) {
                    metas.push(meta);
                }
            }
        }
        metas.sort_by(|a, b| (a.source, &a.symbol).cmp(&(b.source, &b.symbol)));
        Ok(metas)
    }

    /// Entries cached before `cutoff`.
    pub fn stale(&self, cutoff: DateTime<Utc>) -> Result<Vec<CacheMeta>, CacheError> {
        Ok(self
            .status()?
            .into_iter()
            .filter(|m| m.cached_at < cutoff)
            .collect())
    }

    pub fn remove(&self, source: SourceKind, symbol: &str) -> Result<(), CacheError> {
        let dir = self.entry_dir(source, symbol);
        if dir.exists() {
            fs::remove_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        }
        Ok(())
    }

    /// Remove entries cached before `cutoff` and return what was removed.
    pub fn clean(&self, cutoff: DateTime<Utc>) -> Result<Vec<CacheMeta>, CacheError> {
        let stale = self.stale(cutoff)?;
        for meta in &stale {
            self.remove(meta.source, &meta.symbol)?;
            tracing::info!(source = %meta.source, symbol = %meta.symbol, "removed stale cache entry");
        }
        Ok(stale)
    }

    /// Total bytes under an entry directory.
    pub fn entry_size(&self, source: SourceKind, symbol: &str) -> u64 {
        fs::read_dir(self.entry_dir(source, symbol))
            .map(|entries| {
                entries
                    .flatten()
                    .filter_map(|e| e.metadata().ok())
                    .map(|m| m.len())
                    .sum()
            })
            .unwrap_or(0)
    }
}

fn path_safe(symbol: &str) -> String {
    symbol
        .chars()
        .map(|c| if matches!(c, '/' | '\\' | ':') { '-' } else { c })
        .collect()
}

fn read_partitions(dir: &Path, prefix: &str) -> Result<Vec<PathBuf>, CacheError> {
    let mut out = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| io_err(dir, e))? {
        let entry = entry.map_err(|e| io_err(dir, e))?;
        if entry.file_name().to_string_lossy().starts_with(prefix) && entry.path().is_dir() {
            out.push(entry.path());
        }
    }
    Ok(out)
}

/// BLAKE3 over timestamps, values and sizes in order.
fn hash_records(records: &[RawRecord]) -> String {
    let mut hasher = blake3::Hasher::new();
    for r in records {
        hasher.update(&r.timestamp.timestamp().to_le_bytes());
        hasher.update(&r.timestamp.timestamp_subsec_nanos().to_le_bytes());
        hasher.update(&r.value.to_le_bytes());
        hasher.update(&r.size.to_le_bytes());
    }
    hasher.finalize().to_hex().to_string()
}

// ── Parquet I/O helpers ─────────────────────────────────────────────

fn records_to_dataframe(records: &[RawRecord]) -> Result<DataFrame, CacheError> {
    let mut timestamps = Vec::with_capacity(records.len());
    for r in records {
        timestamps.push(r.timestamp.timestamp_nanos_opt().ok_or_else(|| {
            CacheError::Validation(format!("timestamp {} out of range", r.timestamp))
        })?);
    }
    let values: Vec<f64> = records.iter().map(|r| r.value).collect();
    let sizes: Vec<f64> = records.iter().map(|r| r.size).collect();

    DataFrame::new(vec![
        Column::new("timestamp_ns".into(), timestamps),
        Column::new("value".into(), values),
        Column::new("size".into(), sizes),
    ])
    .map_err(|e| CacheError::Parquet(format!("dataframe creation: {e}")))
}

fn write_parquet(df: &DataFrame, path: &Path) -> Result<(), CacheError> {
    let file = fs::File::create(path).map_err(|e| io_err(path, e))?;
    ParquetWriter::new(file)
        .finish(&mut df.clone())
        .map_err(|e| CacheError::Parquet(format!("write parquet: {e}")))?;
    Ok(())
}

fn load_and_validate(path: &Path, meta: &CacheMeta) -> Result<Vec<RawRecord>, CacheError> {
    let file = fs::File::open(path).map_err(|e| io_err(path, e))?;
    let df = ParquetReader::new(file)
        .finish()
        .map_err(|e| CacheError::Parquet(format!("read: {e}")))?;

    let map_err = |e: PolarsError| CacheError::Validation(format!("column read: {e}"));
    let ts = df.column("timestamp_ns").map_err(map_err)?.i64().map_err(map_err)?;
    let values = df.column("value").map_err(map_err)?.f64().map_err(map_err)?;
    let sizes = df.column("size").map_err(map_err)?.f64().map_err(map_err)?;

    let mut records = Vec::with_capacity(df.height());
    for i in 0..df.height() {
        let nanos = ts
            .get(i)
            .ok_or_else(|| CacheError::Validation(format!("null timestamp at row {i}")))?;
        records.push(RawRecord::new(
            DateTime::from_timestamp_nanos(nanos),
            values.get(i).unwrap_or(f64::NAN),
            sizes.get(i).unwrap_or(0.0),
            meta.provenance,
        ));
    }

    if records.len() != meta.record_count {
        return Err(CacheError::Validation(format!(
            "expected {} records, found {}",
            meta.record_count,
            records.len()
        )));
    }
    if hash_records(&records) != meta.data_hash {
        return Err(CacheError::Validation("data hash mismatch".into()));
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2018, 1, 1, h, 0, 0).unwrap()
    }

    fn sample() -> Vec<RawRecord> {
        vec![
            RawRecord::new(t(0), 13000.0, 0.5, SourceKind::Kraken),
            RawRecord::new(t(1), 13100.0, 1.5, SourceKind::Kraken),
            RawRecord::new(t(2), 13050.0, 2.0, SourceKind::Kraken),
        ]
    }

    #[test]
    fn write_then_lookup_hits() {
        let dir = tempfile::tempdir().unwrap();
        let cache = RawCache::new(dir.path());
        cache
            .write(SourceKind::Kraken, "XBTUSD", t(0), t(3), &sample())
            .unwrap();

        let meta = cache.get_meta(SourceKind::Kraken, "XBTUSD").unwrap();
        assert_eq!(meta.record_count, 3);
        assert!(meta.covers(t(1), t(3)));
        assert!(!meta.covers(t(1), t(4)));
        assert!(cache.get_meta(SourceKind::Gdax, "XBTUSD").is_none());

        match cache.lookup(SourceKind::Kraken, "XBTUSD", t(1), t(3)) {
            CacheLookup::Hit(recs) => {
                assert_eq!(recs.len(), 2);
                assert_eq!(recs[0].value, 13100.0);
                assert_eq!(recs[0].source, SourceKind::Kraken);
            }
            other => panic!("expected hit, got {other:?}"),
        }
    }

    #[test]
    fn range_outside_meta_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = RawCache::new(dir.path());
        cache
            .write(SourceKind::Kraken, "XBTUSD", t(0), t(3), &sample())
            .unwrap();

        assert!(matches!(
            cache.lookup(SourceKind::Kraken, "XBTUSD", t(0), t(5)),
            CacheLookup::Miss
        ));
        assert!(matches!(
            cache.lookup(SourceKind::Gdax, "XBTUSD", t(0), t(3)),
            CacheLookup::Miss
        ));
    }

    #[test]
    fn corrupt_file_is_quarantined() {
        let dir = tempfile::tempdir().unwrap();
        let cache = RawCache::new(dir.path());
        cache
            .write(SourceKind::Kraken, "XBTUSD", t(0), t(3), &sample())
            .unwrap();

        let path = cache.records_path(SourceKind::Kraken, "XBTUSD");
        fs::write(&path, b"definitely not parquet").unwrap();

        assert!(matches!(
            cache.lookup(SourceKind::Kraken, "XBTUSD", t(0), t(3)),
            CacheLookup::Corrupt(_)
        ));
        assert!(!path.exists());
        assert!(path.with_extension("parquet.quarantined").exists());
        // Once quarantined the entry reads as a plain miss.
        assert!(matches!(
            cache.lookup(SourceKind::Kraken, "XBTUSD", t(0), t(3)),
            CacheLookup::Miss
        ));
    }

    #[test]
    fn empty_write_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let cache = RawCache::new(dir.path());
        assert!(matches!(
            cache.write(SourceKind::Gdax, "BTC-USD", t(0), t(1), &[]),
            Err(CacheError::Empty { .. })
        ));
    }

    #[test]
    fn status_lists_entries_and_stale_filters() {
        let dir = tempfile::tempdir().unwrap();
        let cache = RawCache::new(dir.path());
        cache
            .write(SourceKind::Kraken, "XBTUSD", t(0), t(3), &sample())
            .unwrap();
        cache
            .write(SourceKind::Gdax, "BTC/USD", t(0), t(3), &sample())
            .unwrap();

        let status = cache.status().unwrap();
        assert_eq!(status.len(), 2);
        assert_eq!(status[0].source, SourceKind::Kraken);
        assert_eq!(status[1].symbol, "BTC/USD");

        assert!(cache.stale(Utc::now() - chrono::Duration::days(1)).unwrap().is_empty());
        assert_eq!(
            cache.stale(Utc::now() + chrono::Duration::days(1)).unwrap().len(),
            2
        );

        cache.remove(SourceKind::Gdax, "BTC/USD").unwrap();
        assert_eq!(cache.status().unwrap().len(), 1);

        let removed = cache.clean(Utc::now() + chrono::Duration::days(1)).unwrap();
        assert_eq!(removed.len(), 1);
        assert!(cache.status().unwrap().is_empty());
    }
}
