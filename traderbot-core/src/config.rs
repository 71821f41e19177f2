//! Serializable pipeline configuration.
//!
//! A config is loaded from TOML once per run, validated, and then only read.
//! Provider endpoints, page caps, pacing, retry policy and file paths all
//! live here so no collector embeds them.

use crate::data::gdax::SUPPORTED_GRANULARITIES;
use crate::data::retry::RetryPolicy;
use crate::domain::{Field, Interval, SourceKind};
use crate::features::{column_name, RatioSpec};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("cannot parse config: {0}")]
    Parse(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Everything needed to reproduce one dataset build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Bucket width in minutes.
    #[serde(rename = "interval_minutes")]
    pub interval: Interval,

    /// Range start (inclusive).
    pub start: DateTime<Utc>,

    /// Range end (exclusive).
    pub end: DateTime<Utc>,

    /// Number of intervals between a feature row and its label.
    pub horizon: usize,

    pub target: TargetSpec,

    /// Columns kept at raw scale instead of converted to returns.
    #[serde(default)]
    pub exempt_columns: Vec<String>,

    #[serde(default)]
    pub ratios: Vec<RatioSpec>,

    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    pub sources: Vec<SourceSpec>,

    #[serde(default)]
    pub split: SplitConfig,

    #[serde(default)]
    pub providers: ProvidersConfig,
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("data/cache")
}

/// One (source, symbol) series and the fields it contributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSpec {
    pub source: SourceKind,
    pub symbol: String,
    #[serde(default = "default_fields")]
    pub fields: Vec<Field>,
}

fn default_fields() -> Vec<Field> {
    vec![Field::Close, Field::Volume]
}

/// The column to forecast, named by its (source, symbol, field) triple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetSpec {
    pub source: SourceKind,
    pub symbol: String,
    #[serde(default = "default_target_field")]
    pub field: Field,
}

fn default_target_field() -> Field {
    Field::Close
}

impl TargetSpec {
    pub fn column(&self) -> String {
        column_name(&self.symbol, self.source, self.field)
    }
}

/// Train/validation fractions; the remainder is the test set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitConfig {
    pub train: f64,
    pub valid: f64,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            train: 0.7,
            valid: 0.15,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub http: HttpSettings,
    pub kraken: KrakenSettings,
    pub gdax: GdaxSettings,
    pub trends: TrendsSettings,
    pub blockchain: BlockchainSettings,
    pub reddit: RedditSettings,
    pub synthetic: SyntheticSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            user_agent: concat!("traderbot/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl HttpSettings {
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KrakenSettings {
    pub base_url: String,
    pub min_delay_ms: u64,
    pub retry: RetryPolicy,
}

impl Default for KrakenSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.kraken.com".into(),
            min_delay_ms: 1000,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GdaxSettings {
    pub base_url: String,
    pub granularity_secs: i64,
    /// Candles per request.
    pub max_points: u32,
    pub min_delay_ms: u64,
    pub retry: RetryPolicy,
}

impl Default for GdaxSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.pro.coinbase.com".into(),
            granularity_secs: 3600,
            max_points: 200,
            min_delay_ms: 500,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendsSettings {
    /// No public default endpoint; required when a trends source is used.
    pub base_url: String,
    pub window_days: u32,
    pub granularity_secs: i64,
    pub min_delay_ms: u64,
    pub retry: RetryPolicy,
}

impl Default for TrendsSettings {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            window_days: 180,
            granularity_secs: 86_400,
            min_delay_ms: 1000,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockchainSettings {
    pub csv_path: PathBuf,
}

impl Default for BlockchainSettings {
    fn default() -> Self {
        Self {
            csv_path: PathBuf::from("data/blockchain.csv"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedditSettings {
    pub base_url: String,
    /// Comments per request.
    pub max_points: u32,
    pub min_delay_ms: u64,
    pub retry: RetryPolicy,
}

impl Default for RedditSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.pushshift.io/reddit/search/comment".into(),
            max_points: 500,
            min_delay_ms: 1000,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticSettings {
    /// Seconds between generated records.
    pub spacing_secs: i64,
}

impl Default for SyntheticSettings {
    fn default() -> Self {
        Self { spacing_secs: 300 }
    }
}

impl PipelineConfig {
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig =
            toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml(&text)
    }

    /// Feature columns produced by the configured sources, in config order.
    pub fn base_columns(&self) -> Vec<String> {
        self.sources
            .iter()
            .flat_map(|s| s.fields.iter().map(|&f| column_name(&s.symbol, s.source, f)))
            .collect()
    }

    pub fn target_column(&self) -> String {
        self.target.column()
    }

    pub fn uses(&self, source: SourceKind) -> bool {
        self.sources.iter().any(|s| s.source == source)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.start >= self.end {
            return invalid(format!("start {} is not before end {}", self.start, self.end));
        }
        if self.horizon == 0 {
            return invalid("horizon must be at least 1".into());
        }
        if self.sources.is_empty() {
            return invalid("no sources configured".into());
        }

        let mut pairs = HashSet::new();
        for s in &self.sources {
            if s.symbol.trim().is_empty() {
                return invalid(format!("{} source has an empty symbol", s.source));
            }
            if s.fields.is_empty() {
                return invalid(format!("{} {} selects no fields", s.source, s.symbol));
            }
            if !pairs.insert((s.source, s.symbol.as_str())) {
                return invalid(format!("{} {} configured twice", s.source, s.symbol));
            }
        }

        let mut known: HashSet<String> = self.base_columns().into_iter().collect();
        let target = self.target_column();
        if !known.contains(&target) {
            return invalid(format!("target column '{target}' is not produced by any source"));
        }
        for ratio in &self.ratios {
            for input in [&ratio.numerator, &ratio.denominator] {
                if !known.contains(input) {
                    return invalid(format!("ratio '{}' uses unknown column '{input}'", ratio.name));
                }
            }
            if !known.insert(ratio.name.clone()) {
                return invalid(format!("ratio name '{}' is already a column", ratio.name));
            }
        }
        if let Some(unknown) = self.exempt_columns.iter().find(|c| !known.contains(*c)) {
            return invalid(format!("exempt column '{unknown}' is not produced"));
        }

        let intervals = (self.end - self.start).num_seconds() / self.interval.seconds();
        let needed = self.horizon as i64 + 2;
        if intervals < needed {
            return invalid(format!(
                "range holds {intervals} intervals, horizon {} needs at least {needed}",
                self.horizon
            ));
        }

        let split = &self.split;
        if !(0.0..=1.0).contains(&split.train)
            || !(0.0..=1.0).contains(&split.valid)
            || split.train + split.valid > 1.0
        {
            return invalid(format!(
                "split fractions train={} valid={} must lie in [0, 1] and sum to at most 1",
                split.train, split.valid
            ));
        }

        if self.uses(SourceKind::Gdax)
            && !SUPPORTED_GRANULARITIES.contains(&self.providers.gdax.granularity_secs)
        {
            return invalid(format!(
                "gdax granularity {}s not one of {SUPPORTED_GRANULARITIES:?}",
                self.providers.gdax.granularity_secs
            ));
        }
        if self.uses(SourceKind::Trends) && self.providers.trends.base_url.trim().is_empty() {
            return invalid("trends source configured without providers.trends.base_url".into());
        }

        Ok(())
    }

    /// BLAKE3 hash of the canonical JSON form. Two builds with the same
    /// fingerprint read the same sources over the same range.
    pub fn fingerprint(&self) -> String {
        let bytes = serde_json::to_vec(self).unwrap_or_else(|_| format!("{self:?}").into_bytes());
        blake3::hash(&bytes).to_hex().to_string()
    }

    /// Copy covering the `n` most recent complete intervals before `now`.
    pub fn live_window(&self, n: u32, now: DateTime<Utc>) -> Result<Self, ConfigError> {
        if n == 0 {
            return Err(ConfigError::Invalid("live window needs at least one interval".into()));
        }
        let end = self.interval.floor(now);
        let span = Duration::seconds(self.interval.seconds() * i64::from(n));
        let mut live = self.clone();
        live.start = end - span;
        live.end = end;
        live.validate()?;
        Ok(live)
    }
}
