//! Traderbot Core: multi-source market data collection and feature pipeline.
//!
//! This crate turns raw provider data into a supervised dataset:
//! - Domain types (raw records, interval rows, feature tables)
//! - Collectors for exchange trades, exchange candles, search interest,
//!   blockchain statistics and social sentiment, with paced and retried HTTP
//! - Parquet cache of raw downloads keyed by source and symbol
//! - Resampling, multi-source alignment with interpolation, percent-change
//!   and ratio features, forecast labels
//! - Pipeline orchestration and dataset export

pub mod config;
pub mod data;
pub mod domain;
pub mod export;
pub mod features;
pub mod pipeline;

pub use config::{ConfigError, PipelineConfig};
pub use pipeline::{Pipeline, PipelineError, PipelineOutput, RunOptions};
