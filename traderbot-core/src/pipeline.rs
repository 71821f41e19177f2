//! End-to-end dataset build.
//!
//! collect (cache first) → resample each series → align and interpolate →
//! drop incomplete edges → derive ratios and returns → labels.
//!
//! A run either returns a complete dataset or fails with an error naming the
//! source, symbol or column at fault. Collected data is never used
//! partially: one failed series fails the run.

use crate::config::{ConfigError, PipelineConfig};
use crate::data::download::{
    collect_all, CollectError, CollectOptions, CollectProgress, CollectedSeries, CollectorSet,
    LogProgress, Origin,
};
use crate::data::RawCache;
use crate::domain::{FeatureTable, SourceKind};
use crate::features::{
    align, drop_incomplete_edges, generate_labels, resample, AlignError, DatasetSplit,
    FeatureTransformer, LabelError, LabeledDataset, NamedSeries, TransformError, TransformWarning,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Collect(#[from] CollectError),

    #[error("source {source_kind} {symbol} produced no usable data")]
    MissingSource {
        source_kind: SourceKind,
        symbol: String,
    },

    #[error("alignment failed: {0}")]
    Alignment(AlignError),

    #[error("transform failed: {0}")]
    Transform(#[from] TransformError),

    #[error("label generation failed: {0}")]
    Label(#[from] LabelError),
}

impl From<AlignError> for PipelineError {
    fn from(e: AlignError) -> Self {
        match e {
            AlignError::MissingSource {
                source_kind,
                symbol,
            } => PipelineError::MissingSource {
                source_kind,
                symbol,
            },
            other => PipelineError::Alignment(other),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Re-fetch even when the cache covers the range.
    pub force: bool,
    /// Use the cache only.
    pub offline: bool,
}

/// Per-series account of what went into the table.
#[derive(Debug, Clone, Serialize)]
pub struct SeriesReport {
    pub source: SourceKind,
    pub symbol: String,
    pub records: usize,
    pub intervals: usize,
    pub origin: Origin,
}

#[derive(Debug, Clone)]
pub struct PipelineOutput {
    /// Joined, interpolated and edge-trimmed table at raw scale.
    pub aligned: FeatureTable,
    /// `aligned` plus ratio columns, with non-exempt columns as returns.
    pub transformed: FeatureTable,
    pub dataset: LabeledDataset,
    /// `dataset` cut in time order by the configured fractions.
    pub split: DatasetSplit,
    pub warnings: Vec<TransformWarning>,
    pub series: Vec<SeriesReport>,
    pub fingerprint: String,
}

pub struct Pipeline;

impl Pipeline {
    /// Collect every configured series and build the dataset.
    pub fn run(
        config: &PipelineConfig,
        collectors: &CollectorSet,
        cache: Option<&RawCache>,
        options: RunOptions,
    ) -> Result<PipelineOutput, PipelineError> {
        Self::run_with_progress(config, collectors, cache, options, &LogProgress)
    }

    pub fn run_with_progress(
        config: &PipelineConfig,
        collectors: &CollectorSet,
        cache: Option<&RawCache>,
        options: RunOptions,
        progress: &dyn CollectProgress,
    ) -> Result<PipelineOutput, PipelineError> {
        config.validate()?;
        tracing::info!(
            sources = config.sources.len(),
            start = %config.start,
            end = %config.end,
            interval_minutes = config.interval.minutes(),
            "starting pipeline run"
        );

        let opts = CollectOptions {
            force: options.force,
            offline: options.offline,
        };
        let collected = collect_all(
            collectors,
            cache,
            &config.sources,
            config.start,
            config.end,
            opts,
            progress,
        )
        .into_iter()
        .collect::<Result<Vec<_>, _>>()?;

        Self::build(config, &collected)
    }

    /// Build the dataset from already collected series, in config order.
    pub fn build(
        config: &PipelineConfig,
        collected: &[CollectedSeries],
    ) -> Result<PipelineOutput, PipelineError> {
        let mut named = Vec::with_capacity(collected.len());
        let mut series = Vec::with_capacity(collected.len());
        for (spec, c) in config.sources.iter().zip(collected) {
            let rows = resample(&c.records, config.interval);
            tracing::info!(
                source = %spec.source,
                symbol = %spec.symbol,
                records = c.records.len(),
                intervals = rows.len(),
                "resampled"
            );
            series.push(SeriesReport {
                source: spec.source,
                symbol: spec.symbol.clone(),
                records: c.records.len(),
                intervals: rows.len(),
                origin: c.origin,
            });
            named.push(NamedSeries {
                source: spec.source,
                symbol: spec.symbol.clone(),
                fields: spec.fields.clone(),
                rows,
            });
        }

        let joined = align(&named)?;
        let aligned = drop_incomplete_edges(&joined)?;
        tracing::info!(
            rows = aligned.len(),
            columns = aligned.width(),
            trimmed = joined.len() - aligned.len(),
            "aligned"
        );

        let transformer =
            FeatureTransformer::new(config.exempt_columns.clone(), config.ratios.clone());
        let out = transformer.apply(&aligned)?;
        for w in &out.warnings {
            tracing::warn!("{w}");
        }

        let target = config.target_column();
        let raw_target = aligned
            .column(&target)
            .ok_or_else(|| LabelError::UnknownTarget(target.clone()))?;
        let dataset = generate_labels(&out.table, raw_target, &target, config.horizon)?;
        tracing::info!(rows = dataset.len(), features = dataset.features.width(), "labelled");

        let split = dataset.split_chronological(config.split.train, config.split.valid)?;
        tracing::info!(
            train = split.train.len(),
            valid = split.valid.len(),
            test = split.test.len(),
            "split"
        );

        Ok(PipelineOutput {
            aligned,
            transformed: out.table,
            dataset,
            split,
            warnings: out.warnings,
            series,
            fingerprint: config.fingerprint(),
        })
    }
}
