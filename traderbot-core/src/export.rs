//! Dataset artifacts handed to model training.
//!
//! - **CSV**: `interval_start`, feature columns, `label`, `raw_target`;
//!   missing values are empty cells. The full dataset and its
//!   train/valid/test parts share one layout.
//! - **Parquet**: any feature table, nullable f64 columns plus a datetime index
//! - **Manifest**: JSON summary of a build (fingerprint, sizes, warnings)

use crate::domain::FeatureTable;
use crate::features::{DatasetSplit, LabeledDataset, TransformWarning};
use crate::pipeline::{PipelineOutput, SeriesReport};
use chrono::{DateTime, SecondsFormat, Utc};
use polars::prelude::*;
use serde::Serialize;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("cannot write {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("parquet error: {0}")]
    Parquet(String),

    #[error("manifest serialization: {0}")]
    Json(#[from] serde_json::Error),
}

fn io_err(path: &Path, e: impl std::fmt::Display) -> ExportError {
    ExportError::Io {
        path: path.display().to_string(),
        reason: e.to_string(),
    }
}

fn cell(v: Option<f64>) -> String {
    v.map(|x| x.to_string()).unwrap_or_default()
}

/// Serialize a labelled dataset to CSV text.
pub fn dataset_csv(dataset: &LabeledDataset) -> Result<String, ExportError> {
    let mut wtr = csv::Writer::from_writer(vec![]);

    let mut header = vec!["interval_start".to_string()];
    header.extend(dataset.features.column_names().iter().cloned());
    header.push("label".into());
    header.push("raw_target".into());
    wtr.write_record(&header)?;

    for i in 0..dataset.len() {
        let mut record = Vec::with_capacity(header.len());
        record.push(dataset.index()[i].to_rfc3339_opts(SecondsFormat::Secs, true));
        for (_, column) in dataset.features.columns() {
            record.push(cell(column[i]));
        }
        record.push(cell(dataset.labels[i]));
        record.push(cell(dataset.raw_target[i]));
        wtr.write_record(&record)?;
    }

    let bytes = wtr
        .into_inner()
        .map_err(|e| ExportError::Io {
            path: "<memory>".into(),
            reason: e.to_string(),
        })?;
    String::from_utf8(bytes).map_err(|e| ExportError::Io {
        path: "<memory>".into(),
        reason: e.to_string(),
    })
}

pub fn write_dataset_csv(path: &Path, dataset: &LabeledDataset) -> Result<(), ExportError> {
    let text = dataset_csv(dataset)?;
    fs::write(path, text).map_err(|e| io_err(path, e))
}

/// Write `train.csv`, `valid.csv` and `test.csv` into `dir`.
pub fn write_split_csvs(dir: &Path, split: &DatasetSplit) -> Result<(), ExportError> {
    for (name, part) in split.parts() {
        write_dataset_csv(&dir.join(format!("{name}.csv")), part)?;
    }
    Ok(())
}

fn table_to_dataframe(table: &FeatureTable) -> Result<DataFrame, ExportError> {
    let millis: Vec<i64> = table.index().iter().map(|t| t.timestamp_millis()).collect();
    let index = Column::new("interval_start".into(), millis)
        .cast(&DataType::Datetime(TimeUnit::Milliseconds, Some("UTC".into())))
        .map_err(|e| ExportError::Parquet(format!("index cast: {e}")))?;

    let mut columns = vec![index];
    for (name, values) in table.columns() {
        columns.push(Column::new(name.into(), values.to_vec()));
    }
    DataFrame::new(columns).map_err(|e| ExportError::Parquet(format!("dataframe creation: {e}")))
}

/// Write a feature table as Parquet (atomic: temp file then rename).
pub fn write_table_parquet(path: &Path, table: &FeatureTable) -> Result<(), ExportError> {
    let mut df = table_to_dataframe(table)?;
    let tmp = path.with_extension("parquet.tmp");
    let file = fs::File::create(&tmp).map_err(|e| io_err(&tmp, e))?;
    ParquetWriter::new(file)
        .finish(&mut df)
        .map_err(|e| ExportError::Parquet(format!("write parquet: {e}")))?;
    fs::rename(&tmp, path).map_err(|e| {
        if let Err(cleanup) = fs::remove_file(&tmp) {
            tracing::debug!(path = %tmp.display(), "leaving temp file: {cleanup}");
        }
        io_err(path, e)
    })
}

/// Summary written next to the dataset files.
#[derive(Debug, Clone, Serialize)]
pub struct DatasetManifest {
    pub fingerprint: String,
    pub generated_at: DateTime<Utc>,
    pub target: String,
    pub horizon: usize,
    pub aligned_rows: usize,
    pub dataset_rows: usize,
    pub complete_rows: usize,
    pub feature_columns: Vec<String>,
    pub first_interval: Option<DateTime<Utc>>,
    pub last_interval: Option<DateTime<Utc>>,
    pub split: Vec<SplitPart>,
    pub series: Vec<SeriesReport>,
    pub warnings: Vec<TransformWarning>,
}

/// Size and time span of one train/valid/test part.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SplitPart {
    pub name: String,
    pub rows: usize,
    pub first_interval: Option<DateTime<Utc>>,
    pub last_interval: Option<DateTime<Utc>>,
}

impl DatasetManifest {
    pub fn from_output(output: &PipelineOutput) -> Self {
        let dataset = &output.dataset;
        Self {
            fingerprint: output.fingerprint.clone(),
            generated_at: Utc::now(),
            target: dataset.target.clone(),
            horizon: dataset.horizon,
            aligned_rows: output.aligned.len(),
            dataset_rows: dataset.len(),
            complete_rows: dataset.drop_incomplete().len(),
            feature_columns: dataset.features.column_names().to_vec(),
            first_interval: dataset.index().first().copied(),
            last_interval: dataset.index().last().copied(),
            split: output
                .split
                .parts()
                .into_iter()
                .map(|(name, part)| SplitPart {
                    name: name.to_string(),
                    rows: part.len(),
                    first_interval: part.index().first().copied(),
                    last_interval: part.index().last().copied(),
                })
                .collect(),
            series: output.series.clone(),
            warnings: output.warnings.clone(),
        }
    }

    pub fn write(&self, path: &Path) -> Result<(), ExportError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).map_err(|e| io_err(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::generate_labels;
    use chrono::{Duration, TimeZone};

    fn dataset() -> LabeledDataset {
        let t0 = Utc.with_ymd_and_hms(2018, 1, 1, 0, 0, 0).unwrap();
        let mut t = FeatureTable::with_index((0..4).map(|i| t0 + Duration::hours(i)).collect())
            .unwrap();
        t.push_column("target", vec![None, Some(0.5), Some(0.25), Some(-0.1)])
            .unwrap();
        t.push_column("fee", vec![Some(1.0), None, Some(3.0), Some(4.0)])
            .unwrap();
        generate_labels(&t, &[Some(10.0), Some(15.0), Some(18.75), Some(16.875)], "target", 1)
            .unwrap()
    }

    #[test]
    fn csv_layout_and_empty_cells() {
        let text = dataset_csv(&dataset()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "interval_start,fee,label,raw_target");
        assert_eq!(lines[1], "2018-01-01T01:00:00Z,,0.25,18.75");
        assert_eq!(lines[2], "2018-01-01T02:00:00Z,3,-0.1,16.875");
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn parquet_round_trips_through_polars() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("features.parquet");
        let ds = dataset();
        write_table_parquet(&path, &ds.features).unwrap();

        let df = ParquetReader::new(fs::File::open(&path).unwrap())
            .finish()
            .unwrap();
        assert_eq!(df.height(), 2);
        assert_eq!(df.width(), 2);
        let fee = df.column("fee").unwrap().f64().unwrap();
        assert_eq!(fee.get(0), None);
        assert_eq!(fee.get(1), Some(3.0));
        assert!(!path.with_extension("parquet.tmp").exists());
    }

    #[test]
    fn split_parts_written_side_by_side() {
        let dir = tempfile::tempdir().unwrap();
        let split = dataset().split_chronological(0.5, 0.0).unwrap();
        write_split_csvs(dir.path(), &split).unwrap();

        let rows = |name: &str| {
            fs::read_to_string(dir.path().join(name))
                .unwrap()
                .lines()
                .count()
                - 1
        };
        assert_eq!(rows("train.csv"), 1);
        assert_eq!(rows("valid.csv"), 0);
        assert_eq!(rows("test.csv"), 1);
        let test = fs::read_to_string(dir.path().join("test.csv")).unwrap();
        assert!(test.contains("2018-01-01T02:00:00Z,3,-0.1,16.875"));
    }
}
