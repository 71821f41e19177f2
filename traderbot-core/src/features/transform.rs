//! Derived ratio columns and percent-change conversion.

use crate::domain::{FeatureTable, TableError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum TransformError {
    #[error("ratio '{ratio}' references unknown column '{column}'")]
    UnknownRatioInput { ratio: String, column: String },

    #[error("exempt column '{0}' is not in the table")]
    UnknownExempt(String),

    #[error(transparent)]
    Table(#[from] TableError),
}

/// Numeric anomaly worth reporting. Never aborts a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransformWarning {
    /// Every cell of a derived ratio is undefined (zero or missing
    /// denominator throughout).
    EmptyRatio { column: String },
    /// Percent change was undefined at rows other than the first, because
    /// the previous value was zero or missing.
    UndefinedReturns { column: String, rows: usize },
}

impl fmt::Display for TransformWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransformWarning::EmptyRatio { column } => {
                write!(f, "derived column '{column}' has no defined values")
            }
            TransformWarning::UndefinedReturns { column, rows } => {
                write!(f, "column '{column}' has {rows} undefined returns")
            }
        }
    }
}

/// `name = numerator / denominator`, e.g. fee per transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatioSpec {
    pub name: String,
    pub numerator: String,
    pub denominator: String,
}

#[derive(Debug, Clone)]
pub struct TransformOutput {
    pub table: FeatureTable,
    pub warnings: Vec<TransformWarning>,
}

/// Adds ratio columns, then converts every non-exempt column to returns.
///
/// The index is unchanged: the first row holds `None` in every converted
/// column and is dropped by label generation.
#[derive(Debug, Clone, Default)]
pub struct FeatureTransformer {
    exempt: Vec<String>,
    ratios: Vec<RatioSpec>,
}

impl FeatureTransformer {
    pub fn new(exempt: Vec<String>, ratios: Vec<RatioSpec>) -> Self {
        Self { exempt, ratios }
    }

    pub fn apply(&self, input: &FeatureTable) -> Result<TransformOutput, TransformError> {
        let mut table = input.clone();
        let mut warnings = Vec::new();

        // Ratios may build on earlier ratios, so each sees the table so far.
        for spec in &self.ratios {
            let ratio = {
                let num = lookup(&table, spec, &spec.numerator)?;
                let den = lookup(&table, spec, &spec.denominator)?;
                ratio_column(num, den)
            };
            if ratio.iter().all(Option::is_none) {
                tracing::warn!(column = %spec.name, "derived ratio has no defined values");
                warnings.push(TransformWarning::EmptyRatio {
                    column: spec.name.clone(),
                });
            }
            table.push_column(spec.name.clone(), ratio)?;
        }

        let exempt: HashSet<&str> = self.exempt.iter().map(String::as_str).collect();
        if let Some(unknown) = exempt.iter().find(|name| !table.has_column(name)) {
            return Err(TransformError::UnknownExempt(unknown.to_string()));
        }

        let names: Vec<String> = table.column_names().to_vec();
        for name in names.iter().filter(|n| !exempt.contains(n.as_str())) {
            let Some(column) = table.column(name) else { continue };
            let returns = pct_change(column);
            let undefined = returns.iter().skip(1).filter(|v| v.is_none()).count();
            if undefined > 0 {
                warnings.push(TransformWarning::UndefinedReturns {
                    column: name.clone(),
                    rows: undefined,
                });
            }
            table.replace_column(name, returns)?;
        }

        Ok(TransformOutput { table, warnings })
    }
}

fn lookup<'t>(
    table: &'t FeatureTable,
    spec: &RatioSpec,
    column: &str,
) -> Result<&'t [Option<f64>], TransformError> {
    table
        .column(column)
        .ok_or_else(|| TransformError::UnknownRatioInput {
            ratio: spec.name.clone(),
            column: column.to_string(),
        })
}

/// Cell-wise quotient; zero or missing denominators give `None`.
pub fn ratio_column(num: &[Option<f64>], den: &[Option<f64>]) -> Vec<Option<f64>> {
    num.iter()
        .zip(den)
        .map(|(n, d)| match (n, d) {
            (Some(n), Some(d)) if *d != 0.0 => Some(n / d).filter(|v| v.is_finite()),
            _ => None,
        })
        .collect()
}

/// `(v[t] - v[t-1]) / v[t-1]`; the first cell and any zero or missing base
/// give `None`.
pub fn pct_change(values: &[Option<f64>]) -> Vec<Option<f64>> {
    let mut out = Vec::with_capacity(values.len());
    if values.is_empty() {
        return out;
    }
    out.push(None);
    for w in values.windows(2) {
        out.push(match (w[0], w[1]) {
            (Some(prev), Some(cur)) if prev != 0.0 => {
                Some((cur - prev) / prev).filter(|v| v.is_finite())
            }
            _ => None,
        });
    }
    out
}
