//! Seeded random-walk collector for offline development.
//!
//! The walk is seeded from the symbol name, so the same symbol always
//! produces the same series. Records are tagged [`SourceKind::Synthetic`]
//! whatever source they stand in for.

use super::provider::{check_range, Collector, FetchError};
use crate::domain::{RawRecord, SourceKind};
use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub struct SyntheticWalk {
    spacing: Duration,
    start_level: f64,
    max_step: f64,
}

impl SyntheticWalk {
    /// One record every `spacing`, starting at 100 and moving at most ±0.5%
    /// per step.
    pub fn new(spacing: Duration) -> Self {
        Self {
            spacing: spacing.max(Duration::seconds(1)),
            start_level: 100.0,
            max_step: 0.005,
        }
    }
}

impl Collector for SyntheticWalk {
    fn source(&self) -> SourceKind {
        SourceKind::Synthetic
    }

    fn fetch_range(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<RawRecord>, FetchError> {
        check_range(self.source(), symbol, start, end)?;

        let seed: [u8; 32] = *blake3::hash(symbol.as_bytes()).as_bytes();
        let mut rng = StdRng::from_seed(seed);

        let mut records = Vec::new();
        let mut level = self.start_level;
        let mut ts = start;
        while ts < end {
            let step: f64 = rng.gen_range(-self.max_step..self.max_step);
            level *= 1.0 + step;
            let size: f64 = rng.gen_range(0.1..2.0);
            records.push(RawRecord::new(ts, level, size, SourceKind::Synthetic));
            ts += self.spacing;
        }
        Ok(records)
    }
}
