//! Bucket irregular records into fixed-width OHLCV rows.

use crate::domain::{Interval, IntervalRow, RawRecord};
use std::collections::BTreeMap;

/// Resample records of one (source, symbol) series.
///
/// Records need not be sorted. Open and close are the values of the
/// earliest and latest record in the bucket; ties on timestamp keep input
/// order. Records with a non-finite value are skipped. Empty buckets are
/// omitted.
pub fn resample(records: &[RawRecord], interval: Interval) -> Vec<IntervalRow> {
    let mut ordered: Vec<&RawRecord> = records.iter().filter(|r| r.value.is_finite()).collect();
    ordered.sort_by_key(|r| r.timestamp);

    let mut buckets: BTreeMap<_, IntervalRow> = BTreeMap::new();
    for rec in ordered {
        let start = interval.floor(rec.timestamp);
        let size = if rec.size.is_finite() { rec.size } else { 0.0 };
        buckets
            .entry(start)
            .and_modify(|row| {
                row.low = row.low.min(rec.value);
                row.high = row.high.max(rec.value);
                row.close = rec.value;
                row.volume += size;
            })
            .or_insert(IntervalRow {
                interval_start: start,
                low: rec.value,
                high: rec.value,
                open: rec.value,
                close: rec.value,
                volume: size,
            });
    }
    buckets.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SourceKind;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2018, 1, 1, 0, 0, 0).unwrap()
    }

    fn rec(minutes: i64, value: f64, size: f64) -> RawRecord {
        RawRecord::new(t0() + Duration::minutes(minutes), value, size, SourceKind::Kraken)
    }

    fn hourly() -> Interval {
        Interval::from_minutes(60).unwrap()
    }

    #[test]
    fn ohlcv_within_one_bucket() {
        let rows = resample(
            &[rec(40, 12.0, 1.0), rec(5, 10.0, 0.5), rec(20, 15.0, 2.0), rec(30, 8.0, 0.5)],
            hourly(),
        );
        assert_eq!(rows.len(), 1);
        let r = &rows[0];
        assert_eq!(r.interval_start, t0());
        assert_eq!(r.open, 10.0);
        assert_eq!(r.close, 12.0);
        assert_eq!(r.low, 8.0);
        assert_eq!(r.high, 15.0);
        assert!((r.volume - 4.0).abs() < 1e-12);
    }

    #[test]
    fn empty_buckets_are_omitted() {
        let rows = resample(&[rec(10, 1.0, 1.0), rec(190, 2.0, 1.0)], hourly());
        let starts: Vec<_> = rows.iter().map(|r| r.interval_start).collect();
        assert_eq!(starts, vec![t0(), t0() + Duration::hours(3)]);
    }

    #[test]
    fn bucket_boundary_belongs_to_later_bucket() {
        let rows = resample(&[rec(59, 1.0, 1.0), rec(60, 2.0, 1.0)], hourly());
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].open, 2.0);
    }

    #[test]
    fn non_finite_values_skipped() {
        let rows = resample(&[rec(1, f64::NAN, 1.0), rec(2, 5.0, 1.0)], hourly());
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].open, 5.0);
        assert_eq!(rows[0].volume, 1.0);
    }

    #[test]
    fn empty_input() {
        assert!(resample(&[], hourly()).is_empty());
    }
}
