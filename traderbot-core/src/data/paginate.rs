//! Splitting a requested range into provider-sized pages.

use chrono::{DateTime, Duration, Utc};

/// Consecutive half-open windows `[s, min(s + span, end))` covering
/// `[start, end)`. Always `ceil((end - start) / span)` windows; empty when
/// the range is empty or the span is not positive.
pub fn page_windows(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    span: Duration,
) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
    let mut windows = Vec::new();
    if span <= Duration::zero() {
        return windows;
    }
    let mut cursor = start;
    while cursor < end {
        let slice_end = (cursor + span).min(end);
        windows.push((cursor, slice_end));
        cursor = slice_end;
    }
    windows
}

/// Next cursor for a provider that reports (or implies) where the following
/// page starts. Forces progress when the provider repeats or rewinds the
/// cursor, so backfill loops always terminate.
pub fn advance_cursor(current: i64, reported: i64) -> i64 {
    if reported > current {
        reported
    } else {
        current.saturating_add(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2018, 1, 1, h, 0, 0).unwrap()
    }

    #[test]
    fn exact_multiple_gives_equal_windows() {
        let w = page_windows(t(0), t(6), Duration::hours(2));
        assert_eq!(w, vec![(t(0), t(2)), (t(2), t(4)), (t(4), t(6))]);
    }

    #[test]
    fn remainder_goes_in_short_last_window() {
        let w = page_windows(t(0), t(5), Duration::hours(2));
        assert_eq!(w.len(), 3);
        assert_eq!(w[2], (t(4), t(5)));
    }

    #[test]
    fn degenerate_inputs_yield_nothing() {
        assert!(page_windows(t(3), t(3), Duration::hours(1)).is_empty());
        assert!(page_windows(t(0), t(3), Duration::zero()).is_empty());
    }

    #[test]
    fn cursor_always_moves_forward() {
        assert_eq!(advance_cursor(10, 20), 20);
        assert_eq!(advance_cursor(10, 10), 11);
        assert_eq!(advance_cursor(10, 3), 11);
    }
}
