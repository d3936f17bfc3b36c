pub const DAY_MILLIS: i64 = 86_400_000;

/// UTC midnight of the day containing `ts_millis`, in epoch millis. Uses
/// euclidean remainder so pre-epoch timestamps still bucket to a midnight.
pub fn midnight_utc_millis(ts_millis: i64) -> i64 {
    ts_millis - ts_millis.rem_euclid(DAY_MILLIS)
}

/// The UTC day buckets touched by a window ending at `end_ts` (millis,
/// inclusive) and reaching `lookback` millis into the past. Lookback is
/// clamped so the window never precedes the epoch.
pub fn epoch_days(end_ts: i64, lookback: i64) -> Vec<i64> {
    let lookback = lookback.min(end_ts);
    let first = midnight_utc_millis(end_ts - lookback);
    let last = midnight_utc_millis(end_ts);

    let mut days = Vec::with_capacity(((last - first) / DAY_MILLIS + 1) as usize);
    let mut day = first;
    while day <= last {
        days.push(day);
        day += DAY_MILLIS;
    }
    days
}

/// A half-open `[start, end)` window in microseconds covering a list of day
/// buckets, for row-level `start_ts` comparisons.
pub fn micros_window(days: &[i64]) -> Option<(i64, i64)> {
    let first = days.first()?;
    let last = days.last()?;
    Some((first * 1000, (last + DAY_MILLIS) * 1000))
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    fn midnight() -> i64 {
        Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0)
            .unwrap()
            .timestamp_millis()
    }

    #[test]
    fn midnight_truncates_within_day() {
        let midnight = midnight();
        assert_eq!(midnight_utc_millis(midnight), midnight);
        assert_eq!(midnight_utc_millis(midnight + 3_600_000), midnight);
        assert_eq!(midnight_utc_millis(midnight + DAY_MILLIS - 1), midnight);
    }

    #[test]
    fn epoch_days_spans_the_lookback() {
        let midnight = midnight();
        let end_ts = midnight + 6 * 3_600_000;

        assert_eq!(epoch_days(end_ts, 3_600_000), vec![midnight]);
        assert_eq!(
            epoch_days(end_ts, DAY_MILLIS),
            vec![midnight - DAY_MILLIS, midnight]
        );
        assert_eq!(
            epoch_days(end_ts, 2 * DAY_MILLIS),
            vec![midnight - 2 * DAY_MILLIS, midnight - DAY_MILLIS, midnight]
        );
    }

    #[test]
    fn lookback_clamps_at_epoch() {
        let days = epoch_days(1_000, i64::MAX);
        assert_eq!(days, vec![0]);
    }

    #[test]
    fn micros_window_covers_all_days() {
        let midnight = midnight();
        let days = vec![midnight - DAY_MILLIS, midnight];
        let (lo, hi) = micros_window(&days).unwrap();
        assert_eq!(lo, (midnight - DAY_MILLIS) * 1000);
        assert_eq!(hi, (midnight + DAY_MILLIS) * 1000);
        assert!(micros_window(&[]).is_none());
    }
}
