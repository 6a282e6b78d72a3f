//! Calendar-month period math (UTC).

use chrono::{DateTime, Datelike, TimeZone, Utc};

/// Bounds of the quota period containing `now`:
/// `[first-of-month, first-of-next-month)` in UTC.
pub fn current_period_bounds(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = month_start(now.year(), now.month());
    let end = if now.month() == 12 {
        month_start(now.year() + 1, 1)
    } else {
        month_start(now.year(), now.month() + 1)
    };
    (start, end)
}

fn month_start(year: i32, month: u32) -> DateTime<Utc> {
    match Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0) {
        chrono::LocalResult::Single(dt) => dt,
        // UTC has no DST gaps or folds.
        _ => unreachable!("first-of-month midnight is always a valid UTC instant"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn test_mid_month_bounds() {
        let (start, end) = current_period_bounds(utc(2026, 8, 15, 12));
        assert_eq!(start, utc(2026, 8, 1, 0));
        assert_eq!(end, utc(2026, 9, 1, 0));
    }

    #[test]
    fn test_december_rolls_into_next_year() {
        let (start, end) = current_period_bounds(utc(2025, 12, 31, 23));
        assert_eq!(start, utc(2025, 12, 1, 0));
        assert_eq!(end, utc(2026, 1, 1, 0));
    }

    #[test]
    fn test_bounds_are_idempotent_within_month() {
        let first = current_period_bounds(utc(2026, 3, 1, 0));
        let last = current_period_bounds(utc(2026, 3, 31, 23));
        assert_eq!(first, last);
    }

    #[test]
    fn test_first_instant_is_inside_period() {
        let now = utc(2026, 5, 1, 0);
        let (start, end) = current_period_bounds(now);
        assert!(start <= now && now < end);
    }
}
