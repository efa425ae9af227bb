use chrono::{DateTime, Duration, Local, NaiveTime, TimeZone, Utc};

/// Source of wall-clock time
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}

/// Clock backed by the operating system
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Index of the minute containing `instant` (unix seconds / 60)
pub fn minute_index(instant: &DateTime<Utc>) -> i64 {
    instant.timestamp().div_euclid(60)
}

/// Start of the minute with the given index
pub fn minute_start(index: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(index.checked_mul(60)?, 0).single()
}

/// Smallest second-0 boundary at or after `now`
pub fn next_minute_boundary(now: &DateTime<Utc>) -> Option<DateTime<Utc>> {
    let floor = minute_index(now);
    let on_boundary = now.timestamp().rem_euclid(60) == 0 && now.timestamp_subsec_nanos() == 0;
    if on_boundary {
        Some(*now)
    } else {
        minute_start(floor + 1)
    }
}

/// Boundary the refresh timer should target next.
///
/// Skips forward when the ceiling lands on the minute that was already handled.
pub fn next_refresh_boundary(
    now: &DateTime<Utc>,
    last_handled_minute: Option<i64>,
) -> Option<DateTime<Utc>> {
    let boundary = next_minute_boundary(now)?;
    match last_handled_minute {
        Some(handled) if minute_index(&boundary) == handled => minute_start(handled + 1),
        _ => Some(boundary),
    }
}

/// Wall-clock delay until `target`, zero if it already passed
pub fn delay_until(now: &DateTime<Utc>, target: &DateTime<Utc>) -> std::time::Duration {
    target
        .signed_duration_since(*now)
        .to_std()
        .unwrap_or(std::time::Duration::ZERO)
}

/// Whole minutes until `target`, rounding partial minutes up
pub fn minutes_until_ceil(now: &DateTime<Utc>, target: &DateTime<Utc>) -> i64 {
    let millis = target.signed_duration_since(*now).num_milliseconds();
    if millis <= 0 {
        return 0;
    }
    (millis + 59_999) / 60_000
}

/// Last instant of the local day containing `now`
pub fn end_of_local_day(now: &DateTime<Utc>) -> DateTime<Utc> {
    let local = now.with_timezone(&Local);
    let end = local
        .date_naive()
        .and_time(NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN));

    match Local.from_local_datetime(&end) {
        chrono::LocalResult::Single(dt) => dt.with_timezone(&Utc),
        chrono::LocalResult::Ambiguous(_, latest) => latest.with_timezone(&Utc),
        chrono::LocalResult::None => *now + Duration::hours(24),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, h, m, s).unwrap()
    }

    #[test]
    fn test_next_minute_boundary() {
        assert_eq!(next_minute_boundary(&at(10, 0, 30)), Some(at(10, 1, 0)));
        assert_eq!(next_minute_boundary(&at(10, 59, 59)), Some(at(11, 0, 0)));

        // Exactly on a boundary is its own ceiling
        assert_eq!(next_minute_boundary(&at(10, 0, 0)), Some(at(10, 0, 0)));

        // Sub-second offsets still round up
        let almost = at(10, 0, 0) + Duration::milliseconds(1);
        assert_eq!(next_minute_boundary(&almost), Some(at(10, 1, 0)));
    }

    #[test]
    fn test_next_refresh_boundary_skips_handled_minute() {
        let now = at(10, 0, 0);
        let handled = minute_index(&now);

        assert_eq!(next_refresh_boundary(&now, None), Some(at(10, 0, 0)));
        assert_eq!(next_refresh_boundary(&now, Some(handled)), Some(at(10, 1, 0)));
        assert_eq!(
            next_refresh_boundary(&at(10, 0, 20), Some(handled)),
            Some(at(10, 1, 0))
        );
        // Older bookkeeping does not hold the timer back
        assert_eq!(
            next_refresh_boundary(&at(10, 5, 20), Some(handled)),
            Some(at(10, 6, 0))
        );
    }

    #[test]
    fn test_delay_until() {
        let now = at(10, 0, 30);
        assert_eq!(
            delay_until(&now, &at(10, 1, 0)),
            std::time::Duration::from_secs(30)
        );
        assert_eq!(delay_until(&now, &at(9, 0, 0)), std::time::Duration::ZERO);
    }

    #[test]
    fn test_minutes_until_ceil() {
        let now = at(10, 0, 0);
        assert_eq!(minutes_until_ceil(&now, &at(10, 4, 0)), 4);
        assert_eq!(minutes_until_ceil(&now, &at(10, 3, 1)), 4);
        assert_eq!(minutes_until_ceil(&now, &at(10, 0, 1)), 1);
        assert_eq!(minutes_until_ceil(&now, &at(9, 59, 0)), 0);
    }

    #[test]
    fn test_minute_index_roundtrip() {
        let now = at(10, 0, 42);
        assert_eq!(minute_start(minute_index(&now)), Some(at(10, 0, 0)));
    }

    #[test]
    fn test_end_of_local_day_is_after_now() {
        let now = Utc::now();
        let end = end_of_local_day(&now);
        assert!(end >= now);
        assert!(end - now <= Duration::hours(25));
    }
}
