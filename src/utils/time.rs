use chrono::{DateTime, Duration, FixedOffset, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;

/// Display timezone for reconstructed sessions. Storage is always UTC, only
/// labels and offset instants use this.
pub const EASTERN: Tz = chrono_tz::America::New_York;

/// Canonical width of one playtime block. The upstream counter is polled on
/// roughly this cadence, so nothing finer can be reconstructed.
pub const BLOCK_MINUTES: i64 = 30;

/// This is the standard way of converting a date to a string in playlog.
pub fn date_to_record_name(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Rounds an instant up to the next 30-minute mark. Instants already on the
/// grid stay put.
pub fn ceil_to_block(instant: DateTime<Utc>) -> DateTime<Utc> {
    let block = BLOCK_MINUTES * 60;
    let secs = instant.timestamp();
    let rem = secs.rem_euclid(block);
    if rem == 0 {
        instant
    } else {
        DateTime::from_timestamp(secs - rem + block, 0).unwrap()
    }
}

/// Eastern calendar date of an instant.
pub fn eastern_date(instant: DateTime<Utc>) -> NaiveDate {
    instant.with_timezone(&EASTERN).date_naive()
}

/// The same instant carrying its Eastern UTC offset, for display.
pub fn eastern_instant(instant: DateTime<Utc>) -> DateTime<FixedOffset> {
    instant.with_timezone(&EASTERN).fixed_offset()
}

/// Next instant the reconstructor should fire: 00:15 Eastern of the following
/// local day. 00:15 never lands inside a US DST transition, so the local time
/// always exists and is unambiguous.
pub fn next_reconstruct_instant(now: DateTime<Utc>) -> DateTime<Utc> {
    let local_date = now.with_timezone(&EASTERN).date_naive();
    let next = (local_date + Duration::days(1))
        .and_hms_opt(0, 15, 0)
        .unwrap();
    EASTERN
        .from_local_datetime(&next)
        .earliest()
        .unwrap()
        .with_timezone(&Utc)
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, NaiveDate, Utc};

    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn test_ceil_to_block_rounds_up() {
        assert_eq!(
            ceil_to_block(at("2026-01-22T02:54:00Z")),
            at("2026-01-22T03:00:00Z")
        );
        assert_eq!(
            ceil_to_block(at("2026-01-22T02:30:01Z")),
            at("2026-01-22T03:00:00Z")
        );
    }

    #[test]
    fn test_ceil_to_block_on_grid() {
        assert_eq!(
            ceil_to_block(at("2026-01-22T03:00:00Z")),
            at("2026-01-22T03:00:00Z")
        );
        assert_eq!(
            ceil_to_block(at("2026-01-22T02:30:00Z")),
            at("2026-01-22T02:30:00Z")
        );
    }

    #[test]
    fn test_eastern_date_behind_utc() {
        // 02:54 UTC is still the previous evening in New York.
        assert_eq!(
            eastern_date(at("2026-01-22T02:54:00Z")),
            NaiveDate::from_ymd_opt(2026, 1, 21).unwrap()
        );
        assert_eq!(
            eastern_date(at("2026-01-22T14:00:00Z")),
            NaiveDate::from_ymd_opt(2026, 1, 22).unwrap()
        );
    }

    #[test]
    fn test_eastern_instant_offset() {
        let instant = eastern_instant(at("2026-01-22T03:00:00Z"));
        assert_eq!(instant.to_rfc3339(), "2026-01-21T22:00:00-05:00");
        let instant = eastern_instant(at("2026-07-22T03:00:00Z"));
        assert_eq!(instant.to_rfc3339(), "2026-07-21T23:00:00-04:00");
    }

    #[test]
    fn test_next_reconstruct_instant() {
        // Eastern evening: next fire is 00:15 the next local day, 05:15 UTC.
        assert_eq!(
            next_reconstruct_instant(at("2026-01-22T01:00:00Z")),
            at("2026-01-22T05:15:00Z")
        );
        // Just past the fire point: schedules a full day ahead.
        assert_eq!(
            next_reconstruct_instant(at("2026-01-22T05:20:00Z")),
            at("2026-01-23T05:15:00Z")
        );
    }
}
