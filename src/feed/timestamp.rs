//! Entry timestamp resolution.
//!
//! Feed dates come in two flavours: Atom uses RFC 3339 offset date-times,
//! RSS uses the RFC 1123 / RFC 2822 style. Parsed instants are clamped so a
//! record never claims to be from the future, and callers fall back to the
//! start of the current local day when no usable date exists.
use chrono::{DateTime, FixedOffset, Local, NaiveTime, TimeZone, Utc};

/// Date standard used by a feed flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateFormat {
    /// `2024-10-02T15:00:00Z`, `2024-10-02T17:00:00.5+02:00` (Atom)
    OffsetDateTime,
    /// `Wed, 02 Oct 2024 15:00:00 GMT` (RSS `pubDate`)
    Rfc1123,
}

/// Offset date-times without seconds are legal ISO-8601 but rejected by
/// `parse_from_rfc3339`.
const OFFSET_DATE_TIME_NO_SECONDS: &str = "%Y-%m-%dT%H:%M%:z";

/// Resolve `text` to epoch seconds, clamped to the current instant.
///
/// Returns `None` when the text does not parse in the given format. That is
/// not an error: callers substitute [`fallback_timestamp`].
pub fn resolve(text: &str, format: DateFormat) -> Option<i64> {
    resolve_at(text, format, Utc::now())
}

/// Same as [`resolve`] with an explicit "now".
pub fn resolve_at(text: &str, format: DateFormat, now: DateTime<Utc>) -> Option<i64> {
    let parsed = parse(text.trim(), format)?;
    let instant = parsed.with_timezone(&Utc);

    // Disallow entries from the future
    let instant = if instant > now { now } else { instant };
    Some(instant.timestamp())
}

fn parse(text: &str, format: DateFormat) -> Option<DateTime<FixedOffset>> {
    match format {
        DateFormat::OffsetDateTime => DateTime::parse_from_rfc3339(text)
            .or_else(|_| parse_offset_without_seconds(text))
            .ok(),
        DateFormat::Rfc1123 => DateTime::parse_from_rfc2822(text).ok(),
    }
}

fn parse_offset_without_seconds(text: &str) -> chrono::ParseResult<DateTime<FixedOffset>> {
    // `%:z` does not accept a literal `Z`
    match text.strip_suffix('Z').or_else(|| text.strip_suffix('z')) {
        Some(rest) => {
            DateTime::parse_from_str(&format!("{rest}+00:00"), OFFSET_DATE_TIME_NO_SECONDS)
        }
        None => DateTime::parse_from_str(text, OFFSET_DATE_TIME_NO_SECONDS),
    }
}

/// Epoch seconds for 00:00:00 of the current local day.
///
/// Recomputed on every call. Entries without a usable date therefore sort
/// as "today" instead of as the epoch.
pub fn fallback_timestamp() -> i64 {
    fallback_timestamp_at(Utc::now())
}

/// Start of the local day containing `now`.
pub fn fallback_timestamp_at(now: DateTime<Utc>) -> i64 {
    start_of_day(now.with_timezone(&Local))
}

fn start_of_day<Tz: TimeZone>(now: DateTime<Tz>) -> i64 {
    let tz = now.timezone();
    let date = now.date_naive();

    // DST gaps can swallow local midnight; walk forward to the first valid time
    for hour in 0..24 {
        let Some(time) = NaiveTime::from_hms_opt(hour, 0, 0) else {
            continue;
        };
        if let Some(start) = tz.from_local_datetime(&date.and_time(time)).earliest() {
            return start.timestamp();
        }
    }

    date.and_time(NaiveTime::MIN).and_utc().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, FixedOffset};

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_rfc1123_gmt() {
        let ts = resolve_at(
            "Wed, 02 Oct 2024 15:00:00 GMT",
            DateFormat::Rfc1123,
            fixed_now(),
        );
        assert_eq!(ts, Some(1727881200));
    }

    #[test]
    fn test_rfc1123_numeric_offset() {
        let ts = resolve_at(
            "Wed, 02 Oct 2024 17:00:00 +0200",
            DateFormat::Rfc1123,
            fixed_now(),
        );
        assert_eq!(ts, Some(1727881200));
    }

    #[test]
    fn test_rfc1123_surrounding_whitespace() {
        let ts = resolve_at(
            "\n    Wed, 02 Oct 2024 15:00:00 GMT\n  ",
            DateFormat::Rfc1123,
            fixed_now(),
        );
        assert_eq!(ts, Some(1727881200));
    }

    #[test]
    fn test_offset_date_time_utc() {
        let ts = resolve_at(
            "2024-10-02T15:00:00Z",
            DateFormat::OffsetDateTime,
            fixed_now(),
        );
        assert_eq!(ts, Some(1727881200));
    }

    #[test]
    fn test_offset_date_time_fractional_and_offset() {
        let ts = resolve_at(
            "2024-10-02T17:00:00.250+02:00",
            DateFormat::OffsetDateTime,
            fixed_now(),
        );
        assert_eq!(ts, Some(1727881200));
    }

    #[test]
    fn test_offset_date_time_without_seconds() {
        let now = fixed_now();
        assert_eq!(
            resolve_at("2024-10-02T15:00Z", DateFormat::OffsetDateTime, now),
            Some(1727881200)
        );
        assert_eq!(
            resolve_at("2024-10-02T17:00+02:00", DateFormat::OffsetDateTime, now),
            Some(1727881200)
        );
    }

    #[test]
    fn test_wrong_format_is_unresolved() {
        let now = fixed_now();
        assert_eq!(
            resolve_at(
                "Wed, 02 Oct 2024 15:00:00 GMT",
                DateFormat::OffsetDateTime,
                now
            ),
            None
        );
        assert_eq!(
            resolve_at("2024-10-02T15:00:00Z", DateFormat::Rfc1123, now),
            None
        );
    }

    #[test]
    fn test_garbage_is_unresolved() {
        assert_eq!(resolve("", DateFormat::Rfc1123), None);
        assert_eq!(resolve("yesterday", DateFormat::OffsetDateTime), None);
    }

    #[test]
    fn test_local_time_without_offset_is_unresolved() {
        assert_eq!(
            resolve("2024-10-02T15:00:00", DateFormat::OffsetDateTime),
            None
        );
    }

    #[test]
    fn test_future_date_clamped_to_now() {
        let now = fixed_now();
        let ts = resolve_at("2999-01-01T00:00:00Z", DateFormat::OffsetDateTime, now);
        assert_eq!(ts, Some(now.timestamp()));
    }

    #[test]
    fn test_exactly_now_is_kept() {
        let now = fixed_now();
        let ts = resolve_at("2025-06-01T12:00:00Z", DateFormat::OffsetDateTime, now);
        assert_eq!(ts, Some(now.timestamp()));
    }

    #[test]
    fn test_future_date_clamped_with_real_clock() {
        let before = Utc::now().timestamp();
        let ts = resolve("01 Jan 2999 00:00:00 GMT", DateFormat::Rfc1123).unwrap();
        let after = Utc::now().timestamp();
        assert!(ts >= before && ts <= after);
    }

    #[test]
    fn test_start_of_day_utc() {
        let now = Utc.with_ymd_and_hms(2024, 10, 2, 15, 30, 45).unwrap();
        assert_eq!(start_of_day(now), 1727827200);
    }

    #[test]
    fn test_start_of_day_fixed_offset() {
        let tz = FixedOffset::east_opt(2 * 3600).unwrap();
        let now = tz.with_ymd_and_hms(2024, 10, 2, 1, 0, 0).unwrap();
        // Local midnight at +02:00 is 22:00 UTC the previous day
        assert_eq!(start_of_day(now), 1727827200 - 2 * 3600);
    }

    #[test]
    fn test_fallback_is_start_of_local_day_of_now() {
        let now = fixed_now();
        let fallback = fallback_timestamp_at(now);
        assert_eq!(fallback, start_of_day(now.with_timezone(&Local)));
        assert!(fallback <= now.timestamp());
        assert!(now.timestamp() - fallback < Duration::days(1).num_seconds() + 3600);
    }
}
