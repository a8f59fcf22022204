//! Loose date parsing shared by the site parsers.
//!
//! Listing pages rarely agree on a format. Everything here returns
//! `Option`: an unparseable string is a `None` date, never an error, and
//! the event is still emitted for the caller to keep or drop.

use chrono::{
    DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc,
};
use chrono_tz::Tz;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::domain::RawDate;

static BULLET_RANGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?ix)
        ^(?:[a-z]+,\s*)?                     # optional weekday
        ([a-z]+)\s+(\d{1,2})(?:st|nd|rd|th)? # month and day
        (?:,\s*(\d{4}))?                     # optional year
        \s*[•·]\s*
        (\d{1,2}):(\d{2})\s*(am|pm)          # start time
        (?:\s*[-–]\s*(\d{1,2}):(\d{2})\s*(am|pm))?  # optional end time
        $",
    )
    .unwrap()
});

static MONTH_DAY_YEAR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b([a-z]+)\s+(\d{1,2})(?:st|nd|rd|th)?,?\s+(\d{4})\b").unwrap()
});

static DAY_MONTH_YEAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(\d{1,2})\s+([a-z]+)\s+(\d{4})\b").unwrap());

pub fn month_number(name: &str) -> Option<u32> {
    let name = name.to_lowercase();
    let number = match name.as_str() {
        "january" | "jan" => 1,
        "february" | "feb" => 2,
        "march" | "mar" => 3,
        "april" | "apr" => 4,
        "may" => 5,
        "june" | "jun" => 6,
        "july" | "jul" => 7,
        "august" | "aug" => 8,
        "september" | "sept" | "sep" => 9,
        "october" | "oct" => 10,
        "november" | "nov" => 11,
        "december" | "dec" => 12,
        _ => return None,
    };
    Some(number)
}

/// Parses any supported date string into a start plus optional end.
pub fn parse_when(raw: &str) -> Option<(RawDate, Option<RawDate>)> {
    parse_when_on(raw, Utc::now().date_naive())
}

/// Like [`parse_when`] with an explicit reference date for year inference
/// on strings that omit the year.
pub fn parse_when_on(raw: &str, today: NaiveDate) -> Option<(RawDate, Option<RawDate>)> {
    let raw = collapse_spaces(raw);
    if let Some(range) = parse_bullet_range(&raw, today) {
        return Some(range);
    }
    parse_single(&raw).map(|start| (start, None))
}

/// Parses a single date string, preserving however much precision it
/// carries: an explicit offset stays zoned, a bare date stays a date.
pub fn parse_single(raw: &str) -> Option<RawDate> {
    let raw = collapse_spaces(raw);
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(&raw) {
        return Some(RawDate::Zoned(dt));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%z", "%Y-%m-%d %H:%M:%S %z"] {
        if let Ok(dt) = DateTime::parse_from_str(&raw, format) {
            return Some(RawDate::Zoned(dt));
        }
    }
    for format in [
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M",
    ] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(&raw, format) {
            return Some(RawDate::WallClock(dt));
        }
    }
    for format in ["%Y-%m-%d", "%m/%d/%Y", "%m-%d-%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(&raw, format) {
            return Some(RawDate::DateOnly(date));
        }
    }

    if let Some(caps) = MONTH_DAY_YEAR.captures(&raw) {
        let month = month_number(&caps[1])?;
        let day: u32 = caps[2].parse().ok()?;
        let year: i32 = caps[3].parse().ok()?;
        return NaiveDate::from_ymd_opt(year, month, day).map(RawDate::DateOnly);
    }
    if let Some(caps) = DAY_MONTH_YEAR.captures(&raw) {
        let day: u32 = caps[1].parse().ok()?;
        let month = month_number(&caps[2])?;
        let year: i32 = caps[3].parse().ok()?;
        return NaiveDate::from_ymd_opt(year, month, day).map(RawDate::DateOnly);
    }
    None
}

/// "Saturday, August 2 • 9:00 PM - 1:00 AM" listing format. An end time
/// earlier than the start rolls over to the next calendar day; a missing
/// year means the next occurrence of that month and day.
fn parse_bullet_range(raw: &str, today: NaiveDate) -> Option<(RawDate, Option<RawDate>)> {
    let caps = BULLET_RANGE.captures(raw)?;
    let month = month_number(&caps[1])?;
    let day: u32 = caps[2].parse().ok()?;
    let date = match caps.get(3) {
        Some(year) => NaiveDate::from_ymd_opt(year.as_str().parse().ok()?, month, day)?,
        None => infer_year(month, day, today)?,
    };

    let start_time = twelve_hour(&caps[4], &caps[5], &caps[6])?;
    let start = NaiveDateTime::new(date, start_time);

    let end = match (caps.get(7), caps.get(8), caps.get(9)) {
        (Some(h), Some(m), Some(half)) => {
            let end_time = twelve_hour(h.as_str(), m.as_str(), half.as_str())?;
            let end_date = if end_time < start_time {
                date + Duration::days(1)
            } else {
                date
            };
            Some(RawDate::WallClock(NaiveDateTime::new(end_date, end_time)))
        }
        _ => None,
    };

    Some((RawDate::WallClock(start), end))
}

fn twelve_hour(hour: &str, minute: &str, half: &str) -> Option<NaiveTime> {
    let hour: u32 = hour.parse().ok()?;
    let minute: u32 = minute.parse().ok()?;
    let hour = match (hour, half.to_lowercase().as_str()) {
        (12, "am") => 0,
        (12, "pm") => 12,
        (h, "pm") => h + 12,
        (h, _) => h,
    };
    NaiveTime::from_hms_opt(hour, minute, 0)
}

fn infer_year(month: u32, day: u32, today: NaiveDate) -> Option<NaiveDate> {
    let this_year = NaiveDate::from_ymd_opt(today.year(), month, day);
    match this_year {
        Some(date) if date >= today => Some(date),
        _ => NaiveDate::from_ymd_opt(today.year() + 1, month, day).or(this_year),
    }
}

/// Builds a date from the split fields some embedded JSON payloads carry
/// (date, clock time and timezone name as separate strings).
pub fn from_parts(date: &str, time: Option<&str>, tz_name: Option<&str>) -> Option<RawDate> {
    let date = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d").ok()?;
    let time = match time {
        Some(t) => {
            let t = t.trim();
            NaiveTime::parse_from_str(t, "%H:%M:%S")
                .or_else(|_| NaiveTime::parse_from_str(t, "%H:%M"))
                .ok()?
        }
        None => return Some(RawDate::DateOnly(date)),
    };
    let local = NaiveDateTime::new(date, time);

    if let Some(tz) = tz_name.and_then(|name| name.trim().parse::<Tz>().ok()) {
        if let Some(zoned) = resolve_local(tz, local) {
            return Some(RawDate::Zoned(zoned.fixed_offset()));
        }
    }
    Some(RawDate::WallClock(local))
}

/// Attaches a named zone to a wall-clock value, producing a zoned instant.
/// Values that already carry an offset, bare dates, and unknown zone names
/// pass through unchanged.
pub fn with_zone(raw: RawDate, tz_name: &str) -> RawDate {
    let Ok(tz) = tz_name.trim().parse::<Tz>() else {
        return raw;
    };
    match raw {
        RawDate::WallClock(local) => match resolve_local(tz, local) {
            Some(zoned) => RawDate::Zoned(zoned.fixed_offset()),
            None => raw,
        },
        RawDate::Zoned(_) | RawDate::DateOnly(_) => raw,
    }
}

/// Anchors a raw date to a concrete UTC instant. Values that already carry
/// an offset pass through unchanged; wall-clock values are interpreted in
/// the given zone (UTC when none is known); bare dates anchor at local
/// midnight.
pub fn anchor_to_zone(raw: RawDate, tz: Option<Tz>) -> DateTime<Utc> {
    match raw {
        RawDate::Zoned(dt) => dt.with_timezone(&Utc),
        RawDate::WallClock(local) => anchor_wall_clock(local, tz),
        RawDate::DateOnly(date) => anchor_wall_clock(date.and_time(NaiveTime::MIN), tz),
    }
}

fn anchor_wall_clock(local: NaiveDateTime, tz: Option<Tz>) -> DateTime<Utc> {
    match tz {
        Some(tz) => match resolve_local(tz, local) {
            Some(zoned) => zoned.with_timezone(&Utc),
            None => local.and_utc(),
        },
        None => local.and_utc(),
    }
}

fn resolve_local(tz: Tz, local: NaiveDateTime) -> Option<DateTime<Tz>> {
    match tz.from_local_datetime(&local) {
        LocalResult::Single(dt) => Some(dt),
        LocalResult::Ambiguous(earliest, _) => Some(earliest),
        LocalResult::None => None,
    }
}

fn collapse_spaces(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn iso_strings_keep_their_offset() {
        let parsed = parse_single("2026-09-05T21:00:00-04:00").unwrap();
        match parsed {
            RawDate::Zoned(dt) => {
                assert_eq!(dt.to_rfc3339(), "2026-09-05T21:00:00-04:00");
                assert_eq!(anchor_to_zone(parsed, None).to_rfc3339(), "2026-09-06T01:00:00+00:00");
            }
            other => panic!("expected zoned date, got {other:?}"),
        }
    }

    #[test]
    fn bare_dates_and_naive_datetimes_parse() {
        assert_eq!(
            parse_single("2026-09-05"),
            Some(RawDate::DateOnly(day(2026, 9, 5)))
        );
        assert_eq!(
            parse_single("December 31, 2026"),
            Some(RawDate::DateOnly(day(2026, 12, 31)))
        );
        assert_eq!(
            parse_single("31 December 2026"),
            Some(RawDate::DateOnly(day(2026, 12, 31)))
        );
        assert!(matches!(
            parse_single("2026-09-05T21:00"),
            Some(RawDate::WallClock(_))
        ));
        assert_eq!(parse_single("next saturday maybe"), None);
    }

    #[test]
    fn bullet_range_rolls_end_past_midnight() {
        let today = day(2026, 7, 1);
        let (start, end) =
            parse_when_on("Saturday, August 2 • 9:00 PM - 1:00 AM", today).unwrap();
        let start = match start {
            RawDate::WallClock(dt) => dt,
            other => panic!("expected wall clock, got {other:?}"),
        };
        let end = match end.unwrap() {
            RawDate::WallClock(dt) => dt,
            other => panic!("expected wall clock, got {other:?}"),
        };
        assert_eq!(start.to_string(), "2026-08-02 21:00:00");
        assert_eq!(end.to_string(), "2026-08-03 01:00:00");
    }

    #[test]
    fn bullet_without_year_picks_the_next_occurrence() {
        let today = day(2026, 11, 20);
        let (start, _) = parse_when_on("Friday, January 9 • 10:00 PM", today).unwrap();
        match start {
            RawDate::WallClock(dt) => assert_eq!(dt.to_string(), "2027-01-09 22:00:00"),
            other => panic!("expected wall clock, got {other:?}"),
        }
    }

    #[test]
    fn from_parts_anchors_with_a_known_timezone() {
        let parsed = from_parts("2026-09-05", Some("21:00"), Some("America/New_York")).unwrap();
        match parsed {
            RawDate::Zoned(dt) => {
                assert_eq!(anchor_to_zone(parsed, None).to_rfc3339(), "2026-09-06T01:00:00+00:00");
                assert_eq!(dt.offset().local_minus_utc(), -4 * 3600);
            }
            other => panic!("expected zoned date, got {other:?}"),
        }
    }

    #[test]
    fn wall_clock_anchoring_uses_the_city_zone() {
        let raw = RawDate::WallClock(day(2026, 1, 10).and_hms_opt(22, 0, 0).unwrap());
        let tz: Tz = "America/Los_Angeles".parse().unwrap();
        assert_eq!(
            anchor_to_zone(raw, Some(tz)).to_rfc3339(),
            "2026-01-11T06:00:00+00:00"
        );
        assert_eq!(anchor_to_zone(raw, None).to_rfc3339(), "2026-01-10T22:00:00+00:00");
    }
}
