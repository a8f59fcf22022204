//! Calendar-feed ingestion. Some sources publish a plain ICS feed instead
//! of an event page; every VEVENT becomes a draft. Feed descriptions may
//! carry `Key: Value` metadata lines which are lifted into fields, with the
//! remaining prose kept as the description.

use icalendar::{
    parser::{read_calendar, unfold, Component},
    CalendarDateTime, DatePerhapsTime,
};
use tracing::{debug, warn};

use crate::app::ports::FetchResult;
use crate::domain::{Coordinates, DraftEvent, RawDate};
use crate::parsers::{classify_bear, dates, ParseOutcome, ParserKind, SourceParser};
use crate::pipeline::notes;
use crate::registry::{CityTable, SourceConfig};

pub struct IcalParser;

impl IcalParser {
    pub fn new() -> Self {
        Self
    }
}

impl Default for IcalParser {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceParser for IcalParser {
    fn kind(&self) -> ParserKind {
        ParserKind::Ical
    }

    fn parse_events(
        &self,
        fetched: &FetchResult,
        source: &SourceConfig,
        _cities: &CityTable,
    ) -> ParseOutcome {
        if !fetched.has_content() {
            return ParseOutcome::empty();
        }
        let unfolded = unfold(&fetched.content);
        let calendar = match read_calendar(&unfolded) {
            Ok(calendar) => calendar,
            Err(e) => {
                warn!(source = %source.name, url = %fetched.url, error = %e, "unreadable calendar feed");
                return ParseOutcome::empty();
            }
        };

        let events: Vec<DraftEvent> = calendar
            .components
            .iter()
            .filter(|c| c.name == "VEVENT")
            .map(|vevent| draft_from_vevent(vevent, &fetched.url, source))
            .collect();

        debug!(source = %source.name, events = events.len(), "calendar feed parsed");
        ParseOutcome {
            events,
            additional_links: Vec::new(),
        }
    }
}

fn draft_from_vevent(vevent: &Component, feed_url: &str, source: &SourceConfig) -> DraftEvent {
    let mut event = DraftEvent {
        title: text_prop(vevent, "SUMMARY").unwrap_or_default(),
        venue: text_prop(vevent, "LOCATION").unwrap_or_default(),
        url: text_prop(vevent, "URL").unwrap_or_else(|| feed_url.to_string()),
        start: date_prop(vevent, "DTSTART"),
        end: date_prop(vevent, "DTEND"),
        coordinates: geo_prop(vevent),
        source: source.name.clone(),
        ..Default::default()
    };

    if let Some(raw_description) = text_prop(vevent, "DESCRIPTION") {
        let (fields, prose) = notes::extract_known_fields(&raw_description);
        event.description = prose;
        for (name, value) in fields {
            event.set_text_field(name, value);
        }
    }

    event.is_bear_event = classify_bear(&event, source);
    event
}

fn text_prop(component: &Component, name: &str) -> Option<String> {
    component
        .find_prop(name)
        .map(|prop| unescape_ics(prop.val.as_ref()))
}

fn date_prop(component: &Component, name: &str) -> Option<RawDate> {
    let prop = component.find_prop(name)?;
    let parsed = DatePerhapsTime::try_from(prop).ok()?;
    Some(match parsed {
        DatePerhapsTime::Date(date) => RawDate::DateOnly(date),
        DatePerhapsTime::DateTime(value) => match value {
            CalendarDateTime::Utc(dt) => RawDate::Zoned(dt.fixed_offset()),
            CalendarDateTime::Floating(naive) => RawDate::WallClock(naive),
            CalendarDateTime::WithTimezone { date_time, tzid } => {
                dates::with_zone(RawDate::WallClock(date_time), &tzid)
            }
        },
    })
}

/// `GEO:lat;lng` per RFC 5545.
fn geo_prop(component: &Component) -> Option<Coordinates> {
    let val = component.find_prop("GEO")?.val.to_string();
    let (lat, lng) = val.split_once(';')?;
    Some(Coordinates {
        lat: lat.trim().parse().ok()?,
        lng: lng.trim().parse().ok()?,
    })
}

/// RFC 5545 text escapes: `\n` for newline, plus escaped comma, semicolon,
/// and backslash.
fn unescape_ics(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') | Some('N') => out.push('\n'),
            Some(escaped) => out.push(escaped),
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsers::test_support::{fetched, source};
    use chrono::{NaiveDate, Timelike};

    const FEED: &str = "BEGIN:VCALENDAR\r\n\
VERSION:2.0\r\n\
PRODID:-//chunky//feed//EN\r\n\
BEGIN:VEVENT\r\n\
UID:woof-night-1\r\n\
SUMMARY:Woof Night\r\n\
LOCATION:The Eagle\\, SF\r\n\
URL:https://example.com/woof\r\n\
DTSTART:20260314T050000Z\r\n\
DTEND:20260314T090000Z\r\n\
DESCRIPTION:Bears and cubs welcome.\\nig: https://instagram.com/woofnight\r\n\
GEO:37.7702;-122.4132\r\n\
END:VEVENT\r\n\
BEGIN:VEVENT\r\n\
UID:bear-week-1\r\n\
SUMMARY:Bear Week Kickoff with a very long name that the feed \r\n\
\x20publisher folded across lines\r\n\
DTSTART;VALUE=DATE:20260701\r\n\
END:VEVENT\r\n\
END:VCALENDAR\r\n";

    #[test]
    fn every_vevent_becomes_a_draft() {
        let parser = IcalParser::new();
        let outcome = parser.parse_events(
            &fetched("https://example.com/feed.ics", FEED),
            &source("ical"),
            &Default::default(),
        );
        assert_eq!(outcome.events.len(), 2);
        assert!(outcome.additional_links.is_empty());
    }

    #[test]
    fn utc_times_and_escaped_text_carry_through() {
        let parser = IcalParser::new();
        let outcome = parser.parse_events(
            &fetched("https://example.com/feed.ics", FEED),
            &source("ical"),
            &Default::default(),
        );
        let event = &outcome.events[0];
        assert_eq!(event.title, "Woof Night");
        assert_eq!(event.venue, "The Eagle, SF");
        assert_eq!(event.url, "https://example.com/woof");
        assert!(event.is_bear_event, "woof is a bear keyword");

        match event.start {
            Some(RawDate::Zoned(dt)) => {
                assert_eq!(dt.hour(), 5);
                assert_eq!(dt.offset().local_minus_utc(), 0);
            }
            other => panic!("expected zoned start, got {other:?}"),
        }
        let coords = event.coordinates.unwrap();
        assert!((coords.lat - 37.7702).abs() < 1e-9);
    }

    #[test]
    fn description_metadata_lines_become_fields() {
        let parser = IcalParser::new();
        let outcome = parser.parse_events(
            &fetched("https://example.com/feed.ics", FEED),
            &source("ical"),
            &Default::default(),
        );
        let event = &outcome.events[0];
        assert_eq!(event.instagram, "https://instagram.com/woofnight");
        assert_eq!(event.description, "Bears and cubs welcome.");
    }

    #[test]
    fn folded_lines_and_all_day_dates_unfold() {
        let parser = IcalParser::new();
        let outcome = parser.parse_events(
            &fetched("https://example.com/feed.ics", FEED),
            &source("ical"),
            &Default::default(),
        );
        let event = &outcome.events[1];
        assert!(event.title.ends_with("folded across lines"));
        assert_eq!(
            event.start,
            Some(RawDate::DateOnly(
                NaiveDate::from_ymd_opt(2026, 7, 1).unwrap()
            ))
        );
        assert_eq!(event.url, "https://example.com/feed.ics");
    }

    #[test]
    fn garbage_feeds_yield_nothing() {
        let parser = IcalParser::new();
        let outcome = parser.parse_events(
            &fetched("https://example.com/feed.ics", "<html>not a feed</html>"),
            &source("ical"),
            &Default::default(),
        );
        assert!(outcome.events.is_empty());
    }
}
