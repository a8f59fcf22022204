//! Eventbrite organizer and event pages.
//!
//! Organizer pages embed the full upcoming-event list in a server-data
//! JSON payload; event detail pages expose JSON-LD. Regex card extraction
//! is the last resort for layouts that embed neither.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::debug;

use crate::app::ports::FetchResult;
use crate::domain::{Coordinates, DraftEvent, RawDate};
use crate::parsers::{
    dates, decode_entities, finalize_links, json_ld_blocks, json_ld_is_type, ParseOutcome,
    ParserKind, SourceParser,
};
use crate::registry::{CityTable, SourceConfig};

static EVENT_LINK_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r#"href="([^"]*eventbrite\.com/e/[^"]*)""#).unwrap(),
        Regex::new(r#"href="(/e/[^"]*)""#).unwrap(),
        Regex::new(r#"href='([^']*eventbrite\.com/e/[^']*)'"#).unwrap(),
        Regex::new(r#"href='(/e/[^']*)'"#).unwrap(),
    ]
});

static CARD_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)<(?:div|article|li)[^>]*(?:data-testid="event-card|class="[^"]*event-card)[^>]*>.*?</(?:div|article|li)>"#)
        .unwrap()
});
static CARD_TITLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<h[1-6][^>]*>([^<]+)</h[1-6]>").unwrap());
static CARD_HREF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"href="([^"]*/e/[^"]*)""#).unwrap());
static CARD_DATETIME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?:datetime|data-date)="([^"]+)"|(\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2})"#)
        .unwrap()
});
static CARD_VENUE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)<(?:span|div|p)[^>]*class="[^"]*(?:location|venue)[^"]*"[^>]*>([^<]+)<"#)
        .unwrap()
});

pub struct EventbriteParser;

impl EventbriteParser {
    pub fn new() -> Self {
        Self
    }
}

impl Default for EventbriteParser {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceParser for EventbriteParser {
    fn kind(&self) -> ParserKind {
        ParserKind::Eventbrite
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
        let html = &fetched.content;

        let mut events = embedded_events(html, source);
        if events.is_empty() {
            events = json_ld_blocks(html)
                .iter()
                .filter(|v| json_ld_is_type(v, "Event"))
                .filter_map(|v| draft_from_json_ld(v, source))
                .collect();
        }
        if events.is_empty() {
            events = card_events(html, source);
        }

        let additional_links = if source.discovery_depth() > 0 {
            finalize_links(event_links(html), source)
        } else {
            Vec::new()
        };

        debug!(
            source = %source.name,
            events = events.len(),
            links = additional_links.len(),
            "eventbrite parse complete"
        );
        ParseOutcome {
            events,
            additional_links,
        }
    }
}

/// Events from the embedded server-data payloads. The organizer page
/// exposes `view_data.events.future_events`; other layouts bury event
/// objects deeper, found by a bounded recursive scan.
fn embedded_events(html: &str, source: &SourceConfig) -> Vec<DraftEvent> {
    let mut events = Vec::new();
    for marker in ["window.__SERVER_DATA__", "window.__INITIAL_STATE__"] {
        let Some(json) = balanced_json_after(html, marker) else {
            continue;
        };
        let Ok(value) = serde_json::from_str::<Value>(json) else {
            debug!(marker, "embedded payload is not valid JSON");
            continue;
        };
        if let Some(future) = value
            .pointer("/view_data/events/future_events")
            .and_then(Value::as_array)
        {
            for item in future {
                match draft_from_embedded(item, source) {
                    Some(event) => events.push(event),
                    None => debug!("skipping malformed embedded event"),
                }
            }
        }
        if events.is_empty() {
            scan_for_events(&value, source, &mut events, 0);
        }
        if !events.is_empty() {
            break;
        }
    }
    events
}

/// Extracts the balanced JSON object assigned right after a marker such
/// as `window.__SERVER_DATA__ =`. Braces inside string literals are
/// ignored.
fn balanced_json_after<'a>(html: &'a str, marker: &str) -> Option<&'a str> {
    let rest = &html[html.find(marker)? + marker.len()..];
    let start = rest.find('{')?;
    let bytes = rest.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&rest[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Walks a JSON payload looking for objects that carry both a name and a
/// start date. Depth-capped so hostile payloads cannot recurse away.
fn scan_for_events(value: &Value, source: &SourceConfig, out: &mut Vec<DraftEvent>, depth: usize) {
    if depth > 12 {
        return;
    }
    match value {
        Value::Array(items) => {
            for item in items {
                scan_for_events(item, source, out, depth + 1);
            }
        }
        Value::Object(map) => {
            let named = map.contains_key("name") || map.contains_key("title");
            let dated = map.contains_key("start")
                || map.contains_key("start_date")
                || map.contains_key("startDate");
            if named && dated {
                if let Some(event) = draft_from_embedded(value, source) {
                    out.push(event);
                    return;
                }
            }
            for child in map.values() {
                scan_for_events(child, source, out, depth + 1);
            }
        }
        _ => {}
    }
}

fn draft_from_embedded(value: &Value, source: &SourceConfig) -> Option<DraftEvent> {
    let title = value
        .pointer("/name/text")
        .and_then(Value::as_str)
        .or_else(|| value.get("name").and_then(Value::as_str))
        .or_else(|| value.get("title").and_then(Value::as_str))?
        .trim()
        .to_string();
    if title.is_empty() {
        return None;
    }

    let mut event = DraftEvent {
        title,
        source: source.name.clone(),
        ..Default::default()
    };
    event.description = value
        .pointer("/description/text")
        .and_then(Value::as_str)
        .or_else(|| value.get("summary").and_then(Value::as_str))
        .or_else(|| value.get("description").and_then(Value::as_str))
        .unwrap_or_default()
        .trim()
        .to_string();
    event.start = embedded_date(value, "start");
    event.end = embedded_date(value, "end");
    event.url = value
        .get("url")
        .and_then(Value::as_str)
        .or_else(|| value.get("vanity_url").and_then(Value::as_str))
        .unwrap_or_default()
        .to_string();
    event.venue = value
        .pointer("/venue/name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string();
    event.address = value
        .pointer("/venue/address/localized_address_display")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string();
    event.coordinates = match (
        value.pointer("/venue/address/latitude").and_then(json_number),
        value.pointer("/venue/address/longitude").and_then(json_number),
    ) {
        (Some(lat), Some(lng)) => Some(Coordinates { lat, lng }),
        _ => None,
    };
    event.price = value
        .pointer("/ticket_availability/minimum_ticket_price/display")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    event.image = value
        .pointer("/logo/url")
        .and_then(Value::as_str)
        .or_else(|| value.pointer("/image/url").and_then(Value::as_str))
        .unwrap_or_default()
        .to_string();
    Some(event)
}

/// A date from the embedded payload: either an object with `utc`/`local`
/// plus a zone name, or split `_date`/`_time` string fields.
fn embedded_date(value: &Value, which: &str) -> Option<RawDate> {
    if let Some(raw) = value.get(which).and_then(json_date) {
        return Some(raw);
    }
    let date = value.get(format!("{which}_date")).and_then(Value::as_str)?;
    let time = value
        .get(format!("{which}_time"))
        .and_then(Value::as_str);
    let tz = value.get("timezone").and_then(Value::as_str);
    dates::from_parts(date, time, tz)
}

fn json_date(value: &Value) -> Option<RawDate> {
    match value {
        Value::String(s) => dates::parse_single(s),
        Value::Object(map) => {
            if let Some(raw) = map.get("utc").and_then(Value::as_str).and_then(dates::parse_single) {
                return Some(raw);
            }
            let local = map.get("local").and_then(Value::as_str)?;
            let raw = dates::parse_single(local)?;
            match map.get("timezone").and_then(Value::as_str) {
                Some(tz) => Some(dates::with_zone(raw, tz)),
                None => Some(raw),
            }
        }
        _ => None,
    }
}

fn json_number(value: &Value) -> Option<f64> {
    value
        .as_f64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
}

fn draft_from_json_ld(value: &Value, source: &SourceConfig) -> Option<DraftEvent> {
    let title = value.get("name").and_then(Value::as_str)?.trim().to_string();
    if title.is_empty() {
        return None;
    }

    let mut event = DraftEvent {
        title,
        source: source.name.clone(),
        ..Default::default()
    };
    event.description = value
        .get("description")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string();
    event.start = value
        .get("startDate")
        .and_then(Value::as_str)
        .and_then(dates::parse_single);
    event.end = value
        .get("endDate")
        .and_then(Value::as_str)
        .and_then(dates::parse_single);
    event.url = value
        .get("url")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    match value.get("location") {
        Some(Value::String(name)) => event.venue = name.trim().to_string(),
        Some(location @ Value::Object(_)) => {
            event.venue = location
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .trim()
                .to_string();
            event.address = match location.get("address") {
                Some(Value::String(s)) => s.trim().to_string(),
                Some(address @ Value::Object(_)) => ["streetAddress", "addressLocality", "addressRegion"]
                    .iter()
                    .filter_map(|k| address.get(*k).and_then(Value::as_str))
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .collect::<Vec<_>>()
                    .join(", "),
                _ => String::new(),
            };
            event.coordinates = match (
                location.pointer("/geo/latitude").and_then(json_number),
                location.pointer("/geo/longitude").and_then(json_number),
            ) {
                (Some(lat), Some(lng)) => Some(Coordinates { lat, lng }),
                _ => None,
            };
        }
        _ => {}
    }

    event.image = match value.get("image") {
        Some(Value::String(s)) => s.to_string(),
        Some(Value::Array(items)) => items
            .first()
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        Some(obj @ Value::Object(_)) => obj
            .get("url")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        _ => String::new(),
    };
    event.price = match value.get("offers") {
        Some(offers @ Value::Object(_)) => offer_price(offers),
        Some(Value::Array(items)) => items.first().map(offer_price).unwrap_or_default(),
        _ => String::new(),
    };
    Some(event)
}

fn offer_price(offer: &Value) -> String {
    offer
        .get("price")
        .or_else(|| offer.get("lowPrice"))
        .map(|v| match v {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            _ => String::new(),
        })
        .unwrap_or_default()
}

/// Last-resort extraction from event-card markup. Each card is parsed in
/// isolation so one broken card never drops its siblings.
fn card_events(html: &str, source: &SourceConfig) -> Vec<DraftEvent> {
    let mut events = Vec::new();
    for block in CARD_BLOCK.find_iter(html) {
        if let Some(event) = draft_from_card(block.as_str(), source) {
            events.push(event);
        }
    }
    events
}

fn draft_from_card(card: &str, source: &SourceConfig) -> Option<DraftEvent> {
    let title = CARD_TITLE
        .captures(card)
        .map(|c| decode_entities(c[1].trim()))?;
    if title.is_empty() {
        return None;
    }
    let mut event = DraftEvent {
        title,
        source: source.name.clone(),
        ..Default::default()
    };
    if let Some(caps) = CARD_HREF.captures(card) {
        event.url = absolute_event_url(&caps[1]);
    }
    if let Some(caps) = CARD_DATETIME.captures(card) {
        let raw = caps.get(1).or_else(|| caps.get(2));
        event.start = raw.and_then(|m| dates::parse_single(m.as_str()));
    }
    if let Some(caps) = CARD_VENUE.captures(card) {
        event.venue = decode_entities(caps[1].trim());
    }
    Some(event)
}

/// Harvests `/e/` event links for the discovery pass: absolutized,
/// query-stripped and restricted to the Eventbrite domain.
fn event_links(html: &str) -> Vec<String> {
    let mut links = Vec::new();
    for pattern in EVENT_LINK_PATTERNS.iter() {
        for caps in pattern.captures_iter(html) {
            let mut url = absolute_event_url(&caps[1]);
            if let Some((base, _query)) = url.split_once('?') {
                url = base.to_string();
            }
            if url.contains("eventbrite.com") && url.contains("/e/") {
                links.push(url);
            }
        }
    }
    links
}

fn absolute_event_url(href: &str) -> String {
    let href = decode_entities(href);
    if href.starts_with('/') {
        format!("https://www.eventbrite.com{href}")
    } else {
        href
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsers::test_support::{fetched, source_with};
    use crate::registry::CityTable;

    fn organizer_page() -> String {
        let server_data = r#"{
            "view_data": {
                "events": {
                    "future_events": [
                        {
                            "name": { "text": "MEGAWOOF: DURO" },
                            "url": "https://www.eventbrite.com/e/megawoof-duro-tickets-1001",
                            "start_date": "2026-09-05",
                            "start_time": "21:00",
                            "end_date": "2026-09-06",
                            "end_time": "02:00",
                            "timezone": "America/Los_Angeles",
                            "venue": {
                                "name": "Catch One",
                                "address": {
                                    "localized_address_display": "4067 W Pico Blvd, Los Angeles, CA",
                                    "latitude": "34.0480",
                                    "longitude": "-118.3230"
                                }
                            },
                            "ticket_availability": {
                                "minimum_ticket_price": { "display": "$20.00" }
                            },
                            "logo": { "url": "https://img.evbuc.com/duro.jpg" }
                        },
                        { "url": "https://www.eventbrite.com/e/broken-no-name" }
                    ]
                }
            }
        }"#;
        format!(
            r#"<html><head><script>window.__SERVER_DATA__ = {server_data};</script></head>
            <body>
              <a href="/e/megawoof-duro-tickets-1001?aff=ebdssbdestsearch">Tickets</a>
              <a href="https://www.eventbrite.com/e/megawoof-duro-tickets-1001">Tickets again</a>
              <a href="https://www.eventbrite.com/o/megawoof-18118960687">Organizer</a>
            </body></html>"#
        )
    }

    #[test]
    fn organizer_page_yields_events_and_links() {
        let parser = EventbriteParser::new();
        let source = source_with("eventbrite", r#""always_bear": true"#);
        let outcome = parser.parse_events(
            &fetched("https://www.eventbrite.com/o/megawoof", &organizer_page()),
            &source,
            &CityTable::default(),
        );

        // The entry with no name is skipped, not fatal.
        assert_eq!(outcome.events.len(), 1);
        let event = &outcome.events[0];
        assert_eq!(event.title, "MEGAWOOF: DURO");
        assert_eq!(event.venue, "Catch One");
        assert_eq!(event.price, "$20.00");
        assert_eq!(event.source, "test-source");
        let coords = event.coordinates.unwrap();
        assert!((coords.lat - 34.048).abs() < 1e-6);
        assert!(matches!(event.start, Some(RawDate::Zoned(_))));

        // Query strings are stripped and duplicates collapse to one link.
        assert_eq!(
            outcome.additional_links,
            vec!["https://www.eventbrite.com/e/megawoof-duro-tickets-1001".to_string()]
        );
    }

    #[test]
    fn detail_page_json_ld_is_parsed() {
        let html = r#"<html><head>
            <script type="application/ld+json">
            {
                "@context": "https://schema.org",
                "@type": "Event",
                "name": "Bear Night at the Eagle",
                "startDate": "2026-10-03T22:00:00-04:00",
                "location": {
                    "@type": "Place",
                    "name": "The Eagle NYC",
                    "address": { "streetAddress": "554 W 28th St", "addressLocality": "New York" },
                    "geo": { "latitude": 40.7510, "longitude": -74.0039 }
                },
                "offers": { "@type": "Offer", "price": "15" },
                "image": "https://img.evbuc.com/eagle.jpg",
                "description": "Woof."
            }
            </script></head><body></body></html>"#;

        let parser = EventbriteParser::new();
        let outcome = parser.parse_events(
            &fetched("https://www.eventbrite.com/e/bear-night-1", html),
            &source_with("eventbrite", ""),
            &CityTable::default(),
        );
        assert_eq!(outcome.events.len(), 1);
        let event = &outcome.events[0];
        assert_eq!(event.venue, "The Eagle NYC");
        assert_eq!(event.address, "554 W 28th St, New York");
        assert_eq!(event.price, "15");
        assert!(matches!(event.start, Some(RawDate::Zoned(_))));
    }

    #[test]
    fn card_markup_is_the_fallback() {
        let html = r#"
            <div data-testid="event-card-1">
              <h3>Furry Friday</h3>
              <a href="/e/furry-friday-42">link</a>
              <time datetime="2026-08-28T21:00:00">Aug 28</time>
              <span class="card-location">The Cuff</span>
            </div>"#;
        let parser = EventbriteParser::new();
        let outcome = parser.parse_events(
            &fetched("https://www.eventbrite.com/o/someone", html),
            &source_with("eventbrite", ""),
            &CityTable::default(),
        );
        assert_eq!(outcome.events.len(), 1);
        assert_eq!(outcome.events[0].title, "Furry Friday");
        assert_eq!(outcome.events[0].venue, "The Cuff");
        assert!(matches!(outcome.events[0].start, Some(RawDate::WallClock(_))));
    }

    #[test]
    fn empty_or_failed_fetches_yield_nothing() {
        let parser = EventbriteParser::new();
        let mut result = fetched("https://www.eventbrite.com/o/x", "<html></html>");
        result.success = false;
        let outcome = parser.parse_events(
            &result,
            &source_with("eventbrite", ""),
            &CityTable::default(),
        );
        assert!(outcome.events.is_empty());
        assert!(outcome.additional_links.is_empty());
    }
}
