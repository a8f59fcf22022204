//! Fallback parser for sites without a dedicated one. Works off common
//! container markup (event cards, articles, list entries) and leans on the
//! source configuration for anything site-specific, notably the link
//! patterns used during discovery.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use tracing::{debug, warn};

use crate::app::ports::FetchResult;
use crate::domain::DraftEvent;
use crate::parsers::{
    dates, decode_entities, finalize_links, resolve_url, ParseOutcome, ParserKind, SourceParser,
};
use crate::registry::{CityTable, SourceConfig};

static CONTAINER_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r#"(?is)<div[^>]*class="[^"]*event[^>]*>.*?</div>"#,
        r#"(?is)<div[^>]*class="[^"]*party[^>]*>.*?</div>"#,
        r#"(?is)<div[^>]*class="[^"]*show[^>]*>.*?</div>"#,
        r#"(?is)<div[^>]*class="[^"]*listing[^>]*>.*?</div>"#,
        r"(?is)<article[^>]*>.*?</article>",
        r#"(?is)<div[^>]*class="[^"]*post[^>]*>.*?</div>"#,
        r#"(?is)<div[^>]*class="[^"]*entry[^>]*>.*?</div>"#,
        r#"(?is)<li[^>]*class="[^"]*event[^>]*>.*?</li>"#,
        r#"(?is)<li[^>]*class="[^"]*party[^>]*>.*?</li>"#,
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static TITLE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)<h[1-6][^>]*>([^<]+)</h[1-6]>",
        r#"(?i)class="[^"]*title[^>]*>([^<]+)<"#,
        r#"(?i)class="[^"]*name[^>]*>([^<]+)<"#,
        r"(?i)<strong[^>]*>([^<]+)</strong>",
        r"(?i)<b[^>]*>([^<]+)</b>",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static DATE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r#"(?i)class="[^"]*date[^>]*>([^<]+)<"#,
        r#"(?i)class="[^"]*datetime[^>]*>([^<]+)<"#,
        r#"(?i)datetime="([^"]+)""#,
        r#"(?i)data-date="([^"]+)""#,
        r"(\d{1,2}/\d{1,2}/\d{4})",
        r"(\d{4}-\d{2}-\d{2})",
        r"(?i)((?:january|february|march|april|may|june|july|august|september|october|november|december)\s+\d{1,2},?\s+\d{4})",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static VENUE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r#"(?i)class="[^"]*venue[^>]*>([^<]+)<"#,
        r#"(?i)class="[^"]*location[^>]*>([^<]+)<"#,
        r#"(?i)class="[^"]*place[^>]*>([^<]+)<"#,
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static ADDRESS_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r#"(?i)class="[^"]*address[^>]*>([^<]+)<"#,
        r"(?i)(\d+\s+[^,<]+,\s*[^,<]+,\s*[A-Z]{2})",
        r"(?i)<p[^>]*>(\d+\s+[^,<]+,\s*[^,<]+,\s*[A-Z]{2})</p>",
        r#"(?i)data-address="([^"]+)""#,
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static DESCRIPTION_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r#"(?i)class="[^"]*description[^>]*>([^<]+)<"#,
        r#"(?i)class="[^"]*details[^>]*>([^<]+)<"#,
        r#"(?i)class="[^"]*summary[^>]*>([^<]+)<"#,
        r#"(?i)class="[^"]*content[^>]*>([^<]+)<"#,
        r"(?i)<p[^>]*>([^<]+)</p>",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static PRICE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r#"(?i)class="[^"]*price[^>]*>([^<]+)<"#,
        r#"(?i)class="[^"]*cost[^>]*>([^<]+)<"#,
        r"\$(\d+(?:\.\d{2})?)",
        r"(?i)(free|gratis|no charge)",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static HREF: Lazy<Regex> = Lazy::new(|| Regex::new(r#"(?i)href="([^"]+)""#).unwrap());
static DATA_URL: Lazy<Regex> = Lazy::new(|| Regex::new(r#"(?i)data-url="([^"]+)""#).unwrap());
static URL_PARTS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(https?:)//([^/]+)(/[^?#]*)?").unwrap());

const BLOCKED_LINK_HINTS: &[&str] = &[
    "/admin",
    "/login",
    "/wp-admin",
    "/wp-login",
    "/user/",
    "/profile/",
    "facebook.com",
    "twitter.com",
    "instagram.com",
    "youtube.com",
];

const EVENT_PATH_KEYWORDS: &[&str] = &["event", "party", "show", "calendar", "listing"];

const DEFAULT_MATCHES_PER_PATTERN: usize = 10;

pub struct GenericParser;

impl GenericParser {
    pub fn new() -> Self {
        Self
    }
}

impl Default for GenericParser {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceParser for GenericParser {
    fn kind(&self) -> ParserKind {
        ParserKind::Generic
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

        // The first container shape that produces events wins; trying the
        // rest would re-extract the same markup under a wider net.
        let mut events = Vec::new();
        for pattern in CONTAINER_PATTERNS.iter() {
            for m in pattern.find_iter(html) {
                events.push(draft_from_element(m.as_str(), &fetched.url, source));
            }
            if !events.is_empty() {
                break;
            }
        }

        let additional_links = if source.discovery_depth() > 0 {
            finalize_links(configured_links(html, &fetched.url, source), source)
        } else {
            Vec::new()
        };

        debug!(
            source = %source.name,
            events = events.len(),
            links = additional_links.len(),
            "generic parse complete"
        );
        ParseOutcome {
            events,
            additional_links,
        }
    }
}

fn draft_from_element(element: &str, page_url: &str, source: &SourceConfig) -> DraftEvent {
    let title = first_capture(&TITLE_PATTERNS, element)
        .unwrap_or_else(|| "Untitled Event".to_string());
    let start = first_capture(&DATE_PATTERNS, element).and_then(|raw| dates::parse_single(&raw));

    let url = HREF
        .captures(element)
        .or_else(|| DATA_URL.captures(element))
        .and_then(|caps| resolve_url(&caps[1], page_url))
        .unwrap_or_else(|| page_url.to_string());

    DraftEvent {
        title,
        venue: first_capture(&VENUE_PATTERNS, element).unwrap_or_default(),
        address: plausible_address(element).unwrap_or_default(),
        description: first_capture(&DESCRIPTION_PATTERNS, element).unwrap_or_default(),
        price: first_capture(&PRICE_PATTERNS, element).unwrap_or_default(),
        start,
        url,
        source: source.name.clone(),
        ..Default::default()
    }
}

fn first_capture(patterns: &[Regex], element: &str) -> Option<String> {
    patterns.iter().find_map(|re| {
        re.captures(element).and_then(|caps| {
            let text = collapse_whitespace(&decode_entities(&caps[1]));
            (!text.is_empty()).then_some(text)
        })
    })
}

fn plausible_address(element: &str) -> Option<String> {
    for re in ADDRESS_PATTERNS.iter() {
        if let Some(caps) = re.captures(element) {
            let cleaned = collapse_whitespace(&decode_entities(&caps[1]));
            if cleaned.len() > 10 && cleaned.chars().any(|c| c.is_ascii_digit()) {
                return Some(cleaned);
            }
        }
    }
    None
}

/// Link discovery runs off operator-supplied patterns; without them this
/// parser has no idea which hrefs are detail pages.
fn configured_links(html: &str, page_url: &str, source: &SourceConfig) -> Vec<String> {
    if source.url_patterns.is_empty() {
        warn!(
            source = %source.name,
            "generic parser needs url_patterns to discover links"
        );
        return Vec::new();
    }

    let mut seen = HashSet::new();
    let mut links = Vec::new();
    for pattern in &source.url_patterns {
        let regex = match RegexBuilder::new(&pattern.regex).case_insensitive(true).build() {
            Ok(regex) => regex,
            Err(e) => {
                warn!(source = %source.name, pattern = %pattern.regex, error = %e, "bad url pattern");
                continue;
            }
        };
        let cap = pattern.max_matches.unwrap_or(DEFAULT_MATCHES_PER_PATTERN);
        let mut taken = 0;
        for caps in regex.captures_iter(html) {
            if taken >= cap {
                break;
            }
            let Some(href) = caps.get(1) else {
                continue;
            };
            let Some(url) = resolve_url(href.as_str(), page_url) else {
                continue;
            };
            if is_event_url(&url, page_url) && seen.insert(url.clone()) {
                links.push(url);
                taken += 1;
            }
        }
    }
    links
}

/// Same-domain links whose path mentions something event-shaped.
fn is_event_url(url: &str, page_url: &str) -> bool {
    let (Some(parts), Some(page_parts)) = (URL_PARTS.captures(url), URL_PARTS.captures(page_url))
    else {
        return false;
    };
    let host = parts[2].split(':').next().unwrap_or_default();
    let page_host = page_parts[2].split(':').next().unwrap_or_default();
    if !host.contains(page_host) && !page_host.contains(host) {
        return false;
    }

    let lowered = url.to_lowercase();
    if BLOCKED_LINK_HINTS.iter().any(|h| lowered.contains(h)) {
        return false;
    }

    let path = parts.get(3).map(|m| m.as_str().to_lowercase()).unwrap_or_default();
    EVENT_PATH_KEYWORDS.iter().any(|k| path.contains(k))
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RawDate;
    use crate::parsers::test_support::{fetched, source_with};

    const LISTING: &str = r#"
        <div class="event-card">
            <h3>Woof Night</h3>
            <span class="date">2026-03-07</span>
            <span class="venue">The Bullpen</span>
            <p class="description">Monthly gathering with rotating DJs and cheap drinks all night.</p>
            <span class="price">$10</span>
            <a href="/events/woof-night">Details</a>
        </div>
        <div class="event-card">
            <h3>Trivia Tuesday</h3>
        </div>"#;

    #[test]
    fn container_markup_yields_events() {
        let parser = GenericParser::new();
        let outcome = parser.parse_events(
            &fetched("https://example.com/calendar", LISTING),
            &source_with("generic", ""),
            &Default::default(),
        );

        assert_eq!(outcome.events.len(), 2);
        let event = &outcome.events[0];
        assert_eq!(event.title, "Woof Night");
        assert_eq!(event.venue, "The Bullpen");
        assert_eq!(event.price, "$10");
        assert_eq!(event.url, "https://example.com/events/woof-night");
        assert_eq!(
            event.start,
            Some(RawDate::DateOnly(
                chrono::NaiveDate::from_ymd_opt(2026, 3, 7).unwrap()
            ))
        );
    }

    #[test]
    fn an_element_without_a_title_still_comes_through() {
        let html = r#"<div class="event"><span class="date">3/7/2026</span></div>"#;
        let parser = GenericParser::new();
        let outcome = parser.parse_events(
            &fetched("https://example.com/", html),
            &source_with("generic", ""),
            &Default::default(),
        );
        assert_eq!(outcome.events[0].title, "Untitled Event");
        assert!(outcome.events[0].start.is_some());
    }

    #[test]
    fn discovery_requires_configured_patterns() {
        let parser = GenericParser::new();
        let outcome = parser.parse_events(
            &fetched("https://example.com/calendar", LISTING),
            &source_with("generic", ""),
            &Default::default(),
        );
        assert!(outcome.additional_links.is_empty());
    }

    #[test]
    fn configured_patterns_drive_discovery() {
        let extra = r#""url_patterns": [{ "regex": "href=\"(/events/[^\"]+)\"", "max_matches": 5 }]"#;
        let parser = GenericParser::new();
        let outcome = parser.parse_events(
            &fetched("https://example.com/calendar", LISTING),
            &source_with("generic", extra),
            &Default::default(),
        );
        assert_eq!(
            outcome.additional_links,
            vec!["https://example.com/events/woof-night".to_string()]
        );
    }

    #[test]
    fn offsite_and_blocked_links_are_rejected() {
        let html = r#"
            <div class="event"><h3>Party</h3></div>
            <a href="https://other-domain.com/events/party">offsite</a>
            <a href="https://example.com/admin/events">admin</a>
            <a href="https://example.com/about">no keyword</a>
            <a href="https://example.com/party/tonight">good</a>"#;
        let extra = r#""url_patterns": [{ "regex": "href=\"([^\"]+)\"" }]"#;
        let parser = GenericParser::new();
        let outcome = parser.parse_events(
            &fetched("https://example.com/calendar", html),
            &source_with("generic", extra),
            &Default::default(),
        );
        assert_eq!(
            outcome.additional_links,
            vec!["https://example.com/party/tonight".to_string()]
        );
    }
}
