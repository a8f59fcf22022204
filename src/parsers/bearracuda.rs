//! Bearracuda brand site: the homepage schedule lists one block per city
//! party. Every event from this brand is a bear event by definition.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::app::ports::FetchResult;
use crate::domain::DraftEvent;
use crate::parsers::{
    dates, decode_entities, finalize_links, resolve_url, ParseOutcome, ParserKind, SourceParser,
};
use crate::registry::{CityTable, SourceConfig};

static EVENT_BLOCKS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r#"(?is)<div[^>]*class="[^"]*event[^>]*>.*?</div>"#).unwrap(),
        Regex::new(r#"(?is)<div[^>]*class="[^"]*party[^>]*>.*?</div>"#).unwrap(),
        Regex::new(r#"(?is)<article[^>]*class="[^"]*event[^>]*>.*?</article>"#).unwrap(),
        Regex::new(r#"(?is)<section[^>]*class="[^"]*event[^>]*>.*?</section>"#).unwrap(),
        Regex::new(r#"(?is)<div[^>]*class="[^"]*card[^>]*>.*?</div>"#).unwrap(),
        Regex::new(r#"(?is)<li[^>]*class="[^"]*event[^>]*>.*?</li>"#).unwrap(),
    ]
});

static TITLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)<h[1-6][^>]*>([^<]+)</h[1-6]>|class="[^"]*(?:event-|party-)?title[^"]*"[^>]*>([^<]+)<"#)
        .unwrap()
});
static DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?is)class="[^"]*date[^"]*"[^>]*>([^<]+)<|(?:datetime|data-date)="([^"]+)"|(\d{1,2}/\d{1,2}/\d{4})|(\d{4}-\d{2}-\d{2})"#,
    )
    .unwrap()
});
static VENUE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)class="[^"]*(?:venue|location|club)[^"]*"[^>]*>([^<]+)<"#).unwrap()
});
static DESCRIPTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)class="[^"]*(?:description|details)[^"]*"[^>]*>([^<]+)<|<p[^>]*>([^<]+)</p>"#)
        .unwrap()
});
static PERFORMERS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)class="[^"]*(?:dj|performer|artist)[^"]*"[^>]*>([^<]+)<"#).unwrap()
});
static HREF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?:href|data-url)="([^"]+)""#).unwrap());

pub struct BearracudaParser;

impl BearracudaParser {
    pub fn new() -> Self {
        Self
    }
}

impl Default for BearracudaParser {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceParser for BearracudaParser {
    fn kind(&self) -> ParserKind {
        ParserKind::Bearracuda
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

        let mut events = Vec::new();
        for pattern in EVENT_BLOCKS.iter() {
            for block in pattern.find_iter(html) {
                if let Some(event) = draft_from_block(block.as_str(), &fetched.url, source) {
                    events.push(event);
                }
            }
            // First block shape that yields anything wins; the rest are
            // alternate layouts of the same markup.
            if !events.is_empty() {
                break;
            }
        }

        let additional_links = if source.discovery_depth() > 0 {
            finalize_links(brand_links(html, &fetched.url), source)
        } else {
            Vec::new()
        };

        debug!(
            source = %source.name,
            events = events.len(),
            links = additional_links.len(),
            "bearracuda parse complete"
        );
        ParseOutcome {
            events,
            additional_links,
        }
    }
}

fn draft_from_block(block: &str, page_url: &str, source: &SourceConfig) -> Option<DraftEvent> {
    let title = TITLE
        .captures(block)
        .and_then(|c| c.get(1).or_else(|| c.get(2)))
        .map(|m| decode_entities(m.as_str().trim()))
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "Bearracuda".to_string());

    let mut event = DraftEvent {
        title,
        source: source.name.clone(),
        is_bear_event: true,
        ..Default::default()
    };

    if let Some(caps) = DATE.captures(block) {
        let raw = (1..=4).find_map(|i| caps.get(i));
        event.start = raw.and_then(|m| dates::parse_single(m.as_str()));
    }
    if let Some(caps) = VENUE.captures(block) {
        event.venue = decode_entities(caps[1].trim());
    }
    if let Some(caps) = DESCRIPTION.captures(block) {
        if let Some(m) = caps.get(1).or_else(|| caps.get(2)) {
            event.description = decode_entities(m.as_str().trim());
        }
    }
    if let Some(caps) = PERFORMERS.captures(block) {
        let performers = decode_entities(caps[1].trim());
        if !performers.is_empty() {
            if event.description.is_empty() {
                event.description = format!("Performers: {performers}");
            } else {
                event.description = format!("{}\n\nPerformers: {performers}", event.description);
            }
        }
    }
    event.url = HREF
        .captures(block)
        .and_then(|c| resolve_url(&c[1], page_url))
        .unwrap_or_else(|| page_url.to_string());
    Some(event)
}

/// Detail links stay on the brand's own domain; admin and login paths are
/// never event pages.
fn brand_links(html: &str, page_url: &str) -> Vec<String> {
    let mut links = Vec::new();
    for caps in HREF.captures_iter(html) {
        let Some(url) = resolve_url(&caps[1], page_url) else {
            continue;
        };
        if !url.contains("bearracuda.com") {
            continue;
        }
        if ["/admin", "/login", "/wp-admin", "/wp-login"]
            .iter()
            .any(|p| url.contains(p))
        {
            continue;
        }
        if url.trim_end_matches('/') == page_url.trim_end_matches('/') {
            continue;
        }
        links.push(url);
    }
    links
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RawDate;
    use crate::parsers::test_support::{fetched, source_with};

    const SCHEDULE: &str = r#"
        <div class="event-block">
            <h2>BEARRACUDA ATLANTA</h2>
            <span class="date">2026-10-10</span>
            <span class="venue">Heretic</span>
            <p>Glow party with two rooms.</p>
            <span class="dj">DJ Grind</span>
            <a href="/atlanta">Details</a>
        </div>
        <div class="event-block">
            <h2>BEARRACUDA SEATTLE</h2>
            <span class="date">2026-11-14</span>
            <span class="venue">Neighbours</span>
            <a href="https://bearracuda.com/seattle">Details</a>
        </div>"#;

    #[test]
    fn schedule_blocks_become_flagged_events() {
        let parser = BearracudaParser::new();
        let outcome = parser.parse_events(
            &fetched("https://bearracuda.com/", SCHEDULE),
            &source_with("bearracuda", r#""always_bear": true"#),
            &Default::default(),
        );

        assert_eq!(outcome.events.len(), 2);
        let atlanta = &outcome.events[0];
        assert_eq!(atlanta.title, "BEARRACUDA ATLANTA");
        assert_eq!(atlanta.venue, "Heretic");
        assert!(atlanta.is_bear_event);
        assert!(atlanta.description.contains("Glow party"));
        assert!(atlanta.description.contains("Performers: DJ Grind"));
        assert_eq!(atlanta.url, "https://bearracuda.com/atlanta");
        assert_eq!(
            atlanta.start,
            Some(RawDate::DateOnly(
                chrono::NaiveDate::from_ymd_opt(2026, 10, 10).unwrap()
            ))
        );
    }

    #[test]
    fn discovery_links_stay_on_the_brand_domain() {
        let html = r#"
            <div class="event"><h2>BEARRACUDA NYC</h2></div>
            <a href="/newyork">NYC</a>
            <a href="https://bearracuda.com/atlanta">Atlanta</a>
            <a href="https://bearracuda.com/admin/edit">Admin</a>
            <a href="https://www.instagram.com/bearracuda">IG</a>"#;
        let parser = BearracudaParser::new();
        let outcome = parser.parse_events(
            &fetched("https://bearracuda.com/", html),
            &source_with("bearracuda", ""),
            &Default::default(),
        );
        assert_eq!(
            outcome.additional_links,
            vec![
                "https://bearracuda.com/newyork".to_string(),
                "https://bearracuda.com/atlanta".to_string(),
            ]
        );
    }

    #[test]
    fn a_block_with_no_markup_still_yields_the_brand_title() {
        let html = r#"<div class="card"><img src="x.jpg"></div>"#;
        let parser = BearracudaParser::new();
        let outcome = parser.parse_events(
            &fetched("https://bearracuda.com/", html),
            &source_with("bearracuda", ""),
            &Default::default(),
        );
        assert_eq!(outcome.events.len(), 1);
        assert_eq!(outcome.events[0].title, "Bearracuda");
        assert!(outcome.events[0].start.is_none());
    }
}
