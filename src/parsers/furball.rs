//! Furball brand site, a page-builder layout where each party lives in a
//! rich-text component followed by its flyer image. Furball parties always
//! run 10 PM to 2 AM the next morning; only the calendar date is printed.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::app::ports::FetchResult;
use crate::domain::{DraftEvent, RawDate};
use crate::parsers::{
    dates, decode_entities, finalize_links, ParseOutcome, ParserKind, SourceParser,
};
use crate::registry::{CityTable, SourceConfig};

static RICH_TEXT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)<div[^>]*class="[^"]*wixui-rich-text[^"]*"[^>]*>(.*?)</div>"#).unwrap()
});
static IMAGE_COMPONENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)<div[^>]*class="[^"]*wixui-image[^"]*"[^>]*>(.*?)</div>"#).unwrap()
});
static IMG_SRC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)<img[^>]+src="([^"]+)""#).unwrap());
static BLOCK_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(january|february|march|april|may|june|july|august|september|october|november|december|jan|feb|mar|apr|jun|jul|aug|sept?|oct|nov|dec)\s+(\d{1,2}),\s*(\d{4})")
        .unwrap()
});
static EVENT_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)FURBALL\s+([^-]+?)\s+([A-Z][a-zA-Z\s]+?)\s*-\s*([A-Z][^!]+)").unwrap()
});
static ANCHOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?is)<a[^>]+href="([^"]+)"[^>]*>(.*?)</a>"#).unwrap());
static TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").unwrap());
static BREAKS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<br[^>]*/?>").unwrap());
static CDN_DIMENSIONS: Lazy<Regex> = Lazy::new(|| Regex::new(r"w_(\d+),h_(\d+)").unwrap());

const PROMO_TAILS: &[&str] = &[
    "More Info Here",
    "FOXY Tickets Here",
    "Tickets Here",
    "Buy Tickets",
    "Purchase",
];

const TICKET_KEYWORDS: &[&str] = &["ticket", "buy", "purchase", "eventbrite", "ticketweb"];

const SKIP_IMAGE_HINTS: &[&str] = &[
    "logo", "icon", "favicon", "button", "arrow", "social", "facebook", "twitter", "instagram",
    "youtube", "placeholder", "loading", "spinner", "footer", "header", "nav", "menu",
];

pub struct FurballParser;

impl FurballParser {
    pub fn new() -> Self {
        Self
    }
}

impl Default for FurballParser {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceParser for FurballParser {
    fn kind(&self) -> ParserKind {
        ParserKind::Furball
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
        let mut links = Vec::new();
        for component in RICH_TEXT.captures_iter(html) {
            let block = &component[1];
            if !block.to_uppercase().contains("FURBALL") || !BLOCK_DATE.is_match(block) {
                continue;
            }
            let block_end = component.get(0).map(|m| m.end()).unwrap_or(0);
            if let Some(event) = draft_from_block(block, html, block_end, &fetched.url, source) {
                events.push(event);
            }
            links.extend(ticket_links(block));
        }

        let additional_links = if source.discovery_depth() > 0 {
            finalize_links(links, source)
        } else {
            Vec::new()
        };

        debug!(
            source = %source.name,
            events = events.len(),
            links = additional_links.len(),
            "furball parse complete"
        );
        ParseOutcome {
            events,
            additional_links,
        }
    }
}

fn draft_from_block(
    block: &str,
    page: &str,
    block_end: usize,
    page_url: &str,
    source: &SourceConfig,
) -> Option<DraftEvent> {
    let date = block_date(block)?;
    let text = flatten_text(block);

    let mut title = String::new();
    let mut venue = String::new();
    let mut address = String::new();
    if let Some(caps) = EVENT_LINE.captures(&text) {
        let raw_title = caps[1].trim();
        let venue_words: Vec<&str> = caps[2].split_whitespace().collect();
        // The last capitalized word before the dash is the venue; anything
        // before it still belongs to the party name.
        if let Some((last, rest)) = venue_words.split_last() {
            venue = (*last).to_string();
            title = strip_promo_tails(&format!("{raw_title} {}", rest.join(" ")));
        }
        address = strip_promo_tails(caps[3].trim());
    }
    if title.is_empty() {
        title = format!("FURBALL {}", date.format("%B %-d"));
    }

    let start = NaiveDateTime::new(date, NaiveTime::from_hms_opt(22, 0, 0)?);
    let end = NaiveDateTime::new(
        date + chrono::Duration::days(1),
        NaiveTime::from_hms_opt(2, 0, 0)?,
    );

    Some(DraftEvent {
        title,
        venue,
        address,
        start: Some(RawDate::WallClock(start)),
        end: Some(RawDate::WallClock(end)),
        url: page_url.to_string(),
        ticket_url: ticket_links(block).into_iter().next().unwrap_or_default(),
        image: flyer_after(page, block_end).unwrap_or_default(),
        source: source.name.clone(),
        is_bear_event: true,
        ..Default::default()
    })
}

fn block_date(block: &str) -> Option<NaiveDate> {
    let caps = BLOCK_DATE.captures(block)?;
    let month = dates::month_number(&caps[1])?;
    let day: u32 = caps[2].parse().ok()?;
    let year: i32 = caps[3].parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

/// The flyer lives in the first image component after the rich-text block.
/// Icons, logos and tiny assets are not flyers.
fn flyer_after(page: &str, from: usize) -> Option<String> {
    let caps = IMAGE_COMPONENT.captures_at(page, from)?;
    for img in IMG_SRC.captures_iter(&caps[1]) {
        let src = decode_entities(&img[1]);
        if is_content_image(&src) {
            return Some(src);
        }
    }
    None
}

fn is_content_image(src: &str) -> bool {
    let lowered = src.to_lowercase();
    if lowered.ends_with(".svg") {
        return false;
    }
    if SKIP_IMAGE_HINTS.iter().any(|h| lowered.contains(h)) {
        return false;
    }
    // Page-builder CDN urls encode dimensions as w_N,h_N.
    if let Some(caps) = CDN_DIMENSIONS.captures(&lowered) {
        let width: u32 = caps[1].parse().unwrap_or(0);
        let height: u32 = caps[2].parse().unwrap_or(0);
        if width < 100 || height < 100 {
            return false;
        }
    }
    true
}

fn ticket_links(block: &str) -> Vec<String> {
    let mut links = Vec::new();
    for caps in ANCHOR.captures_iter(block) {
        let href = decode_entities(&caps[1]);
        let label = TAGS.replace_all(&caps[2], "").trim().to_lowercase();
        let href_lower = href.to_lowercase();
        if TICKET_KEYWORDS
            .iter()
            .any(|k| label.contains(k) || href_lower.contains(k))
        {
            links.push(href);
        }
    }
    links
}

fn flatten_text(block: &str) -> String {
    let with_breaks = BREAKS.replace_all(block, "\n");
    let stripped = TAGS.replace_all(&with_breaks, " ");
    decode_entities(&stripped)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn strip_promo_tails(text: &str) -> String {
    let mut text = text.trim().to_string();
    for tail in PROMO_TAILS {
        if let Some(idx) = text.find(tail) {
            text.truncate(idx);
        }
    }
    text.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsers::test_support::{fetched, source_with};

    const PAGE: &str = r#"
        <div id="comp-1" class="wixui-rich-text">
            <p>JUNE 14, 2026</p>
            <p>FURBALL NYC PRIDE The Eagle - West 28th Street, New York, NY</p>
            <a href="https://www.eventbrite.com/e/furball-pride-tickets-99">Tickets Here!</a>
        </div>
        <div id="comp-2" class="wixui-image">
            <img src="https://static.wixstatic.com/media/flyer_w_800,h_1000.jpg" alt="pride flyer">
        </div>
        <div id="comp-3" class="wixui-rich-text"><p>Join our mailing list</p></div>"#;

    #[test]
    fn rich_text_blocks_with_dates_become_events() {
        let parser = FurballParser::new();
        let outcome = parser.parse_events(
            &fetched("https://www.furball.nyc/", PAGE),
            &source_with("furball", r#""always_bear": true"#),
            &Default::default(),
        );

        assert_eq!(outcome.events.len(), 1);
        let event = &outcome.events[0];
        assert_eq!(event.venue, "Eagle");
        assert!(event.title.contains("NYC PRIDE"));
        assert!(event.address.starts_with("West 28th Street"));
        assert_eq!(
            event.ticket_url,
            "https://www.eventbrite.com/e/furball-pride-tickets-99"
        );
        assert_eq!(
            event.image,
            "https://static.wixstatic.com/media/flyer_w_800,h_1000.jpg"
        );
        assert!(event.is_bear_event);
    }

    #[test]
    fn party_hours_are_ten_till_two() {
        let parser = FurballParser::new();
        let outcome = parser.parse_events(
            &fetched("https://www.furball.nyc/", PAGE),
            &source_with("furball", ""),
            &Default::default(),
        );
        let event = &outcome.events[0];
        match (event.start, event.end) {
            (Some(RawDate::WallClock(start)), Some(RawDate::WallClock(end))) => {
                assert_eq!(start.to_string(), "2026-06-14 22:00:00");
                assert_eq!(end.to_string(), "2026-06-15 02:00:00");
            }
            other => panic!("expected wall clock range, got {other:?}"),
        }
    }

    #[test]
    fn ticket_links_feed_discovery() {
        let parser = FurballParser::new();
        let outcome = parser.parse_events(
            &fetched("https://www.furball.nyc/", PAGE),
            &source_with("furball", ""),
            &Default::default(),
        );
        assert_eq!(
            outcome.additional_links,
            vec!["https://www.eventbrite.com/e/furball-pride-tickets-99".to_string()]
        );
    }

    #[test]
    fn blocks_without_dates_are_ignored() {
        let html = r#"<div class="wixui-rich-text"><p>FURBALL merch available now</p></div>"#;
        let parser = FurballParser::new();
        let outcome = parser.parse_events(
            &fetched("https://www.furball.nyc/", html),
            &source_with("furball", ""),
            &Default::default(),
        );
        assert!(outcome.events.is_empty());
    }
}
