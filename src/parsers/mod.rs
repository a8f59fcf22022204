//! Source parsers: one implementation per external site family.
//!
//! Every parser is a pure function from fetched content to draft events
//! plus candidate follow-up links. Parsers never touch the network and
//! never mutate their inputs; each owns its own compiled extraction
//! patterns so a brittle pattern in one source cannot affect another.

pub mod bearracuda;
pub mod dates;
pub mod eventbrite;
pub mod furball;
pub mod gaycities;
pub mod generic;
pub mod ical;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::app::ports::FetchResult;
use crate::constants::BEAR_KEYWORDS;
use crate::domain::DraftEvent;
use crate::error::ScraperError;
use crate::registry::{CityTable, SourceConfig};

/// Tag identifying which parser handles a source. Dispatch is exhaustive:
/// adding a variant without registering a parser is a compile-time nudge,
/// not a silent runtime miss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParserKind {
    Eventbrite,
    Bearracuda,
    Furball,
    Gaycities,
    Generic,
    Ical,
}

impl ParserKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParserKind::Eventbrite => "eventbrite",
            ParserKind::Bearracuda => "bearracuda",
            ParserKind::Furball => "furball",
            ParserKind::Gaycities => "gaycities",
            ParserKind::Generic => "generic",
            ParserKind::Ical => "ical",
        }
    }

    pub fn all() -> &'static [ParserKind] {
        &[
            ParserKind::Eventbrite,
            ParserKind::Bearracuda,
            ParserKind::Furball,
            ParserKind::Gaycities,
            ParserKind::Generic,
            ParserKind::Ical,
        ]
    }
}

impl fmt::Display for ParserKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ParserKind {
    type Err = ScraperError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "eventbrite" => Ok(ParserKind::Eventbrite),
            "bearracuda" => Ok(ParserKind::Bearracuda),
            "furball" => Ok(ParserKind::Furball),
            "gaycities" => Ok(ParserKind::Gaycities),
            "generic" => Ok(ParserKind::Generic),
            "ical" => Ok(ParserKind::Ical),
            other => Err(ScraperError::UnknownParser(other.to_string())),
        }
    }
}

/// What one parser invocation yields.
#[derive(Debug, Default)]
pub struct ParseOutcome {
    pub events: Vec<DraftEvent>,
    pub additional_links: Vec<String>,
}

impl ParseOutcome {
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Capability interface every concrete parser implements. Parsing is
/// synchronous; suspension points live in the fetch layer only.
pub trait SourceParser: Send + Sync {
    fn kind(&self) -> ParserKind;

    /// Converts fetched content into draft events plus follow-up links.
    /// A parser that recognizes nothing returns an empty outcome rather
    /// than failing; per-element failures are logged and skipped.
    fn parse_events(
        &self,
        fetched: &FetchResult,
        source: &SourceConfig,
        cities: &CityTable,
    ) -> ParseOutcome;
}

/// Explicit registry mapping parser kinds to instances. Built once at
/// startup and handed to the orchestrator; nothing is discovered through
/// ambient state.
pub struct ParserRegistry {
    parsers: HashMap<ParserKind, Arc<dyn SourceParser>>,
}

impl ParserRegistry {
    pub fn new() -> Self {
        Self {
            parsers: HashMap::new(),
        }
    }

    /// The standard registry with every built-in parser.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(eventbrite::EventbriteParser::new()));
        registry.register(Arc::new(bearracuda::BearracudaParser::new()));
        registry.register(Arc::new(furball::FurballParser::new()));
        registry.register(Arc::new(gaycities::GaycitiesParser::new()));
        registry.register(Arc::new(generic::GenericParser::new()));
        registry.register(Arc::new(ical::IcalParser::new()));
        registry
    }

    pub fn register(&mut self, parser: Arc<dyn SourceParser>) {
        self.parsers.insert(parser.kind(), parser);
    }

    pub fn get(&self, kind: ParserKind) -> Option<Arc<dyn SourceParser>> {
        self.parsers.get(&kind).cloned()
    }

    pub fn len(&self) -> usize {
        self.parsers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parsers.is_empty()
    }
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Keyword classification over an event's combined text. Pure text
/// matching; `always_bear` short-circuits it at the source level.
pub fn is_bear_text(text: &str) -> bool {
    let lowered = text.to_lowercase();
    BEAR_KEYWORDS.iter().any(|k| lowered.contains(k))
}

pub fn classify_bear(draft: &DraftEvent, source: &SourceConfig) -> bool {
    if source.always_bear {
        return true;
    }
    let combined = format!("{} {} {}", draft.title, draft.description, draft.venue);
    is_bear_text(&combined)
}

/// Deduplicates candidate links preserving first-seen order, applies the
/// source's include/exclude filters and caps the list.
pub fn finalize_links(links: Vec<String>, source: &SourceConfig) -> Vec<String> {
    let mut seen = HashSet::new();
    let cap = source.link_cap();
    let mut out = Vec::new();
    for link in links {
        if out.len() >= cap {
            break;
        }
        if let Some(filters) = &source.url_filters {
            if !filters.allows(&link) {
                continue;
            }
        }
        if seen.insert(link.clone()) {
            out.push(link);
        }
    }
    out
}

/// Resolves a scraped href against the page it came from. Anchors and
/// non-http schemes yield None.
pub fn resolve_url(href: &str, base: &str) -> Option<String> {
    let href = decode_entities(href);
    let href = href.trim();
    if href.is_empty()
        || href.starts_with('#')
        || href.starts_with("javascript:")
        || href.starts_with("mailto:")
        || href.starts_with("tel:")
        || href.starts_with("sms:")
    {
        return None;
    }
    if href.starts_with("http://") || href.starts_with("https://") {
        return Some(href.to_string());
    }
    let (scheme, rest) = base.split_once("//")?;
    let host = rest.split('/').next()?;
    if href.starts_with("//") {
        return Some(format!("{scheme}{href}"));
    }
    if href.starts_with('/') {
        return Some(format!("{scheme}//{host}{href}"));
    }
    None
}

/// Minimal entity decoding for scraped fragments. Full markup cleanup
/// happens in the normalizer.
pub fn decode_entities(text: &str) -> String {
    text.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&nbsp;", " ")
}

/// All JSON-LD objects embedded in a page, with top-level arrays and
/// `@graph` containers flattened. Script tags are located through the DOM
/// rather than by pattern so attribute order and quoting do not matter;
/// malformed blocks are skipped.
pub fn json_ld_blocks(html: &str) -> Vec<Value> {
    let document = Html::parse_document(html);
    let selector = Selector::parse(r#"script[type="application/ld+json"]"#).unwrap();
    let mut blocks = Vec::new();
    for element in document.select(&selector) {
        let Ok(value) = serde_json::from_str::<Value>(element.inner_html().trim()) else {
            continue;
        };
        flatten_json_ld(value, &mut blocks);
    }
    blocks
}

fn flatten_json_ld(value: Value, out: &mut Vec<Value>) {
    match value {
        Value::Array(items) => {
            for item in items {
                flatten_json_ld(item, out);
            }
        }
        Value::Object(ref map) => {
            if let Some(graph) = map.get("@graph").and_then(Value::as_array) {
                for item in graph.clone() {
                    flatten_json_ld(item, out);
                }
            } else {
                out.push(value);
            }
        }
        _ => {}
    }
}

/// True when a JSON-LD `@type` names the given type, either directly or
/// within a type array.
pub fn json_ld_is_type(value: &Value, wanted: &str) -> bool {
    match value.get("@type") {
        Some(Value::String(s)) => s.contains(wanted),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .any(|s| s.contains(wanted)),
        _ => false,
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn source_with_cap(cap: usize) -> SourceConfig {
        let raw = format!(
            r#"{{ "name": "t", "parser": "generic", "urls": ["https://example.com"], "max_additional_urls": {cap} }}"#
        );
        serde_json::from_str(&raw).unwrap()
    }

    #[test]
    fn registry_defaults_cover_every_kind() {
        let registry = ParserRegistry::with_defaults();
        for kind in ParserKind::all() {
            assert!(registry.get(*kind).is_some(), "missing parser for {kind}");
        }
    }

    #[test]
    fn parser_kind_round_trips_through_strings() {
        for kind in ParserKind::all() {
            assert_eq!(kind.as_str().parse::<ParserKind>().unwrap(), *kind);
        }
        assert!("mystery".parse::<ParserKind>().is_err());
    }

    #[test]
    fn bear_text_matches_keywords_case_insensitively() {
        assert!(is_bear_text("MEGAWOOF: Bears of Brooklyn"));
        assert!(is_bear_text("a FURBALL takeover"));
        assert!(!is_bear_text("Trivia Tuesday at the sports bar"));
    }

    #[test]
    fn links_are_deduplicated_filtered_and_capped() {
        let links = vec![
            "https://example.com/events/a".to_string(),
            "https://example.com/events/a".to_string(),
            "https://example.com/events/b".to_string(),
            "https://example.com/events/c".to_string(),
        ];
        let out = finalize_links(links, &source_with_cap(2));
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], "https://example.com/events/a");
        assert_eq!(out[1], "https://example.com/events/b");
    }

    #[test]
    fn json_ld_blocks_survive_quoting_and_flatten_graphs() {
        let html = r#"<html><head>
            <script type='application/ld+json'>
            [{"@type": "Event", "name": "Bear Night"},
             {"@type": "Event", "name": "Fur Ball"}]
            </script>
            <script type="application/ld+json">not json at all</script>
            <script data-site="x" type="application/ld+json">
            {"@graph": [{"@type": "BarOrPub", "name": "Rockbar"}]}
            </script>
        </head><body></body></html>"#;
        let blocks = json_ld_blocks(html);
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0]["name"], "Bear Night");
        assert_eq!(blocks[2]["name"], "Rockbar");
        assert!(json_ld_is_type(&blocks[2], "BarOrPub"));
    }

    #[test]
    fn resolve_url_handles_relative_and_rejects_anchors() {
        let base = "https://www.bearracuda.com/events/";
        assert_eq!(
            resolve_url("/atlanta", base).as_deref(),
            Some("https://www.bearracuda.com/atlanta")
        );
        assert_eq!(
            resolve_url("//cdn.example.com/a.jpg", base).as_deref(),
            Some("https://cdn.example.com/a.jpg")
        );
        assert_eq!(
            resolve_url("https://other.example/x", base).as_deref(),
            Some("https://other.example/x")
        );
        assert_eq!(resolve_url("#tickets", base), None);
        assert_eq!(resolve_url("mailto:woof@example.com", base), None);
    }
}
