//! GayCities bar directory pages. A bar profile yields one dateless record
//! carrying the venue's address, coordinates, and social links; the city
//! directory pages mostly contribute links to individual bar profiles.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::debug;

use crate::app::ports::FetchResult;
use crate::domain::{Coordinates, DraftEvent};
use crate::parsers::{
    classify_bear, decode_entities, finalize_links, json_ld_blocks, resolve_url, ParseOutcome,
    ParserKind, SourceParser,
};
use crate::registry::{CityTable, SourceConfig};

static NAME_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)<title[^>]*>([^<]+?)\s*-\s*GayCities",
        r"(?i)<title[^>]*>([^<]+?)\s*-\s*Bars",
        r"(?i)<title[^>]*>([^<]+)\s*-\s*[^<]+</title>",
        r#"(?i)<h1[^>]*class="[^"]*venue-name[^>]*>([^<]+)</h1>"#,
        r#"(?i)<h1[^>]*class="[^"]*bar-name[^>]*>([^<]+)</h1>"#,
        r"(?i)<h1[^>]*>([^<]+)</h1>",
        r#"(?i)<meta[^>]*name="description"[^>]*content="([^"]+)""#,
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});
static CLASS_NAME_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r#"(?i)class="[^"]*venue-title[^>]*>([^<]+)<"#,
        r#"(?i)class="[^"]*bar-title[^>]*>([^<]+)<"#,
        r#"(?i)class="[^"]*location-name[^>]*>([^<]+)<"#,
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});
static NAME_SUFFIXES: Lazy<Vec<Regex>> = Lazy::new(|| {
    [r"(?i)\s*-\s*GayCities.*$", r"(?i)\s*-\s*Bars.*$"]
        .iter()
        .map(|p| Regex::new(p).unwrap())
        .collect()
});

static ADDRESS_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)(\d+\s+[^,<]+,\s*[^,<]+,\s*[A-Z]{2}\s+\d{5}(?:-\d{4})?)",
        r"(\d+\s+[^,<]+,\s*[^,<]+,\s*[A-Z]{2})",
        r#"(?i)class="[^"]*address[^>]*>([^<]+)<"#,
        r#"(?i)class="[^"]*location-address[^>]*>([^<]+)<"#,
        r#"(?i)class="[^"]*venue-address[^>]*>([^<]+)<"#,
        r#"(?i)data-address="([^"]+)""#,
        r"(?i)<p[^>]*>(\d+\s+[^,<]+,\s*[^,<]+,\s*[A-Z]{2})</p>",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static MAPS_EMBED_COORDS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"@(-?\d+\.\d+),(-?\d+\.\d+)").unwrap());
static DATA_COORDS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r#"(?i)data-lat="([^"]+)"[^>]*data-lng="([^"]+)""#,
        r#"(?i)data-latitude="([^"]+)"[^>]*data-longitude="([^"]+)""#,
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static FACEBOOK_HREF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)href="(https?://[^"]*facebook\.com/[^"]*)""#).unwrap());
static FACEBOOK_BARE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)facebook\.com/([^"'\s<]+)"#).unwrap());
static INSTAGRAM_HREF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)href="(https?://[^"]*instagram\.com/[^"]*)""#).unwrap());
static INSTAGRAM_BARE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)instagram\.com/([^"'\s<]+)"#).unwrap());
static WEBSITE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r#"(?i)href="(https?://[^"]*)"[^>]*class="[^"]*website"#,
        r#"(?i)href="(https?://[^"]*)"[^>]*class="[^"]*homepage"#,
        r#"(?i)href="(https?://[^"]*)"[^>]*class="[^"]*official"#,
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static DESCRIPTION_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r#"(?i)<meta[^>]*name="description"[^>]*content="([^"]+)""#,
        r#"(?i)class="[^"]*description[^>]*>([^<]+)<"#,
        r#"(?i)class="[^"]*details[^>]*>([^<]+)<"#,
        r#"(?i)class="[^"]*summary[^>]*>([^<]+)<"#,
        r#"(?i)<p[^>]*class="[^"]*intro[^>]*>([^<]+)</p>"#,
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static IMAGE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r#"(?i)<img[^>]*src="([^"]*)"[^>]*class="[^"]*main[^>]*>"#,
        r#"(?i)<img[^>]*src="([^"]*)"[^>]*class="[^"]*hero[^>]*>"#,
        r#"(?i)<img[^>]*src="([^"]*)"[^>]*class="[^"]*featured[^>]*>"#,
        r#"(?i)<img[^>]*src="([^"]*)"[^>]*class="[^"]*venue[^>]*>"#,
        r#"(?i)<img[^>]*src="([^"]*)"[^>]*class="[^"]*bar[^>]*>"#,
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static BAR_LINK_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r#"(?i)href="(/[^"]*/bars/[^"]+)""#,
        r#"(?i)href="(/[^"]*/venues/[^"]+)""#,
        r#"(?i)href="(/[^"]*/nightlife/[^"]+)""#,
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

const BLOCKED_PATHS: &[&str] = &[
    "/admin",
    "/login",
    "/wp-admin",
    "/wp-login",
    "/user/",
    "/profile/",
    "/events/",
    "/calendar/",
    "/listings/",
];

const LINKS_PER_PATTERN: usize = 10;

pub struct GaycitiesParser;

impl GaycitiesParser {
    pub fn new() -> Self {
        Self
    }
}

impl Default for GaycitiesParser {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceParser for GaycitiesParser {
    fn kind(&self) -> ParserKind {
        ParserKind::Gaycities
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
        if let Some(event) = bar_record(html, &fetched.url, source) {
            events.push(event);
        }

        let additional_links = if source.discovery_depth() > 0 {
            finalize_links(bar_links(html, &fetched.url), source)
        } else {
            Vec::new()
        };

        debug!(
            source = %source.name,
            events = events.len(),
            links = additional_links.len(),
            "gaycities parse complete"
        );
        ParseOutcome {
            events,
            additional_links,
        }
    }
}

/// A bar profile becomes a single dateless record; whether it survives the
/// run depends on the source's dateless policy.
fn bar_record(html: &str, page_url: &str, source: &SourceConfig) -> Option<DraftEvent> {
    let name = bar_name(html)?;
    let mut event = DraftEvent {
        title: name.clone(),
        venue: name,
        description: description(html).unwrap_or_default(),
        address: address(html).unwrap_or_default(),
        coordinates: coordinates(html),
        url: page_url.to_string(),
        facebook: facebook(html).unwrap_or_default(),
        instagram: instagram(html).unwrap_or_default(),
        website: website(html).unwrap_or_default(),
        image: primary_image(html, page_url).unwrap_or_default(),
        source: source.name.clone(),
        ..Default::default()
    };
    event.is_bear_event = classify_bear(&event, source);
    Some(event)
}

fn bar_name(html: &str) -> Option<String> {
    for re in NAME_PATTERNS.iter() {
        if let Some(name) = re.captures(html).and_then(|c| cleaned_name(&c[1])) {
            return Some(name);
        }
    }
    for block in json_ld_blocks(html) {
        if let Some(name) = block
            .get("name")
            .and_then(Value::as_str)
            .and_then(cleaned_name)
        {
            return Some(name);
        }
    }
    for re in CLASS_NAME_PATTERNS.iter() {
        if let Some(name) = re.captures(html).and_then(|c| cleaned_name(&c[1])) {
            return Some(name);
        }
    }
    None
}

fn cleaned_name(raw: &str) -> Option<String> {
    let mut name = decode_entities(raw).trim().to_string();
    for suffix in NAME_SUFFIXES.iter() {
        name = suffix.replace(&name, "").trim().to_string();
    }
    (name.len() > 2).then_some(name)
}

fn address(html: &str) -> Option<String> {
    if let Some(structured) = structured_address(html) {
        return Some(structured);
    }
    for re in ADDRESS_PATTERNS.iter() {
        if let Some(caps) = re.captures(html) {
            let cleaned = collapse_whitespace(&decode_entities(&caps[1]));
            // Anything that short or digitless is a label, not an address.
            if cleaned.len() > 10 && cleaned.chars().any(|c| c.is_ascii_digit()) {
                return Some(cleaned);
            }
        }
    }
    None
}

fn structured_address(html: &str) -> Option<String> {
    for block in json_ld_blocks(html) {
        let Some(addr) = block.get("address") else {
            continue;
        };
        let full = match addr {
            Value::String(s) => s.trim().to_string(),
            Value::Object(_) => ["streetAddress", "addressLocality", "addressRegion", "postalCode"]
                .iter()
                .filter_map(|k| addr.get(k).and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join(", "),
            _ => continue,
        };
        if !full.is_empty() {
            return Some(full);
        }
    }
    None
}

fn coordinates(html: &str) -> Option<Coordinates> {
    for block in json_ld_blocks(html) {
        let Some(geo) = block.get("geo") else {
            continue;
        };
        let lat = json_number(geo.get("latitude"));
        let lng = json_number(geo.get("longitude"));
        if let (Some(lat), Some(lng)) = (lat, lng) {
            if let Some(coords) = validated(lat, lng) {
                return Some(coords);
            }
        }
    }
    if let Some(caps) = MAPS_EMBED_COORDS.captures(html) {
        if let Some(coords) = parse_pair(&caps[1], &caps[2]) {
            return Some(coords);
        }
    }
    for re in DATA_COORDS.iter() {
        if let Some(caps) = re.captures(html) {
            if let Some(coords) = parse_pair(&caps[1], &caps[2]) {
                return Some(coords);
            }
        }
    }
    None
}

fn json_number(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn parse_pair(lat: &str, lng: &str) -> Option<Coordinates> {
    validated(lat.trim().parse().ok()?, lng.trim().parse().ok()?)
}

fn validated(lat: f64, lng: f64) -> Option<Coordinates> {
    ((-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lng))
        .then_some(Coordinates { lat, lng })
}

fn facebook(html: &str) -> Option<String> {
    if let Some(caps) = FACEBOOK_HREF.captures(html) {
        return Some(decode_entities(&caps[1]));
    }
    FACEBOOK_BARE
        .captures(html)
        .map(|caps| format!("https://www.facebook.com/{}", decode_entities(&caps[1])))
}

fn instagram(html: &str) -> Option<String> {
    if let Some(caps) = INSTAGRAM_HREF.captures(html) {
        return Some(decode_entities(&caps[1]));
    }
    INSTAGRAM_BARE
        .captures(html)
        .map(|caps| format!("https://www.instagram.com/{}", decode_entities(&caps[1])))
}

fn website(html: &str) -> Option<String> {
    for re in WEBSITE_PATTERNS.iter() {
        if let Some(caps) = re.captures(html) {
            let url = decode_entities(&caps[1]);
            if !url.contains("facebook.com") && !url.contains("instagram.com") {
                return Some(url);
            }
        }
    }
    None
}

fn description(html: &str) -> Option<String> {
    for re in DESCRIPTION_PATTERNS.iter() {
        if let Some(caps) = re.captures(html) {
            let cleaned = collapse_whitespace(&decode_entities(&caps[1]));
            if cleaned.len() > 20 {
                return Some(cleaned);
            }
        }
    }
    None
}

fn primary_image(html: &str, page_url: &str) -> Option<String> {
    for re in IMAGE_PATTERNS.iter() {
        if let Some(caps) = re.captures(html) {
            if let Some(url) = resolve_url(&caps[1], page_url) {
                return Some(url);
            }
        }
    }
    None
}

fn bar_links(html: &str, page_url: &str) -> Vec<String> {
    let mut links = Vec::new();
    for re in BAR_LINK_PATTERNS.iter() {
        let mut taken = 0;
        for caps in re.captures_iter(html) {
            if taken >= LINKS_PER_PATTERN {
                break;
            }
            let Some(url) = resolve_url(&caps[1], page_url) else {
                continue;
            };
            if is_bar_url(&url) {
                links.push(url);
                taken += 1;
            }
        }
    }
    links
}

fn is_bar_url(url: &str) -> bool {
    let lowered = url.to_lowercase();
    if !lowered.contains("gaycities.com") {
        return false;
    }
    if !lowered.contains("/bars/") && !lowered.contains("/venues/") && !lowered.contains("/nightlife/")
    {
        return false;
    }
    !BLOCKED_PATHS.iter().any(|p| lowered.contains(p))
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
