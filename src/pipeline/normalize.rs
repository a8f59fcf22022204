//! Turns parser drafts into calendar-ready events.
//!
//! Normalization runs once per draft, in a fixed order: text cleanup,
//! city resolution, timezone anchoring, source metadata overrides, and
//! finally identity key derivation. The key has to come last because it
//! is built from the cleaned title and venue plus the anchored local day.

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

use crate::domain::{canonical_field_name, Coordinates, DraftEvent, Event};
use crate::parsers::{dates, decode_entities};
use crate::pipeline::merge;
use crate::registry::{CityTable, SourceConfig};

static BREAKS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<br\s*/?>").unwrap());
static TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]*>").unwrap());

static FIELD_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*(?:location|venue|bar)\s*:\s*").unwrap());
static COORDINATE_PAIR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(-?\d+\.?\d*),\s*(-?\d+\.?\d*)$").unwrap());

// Identity key transforms, applied to the lowercased title in order:
// punctuation runs between letters become a single hyphen, punctuation
// hanging off the end of a word is dropped, whitespace and hyphen runs
// collapse, and edge hyphens are trimmed.
static KEY_SEPARATORS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)([a-z])[\s><\-.,!@#$%^&*()_+={}\[\]|\\:;"'?/]+([a-z])"#).unwrap()
});
static KEY_TRAILING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)([a-z])[!@#$%^&*()_+={}\[\]|\\:;"'?,.]+(\s|$)"#).unwrap()
});
static KEY_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\s\-]+").unwrap());
static KEY_EDGES: Lazy<Regex> = Lazy::new(|| Regex::new(r"^-+|-+$").unwrap());

/// Words dropped when deriving a display short title from the full title.
const SHORT_TITLE_STOP_WORDS: &[&str] = &[
    "the", "and", "or", "at", "in", "on", "with", "for", "of", "to", "a", "an",
];

static PLACEHOLDER_ADDRESS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(?:(?:venue|location|address|details|info)\s*)?(?:tba|tbd|to be announced|to be determined|pending|coming soon|announced soon|to follow)$",
    )
    .unwrap()
});
static PARTIAL_ADDRESS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(?:dtla|downtown|midtown|uptown|north|south|east|west|central)\s*,?\s*[a-z\s]+,\s*[a-z]{2}\s*\d{5}$",
    )
    .unwrap()
});
static STREET_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+\s+\w+").unwrap());

/// One city's compiled pattern list, kept in table order.
struct CityMatcher {
    key: String,
    patterns: Vec<Regex>,
}

/// Draft-to-event normalizer. Compiles the city pattern table once and is
/// then shared across every source in a run.
pub struct Normalizer {
    cities: CityTable,
    matchers: Vec<CityMatcher>,
}

impl Normalizer {
    pub fn new(cities: &CityTable) -> Self {
        let matchers = cities
            .cities
            .iter()
            .map(|city| CityMatcher {
                key: city.key.clone(),
                patterns: city
                    .patterns
                    .iter()
                    .filter_map(|p| compile_city_pattern(p))
                    .collect(),
            })
            .collect();
        Self {
            cities: cities.clone(),
            matchers,
        }
    }

    /// Finds the first configured city whose pattern list matches the text.
    /// Table order decides ties, so the operator controls precedence.
    pub fn resolve_city(&self, text: &str) -> Option<&str> {
        for matcher in &self.matchers {
            if matcher.patterns.iter().any(|re| re.is_match(text)) {
                return Some(&matcher.key);
            }
        }
        None
    }

    pub fn normalize(&self, draft: DraftEvent, source: &SourceConfig) -> Event {
        let mut event = Event {
            title: clean_text(&draft.title),
            short_title: clean_text(&draft.short_title),
            description: clean_text(&draft.description),
            tea: clean_text(&draft.tea),
            venue: clean_text(&draft.venue),
            address: clean_text(&draft.address),
            city: clean_text(&draft.city).to_lowercase(),
            price: clean_text(&draft.price),
            url: draft.url.trim().to_string(),
            ticket_url: draft.ticket_url.trim().to_string(),
            instagram: draft.instagram.trim().to_string(),
            facebook: draft.facebook.trim().to_string(),
            website: draft.website.trim().to_string(),
            image: draft.image.trim().to_string(),
            google_maps_link: draft.google_maps_link.trim().to_string(),
            coordinates: draft.coordinates,
            source: source.name.clone(),
            parser: source.parser.to_string(),
            is_bear_event: draft.is_bear_event,
            ..Event::default()
        };

        // A venue that is nothing but a coordinate pair is location data
        // that ended up in the wrong field.
        let unlabeled = FIELD_LABEL.replace(&event.venue, "");
        if let Some(coords) = parse_coordinate_pair(unlabeled.trim()) {
            if event.coordinates.is_none() {
                event.coordinates = Some(coords);
            }
            event.venue.clear();
        }

        if event.city.is_empty() {
            let combined = format!("{} {}", event.venue, event.description);
            match self.resolve_city(&combined) {
                Some(city) => event.city = city.to_string(),
                None => {
                    if let Some(default) = &source.default_city {
                        event.city = default.clone();
                    }
                }
            }
        }

        let tz = self.cities.get(&event.city).and_then(|c| c.tz());
        event.start_date = draft.start.map(|raw| dates::anchor_to_zone(raw, tz));
        event.end_date = draft
            .end
            .map(|raw| dates::anchor_to_zone(raw, tz))
            .or(event.start_date);

        // The identity key is built from the scraped title, not whatever a
        // metadata override may replace it with below.
        let identity_title = event.title.clone();
        let local_day = event.start_date.map(|utc| match tz {
            Some(tz) => utc.with_timezone(&tz).date_naive(),
            None => utc.date_naive(),
        });

        for (field, over) in &source.metadata {
            let Some(canonical) = canonical_field_name(field) else {
                continue;
            };
            if let Some(mode) = over.merge {
                event
                    .meta
                    .merge_strategies
                    .insert(canonical.to_string(), mode);
            }
            if let Some(value) = &over.value {
                let mode = over.merge.unwrap_or(source.merge_mode);
                let current = event.text_field(canonical).unwrap_or("").to_string();
                let next = merge::merge_field(mode, canonical, &current, value);
                event.set_text_field(canonical, next);
            }
        }

        // Derived only when nothing scraped or configured supplied one, so
        // an operator's hand-picked short title is never second-guessed.
        if event.short_title.is_empty() {
            event.short_title = derive_short_title(&event.title, &event.venue);
        }

        event.key = match &source.key_template {
            Some(template) => render_key_template(template, &event, &identity_title, local_day),
            None => event_key(&identity_title, &event.venue, local_day),
        };

        if is_tba_venue(&event.venue) {
            debug!(venue = %event.venue, title = %event.title, "clearing location data for unannounced venue");
            event.coordinates = None;
            event.address.clear();
            event.google_maps_link.clear();
        } else {
            if !event.address.is_empty() && !is_full_address(&event.address) {
                debug!(address = %event.address, title = %event.title, "discarding placeholder address");
                event.address.clear();
                event.coordinates = None;
                event.google_maps_link.clear();
            }
            if event.google_maps_link.is_empty() {
                if let Some(link) = maps_link(event.coordinates.as_ref(), &event.address) {
                    event.google_maps_link = link;
                }
            }
        }

        event
    }
}

fn compile_city_pattern(pattern: &str) -> Option<Regex> {
    let tokens: Vec<String> = pattern.split_whitespace().map(regex::escape).collect();
    if tokens.is_empty() {
        return None;
    }
    let body = tokens.join(r"\s+");
    match Regex::new(&format!(r"(?i)\b{body}\b")) {
        Ok(re) => Some(re),
        Err(err) => {
            warn!(pattern, %err, "skipping unusable city pattern");
            None
        }
    }
}

/// Strips markup and normalizes whitespace while keeping line structure:
/// `<br>` variants become newlines, remaining tags drop out, entities are
/// decoded, and blank lines disappear.
pub fn clean_text(raw: &str) -> String {
    if raw.trim().is_empty() {
        return String::new();
    }
    let broken = BREAKS.replace_all(raw, "\n");
    let stripped = TAGS.replace_all(&broken, " ");
    let decoded = decode_entities(&stripped);

    let lines: Vec<String> = decoded
        .lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect();
    lines.join("\n")
}

fn parse_coordinate_pair(text: &str) -> Option<Coordinates> {
    let caps = COORDINATE_PAIR.captures(text)?;
    let lat: f64 = caps[1].parse().ok()?;
    let lng: f64 = caps[2].parse().ok()?;
    if lat.abs() > 90.0 || lng.abs() > 180.0 {
        return None;
    }
    Some(Coordinates { lat, lng })
}

/// Derives the identity key shared by every record describing the same
/// party: slugged title, local calendar day, and lowercased venue. Records
/// from different sources collide on purpose so the merge engine can
/// reconcile them.
pub fn event_key(title: &str, venue: &str, day: Option<NaiveDate>) -> String {
    let date = day
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_default();
    format!(
        "{}|{}|{}",
        title_slug(title),
        date,
        venue.trim().to_lowercase()
    )
}

fn title_slug(title: &str) -> String {
    let lowered = title.to_lowercase();
    let trimmed = lowered.trim();
    let joined = KEY_SEPARATORS.replace_all(trimmed, "$1-$2");
    let stripped = KEY_TRAILING.replace_all(&joined, "${1}${2}");
    let collapsed = KEY_RUNS.replace_all(&stripped, "-");
    KEY_EDGES.replace_all(&collapsed, "").into_owned()
}

fn render_key_template(
    template: &str,
    event: &Event,
    identity_title: &str,
    day: Option<NaiveDate>,
) -> String {
    let date = day
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_default();
    template
        .replace("{source}", &event.source)
        .replace("{date}", &date)
        .replace("{city}", &event.city)
        .replace("{title}", &title_slug(identity_title))
        .replace("{venue}", &event.venue.trim().to_lowercase())
}

/// Abbreviates a title by dropping stop words while keeping the casing of
/// what remains. The venue stands in for an empty title, and a title made
/// of nothing but stop words stays whole rather than vanishing.
fn derive_short_title(title: &str, venue: &str) -> String {
    let basis = if title.trim().is_empty() { venue } else { title };
    let kept: Vec<&str> = basis
        .split_whitespace()
        .filter(|word| !SHORT_TITLE_STOP_WORDS.contains(&word.to_lowercase().as_str()))
        .collect();
    if kept.is_empty() {
        basis.trim().to_string()
    } else {
        kept.join(" ")
    }
}

fn is_tba_venue(venue: &str) -> bool {
    let lowered = venue.to_lowercase();
    lowered.contains("tba") || lowered.contains("to be announced")
}

/// A usable street address: long enough, not a placeholder, not just a
/// neighborhood-plus-zip, and carrying a street number.
pub fn is_full_address(address: &str) -> bool {
    let address = address.trim();
    if address.len() < 10 {
        return false;
    }
    if PLACEHOLDER_ADDRESS.is_match(address) || PARTIAL_ADDRESS.is_match(address) {
        return false;
    }
    STREET_NUMBER.is_match(address)
}

/// Maps link that opens on both mobile platforms without an API token.
/// Coordinates win over the address when both are present.
fn maps_link(coordinates: Option<&Coordinates>, address: &str) -> Option<String> {
    if let Some(c) = coordinates {
        return Some(format!("https://maps.google.com/?q={},{}", c.lat, c.lng));
    }
    if !address.is_empty() {
        let url = reqwest::Url::parse_with_params("https://maps.google.com/", [("q", address)])
            .ok()?;
        return Some(url.to_string());
    }
    None
}
