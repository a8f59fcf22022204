use std::collections::HashMap;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// A latitude/longitude pair, usually recovered from structured data or a
/// venue field that turned out to be coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl std::fmt::Display for Coordinates {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}, {}", self.lat, self.lng)
    }
}

/// A date value as a parser saw it, before timezone anchoring. Values that
/// already carry an explicit UTC offset are kept as-is; wall-clock and
/// date-only values are anchored later using the resolved city's timezone.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RawDate {
    Zoned(DateTime<FixedOffset>),
    WallClock(NaiveDateTime),
    DateOnly(NaiveDate),
}

/// Per-field merge policy. `Upsert` fills empty fields only, `Clobber`
/// replaces, `Preserve` never touches an existing value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeMode {
    Clobber,
    #[default]
    Upsert,
    Preserve,
}

/// What the pipeline decided to do with a record relative to the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventAction {
    New,
    Merge,
}

/// Run-scoped bookkeeping attached to an event. Never serialized, never
/// written to the calendar store.
#[derive(Debug, Clone, Default)]
pub struct ProcessingMeta {
    pub action: Option<EventAction>,
    pub merged: bool,
    /// Records discarded in favor of this one during duplicate
    /// reconciliation, kept for traceability.
    pub conflicts: Vec<Event>,
    /// Field name -> merge mode, resolved from the source configuration.
    pub merge_strategies: HashMap<String, MergeMode>,
}

/// An event as a parser produced it: text fields captured verbatim (after
/// entity decoding), dates not yet anchored to a timezone, no identity key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DraftEvent {
    pub title: String,
    pub short_title: String,
    pub description: String,
    pub tea: String,
    pub venue: String,
    pub address: String,
    pub city: String,
    pub price: String,
    pub url: String,
    pub ticket_url: String,
    pub instagram: String,
    pub facebook: String,
    pub website: String,
    pub image: String,
    pub google_maps_link: String,
    pub coordinates: Option<Coordinates>,
    pub start: Option<RawDate>,
    pub end: Option<RawDate>,
    pub source: String,
    pub is_bear_event: bool,
}

/// The canonical event record flowing through normalization, merge, and
/// the final write batch. Empty strings mean "absent" for text fields; the
/// merge engine relies on that convention.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Event {
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub short_title: String,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub venue: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub address: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub city: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<Coordinates>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tea: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub price: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ticket_url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub instagram: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub facebook: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub website: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub google_maps_link: String,
    pub key: String,
    pub source: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub parser: String,
    pub is_bear_event: bool,
    #[serde(skip)]
    pub meta: ProcessingMeta,
}

/// Text fields addressable by name in merge policies and the notes blob.
/// `source` and `parser` are provenance and deliberately not listed.
pub const TEXT_FIELDS: &[&str] = &[
    "title",
    "short_title",
    "description",
    "tea",
    "venue",
    "address",
    "city",
    "price",
    "url",
    "ticket_url",
    "instagram",
    "facebook",
    "website",
    "image",
    "google_maps_link",
];

/// Maps the field aliases found in operator configs and calendar notes to
/// canonical field names. Lookup is case-insensitive with spaces removed.
pub fn canonical_field_name(alias: &str) -> Option<&'static str> {
    let normalized: String = alias
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-' && *c != '_')
        .collect::<String>()
        .to_lowercase();
    let canonical = match normalized.as_str() {
        "title" | "name" => "title",
        "shorttitle" | "shortname" | "shortername" => "short_title",
        "description" | "info" => "description",
        "tea" => "tea",
        "venue" | "bar" | "location" | "host" => "venue",
        "address" => "address",
        "city" => "city",
        "price" | "cost" | "cover" => "price",
        "url" | "link" => "url",
        "ticketurl" | "tickets" => "ticket_url",
        "instagram" | "ig" => "instagram",
        "facebook" | "fb" => "facebook",
        "website" | "site" => "website",
        "image" | "img" => "image",
        "googlemapslink" | "googlemaps" | "gmaps" => "google_maps_link",
        _ => return None,
    };
    Some(canonical)
}

impl DraftEvent {
    /// Read a text field by canonical name, mirroring [`Event::text_field`].
    pub fn text_field(&self, name: &str) -> Option<&str> {
        let value = match name {
            "title" => &self.title,
            "short_title" => &self.short_title,
            "description" => &self.description,
            "tea" => &self.tea,
            "venue" => &self.venue,
            "address" => &self.address,
            "city" => &self.city,
            "price" => &self.price,
            "url" => &self.url,
            "ticket_url" => &self.ticket_url,
            "instagram" => &self.instagram,
            "facebook" => &self.facebook,
            "website" => &self.website,
            "image" => &self.image,
            "google_maps_link" => &self.google_maps_link,
            _ => return None,
        };
        Some(value.as_str())
    }

    /// Write a text field by canonical name, mirroring [`Event::set_text_field`].
    pub fn set_text_field(&mut self, name: &str, value: String) -> bool {
        let slot = match name {
            "title" => &mut self.title,
            "short_title" => &mut self.short_title,
            "description" => &mut self.description,
            "tea" => &mut self.tea,
            "venue" => &mut self.venue,
            "address" => &mut self.address,
            "city" => &mut self.city,
            "price" => &mut self.price,
            "url" => &mut self.url,
            "ticket_url" => &mut self.ticket_url,
            "instagram" => &mut self.instagram,
            "facebook" => &mut self.facebook,
            "website" => &mut self.website,
            "image" => &mut self.image,
            "google_maps_link" => &mut self.google_maps_link,
            _ => return false,
        };
        *slot = value;
        true
    }
}

impl Event {
    /// Read a text field by canonical name.
    pub fn text_field(&self, name: &str) -> Option<&str> {
        let value = match name {
            "title" => &self.title,
            "short_title" => &self.short_title,
            "description" => &self.description,
            "tea" => &self.tea,
            "venue" => &self.venue,
            "address" => &self.address,
            "city" => &self.city,
            "price" => &self.price,
            "url" => &self.url,
            "ticket_url" => &self.ticket_url,
            "instagram" => &self.instagram,
            "facebook" => &self.facebook,
            "website" => &self.website,
            "image" => &self.image,
            "google_maps_link" => &self.google_maps_link,
            _ => return None,
        };
        Some(value.as_str())
    }

    /// Write a text field by canonical name. Returns false for unknown
    /// names so config typos surface in logs instead of vanishing.
    pub fn set_text_field(&mut self, name: &str, value: String) -> bool {
        let slot = match name {
            "title" => &mut self.title,
            "short_title" => &mut self.short_title,
            "description" => &mut self.description,
            "tea" => &mut self.tea,
            "venue" => &mut self.venue,
            "address" => &mut self.address,
            "city" => &mut self.city,
            "price" => &mut self.price,
            "url" => &mut self.url,
            "ticket_url" => &mut self.ticket_url,
            "instagram" => &mut self.instagram,
            "facebook" => &mut self.facebook,
            "website" => &mut self.website,
            "image" => &mut self.image,
            "google_maps_link" => &mut self.google_maps_link,
            _ => return false,
        };
        *slot = value;
        true
    }
}

/// Per-source slice of the run report.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SourceReport {
    pub name: String,
    pub parser: String,
    pub urls_fetched: usize,
    pub links_followed: usize,
    pub events_found: usize,
    pub bear_events: usize,
    pub errors: Vec<String>,
}

/// Terminal output of one orchestrator run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub dry_run: bool,
    pub total_events: usize,
    pub bear_events: usize,
    pub duplicates_removed: usize,
    pub calendar_writes: usize,
    pub sources: Vec<SourceReport>,
    pub errors: Vec<String>,
    /// The final deduplicated batch, in configured source order.
    pub events: Vec<Event>,
}
