//! Line-oriented `Key: Value` text blob used to round-trip event fields
//! through a single free-text slot, such as a calendar entry's notes or an
//! ICS feed's DESCRIPTION. Keys are a single alphanumeric word so prose
//! sentences containing colons are never mistaken for metadata; colons and
//! backslashes inside values are escaped so parsing is exact.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::domain::{canonical_field_name, Event, TEXT_FIELDS};

static KEY_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Za-z0-9]{2,20}):\s*(.*)$").unwrap());

/// Escapes a field value for embedding in a notes line.
pub fn escape_value(value: &str) -> String {
    value.replace('\\', r"\\").replace(':', r"\:")
}

/// Reverses [`escape_value`]. A backslash followed by any character yields
/// that character; a trailing lone backslash is kept as-is.
pub fn unescape_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some(next) => out.push(next),
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Serializes key/value pairs into a blob, skipping empty values.
pub fn serialize_fields<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> String {
    let mut lines = Vec::new();
    for (key, value) in pairs {
        if value.is_empty() {
            continue;
        }
        lines.push(format!("{key}: {}", escape_value(value)));
    }
    lines.join("\n")
}

/// Parses a blob back into ordered key/value pairs. Keys are canonicalized
/// when they are a known alias and kept verbatim otherwise; lines that do
/// not look like metadata are ignored.
pub fn parse_blob(text: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for line in text.lines() {
        let Some(caps) = KEY_LINE.captures(line) else {
            continue;
        };
        let value = unescape_value(caps[2].trim());
        if value.is_empty() {
            continue;
        }
        let key = canonical_field_name(&caps[1])
            .map(str::to_string)
            .unwrap_or_else(|| caps[1].to_string());
        pairs.push((key, value));
    }
    pairs
}

/// Splits free text into recognized field assignments and the remaining
/// prose. Only lines whose key maps to a canonical field are treated as
/// metadata; everything else stays text.
pub fn extract_known_fields(text: &str) -> (Vec<(&'static str, String)>, String) {
    let mut fields = Vec::new();
    let mut prose = Vec::new();
    for line in text.lines() {
        let assignment = KEY_LINE.captures(line).and_then(|caps| {
            let canonical = canonical_field_name(&caps[1])?;
            let value = unescape_value(caps[2].trim());
            (!value.is_empty()).then_some((canonical, value))
        });
        match assignment {
            Some(pair) => fields.push(pair),
            None => prose.push(line),
        }
    }
    let prose = prose.join("\n").trim().to_string();
    (fields, prose)
}

/// Serializes an event's non-empty text fields, title included, in the
/// canonical field order.
pub fn event_notes(event: &Event) -> String {
    serialize_fields(
        TEXT_FIELDS
            .iter()
            .filter_map(|name| event.text_field(name).map(|value| (*name, value))),
    )
}
