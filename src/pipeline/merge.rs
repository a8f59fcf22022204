//! Field-priority merge and same-run duplicate reconciliation.
//!
//! Two records can describe the same party: an index page and its detail
//! page, or two different sources entirely. Field-level merge decides who
//! wins per field; reconciliation additionally salvages what the losing
//! record knew before it is shelved as a conflict.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::domain::{DraftEvent, Event, MergeMode, TEXT_FIELDS};
use crate::registry::SourceConfig;

/// Fields where an empty incoming value never erases a populated one, even
/// under clobber. Detail pages frequently omit the price the index page
/// carried, and a silent wipe is worse than a stale value.
const SMART_CLOBBER_FIELDS: &[&str] = &["price"];

static INSTAGRAM_PROFILE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(?:https?://)?(?:www\.)?instagram\.com/[^\s]+").unwrap());

fn is_blank(value: &str) -> bool {
    value.trim().is_empty()
}

/// Resolves one field between an existing and an incoming value.
pub fn merge_field(mode: MergeMode, field: &str, existing: &str, incoming: &str) -> String {
    match mode {
        MergeMode::Preserve => existing.to_string(),
        MergeMode::Upsert => {
            if is_blank(existing) {
                incoming.to_string()
            } else {
                existing.to_string()
            }
        }
        MergeMode::Clobber => {
            if SMART_CLOBBER_FIELDS.contains(&field) && is_blank(incoming) && !is_blank(existing) {
                existing.to_string()
            } else {
                incoming.to_string()
            }
        }
    }
}

/// Folds a detail-page draft into the index-page draft it belongs to,
/// using the per-field strategies declared on the source.
pub fn merge_draft(parent: &mut DraftEvent, detail: &DraftEvent, source: &SourceConfig) {
    for field in TEXT_FIELDS {
        let mode = source.merge_strategy_for(field);
        let existing = parent.text_field(field).unwrap_or("").to_string();
        let incoming = detail.text_field(field).unwrap_or("");
        parent.set_text_field(field, merge_field(mode, field, &existing, incoming));
    }
    parent.start = parent.start.or(detail.start);
    parent.end = parent.end.or(detail.end);
    parent.coordinates = parent.coordinates.or(detail.coordinates);
    parent.is_bear_event |= detail.is_bear_event;
}

/// Merges a colliding record into the one already kept for its key.
///
/// Regular fields follow the incoming record's declared strategies with
/// upsert as the default, so the first sighting wins unless a source says
/// otherwise. On top of that the survivor salvages what the loser knew:
/// tea notes accumulate pipe-separated, a missing Instagram link is fished
/// out of the loser's free text, and the time envelope widens to cover
/// both copies. The losing record itself is shelved on the survivor for
/// traceability instead of being emitted.
pub fn reconcile(survivor: &mut Event, incoming: Event) {
    let strategies = incoming.meta.merge_strategies.clone();

    for field in TEXT_FIELDS {
        if *field == "tea" {
            continue;
        }
        let mode = strategies.get(*field).copied().unwrap_or(MergeMode::Upsert);
        let existing = survivor.text_field(field).unwrap_or("").to_string();
        let next = merge_field(mode, field, &existing, incoming.text_field(field).unwrap_or(""));
        survivor.set_text_field(field, next);
    }

    let mut teas: Vec<String> = survivor
        .tea
        .split(" | ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect();
    let incoming_tea = incoming.tea.trim();
    if !incoming_tea.is_empty() && !teas.iter().any(|t| t == incoming_tea) {
        teas.push(incoming_tea.to_string());
    }
    survivor.tea = teas.join(" | ");

    if is_blank(&survivor.instagram) {
        let free_text = format!("{}\n{}", incoming.description, incoming.tea);
        if let Some(url) = instagram_profile(&free_text) {
            debug!(key = %survivor.key, %url, "salvaged instagram link from duplicate");
            survivor.instagram = url;
        }
    }

    survivor.start_date = match (survivor.start_date, incoming.start_date) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    };
    survivor.end_date = match (survivor.end_date, incoming.end_date) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    };
    survivor.coordinates = survivor.coordinates.or(incoming.coordinates);
    survivor.is_bear_event |= incoming.is_bear_event;

    survivor.meta.merge_strategies.extend(strategies);
    survivor.meta.merged = true;
    survivor.meta.conflicts.push(incoming);
}

/// Collapses a run's event batch by identity key, keeping first-seen order.
/// Returns the surviving events and how many collisions were folded away.
pub fn dedupe_batch(events: Vec<Event>) -> (Vec<Event>, usize) {
    let mut order: Vec<String> = Vec::new();
    let mut by_key: HashMap<String, Event> = HashMap::new();
    let mut removed = 0;

    for event in events {
        match by_key.entry(event.key.clone()) {
            Entry::Occupied(mut slot) => {
                reconcile(slot.get_mut(), event);
                removed += 1;
            }
            Entry::Vacant(slot) => {
                order.push(event.key.clone());
                slot.insert(event);
            }
        }
    }

    let kept = order
        .into_iter()
        .filter_map(|key| by_key.remove(&key))
        .collect();
    (kept, removed)
}

/// First Instagram profile URL found in free text, with a scheme attached
/// when the text carried a bare domain.
fn instagram_profile(text: &str) -> Option<String> {
    let found = INSTAGRAM_PROFILE.find(text)?.as_str();
    if found.to_lowercase().starts_with("http") {
        Some(found.to_string())
    } else {
        Some(format!("https://{found}"))
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    fn event(key: &str, source: &str) -> Event {
        Event {
            key: key.to_string(),
            source: source.to_string(),
            title: "Bear Night".to_string(),
            ..Event::default()
        }
    }

    #[test]
    fn upsert_only_fills_empty_fields() {
        assert_eq!(merge_field(MergeMode::Upsert, "venue", "Eagle", "Precinct"), "Eagle");
        assert_eq!(merge_field(MergeMode::Upsert, "venue", "", "Precinct"), "Precinct");
        assert_eq!(merge_field(MergeMode::Upsert, "venue", "  ", "Precinct"), "Precinct");
    }

    #[test]
    fn clobber_always_takes_the_incoming_value() {
        assert_eq!(merge_field(MergeMode::Clobber, "venue", "Eagle", "Precinct"), "Precinct");
        assert_eq!(merge_field(MergeMode::Clobber, "description", "old text", ""), "");
    }

    #[test]
    fn preserve_never_changes_the_existing_value() {
        assert_eq!(merge_field(MergeMode::Preserve, "tea", "insider info", "new"), "insider info");
        assert_eq!(merge_field(MergeMode::Preserve, "tea", "", "new"), "");
    }

    #[test]
    fn an_empty_clobber_cannot_erase_a_price() {
        assert_eq!(merge_field(MergeMode::Clobber, "price", "$10-$20", ""), "$10-$20");
        assert_eq!(merge_field(MergeMode::Clobber, "price", "$10-$20", "$15"), "$15");
        assert_eq!(merge_field(MergeMode::Clobber, "price", "", ""), "");
    }

    #[test]
    fn detail_drafts_fill_what_the_index_page_missed() {
        let source = crate::parsers::test_support::source("generic");
        let mut parent = DraftEvent {
            title: "Furball".to_string(),
            price: "$10-$20".to_string(),
            ..DraftEvent::default()
        };
        let detail = DraftEvent {
            title: "Furball NYC".to_string(),
            venue: "The Eagle".to_string(),
            instagram: "https://instagram.com/furball".to_string(),
            ..DraftEvent::default()
        };

        merge_draft(&mut parent, &detail, &source);
        // Default mode is upsert, so the index title stays.
        assert_eq!(parent.title, "Furball");
        assert_eq!(parent.venue, "The Eagle");
        assert_eq!(parent.instagram, "https://instagram.com/furball");
        assert_eq!(parent.price, "$10-$20");
    }

    #[test]
    fn reconciliation_concatenates_tea_exactly_once() {
        let mut survivor = event("woof|2026-08-29|precinct", "eventbrite");
        survivor.tea = "A".to_string();

        let mut dup = event("woof|2026-08-29|precinct", "megawoof");
        dup.tea = "B".to_string();
        reconcile(&mut survivor, dup);
        assert_eq!(survivor.tea, "A | B");

        let mut repeat = event("woof|2026-08-29|precinct", "megawoof");
        repeat.tea = "B".to_string();
        reconcile(&mut survivor, repeat);
        assert_eq!(survivor.tea, "A | B");
        assert_eq!(survivor.meta.conflicts.len(), 2);
        assert!(survivor.meta.merged);
    }

    #[test]
    fn a_missing_instagram_is_salvaged_from_discarded_text() {
        let mut survivor = event("cuda|2026-09-05|eagle", "eventbrite");

        let mut dup = event("cuda|2026-09-05|eagle", "bearracuda");
        dup.description = "Follow us at instagram.com/bearracudanyc for photos".to_string();
        reconcile(&mut survivor, dup);

        assert_eq!(survivor.instagram, "https://instagram.com/bearracudanyc");
    }

    #[test]
    fn reconciliation_keeps_the_widest_time_envelope() {
        let mut survivor = event("k", "a");
        survivor.start_date = Some(Utc.with_ymd_and_hms(2026, 9, 5, 22, 0, 0).unwrap());
        survivor.end_date = Some(Utc.with_ymd_and_hms(2026, 9, 6, 2, 0, 0).unwrap());

        let mut dup = event("k", "b");
        dup.start_date = Some(Utc.with_ymd_and_hms(2026, 9, 5, 21, 0, 0).unwrap());
        dup.end_date = Some(Utc.with_ymd_and_hms(2026, 9, 6, 4, 0, 0).unwrap());
        reconcile(&mut survivor, dup);

        assert_eq!(
            survivor.start_date,
            Some(Utc.with_ymd_and_hms(2026, 9, 5, 21, 0, 0).unwrap())
        );
        assert_eq!(
            survivor.end_date,
            Some(Utc.with_ymd_and_hms(2026, 9, 6, 4, 0, 0).unwrap())
        );
    }

    #[test]
    fn incoming_clobber_strategies_are_honored_in_reconciliation() {
        let mut survivor = event("k", "a");
        survivor.venue = "Wrong Bar".to_string();

        let mut dup = event("k", "b");
        dup.venue = "Right Bar".to_string();
        dup.meta
            .merge_strategies
            .insert("venue".to_string(), MergeMode::Clobber);
        reconcile(&mut survivor, dup);

        assert_eq!(survivor.venue, "Right Bar");
    }

    #[test]
    fn batches_collapse_by_key_in_first_seen_order() {
        let mut first = event("a", "s1");
        first.venue = "Eagle".to_string();
        let second = event("b", "s1");
        let mut third = event("a", "s2");
        third.venue = "Ignored".to_string();
        third.tea = "secret".to_string();

        let (kept, removed) = dedupe_batch(vec![first, second, third]);
        assert_eq!(removed, 1);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].key, "a");
        assert_eq!(kept[1].key, "b");
        assert_eq!(kept[0].venue, "Eagle");
        assert_eq!(kept[0].tea, "secret");
        assert_eq!(kept[0].meta.conflicts.len(), 1);
        assert_eq!(kept[0].meta.conflicts[0].source, "s2");
    }
}
