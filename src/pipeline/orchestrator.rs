//! Run orchestration.
//!
//! Drives every runnable source through fetch, parse, link discovery,
//! normalization and filtering, merges the combined batch by identity key,
//! and writes the survivors to their city calendars. Failures stay scoped
//! to the source (or the single URL) that caused them; the run always ends
//! with a report.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, error, info, warn};

use crate::app::ports::{CalendarStore, FetchOptions, Fetcher};
use crate::constants::FALLBACK_CALENDAR;
use crate::domain::{Event, RunReport, SourceReport};
use crate::error::{Result, ScraperError};
use crate::parsers::ParserRegistry;
use crate::pipeline::{discovery, merge, Normalizer};
use crate::registry::{SourceConfig, SourcesDocument};

pub struct Orchestrator {
    registry: ParserRegistry,
    fetcher: Arc<dyn Fetcher>,
    calendar: Arc<dyn CalendarStore>,
}

impl Orchestrator {
    pub fn new(
        registry: ParserRegistry,
        fetcher: Arc<dyn Fetcher>,
        calendar: Arc<dyn CalendarStore>,
    ) -> Self {
        Self {
            registry,
            fetcher,
            calendar,
        }
    }

    /// Executes one full sync run over the given sources document.
    ///
    /// Sources run in document order and the output batch keeps that
    /// order. Calendar writes happen only for events whose source is not
    /// in dry-run mode; a dry run still produces the full report.
    pub async fn run(&self, document: &SourcesDocument) -> RunReport {
        let started_at = Utc::now();
        let dry_run = document.defaults.dry_run;
        info!(sources = document.sources.len(), dry_run, "starting sync run");

        let mut errors = document.validate();
        for problem in &errors {
            warn!(%problem, "configuration problem");
        }

        let normalizer = Normalizer::new(&document.cities);
        let mut visited: HashSet<String> = HashSet::new();
        let mut batch: Vec<Event> = Vec::new();
        let mut sources: Vec<SourceReport> = Vec::new();

        for source in document.runnable_sources() {
            match self
                .process_source(source, document, &normalizer, &mut visited)
                .await
            {
                Ok((events, report)) => {
                    info!(source = %source.name, events = events.len(), "source finished");
                    batch.extend(events);
                    sources.push(report);
                }
                Err(err) => {
                    error!(source = %source.name, %err, "source failed");
                    errors.push(format!("{}: {err}", source.name));
                    sources.push(SourceReport {
                        name: source.name.clone(),
                        parser: source.parser.to_string(),
                        errors: vec![err.to_string()],
                        ..SourceReport::default()
                    });
                }
            }
        }

        let total_events = sources.iter().map(|s| s.events_found).sum();
        let bear_events = sources.iter().map(|s| s.bear_events).sum();
        let (events, duplicates_removed) = merge::dedupe_batch(batch);

        let mut calendar_writes = 0;
        for event in &events {
            let source_dry = document
                .sources
                .iter()
                .find(|s| s.name == event.source)
                .map(|s| s.effective_dry_run(dry_run))
                .unwrap_or(dry_run);
            if source_dry {
                debug!(key = %event.key, "dry run, skipping calendar write");
                continue;
            }
            let calendar = document
                .cities
                .get(&event.city)
                .map(|c| c.calendar.as_str())
                .unwrap_or(FALLBACK_CALENDAR);
            match self.calendar.upsert(calendar, event).await {
                Ok(_) => calendar_writes += 1,
                Err(err) => {
                    error!(key = %event.key, calendar, %err, "calendar write failed");
                    errors.push(format!("calendar write for {}: {err}", event.key));
                }
            }
        }

        info!(
            total_events,
            bear_events, duplicates_removed, calendar_writes, "run complete"
        );

        RunReport {
            started_at,
            completed_at: Utc::now(),
            dry_run,
            total_events,
            bear_events,
            duplicates_removed,
            calendar_writes,
            sources,
            errors,
            events,
        }
    }

    async fn process_source(
        &self,
        source: &SourceConfig,
        document: &SourcesDocument,
        normalizer: &Normalizer,
        visited: &mut HashSet<String>,
    ) -> Result<(Vec<Event>, SourceReport)> {
        let parser = self
            .registry
            .get(source.parser)
            .ok_or_else(|| ScraperError::UnknownParser(source.parser.to_string()))?;

        let mut report = SourceReport {
            name: source.name.clone(),
            parser: source.parser.to_string(),
            ..SourceReport::default()
        };

        let mut seeds: Vec<String> = Vec::new();
        for url in &source.urls {
            if visited.insert(url.clone()) {
                seeds.push(url.clone());
            }
        }

        let pages = self
            .fetcher
            .fetch_many(&seeds, &FetchOptions::default())
            .await;
        report.urls_fetched = pages.len();

        let mut drafts = Vec::new();
        let mut links: Vec<String> = Vec::new();
        for page in &pages {
            if !page.has_content() {
                let reason = page.error.as_deref().unwrap_or("empty response");
                warn!(source = %source.name, url = %page.url, reason, "seed fetch failed");
                report.errors.push(format!("fetch {}: {reason}", page.url));
                continue;
            }
            let outcome = parser.parse_events(page, source, &document.cities);
            debug!(
                source = %source.name,
                url = %page.url,
                events = outcome.events.len(),
                links = outcome.additional_links.len(),
                "parsed seed page"
            );
            drafts.extend(outcome.events);
            links.extend(outcome.additional_links);
        }

        report.links_followed = discovery::follow_links(
            &mut drafts,
            links,
            parser.as_ref(),
            source,
            &document.cities,
            self.fetcher.as_ref(),
            visited,
        )
        .await;

        let mut events: Vec<Event> = drafts
            .into_iter()
            .map(|draft| normalizer.normalize(draft, source))
            .collect();
        report.events_found = events.len();

        let now = Utc::now();
        let look_ahead = source.look_ahead_days(document.defaults.days_to_look_ahead);
        events.retain(|e| keep_in_window(e, now, look_ahead, source.keep_dateless));
        events.retain(|e| passes_bear_gate(e, source));
        report.bear_events = events.iter().filter(|e| e.is_bear_event).count();

        Ok((events, report))
    }
}

/// Window filter: strictly future events only, optionally capped at a
/// look-ahead horizon. Dateless records survive only when the source opts
/// in (venue profiles have no start date by design).
fn keep_in_window(
    event: &Event,
    now: DateTime<Utc>,
    look_ahead: Option<i64>,
    keep_dateless: bool,
) -> bool {
    let Some(start) = event.start_date else {
        return keep_dateless;
    };
    if start <= now {
        return false;
    }
    match look_ahead {
        Some(days) => start <= now + Duration::days(days),
        None => true,
    }
}

/// Source-level gates on top of the keyword classification the parsers
/// already did: `require_keywords` drops unflagged events entirely, and a
/// non-empty allowlist keeps only titles mentioning one of its phrases.
fn passes_bear_gate(event: &Event, source: &SourceConfig) -> bool {
    if source.require_keywords && !event.is_bear_event {
        return false;
    }
    if !source.allowlist.is_empty() {
        let title = event.title.to_lowercase();
        if !source
            .allowlist
            .iter()
            .any(|phrase| title.contains(&phrase.to_lowercase()))
        {
            return false;
        }
    }
    true
}
