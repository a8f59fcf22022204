//! One-hop link discovery.
//!
//! Parsers flag candidate follow-up links on the pages they read; this
//! module fetches those links, runs the same parser over each detail page,
//! and folds what it finds back into the events that referenced them. The
//! pass is exactly one level deep: links discovered on a detail page are
//! logged and ignored, and a per-run visited set stops an index page and a
//! detail page that reference each other from ping-ponging.

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::app::ports::{FetchOptions, Fetcher};
use crate::domain::DraftEvent;
use crate::parsers::SourceParser;
use crate::pipeline::merge;
use crate::registry::{CityTable, SourceConfig};

/// Follows up to the source's link cap, enriching `drafts` in place.
/// Returns how many links were actually fetched. A link that was already
/// visited this run is skipped; an unreachable page leaves its parent
/// exactly as the index parse produced it.
pub async fn follow_links(
    drafts: &mut Vec<DraftEvent>,
    links: Vec<String>,
    parser: &dyn SourceParser,
    source: &SourceConfig,
    cities: &CityTable,
    fetcher: &dyn Fetcher,
    visited: &mut HashSet<String>,
) -> usize {
    if source.discovery_depth() == 0 || links.is_empty() {
        return 0;
    }

    let mut to_fetch: Vec<String> = Vec::new();
    for link in links.into_iter().take(source.link_cap()) {
        if visited.insert(link.clone()) {
            to_fetch.push(link);
        } else {
            debug!(source = %source.name, url = %link, "skipping already visited link");
        }
    }
    if to_fetch.is_empty() {
        return 0;
    }

    debug!(source = %source.name, count = to_fetch.len(), "following discovered links");
    let results = fetcher.fetch_many(&to_fetch, &FetchOptions::default()).await;

    for page in &results {
        if !page.has_content() {
            warn!(
                source = %source.name,
                url = %page.url,
                error = page.error.as_deref().unwrap_or("empty response"),
                "detail page unreachable, keeping index data"
            );
            continue;
        }

        let outcome = parser.parse_events(page, source, cities);
        if !outcome.additional_links.is_empty() {
            debug!(
                source = %source.name,
                url = %page.url,
                count = outcome.additional_links.len(),
                "ignoring links found beyond the first hop"
            );
        }

        for detail in outcome.events {
            let parent = drafts.iter_mut().find(|d| {
                (!d.url.is_empty() && d.url == detail.url)
                    || d.url == page.url
                    || (!d.title.trim().is_empty() && d.title.trim() == detail.title.trim())
            });
            match parent {
                Some(parent) => {
                    merge::merge_draft(parent, &detail, source);
                    debug!(source = %source.name, title = %parent.title, "enriched from detail page");
                }
                None => {
                    debug!(source = %source.name, title = %detail.title, "new event from detail page");
                    drafts.push(detail);
                }
            }
        }
    }

    to_fetch.len()
}
