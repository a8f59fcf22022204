//! Configuration loading for the sync pipeline.
//!
//! Two documents drive a run: `config.toml` with runtime settings (fetch
//! profile, file locations) and a JSON sources document describing every
//! scrape target plus the city calendar table. Sources are validated
//! individually so one bad entry never blocks the rest of the run.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::app::ports::FetchPolicy;
use crate::constants::MAX_ADDITIONAL_LINKS;
use crate::domain::MergeMode;
use crate::error::{Result, ScraperError};
use crate::parsers::ParserKind;

/// Runtime settings loaded from `config.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub fetch: FetchSettings,
    /// Path to the JSON sources document.
    #[serde(default = "default_sources_file")]
    pub sources_file: String,
}

fn default_sources_file() -> String {
    "config/sources.json".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            fetch: FetchSettings::default(),
            sources_file: default_sources_file(),
        }
    }
}

impl Settings {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let settings: Settings = toml::from_str(&raw)?;
        Ok(settings)
    }

    /// Loads settings from the given path, falling back to defaults when the
    /// file does not exist.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Builds the fetch policy for this run from the configured profile,
    /// with any explicit overrides applied on top.
    pub fn fetch_policy(&self) -> FetchPolicy {
        let mut policy = match self.fetch.profile {
            HostProfile::Constrained => FetchPolicy::constrained(),
            HostProfile::Unconstrained => FetchPolicy::unconstrained(),
        };
        if let Some(concurrency) = self.fetch.concurrency {
            policy.concurrency = concurrency.max(1);
        }
        if let Some(delay_ms) = self.fetch.delay_ms {
            policy.delay = std::time::Duration::from_millis(delay_ms);
        }
        if let Some(secs) = self.fetch.timeout_seconds {
            policy.timeout = std::time::Duration::from_secs(secs);
        }
        if let Some(agent) = &self.fetch.user_agent {
            policy.user_agent = agent.clone();
        }
        policy
    }
}

/// Fetch tuning from `config.toml`. The profile picks the baseline and the
/// optional fields override individual knobs.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FetchSettings {
    #[serde(default)]
    pub profile: HostProfile,
    #[serde(default)]
    pub concurrency: Option<usize>,
    #[serde(default)]
    pub delay_ms: Option<u64>,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    #[serde(default)]
    pub user_agent: Option<String>,
}

/// Where the scraper is running. Constrained hosts (shared runners) get one
/// request at a time with a politeness delay; unconstrained hosts fan out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HostProfile {
    Constrained,
    #[default]
    Unconstrained,
}

/// The full sources document: global defaults, the city calendar table and
/// the list of scrape targets.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SourcesDocument {
    #[serde(default)]
    pub defaults: GlobalDefaults,
    #[serde(default)]
    pub cities: CityTable,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct GlobalDefaults {
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub days_to_look_ahead: Option<i64>,
}

impl SourcesDocument {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ScraperError::Config(format!("failed to read sources file {}: {e}", path.display()))
        })?;
        let document: SourcesDocument = serde_json::from_str(&raw)?;
        Ok(document)
    }

    /// Validates every source and the city table. Returns one message per
    /// problem; callers log them and skip the offending sources while the
    /// rest of the run proceeds.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        for city in &self.cities.cities {
            if city.timezone.parse::<chrono_tz::Tz>().is_err() {
                problems.push(format!(
                    "city '{}': unknown timezone '{}'",
                    city.key, city.timezone
                ));
            }
        }
        for source in &self.sources {
            for problem in source.validate(&self.cities) {
                problems.push(format!("source '{}': {problem}", source.name));
            }
        }
        problems
    }

    /// Enabled sources that passed validation, in document order.
    pub fn runnable_sources(&self) -> Vec<&SourceConfig> {
        self.sources
            .iter()
            .filter(|s| s.enabled && s.validate(&self.cities).is_empty())
            .collect()
    }
}

/// One city calendar: the calendar identifier events are written to, the
/// IANA timezone used to anchor wall-clock dates, and the text patterns
/// that map venue/description text to this city.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CityConfig {
    pub key: String,
    pub calendar: String,
    pub timezone: String,
    #[serde(default)]
    pub patterns: Vec<String>,
}

impl CityConfig {
    /// The parsed timezone, or None when the configured name is not a valid
    /// IANA identifier. Callers fall back to UTC anchoring in that case.
    pub fn tz(&self) -> Option<chrono_tz::Tz> {
        self.timezone.parse().ok()
    }
}

/// The city table, kept in document order so pattern matching is
/// deterministic when two cities could both match.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(transparent)]
pub struct CityTable {
    pub cities: Vec<CityConfig>,
}

impl CityTable {
    pub fn get(&self, key: &str) -> Option<&CityConfig> {
        self.cities.iter().find(|c| c.key == key)
    }

    pub fn is_empty(&self) -> bool {
        self.cities.is_empty()
    }

    pub fn len(&self) -> usize {
        self.cities.len()
    }
}

/// Per-field override from source metadata: an optional fixed value plus an
/// optional merge strategy that takes precedence over the source-level mode.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct FieldOverride {
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub merge: Option<MergeMode>,
}

/// Include/exclude substring filters applied to discovered links.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct UrlFilters {
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
}

/// Operator-supplied link extraction pattern for sites the generic parser
/// handles. The regex must expose the link in capture group 1.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UrlPattern {
    pub regex: String,
    #[serde(default)]
    pub max_matches: Option<usize>,
}

impl UrlFilters {
    /// A link passes when it matches at least one include pattern (or none
    /// are configured) and no exclude pattern.
    pub fn allows(&self, url: &str) -> bool {
        if !self.include.is_empty() && !self.include.iter().any(|p| url.contains(p.as_str())) {
            return false;
        }
        !self.exclude.iter().any(|p| url.contains(p.as_str()))
    }
}

fn default_true() -> bool {
    true
}

/// Configuration for a single scrape target.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourceConfig {
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub parser: ParserKind,
    #[serde(default)]
    pub urls: Vec<String>,
    /// How many levels of discovered links to follow. Anything above one is
    /// clamped: discovered pages never contribute further links.
    #[serde(default)]
    pub url_discovery_depth: u8,
    /// Cap on discovered links per page, bounded by the global maximum.
    #[serde(default)]
    pub max_additional_urls: Option<usize>,
    /// Every event from this source is a bear event regardless of keywords.
    #[serde(default)]
    pub always_bear: bool,
    /// Drop events that match no bear keyword instead of carrying them
    /// through unflagged.
    #[serde(default)]
    pub require_keywords: bool,
    /// Keep only events whose title contains one of these phrases.
    #[serde(default)]
    pub allowlist: Vec<String>,
    /// Per-source dry-run override; falls back to the global default.
    #[serde(default)]
    pub dry_run: Option<bool>,
    #[serde(default)]
    pub merge_mode: MergeMode,
    /// Field overrides applied during normalization, keyed by field name.
    #[serde(default)]
    pub metadata: HashMap<String, FieldOverride>,
    #[serde(default)]
    pub url_filters: Option<UrlFilters>,
    /// Link extraction patterns for the generic parser, which has no
    /// built-in idea of what a detail link looks like.
    #[serde(default)]
    pub url_patterns: Vec<UrlPattern>,
    /// Event key template with `{placeholder}` substitution. When set it
    /// wins over the derived key and implies clobber semantics.
    #[serde(default)]
    pub key_template: Option<String>,
    /// City assumed when pattern matching finds nothing.
    #[serde(default)]
    pub default_city: Option<String>,
    #[serde(default)]
    pub days_to_look_ahead: Option<i64>,
    /// Keep records with no start date (venue profiles) instead of dropping
    /// them in the future filter.
    #[serde(default)]
    pub keep_dateless: bool,
}

impl SourceConfig {
    fn validate(&self, cities: &CityTable) -> Vec<String> {
        let mut problems = Vec::new();
        if self.name.trim().is_empty() {
            problems.push("missing name".to_string());
        }
        if self.urls.is_empty() {
            problems.push("no urls configured".to_string());
        }
        if let Some(city) = &self.default_city {
            if cities.get(city).is_none() {
                problems.push(format!("default_city '{city}' is not in the city table"));
            }
        }
        for field in self.metadata.keys() {
            if crate::domain::canonical_field_name(field).is_none() {
                problems.push(format!("metadata override for unknown field '{field}'"));
            }
        }
        problems
    }

    pub fn effective_dry_run(&self, global: bool) -> bool {
        self.dry_run.unwrap_or(global)
    }

    /// Discovery depth clamped to a single level.
    pub fn discovery_depth(&self) -> u8 {
        self.url_discovery_depth.min(1)
    }

    /// Per-page link cap, never above the global maximum.
    pub fn link_cap(&self) -> usize {
        self.max_additional_urls
            .map(|n| n.min(MAX_ADDITIONAL_LINKS))
            .unwrap_or(MAX_ADDITIONAL_LINKS)
    }

    /// The merge strategy for one field: the metadata override when present,
    /// otherwise the source-level mode. Override keys are matched through
    /// the alias table, so `ig` and `instagram` declare the same field.
    pub fn merge_strategy_for(&self, field: &str) -> MergeMode {
        let wanted = crate::domain::canonical_field_name(field).unwrap_or(field);
        for (key, over) in &self.metadata {
            let canonical = crate::domain::canonical_field_name(key).unwrap_or(key.as_str());
            if canonical == wanted {
                if let Some(mode) = over.merge {
                    return mode;
                }
            }
        }
        self.merge_mode
    }

    pub fn look_ahead_days(&self, global: Option<i64>) -> Option<i64> {
        self.days_to_look_ahead.or(global)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_document() -> SourcesDocument {
        let raw = r#"{
            "defaults": { "dry_run": true, "days_to_look_ahead": 90 },
            "cities": [
                {
                    "key": "nyc",
                    "calendar": "chunky-dad-nyc",
                    "timezone": "America/New_York",
                    "patterns": ["new york", "nyc", "brooklyn", "manhattan"]
                },
                {
                    "key": "la",
                    "calendar": "chunky-dad-la",
                    "timezone": "America/Los_Angeles",
                    "patterns": ["los angeles", "weho"]
                }
            ],
            "sources": [
                {
                    "name": "megawoof-america",
                    "parser": "eventbrite",
                    "urls": ["https://www.eventbrite.com/o/megawoof-america-18118960687"],
                    "always_bear": true,
                    "url_discovery_depth": 1,
                    "metadata": {
                        "instagram": { "value": "https://instagram.com/megawoof_america", "merge": "preserve" }
                    }
                },
                {
                    "name": "broken",
                    "parser": "generic",
                    "urls": []
                }
            ]
        }"#;
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn document_parses_with_defaults() {
        let doc = sample_document();
        assert!(doc.defaults.dry_run);
        assert_eq!(doc.defaults.days_to_look_ahead, Some(90));
        assert_eq!(doc.cities.len(), 2);
        assert_eq!(doc.sources.len(), 2);

        let megawoof = &doc.sources[0];
        assert!(megawoof.enabled, "sources default to enabled");
        assert!(megawoof.always_bear);
        assert_eq!(megawoof.parser, ParserKind::Eventbrite);
        assert_eq!(megawoof.discovery_depth(), 1);
        assert_eq!(
            megawoof.merge_strategy_for("instagram"),
            MergeMode::Preserve
        );
        assert_eq!(megawoof.merge_strategy_for("title"), MergeMode::Upsert);
    }

    #[test]
    fn validation_flags_broken_sources_but_keeps_the_rest() {
        let doc = sample_document();
        let problems = doc.validate();
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("broken"));
        assert!(problems[0].contains("no urls"));

        let runnable = doc.runnable_sources();
        assert_eq!(runnable.len(), 1);
        assert_eq!(runnable[0].name, "megawoof-america");
    }

    #[test]
    fn validation_flags_unknown_timezone_and_city() {
        let raw = r#"{
            "cities": [
                { "key": "x", "calendar": "cal-x", "timezone": "Mars/Olympus" }
            ],
            "sources": [
                {
                    "name": "s",
                    "parser": "generic",
                    "urls": ["https://example.com"],
                    "default_city": "nowhere"
                }
            ]
        }"#;
        let doc: SourcesDocument = serde_json::from_str(raw).unwrap();
        let problems = doc.validate();
        assert!(problems.iter().any(|p| p.contains("Mars/Olympus")));
        assert!(problems.iter().any(|p| p.contains("nowhere")));
    }

    #[test]
    fn link_cap_is_bounded_by_the_global_maximum() {
        let mut source = sample_document().sources[0].clone();
        source.max_additional_urls = Some(500);
        assert_eq!(source.link_cap(), MAX_ADDITIONAL_LINKS);
        source.max_additional_urls = Some(5);
        assert_eq!(source.link_cap(), 5);
        source.max_additional_urls = None;
        assert_eq!(source.link_cap(), MAX_ADDITIONAL_LINKS);
    }

    #[test]
    fn url_filters_require_include_and_honor_exclude() {
        let filters = UrlFilters {
            include: vec!["eventbrite.com/e/".to_string()],
            exclude: vec!["/sold-out".to_string()],
        };
        assert!(filters.allows("https://www.eventbrite.com/e/bears-123"));
        assert!(!filters.allows("https://www.eventbrite.com/o/org-1"));
        assert!(!filters.allows("https://www.eventbrite.com/e/bears-123/sold-out"));
        assert!(UrlFilters::default().allows("https://anything.example"));
    }

    #[test]
    fn settings_profile_drives_fetch_policy() {
        let settings: Settings = toml::from_str(
            r#"
            sources_file = "config/sources.json"

            [fetch]
            profile = "constrained"
            timeout_seconds = 10
            "#,
        )
        .unwrap();
        let policy = settings.fetch_policy();
        assert_eq!(policy.concurrency, 1);
        assert!(policy.delay > std::time::Duration::ZERO);
        assert_eq!(policy.timeout, std::time::Duration::from_secs(10));

        let default_policy = Settings::default().fetch_policy();
        assert!(default_policy.concurrency > 1);
        assert_eq!(default_policy.delay, std::time::Duration::ZERO);
    }
}
