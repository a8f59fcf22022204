use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::constants;
use crate::domain::Event;
use crate::error::Result;

/// Outcome of a single fetch. Failures are data, not errors: a fetch that
/// times out or returns a non-success status still produces a result with
/// `success == false`, so one bad URL never aborts a batch.
#[derive(Clone, Debug)]
pub struct FetchResult {
    pub url: String,
    pub content: String,
    pub status: Option<u16>,
    pub headers: HashMap<String, String>,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub error: Option<String>,
}

impl FetchResult {
    pub fn failure(url: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            content: String::new(),
            status: None,
            headers: HashMap::new(),
            timestamp: Utc::now(),
            success: false,
            error: Some(error.into()),
        }
    }

    pub fn has_content(&self) -> bool {
        self.success && !self.content.is_empty()
    }
}

/// Per-call fetch overrides. Policy-level settings (concurrency, pacing)
/// live on the adapter itself.
#[derive(Clone, Debug, Default)]
pub struct FetchOptions {
    pub timeout: Option<Duration>,
    pub headers: Vec<(String, String)>,
}

/// Host-profile networking policy, fixed at adapter construction.
#[derive(Clone, Debug)]
pub struct FetchPolicy {
    pub concurrency: usize,
    pub delay: Duration,
    pub timeout: Duration,
    pub user_agent: String,
}

impl FetchPolicy {
    /// Serial fetching with an inter-request delay. Used where the host
    /// cannot sustain parallel connections.
    pub fn constrained() -> Self {
        Self {
            concurrency: 1,
            delay: Duration::from_millis(constants::DEFAULT_DELAY_MS),
            timeout: Duration::from_secs(constants::DEFAULT_TIMEOUT_SECS),
            user_agent: constants::DEFAULT_USER_AGENT.to_string(),
        }
    }

    /// Bounded parallel fetching with no pacing delay.
    pub fn unconstrained() -> Self {
        Self {
            concurrency: constants::DEFAULT_CONCURRENCY,
            delay: Duration::ZERO,
            timeout: Duration::from_secs(constants::DEFAULT_TIMEOUT_SECS),
            user_agent: constants::DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// Environment adapter for outbound HTTP. Implementations are injected at
/// startup; nothing in the pipeline probes its environment.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str, options: &FetchOptions) -> FetchResult;

    /// Fetch a batch. Results correspond index-for-index to the input
    /// URLs regardless of internal completion order.
    async fn fetch_many(&self, urls: &[String], options: &FetchOptions) -> Vec<FetchResult> {
        let mut results = Vec::with_capacity(urls.len());
        for url in urls {
            results.push(self.fetch(url, options).await);
        }
        results
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
}

/// Write target for the final batch. Upserts are keyed by the event's
/// identity key, so re-running the orchestrator is safe.
#[async_trait]
pub trait CalendarStore: Send + Sync {
    async fn upsert(&self, calendar: &str, event: &Event) -> Result<UpsertOutcome>;
}
