use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::app::ports::{CalendarStore, UpsertOutcome};
use crate::domain::Event;
use crate::error::Result;

/// Calendar store that keeps events in memory, keyed by calendar name and
/// event key. The default store for local runs and tests; a hosted calendar
/// backend implements the same port.
#[derive(Default)]
pub struct InMemoryCalendar {
    events: Mutex<HashMap<(String, String), Event>>,
}

impl InMemoryCalendar {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, calendar: &str, key: &str) -> Option<Event> {
        let events = self.events.lock().await;
        events.get(&(calendar.to_string(), key.to_string())).cloned()
    }

    /// All events written to one calendar, sorted by key for stable output.
    pub async fn events_in(&self, calendar: &str) -> Vec<Event> {
        let events = self.events.lock().await;
        let mut found: Vec<Event> = events
            .iter()
            .filter(|((cal, _), _)| cal == calendar)
            .map(|(_, event)| event.clone())
            .collect();
        found.sort_by(|a, b| a.key.cmp(&b.key));
        found
    }

    pub async fn total(&self) -> usize {
        self.events.lock().await.len()
    }
}

#[async_trait]
impl CalendarStore for InMemoryCalendar {
    async fn upsert(&self, calendar: &str, event: &Event) -> Result<UpsertOutcome> {
        let mut events = self.events.lock().await;
        let previous = events.insert(
            (calendar.to_string(), event.key.clone()),
            event.clone(),
        );
        Ok(match previous {
            Some(_) => UpsertOutcome::Updated,
            None => UpsertOutcome::Created,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(key: &str, title: &str) -> Event {
        Event {
            key: key.to_string(),
            title: title.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn upsert_reports_created_then_updated() {
        let store = InMemoryCalendar::new();
        let outcome = store
            .upsert("chunky-dad-nyc", &event("bear-night|2026-09-01|eagle", "Bear Night"))
            .await
            .unwrap();
        assert_eq!(outcome, UpsertOutcome::Created);

        let outcome = store
            .upsert("chunky-dad-nyc", &event("bear-night|2026-09-01|eagle", "Bear Night!"))
            .await
            .unwrap();
        assert_eq!(outcome, UpsertOutcome::Updated);

        let stored = store
            .get("chunky-dad-nyc", "bear-night|2026-09-01|eagle")
            .await
            .unwrap();
        assert_eq!(stored.title, "Bear Night!");
        assert_eq!(store.total().await, 1);
    }

    #[tokio::test]
    async fn calendars_are_isolated() {
        let store = InMemoryCalendar::new();
        store
            .upsert("chunky-dad-nyc", &event("a|2026-09-01|x", "A"))
            .await
            .unwrap();
        store
            .upsert("chunky-dad-la", &event("a|2026-09-01|x", "A"))
            .await
            .unwrap();
        assert_eq!(store.total().await, 2);
        assert_eq!(store.events_in("chunky-dad-nyc").await.len(), 1);
    }
}
