//! Environment adapters. Everything that touches the outside world lives
//! here and is injected into the pipeline behind the ports in
//! [`crate::app::ports`].

pub mod http_fetcher;
pub mod memory_calendar;

pub use http_fetcher::HttpFetcher;
pub use memory_calendar::InMemoryCalendar;
