//! Shared constants for classification and crawl limits.

/// Keyword set used to classify an event as a bear event. Matching is
/// case-insensitive over the combined title, description, and venue text.
pub const BEAR_KEYWORDS: &[&str] = &[
    "bear",
    "bears",
    "woof",
    "grr",
    "furry",
    "hairy",
    "daddy",
    "cub",
    "otter",
    "leather",
    "muscle bear",
    "bearracuda",
    "furball",
    "megawoof",
    "leather bears",
    "bear night",
    "bear party",
    "polar bear",
    "grizzly",
];

/// Hard cap on follow-up links a single parse may hand to link discovery.
pub const MAX_ADDITIONAL_LINKS: usize = 20;

/// Fan-out for the unconstrained host profile. Kept small to stay polite
/// to upstream sites.
pub const DEFAULT_CONCURRENCY: usize = 3;

/// Inter-request delay for the constrained host profile.
pub const DEFAULT_DELAY_MS: u64 = 1_000;

/// Per-request deadline. A request past this is abandoned and reported as
/// a failed fetch, never retried within the run.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// User agent sent with every outbound request.
pub const DEFAULT_USER_AGENT: &str = "chunky-scraper/0.1";

/// Calendar that receives events whose city matched nothing in the table.
/// An operator reviewing this calendar usually ends up adding a pattern.
pub const FALLBACK_CALENDAR: &str = "chunky-dad-unsorted";
