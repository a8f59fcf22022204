//! Everything between a parsed draft and the calendar store: link
//! discovery, normalization, merge and duplicate reconciliation, the notes
//! blob, and the orchestrator that runs a whole sync.

pub mod discovery;
pub mod merge;
pub mod normalize;
pub mod notes;
pub mod orchestrator;

pub use normalize::Normalizer;
pub use orchestrator::Orchestrator;
