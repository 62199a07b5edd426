// =============================================================================
// Confluence Engine Module
// =============================================================================

pub mod confluence;
pub mod decision;
pub mod snapshot;

pub use confluence::{ConfluenceEngine, EvaluationContext};
pub use snapshot::{Signal, Snapshot};
