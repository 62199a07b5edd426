// =============================================================================
// Session Control — wizard, per-user sessions, signal reports
// =============================================================================

pub mod manager;
pub mod report;
pub mod runtime;
pub mod wizard;

pub use manager::{BinanceFeedFactory, SessionManager, UserId};
pub use runtime::ConsoleSink;
pub use wizard::Wizard;
