//! Ready-made analyzers
//!
//! - [`EventStatsAnalyzer`]: per-event counters with JSON export
//! - [`EventLogAnalyzer`]: formatted events over a crossbeam channel

pub mod event_log;
pub mod event_stats;

pub use event_log::{EventLogAnalyzer, LoggedEvent};
pub use event_stats::{EventStats, EventStatsAnalyzer, EventSummary, StatsReport};
