//! Per-event statistics aggregated as records stream in.
//!
//! # Architecture
//!
//! - **`EventStatsAnalyzer`** - Wildcard analyzer feeding a shared `EventStats`
//! - **`EventStats::report()`** - Sorted, serializable snapshot
//!
//! ## Data Flow
//!
//! ```text
//! pump thread                       host thread
//!     │                                 │
//!     ├──► on_new_event() ─┐            │
//!     │                    ├──► Arc<Mutex<EventStats>> ◄── report()
//!     └──► on_event() ─────┘
//! ```
//!
//! # Performance
//!
//! - `on_event()`: O(1) amortized (one lock, one `HashMap` update)
//! - `report()`: O(n log n) where n = declared event types

// Percentage calculations intentionally convert u64 to f64
#![allow(clippy::cast_precision_loss)]

use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use crate::analysis::{Analyzer, BeginContext, EventContext, EventTypeInfo, SessionContext};
use crate::domain::{RouteId, ThreadId, Uid};

// =============================================================================
// REPORT (OUTPUT TYPES)
// =============================================================================

/// Counters for one declared event type.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventSummary {
    pub uid: u16,
    pub logger: String,
    pub event: String,
    pub count: u64,
    /// Fixed-part bytes; aux data is not included.
    pub bytes: u64,
    /// Share of all counted events (0.0 - 100.0).
    pub percentage: f64,
}

/// Snapshot written by `--export`.
#[derive(Debug, Clone, Serialize)]
pub struct StatsReport {
    pub session: SessionContext,
    pub total_events: u64,
    pub total_bytes: u64,
    pub threads: usize,
    pub finished: bool,
    /// Busiest first.
    pub events: Vec<EventSummary>,
}

// =============================================================================
// AGGREGATION
// =============================================================================

#[derive(Debug, Default)]
struct EventCounter {
    logger: String,
    event: String,
    count: u64,
    bytes: u64,
}

#[derive(Debug, Default)]
pub struct EventStats {
    session: SessionContext,
    per_event: HashMap<Uid, EventCounter>,
    threads: HashSet<ThreadId>,
    total_events: u64,
    total_bytes: u64,
    finished: bool,
}

impl EventStats {
    #[must_use]
    pub fn total_events(&self) -> u64 {
        self.total_events
    }

    /// Whether the engine has ended the session.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Events counted for `logger.event` so far.
    #[must_use]
    pub fn count_of(&self, logger: &str, event: &str) -> u64 {
        self.per_event
            .values()
            .filter(|counter| counter.logger == logger && counter.event == event)
            .map(|counter| counter.count)
            .sum()
    }

    #[must_use]
    pub fn report(&self) -> StatsReport {
        let total = self.total_events.max(1) as f64;
        let mut events: Vec<EventSummary> = self
            .per_event
            .iter()
            .map(|(uid, counter)| EventSummary {
                uid: uid.0,
                logger: counter.logger.clone(),
                event: counter.event.clone(),
                count: counter.count,
                bytes: counter.bytes,
                percentage: counter.count as f64 * 100.0 / total,
            })
            .collect();
        events.sort_by(|a, b| b.count.cmp(&a.count).then(a.uid.cmp(&b.uid)));

        StatsReport {
            session: self.session.clone(),
            total_events: self.total_events,
            total_bytes: self.total_bytes,
            threads: self.threads.len(),
            finished: self.finished,
            events,
        }
    }

    /// Writes [`report`](Self::report) as pretty JSON.
    ///
    /// # Errors
    ///
    /// Fails when serialization or the underlying writer fails.
    pub fn write_json(&self, writer: impl Write) -> serde_json::Result<()> {
        serde_json::to_writer_pretty(writer, &self.report())
    }

    fn declare(&mut self, event_type: &EventTypeInfo<'_>) {
        let counter = self.per_event.entry(event_type.uid()).or_default();
        counter.logger = event_type.logger_name().to_owned();
        counter.event = event_type.event_name().to_owned();
    }

    fn record(&mut self, context: &EventContext<'_>) {
        let event = context.event();
        let event_type = event.type_info();
        let bytes = event.raw().len() as u64;

        if event_type.uid().is_control() {
            self.session = context.session().clone();
        }
        let counter = self.per_event.entry(event_type.uid()).or_default();
        counter.count += 1;
        counter.bytes += bytes;
        self.total_events += 1;
        self.total_bytes += bytes;
        self.threads.insert(context.thread());
    }
}

// =============================================================================
// ANALYZER
// =============================================================================

/// Counts every event of the session.
#[derive(Debug, Default)]
pub struct EventStatsAnalyzer {
    stats: Arc<Mutex<EventStats>>,
}

impl EventStatsAnalyzer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared view of the counters, readable while the pump thread runs.
    #[must_use]
    pub fn handle(&self) -> Arc<Mutex<EventStats>> {
        Arc::clone(&self.stats)
    }

    fn lock(&self) -> MutexGuard<'_, EventStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Analyzer for EventStatsAnalyzer {
    fn on_analysis_begin(&mut self, context: &mut BeginContext<'_>) -> bool {
        self.lock().session = context.session().clone();
        context.route_all(RouteId(0));
        true
    }

    fn on_new_event(&mut self, _route: RouteId, event_type: &EventTypeInfo<'_>) -> bool {
        self.lock().declare(event_type);
        true
    }

    fn on_event(&mut self, _route: RouteId, context: &EventContext<'_>) -> bool {
        self.lock().record(context);
        true
    }

    fn on_analysis_end(&mut self) {
        self.lock().finished = true;
    }
}
