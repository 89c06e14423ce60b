//! Analyzer interface and the engine's analyzer slots.

use log::info;

use super::event::{EventContext, EventTypeInfo};
use super::routing::BeginContext;
use crate::domain::RouteId;

/// Consumer of decoded events.
///
/// Every callback that returns `false` retires the analyzer: it receives
/// [`on_analysis_end`](Self::on_analysis_end) once the current pump pass
/// finishes and nothing after that.
pub trait Analyzer: Send {
    /// Called once when the stream's NewTrace event arrives. Register routes
    /// here; an analyzer that registers none is retired.
    fn on_analysis_begin(&mut self, context: &mut BeginContext<'_>) -> bool;

    /// A dispatch matching one of this analyzer's routes became known.
    fn on_new_event(&mut self, _route: RouteId, _event_type: &EventTypeInfo<'_>) -> bool {
        true
    }

    fn on_event(&mut self, route: RouteId, context: &EventContext<'_>) -> bool;

    fn on_analysis_end(&mut self) {}
}

enum AnalyzerSlot {
    Active(Box<dyn Analyzer>),
    Retired,
}

/// Analyzer slots indexed by registration order.
///
/// Retirement requested during a pass is queued; the analyzer is skipped
/// immediately but only leaves its slot in [`apply_retirements`](Self::apply_retirements).
pub(crate) struct AnalyzerSet {
    slots: Vec<AnalyzerSlot>,
    retiring: Vec<bool>,
    queued: Vec<usize>,
}

impl AnalyzerSet {
    pub(crate) fn new(analyzers: Vec<Box<dyn Analyzer>>) -> Self {
        let count = analyzers.len();
        Self {
            slots: analyzers.into_iter().map(AnalyzerSlot::Active).collect(),
            retiring: vec![false; count],
            queued: Vec::new(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    /// Analyzers that will still receive events.
    pub(crate) fn active_count(&self) -> usize {
        (0..self.slots.len()).filter(|&index| self.is_active(index)).count()
    }

    pub(crate) fn is_active(&self, index: usize) -> bool {
        matches!(self.slots.get(index), Some(AnalyzerSlot::Active(_))) && !self.retiring[index]
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut dyn Analyzer> {
        if self.retiring.get(index).copied().unwrap_or(true) {
            return None;
        }
        match self.slots.get_mut(index) {
            Some(AnalyzerSlot::Active(analyzer)) => Some(analyzer.as_mut()),
            _ => None,
        }
    }

    /// Queues retirement. Repeated requests are no-ops.
    pub(crate) fn retire(&mut self, index: usize) {
        if self.is_active(index) {
            self.retiring[index] = true;
            self.queued.push(index);
        }
    }

    /// Ends and releases every analyzer retired since the last call.
    pub(crate) fn apply_retirements(&mut self) {
        for index in std::mem::take(&mut self.queued) {
            if let AnalyzerSlot::Active(mut analyzer) =
                std::mem::replace(&mut self.slots[index], AnalyzerSlot::Retired)
            {
                analyzer.on_analysis_end();
                info!("analyzer #{index} retired");
            }
        }
    }

    /// Ends every analyzer still holding a slot.
    pub(crate) fn end_all(&mut self) {
        self.apply_retirements();
        for slot in &mut self.slots {
            if let AnalyzerSlot::Active(mut analyzer) = std::mem::replace(slot, AnalyzerSlot::Retired) {
                analyzer.on_analysis_end();
            }
        }
    }
}
