//! Formats routed events and streams them to another thread.

use std::fmt;

use crossbeam_channel::{Sender, TrySendError};
use log::warn;
use serde::Serialize;

use crate::analysis::{Analyzer, BeginContext, EventContext, EventData, FieldInfo};
use crate::domain::{RouteId, ThreadId};

/// One event rendered to text, ready for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoggedEvent {
    pub thread: u16,
    pub uid: u16,
    pub logger: String,
    pub event: String,
    pub serial: Option<u32>,
    /// `(name, value)` in declaration order.
    pub fields: Vec<(String, String)>,
}

impl LoggedEvent {
    fn capture(thread: ThreadId, event: &EventData<'_>) -> Self {
        let event_type = event.type_info();
        Self {
            thread: thread.0,
            uid: event_type.uid().0,
            logger: event_type.logger_name().to_owned(),
            event: event_type.event_name().to_owned(),
            serial: event.serial(),
            fields: event_type
                .fields()
                .map(|field| (field.name().to_owned(), render_field(event, &field)))
                .collect(),
        }
    }
}

impl fmt::Display for LoggedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[TID:{}] {}.{}", self.thread, self.logger, self.event)?;
        for (name, value) in &self.fields {
            write!(f, " {name}={value}")?;
        }
        Ok(())
    }
}

fn render_field(event: &EventData<'_>, field: &FieldInfo<'_>) -> String {
    if !field.is_array() {
        return event.scalar(field.name()).map_or_else(|| "?".into(), |value| value.to_string());
    }
    if field.size() == 1 && !field.is_signed() {
        if let Some(text) = event.string(field.name()) {
            return format!("{text:?}");
        }
    }
    if field.is_float() {
        format!("{:?}", event.array::<f64>(field.name()).iter().collect::<Vec<_>>())
    } else if field.is_signed() {
        format!("{:?}", event.array::<i64>(field.name()).iter().collect::<Vec<_>>())
    } else {
        format!("{:?}", event.array::<u64>(field.name()).iter().collect::<Vec<_>>())
    }
}

/// Sends every user event (or a filtered subset) over a channel.
///
/// Sending never blocks the pump thread: events are dropped while the
/// channel is full. The analyzer retires once the receiver is gone.
pub struct EventLogAnalyzer {
    sender: Sender<LoggedEvent>,
    filter: Vec<(String, String)>,
    dropped: u64,
}

impl EventLogAnalyzer {
    #[must_use]
    pub fn new(sender: Sender<LoggedEvent>) -> Self {
        Self { sender, filter: Vec::new(), dropped: 0 }
    }

    /// Restricts the log to the given `Logger.Event` names.
    #[must_use]
    pub fn with_filter<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for name in names {
            match name.as_ref().split_once('.') {
                Some((logger, event)) => self.filter.push((logger.to_owned(), event.to_owned())),
                None => warn!("ignoring event filter {:?}: expected Logger.Event", name.as_ref()),
            }
        }
        self
    }

    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl Analyzer for EventLogAnalyzer {
    fn on_analysis_begin(&mut self, context: &mut BeginContext<'_>) -> bool {
        if self.filter.is_empty() {
            context.route_all(RouteId(0));
        }
        for (logger, event) in &self.filter {
            context.route(RouteId(0), logger, event);
        }
        true
    }

    fn on_event(&mut self, _route: RouteId, context: &EventContext<'_>) -> bool {
        let event = context.event();
        if event.type_info().uid().is_control() {
            return true;
        }
        match self.sender.try_send(LoggedEvent::capture(context.thread(), event)) {
            Ok(()) => true,
            // Non-blocking send (drop if the consumer is slow)
            Err(TrySendError::Full(_)) => {
                self.dropped += 1;
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    fn on_analysis_end(&mut self) {
        if self.dropped > 0 {
            warn!("event log dropped {} events while its consumer was busy", self.dropped);
        }
    }
}
