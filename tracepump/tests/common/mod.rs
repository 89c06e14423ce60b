//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use tracepump::analysis::{AnalysisEngine, Analyzer, BeginContext, EventContext, EventTypeInfo};
use tracepump::config::EngineConfig;
use tracepump::domain::{ProtocolVersion, RouteId, TransportKind};
use tracepump::encode::{EventWriter, FieldSpec, FieldType};
use tracepump::stream::StreamBuffer;
use tracepump_common::FLAG_MAYBE_HAS_AUX;

pub const TICK: u16 = 5;
pub const LABEL: u16 = 6;

/// One observed analyzer callback.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    NewEvent { analyzer: &'static str, route: u16, name: String },
    Event {
        analyzer: &'static str,
        route: u16,
        thread: u16,
        name: String,
        id: Option<u64>,
        text: Option<String>,
    },
    End { analyzer: &'static str },
}

impl Call {
    pub fn is_event(&self, event_name: &str) -> bool {
        matches!(self, Call::Event { name, .. } if name == event_name)
    }
}

pub type CallLog = Arc<Mutex<Vec<Call>>>;

#[derive(Debug, Clone, Copy)]
pub enum Subscription {
    Exact(u16, &'static str, &'static str),
    All(u16),
}

/// Records every callback into a log that may be shared by several
/// recorders.
pub struct Recorder {
    name: &'static str,
    subscriptions: Vec<Subscription>,
    log: CallLog,
    retire_after: Option<usize>,
    seen: usize,
}

impl Recorder {
    pub fn new(name: &'static str, subscriptions: &[Subscription], log: &CallLog) -> Self {
        Self {
            name,
            subscriptions: subscriptions.to_vec(),
            log: Arc::clone(log),
            retire_after: None,
            seen: 0,
        }
    }

    /// Returns false from the `count`th event callback.
    pub fn retire_after(mut self, count: usize) -> Self {
        self.retire_after = Some(count);
        self
    }
}

impl Analyzer for Recorder {
    fn on_analysis_begin(&mut self, context: &mut BeginContext<'_>) -> bool {
        for subscription in &self.subscriptions {
            match *subscription {
                Subscription::Exact(id, logger, event) => {
                    context.route(RouteId(id), logger, event);
                }
                Subscription::All(id) => {
                    context.route_all(RouteId(id));
                }
            }
        }
        true
    }

    fn on_new_event(&mut self, route: RouteId, event_type: &EventTypeInfo<'_>) -> bool {
        self.log.lock().unwrap().push(Call::NewEvent {
            analyzer: self.name,
            route: route.0,
            name: format!("{}.{}", event_type.logger_name(), event_type.event_name()),
        });
        true
    }

    fn on_event(&mut self, route: RouteId, context: &EventContext<'_>) -> bool {
        let event = context.event();
        let event_type = event.type_info();
        self.log.lock().unwrap().push(Call::Event {
            analyzer: self.name,
            route: route.0,
            thread: context.thread().0,
            name: format!("{}.{}", event_type.logger_name(), event_type.event_name()),
            id: event.value::<u64>("Id"),
            text: event.string("Name").map(str::to_owned),
        });
        self.seen += 1;
        self.retire_after.map_or(true, |limit| self.seen < limit)
    }

    fn on_analysis_end(&mut self) {
        self.log.lock().unwrap().push(Call::End { analyzer: self.name });
    }
}

pub fn new_log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// Engine with one recorder routed to App.Tick, App.Label and everything.
pub fn recording_engine(log: &CallLog) -> AnalysisEngine {
    let recorder = Recorder::new(
        "rec",
        &[
            Subscription::Exact(1, "App", "Tick"),
            Subscription::Exact(2, "App", "Label"),
        ],
        log,
    );
    AnalysisEngine::new(vec![Box::new(recorder)], EngineConfig::default())
}

/// Writer with the control events, a NewTrace and the App schema declared.
pub fn app_writer(protocol: ProtocolVersion) -> EventWriter {
    let mut writer = EventWriter::new(protocol);
    writer.declare_control_events();
    writer.new_trace(2, 0);
    declare_app_events(&mut writer);
    writer
}

pub fn declare_app_events(writer: &mut EventWriter) {
    writer.declare(TICK, "App", "Tick", 0, &[FieldSpec::new("Id", FieldType::U32)]);
    writer.declare(
        LABEL,
        "App",
        "Label",
        FLAG_MAYBE_HAS_AUX,
        &[FieldSpec::new("Id", FieldType::U32), FieldSpec::new("Name", FieldType::STRING)],
    );
}

/// Preamble for `kind` followed by `body`.
pub fn with_preamble(kind: TransportKind, protocol: ProtocolVersion, body: &[u8]) -> Vec<u8> {
    let mut stream = EventWriter::preamble(kind, protocol).to_vec();
    stream.extend_from_slice(body);
    stream
}

/// Feeds `chunks` one at a time through a buffer, as a host would.
pub fn feed_chunks<'a>(engine: &mut AnalysisEngine, chunks: impl IntoIterator<Item = &'a [u8]>) {
    let mut buffer = StreamBuffer::new();
    for chunk in chunks {
        buffer.append(chunk);
        engine.on_data(&mut buffer);
    }
}

pub fn events(log: &CallLog, event_name: &str) -> Vec<Call> {
    log.lock().unwrap().iter().filter(|call| call.is_event(event_name)).cloned().collect()
}

pub fn event_ids(log: &CallLog, event_name: &str) -> Vec<u64> {
    events(log, event_name)
        .into_iter()
        .filter_map(|call| match call {
            Call::Event { id, .. } => id,
            _ => None,
        })
        .collect()
}
