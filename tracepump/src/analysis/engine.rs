//! # Analysis Engine
//!
//! Turns the transport-framed byte stream into typed events and routes them
//! to analyzers.
//!
//! ## State Machine
//!
//! ```text
//! AwaitingTransport ──[magic]? [transport][protocol]──► TransportEstablished(p)
//!         │                                                    │ first record
//!         │ unknown transport / protocol                       ▼
//!         └──────────────────────► Failed ◄──── fatal ──── Decoding(p)
//! ```
//!
//! ## Record Decoding
//!
//! Each record is decoded only once it is completely buffered, aux block
//! included; a short record leaves the stream untouched until the next
//! [`AnalysisEngine::on_data`]. Under protocol 2 a record whose serial is not
//! the expected one also stays in place, which lets other thread substreams
//! catch up first.

use log::{debug, error, info, warn};
use serde::Serialize;
use tracepump_common::{
    parse_aux_header, parse_serial, EventHeader, TransportHeader, AUX_DATA_BIT, AUX_HEADER_SIZE,
    AUX_TERMINATOR, FIELD_CHANNEL_ENABLED, FIELD_CHANNEL_ID, FIELD_CHANNEL_NAME,
    FIELD_CYCLE_FREQUENCY, FIELD_START_CYCLE, FIELD_TIMESTAMP, FIELD_VERSION, MAGIC, SERIAL_MASK,
    SERIAL_SIZE, UID_CHANNEL_ANNOUNCE, UID_CHANNEL_TOGGLE, UID_MASK, UID_NEW_TRACE,
    UID_SERIAL_FLAG, UID_TIMING,
};

use super::analyzer::{Analyzer, AnalyzerSet};
use super::dispatch::{parse_new_event, DispatchTable};
use super::event::{AuxSpan, EventContext, EventData, EventTypeInfo};
use super::routing::{BeginContext, RouteTable};
use super::session::{ChannelTable, SessionContext};
use crate::config::EngineConfig;
use crate::domain::{DecodeError, ProtocolVersion, ThreadId, TransportKind, Uid};
use crate::stream::StreamReader;
use crate::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    AwaitingTransport,
    TransportEstablished(ProtocolVersion),
    Decoding(ProtocolVersion),
    Failed,
}

/// Running totals over one session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub events: u64,
    pub bytes: u64,
    pub declarations: u64,
    pub schema_errors: u64,
    pub unknown_events: u64,
    pub serial_gaps: u64,
}

enum Step {
    Consumed,
    NeedData,
    SerialMismatch(u32),
}

/// Control events the engine applies to its own state, copied out of the
/// record before the state is touched.
enum ControlEvent {
    NewTrace { version: u32, timestamp: u64 },
    Timing { start_cycle: u64, cycle_frequency: u64 },
    ChannelAnnounce { id: u32, name: String },
    ChannelToggle { id: u32, enabled: bool },
}

impl ControlEvent {
    fn parse(uid: Uid, event: &EventData<'_>) -> Option<Self> {
        let control = match uid.0 {
            UID_NEW_TRACE => Self::NewTrace {
                version: event.value(FIELD_VERSION).unwrap_or_default(),
                timestamp: event.value(FIELD_TIMESTAMP).unwrap_or_default(),
            },
            UID_TIMING => Self::Timing {
                start_cycle: event.value(FIELD_START_CYCLE).unwrap_or_default(),
                cycle_frequency: event.value(FIELD_CYCLE_FREQUENCY).unwrap_or_default(),
            },
            UID_CHANNEL_ANNOUNCE => Self::ChannelAnnounce {
                id: event.value(FIELD_CHANNEL_ID).unwrap_or_default(),
                name: event.string(FIELD_CHANNEL_NAME).unwrap_or_default().to_owned(),
            },
            UID_CHANNEL_TOGGLE => Self::ChannelToggle {
                id: event.value(FIELD_CHANNEL_ID).unwrap_or_default(),
                enabled: event.value(FIELD_CHANNEL_ENABLED).unwrap_or_default(),
            },
            _ => return None,
        };
        Some(control)
    }
}

pub struct AnalysisEngine {
    config: EngineConfig,
    status: EngineStatus,
    protocol: ProtocolVersion,
    transport: Option<Transport>,
    dispatches: DispatchTable,
    routes: RouteTable,
    wildcard: Option<usize>,
    analyzers: AnalyzerSet,
    session: SessionContext,
    channels: ChannelTable,
    next_serial: u32,
    aux_spans: Vec<AuxSpan>,
    /// Analyzers already offered the current record, indexed by slot.
    served: Vec<bool>,
    begun: bool,
    ended: bool,
    stats: EngineStats,
}

impl AnalysisEngine {
    #[must_use]
    pub fn new(analyzers: Vec<Box<dyn Analyzer>>, config: EngineConfig) -> Self {
        Self {
            config,
            status: EngineStatus::AwaitingTransport,
            protocol: ProtocolVersion::V0,
            transport: None,
            dispatches: DispatchTable::new(),
            routes: RouteTable::new(),
            wildcard: None,
            analyzers: AnalyzerSet::new(analyzers),
            session: SessionContext::default(),
            channels: ChannelTable::default(),
            next_serial: 0,
            aux_spans: Vec::new(),
            served: Vec::new(),
            begun: false,
            ended: false,
            stats: EngineStats::default(),
        }
    }

    /// Decodes everything `input` currently holds.
    ///
    /// Complete frames and records are consumed; a trailing partial one is
    /// left in `input` for the next call. Returns whether further data can
    /// still reach an analyzer.
    pub fn on_data(&mut self, input: &mut dyn StreamReader) -> bool {
        if self.ended {
            return false;
        }
        if let Err(err) = self.pump(input) {
            error!("trace decode failed: {err}");
            self.status = EngineStatus::Failed;
        }
        self.analyzers.apply_retirements();
        self.is_active()
    }

    /// Notifies every remaining analyzer that the session is over. Later
    /// calls do nothing.
    pub fn end(&mut self) {
        if self.ended {
            return;
        }
        self.ended = true;
        self.analyzers.end_all();

        let parked = self.transport.as_ref().map_or(0, Transport::parked_frames);
        if parked > 0 {
            warn!("{parked} frames were still waiting for an earlier serial");
        }
        info!(
            "analysis ended: {} events, {} declarations, {} unknown records, {} schema errors",
            self.stats.events,
            self.stats.declarations,
            self.stats.unknown_events,
            self.stats.schema_errors
        );
    }

    #[must_use]
    pub fn status(&self) -> EngineStatus {
        self.status
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.ended
            && self.status != EngineStatus::Failed
            && (!self.begun || self.analyzers.active_count() > 0)
    }

    #[must_use]
    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    #[must_use]
    pub fn channels(&self) -> &ChannelTable {
        &self.channels
    }

    #[must_use]
    pub fn dispatch(&self, uid: Uid) -> Option<EventTypeInfo<'_>> {
        self.dispatches.get(uid).map(EventTypeInfo::new)
    }

    #[must_use]
    pub fn dispatch_count(&self) -> usize {
        self.dispatches.len()
    }

    #[must_use]
    pub fn active_analyzer_count(&self) -> usize {
        self.analyzers.active_count()
    }

    #[must_use]
    pub fn transport_kind(&self) -> Option<TransportKind> {
        self.transport.as_ref().map(Transport::kind)
    }

    #[must_use]
    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    fn pump(&mut self, input: &mut dyn StreamReader) -> Result<(), DecodeError> {
        match self.status {
            EngineStatus::Failed => return Ok(()),
            EngineStatus::AwaitingTransport => {
                if !self.establish(input)? {
                    return Ok(());
                }
            }
            EngineStatus::TransportEstablished(_) | EngineStatus::Decoding(_) => {}
        }

        let Some(mut transport) = self.transport.take() else {
            return Ok(());
        };
        let result = self.decode(&mut transport, input);
        self.transport = Some(transport);
        result
    }

    /// Reads the optional magic and the transport header. Consumes nothing
    /// until the whole preamble is buffered.
    fn establish(&mut self, input: &mut dyn StreamReader) -> Result<bool, DecodeError> {
        let mark = input.save_mark();
        let Some(prefix) = input.get_pointer(MAGIC.len()) else {
            return Ok(false);
        };
        if prefix == MAGIC.as_slice() {
            input.advance(MAGIC.len());
        }
        let Some(header) = input.get_pointer(TransportHeader::SIZE).and_then(TransportHeader::parse)
        else {
            input.restore_mark(mark);
            return Ok(false);
        };

        let kind = TransportKind::try_from(header.transport)
            .map_err(DecodeError::UnsupportedTransport)?;
        let protocol = ProtocolVersion::try_from(header.protocol)
            .map_err(DecodeError::UnsupportedProtocol)?;
        input.advance(TransportHeader::SIZE);

        info!("trace stream uses {kind} transport, {protocol}");
        self.transport = Some(Transport::new(kind, &self.config));
        self.protocol = protocol;
        self.session.protocol = Some(protocol);
        self.status = EngineStatus::TransportEstablished(protocol);
        Ok(true)
    }

    fn decode(
        &mut self,
        transport: &mut Transport,
        input: &mut dyn StreamReader,
    ) -> Result<(), DecodeError> {
        transport.pump(input)?;

        loop {
            let mut progressed = false;
            let mut blocked_serial = None;
            for index in 0..transport.stream_count() {
                let Some((thread, mut stream)) = transport.stream(&mut *input, index) else {
                    break;
                };
                let (decoded, blocked) = self.decode_stream(thread, &mut stream)?;
                progressed |= decoded > 0;
                blocked_serial = blocked_serial.or(blocked);
            }
            if progressed {
                continue;
            }

            // Per-thread substreams may still deliver the missing serial, even
            // while only one of them holds data.
            match blocked_serial {
                Some(observed) if transport.kind() != TransportKind::TidPacket => {
                    warn!("event serial gap: expected {}, resuming at {observed}", self.next_serial);
                    self.stats.serial_gaps += 1;
                    self.next_serial = observed;
                }
                _ => break,
            }
        }

        transport.sweep();
        Ok(())
    }

    /// Decodes records until the stream runs short or blocks on a serial.
    fn decode_stream<R: StreamReader + ?Sized>(
        &mut self,
        thread: ThreadId,
        stream: &mut R,
    ) -> Result<(usize, Option<u32>), DecodeError> {
        let mut decoded = 0;
        loop {
            match self.decode_one(thread, stream)? {
                Step::Consumed => decoded += 1,
                Step::NeedData => return Ok((decoded, None)),
                Step::SerialMismatch(observed) => return Ok((decoded, Some(observed))),
            }
        }
    }

    fn decode_one<R: StreamReader + ?Sized>(
        &mut self,
        thread: ThreadId,
        stream: &mut R,
    ) -> Result<Step, DecodeError> {
        let Some(header) = stream.get_pointer(EventHeader::SIZE).and_then(EventHeader::parse) else {
            return Ok(Step::NeedData);
        };
        let protocol = self.protocol;
        let has_serial = protocol.has_serials() && header.uid & UID_SERIAL_FLAG != 0;
        let uid = Uid(if protocol.has_serials() { header.uid & UID_MASK } else { header.uid });
        let fixed_start = EventHeader::SIZE + if has_serial { SERIAL_SIZE } else { 0 };
        let fixed_end = fixed_start + usize::from(header.size);

        let Some(record) = stream.get_pointer(fixed_end) else {
            return Ok(Step::NeedData);
        };
        let serial = if has_serial { parse_serial(&record[EventHeader::SIZE..]) } else { None };
        if let Some(serial) = serial {
            if serial != self.next_serial {
                return Ok(Step::SerialMismatch(serial));
            }
        }

        if uid == Uid::NEW_EVENT {
            self.declare(&record[fixed_start..fixed_end]);
            self.finish_record(stream, fixed_end, serial);
            return Ok(Step::Consumed);
        }

        let Some(dispatch_index) = self.dispatches.index_of(uid) else {
            warn!("{thread}: skipping {} byte record of undeclared {uid}", header.size);
            self.stats.unknown_events += 1;
            self.finish_record(stream, fixed_end, serial);
            return Ok(Step::Consumed);
        };

        let total = if protocol.has_aux() && self.dispatches.at(dispatch_index).maybe_has_aux() {
            match scan_aux(stream, fixed_end, uid, &mut self.aux_spans)? {
                Some(end) => end,
                None => return Ok(Step::NeedData),
            }
        } else {
            self.aux_spans.clear();
            fixed_end
        };
        let Some(record) = stream.get_pointer(total) else {
            return Ok(Step::NeedData);
        };
        let fixed = &record[fixed_start..fixed_end];
        let aux = &record[fixed_end..total];

        if uid.is_control() {
            let dispatch = self.dispatches.at(dispatch_index);
            let control =
                ControlEvent::parse(uid, &EventData::new(dispatch, fixed, aux, &self.aux_spans, serial));
            if let Some(control) = control {
                self.apply_control(control);
            }
        }
        self.route_event(dispatch_index, thread, fixed, aux, serial);

        if let EngineStatus::TransportEstablished(protocol) = self.status {
            self.status = EngineStatus::Decoding(protocol);
        }
        self.stats.events += 1;
        self.finish_record(stream, total, serial);
        Ok(Step::Consumed)
    }

    fn finish_record<R: StreamReader + ?Sized>(
        &mut self,
        stream: &mut R,
        size: usize,
        serial: Option<u32>,
    ) {
        stream.advance(size);
        self.stats.bytes += size as u64;
        if let Some(serial) = serial {
            self.next_serial = serial.wrapping_add(1) & SERIAL_MASK;
        }
    }

    fn declare(&mut self, payload: &[u8]) {
        let declared = parse_new_event(payload, self.protocol).and_then(|mut dispatch| {
            dispatch.set_first_route(self.routes.find(dispatch.hash()));
            self.dispatches.insert(dispatch)
        });
        match declared {
            Ok(index) => {
                self.stats.declarations += 1;
                let dispatch = self.dispatches.at(index);
                debug!(
                    "declared {} as {}.{} ({} fields)",
                    dispatch.uid(),
                    dispatch.logger_name(),
                    dispatch.event_name(),
                    dispatch.fields().len()
                );
                if self.begun {
                    self.notify_new_event(index);
                }
            }
            Err(err) => {
                self.stats.schema_errors += 1;
                warn!("discarding event declaration: {err}");
            }
        }
    }

    fn apply_control(&mut self, control: ControlEvent) {
        match control {
            ControlEvent::NewTrace { version, timestamp } => {
                if self.begun {
                    warn!("ignoring repeated NewTrace in one session");
                    return;
                }
                self.session.trace_version = version;
                self.session.timestamp = timestamp;
                self.begin_session();
            }
            ControlEvent::Timing { start_cycle, cycle_frequency } => {
                if self.session.has_timing {
                    warn!("ignoring repeated Timing event");
                    return;
                }
                self.session.start_cycle = start_cycle;
                self.session.cycle_frequency = cycle_frequency;
                self.session.has_timing = true;
                debug!("session clock starts at cycle {start_cycle}, {cycle_frequency} Hz");
            }
            ControlEvent::ChannelAnnounce { id, name } => {
                debug!("channel {id} announced as {name}");
                self.channels.announce(id, name);
            }
            ControlEvent::ChannelToggle { id, enabled } => {
                if !self.channels.toggle(id, enabled) {
                    warn!("toggle of unannounced channel {id}");
                }
            }
        }
    }

    /// Collects routes from every analyzer, freezes the route table and
    /// resolves the route group of every dispatch declared so far.
    fn begin_session(&mut self) {
        self.begun = true;
        info!(
            "trace session began: version {}, {} analyzers",
            self.session.trace_version,
            self.analyzers.len()
        );

        for index in 0..self.analyzers.len() {
            let Some(analyzer) = self.analyzers.get_mut(index) else {
                continue;
            };
            let mut context = BeginContext::new(&self.session, &mut self.routes, index);
            let keep = analyzer.on_analysis_begin(&mut context);
            let registered = context.route_count();
            if !keep || registered == 0 {
                debug!("analyzer #{index} declined the session ({registered} routes)");
                self.analyzers.retire(index);
            }
        }

        self.routes.finalize();
        self.wildcard = self.routes.wildcard();
        for dispatch in self.dispatches.iter_mut() {
            dispatch.set_first_route(self.routes.find(dispatch.hash()));
        }
        for index in 0..self.dispatches.len() {
            self.notify_new_event(index);
        }
    }

    fn notify_new_event(&mut self, dispatch_index: usize) {
        let Self { dispatches, routes, analyzers, wildcard, served, .. } = self;
        let dispatch = dispatches.at(dispatch_index);
        let info = EventTypeInfo::new(dispatch);
        reset_served(served, analyzers.len());
        for first in [dispatch.first_route(), *wildcard].into_iter().flatten() {
            for route in routes.group(first) {
                if std::mem::replace(&mut served[route.analyzer], true) {
                    continue;
                }
                if let Some(analyzer) = analyzers.get_mut(route.analyzer) {
                    if !analyzer.on_new_event(route.id, &info) {
                        analyzers.retire(route.analyzer);
                    }
                }
            }
        }
    }

    /// Offers one record to its exact routes, then to the wildcard routes.
    /// An analyzer sees the record once, through its first matching route.
    fn route_event(
        &mut self,
        dispatch_index: usize,
        thread: ThreadId,
        fixed: &[u8],
        aux: &[u8],
        serial: Option<u32>,
    ) {
        let Self {
            dispatches, routes, analyzers, wildcard, session, channels, aux_spans, served, ..
        } = self;
        let dispatch = dispatches.at(dispatch_index);
        let event = EventData::new(dispatch, fixed, aux, aux_spans, serial);
        let context = EventContext::new(session, channels, thread, event);
        reset_served(served, analyzers.len());
        for first in [dispatch.first_route(), *wildcard].into_iter().flatten() {
            for route in routes.group(first) {
                if std::mem::replace(&mut served[route.analyzer], true) {
                    continue;
                }
                if let Some(analyzer) = analyzers.get_mut(route.analyzer) {
                    if !analyzer.on_event(route.id, &context) {
                        analyzers.retire(route.analyzer);
                    }
                }
            }
        }
    }
}

fn reset_served(served: &mut Vec<bool>, analyzers: usize) {
    served.clear();
    served.resize(analyzers, false);
}

/// Walks the aux block that starts `start` bytes into the stream.
///
/// Returns the offset just past the terminator, or `None` when the block is
/// not completely buffered yet. Span offsets are relative to `start`.
fn scan_aux<R: StreamReader + ?Sized>(
    stream: &mut R,
    start: usize,
    uid: Uid,
    spans: &mut Vec<AuxSpan>,
) -> Result<Option<usize>, DecodeError> {
    spans.clear();
    let mut cursor = start;
    loop {
        let Some(window) = stream.get_pointer(cursor + 1) else {
            return Ok(None);
        };
        let tag = window[cursor];
        if tag == AUX_TERMINATOR {
            return Ok(Some(cursor + 1));
        }
        if tag & AUX_DATA_BIT == 0 {
            return Err(DecodeError::MalformedAux { uid, tag });
        }
        let Some(window) = stream.get_pointer(cursor + AUX_HEADER_SIZE) else {
            return Ok(None);
        };
        let Some((field_index, size)) = parse_aux_header(&window[cursor..]) else {
            return Err(DecodeError::MalformedAux { uid, tag });
        };
        let data_start = cursor + AUX_HEADER_SIZE;
        let data_end = data_start + size as usize;
        if stream.get_pointer(data_end).is_none() {
            return Ok(None);
        }
        spans.push(AuxSpan { field_index, start: data_start - start, len: size as usize });
        cursor = data_end;
    }
}
