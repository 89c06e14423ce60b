//! Event stream writer.

use std::collections::HashMap;

use tracepump_common::{
    aux_header, serial_to_bytes, EventHeader, FieldDesc, NewEventHeader, TransportHeader,
    AUX_TERMINATOR, CONTROL_LOGGER, FIELD_ARRAY, FIELD_CHANNEL_ENABLED, FIELD_CHANNEL_ID,
    FIELD_CHANNEL_NAME, FIELD_CYCLE_FREQUENCY, FIELD_FLOAT, FIELD_SIGNED, FIELD_START_CYCLE,
    FIELD_TIMESTAMP, FIELD_VERSION, FLAG_IMPORTANT, FLAG_MAYBE_HAS_AUX, MAGIC, UID_CHANNEL_ANNOUNCE,
    UID_CHANNEL_TOGGLE, UID_NEW_EVENT, UID_NEW_TRACE, UID_SERIAL_FLAG, UID_TIMING,
};

use crate::domain::{ProtocolVersion, TransportKind};

/// Wire type of a declared field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Bool,
    U8,
    U16,
    U32,
    U64,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
    /// Array of the given element type, carried as aux data.
    Array(ArrayElement),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayElement {
    U8,
    U16,
    U32,
    U64,
    I32,
    I64,
    F32,
    F64,
}

impl FieldType {
    /// UTF-8 text: an array of bytes.
    pub const STRING: FieldType = FieldType::Array(ArrayElement::U8);

    #[must_use]
    pub fn type_info(self) -> u8 {
        match self {
            Self::Bool | Self::U8 => 0,
            Self::U16 => 1,
            Self::U32 => 2,
            Self::U64 => 3,
            Self::I8 => FIELD_SIGNED,
            Self::I16 => FIELD_SIGNED | 1,
            Self::I32 => FIELD_SIGNED | 2,
            Self::I64 => FIELD_SIGNED | 3,
            Self::F32 => FIELD_FLOAT | 2,
            Self::F64 => FIELD_FLOAT | 3,
            Self::Array(element) => {
                FIELD_ARRAY
                    | match element {
                        ArrayElement::U8 => 0,
                        ArrayElement::U16 => 1,
                        ArrayElement::U32 => 2,
                        ArrayElement::U64 => 3,
                        ArrayElement::I32 => FIELD_SIGNED | 2,
                        ArrayElement::I64 => FIELD_SIGNED | 3,
                        ArrayElement::F32 => FIELD_FLOAT | 2,
                        ArrayElement::F64 => FIELD_FLOAT | 3,
                    }
            }
        }
    }

    /// Bytes the field occupies in the fixed record area.
    #[must_use]
    pub fn fixed_size(self) -> u16 {
        match self {
            Self::Array(_) => 0,
            other => 1 << (other.type_info() & 0b11),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    pub ty: FieldType,
}

impl FieldSpec {
    #[must_use]
    pub fn new(name: impl Into<String>, ty: FieldType) -> Self {
        Self { name: name.into(), ty }
    }
}

/// Builds a NewEvent payload. Fixed fields are laid out back to back in
/// declaration order.
///
/// # Panics
///
/// Panics when a name is longer than 255 bytes or there are more than 255
/// fields.
#[must_use]
pub fn new_event_payload(
    uid: u16,
    logger: &str,
    event: &str,
    flags: u8,
    fields: &[FieldSpec],
) -> Vec<u8> {
    let name_size = |name: &str| u8::try_from(name.len()).expect("names are at most 255 bytes");
    let header = NewEventHeader {
        uid,
        field_count: u8::try_from(fields.len()).expect("at most 255 fields"),
        flags,
        logger_name_size: name_size(logger),
        event_name_size: name_size(event),
    };

    let mut payload = header.to_bytes().to_vec();
    let mut offset = 0u16;
    for field in fields {
        let size = field.ty.fixed_size();
        let desc = FieldDesc {
            offset,
            size,
            type_info: field.ty.type_info(),
            name_size: name_size(&field.name),
        };
        payload.extend_from_slice(&desc.to_bytes());
        offset += size;
    }
    payload.extend_from_slice(logger.as_bytes());
    payload.extend_from_slice(event.as_bytes());
    for field in fields {
        payload.extend_from_slice(field.name.as_bytes());
    }
    payload
}

/// Appends event records for one protocol generation.
#[derive(Debug)]
pub struct EventWriter {
    protocol: ProtocolVersion,
    buffer: Vec<u8>,
    flags: HashMap<u16, u8>,
}

impl EventWriter {
    #[must_use]
    pub fn new(protocol: ProtocolVersion) -> Self {
        Self { protocol, buffer: Vec::new(), flags: HashMap::new() }
    }

    /// Transport header selecting `kind` and `protocol`.
    #[must_use]
    pub fn preamble(kind: TransportKind, protocol: ProtocolVersion) -> [u8; TransportHeader::SIZE] {
        TransportHeader { transport: kind.into(), protocol: protocol.into() }.to_bytes()
    }

    /// Transport header preceded by the stream magic.
    #[must_use]
    pub fn preamble_with_magic(kind: TransportKind, protocol: ProtocolVersion) -> Vec<u8> {
        let mut bytes = MAGIC.to_vec();
        bytes.extend_from_slice(&Self::preamble(kind, protocol));
        bytes
    }

    #[must_use]
    pub fn protocol(&self) -> ProtocolVersion {
        self.protocol
    }

    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.buffer
    }

    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Writes a NewEvent declaration.
    pub fn declare(&mut self, uid: u16, logger: &str, event: &str, flags: u8, fields: &[FieldSpec]) {
        self.flags.insert(uid, flags);
        let payload = new_event_payload(uid, logger, event, flags, fields);
        self.event(UID_NEW_EVENT).bytes(&payload).finish();
    }

    /// Declares the control events with the field names the engine reads.
    pub fn declare_control_events(&mut self) {
        self.declare(
            UID_NEW_TRACE,
            CONTROL_LOGGER,
            "NewTrace",
            FLAG_IMPORTANT,
            &[FieldSpec::new(FIELD_VERSION, FieldType::U32), FieldSpec::new(FIELD_TIMESTAMP, FieldType::U64)],
        );
        self.declare(
            UID_TIMING,
            CONTROL_LOGGER,
            "Timing",
            FLAG_IMPORTANT,
            &[
                FieldSpec::new(FIELD_START_CYCLE, FieldType::U64),
                FieldSpec::new(FIELD_CYCLE_FREQUENCY, FieldType::U64),
            ],
        );
        self.declare(
            UID_CHANNEL_ANNOUNCE,
            CONTROL_LOGGER,
            "ChannelAnnounce",
            FLAG_IMPORTANT | FLAG_MAYBE_HAS_AUX,
            &[FieldSpec::new(FIELD_CHANNEL_ID, FieldType::U32), FieldSpec::new(FIELD_CHANNEL_NAME, FieldType::STRING)],
        );
        self.declare(
            UID_CHANNEL_TOGGLE,
            CONTROL_LOGGER,
            "ChannelToggle",
            FLAG_IMPORTANT,
            &[FieldSpec::new(FIELD_CHANNEL_ID, FieldType::U32), FieldSpec::new(FIELD_CHANNEL_ENABLED, FieldType::Bool)],
        );
    }

    pub fn new_trace(&mut self, version: u32, timestamp: u64) {
        self.event(UID_NEW_TRACE).u32(version).u64(timestamp).finish();
    }

    pub fn timing(&mut self, start_cycle: u64, cycle_frequency: u64) {
        self.event(UID_TIMING).u64(start_cycle).u64(cycle_frequency).finish();
    }

    pub fn channel_announce(&mut self, id: u32, name: &str) {
        self.event(UID_CHANNEL_ANNOUNCE).u32(id).aux(1, name.as_bytes()).finish();
    }

    pub fn channel_toggle(&mut self, id: u32, enabled: bool) {
        self.event(UID_CHANNEL_TOGGLE).u32(id).bool(enabled).finish();
    }

    /// Starts a record of `uid`; nothing is written until
    /// [`RecordBuilder::finish`].
    pub fn event(&mut self, uid: u16) -> RecordBuilder<'_> {
        RecordBuilder { writer: self, uid, serial: None, fixed: Vec::new(), aux: Vec::new() }
    }
}

/// One record under construction.
#[derive(Debug)]
pub struct RecordBuilder<'a> {
    writer: &'a mut EventWriter,
    uid: u16,
    serial: Option<u32>,
    fixed: Vec<u8>,
    aux: Vec<u8>,
}

impl RecordBuilder<'_> {
    /// Tags the record with a serial. Ignored below protocol 2.
    #[must_use]
    pub fn serial(mut self, serial: u32) -> Self {
        self.serial = Some(serial);
        self
    }

    #[must_use]
    pub fn bytes(mut self, bytes: &[u8]) -> Self {
        self.fixed.extend_from_slice(bytes);
        self
    }

    #[must_use]
    pub fn bool(self, value: bool) -> Self {
        self.bytes(&[u8::from(value)])
    }

    #[must_use]
    pub fn u8(self, value: u8) -> Self {
        self.bytes(&[value])
    }

    #[must_use]
    pub fn u16(self, value: u16) -> Self {
        self.bytes(&value.to_le_bytes())
    }

    #[must_use]
    pub fn u32(self, value: u32) -> Self {
        self.bytes(&value.to_le_bytes())
    }

    #[must_use]
    pub fn u64(self, value: u64) -> Self {
        self.bytes(&value.to_le_bytes())
    }

    #[must_use]
    pub fn i32(self, value: i32) -> Self {
        self.bytes(&value.to_le_bytes())
    }

    #[must_use]
    pub fn i64(self, value: i64) -> Self {
        self.bytes(&value.to_le_bytes())
    }

    #[must_use]
    pub fn f64(self, value: f64) -> Self {
        self.bytes(&value.to_le_bytes())
    }

    /// Attaches aux data to field `field_index`.
    ///
    /// # Panics
    ///
    /// Panics when `data` does not fit a 24-bit chunk length.
    #[must_use]
    pub fn aux(mut self, field_index: u8, data: &[u8]) -> Self {
        let size = u32::try_from(data.len())
            .ok()
            .filter(|&size| size < 1 << 24)
            .expect("aux chunks are at most 16 MiB");
        self.aux.extend_from_slice(&aux_header(field_index, size));
        self.aux.extend_from_slice(data);
        self
    }

    /// Appends the record to the writer.
    ///
    /// The aux block (with its terminator) is written under protocol 1 and
    /// later whenever the uid was declared with `FLAG_MAYBE_HAS_AUX` or aux
    /// data was attached.
    ///
    /// # Panics
    ///
    /// Panics when the fixed data exceeds 65535 bytes.
    pub fn finish(self) {
        let protocol = self.writer.protocol;
        let serial = self.serial.filter(|_| protocol.has_serials());
        let size = u16::try_from(self.fixed.len()).expect("fixed data is at most 65535 bytes");
        let uid = if serial.is_some() { self.uid | UID_SERIAL_FLAG } else { self.uid };
        let declared_aux =
            self.writer.flags.get(&self.uid).is_some_and(|flags| flags & FLAG_MAYBE_HAS_AUX != 0);
        let write_aux = protocol.has_aux() && (declared_aux || !self.aux.is_empty());

        let buffer = &mut self.writer.buffer;
        buffer.extend_from_slice(&EventHeader { uid, size }.to_bytes());
        if let Some(serial) = serial {
            buffer.extend_from_slice(&serial_to_bytes(serial));
        }
        buffer.extend_from_slice(&self.fixed);
        if write_aux {
            buffer.extend_from_slice(&self.aux);
            buffer.push(AUX_TERMINATOR);
        }
    }
}
