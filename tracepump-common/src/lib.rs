//! # Shared Wire Format (Producer ↔ Analyzer)
//!
//! Defines the constants and fixed-size headers shared between instrumented
//! producers that write trace streams and the analysis engine that decodes
//! them. Everything on the wire is little-endian; the header types here parse
//! from and serialize to byte arrays explicitly so no layout assumptions leak
//! across the boundary.
//!
//! ## Stream Shape
//!
//! ```text
//! [magic "TRCE"]? [transport u8][protocol u8] [transport frames ...]
//!                                              └─ reassembled into event records:
//!                                                 [uid u16][size u16][serial u24]? [fields] [aux]*
//! ```
//!
//! ## Key Types
//!
//! - [`TransportHeader`] - Transport and protocol selector at the stream start
//! - [`EventHeader`] - Prefix of every event record
//! - [`NewEventHeader`] / [`FieldDesc`] - Schema declaration payload
//! - [`PacketHeader`], [`TidPacketHeader`], [`TlsRecordHeader`] - Framing headers

#![no_std]

// ============================================================================
// Stream Preamble
// ============================================================================

/// Optional marker some producers write before the transport header.
pub const MAGIC: [u8; 4] = *b"TRCE";

/// Identity framing: the stream is the event stream.
pub const TRANSPORT_RAW: u8 = 1;

/// Length-prefixed frames with a 16-bit serial.
pub const TRANSPORT_PACKET: u8 = 2;

/// Per-thread frames, optionally LZ4 compressed.
pub const TRANSPORT_TID_PACKET: u8 = 3;

/// Serial-ordered records that may arrive out of order.
pub const TRANSPORT_TLS: u8 = 4;

/// Plain records, no flags, no aux data.
pub const PROTOCOL_0: u8 = 0;

/// Adds event flags and the aux-data sub-format.
pub const PROTOCOL_1: u8 = 1;

/// Adds 24-bit event serials for cross-thread ordering.
pub const PROTOCOL_2: u8 = 2;

/// Newest protocol this crate understands.
pub const PROTOCOL_LATEST: u8 = PROTOCOL_2;

/// Transport and protocol selector that follows the optional magic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportHeader {
    pub transport: u8,
    pub protocol: u8,
}

impl TransportHeader {
    pub const SIZE: usize = 2;

    #[must_use]
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        match bytes {
            [transport, protocol, ..] => Some(Self { transport: *transport, protocol: *protocol }),
            _ => None,
        }
    }

    #[must_use]
    pub fn to_bytes(self) -> [u8; Self::SIZE] {
        [self.transport, self.protocol]
    }
}

// ============================================================================
// Event Records
// ============================================================================

/// Reserved uid of the schema declaration control event.
pub const UID_NEW_EVENT: u16 = 0;

/// Session start: carries `Version` and `Timestamp`.
pub const UID_NEW_TRACE: u16 = 1;

/// Producer clock: carries `StartCycle` and `CycleFrequency`.
pub const UID_TIMING: u16 = 2;

/// Channel declaration: carries `Id` and `Name`.
pub const UID_CHANNEL_ANNOUNCE: u16 = 3;

/// Channel state change: carries `Id` and `IsEnabled`.
pub const UID_CHANNEL_TOGGLE: u16 = 4;

/// First uid a producer may assign to its own events.
pub const UID_FIRST_USER: u16 = 5;

/// Bits of the header's uid word that hold the uid.
pub const UID_MASK: u16 = 0x7fff;

/// Protocol 2: set when a 24-bit serial follows the event header.
pub const UID_SERIAL_FLAG: u16 = 0x8000;

/// Width of the serial that follows a flagged protocol 2 header.
pub const SERIAL_SIZE: usize = 3;

/// Serials wrap at 24 bits.
pub const SERIAL_MASK: u32 = 0x00ff_ffff;

/// Prefix of every event record.
///
/// `size` counts only the fixed field bytes; the optional serial precedes them
/// and the optional aux block follows them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventHeader {
    pub uid: u16,
    pub size: u16,
}

impl EventHeader {
    pub const SIZE: usize = 4;

    #[must_use]
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        Some(Self { uid: read_u16(bytes, 0)?, size: read_u16(bytes, 2)? })
    }

    #[must_use]
    pub fn to_bytes(self) -> [u8; Self::SIZE] {
        let [u0, u1] = self.uid.to_le_bytes();
        let [s0, s1] = self.size.to_le_bytes();
        [u0, u1, s0, s1]
    }
}

/// Reads a 24-bit little-endian serial.
#[must_use]
pub fn parse_serial(bytes: &[u8]) -> Option<u32> {
    match bytes {
        [lo, mid, hi, ..] => Some(u32::from_le_bytes([*lo, *mid, *hi, 0])),
        _ => None,
    }
}

#[must_use]
pub fn serial_to_bytes(serial: u32) -> [u8; SERIAL_SIZE] {
    let [lo, mid, hi, _] = (serial & SERIAL_MASK).to_le_bytes();
    [lo, mid, hi]
}

// ============================================================================
// Schema Declarations
// ============================================================================

/// Events that bypass serial ordering.
pub const FLAG_IMPORTANT: u8 = 1 << 0;

/// Records of this event may carry an aux block.
pub const FLAG_MAYBE_HAS_AUX: u8 = 1 << 1;

/// Producer does not synchronize this event with its clock.
pub const FLAG_NO_SYNC: u8 = 1 << 2;

/// Log2 of the element width (1, 2, 4 or 8 bytes).
pub const FIELD_POW2_SIZE_MASK: u8 = 0b0000_0011;

/// Integer field holds a two's-complement value.
pub const FIELD_SIGNED: u8 = 0b0001_0000;

/// Field holds an IEEE-754 value (4 or 8 bytes).
pub const FIELD_FLOAT: u8 = 0b0100_0000;

/// Field is a variable-length array delivered as aux data.
pub const FIELD_ARRAY: u8 = 0b1000_0000;

/// Fixed part of the NewEvent payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewEventHeader {
    pub uid: u16,
    pub field_count: u8,
    pub flags: u8,
    pub logger_name_size: u8,
    pub event_name_size: u8,
}

impl NewEventHeader {
    pub const SIZE: usize = 6;

    #[must_use]
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        match bytes {
            [_, _, field_count, flags, logger_name_size, event_name_size, ..] => Some(Self {
                uid: read_u16(bytes, 0)?,
                field_count: *field_count,
                flags: *flags,
                logger_name_size: *logger_name_size,
                event_name_size: *event_name_size,
            }),
            _ => None,
        }
    }

    #[must_use]
    pub fn to_bytes(self) -> [u8; Self::SIZE] {
        let [u0, u1] = self.uid.to_le_bytes();
        [u0, u1, self.field_count, self.flags, self.logger_name_size, self.event_name_size]
    }
}

/// One field descriptor inside a NewEvent payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDesc {
    pub offset: u16,
    pub size: u16,
    pub type_info: u8,
    pub name_size: u8,
}

impl FieldDesc {
    pub const SIZE: usize = 6;

    #[must_use]
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        match bytes {
            [_, _, _, _, type_info, name_size, ..] => Some(Self {
                offset: read_u16(bytes, 0)?,
                size: read_u16(bytes, 2)?,
                type_info: *type_info,
                name_size: *name_size,
            }),
            _ => None,
        }
    }

    #[must_use]
    pub fn to_bytes(self) -> [u8; Self::SIZE] {
        let [o0, o1] = self.offset.to_le_bytes();
        let [s0, s1] = self.size.to_le_bytes();
        [o0, o1, s0, s1, self.type_info, self.name_size]
    }
}

// ============================================================================
// Aux Data
// ============================================================================

/// Set on every aux chunk tag; the low bits are the field index.
pub const AUX_DATA_BIT: u8 = 0x80;

pub const AUX_FIELD_MASK: u8 = 0x7f;

/// Ends an aux block.
pub const AUX_TERMINATOR: u8 = 0x00;

/// Tag byte plus 24-bit length.
pub const AUX_HEADER_SIZE: usize = 4;

/// Chunk lengths are 24 bits wide.
pub const AUX_SIZE_LIMIT: usize = 1 << 24;

/// Packs an aux chunk header: tag in the low byte, length above it.
#[must_use]
pub fn aux_header(field_index: u8, size: u32) -> [u8; AUX_HEADER_SIZE] {
    let packed = u32::from(AUX_DATA_BIT | (field_index & AUX_FIELD_MASK)) | (size << 8);
    packed.to_le_bytes()
}

/// Splits a packed aux chunk header into `(field_index, size)`.
#[must_use]
pub fn parse_aux_header(bytes: &[u8]) -> Option<(u8, u32)> {
    let packed = read_u32(bytes, 0)?;
    let tag = (packed & 0xff) as u8;
    if tag & AUX_DATA_BIT == 0 {
        return None;
    }
    Some((tag & AUX_FIELD_MASK, packed >> 8))
}

// ============================================================================
// Transport Framing
// ============================================================================

/// Frame header of the Packet transport. `size` includes the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub size: u16,
    pub serial: u16,
}

impl PacketHeader {
    pub const SIZE: usize = 4;

    #[must_use]
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        Some(Self { size: read_u16(bytes, 0)?, serial: read_u16(bytes, 2)? })
    }

    #[must_use]
    pub fn to_bytes(self) -> [u8; Self::SIZE] {
        let [a0, a1] = self.size.to_le_bytes();
        let [b0, b1] = self.serial.to_le_bytes();
        [a0, a1, b0, b1]
    }
}

/// Thread id of the producer's internal housekeeping thread.
pub const TID_INTERNAL: u16 = 0;

/// Set on a TidPacket thread id when the payload is LZ4 compressed.
pub const TID_ENCODED_FLAG: u16 = 0x8000;

pub const TID_MASK: u16 = 0x7fff;

/// Size of the decoded-length word that follows an encoded TidPacket header.
pub const TID_DECODED_SIZE_SIZE: usize = 2;

/// Frame header of the TidPacket transport. `size` includes the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TidPacketHeader {
    pub size: u16,
    pub thread_id: u16,
}

impl TidPacketHeader {
    pub const SIZE: usize = 4;

    #[must_use]
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        Some(Self { size: read_u16(bytes, 0)?, thread_id: read_u16(bytes, 2)? })
    }

    #[must_use]
    pub fn to_bytes(self) -> [u8; Self::SIZE] {
        let [a0, a1] = self.size.to_le_bytes();
        let [b0, b1] = self.thread_id.to_le_bytes();
        [a0, a1, b0, b1]
    }

    #[must_use]
    pub fn is_encoded(self) -> bool {
        self.thread_id & TID_ENCODED_FLAG != 0
    }
}

/// Tls record serials wrap at 24 bits.
pub const TLS_SERIAL_MASK: u32 = 0x00ff_ffff;

/// Record header of the Tls transport. `size` counts only the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlsRecordHeader {
    pub serial: u32,
    pub size: u32,
}

impl TlsRecordHeader {
    pub const SIZE: usize = 8;

    #[must_use]
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        Some(Self { serial: read_u32(bytes, 0)?, size: read_u32(bytes, 4)? })
    }

    #[must_use]
    pub fn to_bytes(self) -> [u8; Self::SIZE] {
        let [a0, a1, a2, a3] = self.serial.to_le_bytes();
        let [b0, b1, b2, b3] = self.size.to_le_bytes();
        [a0, a1, a2, a3, b0, b1, b2, b3]
    }
}

// ============================================================================
// Control Event Names
// ============================================================================

/// Logger name producers use when declaring the control events.
pub const CONTROL_LOGGER: &str = "$Trace";

pub const FIELD_VERSION: &str = "Version";
pub const FIELD_TIMESTAMP: &str = "Timestamp";
pub const FIELD_START_CYCLE: &str = "StartCycle";
pub const FIELD_CYCLE_FREQUENCY: &str = "CycleFrequency";
pub const FIELD_CHANNEL_ID: &str = "Id";
pub const FIELD_CHANNEL_NAME: &str = "Name";
pub const FIELD_CHANNEL_ENABLED: &str = "IsEnabled";

fn read_u16(bytes: &[u8], offset: usize) -> Option<u16> {
    let b = bytes.get(offset..offset + 2)?;
    Some(u16::from_le_bytes([b[0], b[1]]))
}

fn read_u32(bytes: &[u8], offset: usize) -> Option<u32> {
    let b = bytes.get(offset..offset + 4)?;
    Some(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_header_layout() {
        let header = EventHeader { uid: 0x8005, size: 0x0102 };
        assert_eq!(header.to_bytes(), [0x05, 0x80, 0x02, 0x01]);
        assert_eq!(EventHeader::parse(&header.to_bytes()), Some(header));
        assert_eq!(EventHeader::parse(&[1, 2, 3]), None);
    }

    #[test]
    fn test_serial_is_24_bits() {
        assert_eq!(serial_to_bytes(0x0123_4567), [0x67, 0x45, 0x23]);
        assert_eq!(parse_serial(&[0x67, 0x45, 0x23]), Some(0x0023_4567));
    }

    #[test]
    fn test_aux_header_packs_tag_and_size() {
        let bytes = aux_header(3, 300);
        assert_eq!(bytes[0], AUX_DATA_BIT | 3);
        assert_eq!(parse_aux_header(&bytes), Some((3, 300)));
        assert_eq!(parse_aux_header(&[0x03, 0, 0, 0]), None);
    }

    #[test]
    fn test_tid_packet_encoded_flag() {
        let header = TidPacketHeader { size: 10, thread_id: 7 | TID_ENCODED_FLAG };
        assert!(header.is_encoded());
        assert_eq!(header.thread_id & TID_MASK, 7);
    }
}
