//! Domain types providing compile-time safety and self-documentation
//!
//! These newtype wrappers prevent common bugs like passing a thread id where
//! an event uid is expected, and make function signatures more expressive.

use std::fmt;

use serde::Serialize;

use tracepump_common::{
    PROTOCOL_0, PROTOCOL_1, PROTOCOL_2, TID_INTERNAL, TRANSPORT_PACKET, TRANSPORT_RAW,
    TRANSPORT_TID_PACKET, TRANSPORT_TLS, UID_CHANNEL_TOGGLE, UID_FIRST_USER, UID_NEW_EVENT,
    UID_NEW_TRACE,
};
use xxhash_rust::xxh3::xxh3_64;

/// Event type id
///
/// Small integer the producer assigns to one event schema for the lifetime
/// of a trace session. Only meaningful together with the session's dispatch
/// table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Uid(pub u16);

impl Uid {
    pub const NEW_EVENT: Uid = Uid(UID_NEW_EVENT);

    /// Returns true for the uids the engine interprets itself (NewTrace,
    /// Timing, channel events).
    #[must_use]
    pub fn is_control(self) -> bool {
        (UID_NEW_TRACE..=UID_CHANNEL_TOGGLE).contains(&self.0)
    }

    /// Returns true for uids a producer assigns to its own events.
    #[must_use]
    pub fn is_user(self) -> bool {
        self.0 >= UID_FIRST_USER
    }

    #[must_use]
    pub fn index(self) -> usize {
        usize::from(self.0)
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UID:{}", self.0)
    }
}

/// Producer thread id
///
/// Identifies one per-thread substream of the TidPacket transport. Single
/// stream transports report every event on [`ThreadId::INTERNAL`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadId(pub u16);

impl ThreadId {
    pub const INTERNAL: ThreadId = ThreadId(TID_INTERNAL);

    #[must_use]
    pub fn is_internal(self) -> bool {
        self == Self::INTERNAL
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TID:{}", self.0)
    }
}

/// Route id chosen by an analyzer
///
/// Opaque to the engine; handed back on every callback for the route so an
/// analyzer can tell its subscriptions apart without comparing names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RouteId(pub u16);

impl fmt::Display for RouteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "route#{}", self.0)
    }
}

/// Event name hash
///
/// XXH3-64 of the logger name bytes immediately followed by the event name
/// bytes. Control events and the wildcard route use reserved values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventHash(pub u64);

impl EventHash {
    /// Matches every event.
    pub const ALL_EVENTS: EventHash = EventHash(0);

    #[must_use]
    pub fn of_bytes(bytes: &[u8]) -> Self {
        Self(xxh3_64(bytes))
    }

    /// Hash of a `(logger, event)` name pair, equal to the hash of the
    /// dispatch that declares those names.
    #[must_use]
    pub fn of_names(logger: &str, event: &str) -> Self {
        let mut joined = Vec::with_capacity(logger.len() + event.len());
        joined.extend_from_slice(logger.as_bytes());
        joined.extend_from_slice(event.as_bytes());
        Self::of_bytes(&joined)
    }

    /// Fixed hash of a control event, known before any stream data arrives.
    #[must_use]
    pub fn control(uid: Uid) -> Self {
        Self(u64::MAX - u64::from(uid.0))
    }
}

impl fmt::Display for EventHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Framing selected by the stream's transport byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    Raw,
    Packet,
    TidPacket,
    Tls,
}

impl TryFrom<u8> for TransportKind {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            TRANSPORT_RAW => Ok(Self::Raw),
            TRANSPORT_PACKET => Ok(Self::Packet),
            TRANSPORT_TID_PACKET => Ok(Self::TidPacket),
            TRANSPORT_TLS => Ok(Self::Tls),
            other => Err(other),
        }
    }
}

impl From<TransportKind> for u8 {
    fn from(kind: TransportKind) -> Self {
        match kind {
            TransportKind::Raw => TRANSPORT_RAW,
            TransportKind::Packet => TRANSPORT_PACKET,
            TransportKind::TidPacket => TRANSPORT_TID_PACKET,
            TransportKind::Tls => TRANSPORT_TLS,
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Raw => "raw",
            Self::Packet => "packet",
            Self::TidPacket => "tid-packet",
            Self::Tls => "tls",
        };
        f.write_str(name)
    }
}

/// Wire-format generation selected by the stream's protocol byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum ProtocolVersion {
    V0,
    V1,
    V2,
}

impl ProtocolVersion {
    /// Event flags and aux blocks exist from protocol 1 on.
    #[must_use]
    pub fn has_aux(self) -> bool {
        self >= Self::V1
    }

    /// Event headers may carry serials from protocol 2 on.
    #[must_use]
    pub fn has_serials(self) -> bool {
        self >= Self::V2
    }
}

impl TryFrom<u8> for ProtocolVersion {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            PROTOCOL_0 => Ok(Self::V0),
            PROTOCOL_1 => Ok(Self::V1),
            PROTOCOL_2 => Ok(Self::V2),
            other => Err(other),
        }
    }
}

impl From<ProtocolVersion> for u8 {
    fn from(version: ProtocolVersion) -> Self {
        match version {
            ProtocolVersion::V0 => PROTOCOL_0,
            ProtocolVersion::V1 => PROTOCOL_1,
            ProtocolVersion::V2 => PROTOCOL_2,
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "protocol {}", u8::from(*self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uid_classes() {
        assert!(!Uid::NEW_EVENT.is_control());
        assert!(Uid(1).is_control());
        assert!(Uid(4).is_control());
        assert!(!Uid(5).is_control());
        assert!(Uid(5).is_user());
    }

    #[test]
    fn test_name_hash_matches_concatenation() {
        assert_eq!(EventHash::of_names("Cpu", "Scope"), EventHash::of_bytes(b"CpuScope"));
        assert_ne!(EventHash::of_names("Cpu", "Scope"), EventHash::of_names("Cpu", "Scopes"));
    }

    #[test]
    fn test_wire_ids_roundtrip() {
        for byte in 1..=4u8 {
            let kind = TransportKind::try_from(byte).unwrap();
            assert_eq!(u8::from(kind), byte);
        }
        assert_eq!(TransportKind::try_from(9), Err(9));
        assert_eq!(ProtocolVersion::try_from(3), Err(3));
        assert!(ProtocolVersion::V2.has_serials());
        assert!(!ProtocolVersion::V0.has_aux());
    }
}
