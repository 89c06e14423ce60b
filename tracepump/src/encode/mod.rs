//! Producer-side stream encoding
//!
//! Writes event streams and transport frames the engine decodes. Hosts use it
//! to synthesize traces; the crate's own tests use it to build fixtures.

mod framing;
mod writer;

pub use framing::{PacketFramer, TidPacketFramer, TlsFramer, MAX_FRAME_PAYLOAD};
pub use writer::{new_event_payload, ArrayElement, EventWriter, FieldSpec, FieldType, RecordBuilder};
