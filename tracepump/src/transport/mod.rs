//! # Transports
//!
//! Re-frame the raw input bytes into the logical event stream(s) the engine
//! decodes.
//!
//! ## Framings
//!
//! - **Raw**: the input is the event stream
//! - **Packet**: length-prefixed frames reassembled by 16-bit serial
//! - **TidPacket**: per-thread frames, optionally LZ4 compressed
//! - **Tls**: serial-ordered records tolerating out-of-order delivery
//!
//! A transport consumes a frame only when its header and whole body are
//! buffered, so a short input is always retried later without losing bytes.
//!
//! ## Usage
//!
//! Each pump cycle calls [`Transport::pump`] once, then decodes every
//! [`Transport::stream`] in index order, then calls [`Transport::sweep`].

mod packet;
mod pool;
mod tid_packet;
mod tls;

pub use packet::PacketTransport;
pub use tid_packet::{ThreadStream, TidPacketTransport};
pub use tls::TlsTransport;

use crate::config::EngineConfig;
use crate::domain::{ThreadId, TransportError, TransportKind};
use crate::stream::{Mark, StreamBuffer, StreamReader};

#[derive(Debug)]
pub enum Transport {
    Raw,
    Packet(PacketTransport),
    TidPacket(TidPacketTransport),
    Tls(TlsTransport),
}

impl Transport {
    #[must_use]
    pub fn new(kind: TransportKind, config: &EngineConfig) -> Self {
        match kind {
            TransportKind::Raw => Self::Raw,
            TransportKind::Packet => Self::Packet(PacketTransport::new(config)),
            TransportKind::TidPacket => Self::TidPacket(TidPacketTransport::new()),
            TransportKind::Tls => Self::Tls(TlsTransport::new(config)),
        }
    }

    #[must_use]
    pub fn kind(&self) -> TransportKind {
        match self {
            Self::Raw => TransportKind::Raw,
            Self::Packet(_) => TransportKind::Packet,
            Self::TidPacket(_) => TransportKind::TidPacket,
            Self::Tls(_) => TransportKind::Tls,
        }
    }

    /// Moves every complete frame out of `input`.
    ///
    /// # Errors
    ///
    /// Returns the framing failure; the session cannot continue after one.
    pub fn pump<R: StreamReader + ?Sized>(&mut self, input: &mut R) -> Result<(), TransportError> {
        match self {
            Self::Raw => Ok(()),
            Self::Packet(transport) => transport.pump(input),
            Self::TidPacket(transport) => transport.pump(input),
            Self::Tls(transport) => transport.pump(input),
        }
    }

    /// Number of logical streams available after the last pump.
    #[must_use]
    pub fn stream_count(&self) -> usize {
        match self {
            Self::TidPacket(transport) => transport.len(),
            Self::Raw | Self::Packet(_) | Self::Tls(_) => 1,
        }
    }

    /// Borrows logical stream `index` together with the thread that owns it.
    pub fn stream<'a, R: StreamReader + ?Sized>(
        &'a mut self,
        input: &'a mut R,
        index: usize,
    ) -> Option<(ThreadId, Substream<'a, R>)> {
        if index > 0 && !matches!(self, Self::TidPacket(_)) {
            return None;
        }
        match self {
            Self::Raw => Some((ThreadId::INTERNAL, Substream::Input(input))),
            Self::Packet(transport) => {
                Some((ThreadId::INTERNAL, Substream::Buffered(transport.active())))
            }
            Self::Tls(transport) => {
                Some((ThreadId::INTERNAL, Substream::Buffered(transport.active())))
            }
            Self::TidPacket(transport) => transport
                .get_mut(index)
                .map(|stream| (stream.thread, Substream::Buffered(&mut stream.buffer))),
        }
    }

    /// Drops per-thread state that has fully drained.
    pub fn sweep(&mut self) {
        if let Self::TidPacket(transport) = self {
            transport.sweep();
        }
    }

    /// Frames still waiting for an earlier serial.
    #[must_use]
    pub fn parked_frames(&self) -> usize {
        match self {
            Self::Packet(transport) => transport.parked_frames(),
            Self::Tls(transport) => transport.parked_records(),
            Self::Raw | Self::TidPacket(_) => 0,
        }
    }
}

/// One logical event stream: either the input itself or a transport-owned
/// reassembly buffer.
pub enum Substream<'a, R: ?Sized> {
    Input(&'a mut R),
    Buffered(&'a mut StreamBuffer),
}

impl<R: StreamReader + ?Sized> StreamReader for Substream<'_, R> {
    fn get_pointer(&mut self, size: usize) -> Option<&[u8]> {
        match self {
            Self::Input(reader) => reader.get_pointer(size),
            Self::Buffered(buffer) => buffer.get_pointer(size),
        }
    }

    fn advance(&mut self, size: usize) {
        match self {
            Self::Input(reader) => reader.advance(size),
            Self::Buffered(buffer) => buffer.advance(size),
        }
    }

    fn remaining(&self) -> usize {
        match self {
            Self::Input(reader) => reader.remaining(),
            Self::Buffered(buffer) => buffer.remaining(),
        }
    }

    fn demand_hint(&self) -> usize {
        match self {
            Self::Input(reader) => reader.demand_hint(),
            Self::Buffered(buffer) => buffer.demand_hint(),
        }
    }

    fn save_mark(&self) -> Mark {
        match self {
            Self::Input(reader) => reader.save_mark(),
            Self::Buffered(buffer) => buffer.save_mark(),
        }
    }

    fn restore_mark(&mut self, mark: Mark) {
        match self {
            Self::Input(reader) => reader.restore_mark(mark),
            Self::Buffered(buffer) => buffer.restore_mark(mark),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::SliceReader;

    #[test]
    fn test_raw_stream_is_the_input() {
        let mut transport = Transport::new(TransportKind::Raw, &EngineConfig::default());
        let mut input = SliceReader::new(b"abc");
        transport.pump(&mut input).unwrap();
        assert_eq!(transport.stream_count(), 1);

        let (thread, mut stream) = transport.stream(&mut input, 0).unwrap();
        assert_eq!(thread, ThreadId::INTERNAL);
        assert_eq!(stream.get_pointer(3), Some(&b"abc"[..]));
        stream.advance(3);
        assert!(input.is_empty());
    }

    #[test]
    fn test_out_of_range_stream_is_none() {
        let mut transport = Transport::new(TransportKind::Tls, &EngineConfig::default());
        let mut input = SliceReader::new(b"");
        assert!(transport.stream(&mut input, 1).is_none());
        assert_eq!(transport.kind(), TransportKind::Tls);
    }
}
