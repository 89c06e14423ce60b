//! Transport framers matching the decoders in [`crate::transport`].

use tracepump_common::{
    PacketHeader, TidPacketHeader, TlsRecordHeader, TID_DECODED_SIZE_SIZE, TID_ENCODED_FLAG,
    TID_MASK, TLS_SERIAL_MASK,
};

/// Largest payload a 16-bit frame size can carry after a 4-byte header.
pub const MAX_FRAME_PAYLOAD: usize = u16::MAX as usize - PacketHeader::SIZE;

/// Cuts a stream into Packet frames with consecutive serials.
#[derive(Debug, Default)]
pub struct PacketFramer {
    serial: u16,
}

impl PacketFramer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames one payload with the next serial.
    ///
    /// # Panics
    ///
    /// Panics when `payload` exceeds [`MAX_FRAME_PAYLOAD`].
    pub fn frame(&mut self, payload: &[u8]) -> Vec<u8> {
        let frame = Self::frame_with_serial(self.serial, payload);
        self.serial = self.serial.wrapping_add(1);
        frame
    }

    /// # Panics
    ///
    /// Panics when `payload` exceeds [`MAX_FRAME_PAYLOAD`].
    #[must_use]
    pub fn frame_with_serial(serial: u16, payload: &[u8]) -> Vec<u8> {
        let size = u16::try_from(payload.len() + PacketHeader::SIZE)
            .expect("payload fits a 16-bit frame");
        let mut frame = PacketHeader { size, serial }.to_bytes().to_vec();
        frame.extend_from_slice(payload);
        frame
    }

    /// Splits `stream` into frames of at most `chunk` payload bytes.
    pub fn frame_all(&mut self, stream: &[u8], chunk: usize) -> Vec<Vec<u8>> {
        stream.chunks(chunk.clamp(1, MAX_FRAME_PAYLOAD)).map(|payload| self.frame(payload)).collect()
    }
}

/// Frames per-thread payloads, LZ4 compressing them when that saves space.
#[derive(Debug, Default)]
pub struct TidPacketFramer {
    compress: bool,
}

impl TidPacketFramer {
    #[must_use]
    pub fn new(compress: bool) -> Self {
        Self { compress }
    }

    /// # Panics
    ///
    /// Panics when `payload` exceeds [`MAX_FRAME_PAYLOAD`] or the thread id
    /// does not fit 15 bits.
    #[must_use]
    pub fn frame(&self, thread_id: u16, payload: &[u8]) -> Vec<u8> {
        assert!(thread_id <= TID_MASK, "thread ids are 15 bits wide");
        assert!(payload.len() <= MAX_FRAME_PAYLOAD - TID_DECODED_SIZE_SIZE);

        if self.compress {
            let block = lz4_flex::block::compress(payload);
            if block.len() < payload.len() {
                let header_size = TidPacketHeader::SIZE + TID_DECODED_SIZE_SIZE;
                let size = u16::try_from(header_size + block.len()).expect("block is smaller than payload");
                let decoded_size = u16::try_from(payload.len()).expect("checked above");
                let header = TidPacketHeader { size, thread_id: thread_id | TID_ENCODED_FLAG };
                let mut frame = header.to_bytes().to_vec();
                frame.extend_from_slice(&decoded_size.to_le_bytes());
                frame.extend_from_slice(&block);
                return frame;
            }
        }

        let size = u16::try_from(TidPacketHeader::SIZE + payload.len()).expect("checked above");
        let mut frame = TidPacketHeader { size, thread_id }.to_bytes().to_vec();
        frame.extend_from_slice(payload);
        frame
    }
}

/// Frames Tls records with consecutive 24-bit serials.
#[derive(Debug, Default)]
pub struct TlsFramer {
    serial: u32,
}

impl TlsFramer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, payload: &[u8]) -> Vec<u8> {
        let record = Self::record_with_serial(self.serial, payload);
        self.serial = self.serial.wrapping_add(1) & TLS_SERIAL_MASK;
        record
    }

    /// # Panics
    ///
    /// Panics when `payload` is 4 GiB or larger.
    #[must_use]
    pub fn record_with_serial(serial: u32, payload: &[u8]) -> Vec<u8> {
        let size = u32::try_from(payload.len()).expect("record payload fits 32 bits");
        let header = TlsRecordHeader { serial: serial & TLS_SERIAL_MASK, size };
        let mut record = header.to_bytes().to_vec();
        record.extend_from_slice(payload);
        record
    }
}
