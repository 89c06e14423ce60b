//! Per-thread frames, optionally LZ4 compressed.
//!
//! Every frame carries the id of the producer thread that wrote it. Payloads
//! are appended to that thread's own buffer so the engine can decode each
//! thread's events in order without seeing other threads' bytes in between.

use log::trace;
use tracepump_common::{TidPacketHeader, TID_DECODED_SIZE_SIZE, TID_MASK};

use crate::domain::{ThreadId, TransportError};
use crate::stream::{StreamBuffer, StreamReader};

#[derive(Debug)]
pub struct ThreadStream {
    pub thread: ThreadId,
    pub buffer: StreamBuffer,
}

/// Thread substreams, internal thread first, then first-seen order.
#[derive(Debug, Default)]
pub struct TidPacketTransport {
    threads: Vec<ThreadStream>,
}

impl TidPacketTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves every complete frame from `input` into its thread's buffer.
    ///
    /// # Errors
    ///
    /// Fails on an undersized frame, a corrupt LZ4 block, or a block that
    /// decodes to a different size than announced.
    pub fn pump<R: StreamReader + ?Sized>(&mut self, input: &mut R) -> Result<(), TransportError> {
        loop {
            let Some(header) =
                input.get_pointer(TidPacketHeader::SIZE).and_then(TidPacketHeader::parse)
            else {
                return Ok(());
            };
            let total = usize::from(header.size);
            let header_size = if header.is_encoded() {
                TidPacketHeader::SIZE + TID_DECODED_SIZE_SIZE
            } else {
                TidPacketHeader::SIZE
            };
            if total < header_size {
                return Err(TransportError::FrameTooSmall { size: total, header: header_size });
            }
            let Some(frame) = input.get_pointer(total) else {
                return Ok(());
            };

            let thread = ThreadId(header.thread_id & TID_MASK);
            let stream = &mut self.thread_stream(thread).buffer;
            if header.is_encoded() {
                let size_word = &frame[TidPacketHeader::SIZE..header_size];
                let decoded_size = usize::from(u16::from_le_bytes([size_word[0], size_word[1]]));
                let block = &frame[header_size..];
                let actual = stream.append_with(decoded_size, |slot| {
                    lz4_flex::block::decompress_into(block, slot)
                })?;
                if actual != decoded_size {
                    return Err(TransportError::DecodedSizeMismatch {
                        thread,
                        expected: decoded_size,
                        actual,
                    });
                }
                trace!("{thread}: {} byte block decoded to {decoded_size}", block.len());
            } else {
                stream.append(&frame[header_size..]);
            }
            input.advance(total);
        }
    }

    fn thread_stream(&mut self, thread: ThreadId) -> &mut ThreadStream {
        let index = match self.threads.iter().position(|stream| stream.thread == thread) {
            Some(index) => index,
            None => {
                let stream = ThreadStream { thread, buffer: StreamBuffer::new() };
                if thread.is_internal() {
                    self.threads.insert(0, stream);
                    0
                } else {
                    self.threads.push(stream);
                    self.threads.len() - 1
                }
            }
        };
        &mut self.threads[index]
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.threads.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut ThreadStream> {
        self.threads.get_mut(index)
    }

    #[must_use]
    pub fn threads(&self) -> &[ThreadStream] {
        &self.threads
    }

    /// Forgets threads whose buffers have drained.
    pub fn sweep(&mut self) {
        self.threads.retain(|stream| !stream.buffer.is_empty());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::SliceReader;
    use tracepump_common::TID_ENCODED_FLAG;

    fn frame(thread_id: u16, payload: &[u8]) -> Vec<u8> {
        let size = u16::try_from(payload.len() + TidPacketHeader::SIZE).unwrap();
        let mut bytes = TidPacketHeader { size, thread_id }.to_bytes().to_vec();
        bytes.extend_from_slice(payload);
        bytes
    }

    #[test]
    fn test_internal_thread_is_kept_first() {
        let mut transport = TidPacketTransport::new();
        let mut bytes = frame(7, b"worker");
        bytes.extend(frame(0, b"internal"));
        bytes.extend(frame(3, b"other"));
        transport.pump(&mut SliceReader::new(&bytes)).unwrap();

        let order: Vec<u16> = transport.threads().iter().map(|stream| stream.thread.0).collect();
        assert_eq!(order, vec![0, 7, 3]);
    }

    #[test]
    fn test_compressed_frame_is_decoded() {
        let payload = b"abcabcabcabcabcabcabcabcabcabc".to_vec();
        let block = lz4_flex::block::compress(&payload);
        let mut body = u16::try_from(payload.len()).unwrap().to_le_bytes().to_vec();
        body.extend_from_slice(&block);
        let bytes = frame(2 | TID_ENCODED_FLAG, &body);

        let mut transport = TidPacketTransport::new();
        transport.pump(&mut SliceReader::new(&bytes)).unwrap();
        assert_eq!(transport.threads()[0].thread, ThreadId(2));
        assert_eq!(transport.threads()[0].buffer.unread(), payload.as_slice());
    }

    #[test]
    fn test_corrupt_block_is_fatal() {
        let mut body = 64u16.to_le_bytes().to_vec();
        body.extend_from_slice(&[0xf0, 0xff, 0xff]);
        let bytes = frame(1 | TID_ENCODED_FLAG, &body);
        let mut transport = TidPacketTransport::new();
        assert!(transport.pump(&mut SliceReader::new(&bytes)).is_err());
    }

    #[test]
    fn test_sweep_removes_drained_threads() {
        let mut transport = TidPacketTransport::new();
        let mut bytes = frame(1, b"ab");
        bytes.extend(frame(2, b"cd"));
        transport.pump(&mut SliceReader::new(&bytes)).unwrap();
        transport.get_mut(0).unwrap().buffer.advance(2);
        transport.sweep();
        assert_eq!(transport.len(), 1);
        assert_eq!(transport.threads()[0].thread, ThreadId(2));
    }
}
