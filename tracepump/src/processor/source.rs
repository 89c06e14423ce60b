//! Byte sources the processor pulls trace data from.

use std::io::{ErrorKind, Read};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use log::warn;

/// Outcome of one [`DataSource::read`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceRead {
    /// This many bytes were written to the front of the buffer.
    Bytes(usize),
    /// Nothing available right now; try again later.
    Pending,
    /// No more data will ever arrive.
    End,
}

pub trait DataSource: Send {
    fn read(&mut self, buffer: &mut [u8]) -> SourceRead;
}

/// Adapts any [`Read`] (file, pipe, stdin, socket).
///
/// A zero-length read is end of stream. I/O errors other than interruptions
/// and would-block are logged and also end the stream.
#[derive(Debug)]
pub struct ReaderSource<R> {
    reader: R,
}

impl<R: Read + Send> ReaderSource<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

impl<R: Read + Send> DataSource for ReaderSource<R> {
    fn read(&mut self, buffer: &mut [u8]) -> SourceRead {
        loop {
            match self.reader.read(buffer) {
                Ok(0) => return SourceRead::End,
                Ok(count) => return SourceRead::Bytes(count),
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) if err.kind() == ErrorKind::WouldBlock => return SourceRead::Pending,
                Err(err) => {
                    warn!("trace source read failed: {err}");
                    return SourceRead::End;
                }
            }
        }
    }
}

/// Receives byte chunks from another thread.
///
/// Chunks larger than the processor's read buffer are handed out over
/// several reads. The source ends once every sender is dropped and all
/// chunks are drained.
#[derive(Debug)]
pub struct ChannelSource {
    receiver: Receiver<Vec<u8>>,
    chunk: Vec<u8>,
    offset: usize,
    timeout: Duration,
}

impl ChannelSource {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(50);

    #[must_use]
    pub fn new(receiver: Receiver<Vec<u8>>) -> Self {
        Self::with_timeout(receiver, Self::DEFAULT_TIMEOUT)
    }

    /// `timeout` bounds how long one read blocks before reporting
    /// [`SourceRead::Pending`].
    #[must_use]
    pub fn with_timeout(receiver: Receiver<Vec<u8>>, timeout: Duration) -> Self {
        Self { receiver, chunk: Vec::new(), offset: 0, timeout }
    }
}

impl DataSource for ChannelSource {
    fn read(&mut self, buffer: &mut [u8]) -> SourceRead {
        while self.offset >= self.chunk.len() {
            match self.receiver.recv_timeout(self.timeout) {
                Ok(chunk) => {
                    self.chunk = chunk;
                    self.offset = 0;
                }
                Err(RecvTimeoutError::Timeout) => return SourceRead::Pending,
                Err(RecvTimeoutError::Disconnected) => return SourceRead::End,
            }
        }

        let available = &self.chunk[self.offset..];
        let count = available.len().min(buffer.len());
        buffer[..count].copy_from_slice(&available[..count]);
        self.offset += count;
        SourceRead::Bytes(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_reader_source_ends_on_eof() {
        let mut source = ReaderSource::new(Cursor::new(b"abc".to_vec()));
        let mut buffer = [0u8; 8];
        assert_eq!(source.read(&mut buffer), SourceRead::Bytes(3));
        assert_eq!(source.read(&mut buffer), SourceRead::End);
    }

    #[test]
    fn test_channel_source_splits_large_chunks() {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let mut source = ChannelSource::with_timeout(receiver, Duration::from_millis(1));
        let mut buffer = [0u8; 4];

        assert_eq!(source.read(&mut buffer), SourceRead::Pending);
        sender.send(b"abcdef".to_vec()).unwrap();
        assert_eq!(source.read(&mut buffer), SourceRead::Bytes(4));
        assert_eq!(&buffer, b"abcd");
        assert_eq!(source.read(&mut buffer), SourceRead::Bytes(2));

        drop(sender);
        assert_eq!(source.read(&mut buffer), SourceRead::End);
    }
}
