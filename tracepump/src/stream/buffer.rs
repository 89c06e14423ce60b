//! Growable byte window fed by a data source or a transport.

use super::reader::{Mark, StreamReader};

/// Backing storage grows in multiples of this many bytes.
const GROWTH_QUANTUM: usize = 8 << 10;

fn round_up_to_quantum(size: usize) -> usize {
    (size + GROWTH_QUANTUM - 1) & !(GROWTH_QUANTUM - 1)
}

/// Growable buffer exposing a [`StreamReader`] window.
///
/// Invariant: `cursor <= end <= buffer.len()`. Unread bytes live in
/// `buffer[cursor..end]`; `buffer[end..]` is free space for the next fill.
#[derive(Debug)]
pub struct StreamBuffer {
    buffer: Vec<u8>,
    cursor: usize,
    end: usize,
    demand_hint: usize,
}

impl Default for StreamBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(GROWTH_QUANTUM)
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: vec![0; round_up_to_quantum(capacity.max(1))],
            cursor: 0,
            end: 0,
            demand_hint: 0,
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Unread bytes.
    #[must_use]
    pub fn unread(&self) -> &[u8] {
        &self.buffer[self.cursor..self.end]
    }

    /// Moves unread bytes to the front, growing first if the outstanding
    /// demand does not fit. Resets the demand hint and invalidates marks.
    pub fn consolidate(&mut self) {
        let remaining = self.end - self.cursor;
        let demand = self.demand_hint.max(remaining);
        if demand >= self.buffer.len() {
            let target = demand.max(self.buffer.len() * 2);
            let new_capacity = round_up_to_quantum(target);
            log::trace!("stream buffer grows {} -> {new_capacity} bytes", self.buffer.len());
            self.buffer.resize(new_capacity, 0);
        }

        if remaining == 0 {
            self.cursor = 0;
            self.end = 0;
        } else if self.cursor > 0 {
            self.buffer.copy_within(self.cursor..self.end, 0);
            self.cursor = 0;
            self.end = remaining;
        }
        self.demand_hint = 0;
    }

    /// Guarantees `additional` bytes of free space after the unread window.
    fn reserve(&mut self, additional: usize) {
        if self.end + additional <= self.buffer.len() {
            return;
        }
        let remaining = self.end - self.cursor;
        self.demand_hint = self.demand_hint.max(remaining + additional);
        self.consolidate();
    }

    /// Reads up to `max_size` new bytes through `read`, which returns how
    /// many bytes it wrote into the slot it is given.
    pub fn fill(&mut self, max_size: usize, read: impl FnOnce(&mut [u8]) -> usize) -> usize {
        self.consolidate();
        self.reserve(max_size);
        let slot = &mut self.buffer[self.end..self.end + max_size];
        let written = read(slot).min(max_size);
        self.end += written;
        written
    }

    pub fn append(&mut self, bytes: &[u8]) {
        self.reserve(bytes.len());
        self.buffer[self.end..self.end + bytes.len()].copy_from_slice(bytes);
        self.end += bytes.len();
    }

    /// Appends up to `size` bytes produced in place by `write`, e.g. a
    /// decompressor. Nothing is appended when `write` fails.
    ///
    /// # Errors
    ///
    /// Propagates the error returned by `write`.
    pub fn append_with<E>(
        &mut self,
        size: usize,
        write: impl FnOnce(&mut [u8]) -> Result<usize, E>,
    ) -> Result<usize, E> {
        self.reserve(size);
        let written = write(&mut self.buffer[self.end..self.end + size])?.min(size);
        self.end += written;
        Ok(written)
    }

    pub fn clear(&mut self) {
        self.cursor = 0;
        self.end = 0;
        self.demand_hint = 0;
    }
}

impl StreamReader for StreamBuffer {
    fn get_pointer(&mut self, size: usize) -> Option<&[u8]> {
        if self.cursor + size <= self.end {
            Some(&self.buffer[self.cursor..self.cursor + size])
        } else {
            self.demand_hint = self.demand_hint.max(size);
            None
        }
    }

    fn advance(&mut self, size: usize) {
        debug_assert!(self.cursor + size <= self.end);
        self.cursor = (self.cursor + size).min(self.end);
    }

    fn remaining(&self) -> usize {
        self.end - self.cursor
    }

    fn demand_hint(&self) -> usize {
        self.demand_hint
    }

    fn save_mark(&self) -> Mark {
        Mark(self.cursor)
    }

    fn restore_mark(&mut self, mark: Mark) {
        debug_assert!(mark.0 <= self.end);
        self.cursor = mark.0.min(self.end);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_appends_after_unread_tail() {
        let mut buffer = StreamBuffer::new();
        buffer.append(b"hello");
        buffer.advance(3);
        let written = buffer.fill(4, |slot| {
            slot[..2].copy_from_slice(b"!!");
            2
        });
        assert_eq!(written, 2);
        assert_eq!(buffer.unread(), b"lo!!");
    }

    #[test]
    fn test_demand_grows_capacity_on_quantum_boundary() {
        let mut buffer = StreamBuffer::with_capacity(16);
        assert_eq!(buffer.capacity(), GROWTH_QUANTUM);
        buffer.append(&[7; 100]);
        assert!(buffer.get_pointer(20_000).is_none());
        assert_eq!(buffer.demand_hint(), 20_000);

        buffer.consolidate();
        assert_eq!(buffer.capacity(), 24 << 10);
        assert_eq!(buffer.demand_hint(), 0);
        assert_eq!(buffer.remaining(), 100);
    }

    #[test]
    fn test_consolidate_moves_tail_to_front() {
        let mut buffer = StreamBuffer::new();
        buffer.append(b"0123456789");
        buffer.advance(6);
        buffer.consolidate();
        assert_eq!(buffer.unread(), b"6789");
        assert_eq!(buffer.save_mark(), Mark(0));
    }

    #[test]
    fn test_append_past_capacity_keeps_unread_bytes() {
        let mut buffer = StreamBuffer::with_capacity(1);
        let chunk: Vec<u8> = (0..=255).collect();
        for _ in 0..64 {
            buffer.append(&chunk);
        }
        buffer.advance(256);
        assert_eq!(buffer.remaining(), 63 * 256);
        assert_eq!(&buffer.unread()[..4], &[0, 1, 2, 3]);
    }

    #[test]
    fn test_failed_append_with_leaves_buffer_untouched() {
        let mut buffer = StreamBuffer::new();
        buffer.append(b"ab");
        let result: Result<usize, &str> = buffer.append_with(8, |_| Err("corrupt"));
        assert!(result.is_err());
        assert_eq!(buffer.unread(), b"ab");
    }
}
