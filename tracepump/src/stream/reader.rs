//! Windowed read cursor over buffered trace bytes.

/// Saved cursor position, see [`StreamReader::save_mark`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mark(pub(crate) usize);

/// Read cursor over a window of buffered bytes.
///
/// Readers hand out contiguous views at the cursor and never block. A request
/// that cannot be satisfied yet records how many bytes were wanted so the
/// owner of the bytes can size its next refill.
pub trait StreamReader {
    /// Returns the next `size` bytes without consuming them.
    ///
    /// Returns `None` when fewer than `size` bytes are buffered; the demand
    /// hint is raised to at least `size` in that case.
    fn get_pointer(&mut self, size: usize) -> Option<&[u8]>;

    /// Consumes `size` bytes previously validated with
    /// [`get_pointer`](Self::get_pointer).
    fn advance(&mut self, size: usize);

    /// Number of unread bytes in the window.
    fn remaining(&self) -> usize;

    /// Largest request that could not be satisfied since the last refill.
    fn demand_hint(&self) -> usize;

    /// Remembers the cursor so a look-ahead can be rolled back.
    ///
    /// Marks stay valid until the owner refills or compacts the window.
    fn save_mark(&self) -> Mark;

    /// Moves the cursor back to a mark taken since the last refill.
    fn restore_mark(&mut self, mark: Mark);

    fn is_empty(&self) -> bool {
        self.remaining() == 0
    }
}

/// Reader over a borrowed, fully buffered byte slice.
///
/// Useful for decoding a complete in-memory trace in one call.
#[derive(Debug)]
pub struct SliceReader<'a> {
    data: &'a [u8],
    cursor: usize,
    demand_hint: usize,
}

impl<'a> SliceReader<'a> {
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, cursor: 0, demand_hint: 0 }
    }

    /// Bytes not yet consumed.
    #[must_use]
    pub fn unread(&self) -> &'a [u8] {
        &self.data[self.cursor..]
    }
}

impl StreamReader for SliceReader<'_> {
    fn get_pointer(&mut self, size: usize) -> Option<&[u8]> {
        match self.data.get(self.cursor..self.cursor + size) {
            Some(window) => Some(window),
            None => {
                self.demand_hint = self.demand_hint.max(size);
                None
            }
        }
    }

    fn advance(&mut self, size: usize) {
        debug_assert!(self.cursor + size <= self.data.len());
        self.cursor = (self.cursor + size).min(self.data.len());
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.cursor
    }

    fn demand_hint(&self) -> usize {
        self.demand_hint
    }

    fn save_mark(&self) -> Mark {
        Mark(self.cursor)
    }

    fn restore_mark(&mut self, mark: Mark) {
        debug_assert!(mark.0 <= self.data.len());
        self.cursor = mark.0.min(self.data.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_read_records_demand() {
        let mut reader = SliceReader::new(&[1, 2, 3]);
        assert_eq!(reader.get_pointer(2), Some(&[1u8, 2][..]));
        assert!(reader.get_pointer(8).is_none());
        assert!(reader.get_pointer(5).is_none());
        assert_eq!(reader.demand_hint(), 8);
    }

    #[test]
    fn test_mark_rolls_back_look_ahead() {
        let mut reader = SliceReader::new(b"abcdef");
        reader.advance(1);
        let mark = reader.save_mark();
        reader.advance(3);
        assert_eq!(reader.remaining(), 2);
        reader.restore_mark(mark);
        assert_eq!(reader.unread(), b"bcdef");
    }

    #[test]
    fn test_empty_when_fully_consumed() {
        let mut reader = SliceReader::new(b"xy");
        assert!(!reader.is_empty());
        reader.advance(2);
        assert!(reader.is_empty());
    }
}
