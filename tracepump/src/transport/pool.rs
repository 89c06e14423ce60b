//! Pooled parking of frames that arrive ahead of their serial.

use crate::stream::StreamBuffer;

#[derive(Debug)]
struct Node {
    serial: u32,
    data: Vec<u8>,
}

/// Arena of payload nodes with a free index stack so steady-state
/// reordering does not allocate.
#[derive(Debug, Default)]
struct NodePool {
    nodes: Vec<Node>,
    free: Vec<usize>,
    node_size: usize,
}

impl NodePool {
    fn acquire(&mut self, serial: u32, payload: &[u8]) -> usize {
        if let Some(index) = self.free.pop() {
            let node = &mut self.nodes[index];
            node.serial = serial;
            node.data.clear();
            node.data.extend_from_slice(payload);
            index
        } else {
            let mut data = Vec::with_capacity(self.node_size.max(payload.len()));
            data.extend_from_slice(payload);
            self.nodes.push(Node { serial, data });
            self.nodes.len() - 1
        }
    }

    fn release(&mut self, index: usize) {
        debug_assert!(!self.free.contains(&index));
        self.free.push(index);
    }
}

/// Frames parked ahead of the expected serial, ordered by wrapping distance.
///
/// `mask` is the serial width (`0xffff` for 16-bit serials). A serial counts
/// as ahead when its wrapping distance from `expected` is non-zero and below
/// half the serial space; everything else is behind.
#[derive(Debug)]
pub(crate) struct Reorder {
    pool: NodePool,
    parked: Vec<usize>,
    expected: u32,
    mask: u32,
}

impl Reorder {
    pub(crate) fn new(mask: u32, node_size: usize) -> Self {
        Self {
            pool: NodePool { node_size, ..NodePool::default() },
            parked: Vec::new(),
            expected: 0,
            mask,
        }
    }

    pub(crate) fn expected(&self) -> u32 {
        self.expected
    }

    pub(crate) fn parked_len(&self) -> usize {
        self.parked.len()
    }

    /// Wrapping distance from the expected serial.
    pub(crate) fn distance(&self, serial: u32) -> u32 {
        serial.wrapping_sub(self.expected) & self.mask
    }

    pub(crate) fn is_ahead(&self, serial: u32) -> bool {
        let distance = self.distance(serial);
        distance != 0 && distance <= self.mask >> 1
    }

    /// Appends an in-order payload and moves past its serial.
    pub(crate) fn accept(&mut self, serial: u32, payload: &[u8], out: &mut StreamBuffer) {
        out.append(payload);
        self.expected = serial.wrapping_add(1) & self.mask;
    }

    /// Parks a frame that is ahead of the expected serial. Returns false for a
    /// duplicate of an already parked serial.
    pub(crate) fn park(&mut self, serial: u32, payload: &[u8]) -> bool {
        let distance = self.distance(serial);
        let position = self
            .parked
            .partition_point(|&index| self.distance(self.pool.nodes[index].serial) < distance);
        if let Some(&index) = self.parked.get(position) {
            if self.pool.nodes[index].serial == serial {
                return false;
            }
        }
        let index = self.pool.acquire(serial, payload);
        self.parked.insert(position, index);
        true
    }

    /// Releases the parked run that continues the expected serial.
    pub(crate) fn release_contiguous(&mut self, out: &mut StreamBuffer) -> usize {
        let mut released = 0;
        while let Some(&index) = self.parked.first() {
            if self.pool.nodes[index].serial != self.expected {
                break;
            }
            self.parked.remove(0);
            self.release_node(index, out);
            released += 1;
        }
        released
    }

    /// Force-releases the oldest parked frame, skipping the gap before it.
    /// Returns the serial that was skipped to.
    pub(crate) fn release_oldest(&mut self, out: &mut StreamBuffer) -> Option<u32> {
        if self.parked.is_empty() {
            return None;
        }
        let index = self.parked.remove(0);
        let serial = self.pool.nodes[index].serial;
        self.release_node(index, out);
        Some(serial)
    }

    /// Releases every parked frame in serial order regardless of gaps.
    pub(crate) fn flush(&mut self, out: &mut StreamBuffer) -> usize {
        let count = self.parked.len();
        for index in std::mem::take(&mut self.parked) {
            self.release_node(index, out);
        }
        count
    }

    /// Restarts the serial sequence at `serial`.
    pub(crate) fn reanchor(&mut self, serial: u32) {
        debug_assert!(self.parked.is_empty());
        self.expected = serial & self.mask;
    }

    fn release_node(&mut self, index: usize, out: &mut StreamBuffer) {
        let node = &self.pool.nodes[index];
        out.append(&node.data);
        self.expected = node.serial.wrapping_add(1) & self.mask;
        self.pool.release(index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parked_frames_release_in_serial_order() {
        let mut reorder = Reorder::new(0xffff, 16);
        let mut out = StreamBuffer::new();
        assert!(reorder.park(2, b"c"));
        assert!(reorder.park(1, b"b"));
        assert!(!reorder.park(2, b"c"));
        assert_eq!(reorder.release_contiguous(&mut out), 0);

        reorder.accept(0, b"a", &mut out);
        assert_eq!(reorder.release_contiguous(&mut out), 2);
        assert_eq!(out.unread(), b"abc");
        assert_eq!(reorder.expected(), 3);
    }

    #[test]
    fn test_distance_wraps_at_mask() {
        let mut reorder = Reorder::new(0xffff, 16);
        let mut out = StreamBuffer::new();
        reorder.reanchor(0xfffe);
        assert!(reorder.is_ahead(0x0001));
        assert!(!reorder.is_ahead(0xfffd));
        reorder.accept(0xfffe, b"x", &mut out);
        reorder.accept(0xffff, b"y", &mut out);
        assert_eq!(reorder.expected(), 0);
    }

    #[test]
    fn test_nodes_are_recycled() {
        let mut reorder = Reorder::new(0xffff, 16);
        let mut out = StreamBuffer::new();
        for round in 0..4u32 {
            let base = round * 2;
            reorder.park(base + 1, b"late");
            reorder.accept(base, b"on-time", &mut out);
            reorder.release_contiguous(&mut out);
        }
        assert_eq!(reorder.pool.nodes.len(), 1);
    }
}
