//! Length-prefixed frames with a 16-bit serial.

use log::{debug, warn};
use tracepump_common::PacketHeader;

use super::pool::Reorder;
use crate::config::EngineConfig;
use crate::domain::TransportError;
use crate::stream::{StreamBuffer, StreamReader};

const SERIAL_MASK: u32 = 0xffff;

#[derive(Debug)]
pub struct PacketTransport {
    active: StreamBuffer,
    reorder: Reorder,
    window: u32,
    max_payload: usize,
    stale_frames: u64,
}

impl PacketTransport {
    #[must_use]
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            active: StreamBuffer::new(),
            reorder: Reorder::new(SERIAL_MASK, config.max_packet_payload),
            window: u32::try_from(config.packet_window).unwrap_or(SERIAL_MASK),
            max_payload: config.max_packet_payload,
            stale_frames: 0,
        }
    }

    /// Moves every complete frame from `input` into the active stream.
    ///
    /// # Errors
    ///
    /// Fails on a frame whose size field is smaller than its header or whose
    /// payload exceeds the node size.
    pub fn pump<R: StreamReader + ?Sized>(&mut self, input: &mut R) -> Result<(), TransportError> {
        loop {
            let Some(header) = input.get_pointer(PacketHeader::SIZE).and_then(PacketHeader::parse)
            else {
                return Ok(());
            };
            let total = usize::from(header.size);
            if total < PacketHeader::SIZE {
                return Err(TransportError::FrameTooSmall { size: total, header: PacketHeader::SIZE });
            }
            let payload_size = total - PacketHeader::SIZE;
            if payload_size > self.max_payload {
                return Err(TransportError::PayloadTooLarge {
                    size: payload_size,
                    limit: self.max_payload,
                });
            }
            let Some(frame) = input.get_pointer(total) else {
                return Ok(());
            };
            self.route_frame(u32::from(header.serial), &frame[PacketHeader::SIZE..]);
            input.advance(total);
        }
    }

    fn route_frame(&mut self, serial: u32, payload: &[u8]) {
        if serial != self.reorder.expected() && !self.reorder.is_ahead(serial) {
            self.stale_frames += 1;
            warn!(
                "dropping stale packet serial {serial} (expecting {})",
                self.reorder.expected()
            );
            return;
        }

        // Only frames within the window may wait; anything further ahead
        // gives up on the oldest gaps first.
        while self.reorder.distance(serial) >= self.window {
            let missing = self.reorder.expected();
            if let Some(resumed) = self.reorder.release_oldest(&mut self.active) {
                warn!("packet window overflow: skipped serials {missing}..{resumed}");
                self.reorder.release_contiguous(&mut self.active);
            } else {
                warn!("packet serial jumped from {missing} to {serial}");
                self.reorder.reanchor(serial);
            }
        }

        if serial == self.reorder.expected() {
            self.reorder.accept(serial, payload, &mut self.active);
            self.reorder.release_contiguous(&mut self.active);
        } else if !self.reorder.park(serial, payload) {
            debug!("duplicate parked packet serial {serial}");
        }
    }

    pub fn active(&mut self) -> &mut StreamBuffer {
        &mut self.active
    }

    #[must_use]
    pub fn parked_frames(&self) -> usize {
        self.reorder.parked_len()
    }

    #[must_use]
    pub fn stale_frames(&self) -> u64 {
        self.stale_frames
    }
}
