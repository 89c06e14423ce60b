//! Serial-ordered records that may arrive out of order.
//!
//! Producers flush per-thread batches independently, so records reach the
//! reader out of serial order. Records ahead of the expected serial wait in
//! the parked list until the gap closes. A serial outside the window means
//! the producer restarted its sequence: whatever is parked belongs to the
//! previous run and is flushed before the new run begins.

use log::{debug, warn};
use tracepump_common::{TlsRecordHeader, TLS_SERIAL_MASK};

use super::pool::Reorder;
use crate::config::EngineConfig;
use crate::domain::TransportError;
use crate::stream::{StreamBuffer, StreamReader};

/// Largest record payload accepted before the size field is considered corrupt.
const MAX_RECORD_PAYLOAD: usize = 1 << 24;

#[derive(Debug)]
pub struct TlsTransport {
    active: StreamBuffer,
    reorder: Reorder,
    window: u32,
}

impl TlsTransport {
    #[must_use]
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            active: StreamBuffer::new(),
            reorder: Reorder::new(TLS_SERIAL_MASK, 0),
            window: u32::try_from(config.tls_window).unwrap_or(TLS_SERIAL_MASK >> 1),
        }
    }

    /// Moves every complete record from `input` into the active stream or
    /// the parked list.
    ///
    /// # Errors
    ///
    /// Fails on a serial with reserved bits set or an oversized record.
    pub fn pump<R: StreamReader + ?Sized>(&mut self, input: &mut R) -> Result<(), TransportError> {
        loop {
            let Some(header) =
                input.get_pointer(TlsRecordHeader::SIZE).and_then(TlsRecordHeader::parse)
            else {
                return Ok(());
            };
            if header.serial & !TLS_SERIAL_MASK != 0 {
                return Err(TransportError::InvalidSerial(header.serial));
            }
            let payload_size = header.size as usize;
            if payload_size > MAX_RECORD_PAYLOAD {
                return Err(TransportError::PayloadTooLarge {
                    size: payload_size,
                    limit: MAX_RECORD_PAYLOAD,
                });
            }
            let total = TlsRecordHeader::SIZE + payload_size;
            let Some(record) = input.get_pointer(total) else {
                return Ok(());
            };
            self.route_record(header.serial, &record[TlsRecordHeader::SIZE..]);
            input.advance(total);
        }
    }

    fn route_record(&mut self, serial: u32, payload: &[u8]) {
        let distance = self.reorder.distance(serial);
        if distance == 0 {
            self.reorder.accept(serial, payload, &mut self.active);
            self.reorder.release_contiguous(&mut self.active);
        } else if distance < self.window {
            if !self.reorder.park(serial, payload) {
                warn!("duplicate tls record serial {serial}");
            }
        } else {
            let flushed = self.reorder.flush(&mut self.active);
            if flushed > 0 {
                warn!(
                    "tls serial sequence reset at {serial}: flushed {flushed} parked records \
                     still waiting for {}",
                    self.reorder.expected()
                );
            } else {
                debug!("tls serial sequence re-anchored at {serial}");
            }
            self.reorder.reanchor(serial);
            self.reorder.accept(serial, payload, &mut self.active);
        }
    }

    pub fn active(&mut self) -> &mut StreamBuffer {
        &mut self.active
    }

    #[must_use]
    pub fn parked_records(&self) -> usize {
        self.reorder.parked_len()
    }
}
