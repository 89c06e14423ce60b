//! Per-session state established by the stream's control events.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::domain::ProtocolVersion;

/// Producer-wide facts of one trace session.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionContext {
    pub(crate) protocol: Option<ProtocolVersion>,
    pub(crate) trace_version: u32,
    pub(crate) timestamp: u64,
    pub(crate) start_cycle: u64,
    pub(crate) cycle_frequency: u64,
    pub(crate) has_timing: bool,
}

impl SessionContext {
    /// Protocol of the stream, known once the transport header is read.
    #[must_use]
    pub fn protocol(&self) -> Option<ProtocolVersion> {
        self.protocol
    }

    /// Format version the producer announced in NewTrace.
    #[must_use]
    pub fn trace_version(&self) -> u32 {
        self.trace_version
    }

    #[must_use]
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    #[must_use]
    pub fn start_cycle(&self) -> u64 {
        self.start_cycle
    }

    #[must_use]
    pub fn cycle_frequency(&self) -> u64 {
        self.cycle_frequency
    }

    #[must_use]
    pub fn has_timing(&self) -> bool {
        self.has_timing
    }

    /// Seconds elapsed between the session start cycle and `cycle`.
    ///
    /// Returns 0 until Timing has been seen.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn cycles_to_seconds(&self, cycle: u64) -> f64 {
        if self.cycle_frequency == 0 {
            return 0.0;
        }
        cycle.saturating_sub(self.start_cycle) as f64 / self.cycle_frequency as f64
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Channel {
    pub id: u32,
    pub name: String,
    pub enabled: bool,
}

/// Channels the producer announced, keyed by id.
#[derive(Debug, Default, Serialize)]
pub struct ChannelTable {
    channels: BTreeMap<u32, Channel>,
}

impl ChannelTable {
    /// Records a channel. Announced channels start enabled; re-announcing
    /// renames and keeps the current state.
    pub fn announce(&mut self, id: u32, name: String) {
        match self.channels.get_mut(&id) {
            Some(channel) => channel.name = name,
            None => {
                self.channels.insert(id, Channel { id, name, enabled: true });
            }
        }
    }

    /// Returns false when the channel was never announced.
    pub fn toggle(&mut self, id: u32, enabled: bool) -> bool {
        match self.channels.get_mut(&id) {
            Some(channel) => {
                channel.enabled = enabled;
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn get(&self, id: u32) -> Option<&Channel> {
        self.channels.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Channel> {
        self.channels.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}
