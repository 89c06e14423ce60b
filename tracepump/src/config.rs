//! Engine and processor tuning
//!
//! Every field has a default, so an empty JSON object `{}` is a valid
//! configuration file.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::ConfigError;

/// Transport tuning for one [`AnalysisEngine`](crate::analysis::AnalysisEngine).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How many Packet frames may be parked ahead of the expected serial.
    pub packet_window: usize,
    /// Node size of the Packet reassembly pool; larger payloads are fatal.
    pub max_packet_payload: usize,
    /// Parked record capacity and serial window of the Tls transport.
    pub tls_window: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { packet_window: 64, max_packet_payload: 8192, tls_window: 256 }
    }
}

impl EngineConfig {
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when a capacity is zero or a window
    /// does not fit the serial width of its transport.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.packet_window == 0 || self.packet_window >= 1 << 15 {
            return Err(ConfigError::Invalid(format!(
                "packet_window must be in 1..32768, got {}",
                self.packet_window
            )));
        }
        if self.max_packet_payload == 0 {
            return Err(ConfigError::Invalid("max_packet_payload must be non-zero".into()));
        }
        if self.tls_window == 0 || self.tls_window >= 1 << 23 {
            return Err(ConfigError::Invalid(format!(
                "tls_window must be in 1..8388608, got {}",
                self.tls_window
            )));
        }
        Ok(())
    }
}

/// Pump loop tuning for an [`AnalysisProcessor`](crate::processor::AnalysisProcessor).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    /// Upper bound of a single source read.
    pub read_size: usize,
    /// Sleep between polls while the source has nothing to offer.
    pub poll_interval_ms: u64,
    pub engine: EngineConfig,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self { read_size: 64 << 10, poll_interval_ms: 10, engine: EngineConfig::default() }
    }
}

impl ProcessorConfig {
    /// Loads and validates a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be read, is not valid JSON for this shape,
    /// or holds out-of-range values.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        log::debug!("loaded configuration from {}", path.as_ref().display());
        Ok(config)
    }

    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for a zero read size or any invalid
    /// engine setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.read_size == 0 {
            return Err(ConfigError::Invalid("read_size must be non-zero".into()));
        }
        self.engine.validate()
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
