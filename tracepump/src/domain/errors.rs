//! Structured error types for tracepump
//!
//! Using thiserror for automatic Display implementation and error chaining.
//! Insufficient data is never an error: readers return `None` and callers
//! retry once more bytes arrive.

use super::types::{ThreadId, Uid};
use thiserror::Error;

/// Framing failures. All of them are fatal for the session because the
/// frame boundaries that follow can no longer be trusted.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("frame size {size} is smaller than its {header} byte header")]
    FrameTooSmall { size: usize, header: usize },

    #[error("frame payload of {size} bytes exceeds the {limit} byte node size")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("record serial {0:#x} has reserved bits set")]
    InvalidSerial(u32),

    #[error("{thread} packet decoded to {actual} bytes, expected {expected}")]
    DecodedSizeMismatch { thread: ThreadId, expected: usize, actual: usize },

    #[error("lz4 decompression failed: {0}")]
    Lz4Decompress(#[from] lz4_flex::block::DecompressError),
}

/// Fatal decode failures: the stream is abandoned.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("unsupported transport {0}")]
    UnsupportedTransport(u8),

    #[error("unsupported protocol {0}")]
    UnsupportedProtocol(u8),

    #[error("malformed aux block in {uid} event: tag {tag:#04x}")]
    MalformedAux { uid: Uid, tag: u8 },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Schema anomalies. The offending declaration is discarded and decoding
/// continues.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SchemaError {
    #[error("{0} is reserved and cannot be declared")]
    ReservedUid(Uid),

    #[error("{0} is already declared")]
    DuplicateUid(Uid),

    #[error("declaration of {uid} is truncated")]
    Truncated { uid: Uid },

    #[error("declaration of {uid} has a name that is not UTF-8")]
    InvalidName { uid: Uid },

    #[error("field {field} of {uid} is corrupt: {reason}")]
    CorruptField { uid: Uid, field: usize, reason: &'static str },
}

#[derive(Error, Debug)]
pub enum ProcessorError {
    #[error("analysis already started")]
    AlreadyStarted,

    #[error("analysis was never started")]
    NotStarted,

    #[error("analysis thread panicked")]
    Panicked,

    #[error("failed to spawn analysis thread: {0}")]
    Spawn(#[source] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_error_display() {
        let err = SchemaError::DuplicateUid(Uid(7));
        assert_eq!(err.to_string(), "UID:7 is already declared");
    }

    #[test]
    fn test_transport_error_converts_into_decode_error() {
        let err: DecodeError = TransportError::FrameTooSmall { size: 2, header: 4 }.into();
        assert!(err.to_string().contains("smaller than its 4 byte header"));
    }
}
