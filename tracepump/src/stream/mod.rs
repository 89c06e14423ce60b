//! Byte cursor layer
//!
//! [`StreamReader`] is the contract every decoder reads through: contiguous
//! views at a cursor, a demand hint for short reads, and rollback marks.
//! [`StreamBuffer`] is the growable owner the processor and the transports
//! fill; [`SliceReader`] reads a complete in-memory trace.

pub mod buffer;
pub mod reader;

pub use buffer::StreamBuffer;
pub use reader::{Mark, SliceReader, StreamReader};
