//! # tracepump - Binary Event Trace Analysis
//!
//! tracepump decodes self-describing binary trace streams and dispatches the
//! decoded events to user-supplied analyzers. A producer declares its event
//! types in-band, then emits records that refer to those declarations by a
//! 16-bit uid. The stream may be carried raw or wrapped in one of several
//! framing transports.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │            Data Source (file, stdin, crossbeam channel)         │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ byte chunks of any size
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                 Analysis Processor (pump thread)                │
//! │  start / pause / resume / stop, StreamBuffer accumulation       │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ on_data()
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       Analysis Engine                           │
//! │                                                                 │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐         │
//! │  │  Transport   │──▶│   Record     │──▶│   Routing    │         │
//! │  │ (reassembly) │   │   Decoder    │   │ (hash→route) │         │
//! │  └──────────────┘   └──────────────┘   └──────────────┘         │
//! │                            │                   │                │
//! │                            ▼                   ▼                │
//! │                     ┌──────────────┐   ┌──────────────┐         │
//! │                     │  Dispatch    │   │  Analyzers   │         │
//! │                     │   Table      │   │ (callbacks)  │         │
//! │                     └──────────────┘   └──────────────┘         │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! ### Core Pipeline Modules
//!
//! - [`stream`]: Byte cursor abstraction with look-ahead and rollback marks
//!   - `StreamReader`: zero-copy `get_pointer` / `advance` contract
//!   - `StreamBuffer`: growable buffer that consolidates its unread tail
//!
//! - [`transport`]: Framing layers between the raw bytes and the event stream
//!   - Raw, Packet (serial reordering), `TidPacket` (per-thread, LZ4), Tls
//!
//! - [`analysis`]: Event declarations, routing and the decoder state machine
//!   - Protocol 0: fixed records; 1: aux blocks; 2: per-event serials
//!
//! - [`processor`]: Background thread driving an engine from a data source
//!
//! ### Supporting Modules
//!
//! - [`analyzers`]: Event statistics and a channel-backed event log
//! - [`encode`]: Producer-side writer and framers (fixtures, synthetic traces)
//! - [`config`]: JSON configuration with serde defaults
//! - [`cli`]: Command-line argument parsing
//! - [`domain`]: Core domain types (Uid, `ThreadId`, `RouteId`, `EventHash`)
//!
//! ## Stream Layout
//!
//! ```text
//! [ "TRCE" ] transport:u8 protocol:u8 ┃ transport frames ... ┃
//!                                       └── event records:
//!                                           uid:u16 size:u16 [serial:u24] fixed [aux]
//! ```
//!
//! ## Typical Usage
//!
//! ```bash
//! # Log every event of a recorded trace
//! ./tracepump trace.bin
//!
//! # Analyze a live stream and export statistics
//! producer | ./tracepump --quiet --export stats.json
//! ```
//!
//! ## Key Concepts
//!
//! - **Dispatch**: Schema of one declared event type (names, fields, hash)
//! - **Route**: `(hash, analyzer, id)` subscription made at session begin
//! - **Aux data**: Variable-length payload trailing an event's fixed fields
//! - **Serial**: Per-frame or per-event sequence number used to detect gaps

pub mod analysis;
pub mod analyzers;
pub mod cli;
pub mod config;
pub mod domain;
pub mod encode;
pub mod processor;
pub mod stream;
pub mod transport;
