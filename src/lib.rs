#![forbid(unsafe_code)]

//! # canlog-rs
//!
//! A Rust library for converting raw CAN bus telemetry logs into decoded signal
//! tables and InfluxDB line protocol.
//!
//! The raw log is a flat sequence of records, each introduced by one length
//! byte. Lengths above 127 introduce a text comment of `length - 127` bytes;
//! lengths up to 127 introduce a CAN record made of a big-endian timestamp, a
//! big-endian identifier and `length` payload bytes.
//!
//! ## Features
//!
//! - **Deserializing**: Strict, single-pass framing of raw logs into [`Frame`]s
//! - **Decoding**: Schema-driven signal extraction through a [`SignalCodec`],
//!   with a DBC implementation behind the `dbc` feature
//! - **Encoding**: Chunked, escaped line protocol output
//! - **Pipelines**: Staged conversion with progress reported to a bounded
//!   [`TaskRegistry`] and delivery to a [`TimeSeriesSink`]
//! - **Command line**: The `canlog` binary and its log subscriber, behind the
//!   `cli` feature
//!
//! ## Quick Start
//!
//! ### Reading a raw log
//!
//! ```no_run
//! use canlog::{Frame, Result, deserialize};
//!
//! fn main() -> Result<()> {
//!     let bytes = std::fs::read("drive.bin")?;
//!     for frame in deserialize(&bytes)? {
//!         match frame {
//!             Frame::Comment(c) => println!("# {}", c.text),
//!             Frame::Can(f) => println!("{} 0x{:X} {:?}", f.timestamp, f.can_id, f.payload),
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ### Converting a log end to end
//!
//! ```ignore
//! use std::sync::Arc;
//! use canlog::{DbcCodec, NullSink, Pipeline, PipelineConfig, TaskRegistry, TaskToken};
//!
//! let pipeline = Pipeline::new(
//!     PipelineConfig::default(),
//!     DbcCodec::from_file("vehicle.dbc")?,
//!     Arc::new(TaskRegistry::default()),
//!     NullSink,
//! );
//! let report = pipeline.run_file(&TaskToken::generate(), "drive.bin")?;
//! println!("{} lines written", report.encode.lines);
//! ```
//!
//! ## Module Overview
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`frame`] | Frame types and the inverse framing rule |
//! | [`deserializer`] | Strict raw log reader |
//! | [`codec`] | Schema codec seam and the DBC codec |
//! | [`decoder`] | Frames to signal rows, skip bookkeeping |
//! | [`table`] | Decoded table and failure log files |
//! | [`normalize`] | Timestamp normalization and duplicate removal |
//! | [`line_protocol`] | Line protocol encoding |
//! | [`registry`] | Bounded task progress registry |
//! | [`sink`] | Line protocol delivery |
//! | [`pipeline`] | Staged conversion driver |
//! | [`config`] | Layered settings |
//! | [`logging`] | Subscriber setup for binaries |
//! | [`error`] | Error types and [`Result`] alias |
//!
//! ## Error Handling
//!
//! All fallible operations return [`Result<T>`], which is an alias for
//! `std::result::Result<T, Error>`. Per-frame decoding problems are not errors:
//! they surface as [`CodecError`]s that the decoder records and skips.

pub mod codec;
pub mod config;
pub mod decoder;
pub mod deserializer;
pub mod error;
pub mod frame;
pub mod line_protocol;
pub mod logging;
pub mod normalize;
pub mod pipeline;
pub mod registry;
pub mod sink;
pub mod table;

// Re-export commonly used types at the crate root
#[cfg(feature = "dbc")]
pub use codec::DbcCodec;
pub use codec::{SignalCodec, SignalReading};
pub use decoder::{DecodeOutcome, DecodedRow, SkipReason, SkipRecord, SkipSummary, decode_frames};
pub use deserializer::{FrameReader, deserialize};
pub use error::{CodecError, Error, Result};
pub use frame::{CanFrame, CommentFrame, Frame, serialize};
pub use line_protocol::{LineProtocolEncoder, LineSink};
pub use pipeline::{DeliveryStatus, Pipeline, PipelineConfig, RunReport, StageFailure, StageResult};
pub use registry::{Stage, TaskRegistry, TaskState, TaskToken};
pub use sink::{InfluxCliSink, NullSink, TimeSeriesSink};
