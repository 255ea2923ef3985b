//! Error types for log conversion.
//!
//! This module defines the [`Error`] enum which represents every fatal failure
//! that can occur while deserializing, decoding, encoding or delivering a CAN
//! telemetry log, plus [`CodecError`] for the per-frame failures that are
//! recorded and skipped instead of aborting a run.
//!
//! # Example
//!
//! ```no_run
//! use canlog::{Error, Result, deserialize};
//!
//! fn count_frames(bytes: &[u8]) -> Result<usize> {
//!     match deserialize(bytes) {
//!         Ok(frames) => Ok(frames.len()),
//!         Err(Error::CorruptedStream { offset, .. }) => {
//!             eprintln!("log is corrupted at byte {offset}");
//!             Ok(0)
//!         }
//!         Err(e) => Err(e),
//!     }
//! }
//! ```

use std::process::ExitStatus;

use thiserror::Error;

/// Errors that abort a conversion run.
///
/// The `Display` text of these errors is what gets attached to a task record,
/// so it is written to be read by whoever polls the task.
#[derive(Debug, Error)]
pub enum Error {
    /// A record's declared length does not match the bytes actually available.
    ///
    /// Raised for truncated metadata headers as well as truncated bodies.
    #[error(
        "file corruption detected at byte {offset}: record needs {expected} bytes, {available} available"
    )]
    CorruptedStream {
        /// Offset of the length byte that started the broken record
        offset: usize,
        /// Bytes the record declared (metadata plus body)
        expected: usize,
        /// Bytes left in the input after the length byte
        available: usize,
    },

    /// The input contained no bytes at all.
    #[error("file corruption detected: input is empty")]
    EmptyInput,

    /// A frame cannot be represented in the binary log format.
    #[error("{kind} frame of {length} bytes cannot be framed (maximum is {max})")]
    FrameTooLong {
        /// Which frame kind was rejected
        kind: &'static str,
        /// Length that was requested
        length: usize,
        /// Largest length the format can carry for this kind
        max: usize,
    },

    /// A comment contains characters that do not fit in a single byte.
    #[error("comment text contains a character outside the single-byte range: {0:?}")]
    UnencodableComment(char),

    /// The signal schema could not be loaded.
    #[error("failed to load signal schema: {0}")]
    Schema(String),

    /// Reading or writing a tabular file failed.
    #[error("tabular file error: {0}")]
    Table(#[from] csv::Error),

    /// Writing the JSON skip summary failed.
    #[error("summary serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// An I/O error occurred while reading or writing an artifact.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Normalizing a timestamp overflowed the 64-bit millisecond range.
    #[error("timestamp {timestamp} overflows after applying epoch offset {offset_ms} ms")]
    TimestampOverflow {
        /// Logger-relative timestamp
        timestamp: u64,
        /// Configured epoch offset
        offset_ms: u64,
    },

    /// A timestamp column held something other than an unsigned integer.
    #[error("invalid timestamp {0:?} in decoded table")]
    InvalidTimestamp(String),

    /// The time-series sink cannot be reached or is not configured.
    ///
    /// A conversion that hits this still completes; only delivery is skipped.
    #[error("time-series sink unavailable: {0}")]
    SinkUnavailable(String),

    /// The time-series sink rejected the line protocol file.
    #[error("delivery failed with {status}: {stderr}")]
    Delivery {
        /// Exit status of the writer process
        status: ExitStatus,
        /// Captured standard error
        stderr: String,
    },

    /// Configuration could not be assembled.
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl Error {
    /// Whether this error means the raw log itself is unusable.
    pub fn is_corruption(&self) -> bool {
        matches!(self, Error::CorruptedStream { .. } | Error::EmptyInput)
    }
}

/// Per-frame failures reported by a [`SignalCodec`](crate::codec::SignalCodec).
///
/// None of these abort a run: the frame is recorded in the failure log and
/// conversion continues.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// The schema has no message with this identifier.
    #[error("no message with id {can_id} in schema")]
    UnknownMessage {
        /// Identifier that was looked up
        can_id: u32,
    },

    /// The payload length does not match the message layout.
    #[error("message {can_id} expects {expected} bytes, got {actual}")]
    PayloadMismatch {
        /// Identifier of the message
        can_id: u32,
        /// Length declared by the schema
        expected: usize,
        /// Length of the payload in the log
        actual: usize,
    },

    /// The codec failed for another reason.
    #[error("failed to decode message {can_id}: {message}")]
    Decode {
        /// Identifier of the message
        can_id: u32,
        /// Codec-specific description
        message: String,
    },
}

/// A specialized Result type for conversion operations.
pub type Result<T> = core::result::Result<T, Error>;
