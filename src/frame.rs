//! Frame types of the raw CAN telemetry log.
//!
//! The logger writes a stream of length-prefixed records. One leading length
//! byte selects the record kind:
//!
//! - `length > 127`: a comment record carrying `length - 127` text bytes
//! - `length <= 127`: a CAN record carrying a 4-byte big-endian timestamp, a
//!   4-byte big-endian CAN identifier and `length` payload bytes
//!
//! Both kinds share the same length-byte namespace and there is no trailer, so
//! the next record starts immediately after the previous one.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Length bytes above this value start a comment record.
pub const COMMENT_THRESHOLD: u8 = 127;

/// Longest comment a single record can carry (`255 - 127`).
pub const MAX_COMMENT_LEN: usize = (u8::MAX - COMMENT_THRESHOLD) as usize;

/// Longest CAN payload a single record can carry.
pub const MAX_PAYLOAD_LEN: usize = COMMENT_THRESHOLD as usize;

/// Size of the timestamp + identifier header of a CAN record.
pub const CAN_METADATA_LEN: usize = 8;

/// Common behaviour of every record kind in the log.
pub trait LogRecord {
    /// Number of bytes this record occupies in the log, length byte included.
    fn encoded_len(&self) -> usize;

    /// Append the binary form of this record to `out`.
    fn encode_into(&self, out: &mut Vec<u8>) -> Result<()>;
}

/// Free-form text written by the logger (headers, markers, notes).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentFrame {
    /// Comment text, one character per byte.
    pub text: String,
}

impl CommentFrame {
    /// Create a comment frame.
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// Build a comment from raw record bytes, mapping each byte to one char.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            text: bytes.iter().copied().map(char::from).collect(),
        }
    }

    /// Get the raw text bytes, or the first character that does not fit in one byte.
    pub fn to_bytes(&self) -> core::result::Result<Vec<u8>, char> {
        self.text
            .chars()
            .map(|c| u8::try_from(c).map_err(|_| c))
            .collect()
    }
}

impl LogRecord for CommentFrame {
    fn encoded_len(&self) -> usize {
        1 + self.text.chars().count()
    }

    fn encode_into(&self, out: &mut Vec<u8>) -> Result<()> {
        let bytes = self.to_bytes().map_err(Error::UnencodableComment)?;
        if bytes.is_empty() || bytes.len() > MAX_COMMENT_LEN {
            return Err(Error::FrameTooLong {
                kind: "comment",
                length: bytes.len(),
                max: MAX_COMMENT_LEN,
            });
        }
        out.push(COMMENT_THRESHOLD + bytes.len() as u8);
        out.extend_from_slice(&bytes);
        Ok(())
    }
}

/// A single CAN message as captured by the logger.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CanFrame {
    /// Logger timestamp in milliseconds.
    pub timestamp: u32,
    /// Message identifier as captured on the bus.
    pub can_id: u32,
    /// Raw payload bytes.
    pub payload: Vec<u8>,
}

impl CanFrame {
    /// Create a new CAN frame.
    pub fn new(timestamp: u32, can_id: u32, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            timestamp,
            can_id,
            payload: payload.into(),
        }
    }

    /// Get the payload slice.
    pub fn data(&self) -> &[u8] {
        &self.payload
    }

    /// Classify the identifier as a standard (11-bit) or extended (29-bit) CAN id.
    ///
    /// Returns `None` for values that fit neither range.
    pub fn id(&self) -> Option<embedded_can::Id> {
        classify_id(self.can_id)
    }
}

impl LogRecord for CanFrame {
    fn encoded_len(&self) -> usize {
        1 + CAN_METADATA_LEN + self.payload.len()
    }

    fn encode_into(&self, out: &mut Vec<u8>) -> Result<()> {
        if self.payload.len() > MAX_PAYLOAD_LEN {
            return Err(Error::FrameTooLong {
                kind: "CAN",
                length: self.payload.len(),
                max: MAX_PAYLOAD_LEN,
            });
        }
        out.push(self.payload.len() as u8);
        out.extend_from_slice(&self.timestamp.to_be_bytes());
        out.extend_from_slice(&self.can_id.to_be_bytes());
        out.extend_from_slice(&self.payload);
        Ok(())
    }
}

/// One record of the raw log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Frame {
    /// Text record (length byte above 127).
    Comment(CommentFrame),
    /// CAN message record (length byte 127 or below).
    Can(CanFrame),
}

impl Frame {
    /// Get the CAN frame, if this record is one.
    pub fn as_can(&self) -> Option<&CanFrame> {
        match self {
            Frame::Can(frame) => Some(frame),
            Frame::Comment(_) => None,
        }
    }

    /// Check if this record is a comment.
    pub fn is_comment(&self) -> bool {
        matches!(self, Frame::Comment(_))
    }
}

impl LogRecord for Frame {
    fn encoded_len(&self) -> usize {
        match self {
            Frame::Comment(c) => c.encoded_len(),
            Frame::Can(c) => c.encoded_len(),
        }
    }

    fn encode_into(&self, out: &mut Vec<u8>) -> Result<()> {
        match self {
            Frame::Comment(c) => c.encode_into(out),
            Frame::Can(c) => c.encode_into(out),
        }
    }
}

impl From<CanFrame> for Frame {
    fn from(frame: CanFrame) -> Self {
        Frame::Can(frame)
    }
}

impl From<CommentFrame> for Frame {
    fn from(frame: CommentFrame) -> Self {
        Frame::Comment(frame)
    }
}

/// Serialize frames back into the binary log format.
///
/// This is the inverse of [`deserialize`](crate::deserialize): for every valid
/// log `b`, `serialize(&deserialize(b)?)? == b`.
pub fn serialize(frames: &[Frame]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(frames.iter().map(LogRecord::encoded_len).sum());
    for frame in frames {
        frame.encode_into(&mut out)?;
    }
    Ok(out)
}

/// Classify a raw identifier as standard or extended.
pub fn classify_id(can_id: u32) -> Option<embedded_can::Id> {
    if let Ok(raw) = u16::try_from(can_id) {
        if let Some(id) = embedded_can::StandardId::new(raw) {
            return Some(embedded_can::Id::Standard(id));
        }
    }
    embedded_can::ExtendedId::new(can_id).map(embedded_can::Id::Extended)
}
