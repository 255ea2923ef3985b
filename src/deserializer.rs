//! Strict deserializer for the raw CAN telemetry log.
//!
//! The reader makes a single forward pass over the input. Every record's
//! declared length is consumed completely before the next length byte is read;
//! a record that runs past the end of the input aborts the whole pass. There is
//! no resynchronization: once a record fails, no further frames are produced.
//!
//! # Example
//!
//! ```
//! use canlog::{Frame, deserialize};
//!
//! // 1-byte comment "H", then a CAN frame: len=2, ts=1, id=256, payload=[10, 20]
//! let bytes = [128, b'H', 2, 0, 0, 0, 1, 0, 0, 1, 0, 10, 20];
//! let frames = deserialize(&bytes).unwrap();
//!
//! assert_eq!(frames.len(), 2);
//! assert!(frames[0].is_comment());
//! assert_eq!(frames[1].as_can().unwrap().payload, vec![10, 20]);
//! ```

use std::io::Write;

use crate::frame::{
    CAN_METADATA_LEN, COMMENT_THRESHOLD, CanFrame, CommentFrame, Frame,
};
use crate::{Error, Result};

/// Read a big-endian u32 from a byte slice at the given offset.
///
/// # Panics
/// Panics if `offset + 4 > bytes.len()`; callers validate lengths first.
#[inline]
fn read_u32_be(bytes: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

/// Validate that a record starting at `offset` has `expected` bytes after its length byte.
#[inline]
fn validate_record_size(bytes: &[u8], offset: usize, expected: usize) -> Result<()> {
    let available = bytes.len() - offset - 1;
    if available < expected {
        return Err(Error::CorruptedStream {
            offset,
            expected,
            available,
        });
    }
    Ok(())
}

/// Forward-only iterator over the frames of a raw log.
///
/// Yields `Err` at most once; after an error the iterator is exhausted.
#[derive(Debug)]
pub struct FrameReader<'a> {
    bytes: &'a [u8],
    position: usize,
    failed: bool,
}

impl<'a> FrameReader<'a> {
    /// Create a reader over a complete log.
    pub fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            position: 0,
            failed: false,
        }
    }

    /// Offset of the next length byte.
    pub fn position(&self) -> usize {
        self.position
    }

    fn read_frame(&mut self) -> Result<Frame> {
        let offset = self.position;
        let length = self.bytes[offset];
        let body = offset + 1;

        let (frame, consumed) = if length > COMMENT_THRESHOLD {
            let text_len = (length - COMMENT_THRESHOLD) as usize;
            validate_record_size(self.bytes, offset, text_len)?;
            let text = &self.bytes[body..body + text_len];
            (Frame::Comment(CommentFrame::from_bytes(text)), text_len)
        } else {
            let payload_len = length as usize;
            validate_record_size(self.bytes, offset, CAN_METADATA_LEN + payload_len)?;
            let timestamp = read_u32_be(self.bytes, body);
            let can_id = read_u32_be(self.bytes, body + 4);
            let start = body + CAN_METADATA_LEN;
            let payload = self.bytes[start..start + payload_len].to_vec();
            (
                Frame::Can(CanFrame {
                    timestamp,
                    can_id,
                    payload,
                }),
                CAN_METADATA_LEN + payload_len,
            )
        };

        self.position = body + consumed;
        Ok(frame)
    }
}

impl Iterator for FrameReader<'_> {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.position >= self.bytes.len() {
            return None;
        }
        let result = self.read_frame();
        if result.is_err() {
            self.failed = true;
        }
        Some(result)
    }
}

/// Deserialize a complete raw log into its frames.
///
/// Fails with [`Error::EmptyInput`] for an empty input and with
/// [`Error::CorruptedStream`] when any record is truncated. No partial frame
/// list is ever returned.
pub fn deserialize(bytes: &[u8]) -> Result<Vec<Frame>> {
    if bytes.is_empty() {
        return Err(Error::EmptyInput);
    }
    FrameReader::new(bytes).collect()
}

/// Write the plain-text dump of a deserialized log.
///
/// One line per frame: comments as their text, CAN frames as
/// `timestamp,can_id,b0,b1,...` with decimal payload bytes.
pub fn write_dump<W: Write>(frames: &[Frame], mut writer: W) -> Result<()> {
    for frame in frames {
        match frame {
            Frame::Comment(comment) => writeln!(writer, "{}", comment.text)?,
            Frame::Can(can) => {
                write!(writer, "{},{}", can.timestamp, can.can_id)?;
                for byte in &can.payload {
                    write!(writer, ",{byte}")?;
                }
                writeln!(writer)?;
            }
        }
    }
    writer.flush()?;
    Ok(())
}
