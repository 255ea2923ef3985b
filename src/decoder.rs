//! Signal row builder.
//!
//! Turns deserialized CAN frames into one [`DecodedRow`] per signal, using a
//! [`SignalCodec`] for the actual payload decoding. Frames the codec cannot
//! handle (unknown identifier, payload length mismatch, other codec failures)
//! are kept as [`SkipRecord`]s and counted; they never abort a run. Comment
//! frames are counted and otherwise ignored.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::codec::SignalCodec;
use crate::frame::{CanFrame, Frame};
use crate::CodecError;

/// One decoded signal value at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedRow {
    /// Logger timestamp in milliseconds
    pub timestamp: u64,
    /// Identifier of the message the signal came from
    pub can_id: u32,
    /// Signal name
    pub sensor: String,
    /// Physical value
    pub value: f64,
    /// Physical unit, empty if the schema defines none
    pub unit: String,
}

/// Why a frame produced no rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    /// The schema has no message (or no signals) for the identifier.
    UnknownSignal,
    /// The payload length does not match the schema's message length.
    PayloadMismatch {
        /// Length declared by the schema
        expected: usize,
        /// Length found in the log
        actual: usize,
    },
    /// The codec failed for another reason.
    Codec(String),
}

impl From<CodecError> for SkipReason {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::UnknownMessage { .. } => SkipReason::UnknownSignal,
            CodecError::PayloadMismatch {
                expected, actual, ..
            } => SkipReason::PayloadMismatch { expected, actual },
            CodecError::Decode { message, .. } => SkipReason::Codec(message),
        }
    }
}

/// A CAN frame that could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipRecord {
    /// Logger timestamp in milliseconds
    pub timestamp: u32,
    /// Identifier of the frame
    pub can_id: u32,
    /// Raw payload as captured
    pub payload: Vec<u8>,
    /// Why the frame was skipped
    pub reason: SkipReason,
}

/// Counters for one decoding pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipSummary {
    /// Comment frames seen (and ignored)
    pub comment_frames: usize,
    /// CAN frames that produced at least one row
    pub decoded_frames: usize,
    /// Rows produced
    pub decoded_rows: usize,
    /// CAN frames that produced no rows
    pub skipped_frames: usize,
    /// Identifiers of skipped frames, deduplicated, in order of first appearance
    pub distinct_ids: Vec<u32>,
}

/// Result of decoding a whole frame sequence.
#[derive(Debug, Clone, Default)]
pub struct DecodeOutcome {
    /// Decoded rows in frame order, signal order within a frame
    pub rows: Vec<DecodedRow>,
    /// Frames that produced no rows
    pub skipped: Vec<SkipRecord>,
    /// Counters
    pub summary: SkipSummary,
}

/// Incremental row builder.
///
/// Feed frames one at a time with [`RowBuilder::push`], then take the outcome
/// with [`RowBuilder::finish`].
pub struct RowBuilder<C: SignalCodec> {
    codec: C,
    outcome: DecodeOutcome,
    seen_ids: HashSet<u32>,
}

impl<C: SignalCodec> RowBuilder<C> {
    /// Create a builder around a codec.
    pub fn new(codec: C) -> Self {
        Self {
            codec,
            outcome: DecodeOutcome::default(),
            seen_ids: HashSet::new(),
        }
    }

    /// Process a single frame.
    pub fn push(&mut self, frame: &Frame) {
        match frame {
            Frame::Comment(_) => self.outcome.summary.comment_frames += 1,
            Frame::Can(can) => self.push_can(can),
        }
    }

    fn push_can(&mut self, frame: &CanFrame) {
        let readings = match self.codec.decode_message(frame.can_id, &frame.payload) {
            Ok(readings) if readings.is_empty() => {
                return self.skip(frame, SkipReason::UnknownSignal);
            }
            Ok(readings) => readings,
            Err(err) => {
                tracing::debug!(
                    can_id = frame.can_id,
                    timestamp = frame.timestamp,
                    error = %err,
                    "skipping undecodable frame"
                );
                return self.skip(frame, err.into());
            }
        };

        let summary = &mut self.outcome.summary;
        summary.decoded_frames += 1;
        summary.decoded_rows += readings.len();

        self.outcome
            .rows
            .extend(readings.into_iter().map(|reading| DecodedRow {
                timestamp: u64::from(frame.timestamp),
                can_id: frame.can_id,
                sensor: reading.name,
                value: reading.value,
                unit: reading.unit,
            }));
    }

    fn skip(&mut self, frame: &CanFrame, reason: SkipReason) {
        let summary = &mut self.outcome.summary;
        summary.skipped_frames += 1;
        if self.seen_ids.insert(frame.can_id) {
            summary.distinct_ids.push(frame.can_id);
        }
        self.outcome.skipped.push(SkipRecord {
            timestamp: frame.timestamp,
            can_id: frame.can_id,
            payload: frame.payload.clone(),
            reason,
        });
    }

    /// Finish decoding and return rows, skips and counters.
    pub fn finish(self) -> DecodeOutcome {
        let summary = &self.outcome.summary;
        if summary.skipped_frames > 0 {
            tracing::warn!(
                skipped = summary.skipped_frames,
                distinct_ids = ?summary.distinct_ids,
                "frames skipped during decoding"
            );
        }
        tracing::debug!(
            rows = summary.decoded_rows,
            frames = summary.decoded_frames,
            comments = summary.comment_frames,
            "decoding finished"
        );
        self.outcome
    }
}

/// Decode every CAN frame of `frames` with `codec`.
pub fn decode_frames<'a, C, I>(frames: I, codec: C) -> DecodeOutcome
where
    C: SignalCodec,
    I: IntoIterator<Item = &'a Frame>,
{
    let mut builder = RowBuilder::new(codec);
    for frame in frames {
        builder.push(frame);
    }
    builder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::SignalReading;
    use crate::frame::CommentFrame;

    /// Codec that knows message 0x100 (two signals, 2-byte payload) and 0x200 (no signals).
    struct FixedCodec;

    impl SignalCodec for FixedCodec {
        fn decode_message(
            &self,
            can_id: u32,
            payload: &[u8],
        ) -> Result<Vec<SignalReading>, CodecError> {
            match can_id {
                0x100 if payload.len() == 2 => Ok(vec![
                    SignalReading::new("Speed", payload[0] as f64, "km/h"),
                    SignalReading::new("Gear", payload[1] as f64, ""),
                ]),
                0x100 => Err(CodecError::PayloadMismatch {
                    can_id,
                    expected: 2,
                    actual: payload.len(),
                }),
                0x200 => Ok(Vec::new()),
                _ => Err(CodecError::UnknownMessage { can_id }),
            }
        }
    }

    #[test]
    fn test_rows_share_frame_metadata() {
        let frames = vec![Frame::Can(CanFrame::new(42, 0x100, [80, 3]))];
        let outcome = decode_frames(&frames, FixedCodec);

        assert_eq!(outcome.rows.len(), 2);
        assert!(outcome.skipped.is_empty());
        assert_eq!(outcome.rows[0].sensor, "Speed");
        assert_eq!(outcome.rows[0].unit, "km/h");
        assert_eq!(outcome.rows[1].sensor, "Gear");
        assert!(outcome.rows.iter().all(|r| r.timestamp == 42 && r.can_id == 0x100));
        assert_eq!(outcome.summary.decoded_frames, 1);
        assert_eq!(outcome.summary.decoded_rows, 2);
    }

    #[test]
    fn test_unknown_ids_are_skipped_and_deduplicated() {
        let frames = vec![
            Frame::Can(CanFrame::new(1, 0x300, [1])),
            Frame::Can(CanFrame::new(2, 0x100, [5, 6])),
            Frame::Can(CanFrame::new(3, 0x300, [2])),
            Frame::Can(CanFrame::new(4, 0x400, [0u8; 0])),
        ];
        let outcome = decode_frames(&frames, FixedCodec);

        assert_eq!(outcome.rows.len(), 2);
        assert_eq!(outcome.skipped.len(), 3);
        assert_eq!(outcome.summary.skipped_frames, 3);
        assert_eq!(outcome.summary.distinct_ids, vec![0x300, 0x400]);
        assert!(outcome.rows.iter().all(|r| r.can_id == 0x100));
        assert_eq!(outcome.skipped[1].payload, vec![2]);
        assert_eq!(outcome.skipped[1].reason, SkipReason::UnknownSignal);
    }

    #[test]
    fn test_payload_mismatch_and_empty_messages_skip() {
        let frames = vec![
            Frame::Can(CanFrame::new(1, 0x100, [1, 2, 3])),
            Frame::Can(CanFrame::new(2, 0x200, [0; 8])),
        ];
        let outcome = decode_frames(&frames, FixedCodec);

        assert!(outcome.rows.is_empty());
        assert_eq!(
            outcome.skipped[0].reason,
            SkipReason::PayloadMismatch {
                expected: 2,
                actual: 3
            }
        );
        assert_eq!(outcome.skipped[1].reason, SkipReason::UnknownSignal);
        assert_eq!(outcome.summary.distinct_ids, vec![0x100, 0x200]);
    }

    #[test]
    fn test_comments_are_inert() {
        let frames = vec![
            Frame::Comment(CommentFrame::new("header")),
            Frame::Comment(CommentFrame::new("x")),
        ];
        let outcome = decode_frames(&frames, FixedCodec);
        assert!(outcome.rows.is_empty());
        assert!(outcome.skipped.is_empty());
        assert_eq!(outcome.summary.comment_frames, 2);
    }
}
