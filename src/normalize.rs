//! Timestamp normalization and duplicate removal.
//!
//! The logger records milliseconds relative to its own start. Before encoding,
//! the decoded table is rewritten with timestamps on the sink's millisecond
//! epoch and with exact duplicate rows removed, which is what the line
//! protocol encoder expects as input.
//!
//! Duplicates are detected across the whole table, wherever they occur. The
//! logger can repeat a record after other records, so the seen set lives for
//! the entire pass and grows with the number of distinct rows.

use std::collections::HashSet;
use std::io::{Read, Write};

use serde::{Deserialize, Serialize};

use crate::table::{TableReader, TableRecord, TableWriter};
use crate::{Error, Result};

/// Maps logger timestamps onto the sink's millisecond epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampNormalizer {
    epoch_offset_ms: u64,
}

impl TimestampNormalizer {
    /// Create a normalizer that adds `epoch_offset_ms` to every timestamp.
    pub fn new(epoch_offset_ms: u64) -> Self {
        Self { epoch_offset_ms }
    }

    /// Configured offset.
    pub fn epoch_offset_ms(&self) -> u64 {
        self.epoch_offset_ms
    }

    /// Normalize one numeric timestamp.
    pub fn normalize(&self, timestamp: u64) -> Result<u64> {
        timestamp
            .checked_add(self.epoch_offset_ms)
            .ok_or(Error::TimestampOverflow {
                timestamp,
                offset_ms: self.epoch_offset_ms,
            })
    }

    /// Normalize the timestamp column of a table record in place.
    ///
    /// Empty timestamps are left empty for the encoder to drop.
    pub fn normalize_record(&self, record: &mut TableRecord) -> Result<()> {
        if record.timestamp.is_empty() {
            return Ok(());
        }
        let raw: u64 = record
            .timestamp
            .trim()
            .parse()
            .map_err(|_| Error::InvalidTimestamp(record.timestamp.clone()))?;
        record.timestamp = self.normalize(raw)?.to_string();
        Ok(())
    }
}

/// Drops exact duplicate rows anywhere in a table.
#[derive(Debug, Default)]
pub struct Deduplicator {
    seen: HashSet<TableRecord>,
    dropped: usize,
}

impl Deduplicator {
    /// Create an empty deduplicator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the record has not been seen yet.
    pub fn admit(&mut self, record: &TableRecord) -> bool {
        if self.seen.contains(record) {
            self.dropped += 1;
            return false;
        }
        self.seen.insert(record.clone());
        true
    }

    /// Number of distinct rows admitted so far.
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// Returns `true` if nothing has been admitted.
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Number of duplicates rejected so far.
    pub fn dropped(&self) -> usize {
        self.dropped
    }
}

/// Counters for one normalization pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizeStats {
    /// Rows written to the normalized table
    pub rows: usize,
    /// Exact duplicates removed
    pub duplicates: usize,
}

/// Rewrite a decoded table with normalized timestamps and without duplicates.
pub fn normalize_table<R: Read, W: Write>(
    reader: R,
    writer: W,
    normalizer: TimestampNormalizer,
    chunk_size: usize,
) -> Result<NormalizeStats> {
    let mut input = TableReader::new(reader);
    let mut output = TableWriter::new(writer)?;
    let mut dedup = Deduplicator::new();

    loop {
        let chunk = input.read_chunk(chunk_size.max(1))?;
        if chunk.is_empty() {
            break;
        }
        for mut record in chunk {
            normalizer.normalize_record(&mut record)?;
            if dedup.admit(&record) {
                output.write_record(&record)?;
            }
        }
    }

    let stats = NormalizeStats {
        rows: output.rows(),
        duplicates: dedup.dropped(),
    };
    output.finish()?;
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn record(ts: &str, sensor: &str, value: &str) -> TableRecord {
        TableRecord {
            timestamp: ts.into(),
            can_id: "256".into(),
            sensor: sensor.into(),
            value: value.into(),
            unit: String::new(),
        }
    }

    #[test]
    fn test_offset_is_added() {
        let n = TimestampNormalizer::new(1_700_000_000_000);
        assert_eq!(n.normalize(1).unwrap(), 1_700_000_000_001);
        assert!(matches!(
            TimestampNormalizer::new(u64::MAX).normalize(1),
            Err(Error::TimestampOverflow { .. })
        ));
    }

    #[test]
    fn test_normalize_record() {
        let n = TimestampNormalizer::new(1000);
        let mut r = record("5", "s", "1");
        n.normalize_record(&mut r).unwrap();
        assert_eq!(r.timestamp, "1005");

        let mut empty = record("", "s", "1");
        n.normalize_record(&mut empty).unwrap();
        assert_eq!(empty.timestamp, "");

        let mut bad = record("soon", "s", "1");
        assert!(matches!(
            n.normalize_record(&mut bad),
            Err(Error::InvalidTimestamp(_))
        ));
    }

    #[test]
    fn test_dedup_same_timestamp() {
        let mut d = Deduplicator::new();
        assert!(d.admit(&record("1", "a", "1")));
        assert!(d.admit(&record("1", "b", "1")));
        assert!(!d.admit(&record("1", "a", "1")));
        assert!(d.admit(&record("2", "a", "1")));
        assert!(!d.admit(&record("2", "a", "1")));
        assert_eq!(d.dropped(), 2);
        assert_eq!(d.len(), 3);
    }

    #[test]
    fn test_dedup_across_timestamps() {
        let mut d = Deduplicator::new();
        assert!(d.is_empty());
        assert!(d.admit(&record("1", "a", "1")));
        assert!(d.admit(&record("2", "a", "2")));
        assert!(!d.admit(&record("1", "a", "1")));
        assert!(d.admit(&record("3", "a", "1")));
        assert_eq!(d.dropped(), 1);
    }

    #[test]
    fn test_normalize_table_drops_non_adjacent_duplicates() {
        let table = "Timestamp,CANID,Sensor,Value,Unit\n\
                     1,256,Speed,10,km/h\n\
                     2,256,Speed,11,km/h\n\
                     1,256,Speed,10,km/h\n";
        let mut out = Vec::new();
        let stats = normalize_table(table.as_bytes(), &mut out, TimestampNormalizer::new(0), 2)
            .unwrap();

        assert_eq!(stats.rows, 2);
        assert_eq!(stats.duplicates, 1);
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "Timestamp,CANID,Sensor,Value,Unit\n1,256,Speed,10,km/h\n2,256,Speed,11,km/h\n"
        );
    }

    #[test]
    fn test_normalize_table() {
        let table = "Timestamp,CANID,Sensor,Value,Unit\n\
                     1,256,Speed,10,km/h\n\
                     1,256,Speed,10,km/h\n\
                     2,256,Speed,11,km/h\n";
        let mut out = Vec::new();
        let stats = normalize_table(table.as_bytes(), &mut out, TimestampNormalizer::new(100), 1)
            .unwrap();

        assert_eq!(stats, NormalizeStats { rows: 2, duplicates: 1 });
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "Timestamp,CANID,Sensor,Value,Unit\n101,256,Speed,10,km/h\n102,256,Speed,11,km/h\n"
        );
    }
}
