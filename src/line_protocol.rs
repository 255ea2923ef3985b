//! InfluxDB line protocol encoding.
//!
//! Every table row becomes one point:
//!
//! ```text
//! <sensor>,tag1=<can id> field1=<value> <timestamp>
//! ```
//!
//! Measurement and tag text are escaped (`,`, space and `=` get a leading
//! backslash). Rows with an empty timestamp, id, sensor or value are dropped.
//! Rows are processed in bounded chunks so memory stays flat for any table
//! size; each chunk is written as newline-joined lines with one trailing
//! newline.
//!
//! # Example
//!
//! ```
//! use canlog::line_protocol::{LineProtocolEncoder, VecSink};
//! use canlog::table::TableRecord;
//!
//! let row = TableRecord {
//!     timestamp: "123456".into(),
//!     can_id: "100".into(),
//!     sensor: "Eng_RPM".into(),
//!     value: "4500".into(),
//!     unit: "rpm".into(),
//! };
//!
//! let mut sink = VecSink::new();
//! LineProtocolEncoder::default().encode([row], &mut sink).unwrap();
//! assert_eq!(sink.as_str(), "Eng_RPM,tag1=100 field1=4500 123456\n");
//! ```

use std::borrow::Cow;
use std::io::Read;

use serde::{Deserialize, Serialize};

use crate::table::{TableReader, TableRecord};
use crate::Result;

/// Default number of rows per chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 200_000;

/// Escape measurement or tag text.
///
/// Comma, space and equals sign each get a leading backslash.
pub fn escape_key(text: &str) -> Cow<'_, str> {
    if !text.contains(&[',', ' ', '='][..]) {
        return Cow::Borrowed(text);
    }
    let mut escaped = String::with_capacity(text.len() + 4);
    for c in text.chars() {
        if matches!(c, ',' | ' ' | '=') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    Cow::Owned(escaped)
}

/// Format one row as a line, or `None` if a required field is empty.
pub fn format_line(record: &TableRecord) -> Option<String> {
    if record.timestamp.is_empty()
        || record.can_id.is_empty()
        || record.sensor.is_empty()
        || record.value.is_empty()
    {
        return None;
    }
    Some(format!(
        "{},tag1={} field1={} {}",
        escape_key(&record.sensor),
        escape_key(&record.can_id),
        record.value,
        record.timestamp
    ))
}

/// Destination for encoded line protocol text.
pub trait LineSink {
    /// Write one chunk of complete lines.
    fn write_chunk(&mut self, chunk: &str) -> Result<()>;

    /// Flush any buffered data.
    fn flush(&mut self) -> Result<()>;
}

/// A sink that collects line protocol text in memory.
#[derive(Debug, Default)]
pub struct VecSink {
    buffer: String,
    chunks: usize,
}

impl VecSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the text written so far.
    pub fn as_str(&self) -> &str {
        &self.buffer
    }

    /// Number of chunks written.
    pub fn chunks(&self) -> usize {
        self.chunks
    }

    /// Consume the sink and return the text.
    pub fn into_inner(self) -> String {
        self.buffer
    }
}

impl LineSink for VecSink {
    fn write_chunk(&mut self, chunk: &str) -> Result<()> {
        self.buffer.push_str(chunk);
        self.chunks += 1;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// A sink that writes line protocol text to a file through a buffer.
pub struct FileSink {
    inner: std::io::BufWriter<std::fs::File>,
}

impl FileSink {
    /// Create (or truncate) the file at `path`.
    pub fn create(path: impl AsRef<std::path::Path>) -> Result<Self> {
        Self::with_capacity(path, 1_048_576)
    }

    /// Create the file with the specified buffer capacity.
    pub fn with_capacity(path: impl AsRef<std::path::Path>, capacity: usize) -> Result<Self> {
        let file = std::fs::File::create(path)?;
        Ok(Self {
            inner: std::io::BufWriter::with_capacity(capacity, file),
        })
    }
}

impl LineSink for FileSink {
    fn write_chunk(&mut self, chunk: &str) -> Result<()> {
        use std::io::Write;
        self.inner.write_all(chunk.as_bytes())?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        use std::io::Write;
        self.inner.flush()?;
        Ok(())
    }
}

/// Counters for one encoding pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodeStats {
    /// Lines written
    pub lines: usize,
    /// Rows dropped for an empty required field
    pub dropped: usize,
    /// Chunks written
    pub chunks: usize,
}

/// Chunked line protocol encoder.
#[derive(Debug, Clone, Copy)]
pub struct LineProtocolEncoder {
    chunk_size: usize,
}

impl Default for LineProtocolEncoder {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl LineProtocolEncoder {
    /// Create an encoder with the given chunk size (at least one row).
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }

    /// Rows per chunk.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Encode one chunk of rows and hand it to the sink.
    ///
    /// A chunk in which every row was dropped writes nothing.
    pub fn encode_chunk<S: LineSink + ?Sized>(
        &self,
        rows: &[TableRecord],
        sink: &mut S,
        stats: &mut EncodeStats,
    ) -> Result<()> {
        let mut text = String::new();
        let mut lines = 0;
        for record in rows {
            match format_line(record) {
                Some(line) => {
                    if lines > 0 {
                        text.push('\n');
                    }
                    text.push_str(&line);
                    lines += 1;
                }
                None => stats.dropped += 1,
            }
        }
        if lines == 0 {
            return Ok(());
        }
        text.push('\n');
        sink.write_chunk(&text)?;
        stats.lines += lines;
        stats.chunks += 1;
        Ok(())
    }

    /// Encode rows from any iterator, chunk by chunk.
    pub fn encode<I, S>(&self, rows: I, sink: &mut S) -> Result<EncodeStats>
    where
        I: IntoIterator<Item = TableRecord>,
        S: LineSink + ?Sized,
    {
        let mut stats = EncodeStats::default();
        let mut chunk = Vec::with_capacity(self.chunk_size.min(8192));
        for record in rows {
            chunk.push(record);
            if chunk.len() == self.chunk_size {
                self.encode_chunk(&chunk, sink, &mut stats)?;
                chunk.clear();
            }
        }
        self.encode_chunk(&chunk, sink, &mut stats)?;
        sink.flush()?;
        Ok(stats)
    }

    /// Encode a decoded table read from `reader`, chunk by chunk.
    pub fn encode_table<R, S>(&self, reader: R, sink: &mut S) -> Result<EncodeStats>
    where
        R: Read,
        S: LineSink + ?Sized,
    {
        let mut table = TableReader::new(reader);
        let mut stats = EncodeStats::default();
        loop {
            let chunk = table.read_chunk(self.chunk_size)?;
            if chunk.is_empty() {
                break;
            }
            self.encode_chunk(&chunk, sink, &mut stats)?;
        }
        sink.flush()?;
        tracing::debug!(
            lines = stats.lines,
            dropped = stats.dropped,
            chunks = stats.chunks,
            "encoded line protocol"
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn record(ts: &str, id: &str, sensor: &str, value: &str) -> TableRecord {
        TableRecord {
            timestamp: ts.into(),
            can_id: id.into(),
            sensor: sensor.into(),
            value: value.into(),
            unit: String::new(),
        }
    }

    #[test]
    fn test_escape_key() {
        assert_eq!(escape_key("Eng_RPM"), "Eng_RPM");
        assert!(matches!(escape_key("plain"), Cow::Borrowed(_)));
        assert_eq!(escape_key("a,b c=d"), r"a\,b\ c\=d");
        assert_eq!(escape_key(r"back\slash"), r"back\slash");
    }

    #[test]
    fn test_format_line() {
        let line = format_line(&record("123456", "100", "Eng_RPM", "4500")).unwrap();
        assert_eq!(line, "Eng_RPM,tag1=100 field1=4500 123456");

        let line = format_line(&record("1", "1 2", "Oil Temp", "-3.5")).unwrap();
        assert_eq!(line, r"Oil\ Temp,tag1=1\ 2 field1=-3.5 1");
    }

    #[test]
    fn test_empty_fields_are_dropped() {
        for r in [
            record("", "1", "s", "1"),
            record("1", "", "s", "1"),
            record("1", "1", "", "1"),
            record("1", "1", "s", ""),
        ] {
            assert!(format_line(&r).is_none());
        }

        let mut sink = VecSink::new();
        let stats = LineProtocolEncoder::default()
            .encode(
                [record("1", "1", "s", "1"), record("2", "1", "s", "")],
                &mut sink,
            )
            .unwrap();
        assert_eq!(stats.lines, 1);
        assert_eq!(stats.dropped, 1);
        assert_eq!(sink.as_str(), "s,tag1=1 field1=1 1\n");
    }

    #[test]
    fn test_chunking_never_splits_lines() {
        let rows: Vec<_> = (0..5)
            .map(|i| record(&i.to_string(), "7", "x", "1"))
            .collect();
        let mut sink = VecSink::new();
        let stats = LineProtocolEncoder::new(2).encode(rows, &mut sink).unwrap();

        assert_eq!(stats.chunks, 3);
        assert_eq!(sink.chunks(), 3);
        assert_eq!(
            sink.as_str(),
            "x,tag1=7 field1=1 0\nx,tag1=7 field1=1 1\nx,tag1=7 field1=1 2\nx,tag1=7 field1=1 3\nx,tag1=7 field1=1 4\n"
        );
    }

    #[test]
    fn test_encode_table_tolerates_ragged_tail() {
        let table = "Timestamp,CANID,Sensor,Value,Unit\n1,256,Speed,5130,km/h\n2,256\n";
        let mut sink = VecSink::new();
        let stats = LineProtocolEncoder::new(1)
            .encode_table(table.as_bytes(), &mut sink)
            .unwrap();
        assert_eq!(stats.lines, 1);
        assert_eq!(stats.dropped, 1);
        assert_eq!(sink.as_str(), "Speed,tag1=256 field1=5130 1\n");
    }

    #[test]
    fn test_empty_input_writes_nothing() {
        let mut sink = VecSink::new();
        let stats = LineProtocolEncoder::default()
            .encode(Vec::new(), &mut sink)
            .unwrap();
        assert_eq!(stats, EncodeStats::default());
        assert!(sink.as_str().is_empty());
    }
}
