//! Tabular artifacts written and read by the pipeline.
//!
//! - decoded table: `Timestamp,CANID,Sensor,Value,Unit`
//! - failure log: `Timestamp,CANID,DataBytes`
//!
//! Tables are read back as plain strings ([`TableRecord`]) so that ragged or
//! partially empty rows survive until the encoder decides to drop them.

use std::io::{Read, Write};

use serde::{Deserialize, Serialize};

use crate::decoder::{DecodedRow, SkipRecord};
use crate::Result;

/// Header of the decoded table.
pub const TABLE_HEADER: [&str; 5] = ["Timestamp", "CANID", "Sensor", "Value", "Unit"];

/// Header of the failure log.
pub const FAILURE_LOG_HEADER: [&str; 3] = ["Timestamp", "CANID", "DataBytes"];

/// A row of the decoded table with every field kept as text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableRecord {
    /// Timestamp column
    pub timestamp: String,
    /// CAN id column
    pub can_id: String,
    /// Sensor (signal name) column
    pub sensor: String,
    /// Value column
    pub value: String,
    /// Unit column
    pub unit: String,
}

impl TableRecord {
    /// Build a record from a CSV row; missing trailing columns become empty.
    fn from_string_record(record: &csv::StringRecord) -> Self {
        let field = |i: usize| record.get(i).unwrap_or_default().to_string();
        Self {
            timestamp: field(0),
            can_id: field(1),
            sensor: field(2),
            value: field(3),
            unit: field(4),
        }
    }

    fn fields(&self) -> [&str; 5] {
        [
            self.timestamp.as_str(),
            self.can_id.as_str(),
            self.sensor.as_str(),
            self.value.as_str(),
            self.unit.as_str(),
        ]
    }
}

impl From<&DecodedRow> for TableRecord {
    fn from(row: &DecodedRow) -> Self {
        Self {
            timestamp: row.timestamp.to_string(),
            can_id: row.can_id.to_string(),
            sensor: row.sensor.clone(),
            value: format_value(row.value),
            unit: row.unit.clone(),
        }
    }
}

/// Text form of a physical value; non-finite values become empty.
pub fn format_value(value: f64) -> String {
    if value.is_finite() {
        value.to_string()
    } else {
        String::new()
    }
}

/// Streaming writer for decoded tables.
pub struct TableWriter<W: Write> {
    inner: csv::Writer<W>,
    rows: usize,
}

impl<W: Write> TableWriter<W> {
    /// Create a writer and emit the header row.
    pub fn new(writer: W) -> Result<Self> {
        let mut inner = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(writer);
        inner.write_record(TABLE_HEADER)?;
        Ok(Self { inner, rows: 0 })
    }

    /// Write one decoded row.
    pub fn write_row(&mut self, row: &DecodedRow) -> Result<()> {
        self.write_record(&TableRecord::from(row))
    }

    /// Write one textual record.
    pub fn write_record(&mut self, record: &TableRecord) -> Result<()> {
        self.inner.write_record(record.fields())?;
        self.rows += 1;
        Ok(())
    }

    /// Number of data rows written so far.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Flush and return the underlying writer.
    pub fn finish(mut self) -> Result<W> {
        self.inner.flush()?;
        self.inner
            .into_inner()
            .map_err(|e| crate::Error::Io(e.into_error()))
    }
}

/// Chunked reader for decoded tables.
///
/// Rows may have fewer than five columns; missing fields read as empty.
pub struct TableReader<R: Read> {
    inner: csv::Reader<R>,
    record: csv::StringRecord,
}

impl<R: Read> TableReader<R> {
    /// Create a reader; the first row is treated as the header.
    pub fn new(reader: R) -> Self {
        let inner = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);
        Self {
            inner,
            record: csv::StringRecord::new(),
        }
    }

    /// Read up to `max_rows` records. An empty result means the table is exhausted.
    pub fn read_chunk(&mut self, max_rows: usize) -> Result<Vec<TableRecord>> {
        let mut chunk = Vec::with_capacity(max_rows.min(8192));
        while chunk.len() < max_rows && self.inner.read_record(&mut self.record)? {
            chunk.push(TableRecord::from_string_record(&self.record));
        }
        Ok(chunk)
    }
}

/// Write the failure log for skipped frames.
///
/// `DataBytes` holds the payload as comma-separated decimal bytes.
pub fn write_failure_log<W: Write>(skipped: &[SkipRecord], writer: W) -> Result<()> {
    let mut out = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(writer);
    out.write_record(FAILURE_LOG_HEADER)?;
    for skip in skipped {
        let bytes = skip
            .payload
            .iter()
            .map(u8::to_string)
            .collect::<Vec<_>>()
            .join(",");
        out.write_record([
            skip.timestamp.to_string(),
            skip.can_id.to_string(),
            bytes,
        ])?;
    }
    out.flush()?;
    Ok(())
}
