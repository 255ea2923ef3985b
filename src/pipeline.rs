//! Conversion driver.
//!
//! A [`Pipeline`] turns one raw log into its published artifacts:
//!
//! | Stage | Work | Progress |
//! |-------|------|----------|
//! | [`Stage::Staged`] | task registered, output directory ready | 0 |
//! | [`Stage::Deserialized`] | bytes split into frames | 20 |
//! | [`Stage::Decoded`] | table, failure log and skip summary written | 40 |
//! | [`Stage::Normalized`] | timestamps shifted, duplicates removed | 60 |
//! | [`Stage::Encoded`] | line protocol written | 80 |
//! | [`Stage::Delivered`] | line protocol handed to the sink | 100 |
//!
//! Stages run strictly in order. The first failing stage records its error on
//! the task and stops the run; progress stays at the last completed
//! checkpoint. An unavailable sink is the one exception: the run still
//! completes and the report says delivery was skipped.
//!
//! Every file is written inside a private scratch directory under the output
//! directory and only renamed into place once encoding has finished, so runs
//! sharing a name never read or truncate each other's intermediate files.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use canlog::codec::DbcCodec;
//! use canlog::pipeline::{Pipeline, PipelineConfig};
//! use canlog::registry::{TaskRegistry, TaskToken};
//! use canlog::sink::NullSink;
//!
//! let codec = DbcCodec::from_file("vehicle.dbc")?;
//! let registry = Arc::new(TaskRegistry::new(20));
//! let pipeline = Pipeline::new(PipelineConfig::default(), codec, registry.clone(), NullSink);
//!
//! let token = TaskToken::generate();
//! let report = pipeline.run_file(&token, "drive.bin")?;
//! println!("{} rows, delivery: {:?}", report.summary.decoded_rows, report.delivery);
//! ```

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::codec::SignalCodec;
use crate::config::Settings;
use crate::decoder::{DecodeOutcome, SkipSummary, decode_frames};
use crate::deserializer::deserialize;
use crate::frame::Frame;
use crate::line_protocol::{EncodeStats, FileSink, LineProtocolEncoder, LineSink};
use crate::normalize::{NormalizeStats, TimestampNormalizer, normalize_table};
use crate::registry::{Stage, TaskRegistry, TaskToken};
use crate::sink::TimeSeriesSink;
use crate::table::{TableWriter, write_failure_log};
use crate::{Error, Result};

/// A stage that failed, and why.
#[derive(Debug, Error)]
#[error("{stage} stage failed: {error}")]
pub struct StageFailure {
    /// Stage that was running
    pub stage: Stage,
    /// Underlying error
    #[source]
    pub error: Error,
}

/// Result of one pipeline stage.
pub type StageResult<T> = core::result::Result<T, StageFailure>;

trait InStage<T> {
    fn in_stage(self, stage: Stage) -> StageResult<T>;
}

impl<T, E: Into<Error>> InStage<T> for core::result::Result<T, E> {
    fn in_stage(self, stage: Stage) -> StageResult<T> {
        self.map_err(|e| StageFailure {
            stage,
            error: e.into(),
        })
    }
}

/// Outcome of the delivery stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// The sink accepted the line protocol
    Delivered,
    /// The sink could not be reached; artifacts were kept
    Unavailable(String),
}

/// Paths of the files published by a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifacts {
    /// Decoded table (`<name>.csv`)
    pub table: PathBuf,
    /// Line protocol (`<name>.line`)
    pub line_protocol: PathBuf,
    /// Failure log of skipped frames (`<name>.log`)
    pub failure_log: PathBuf,
    /// Skip summary (`<name>.summary.json`)
    pub summary: PathBuf,
}

impl Artifacts {
    /// Artifact paths for `name` inside `dir`.
    pub fn new(dir: &Path, name: &str) -> Self {
        Self {
            table: dir.join(format!("{name}.csv")),
            line_protocol: dir.join(format!("{name}.line")),
            failure_log: dir.join(format!("{name}.log")),
            summary: dir.join(format!("{name}.summary.json")),
        }
    }
}

/// Report of a completed run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    /// Task the run reported to
    pub token: TaskToken,
    /// Artifact name
    pub name: String,
    /// Frames read from the log
    pub frames: usize,
    /// Decoding counters
    pub summary: SkipSummary,
    /// Normalization counters
    pub normalize: NormalizeStats,
    /// Encoding counters
    pub encode: EncodeStats,
    /// Published files
    pub artifacts: Artifacts,
    /// Delivery outcome
    pub delivery: DeliveryStatus,
}

/// Settings used by a [`Pipeline`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Directory receiving published artifacts
    pub output_dir: PathBuf,
    /// Rows per chunk when normalizing and encoding
    pub chunk_size: usize,
    /// Milliseconds added to every logger timestamp
    pub epoch_offset_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig::from(&Settings::default())
    }
}

impl From<&Settings> for PipelineConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            output_dir: settings.output_dir.clone(),
            chunk_size: settings.chunk_size,
            epoch_offset_ms: settings.epoch_offset_ms,
        }
    }
}

/// Drives logs through every stage and reports progress to a registry.
pub struct Pipeline<C, S> {
    config: PipelineConfig,
    codec: C,
    registry: Arc<TaskRegistry>,
    sink: S,
}

impl<C: SignalCodec, S: TimeSeriesSink> Pipeline<C, S> {
    /// Create a pipeline.
    pub fn new(config: PipelineConfig, codec: C, registry: Arc<TaskRegistry>, sink: S) -> Self {
        Self {
            config,
            codec,
            registry,
            sink,
        }
    }

    /// Get the configuration.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Get the registry progress is reported to.
    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    /// Read the log at `path` and convert it, naming artifacts after the file
    /// stem.
    pub fn run_file(&self, token: &TaskToken, path: impl AsRef<Path>) -> StageResult<RunReport> {
        let path = path.as_ref();
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| token.to_string());
        self.run_file_as(token, path, &name)
    }

    /// Read the log at `path` and convert it, naming artifacts `name`.
    pub fn run_file_as(
        &self,
        token: &TaskToken,
        path: impl AsRef<Path>,
        name: &str,
    ) -> StageResult<RunReport> {
        let path = path.as_ref();
        self.ensure_task(token);
        let bytes = match fs::read(path).in_stage(Stage::Staged) {
            Ok(bytes) => bytes,
            Err(failure) => return Err(self.record_failure(token, failure)),
        };
        self.run(token, name, &bytes)
    }

    /// Convert one raw log.
    ///
    /// Registers the task if the registry does not know it yet.
    pub fn run(&self, token: &TaskToken, name: &str, bytes: &[u8]) -> StageResult<RunReport> {
        let span = tracing::info_span!("conversion", token = %token, name = %name);
        let _guard = span.enter();

        self.ensure_task(token);
        tracing::info!(bytes = bytes.len(), "conversion started");

        match self.execute(token, name, bytes) {
            Ok(report) => {
                tracing::info!(
                    rows = report.encode.lines,
                    skipped = report.summary.skipped_frames,
                    delivery = ?report.delivery,
                    "conversion finished"
                );
                Ok(report)
            }
            Err(failure) => Err(self.record_failure(token, failure)),
        }
    }

    fn ensure_task(&self, token: &TaskToken) {
        if self.registry.get(token).is_none() {
            self.registry.create(token.clone());
        }
    }

    fn record_failure(&self, token: &TaskToken, failure: StageFailure) -> StageFailure {
        tracing::error!(stage = %failure.stage, error = %failure.error, "conversion failed");
        self.registry.fail(token, &failure.error);
        failure
    }

    fn advance(&self, token: &TaskToken, stage: Stage) {
        self.registry.update(token, stage);
        tracing::info!(stage = %stage, progress = stage.checkpoint(), "stage complete");
    }

    fn execute(&self, token: &TaskToken, name: &str, bytes: &[u8]) -> StageResult<RunReport> {
        fs::create_dir_all(&self.config.output_dir).in_stage(Stage::Staged)?;
        // Same directory as the published files so publishing is a rename.
        let scratch = tempfile::Builder::new()
            .prefix(".canlog-")
            .tempdir_in(&self.config.output_dir)
            .in_stage(Stage::Staged)?;
        let staged = Artifacts::new(scratch.path(), name);
        let artifacts = Artifacts::new(&self.config.output_dir, name);

        let frames = deserialize(bytes).in_stage(Stage::Deserialized)?;
        self.advance(token, Stage::Deserialized);

        let outcome = self.decode(&frames, &staged).in_stage(Stage::Decoded)?;
        self.advance(token, Stage::Decoded);

        let normalized = scratch.path().join("normalized.csv");
        let normalize = self
            .normalize(&staged.table, &normalized)
            .in_stage(Stage::Normalized)?;
        self.advance(token, Stage::Normalized);

        let encode = self
            .encode(&normalized, &staged.line_protocol)
            .in_stage(Stage::Encoded)?;
        self.advance(token, Stage::Encoded);

        let delivered = self.sink.deliver(&staged.line_protocol);
        let published = publish(&staged, &artifacts);
        let delivery = match delivered {
            Ok(()) => DeliveryStatus::Delivered,
            Err(Error::SinkUnavailable(reason)) => {
                tracing::warn!(reason = %reason, "sink unavailable, delivery skipped");
                DeliveryStatus::Unavailable(reason)
            }
            Err(error) => {
                return Err(StageFailure {
                    stage: Stage::Delivered,
                    error,
                });
            }
        };
        published.in_stage(Stage::Delivered)?;
        self.advance(token, Stage::Delivered);

        Ok(RunReport {
            token: token.clone(),
            name: name.to_string(),
            frames: frames.len(),
            summary: outcome.summary,
            normalize,
            encode,
            artifacts,
            delivery,
        })
    }

    fn decode(&self, frames: &[Frame], artifacts: &Artifacts) -> Result<DecodeOutcome> {
        let outcome = decode_frames(frames, &self.codec);

        let mut table = TableWriter::new(BufWriter::new(File::create(&artifacts.table)?))?;
        for row in &outcome.rows {
            table.write_row(row)?;
        }
        table.finish()?.flush()?;

        write_failure_log(
            &outcome.skipped,
            BufWriter::new(File::create(&artifacts.failure_log)?),
        )?;

        let mut summary = BufWriter::new(File::create(&artifacts.summary)?);
        serde_json::to_writer_pretty(&mut summary, &outcome.summary)?;
        summary.flush()?;

        Ok(outcome)
    }

    fn normalize(&self, table: &Path, normalized: &Path) -> Result<NormalizeStats> {
        let mut output = BufWriter::new(File::create(normalized)?);
        let stats = normalize_table(
            BufReader::new(File::open(table)?),
            &mut output,
            TimestampNormalizer::new(self.config.epoch_offset_ms),
            self.config.chunk_size,
        )?;
        output.flush()?;
        if stats.duplicates > 0 {
            tracing::debug!(duplicates = stats.duplicates, "duplicate rows removed");
        }
        Ok(stats)
    }

    fn encode(&self, normalized: &Path, line_file: &Path) -> Result<EncodeStats> {
        let mut sink = FileSink::create(line_file)?;
        let stats = LineProtocolEncoder::new(self.config.chunk_size)
            .encode_table(BufReader::new(File::open(normalized)?), &mut sink)?;
        sink.flush()?;
        Ok(stats)
    }
}

/// Move a run's finished files from its scratch directory into place.
///
/// Each file is renamed whole, so a reader never sees a file mixing two runs.
fn publish(staged: &Artifacts, published: &Artifacts) -> Result<()> {
    for (from, to) in [
        (&staged.table, &published.table),
        (&staged.failure_log, &published.failure_log),
        (&staged.summary, &published.summary),
        (&staged.line_protocol, &published.line_protocol),
    ] {
        fs::rename(from, to)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::SignalReading;
    use crate::frame::CanFrame;
    use crate::CodecError;

    struct SpeedCodec;

    impl SignalCodec for SpeedCodec {
        fn decode_message(
            &self,
            can_id: u32,
            payload: &[u8],
        ) -> core::result::Result<Vec<SignalReading>, CodecError> {
            if can_id != 256 {
                return Err(CodecError::UnknownMessage { can_id });
            }
            let raw = u16::from_le_bytes([payload[0], payload[1]]);
            Ok(vec![SignalReading::new("Speed", f64::from(raw), "km/h")])
        }
    }

    struct RejectingSink;

    impl TimeSeriesSink for RejectingSink {
        fn deliver(&self, _line_file: &Path) -> Result<()> {
            Err(Error::Io(std::io::Error::other("refused")))
        }
    }

    struct AbsentSink;

    impl TimeSeriesSink for AbsentSink {
        fn deliver(&self, _line_file: &Path) -> Result<()> {
            Err(Error::SinkUnavailable("no token".into()))
        }
    }

    fn pipeline<S: TimeSeriesSink>(dir: &Path, sink: S) -> Pipeline<SpeedCodec, S> {
        let config = PipelineConfig {
            output_dir: dir.to_path_buf(),
            chunk_size: 2,
            epoch_offset_ms: 0,
        };
        Pipeline::new(config, SpeedCodec, Arc::new(TaskRegistry::new(4)), sink)
    }

    fn log() -> Vec<u8> {
        crate::frame::serialize(&[
            CanFrame::new(1, 256, [10, 20]).into(),
            CanFrame::new(2, 999, [1]).into(),
        ])
        .unwrap()
    }

    #[test]
    fn test_successful_run_reaches_100() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path(), crate::sink::NullSink);
        let token = TaskToken::new("ok");

        let report = pipeline.run(&token, "drive", &log()).unwrap();

        assert_eq!(report.delivery, DeliveryStatus::Delivered);
        assert_eq!(report.frames, 2);
        assert_eq!(report.summary.decoded_rows, 1);
        assert_eq!(report.summary.distinct_ids, vec![999]);
        let state = pipeline.registry().get(&token).unwrap();
        assert_eq!(state.progress, 100);
        assert_eq!(state.stage, Stage::Delivered);

        let lines = fs::read_to_string(&report.artifacts.line_protocol).unwrap();
        assert_eq!(lines, "Speed,tag1=256 field1=5130 1\n");
        assert!(report.artifacts.failure_log.exists());
        assert!(report.artifacts.summary.exists());
    }

    #[test]
    fn test_corrupted_log_stops_at_zero() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path(), crate::sink::NullSink);
        let token = TaskToken::new("bad");

        let failure = pipeline.run(&token, "bad", &[5, 0, 0]).unwrap_err();

        assert_eq!(failure.stage, Stage::Deserialized);
        assert!(failure.error.is_corruption());
        let state = pipeline.registry().get(&token).unwrap();
        assert_eq!(state.progress, 0);
        assert!(state.is_failed());
        assert!(state.error.unwrap().contains("file corruption detected"));
        assert!(!dir.path().join("bad.csv").exists());
    }

    #[test]
    fn test_unavailable_sink_still_completes() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path(), AbsentSink);
        let token = TaskToken::new("offline");

        let report = pipeline.run(&token, "offline", &log()).unwrap();

        assert_eq!(report.delivery, DeliveryStatus::Unavailable("no token".into()));
        assert_eq!(pipeline.registry().get(&token).unwrap().progress, 100);
        assert!(report.artifacts.line_protocol.exists());
    }

    #[test]
    fn test_delivery_error_keeps_encoded_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path(), RejectingSink);
        let token = TaskToken::new("rejected");

        let failure = pipeline.run(&token, "rejected", &log()).unwrap_err();

        assert_eq!(failure.stage, Stage::Delivered);
        let state = pipeline.registry().get(&token).unwrap();
        assert_eq!(state.progress, 80);
        assert_eq!(state.error.as_deref(), Some("I/O error: refused"));
        assert!(dir.path().join("rejected.line").exists());
    }

    #[test]
    fn test_runs_leave_only_published_files() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path(), crate::sink::NullSink);

        pipeline.run(&TaskToken::new("a"), "drive", &log()).unwrap();
        pipeline
            .run(&TaskToken::new("b"), "broken", &[5, 0, 0])
            .unwrap_err();

        let mut entries: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        entries.sort();
        assert_eq!(
            entries,
            ["drive.csv", "drive.line", "drive.log", "drive.summary.json"]
        );
    }

    #[test]
    fn test_missing_input_file_fails_staged() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path(), crate::sink::NullSink);
        let token = TaskToken::new("missing");

        let failure = pipeline
            .run_file(&token, dir.path().join("absent.bin"))
            .unwrap_err();

        assert_eq!(failure.stage, Stage::Staged);
        assert!(pipeline.registry().get(&token).unwrap().is_failed());
    }
}
