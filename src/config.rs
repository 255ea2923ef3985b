//! Runtime configuration.
//!
//! Settings are layered with the `config` crate, later sources winning:
//!
//! 1. built-in defaults ([`Settings::default`]),
//! 2. an optional TOML file,
//! 3. environment variables prefixed `CANLOG_`, with `__` between nested
//!    keys (`CANLOG_OUTPUT_DIR`, `CANLOG_INFLUX__BUCKET`, `CANLOG_LOG__LEVEL`).
//!
//! # Example
//!
//! ```no_run
//! use canlog::config::Settings;
//!
//! let settings = Settings::load(Some("canlog.toml".as_ref()))?;
//! println!("writing artifacts to {}", settings.output_dir.display());
//! # Ok::<(), canlog::Error>(())
//! ```

use std::path::{Path, PathBuf};

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::line_protocol::DEFAULT_CHUNK_SIZE;
use crate::logging::LogConfig;
use crate::registry::DEFAULT_CAPACITY;

/// Prefix of the environment variables read by [`Settings::load`].
pub const ENV_PREFIX: &str = "CANLOG";

/// Top-level settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Directory receiving the published artifacts of every run
    pub output_dir: PathBuf,
    /// Rows per chunk when normalizing and encoding
    pub chunk_size: usize,
    /// Number of tasks kept by the registry
    pub registry_capacity: usize,
    /// Milliseconds added to every logger timestamp
    pub epoch_offset_ms: u64,
    /// Logging
    pub log: LogConfig,
    /// Delivery to InfluxDB
    pub influx: InfluxConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("/data/csv"),
            chunk_size: DEFAULT_CHUNK_SIZE,
            registry_capacity: DEFAULT_CAPACITY,
            epoch_offset_ms: 0,
            log: LogConfig::default(),
            influx: InfluxConfig::default(),
        }
    }
}

/// Settings of the `influx` CLI sink.
///
/// `host`, `org` and `token` fall back to files in `credentials_dir` when
/// unset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InfluxConfig {
    /// Server URL
    pub host: Option<String>,
    /// Target bucket
    pub bucket: String,
    /// Organization
    pub org: Option<String>,
    /// API token
    pub token: Option<String>,
    /// Directory holding `influxdb2-localhost-url`, `influxdb2-org` and
    /// `influxdb2-admin-token`
    pub credentials_dir: PathBuf,
    /// Name or path of the `influx` executable
    pub executable: PathBuf,
}

impl Default for InfluxConfig {
    fn default() -> Self {
        Self {
            host: None,
            bucket: "NEWPIPELINETESTING".to_string(),
            org: None,
            token: None,
            credentials_dir: PathBuf::from("/data/influxdb2_parameters"),
            executable: PathBuf::from("influx"),
        }
    }
}

impl Settings {
    /// Load settings from defaults, an optional TOML file and the process
    /// environment.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        Self::from_sources(file, environment())
    }

    /// Load settings from defaults, an optional TOML file and the given
    /// environment source.
    pub fn from_sources(file: Option<&Path>, env: Environment) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(true));
        }
        let settings: Settings = builder.add_source(env).build()?.try_deserialize()?;
        tracing::debug!(
            output_dir = %settings.output_dir.display(),
            chunk_size = settings.chunk_size,
            registry_capacity = settings.registry_capacity,
            "configuration loaded"
        );
        Ok(settings)
    }

    /// Load settings from a TOML string layered over the defaults.
    pub fn from_toml(content: &str) -> Result<Self> {
        let settings = Config::builder()
            .add_source(File::from_str(content, FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }
}

/// The `CANLOG_` environment source.
pub fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}
