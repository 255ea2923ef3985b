//! Logging setup for the `canlog` binary.
//!
//! Library code only emits `tracing` events and spans; installing a
//! subscriber is left to the application. [`init_logging`] installs a
//! `tracing-subscriber` fmt layer writing to standard error, filtered by
//! `RUST_LOG` when set and by the configured level otherwise. The subscriber
//! parts need the `cli` feature; [`LogConfig`] is always available so settings
//! files parse the same either way.
//!
//! # Example
//!
//! ```no_run
//! use canlog::logging::{LogConfig, LogFormat, init_logging};
//!
//! let config = LogConfig {
//!     level: "debug".into(),
//!     format: LogFormat::Json,
//! };
//! init_logging(&config).expect("subscriber already installed");
//! tracing::info!("ready");
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
#[cfg(feature = "cli")]
use tracing_subscriber::{
    EnvFilter, fmt as tracing_fmt, layer::SubscriberExt, util::SubscriberInitExt,
    util::TryInitError,
};

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text
    #[default]
    Text,
    /// One JSON object per event
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("invalid log format: {other}")),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Text => f.write_str("text"),
            LogFormat::Json => f.write_str("json"),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Filter directives used when `RUST_LOG` is unset, e.g. `info` or
    /// `canlog=debug,warn`
    pub level: String,
    /// Output format
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

#[cfg(feature = "cli")]
impl LogConfig {
    /// Build the event filter: `RUST_LOG` wins, then the configured level.
    pub fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&self.level))
            .unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// Install the global subscriber.
///
/// Fails if a global subscriber is already installed.
#[cfg(feature = "cli")]
pub fn init_logging(config: &LogConfig) -> Result<(), TryInitError> {
    let layer = tracing_fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true);

    match config.format {
        LogFormat::Text => tracing_subscriber::registry()
            .with(config.filter())
            .with(layer)
            .try_init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(config.filter())
            .with(layer.json().flatten_event(true))
            .try_init(),
    }
}
