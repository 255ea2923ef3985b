//! Delivery of finished line protocol files.
//!
//! A [`TimeSeriesSink`] receives the path of a complete line protocol file.
//! [`InfluxCliSink`] hands it to the `influx write` command line tool;
//! [`NullSink`] accepts everything and is used for conversion-only runs.
//!
//! Sinks report [`Error::SinkUnavailable`] when they cannot even attempt a
//! delivery (no credentials, no executable). The pipeline treats that as a
//! skipped delivery, not as a failed conversion.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::config::InfluxConfig;
use crate::{Error, Result};

/// Credential file holding the server URL.
pub const HOST_FILE: &str = "influxdb2-localhost-url";
/// Credential file holding the organization.
pub const ORG_FILE: &str = "influxdb2-org";
/// Credential file holding the API token.
pub const TOKEN_FILE: &str = "influxdb2-admin-token";

/// Destination of encoded line protocol.
pub trait TimeSeriesSink: Send + Sync {
    /// Deliver the line protocol file at `line_file`.
    fn deliver(&self, line_file: &Path) -> Result<()>;
}

impl<S: TimeSeriesSink + ?Sized> TimeSeriesSink for &S {
    fn deliver(&self, line_file: &Path) -> Result<()> {
        (**self).deliver(line_file)
    }
}

impl<S: TimeSeriesSink + ?Sized> TimeSeriesSink for Box<S> {
    fn deliver(&self, line_file: &Path) -> Result<()> {
        (**self).deliver(line_file)
    }
}

impl<S: TimeSeriesSink + ?Sized> TimeSeriesSink for std::sync::Arc<S> {
    fn deliver(&self, line_file: &Path) -> Result<()> {
        (**self).deliver(line_file)
    }
}

/// A sink that accepts every file without sending it anywhere.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl TimeSeriesSink for NullSink {
    fn deliver(&self, line_file: &Path) -> Result<()> {
        tracing::debug!(file = %line_file.display(), "delivery disabled");
        Ok(())
    }
}

/// Resolved connection parameters.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Server URL
    pub host: String,
    /// Organization
    pub org: String,
    /// API token
    pub token: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("host", &self.host)
            .field("org", &self.org)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Writes line protocol with `influx write`.
///
/// The command run is
///
/// ```text
/// influx write --precision ms --format lp --host <host> --bucket <bucket>
///     --file <path> --org <org> --token <token>
/// ```
#[derive(Debug, Clone)]
pub struct InfluxCliSink {
    config: InfluxConfig,
}

impl InfluxCliSink {
    /// Create a sink from its configuration.
    pub fn new(config: InfluxConfig) -> Self {
        Self { config }
    }

    /// Get the configuration.
    pub fn config(&self) -> &InfluxConfig {
        &self.config
    }

    /// Resolve host, organization and token.
    ///
    /// Configured values win; otherwise the matching file in the credentials
    /// directory is read and trimmed.
    pub fn credentials(&self) -> Result<Credentials> {
        Ok(Credentials {
            host: self.resolve(self.config.host.as_deref(), HOST_FILE)?,
            org: self.resolve(self.config.org.as_deref(), ORG_FILE)?,
            token: self.resolve(self.config.token.as_deref(), TOKEN_FILE)?,
        })
    }

    fn resolve(&self, configured: Option<&str>, file: &str) -> Result<String> {
        if let Some(value) = configured.map(str::trim).filter(|v| !v.is_empty()) {
            return Ok(value.to_string());
        }
        let path = self.config.credentials_dir.join(file);
        match fs::read_to_string(&path) {
            Ok(content) if !content.trim().is_empty() => Ok(content.trim().to_string()),
            Ok(_) => Err(Error::SinkUnavailable(format!(
                "credential file {} is empty",
                path.display()
            ))),
            Err(e) => Err(Error::SinkUnavailable(format!(
                "cannot read credential file {}: {e}",
                path.display()
            ))),
        }
    }

    /// Build the `influx write` command for `line_file`.
    pub fn command(&self, line_file: &Path) -> Result<Command> {
        let credentials = self.credentials()?;
        let mut command = Command::new(&self.config.executable);
        command
            .arg("write")
            .args(["--precision", "ms", "--format", "lp"])
            .arg("--host")
            .arg(&credentials.host)
            .arg("--bucket")
            .arg(&self.config.bucket)
            .arg("--file")
            .arg(line_file)
            .arg("--org")
            .arg(&credentials.org)
            .arg("--token")
            .arg(&credentials.token);
        Ok(command)
    }

    fn executable(&self) -> &Path {
        &self.config.executable
    }
}

impl TimeSeriesSink for InfluxCliSink {
    fn deliver(&self, line_file: &Path) -> Result<()> {
        let mut command = self.command(line_file)?;
        let output = match command.output() {
            Ok(output) => output,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(Error::SinkUnavailable(format!(
                    "{} not found",
                    self.executable().display()
                )));
            }
            Err(e) => return Err(e.into()),
        };

        if !output.status.success() {
            return Err(Error::Delivery {
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        tracing::info!(
            file = %line_file.display(),
            bucket = %self.config.bucket,
            "line protocol delivered"
        );
        Ok(())
    }
}
