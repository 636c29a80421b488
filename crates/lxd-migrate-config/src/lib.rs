//! Shared configuration for the LXD data migration tool.
//!
//! Settings are layered by `ortho-config`: built-in defaults, then an optional
//! `lxd-migrate.toml` (or the file named by `--config-path` /
//! `LXD_MIGRATE_CONFIG_PATH`), then `LXD_MIGRATE_*` environment variables, and
//! finally command-line flags. Every field is optional on the wire; accessors
//! resolve the effective value against [`defaults`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

pub mod defaults;
mod logging;

pub use defaults::{
    DEFAULT_BRIDGE_CONFIG, DEFAULT_BRIDGE_DESTINATION, DEFAULT_DATABASE_PATH,
    DEFAULT_DESTINATION_DIR, DEFAULT_LOG_FILTER, DEFAULT_SOURCE_DIR, DEFAULT_WAIT_TIMEOUT_SECS,
};
pub use logging::{LogFormat, LogFormatParseError};

/// Effective configuration for a migration run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "LXD_MIGRATE")]
pub struct Config {
    /// `tracing` filter expression applied to diagnostic logs.
    pub log_filter: Option<String>,
    /// Output format for diagnostic logs.
    pub log_format: Option<LogFormat>,
    /// Data directory of the package-managed (source) daemon.
    pub source_dir: Option<PathBuf>,
    /// Data directory of the snap-managed (destination) daemon.
    pub destination_dir: Option<PathBuf>,
    /// Persistent location the destination database is relocated to.
    pub database_path: Option<PathBuf>,
    /// Legacy bridge configuration file written by the package install.
    pub bridge_config: Option<PathBuf>,
    /// Location the destination reads legacy bridge configuration from.
    pub bridge_destination: Option<PathBuf>,
    /// Upper bound, in seconds, for the destination to answer after a start.
    pub wait_timeout_secs: Option<u64>,
}

impl Config {
    /// Effective log filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        self.log_filter.as_deref().unwrap_or(DEFAULT_LOG_FILTER)
    }

    /// Effective log format.
    #[must_use]
    pub fn log_format(&self) -> LogFormat {
        self.log_format.unwrap_or_default()
    }

    /// Effective source data directory.
    #[must_use]
    pub fn source_dir(&self) -> &Path {
        path_or(self.source_dir.as_deref(), DEFAULT_SOURCE_DIR)
    }

    /// Effective destination data directory.
    #[must_use]
    pub fn destination_dir(&self) -> &Path {
        path_or(self.destination_dir.as_deref(), DEFAULT_DESTINATION_DIR)
    }

    /// Effective relocated database path.
    #[must_use]
    pub fn database_path(&self) -> &Path {
        path_or(self.database_path.as_deref(), DEFAULT_DATABASE_PATH)
    }

    /// Effective legacy bridge configuration path.
    #[must_use]
    pub fn bridge_config(&self) -> &Path {
        path_or(self.bridge_config.as_deref(), DEFAULT_BRIDGE_CONFIG)
    }

    /// Effective bridge configuration destination.
    #[must_use]
    pub fn bridge_destination(&self) -> &Path {
        path_or(self.bridge_destination.as_deref(), DEFAULT_BRIDGE_DESTINATION)
    }

    /// Effective readiness timeout.
    #[must_use]
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_secs.unwrap_or(DEFAULT_WAIT_TIMEOUT_SECS))
    }
}

fn path_or<'a>(value: Option<&'a Path>, fallback: &'static str) -> &'a Path {
    value.unwrap_or_else(|| Path::new(fallback))
}
