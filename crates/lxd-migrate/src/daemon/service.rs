//! Init-system control of daemon units.

use std::io;
use std::process::Command;

use thiserror::Error;
use tracing::debug;

const SYSTEMCTL_BINARY: &str = "systemctl";
const SERVICE_TARGET: &str = "lxd_migrate::service";
/// `systemctl` exit status for a unit that is not loaded.
const UNIT_NOT_LOADED: i32 = 5;

/// Service manager abstraction used to keep behaviour deterministic in tests.
#[cfg_attr(test, mockall::automock)]
pub trait ServiceManager {
    /// Starts `unit`.
    ///
    /// # Errors
    ///
    /// Returns an error if the init system refuses the request.
    fn start(&self, unit: &str) -> Result<(), ServiceError>;

    /// Stops `unit`. Units that are not loaded count as stopped.
    ///
    /// # Errors
    ///
    /// Returns an error if the init system refuses the request.
    fn stop(&self, unit: &str) -> Result<(), ServiceError>;

    /// Reloads `unit`.
    ///
    /// # Errors
    ///
    /// Returns an error if the init system refuses the request.
    fn reload(&self, unit: &str) -> Result<(), ServiceError>;
}

/// Service manager backed by `systemctl`.
#[derive(Debug, Default, Clone, Copy)]
pub struct Systemd;

impl Systemd {
    fn control(self, action: &'static str, unit: &str) -> Result<(), ServiceError> {
        debug!(target: SERVICE_TARGET, action, unit, "invoking systemctl");
        let output = Command::new(SYSTEMCTL_BINARY)
            .arg(action)
            .arg(unit)
            .output()
            .map_err(|source| ServiceError::Spawn {
                action,
                unit: unit.to_owned(),
                source,
            })?;
        if output.status.success() {
            return Ok(());
        }
        Err(ServiceError::Failed {
            action,
            unit: unit.to_owned(),
            status: output.status.code(),
            message: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
        })
    }
}

impl ServiceManager for Systemd {
    fn start(&self, unit: &str) -> Result<(), ServiceError> {
        self.control("start", unit)
    }

    fn stop(&self, unit: &str) -> Result<(), ServiceError> {
        match self.control("stop", unit) {
            Err(error) if error.is_unit_not_loaded() => {
                debug!(target: SERVICE_TARGET, unit, "unit not loaded; treating as stopped");
                Ok(())
            }
            other => other,
        }
    }

    fn reload(&self, unit: &str) -> Result<(), ServiceError> {
        self.control("reload", unit)
    }
}

/// Errors raised by service manager implementations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Spawning the init system client failed.
    #[error("failed to run systemctl {action} {unit}: {source}")]
    Spawn {
        /// Requested action.
        action: &'static str,
        /// Unit the action applied to.
        unit: String,
        /// Underlying process spawn error.
        #[source]
        source: io::Error,
    },
    /// The init system rejected the request.
    #[error("systemctl {action} {unit} exited with status {status:?}: {message}")]
    Failed {
        /// Requested action.
        action: &'static str,
        /// Unit the action applied to.
        unit: String,
        /// Exit status, if the process was not killed by a signal.
        status: Option<i32>,
        /// Error message captured from stderr.
        message: String,
    },
}

impl ServiceError {
    /// Whether the failure only reports that the unit does not exist.
    #[must_use]
    pub fn is_unit_not_loaded(&self) -> bool {
        matches!(
            self,
            Self::Failed {
                status: Some(UNIT_NOT_LOADED),
                ..
            }
        )
    }
}
