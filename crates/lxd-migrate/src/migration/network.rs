//! Legacy bridge handling between package and snap networking.

use std::io;
use std::process::Command;

use thiserror::Error;

use crate::daemon::{ServiceError, ServiceManager, Systemd};

const LEGACY_BRIDGE_UNIT: &str = "lxd-bridge";
const UPGRADE_BRIDGE_BINARY: &str = "upgrade-bridge";

/// Host operations on the pre-network-API bridge.
pub trait BridgeTools {
    /// Stops the legacy bridge service.
    ///
    /// # Errors
    ///
    /// Returns an error if the init system refuses the request.
    fn stop_legacy_bridge(&self) -> Result<(), ServiceError>;

    /// Converts legacy bridge configuration into a managed network.
    ///
    /// # Errors
    ///
    /// Returns an error if the conversion tool fails.
    fn convert(&self) -> Result<(), NetworkError>;
}

/// Errors raised while converting network configuration.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("failed to spawn {binary}: {source}")]
    Spawn {
        binary: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("{binary} exited with status {status:?}: {message}")]
    Failed {
        binary: &'static str,
        status: Option<i32>,
        message: String,
    },
}

/// Bridge tools backed by systemd and the snap's `upgrade-bridge` helper.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemBridge<S = Systemd> {
    services: S,
}

impl SystemBridge {
    #[must_use]
    pub fn new() -> Self {
        Self { services: Systemd }
    }
}

impl<S: ServiceManager> BridgeTools for SystemBridge<S> {
    fn stop_legacy_bridge(&self) -> Result<(), ServiceError> {
        self.services.stop(LEGACY_BRIDGE_UNIT)
    }

    fn convert(&self) -> Result<(), NetworkError> {
        let output = Command::new(UPGRADE_BRIDGE_BINARY)
            .output()
            .map_err(|source| NetworkError::Spawn {
                binary: UPGRADE_BRIDGE_BINARY,
                source,
            })?;
        if output.status.success() {
            return Ok(());
        }
        Err(NetworkError::Failed {
            binary: UPGRADE_BRIDGE_BINARY,
            status: output.status.code(),
            message: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
        })
    }
}
