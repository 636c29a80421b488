use std::io;
use std::path::PathBuf;

use thiserror::Error;

use super::network::NetworkError;
use super::steps::Action;
use crate::daemon::{ControlError, InstallationError, Role};
use crate::database::DatabaseError;
use crate::files::FileError;
use crate::packages::PackageError;

/// Conditions that refuse a migration before anything is touched.
#[derive(Debug, Error)]
pub enum PreconditionError {
    #[error("This tool must be run as root.")]
    PermissionDenied { uid: u32 },
    #[error("Data migration is only supported on Ubuntu at this time (found {found}).")]
    UnsupportedHost { found: String },
    #[error("Removing {package} would also remove: {}", .dependents.join(", "))]
    DependencyConflict {
        package: String,
        dependents: Vec<String>,
    },
    #[error("failed to query packages depending on {package}: {source}")]
    PackageQuery {
        package: String,
        #[source]
        source: PackageError,
    },
    #[error("The source server is running a more recent version than the destination.")]
    VersionOrder {
        source_version: String,
        destination_version: String,
    },
    #[error("invalid version component '{component}' in '{version}'")]
    InvalidVersion { version: String, component: String },
    #[error("The destination LXD already has containers, images or other resources.")]
    DestinationInUse { path: PathBuf },
    #[error("source {source_path:?} and destination {destination_path:?} data directories overlap")]
    OverlappingPaths {
        source_path: PathBuf,
        destination_path: PathBuf,
    },
}

/// Failure of a collaborator while a step ran.
#[derive(Debug, Error)]
pub enum OperationError {
    #[error(transparent)]
    Installation(#[from] InstallationError),
    #[error(transparent)]
    Database(#[from] DatabaseError),
    #[error(transparent)]
    Files(#[from] FileError),
    #[error(transparent)]
    Network(#[from] NetworkError),
}

/// Terminal outcome of a failed migration run.
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error(transparent)]
    Precondition(#[from] PreconditionError),
    #[error("Unable to connect to the {role} LXD: {source}")]
    Connection {
        role: Role,
        #[source]
        source: ControlError,
    },
    #[error("Failed to {action}: {source}")]
    Operation {
        action: Action,
        #[source]
        source: OperationError,
    },
    #[error("LXD at {socket:?} did not come online within {timeout_ms}ms")]
    StartupTimeout { socket: PathBuf, timeout_ms: u64 },
    #[error("Aborted by the user")]
    UserAborted,
    #[error("failed to write to the terminal: {0}")]
    Output(#[source] io::Error),
}

impl MigrationError {
    /// Wraps a step failure, promoting readiness timeouts to their own variant.
    pub(crate) fn operation(action: Action, error: impl Into<OperationError>) -> Self {
        match error.into() {
            OperationError::Installation(InstallationError::StartupTimeout {
                socket,
                timeout_ms,
            }) => Self::StartupTimeout { socket, timeout_ms },
            source => Self::Operation { action, source },
        }
    }

    /// Action that was running when the error occurred, if any.
    #[must_use]
    pub fn action(&self) -> Option<Action> {
        match self {
            Self::Operation { action, .. } => Some(*action),
            _ => None,
        }
    }
}
