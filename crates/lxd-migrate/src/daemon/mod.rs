//! Handles on the two daemon installations taking part in a migration.
//!
//! An installation is observed through [`Inspection`] and driven through
//! [`Lifecycle`]. The migration driver only depends on these traits; the
//! production implementation is [`LxdDaemon`], which talks to the daemon's
//! control socket, the init system, the mount table, and the package manager.

mod control;
mod lxd;
pub(crate) mod mounts;
mod service;
mod storage;

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use lxd_migrate_config::Config;

use crate::database::Database;
use crate::files::FileError;
use crate::packages::PackageError;

pub use control::{
    ControlClient, ControlError, NETWORK_EXTENSION, Network, STORAGE_EXTENSION, ServerEnvironment,
    ServerInfo, StoragePool,
};
pub use lxd::LxdDaemon;
pub use mounts::MountError;
#[cfg(test)]
pub(crate) use service::MockServiceManager;
pub use service::{ServiceError, ServiceManager, Systemd};
pub use storage::{StorageError, StorageRewrite};

const SOURCE_UNITS: &[&str] = &["lxd.socket", "lxd.service"];
const SOURCE_PACKAGES: &[&str] = &["lxd", "lxd-client"];
const DESTINATION_UNITS: &[&str] = &["snap.lxd.daemon.unix.socket", "snap.lxd.daemon.service"];
const CONTROL_SOCKET: &str = "unix.socket";

/// Which side of the migration an installation plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Source,
    Destination,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Source => "source",
            Self::Destination => "destination",
        })
    }
}

/// Where an installation keeps its state and how the host manages it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallationLayout {
    /// Data directory holding containers, images, and the database.
    pub data_path: PathBuf,
    /// Init-system units, in the order they are stopped.
    pub units: Vec<String>,
    /// Unit that is started and reloaded.
    pub service_unit: String,
    /// Distribution packages that make up this installation.
    pub packages: Vec<String>,
    /// Upper bound for the daemon to answer after a start.
    pub wait_timeout: Duration,
}

impl InstallationLayout {
    /// Layout of the distribution-packaged daemon.
    #[must_use]
    pub fn source(config: &Config) -> Self {
        Self {
            data_path: config.source_dir().to_path_buf(),
            units: owned(SOURCE_UNITS),
            service_unit: "lxd.service".to_owned(),
            packages: owned(SOURCE_PACKAGES),
            wait_timeout: config.wait_timeout(),
        }
    }

    /// Layout of the snap-packaged daemon.
    #[must_use]
    pub fn destination(config: &Config) -> Self {
        Self {
            data_path: config.destination_dir().to_path_buf(),
            units: owned(DESTINATION_UNITS),
            service_unit: "snap.lxd.daemon.service".to_owned(),
            packages: Vec::new(),
            wait_timeout: config.wait_timeout(),
        }
    }

    /// Control socket inside the data directory.
    #[must_use]
    pub fn socket_path(&self) -> PathBuf {
        self.data_path.join(CONTROL_SOCKET)
    }
}

fn owned(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| (*value).to_owned()).collect()
}

/// Resources an installation currently manages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inventory {
    pub containers: Vec<String>,
    pub images: Vec<String>,
    pub profiles: Vec<String>,
    pub storage_pools: Vec<StoragePool>,
    /// `None` when the daemon predates managed networks.
    pub networks: Option<Vec<Network>>,
}

impl Inventory {
    /// Networks the daemon created itself.
    pub fn managed_networks(&self) -> impl Iterator<Item = &Network> {
        self.networks.iter().flatten().filter(|network| network.managed)
    }
}

/// Errors raised by installation operations.
#[derive(Debug, Error)]
pub enum InstallationError {
    #[error(transparent)]
    Control(#[from] ControlError),
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error(transparent)]
    Mount(#[from] MountError),
    #[error(transparent)]
    Files(#[from] FileError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Package(#[from] PackageError),
    /// The daemon did not answer within the readiness window.
    #[error("LXD at {socket:?} did not come online within {timeout_ms}ms")]
    StartupTimeout { socket: PathBuf, timeout_ms: u64 },
}

/// Read-only view of an installation.
pub trait Inspection {
    /// Data directory of the installation.
    fn data_path(&self) -> &Path;

    /// Server description captured at connect time or by the last update.
    fn server_info(&self) -> &ServerInfo;

    /// Networks captured at connect time or by the last update; `None` when the
    /// daemon predates managed networks.
    fn networks(&self) -> Option<&[Network]>;

    /// Whether the data directory is itself a mount point.
    fn is_mount_point(&self) -> Result<bool, InstallationError>;

    /// Current resources of the installation.
    fn inventory(&self) -> Result<Inventory, InstallationError>;
}

/// State-changing operations on an installation.
pub trait Lifecycle {
    /// Asks the daemon to stop its containers and exit.
    fn shutdown(&mut self) -> Result<(), InstallationError>;

    /// Stops every unit of the installation.
    fn stop(&mut self) -> Result<(), InstallationError>;

    /// Unmounts leftover mounts below the data directory.
    fn clean_mounts(&mut self) -> Result<(), InstallationError>;

    /// Deletes everything inside the data directory.
    fn wipe(&mut self) -> Result<(), InstallationError>;

    /// Moves the contents of the data directory into `target`.
    fn move_files(&mut self, target: &Path) -> Result<(), InstallationError>;

    /// Moves the mount backing the data directory onto `target`.
    fn remount(&mut self, target: &Path) -> Result<(), InstallationError>;

    /// Rewrites storage paths recorded under this installation's data
    /// directory so they point into `target`.
    fn rewrite_storage(
        &mut self,
        database: &Database,
        target: &Path,
    ) -> Result<StorageRewrite, InstallationError>;

    /// Starts the daemon's service unit.
    fn start(&mut self) -> Result<(), InstallationError>;

    /// Reloads the daemon's service unit.
    fn reload(&mut self) -> Result<(), InstallationError>;

    /// Blocks until the daemon answers or the readiness window elapses.
    fn wait(&mut self) -> Result<(), InstallationError>;

    /// Refreshes the captured server description and networks.
    fn update(&mut self) -> Result<(), InstallationError>;

    /// Removes the installation's packages and data.
    fn uninstall(&mut self) -> Result<(), InstallationError>;
}

/// An installation the migration can both inspect and drive.
pub trait Installation: Inspection + Lifecycle {}

impl<T: Inspection + Lifecycle> Installation for T {}

/// Establishes connections to installations.
pub trait Connector {
    /// Installation handle produced by a successful connection.
    type Installation: Installation;

    /// Connects to the daemon described by `layout`.
    fn connect(&self, layout: &InstallationLayout) -> Result<Self::Installation, ControlError>;
}

/// Connects to real daemons managed by systemd and apt.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemConnector;

impl Connector for SystemConnector {
    type Installation = LxdDaemon;

    fn connect(&self, layout: &InstallationLayout) -> Result<Self::Installation, ControlError> {
        LxdDaemon::connect(layout.clone())
    }
}
