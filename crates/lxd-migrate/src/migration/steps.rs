//! States of a migration run and the actions that move between them.

use std::fmt;

/// A state the migration has reached. The driver records each one in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    Init,
    PreflightOk,
    Connected,
    SanityOk,
    ReportShown,
    Confirmed,
    SourceShutdown,
    SourceUnitsStopped,
    DestinationUnitsStopped,
    MountsCleaned,
    DestinationWiped,
    DataRelocated,
    DatabaseRelocated,
    DatabaseBackedUp,
    DatabaseOpened,
    StorageRewritten,
    NetworkRelocated,
    DestinationStarted,
    DestinationOnline,
    NetworkConverted,
    Reloaded,
    Verified,
    SourceRemoved,
    Done,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A collaborator call the driver performs.
///
/// Each action has the line narrated before it runs and the phrase used when
/// it fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    InspectSource,
    InspectDestination,
    ShutdownSource,
    StopSourceUnits,
    StopDestinationUnits,
    UnmountSource,
    UnmountDestination,
    WipeDestination,
    MoveData,
    MoveMountpoint,
    MoveDatabase,
    BackupDatabase,
    OpenDatabase,
    RewriteStorage,
    MoveBridgeConfiguration,
    StartDestination,
    WaitForDestination,
    ConvertNetwork,
    ReloadDestination,
    RefreshDestination,
    UninstallSource,
}

impl Action {
    /// Line printed after `=> ` before the action runs, if it is narrated.
    #[must_use]
    pub fn narration(self) -> Option<&'static str> {
        Some(match self {
            Self::InspectSource | Self::InspectDestination | Self::RefreshDestination => {
                return None;
            }
            Self::ShutdownSource => "Shutting down the source LXD",
            Self::StopSourceUnits => "Stopping the source LXD units",
            Self::StopDestinationUnits => "Stopping the destination LXD unit",
            Self::UnmountSource => "Unmounting source LXD paths",
            Self::UnmountDestination => "Unmounting destination LXD paths",
            Self::WipeDestination => "Wiping destination LXD clean",
            Self::MoveData => "Moving the data",
            Self::MoveMountpoint => "Moving the source LXD mountpoint",
            Self::MoveDatabase => "Moving the database",
            Self::BackupDatabase => "Backing up the database",
            Self::OpenDatabase => "Opening the database",
            Self::RewriteStorage => "Updating the storage backends",
            Self::MoveBridgeConfiguration => "Moving bridge configuration",
            Self::StartDestination => "Starting the destination LXD",
            Self::WaitForDestination => "Waiting for LXD to come online",
            Self::ConvertNetwork => "Converting the network configuration",
            Self::ReloadDestination => "Reloading LXD after network update",
            Self::UninstallSource => "Uninstalling the source LXD",
        })
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::InspectSource => "inspect the source LXD",
            Self::InspectDestination => "inspect the destination LXD",
            Self::ShutdownSource => "shutdown the source LXD",
            Self::StopSourceUnits => "stop the source LXD units",
            Self::StopDestinationUnits => "stop the destination LXD units",
            Self::UnmountSource => "unmount source LXD",
            Self::UnmountDestination => "unmount destination LXD",
            Self::WipeDestination => "wipe the destination LXD",
            Self::MoveData => "move the data",
            Self::MoveMountpoint => "move the mountpoint",
            Self::MoveDatabase => "move the database into place",
            Self::BackupDatabase => "backup the database",
            Self::OpenDatabase => "open the database",
            Self::RewriteStorage => "update the storage pools",
            Self::MoveBridgeConfiguration => "move the bridge configuration",
            Self::StartDestination => "start the destination LXD",
            Self::WaitForDestination => "wait for the destination LXD",
            Self::ConvertNetwork => "convert the network configuration",
            Self::ReloadDestination => "reload the destination LXD",
            Self::RefreshDestination => "update status of the destination LXD",
            Self::UninstallSource => "uninstall the source LXD",
        })
    }
}
