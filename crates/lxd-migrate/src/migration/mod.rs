//! The migration driver.
//!
//! [`Migration::run`] walks a fixed sequence: host preflight, connecting both
//! installations, the sanity gate, report and confirmation, then the
//! state-moving steps, restart, and verification. Every step narrates a
//! `=> ...` line on the operator stream before it runs and records the
//! [`Step`] it reaches once it succeeds. The first failure ends the run; no
//! step is undone.

mod error;
mod network;
mod steps;

use std::fmt::Display;
use std::io::Write;
use std::path::PathBuf;

use tracing::{error, info, warn};

use lxd_migrate_config::Config;

pub use error::{MigrationError, OperationError, PreconditionError};
pub use network::{BridgeTools, NetworkError, SystemBridge};
pub use steps::{Action, Step};

use crate::daemon::{
    Connector, Inspection, Installation, InstallationError, InstallationLayout, Inventory, Role,
};
use crate::database::{self, Database};
use crate::files::{self, FileError};
use crate::preflight::{self, HostProbe};
use crate::prompt::Confirm;
use crate::{report, sanity};

const MIGRATION_TARGET: &str = "lxd_migrate::migration";
const DATABASE_FILE: &str = "lxd.db";
const PROCEED_QUESTION: &str = "Are you ready to proceed (yes/no) [default=no]? ";
const UNINSTALL_QUESTION: &str = "Do you want to uninstall the old LXD (yes/no) [default=no]? ";
const EXPLANATION: &[&str] = &[
    "The migration process will shut down all your containers then move your data to the destination LXD.",
    "Once the data is moved, the destination LXD will start and apply any needed updates.",
    "And finally your containers will be brought back to their previous state, completing the migration.",
];

/// Everything the run needs to know about where state lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationLayout {
    pub source: InstallationLayout,
    pub destination: InstallationLayout,
    /// Persistent location the destination database is moved to.
    pub database_path: PathBuf,
    /// Legacy bridge configuration written by the source install.
    pub bridge_config: PathBuf,
    /// Where the destination reads legacy bridge configuration from.
    pub bridge_destination: PathBuf,
}

impl MigrationLayout {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            source: InstallationLayout::source(config),
            destination: InstallationLayout::destination(config),
            database_path: config.database_path().to_path_buf(),
            bridge_config: config.bridge_config().to_path_buf(),
            bridge_destination: config.bridge_destination().to_path_buf(),
        }
    }
}

/// Run-wide switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrationOptions {
    /// Accept every confirmation without asking.
    pub assume_yes: bool,
}

/// How a successful run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Data was moved and the destination verified.
    Migrated,
    /// The source had nothing to move.
    NothingToMigrate,
}

/// Host-side collaborators that are not tied to one installation.
pub struct Collaborators<'a> {
    pub host: &'a dyn HostProbe,
    pub bridge: &'a dyn BridgeTools,
    pub confirm: &'a mut dyn Confirm,
}

/// One migration run, writing operator narration to `W`.
pub struct Migration<'a, W> {
    layout: &'a MigrationLayout,
    options: MigrationOptions,
    collaborators: Collaborators<'a>,
    out: W,
    journal: Vec<Step>,
}

impl<'a, W: Write> Migration<'a, W> {
    pub fn new(
        layout: &'a MigrationLayout,
        options: MigrationOptions,
        collaborators: Collaborators<'a>,
        out: W,
    ) -> Self {
        Self {
            layout,
            options,
            collaborators,
            out,
            journal: Vec::new(),
        }
    }

    /// Steps reached so far, in order.
    #[must_use]
    pub fn journal(&self) -> &[Step] {
        &self.journal
    }

    /// Runs the migration to completion or to the first failure.
    pub fn run<C: Connector>(&mut self, connector: &C) -> Result<Outcome, MigrationError> {
        self.enter(Step::Init);
        preflight::validate(self.collaborators.host, &self.layout.source.packages)?;
        let source_path = &self.layout.source.data_path;
        let destination_path = &self.layout.destination.data_path;
        if source_path.starts_with(destination_path) || destination_path.starts_with(source_path) {
            return Err(PreconditionError::OverlappingPaths {
                source_path: source_path.clone(),
                destination_path: destination_path.clone(),
            }
            .into());
        }
        self.enter(Step::PreflightOk);

        self.say("=> Connecting to source server")?;
        let mut source = self.connect(connector, Role::Source)?;
        self.say("=> Connecting to destination server")?;
        let mut destination = self.connect(connector, Role::Destination)?;
        self.enter(Step::Connected);

        self.say("=> Running sanity checks")?;
        sanity::check_version_order(
            source.server_info().version(),
            destination.server_info().version(),
        )?;
        let source_inventory = inventory(&source, Action::InspectSource)?;
        if sanity::is_unused(&source_inventory) {
            self.enter(Step::SanityOk);
            self.say("The source server is empty, no migration needed.")?;
            self.finish(&mut source)?;
            return Ok(Outcome::NothingToMigrate);
        }
        let destination_inventory = inventory(&destination, Action::InspectDestination)?;
        if !sanity::is_unused(&destination_inventory) {
            return Err(PreconditionError::DestinationInUse {
                path: destination.data_path().to_path_buf(),
            }
            .into());
        }
        self.enter(Step::SanityOk);

        self.say("\n=== Source server")?;
        self.say(report::render(source.server_info(), &source_inventory).trim_end())?;
        self.say("\n=== Destination server")?;
        self.say(report::render(destination.server_info(), &destination_inventory).trim_end())?;
        self.enter(Step::ReportShown);

        self.say("")?;
        for line in EXPLANATION {
            self.say(line)?;
        }
        let mounted = source
            .is_mount_point()
            .map_err(|error| MigrationError::operation(Action::InspectSource, error))?;
        if mounted {
            self.say(format_args!(
                "\nWARNING: {} is a mountpoint. You will need to update that mount location after the migration.",
                source.data_path().display()
            ))?;
        }
        self.say("")?;
        if !self.options.assume_yes && !self.ask(PROCEED_QUESTION)? {
            return Err(MigrationError::UserAborted);
        }
        self.enter(Step::Confirmed);

        let legacy_source = source.networks().is_none();
        let legacy_destination = destination.networks().is_none();

        self.quiesce(&mut source, &mut destination)?;
        self.move_data(&mut source, &mut destination, mounted)?;
        self.move_database(&mut source, &destination)?;
        if legacy_source && legacy_destination {
            let layout = self.layout;
            let bridge = self.collaborators.bridge;
            self.perform(Action::MoveBridgeConfiguration, || relocate_bridge(bridge, layout))?;
            self.enter(Step::NetworkRelocated);
        }
        self.bring_up(&mut destination, legacy_source && !legacy_destination)?;
        self.verify(&mut destination)?;
        if mounted {
            self.say(format_args!(
                "\nWARNING: Make sure to update your system to mount your LXD directory at {}",
                destination.data_path().display()
            ))?;
        }

        self.finish(&mut source)?;
        Ok(Outcome::Migrated)
    }

    fn connect<C: Connector>(
        &self,
        connector: &C,
        role: Role,
    ) -> Result<C::Installation, MigrationError> {
        let layout = match role {
            Role::Source => &self.layout.source,
            Role::Destination => &self.layout.destination,
        };
        connector
            .connect(layout)
            .map_err(|source| MigrationError::Connection { role, source })
    }

    fn quiesce<S: Installation, D: Installation>(
        &mut self,
        source: &mut S,
        destination: &mut D,
    ) -> Result<(), MigrationError> {
        self.perform(Action::ShutdownSource, || source.shutdown())?;
        self.enter(Step::SourceShutdown);
        self.perform(Action::StopSourceUnits, || source.stop())?;
        self.enter(Step::SourceUnitsStopped);
        self.perform(Action::StopDestinationUnits, || destination.stop())?;
        self.enter(Step::DestinationUnitsStopped);
        self.perform(Action::UnmountSource, || source.clean_mounts())?;
        self.perform(Action::UnmountDestination, || destination.clean_mounts())?;
        self.enter(Step::MountsCleaned);
        Ok(())
    }

    fn move_data<S: Installation, D: Installation>(
        &mut self,
        source: &mut S,
        destination: &mut D,
        mounted: bool,
    ) -> Result<(), MigrationError> {
        self.perform(Action::WipeDestination, || destination.wipe())?;
        self.enter(Step::DestinationWiped);
        let target = destination.data_path().to_path_buf();
        if mounted {
            self.perform(Action::MoveMountpoint, || source.remount(&target))?;
        } else {
            self.perform(Action::MoveData, || source.move_files(&target))?;
        }
        self.enter(Step::DataRelocated);
        Ok(())
    }

    fn move_database<S: Installation, D: Installation>(
        &mut self,
        source: &mut S,
        destination: &D,
    ) -> Result<(), MigrationError> {
        let layout = self.layout;
        let link = destination.data_path().join(DATABASE_FILE);
        self.perform(Action::MoveDatabase, || {
            database::relocate(&link, &layout.database_path)
        })?;
        self.enter(Step::DatabaseRelocated);
        self.perform(Action::BackupDatabase, || database::backup(&layout.database_path))?;
        self.enter(Step::DatabaseBackedUp);
        let handle = self.perform(Action::OpenDatabase, || Database::open(&link))?;
        self.enter(Step::DatabaseOpened);
        let target = destination.data_path().to_path_buf();
        self.perform(Action::RewriteStorage, || source.rewrite_storage(&handle, &target))?;
        drop(handle);
        self.enter(Step::StorageRewritten);
        Ok(())
    }

    fn bring_up<D: Installation>(
        &mut self,
        destination: &mut D,
        convert_network: bool,
    ) -> Result<(), MigrationError> {
        self.perform(Action::StartDestination, || destination.start())?;
        self.enter(Step::DestinationStarted);
        self.perform(Action::WaitForDestination, || destination.wait())?;
        self.enter(Step::DestinationOnline);
        if !convert_network {
            return Ok(());
        }

        let bridge = self.collaborators.bridge;
        self.perform(Action::ConvertNetwork, || bridge.convert())?;
        self.enter(Step::NetworkConverted);
        self.perform(Action::ReloadDestination, || destination.reload())?;
        self.enter(Step::Reloaded);
        self.perform(Action::WaitForDestination, || destination.wait())?;
        self.enter(Step::DestinationOnline);
        Ok(())
    }

    fn verify<D: Installation>(&mut self, destination: &mut D) -> Result<(), MigrationError> {
        self.say("\n=== Destination server")?;
        self.perform(Action::RefreshDestination, || destination.update())?;
        let current = inventory(&*destination, Action::RefreshDestination)?;
        self.say(report::render(destination.server_info(), &current).trim_end())?;
        self.enter(Step::Verified);
        Ok(())
    }

    fn finish<S: Installation>(&mut self, source: &mut S) -> Result<(), MigrationError> {
        self.say("\nThe migration is now complete and your containers should be back online.")?;
        if self.options.assume_yes || self.ask(UNINSTALL_QUESTION)? {
            self.perform(Action::UninstallSource, || source.uninstall())?;
            self.enter(Step::SourceRemoved);
        }
        self.say(
            "\nAll done. You may need to close your current shell and open a new one to have the \"lxc\" command work.",
        )?;
        self.say(
            "To migrate your existing client configuration, move ~/.config/lxc to ~/snap/lxd/current/.config/lxc",
        )?;
        self.enter(Step::Done);
        Ok(())
    }

    fn perform<T, E, F>(&mut self, action: Action, operation: F) -> Result<T, MigrationError>
    where
        E: Into<OperationError>,
        F: FnOnce() -> Result<T, E>,
    {
        if let Some(narration) = action.narration() {
            self.say(format_args!("=> {narration}"))?;
        }
        info!(target: MIGRATION_TARGET, event = "action_started", action = ?action, "running");
        operation().map_err(|cause| {
            let failure = MigrationError::operation(action, cause);
            error!(
                target: MIGRATION_TARGET,
                event = "action_failed",
                action = ?action,
                error = %failure,
                "action failed"
            );
            failure
        })
    }

    fn enter(&mut self, step: Step) {
        info!(target: MIGRATION_TARGET, event = "step_reached", step = %step, "step reached");
        self.journal.push(step);
    }

    fn ask(&mut self, question: &str) -> Result<bool, MigrationError> {
        self.collaborators
            .confirm
            .confirm(&mut self.out, question)
            .map_err(MigrationError::Output)
    }

    fn say(&mut self, line: impl Display) -> Result<(), MigrationError> {
        writeln!(self.out, "{line}").map_err(MigrationError::Output)
    }
}

fn inventory<I: Inspection>(installation: &I, action: Action) -> Result<Inventory, MigrationError> {
    installation
        .inventory()
        .map_err(|error: InstallationError| MigrationError::operation(action, error))
}

/// Stops the legacy bridge (best effort) and moves its configuration across.
fn relocate_bridge(bridge: &dyn BridgeTools, layout: &MigrationLayout) -> Result<(), FileError> {
    if let Err(error) = bridge.stop_legacy_bridge() {
        warn!(
            target: MIGRATION_TARGET,
            error = %error,
            "failed to stop the legacy bridge; continuing"
        );
    }
    if !layout.bridge_config.exists() {
        return Ok(());
    }
    if let Some(parent) = layout.bridge_destination.parent() {
        files::create_dir_all(parent)?;
    }
    files::move_path(&layout.bridge_config, &layout.bridge_destination)
}
