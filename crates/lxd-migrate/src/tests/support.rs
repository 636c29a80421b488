//! Test support for driving full migrations against fake installations.
//!
//! The fakes keep their data directories in a temporary directory and perform
//! the real file and database work there, while recording every lifecycle call
//! in a shared [`Recorder`] so tests can assert on ordering.

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;

use anyhow::{Context, Result};
use rstest::fixture;
use rusqlite::{Connection, params};
use tempfile::TempDir;

use crate::daemon::{
    Connector, ControlError, Inspection, InstallationError, InstallationLayout, Inventory,
    Lifecycle, Network, Role, ServerEnvironment, ServerInfo, ServiceError, StorageError,
    StoragePool, StorageRewrite,
};
use crate::database::{self, Database};
use crate::files;
use crate::migration::{
    BridgeTools, Collaborators, Migration, MigrationError, MigrationLayout, MigrationOptions,
    NetworkError, Outcome, Step,
};
use crate::packages::PackageError;
use crate::preflight::HostProbe;
use crate::prompt::Confirm;

pub(crate) const SOURCE_VERSION: &str = "3.0.1";
pub(crate) const DESTINATION_VERSION: &str = "3.18.0";
const FAKE_TIMEOUT: Duration = Duration::from_millis(10);

/// Observations shared between the fakes of one run.
#[derive(Debug, Default)]
pub(crate) struct Recorder {
    pub calls: Vec<String>,
    /// Whether the backup matched the live database when the rewrite began.
    pub backup_identical: Option<bool>,
}

pub(crate) type Shared = Rc<RefCell<Recorder>>;

pub(crate) fn server(version: &str) -> ServerInfo {
    ServerInfo {
        api_extensions: vec!["storage".to_owned(), "network".to_owned()],
        environment: ServerEnvironment {
            server_version: version.to_owned(),
            server_pid: Some(42),
            storage: String::new(),
        },
    }
}

pub(crate) fn bridge_network() -> Network {
    Network {
        name: "lxdbr0".to_owned(),
        managed: true,
        kind: "bridge".to_owned(),
    }
}

pub(crate) fn populated_inventory() -> Inventory {
    Inventory {
        containers: vec!["c1".to_owned()],
        images: vec!["abc123".to_owned()],
        profiles: vec!["default".to_owned()],
        storage_pools: vec![StoragePool {
            name: "default".to_owned(),
            driver: "dir".to_owned(),
            config: BTreeMap::new(),
        }],
        networks: Some(vec![bridge_network()]),
    }
}

pub(crate) fn unused_inventory() -> Inventory {
    Inventory {
        profiles: vec!["default".to_owned()],
        networks: Some(Vec::new()),
        ..Inventory::default()
    }
}

/// Installation double backed by a real directory.
#[derive(Debug, Clone)]
pub(crate) struct FakeInstallation {
    pub role: Role,
    pub data_path: PathBuf,
    pub database_path: PathBuf,
    pub info: ServerInfo,
    pub inventory: Inventory,
    /// Inventory reported after the next `update`.
    pub refreshed: Option<Inventory>,
    pub mounted: bool,
    pub wait_times_out: bool,
    /// Lifecycle operation that fails when called.
    pub fail_on: Option<&'static str>,
    pub recorder: Shared,
}

impl FakeInstallation {
    fn record(&self, operation: &'static str) -> Result<(), InstallationError> {
        self.recorder
            .borrow_mut()
            .calls
            .push(format!("{}.{operation}", self.role));
        if self.fail_on == Some(operation) {
            return Err(ServiceError::Failed {
                action: operation,
                unit: format!("{}.service", self.role),
                status: Some(1),
                message: "injected failure".to_owned(),
            }
            .into());
        }
        Ok(())
    }
}

impl Inspection for FakeInstallation {
    fn data_path(&self) -> &Path {
        &self.data_path
    }

    fn server_info(&self) -> &ServerInfo {
        &self.info
    }

    fn networks(&self) -> Option<&[Network]> {
        self.inventory.networks.as_deref()
    }

    fn is_mount_point(&self) -> Result<bool, InstallationError> {
        Ok(self.mounted)
    }

    fn inventory(&self) -> Result<Inventory, InstallationError> {
        Ok(self.inventory.clone())
    }
}

impl Lifecycle for FakeInstallation {
    fn shutdown(&mut self) -> Result<(), InstallationError> {
        self.record("shutdown")
    }

    fn stop(&mut self) -> Result<(), InstallationError> {
        self.record("stop")
    }

    fn clean_mounts(&mut self) -> Result<(), InstallationError> {
        self.record("clean_mounts")
    }

    fn wipe(&mut self) -> Result<(), InstallationError> {
        self.record("wipe")?;
        files::wipe_contents(&self.data_path)?;
        Ok(())
    }

    fn move_files(&mut self, target: &Path) -> Result<(), InstallationError> {
        self.record("move_files")?;
        files::move_contents(&self.data_path, target)?;
        Ok(())
    }

    fn remount(&mut self, target: &Path) -> Result<(), InstallationError> {
        self.record("remount")?;
        files::move_contents(&self.data_path, target)?;
        Ok(())
    }

    fn rewrite_storage(
        &mut self,
        database: &Database,
        target: &Path,
    ) -> Result<StorageRewrite, InstallationError> {
        self.record("rewrite_storage")?;
        let live = fs::read(&self.database_path).ok();
        let backup = fs::read(database::backup_path(&self.database_path)).ok();
        self.recorder.borrow_mut().backup_identical = Some(live.is_some() && live == backup);

        let pool_sources = database
            .rewrite_pool_sources(&self.data_path, target)
            .map_err(StorageError::from)?;
        Ok(StorageRewrite {
            pool_sources,
            links: 0,
        })
    }

    fn start(&mut self) -> Result<(), InstallationError> {
        self.record("start")
    }

    fn reload(&mut self) -> Result<(), InstallationError> {
        self.record("reload")
    }

    fn wait(&mut self) -> Result<(), InstallationError> {
        self.record("wait")?;
        if self.wait_times_out {
            return Err(InstallationError::StartupTimeout {
                socket: self.data_path.join("unix.socket"),
                timeout_ms: 10,
            });
        }
        Ok(())
    }

    fn update(&mut self) -> Result<(), InstallationError> {
        self.record("update")?;
        if let Some(next) = self.refreshed.take() {
            self.inventory = next;
        }
        Ok(())
    }

    fn uninstall(&mut self) -> Result<(), InstallationError> {
        self.record("uninstall")?;
        files::remove_path(&self.data_path)?;
        Ok(())
    }
}

/// Hands out each installation once, matched by data directory.
pub(crate) struct FakeConnector {
    slots: Vec<RefCell<Option<FakeInstallation>>>,
}

impl FakeConnector {
    pub(crate) fn new(installations: impl IntoIterator<Item = FakeInstallation>) -> Self {
        Self {
            slots: installations
                .into_iter()
                .map(|installation| RefCell::new(Some(installation)))
                .collect(),
        }
    }
}

impl Connector for FakeConnector {
    type Installation = FakeInstallation;

    fn connect(&self, layout: &InstallationLayout) -> Result<FakeInstallation, ControlError> {
        for slot in &self.slots {
            let matches = slot
                .borrow()
                .as_ref()
                .is_some_and(|installation| installation.data_path == layout.data_path);
            if let Some(installation) = matches.then(|| slot.borrow_mut().take()).flatten() {
                return Ok(installation);
            }
        }
        Err(ControlError::Connect {
            socket: layout.socket_path(),
            source: io::Error::from(io::ErrorKind::NotFound),
        })
    }
}

#[derive(Debug, Clone)]
pub(crate) struct FakeHost {
    pub uid: u32,
    pub distribution: Option<String>,
}

impl Default for FakeHost {
    fn default() -> Self {
        Self {
            uid: 0,
            distribution: Some("ubuntu".to_owned()),
        }
    }
}

impl HostProbe for FakeHost {
    fn effective_uid(&self) -> u32 {
        self.uid
    }

    fn distribution(&self) -> Option<String> {
        self.distribution.clone()
    }

    fn removal_set(&self, package: &str) -> Result<Vec<String>, PackageError> {
        Ok(vec![package.to_owned()])
    }
}

#[derive(Debug)]
pub(crate) struct FakeBridge {
    pub fail_stop: bool,
    pub fail_conversion: bool,
    pub recorder: Shared,
}

impl BridgeTools for FakeBridge {
    fn stop_legacy_bridge(&self) -> Result<(), ServiceError> {
        self.recorder
            .borrow_mut()
            .calls
            .push("bridge.stop_legacy".to_owned());
        if self.fail_stop {
            return Err(ServiceError::Failed {
                action: "stop",
                unit: "lxd-bridge".to_owned(),
                status: Some(5),
                message: "Unit lxd-bridge.service not loaded.".to_owned(),
            });
        }
        Ok(())
    }

    fn convert(&self) -> Result<(), NetworkError> {
        self.recorder
            .borrow_mut()
            .calls
            .push("bridge.convert".to_owned());
        if self.fail_conversion {
            return Err(NetworkError::Failed {
                binary: "upgrade-bridge",
                status: Some(1),
                message: "no bridge".to_owned(),
            });
        }
        Ok(())
    }
}

/// Answers confirmations from a fixed script, then declines.
#[derive(Debug, Default)]
pub(crate) struct ScriptedConfirm {
    answers: VecDeque<bool>,
    pub questions: Vec<String>,
}

impl ScriptedConfirm {
    pub(crate) fn new(answers: impl IntoIterator<Item = bool>) -> Self {
        Self {
            answers: answers.into_iter().collect(),
            questions: Vec::new(),
        }
    }
}

impl Confirm for ScriptedConfirm {
    fn confirm(&mut self, out: &mut dyn Write, question: &str) -> io::Result<bool> {
        writeln!(out, "{question}")?;
        self.questions.push(question.to_owned());
        Ok(self.answers.pop_front().unwrap_or(false))
    }
}

/// A prepared pair of installations in a temporary directory.
pub(crate) struct Harness {
    pub dir: TempDir,
    pub layout: MigrationLayout,
    pub options: MigrationOptions,
    pub recorder: Shared,
    pub source: FakeInstallation,
    pub destination: FakeInstallation,
    pub host: FakeHost,
    pub fail_bridge_stop: bool,
    pub fail_conversion: bool,
    pub answers: Vec<bool>,
    /// Installation the connector refuses to hand out.
    pub unreachable: Option<Role>,
    pub output: String,
    pub journal: Vec<Step>,
    pub questions: Vec<String>,
}

impl Harness {
    /// Seeds a populated source and a fresh destination.
    pub(crate) fn new() -> Result<Self> {
        let dir = tempfile::tempdir().context("create temporary directory")?;
        let source_dir = dir.path().join("lib/lxd");
        let destination_dir = dir.path().join("snap/common/lxd");
        let database_path = dir.path().join("snap/current/lxd/lxd.db");

        fs::create_dir_all(source_dir.join("containers/c1/rootfs"))?;
        fs::write(source_dir.join("containers/c1/rootfs/hostname"), "c1\n")?;
        seed_database(&source_dir.join("lxd.db"), &source_dir.join("disks/default.img"))?;
        fs::create_dir_all(&destination_dir)?;
        fs::write(destination_dir.join("stale"), "fresh snap state")?;
        fs::write(destination_dir.join("lxd.db"), "placeholder")?;
        let bridge_config = dir.path().join("etc/default/lxd-bridge");
        fs::create_dir_all(dir.path().join("etc/default"))?;
        fs::write(&bridge_config, "USE_LXD_BRIDGE=\"true\"\n")?;

        let layout = MigrationLayout {
            source: layout_for(&source_dir, "lxd.service", &["lxd", "lxd-client"]),
            destination: layout_for(&destination_dir, "snap.lxd.daemon.service", &[]),
            database_path: database_path.clone(),
            bridge_config,
            bridge_destination: dir.path().join("snap/common/lxd-bridge/config"),
        };
        let recorder = Shared::default();
        let source = FakeInstallation {
            role: Role::Source,
            data_path: source_dir,
            database_path: database_path.clone(),
            info: server(SOURCE_VERSION),
            inventory: populated_inventory(),
            refreshed: None,
            mounted: false,
            wait_times_out: false,
            fail_on: None,
            recorder: Rc::clone(&recorder),
        };
        let destination = FakeInstallation {
            role: Role::Destination,
            data_path: destination_dir,
            info: server(DESTINATION_VERSION),
            inventory: unused_inventory(),
            ..source.clone()
        };

        Ok(Self {
            dir,
            layout,
            options: MigrationOptions::default(),
            recorder,
            source,
            destination,
            host: FakeHost::default(),
            fail_bridge_stop: false,
            fail_conversion: false,
            answers: vec![true, false],
            unreachable: None,
            output: String::new(),
            journal: Vec::new(),
            questions: Vec::new(),
        })
    }

    /// Runs one migration, capturing output, journal, and questions asked.
    pub(crate) fn run(&mut self) -> Result<Outcome, MigrationError> {
        let mut destination = self.destination.clone();
        if destination.refreshed.is_none() {
            destination.refreshed = Some(self.source.inventory.clone());
        }
        let installations = [(Role::Source, self.source.clone()), (Role::Destination, destination)]
            .into_iter()
            .filter(|(role, _)| Some(*role) != self.unreachable)
            .map(|(_, installation)| installation);
        let connector = FakeConnector::new(installations);
        let bridge = FakeBridge {
            fail_stop: self.fail_bridge_stop,
            fail_conversion: self.fail_conversion,
            recorder: Rc::clone(&self.recorder),
        };
        let mut confirm = ScriptedConfirm::new(self.answers.clone());
        let mut output = Vec::new();

        let (result, journal) = {
            let collaborators = Collaborators {
                host: &self.host,
                bridge: &bridge,
                confirm: &mut confirm,
            };
            let mut migration =
                Migration::new(&self.layout, self.options, collaborators, &mut output);
            let result = migration.run(&connector);
            (result, migration.journal().to_vec())
        };

        self.output = String::from_utf8_lossy(&output).into_owned();
        self.journal = journal;
        self.questions = confirm.questions;
        result
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.recorder.borrow().calls.clone()
    }

    pub(crate) fn called(&self, call: &str) -> bool {
        self.position(call).is_some()
    }

    pub(crate) fn position(&self, call: &str) -> Option<usize> {
        self.recorder.borrow().calls.iter().position(|made| made == call)
    }

    /// Storage pool source recorded in the database at `path`.
    pub(crate) fn pool_source(&self, path: &Path) -> Result<String> {
        let connection = Connection::open(path)?;
        let value = connection.query_row(
            "SELECT value FROM storage_pools_config WHERE key = 'source'",
            [],
            |row| row.get(0),
        )?;
        Ok(value)
    }

    pub(crate) fn set_legacy_networks(&mut self, source: bool, destination: bool) {
        if source {
            self.source.inventory.networks = None;
        }
        if destination {
            self.destination.inventory.networks = None;
        }
    }
}

fn layout_for(data_path: &Path, service_unit: &str, packages: &[&str]) -> InstallationLayout {
    InstallationLayout {
        data_path: data_path.to_path_buf(),
        units: vec![service_unit.to_owned()],
        service_unit: service_unit.to_owned(),
        packages: packages.iter().map(|name| (*name).to_owned()).collect(),
        wait_timeout: FAKE_TIMEOUT,
    }
}

fn seed_database(path: &Path, pool_source: &Path) -> Result<()> {
    let connection = Connection::open(path)?;
    connection.execute_batch(
        "CREATE TABLE storage_pools_config (
             id INTEGER PRIMARY KEY,
             storage_pool_id INTEGER NOT NULL,
             key TEXT NOT NULL,
             value TEXT
         );",
    )?;
    connection.execute(
        "INSERT INTO storage_pools_config (storage_pool_id, key, value) VALUES (1, 'source', ?1)",
        params![pool_source.to_string_lossy()],
    )?;
    Ok(())
}

/// State shared by behavioural steps.
#[derive(Default)]
pub(crate) struct TestWorld {
    pub harness: Option<Harness>,
    pub result: Option<Result<Outcome, MigrationError>>,
}

impl TestWorld {
    pub(crate) fn harness(&mut self) -> &mut Harness {
        self.harness
            .get_or_insert_with(|| Harness::new().expect("prepare migration harness"))
    }

    pub(crate) fn run(&mut self) {
        let result = self.harness().run();
        self.result = Some(result);
    }

    pub(crate) fn error(&self) -> &MigrationError {
        match &self.result {
            Some(Err(error)) => error,
            Some(Ok(outcome)) => panic!("migration unexpectedly succeeded: {outcome:?}"),
            None => panic!("migration has not run"),
        }
    }

    pub(crate) fn outcome(&self) -> Outcome {
        match &self.result {
            Some(Ok(outcome)) => *outcome,
            Some(Err(error)) => panic!("migration failed: {error}"),
            None => panic!("migration has not run"),
        }
    }
}

#[fixture]
pub(crate) fn world() -> RefCell<TestWorld> {
    RefCell::new(TestWorld::default())
}
