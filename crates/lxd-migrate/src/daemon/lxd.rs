use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::control::{ControlClient, ControlError, NETWORK_EXTENSION, STORAGE_EXTENSION};
use super::mounts;
use super::service::{ServiceManager, Systemd};
use super::storage::{self, StorageRewrite};
use super::{
    Inspection, InstallationError, InstallationLayout, Inventory, Lifecycle, Network, ServerInfo,
};
use crate::database::Database;
use crate::files;
use crate::packages::{Apt, PackageManager};

const POLL_INTERVAL: Duration = Duration::from_millis(500);
const DAEMON_TARGET: &str = "lxd_migrate::daemon";

/// A daemon reachable over its control socket.
#[derive(Debug)]
pub struct LxdDaemon<S = Systemd, P = Apt> {
    layout: InstallationLayout,
    client: ControlClient,
    info: ServerInfo,
    networks: Option<Vec<Network>>,
    services: S,
    packages: P,
}

impl LxdDaemon {
    /// Connects using systemd and apt as host collaborators.
    pub fn connect(layout: InstallationLayout) -> Result<Self, ControlError> {
        Self::connect_with(layout, Systemd, Apt)
    }
}

impl<S: ServiceManager, P: PackageManager> LxdDaemon<S, P> {
    /// Connects and captures the server description and networks.
    pub fn connect_with(
        layout: InstallationLayout,
        services: S,
        packages: P,
    ) -> Result<Self, ControlError> {
        let client = ControlClient::new(layout.socket_path());
        let (info, networks) = describe(&client)?;
        info!(
            target: DAEMON_TARGET,
            path = %layout.data_path.display(),
            version = %info.version(),
            "connected"
        );
        Ok(Self {
            layout,
            client,
            info,
            networks,
            services,
            packages,
        })
    }
}

fn describe(client: &ControlClient) -> Result<(ServerInfo, Option<Vec<Network>>), ControlError> {
    let info = client.server_info()?;
    let networks = if info.has_extension(NETWORK_EXTENSION) {
        Some(client.networks()?)
    } else {
        None
    };
    Ok((info, networks))
}

impl<S: ServiceManager, P: PackageManager> Inspection for LxdDaemon<S, P> {
    fn data_path(&self) -> &Path {
        &self.layout.data_path
    }

    fn server_info(&self) -> &ServerInfo {
        &self.info
    }

    fn networks(&self) -> Option<&[Network]> {
        self.networks.as_deref()
    }

    fn is_mount_point(&self) -> Result<bool, InstallationError> {
        Ok(mounts::is_mount_point(&self.layout.data_path)?)
    }

    fn inventory(&self) -> Result<Inventory, InstallationError> {
        let storage_pools = if self.info.has_extension(STORAGE_EXTENSION) {
            self.client.storage_pools()?
        } else {
            Vec::new()
        };
        Ok(Inventory {
            containers: self.client.containers()?,
            images: self.client.images()?,
            profiles: self.client.profiles()?,
            storage_pools,
            networks: self.networks.clone(),
        })
    }
}

impl<S: ServiceManager, P: PackageManager> Lifecycle for LxdDaemon<S, P> {
    fn shutdown(&mut self) -> Result<(), InstallationError> {
        Ok(self.client.shutdown()?)
    }

    fn stop(&mut self) -> Result<(), InstallationError> {
        for unit in &self.layout.units {
            self.services.stop(unit)?;
        }
        Ok(())
    }

    fn clean_mounts(&mut self) -> Result<(), InstallationError> {
        let count = mounts::unmount_below(&self.layout.data_path)?;
        debug!(target: DAEMON_TARGET, count, "cleaned leftover mounts");
        Ok(())
    }

    fn wipe(&mut self) -> Result<(), InstallationError> {
        Ok(files::wipe_contents(&self.layout.data_path)?)
    }

    fn move_files(&mut self, target: &Path) -> Result<(), InstallationError> {
        Ok(files::move_contents(&self.layout.data_path, target)?)
    }

    fn remount(&mut self, target: &Path) -> Result<(), InstallationError> {
        Ok(mounts::move_mount(&self.layout.data_path, target)?)
    }

    fn rewrite_storage(
        &mut self,
        database: &Database,
        target: &Path,
    ) -> Result<StorageRewrite, InstallationError> {
        let rewrite = storage::rewrite(database, &self.layout.data_path, target)?;
        info!(
            target: DAEMON_TARGET,
            pool_sources = rewrite.pool_sources,
            links = rewrite.links,
            "rewrote storage paths"
        );
        Ok(rewrite)
    }

    fn start(&mut self) -> Result<(), InstallationError> {
        Ok(self.services.start(&self.layout.service_unit)?)
    }

    fn reload(&mut self) -> Result<(), InstallationError> {
        Ok(self.services.reload(&self.layout.service_unit)?)
    }

    fn wait(&mut self) -> Result<(), InstallationError> {
        let timeout = self.layout.wait_timeout;
        let deadline = Instant::now().checked_add(timeout);
        loop {
            match self.client.server_info() {
                Ok(_) => return Ok(()),
                Err(error) => {
                    debug!(target: DAEMON_TARGET, error = %error, "daemon not ready yet");
                }
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                warn!(
                    target: DAEMON_TARGET,
                    socket = %self.client.socket().display(),
                    "daemon did not come online"
                );
                return Err(InstallationError::StartupTimeout {
                    socket: self.client.socket().to_path_buf(),
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                });
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    fn update(&mut self) -> Result<(), InstallationError> {
        let (info, networks) = describe(&self.client)?;
        self.info = info;
        self.networks = networks;
        Ok(())
    }

    fn uninstall(&mut self) -> Result<(), InstallationError> {
        self.packages.purge(&self.layout.packages)?;
        files::remove_path(&self.layout.data_path)?;
        info!(
            target: DAEMON_TARGET,
            path = %self.layout.data_path.display(),
            "uninstalled"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::{MockServiceManager, ServiceError};
    use crate::packages::PackageError;
    use mockall::predicate::eq;
    use std::io::{Read, Write};
    use std::os::unix::net::UnixListener;
    use std::path::PathBuf;

    struct NoPackages;

    impl PackageManager for NoPackages {
        fn removal_set(&self, _package: &str) -> Result<Vec<String>, PackageError> {
            Ok(Vec::new())
        }

        fn purge(&self, _packages: &[String]) -> Result<(), PackageError> {
            Ok(())
        }
    }

    fn daemon(
        services: MockServiceManager,
        data_path: PathBuf,
    ) -> LxdDaemon<MockServiceManager, NoPackages> {
        let layout = InstallationLayout {
            data_path,
            units: vec!["lxd.socket".to_owned(), "lxd.service".to_owned()],
            service_unit: "lxd.service".to_owned(),
            packages: vec!["lxd".to_owned()],
            wait_timeout: Duration::from_millis(10),
        };
        LxdDaemon {
            client: ControlClient::new(layout.socket_path()),
            layout,
            info: ServerInfo::default(),
            networks: None,
            services,
            packages: NoPackages,
        }
    }

    #[test]
    fn stop_walks_every_unit_in_order() {
        let mut services = MockServiceManager::new();
        let mut sequence = mockall::Sequence::new();
        services
            .expect_stop()
            .with(eq("lxd.socket"))
            .times(1)
            .in_sequence(&mut sequence)
            .returning(|_| Ok(()));
        services
            .expect_stop()
            .with(eq("lxd.service"))
            .times(1)
            .in_sequence(&mut sequence)
            .returning(|_| Ok(()));

        daemon(services, PathBuf::from("/srv/lxd")).stop().expect("stop");
    }

    #[test]
    fn stop_propagates_service_failures() {
        let mut services = MockServiceManager::new();
        services.expect_stop().times(1).returning(|unit| {
            Err(ServiceError::Failed {
                action: "stop",
                unit: unit.to_owned(),
                status: Some(1),
                message: "denied".to_owned(),
            })
        });

        let error = daemon(services, PathBuf::from("/srv/lxd"))
            .stop()
            .expect_err("stop fails");
        assert!(matches!(error, InstallationError::Service(_)));
    }

    #[test]
    fn start_and_reload_target_the_service_unit() {
        let mut services = MockServiceManager::new();
        services
            .expect_start()
            .with(eq("lxd.service"))
            .times(1)
            .returning(|_| Ok(()));
        services
            .expect_reload()
            .with(eq("lxd.service"))
            .times(1)
            .returning(|_| Ok(()));

        let mut daemon = daemon(services, PathBuf::from("/srv/lxd"));
        daemon.start().expect("start");
        daemon.reload().expect("reload");
    }

    #[test]
    fn wait_times_out_without_a_listener() {
        let dir = tempfile::TempDir::new().expect("temp dir");
        let mut daemon = daemon(MockServiceManager::new(), dir.path().to_path_buf());

        let error = daemon.wait().expect_err("nothing is listening");

        assert!(matches!(
            error,
            InstallationError::StartupTimeout { timeout_ms: 10, .. }
        ));
    }

    fn answer_once(listener: UnixListener) -> thread::JoinHandle<()> {
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("accept");
            let mut request = Vec::<u8>::new();
            let mut buffer = [0_u8; 256];
            while !request.windows(4).any(|window| window == b"\r\n\r\n") {
                let read = stream.read(&mut buffer).expect("read request");
                assert!(read > 0, "request ended early");
                request.extend(buffer.iter().take(read));
            }
            stream
                .write_all(
                    b"HTTP/1.0 200 OK\r\n\r\n{\"type\":\"sync\",\"metadata\":{\"environment\":{\"server_version\":\"3.18.0\"}}}",
                )
                .expect("write response");
        })
    }

    #[test]
    fn unbounded_timeout_waits_without_overflowing() {
        let dir = tempfile::TempDir::new().expect("temp dir");
        let mut daemon = daemon(MockServiceManager::new(), dir.path().to_path_buf());
        daemon.layout.wait_timeout = Duration::from_secs(u64::MAX);
        let listener = UnixListener::bind(daemon.layout.socket_path()).expect("bind socket");
        let server = answer_once(listener);

        daemon.wait().expect("daemon answers");

        server.join().expect("server thread");
    }

    #[test]
    fn uninstall_removes_the_data_directory() {
        let dir = tempfile::TempDir::new().expect("temp dir");
        let data = dir.path().join("lxd");
        std::fs::create_dir_all(data.join("containers")).expect("data");

        daemon(MockServiceManager::new(), data.clone())
            .uninstall()
            .expect("uninstall");

        assert!(!data.exists());
    }
}
