//! Host checks performed before either daemon is contacted.

use std::fs;

use nix::unistd::geteuid;
use tracing::debug;

use crate::migration::PreconditionError;
use crate::packages::{Apt, PackageError, PackageManager};

const OS_RELEASE_PATH: &str = "/etc/os-release";
const SUPPORTED_DISTRIBUTION: &str = "ubuntu";
const PREFLIGHT_TARGET: &str = "lxd_migrate::preflight";

/// Facts about the host the migration runs on.
pub trait HostProbe {
    /// Effective user id of the running process.
    fn effective_uid(&self) -> u32;

    /// `ID` field of the host's os-release file, if readable.
    fn distribution(&self) -> Option<String>;

    /// Packages a removal of `package` would take with it.
    ///
    /// # Errors
    ///
    /// Returns an error if the package manager cannot simulate the removal.
    fn removal_set(&self, package: &str) -> Result<Vec<String>, PackageError>;
}

/// Probe of the machine the binary runs on.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemHost<P = Apt> {
    packages: P,
}

impl SystemHost {
    /// Probe that simulates removals with `apt-get`.
    #[must_use]
    pub fn new() -> Self {
        Self { packages: Apt }
    }
}

impl<P: PackageManager> HostProbe for SystemHost<P> {
    fn effective_uid(&self) -> u32 {
        geteuid().as_raw()
    }

    fn distribution(&self) -> Option<String> {
        let contents = fs::read_to_string(OS_RELEASE_PATH).ok()?;
        parse_os_release_id(&contents)
    }

    fn removal_set(&self, package: &str) -> Result<Vec<String>, PackageError> {
        self.packages.removal_set(package)
    }
}

/// Refuses hosts the migration cannot safely run on.
///
/// Checks run in order: privilege, distribution, then reverse dependencies of
/// every package in `packages`.
pub fn validate(host: &dyn HostProbe, packages: &[String]) -> Result<(), PreconditionError> {
    let uid = host.effective_uid();
    if uid != 0 {
        return Err(PreconditionError::PermissionDenied { uid });
    }

    let distribution = host.distribution();
    if distribution.as_deref() != Some(SUPPORTED_DISTRIBUTION) {
        return Err(PreconditionError::UnsupportedHost {
            found: distribution.unwrap_or_else(|| "unknown".to_owned()),
        });
    }

    for package in packages {
        let removals = host
            .removal_set(package)
            .map_err(|source| PreconditionError::PackageQuery {
                package: package.clone(),
                source,
            })?;
        let dependents: Vec<String> = removals
            .into_iter()
            .filter(|name| !packages.contains(name))
            .collect();
        debug!(
            target: PREFLIGHT_TARGET,
            package = %package,
            dependents = ?dependents,
            "checked reverse dependencies"
        );
        if !dependents.is_empty() {
            return Err(PreconditionError::DependencyConflict {
                package: package.clone(),
                dependents,
            });
        }
    }
    Ok(())
}

/// Extracts the `ID` value from os-release content, unquoted and lowercased.
pub fn parse_os_release_id(contents: &str) -> Option<String> {
    contents
        .lines()
        .filter_map(|line| line.trim().strip_prefix("ID="))
        .map(|value| value.trim().trim_matches(|c| c == '"' || c == '\''))
        .find(|value| !value.is_empty())
        .map(str::to_ascii_lowercase)
}
