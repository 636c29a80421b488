//! Distribution package queries and removal.

use std::io;
use std::process::Command;

use thiserror::Error;
use tracing::debug;

const APT_GET_BINARY: &str = "apt-get";
const PACKAGES_TARGET: &str = "lxd_migrate::packages";

/// Package manager abstraction used to keep behaviour deterministic in tests.
pub trait PackageManager {
    /// Returns every package a removal of `package` would take with it,
    /// including `package` itself.
    ///
    /// # Errors
    ///
    /// Returns an error if the package manager cannot simulate the removal.
    fn removal_set(&self, package: &str) -> Result<Vec<String>, PackageError>;

    /// Purges the given packages.
    ///
    /// # Errors
    ///
    /// Returns an error if the package manager rejects the removal.
    fn purge(&self, packages: &[String]) -> Result<(), PackageError>;
}

/// Package manager backed by `apt-get`.
#[derive(Debug, Default, Clone, Copy)]
pub struct Apt;

impl PackageManager for Apt {
    fn removal_set(&self, package: &str) -> Result<Vec<String>, PackageError> {
        let stdout = run_apt(&["remove", "--simulate", package])?;
        let removals = parse_simulated_removals(&stdout);
        debug!(
            target: PACKAGES_TARGET,
            package,
            removals = ?removals,
            "simulated package removal"
        );
        Ok(removals)
    }

    fn purge(&self, packages: &[String]) -> Result<(), PackageError> {
        if packages.is_empty() {
            return Ok(());
        }
        let mut args = vec!["remove", "--purge", "--yes"];
        args.extend(packages.iter().map(String::as_str));
        run_apt(&args).map(|_| ())
    }
}

/// Errors raised by package manager implementations.
#[derive(Debug, Error)]
pub enum PackageError {
    /// Spawning the package manager failed.
    #[error("failed to spawn {binary}: {source}")]
    Spawn {
        /// Binary that failed to start.
        binary: &'static str,
        /// Underlying process spawn error.
        #[source]
        source: io::Error,
    },
    /// The package manager completed with a non-zero status.
    #[error("{binary} {arguments} failed: {message}")]
    Failed {
        /// Binary that failed.
        binary: &'static str,
        /// Arguments passed to the binary.
        arguments: String,
        /// Error message captured from stderr.
        message: String,
    },
}

fn run_apt(args: &[&str]) -> Result<String, PackageError> {
    let output = Command::new(APT_GET_BINARY)
        .args(args)
        .env("LC_ALL", "C")
        .env("DEBIAN_FRONTEND", "noninteractive")
        .output()
        .map_err(|source| PackageError::Spawn {
            binary: APT_GET_BINARY,
            source,
        })?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_owned();
        return Err(PackageError::Failed {
            binary: APT_GET_BINARY,
            arguments: args.join(" "),
            message: if stderr.is_empty() {
                format!("exited with status {:?}", output.status.code())
            } else {
                stderr
            },
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Extracts package names from `apt-get --simulate` output.
///
/// Only `Remv <name> [<version>]` lines name packages the removal would take;
/// architecture qualifiers such as `:amd64` are stripped.
pub fn parse_simulated_removals(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| line.strip_prefix("Remv "))
        .filter_map(|rest| rest.split_whitespace().next())
        .map(|name| name.split(':').next().unwrap_or(name).to_owned())
        .collect()
}
