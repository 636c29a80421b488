//! Mount table inspection and manipulation.
//!
//! Mount points are read from `/proc/self/mountinfo`, whose fifth field holds
//! the mount point with whitespace and backslashes octal-escaped.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::mount::{MntFlags, MsFlags, mount, umount2};
use thiserror::Error;
use tracing::{debug, info};

const MOUNTINFO_PATH: &str = "/proc/self/mountinfo";
const MOUNTS_TARGET: &str = "lxd_migrate::mounts";

/// Errors raised while inspecting or changing mounts.
#[derive(Debug, Error)]
pub enum MountError {
    #[error("failed to read the mount table: {source}")]
    ReadTable {
        #[source]
        source: io::Error,
    },
    #[error("failed to unmount {path:?}: {source}")]
    Unmount {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to move mount {from:?} to {to:?}: {source}")]
    Move {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Parses mount points out of mountinfo content, in table order.
pub fn parse_mount_points(mountinfo: &str) -> Vec<PathBuf> {
    mountinfo
        .lines()
        .filter_map(|line| line.split(' ').nth(4))
        .map(|field| PathBuf::from(unescape(field)))
        .collect()
}

/// Reads the current mount points of this process' namespace.
pub fn read_mount_points() -> Result<Vec<PathBuf>, MountError> {
    let table =
        fs::read_to_string(MOUNTINFO_PATH).map_err(|source| MountError::ReadTable { source })?;
    Ok(parse_mount_points(&table))
}

/// Whether `path` is itself a mount point.
pub fn is_mount_point(path: &Path) -> Result<bool, MountError> {
    Ok(read_mount_points()?.iter().any(|point| point == path))
}

/// Mount points strictly below `root`, deepest first and without duplicates.
pub fn mounts_below(points: &[PathBuf], root: &Path) -> Vec<PathBuf> {
    let mut below: Vec<PathBuf> = points
        .iter()
        .filter(|point| point.as_path() != root && point.starts_with(root))
        .cloned()
        .collect();
    below.sort_by(|left, right| {
        right
            .components()
            .count()
            .cmp(&left.components().count())
            .then_with(|| left.cmp(right))
    });
    below.dedup();
    below
}

/// Lazily unmounts every mount point strictly below `root`.
///
/// `root` itself stays mounted. Entries that vanished because a parent was
/// detached first are ignored.
pub fn unmount_below(root: &Path) -> Result<usize, MountError> {
    let targets = mounts_below(&read_mount_points()?, root);
    for target in &targets {
        match umount2(target.as_path(), MntFlags::MNT_DETACH) {
            Ok(()) => debug!(target: MOUNTS_TARGET, path = %target.display(), "unmounted"),
            Err(Errno::EINVAL | Errno::ENOENT) => {
                debug!(target: MOUNTS_TARGET, path = %target.display(), "already unmounted");
            }
            Err(errno) => {
                return Err(MountError::Unmount {
                    path: target.clone(),
                    source: io::Error::from(errno),
                });
            }
        }
    }
    Ok(targets.len())
}

/// Atomically moves the mount at `from` onto `to`.
pub fn move_mount(from: &Path, to: &Path) -> Result<(), MountError> {
    let flags = MsFlags::MS_MOVE;
    mount(Some(from), to, None::<&str>, flags, None::<&str>).map_err(|errno| MountError::Move {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        source: io::Error::from(errno),
    })?;
    info!(
        target: MOUNTS_TARGET,
        from = %from.display(),
        to = %to.display(),
        "moved mount"
    );
    Ok(())
}

fn unescape(field: &str) -> String {
    let mut rest = field.as_bytes();
    let mut decoded = Vec::with_capacity(rest.len());
    while let Some((&byte, tail)) = rest.split_first() {
        if byte == b'\\'
            && let Some(value) = octal_prefix(tail)
        {
            decoded.push(value);
            rest = tail.get(3..).unwrap_or_default();
            continue;
        }
        decoded.push(byte);
        rest = tail;
    }
    String::from_utf8_lossy(&decoded).into_owned()
}

fn octal_prefix(bytes: &[u8]) -> Option<u8> {
    let digits = bytes.get(..3)?;
    digits.iter().try_fold(0u8, |value, digit| match digit {
        b'0'..=b'7' => value.checked_mul(8)?.checked_add(digit - b'0'),
        _ => None,
    })
}
