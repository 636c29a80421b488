//! Filesystem primitives used while relocating daemon state.
//!
//! Moves prefer `rename(2)` and fall back to `mv` when source and target live
//! on different filesystems, which is the common case for `/var/lib/lxd` and
//! `/var/snap`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use thiserror::Error;
use tracing::debug;

const FILES_TARGET: &str = "lxd_migrate::files";

/// Errors raised by filesystem primitives.
#[derive(Debug, Error)]
pub enum FileError {
    #[error("failed to read directory {path:?}: {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to create directory {path:?}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to remove {path:?}: {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to move {from:?} to {to:?}: {source}")]
    Rename {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to spawn mv for {from:?}: {source}")]
    SpawnMove {
        from: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("mv {from:?} {to:?} exited with status {status:?}: {stderr}")]
    MoveFailed {
        from: PathBuf,
        to: PathBuf,
        status: Option<i32>,
        stderr: String,
    },
    #[error("failed to read link {path:?}: {source}")]
    ReadLink {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to create symlink {link:?} -> {target:?}: {source}")]
    Symlink {
        link: PathBuf,
        target: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Deletes every entry below `root`, keeping `root` itself.
///
/// A missing `root` is created so later moves have somewhere to land.
pub fn wipe_contents(root: &Path) -> Result<(), FileError> {
    if !root.exists() {
        return create_dir_all(root);
    }
    for entry in read_dir(root)? {
        remove_path(&entry)?;
    }
    Ok(())
}

/// Moves every top-level entry of `from` into `to`.
pub fn move_contents(from: &Path, to: &Path) -> Result<(), FileError> {
    create_dir_all(to)?;
    for entry in read_dir(from)? {
        let Some(name) = entry.file_name() else {
            continue;
        };
        move_path(&entry, &to.join(name))?;
    }
    Ok(())
}

/// Moves a single path, crossing filesystems with `mv` when needed.
pub fn move_path(from: &Path, to: &Path) -> Result<(), FileError> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == io::ErrorKind::CrossesDevices => {
            debug!(
                target: FILES_TARGET,
                from = %from.display(),
                to = %to.display(),
                "rename crosses devices; falling back to mv"
            );
            move_with_command(from, to)
        }
        Err(source) => Err(FileError::Rename {
            from: from.to_path_buf(),
            to: to.to_path_buf(),
            source,
        }),
    }
}

/// Removes a file, symlink, or directory tree without following symlinks.
pub fn remove_path(path: &Path) -> Result<(), FileError> {
    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(source) => {
            return Err(FileError::Remove {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    let result = if metadata.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    result.map_err(|source| FileError::Remove {
        path: path.to_path_buf(),
        source,
    })
}

/// Creates a directory and all of its parents.
pub fn create_dir_all(path: &Path) -> Result<(), FileError> {
    fs::create_dir_all(path).map_err(|source| FileError::CreateDir {
        path: path.to_path_buf(),
        source,
    })
}

/// Replaces `link` with a symlink pointing at `target`.
pub fn replace_symlink(target: &Path, link: &Path) -> Result<(), FileError> {
    remove_path(link)?;
    std::os::unix::fs::symlink(target, link).map_err(|source| FileError::Symlink {
        link: link.to_path_buf(),
        target: target.to_path_buf(),
        source,
    })
}

/// Returns the entries of `path`, or none when it does not exist.
pub fn read_dir(path: &Path) -> Result<Vec<PathBuf>, FileError> {
    let entries = match fs::read_dir(path) {
        Ok(entries) => entries,
        Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(FileError::ReadDir {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| FileError::ReadDir {
            path: path.to_path_buf(),
            source,
        })?;
        paths.push(entry.path());
    }
    paths.sort();
    Ok(paths)
}

fn move_with_command(from: &Path, to: &Path) -> Result<(), FileError> {
    let output = Command::new("mv")
        .arg("--no-target-directory")
        .arg(from)
        .arg(to)
        .output()
        .map_err(|source| FileError::SpawnMove {
            from: from.to_path_buf(),
            source,
        })?;
    if output.status.success() {
        return Ok(());
    }
    Err(FileError::MoveFailed {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        status: output.status.code(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
    })
}
