//! Destination database relocation, backup, and access.
//!
//! The snap keeps its database under a revision-tracked directory and exposes
//! it inside the data directory through a relative symlink, so relocation is a
//! move followed by a link back to the original name.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use rusqlite::{Connection, OptionalExtension, params};
use thiserror::Error;
use tracing::{debug, info};

use crate::files::{self, FileError};

const DATABASE_TARGET: &str = "lxd_migrate::database";
const BACKUP_SUFFIX: &str = "pre-migration";

/// Errors raised while relocating or editing the destination database.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("failed to move the database into place: {0}")]
    Relocate(#[source] FileError),
    #[error("failed to create database symlink: {0}")]
    Link(#[source] FileError),
    #[error("failed to back up {from:?} to {to:?}: {source}")]
    Backup {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to open the database at {path:?}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },
    #[error("database query failed: {0}")]
    Query(#[from] rusqlite::Error),
}

/// Moves `current` to `relocated` and leaves a relative symlink at `current`.
///
/// Whatever occupied `relocated` beforehand is discarded.
pub fn relocate(current: &Path, relocated: &Path) -> Result<(), DatabaseError> {
    files::remove_path(relocated).map_err(DatabaseError::Relocate)?;
    if let Some(parent) = relocated.parent() {
        files::create_dir_all(parent).map_err(DatabaseError::Relocate)?;
    }
    files::move_path(current, relocated).map_err(DatabaseError::Relocate)?;

    let link_dir = current.parent().unwrap_or_else(|| Path::new("/"));
    let target = relative_link(relocated, link_dir);
    files::replace_symlink(&target, current).map_err(DatabaseError::Link)?;
    info!(
        target: DATABASE_TARGET,
        link = %current.display(),
        points_to = %target.display(),
        "relocated database"
    );
    Ok(())
}

/// Copies `database` next to itself with a `.pre-migration` suffix.
pub fn backup(database: &Path) -> Result<PathBuf, DatabaseError> {
    let destination = backup_path(database);
    fs::copy(database, &destination).map_err(|source| DatabaseError::Backup {
        from: database.to_path_buf(),
        to: destination.clone(),
        source,
    })?;
    debug!(target: DATABASE_TARGET, backup = %destination.display(), "database backed up");
    Ok(destination)
}

/// Location [`backup`] writes to for `database`.
#[must_use]
pub fn backup_path(database: &Path) -> PathBuf {
    let mut name = database.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(BACKUP_SUFFIX);
    database.with_file_name(name)
}

/// Path of `target` expressed relative to the directory `from`.
///
/// Both paths are treated lexically; `..` components are not resolved.
#[must_use]
pub fn relative_link(target: &Path, from: &Path) -> PathBuf {
    let target_parts: Vec<Component<'_>> = target.components().collect();
    let from_parts: Vec<Component<'_>> = from.components().collect();
    let shared = target_parts
        .iter()
        .zip(&from_parts)
        .take_while(|(left, right)| left == right)
        .count();

    let mut relative = PathBuf::new();
    for _ in shared..from_parts.len() {
        relative.push("..");
    }
    for part in target_parts.iter().skip(shared) {
        relative.push(part.as_os_str());
    }
    relative
}

/// An open handle on the destination database.
#[derive(Debug)]
pub struct Database {
    connection: Connection,
}

impl Database {
    /// Opens the database at `path`, following symlinks.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        let connection = Connection::open(path).map_err(|source| DatabaseError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self { connection })
    }

    /// Rewrites storage pool `source` settings that live under `from` so they
    /// live under `to`. Returns the number of rows changed.
    ///
    /// Databases that predate storage pools have nothing to rewrite.
    pub fn rewrite_pool_sources(&self, from: &Path, to: &Path) -> Result<usize, DatabaseError> {
        if !self.has_table("storage_pools_config")? {
            return Ok(0);
        }
        let transaction = self.connection.unchecked_transaction()?;
        let rows: Vec<(i64, String)> = {
            let mut statement = transaction
                .prepare("SELECT id, value FROM storage_pools_config WHERE key = 'source'")?;
            statement
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<Result<_, _>>()?
        };

        let mut changed = 0;
        for (id, value) in rows {
            let Ok(rest) = Path::new(&value).strip_prefix(from) else {
                continue;
            };
            let rewritten = to.join(rest);
            transaction.execute(
                "UPDATE storage_pools_config SET value = ?1 WHERE id = ?2",
                params![rewritten.to_string_lossy(), id],
            )?;
            debug!(
                target: DATABASE_TARGET,
                from = %value,
                to = %rewritten.display(),
                "rewrote storage pool source"
            );
            changed += 1;
        }
        transaction.commit()?;
        Ok(changed)
    }

    fn has_table(&self, name: &str) -> Result<bool, DatabaseError> {
        let found: Option<String> = self
            .connection
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }
}
