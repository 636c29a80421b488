//! Storage path rewriting after the data directory changed location.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::database::{Database, DatabaseError};
use crate::files::{self, FileError};

const STORAGE_TARGET: &str = "lxd_migrate::storage";
/// Directories whose entries may be absolute symlinks into the data directory.
const LINKED_ROOTS: &[&str] = &["containers", "snapshots", "storage-pools"];
const MAX_LINK_DEPTH: usize = 2;

/// Errors raised while rewriting storage paths.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to update the storage pools: {0}")]
    Database(#[from] DatabaseError),
    #[error("failed to re-point storage links: {0}")]
    Links(#[from] FileError),
}

/// Counts of what a storage rewrite changed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StorageRewrite {
    pub pool_sources: usize,
    pub links: usize,
}

/// Rewrites pool sources in `database` and symlinks under `target` that still
/// point into `previous`.
pub fn rewrite(
    database: &Database,
    previous: &Path,
    target: &Path,
) -> Result<StorageRewrite, StorageError> {
    let pool_sources = database.rewrite_pool_sources(previous, target)?;
    let mut links = 0;
    for root in LINKED_ROOTS {
        links += relink_tree(&target.join(root), previous, target, MAX_LINK_DEPTH)?;
    }
    Ok(StorageRewrite {
        pool_sources,
        links,
    })
}

fn relink_tree(
    directory: &Path,
    previous: &Path,
    target: &Path,
    depth: usize,
) -> Result<usize, FileError> {
    let mut count = 0;
    for entry in files::read_dir(directory)? {
        let metadata = fs::symlink_metadata(&entry).map_err(|source| FileError::ReadLink {
            path: entry.clone(),
            source,
        })?;
        if metadata.file_type().is_symlink() {
            if let Some(rewritten) = rewritten_link(&entry, previous, target)? {
                files::replace_symlink(&rewritten, &entry)?;
                count += 1;
            }
        } else if metadata.is_dir() && depth > 1 {
            count += relink_tree(&entry, previous, target, depth - 1)?;
        }
    }
    Ok(count)
}

fn rewritten_link(
    link: &Path,
    previous: &Path,
    target: &Path,
) -> Result<Option<PathBuf>, FileError> {
    let destination = fs::read_link(link).map_err(|source| FileError::ReadLink {
        path: link.to_path_buf(),
        source,
    })?;
    let Ok(rest) = destination.strip_prefix(previous) else {
        return Ok(None);
    };
    let rewritten = target.join(rest);
    debug!(
        target: STORAGE_TARGET,
        link = %link.display(),
        from = %destination.display(),
        to = %rewritten.display(),
        "re-pointing storage link"
    );
    Ok(Some(rewritten))
}
