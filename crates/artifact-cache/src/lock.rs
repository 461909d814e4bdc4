//! Advisory locks pairing a data file with its metadata sidecar
//!
//! Publishing an entry takes two renames and reading it takes two opens.
//! Writers and evictors hold the entry's lock exclusively across both steps,
//! readers hold it shared, so a reader never pairs one store's data with
//! another store's metadata. The locks are advisory and only order cache
//! operations against each other; they work across processes.

use crate::{Error, Result};
use fs4::fs_std::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::Path;

/// A held entry lock; released when dropped
#[derive(Debug)]
pub struct EntryLock {
    _file: File,
}

impl EntryLock {
    /// Take the lock at `path` exclusively, waiting for other holders
    pub fn exclusive(path: &Path) -> Result<Self> {
        let file = open_lock_file(path)?;
        FileExt::lock_exclusive(&file).map_err(|e| Error::io(e, path, "lock_exclusive"))?;
        Ok(Self { _file: file })
    }

    /// Take the lock at `path` shared, waiting for an exclusive holder
    ///
    /// Returns `None` when the lock file cannot be opened, e.g. on a
    /// read-only cache volume where no writer can be active either.
    #[must_use]
    pub fn shared(path: &Path) -> Option<Self> {
        let file = match open_lock_file(path).or_else(|_| open_existing(path)) {
            Ok(file) => file,
            Err(e) => {
                tracing::debug!(
                    path = %path.display(),
                    error = %e,
                    "Entry lock unavailable, reading unlocked"
                );
                return None;
            }
        };
        match FileExt::lock_shared(&file) {
            Ok(()) => Some(Self { _file: file }),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Failed to take shared entry lock"
                );
                None
            }
        }
    }
}

fn open_lock_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::io(e, parent, "create_dir_all"))?;
    }
    OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(path)
        .map_err(|e| Error::io(e, path, "open"))
}

fn open_existing(path: &Path) -> Result<File> {
    File::open(path).map_err(|e| Error::io(e, path, "open"))
}
