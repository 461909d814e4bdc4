//! Atomic staging and publishing of cache files
//!
//! Every file reaches its final path through a rename from the staging
//! directory, which lives inside the cache directory so the rename never
//! crosses a filesystem. Readers therefore see either the previous file or
//! the complete new one. A staged file that is never published is removed
//! when its [`TempPath`] is dropped.

use crate::{Error, Result};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::{Builder, TempPath};

/// Attempts at publishing when a concurrent eviction prunes the shard
/// directory between creating it and renaming into it
const PUBLISH_ATTEMPTS: usize = 3;

/// Staging area for one cache directory
#[derive(Debug, Clone)]
pub struct Staging {
    dir: PathBuf,
}

impl Staging {
    /// Open the staging directory, creating it if needed
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| Error::io(e, &dir, "create_dir_all"))?;
        Ok(Self { dir })
    }

    /// Stage a copy of `source`, leaving it untouched
    pub fn copy_in(&self, source: &Path) -> Result<TempPath> {
        let staged = self
            .in_dir(|| Builder::new().prefix(".stage-").tempfile_in(&self.dir))
            .map_err(|e| Error::io(e, &self.dir, "create_temp"))?;
        fs::copy(source, staged.path()).map_err(|e| Error::io(e, source, "copy"))?;
        staged
            .as_file()
            .sync_all()
            .map_err(|e| Error::io(e, staged.path(), "sync"))?;
        Ok(staged.into_temp_path())
    }

    /// Stage `source` by moving it; falls back to copy-then-remove when the
    /// source lives on another filesystem
    pub fn move_in(&self, source: &Path) -> Result<TempPath> {
        let moved = self.in_dir(|| {
            Builder::new()
                .prefix(".stage-")
                .make_in(&self.dir, |path| fs::rename(source, path))
        });
        match moved {
            Ok(staged) => Ok(staged.into_temp_path()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(Error::io(e, source, "rename")),
            Err(e) => {
                tracing::debug!(
                    source = %source.display(),
                    error = %e,
                    "Cannot move source into cache, copying instead"
                );
                let staged = self.copy_in(source)?;
                fs::remove_file(source).map_err(|e| Error::io(e, source, "remove_file"))?;
                Ok(staged)
            }
        }
    }

    /// Stage another name for an already staged or published file
    ///
    /// Uses a hardlink where the filesystem supports it, a full copy
    /// otherwise. The new name does not depend on `existing` surviving.
    pub fn link_in(&self, existing: &Path) -> Result<TempPath> {
        let linked = self.in_dir(|| {
            Builder::new()
                .prefix(".link-")
                .make_in(&self.dir, |path| fs::hard_link(existing, path))
        });
        match linked {
            Ok(staged) => Ok(staged.into_temp_path()),
            Err(e) => {
                tracing::debug!(
                    path = %existing.display(),
                    error = %e,
                    "Hardlink failed, copying instead"
                );
                self.copy_in(existing)
            }
        }
    }

    /// Stage a file with the given contents
    pub fn write_in(&self, contents: &[u8]) -> Result<TempPath> {
        let mut staged = self
            .in_dir(|| Builder::new().prefix(".meta-").tempfile_in(&self.dir))
            .map_err(|e| Error::io(e, &self.dir, "create_temp"))?;
        staged
            .write_all(contents)
            .map_err(|e| Error::io(e, staged.path(), "write"))?;
        staged
            .as_file()
            .sync_all()
            .map_err(|e| Error::io(e, staged.path(), "sync"))?;
        Ok(staged.into_temp_path())
    }

    /// Run `op` in the staging directory, recreating the directory once if
    /// a concurrent `close` removed it
    fn in_dir<T>(&self, mut op: impl FnMut() -> io::Result<T>) -> io::Result<T> {
        match op() {
            Err(e) if e.kind() == io::ErrorKind::NotFound && !self.dir.is_dir() => {
                fs::create_dir_all(&self.dir)?;
                op()
            }
            result => result,
        }
    }

    /// Remove the staging directory if nothing is in flight
    pub fn remove_if_empty(dir: &Path) -> bool {
        fs::remove_dir(dir).is_ok()
    }
}

/// Atomically move a staged file to `dest`, replacing any existing file
pub fn publish(staged: TempPath, dest: &Path) -> Result<()> {
    let parent = dest
        .parent()
        .ok_or_else(|| Error::configuration(format!("{} has no parent", dest.display())))?;

    let mut staged = staged;
    let mut attempt = 1;
    loop {
        fs::create_dir_all(parent).map_err(|e| Error::io(e, parent, "create_dir_all"))?;
        match staged.persist(dest) {
            Ok(()) => return Ok(()),
            Err(e) if e.error.kind() == io::ErrorKind::NotFound && attempt < PUBLISH_ATTEMPTS => {
                // shard directory was pruned underneath us
                staged = e.path;
                attempt += 1;
            }
            Err(e) => return Err(Error::io(e.error, dest, "rename")),
        }
    }
}
