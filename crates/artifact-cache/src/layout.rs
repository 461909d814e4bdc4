//! On-disk layout of a cache directory
//!
//! Entries are sharded by rule key using a two-level directory structure:
//!
//! ```text
//! <cache_dir>/
//!   aa/
//!     bb/
//!       aabb0123...            (artifact data)
//!       aabb0123....metadata   (metadata sidecar)
//!   tmp/                       (staging area for in-flight stores)
//!   locks/
//!     aabb.lock                (guards every entry in aa/bb)
//! ```
//!
//! Keys shorter than four characters are padded with `_` to fill the shard
//! names. `_` is not a hex digit, so padded shards never collide with the
//! shards of full-length keys, and the file name is always the complete key.

use crate::RuleKey;
use std::path::{Path, PathBuf};

/// Extension of the metadata sidecar file
pub const METADATA_EXTENSION: &str = ".metadata";

/// Name of the staging directory inside the cache directory
pub const STAGING_DIR: &str = "tmp";

/// Name of the lock directory inside the cache directory
pub const LOCKS_DIR: &str = "locks";

/// Characters per shard level
const SHARD_WIDTH: usize = 2;

const SHARD_PAD: char = '_';

/// Resolves rule keys to paths inside one cache directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheLayout {
    cache_dir: PathBuf,
}

impl CacheLayout {
    /// Create a layout rooted at the given cache directory
    #[must_use]
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
        }
    }

    /// The cache directory
    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Path of an entry file: `{cache_dir}/{key[0:2]}/{key[2:4]}/{key}{extension}`
    #[must_use]
    pub fn path_for(&self, key: &RuleKey, extension: Option<&str>) -> PathBuf {
        let (first, second) = shards(key.as_str());
        let mut file_name = key.as_str().to_string();
        if let Some(ext) = extension {
            file_name.push_str(ext);
        }
        self.cache_dir.join(first).join(second).join(file_name)
    }

    /// Path of an entry's data file
    #[must_use]
    pub fn data_path(&self, key: &RuleKey) -> PathBuf {
        self.path_for(key, None)
    }

    /// Path of an entry's metadata sidecar
    #[must_use]
    pub fn metadata_path(&self, key: &RuleKey) -> PathBuf {
        self.path_for(key, Some(METADATA_EXTENSION))
    }

    /// Directory where stores stage files before publishing them
    #[must_use]
    pub fn staging_dir(&self) -> PathBuf {
        self.cache_dir.join(STAGING_DIR)
    }

    /// Directory holding the entry lock files
    #[must_use]
    pub fn locks_dir(&self) -> PathBuf {
        self.cache_dir.join(LOCKS_DIR)
    }

    /// Lock file guarding the entry for `key`
    ///
    /// Keys sharing both shard directories share a lock, which bounds the
    /// number of lock files the same way sharding bounds directory sizes.
    #[must_use]
    pub fn lock_path(&self, key: &RuleKey) -> PathBuf {
        let (first, second) = shards(key.as_str());
        self.locks_dir().join(format!("{first}{second}.lock"))
    }

    /// Whether `path` is bookkeeping rather than a stored entry
    #[must_use]
    pub fn is_internal(&self, path: &Path) -> bool {
        path == self.staging_dir() || path == self.locks_dir()
    }
}

/// Split a key into its two shard directory names
fn shards(key: &str) -> (String, String) {
    let mut chars = key.chars();
    let mut shard = || {
        (0..SHARD_WIDTH)
            .map(|_| chars.next().unwrap_or(SHARD_PAD))
            .collect::<String>()
    };
    let first = shard();
    let second = shard();
    (first, second)
}

/// The entry a file belongs to: the data file path with any sidecar
/// extension removed
#[must_use]
pub fn entry_stem(path: &Path) -> PathBuf {
    match path.file_name().and_then(|n| n.to_str()) {
        Some(name) => match name.strip_suffix(METADATA_EXTENSION) {
            Some(stem) if !stem.is_empty() => path.with_file_name(stem),
            _ => path.to_path_buf(),
        },
        None => path.to_path_buf(),
    }
}
