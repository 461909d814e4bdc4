//! Size-bounded eviction of least-recently-read entries
//!
//! The cache keeps no index, so every pass re-scans the directory. An entry
//! is the data file plus its metadata sidecar; both are removed together
//! under the entry lock. Recency comes from the filesystem access time,
//! which fetches refresh.
//!
//! Extra rule keys of one artifact are hardlinks of the same file. Their
//! bytes count once, and are only freed once every alias is gone.

use crate::layout::{CacheLayout, entry_stem};
use crate::lock::EntryLock;
use crate::{Error, Result, RuleKey};
use std::collections::{HashMap, HashSet};
use std::fs::{self, Metadata};
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use walkdir::WalkDir;

/// Statistics from an eviction pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvictionStats {
    /// Number of files found in the cache
    pub files_scanned: usize,
    /// Number of entries (data file plus sidecar) removed
    pub entries_removed: usize,
    /// Bytes freed
    pub bytes_freed: u64,
    /// Cache size after the pass
    pub current_size: u64,
}

/// Identity of the underlying file, shared by hardlinks
pub(crate) type FileId = (u64, u64);

/// One file of a stored entry
#[derive(Debug, Clone)]
pub(crate) struct EntryFile {
    pub(crate) path: PathBuf,
    pub(crate) len: u64,
    pub(crate) id: Option<FileId>,
}

/// A stored entry as seen on disk
#[derive(Debug, Clone)]
pub(crate) struct EntryInfo {
    pub(crate) stem: PathBuf,
    pub(crate) files: Vec<EntryFile>,
    pub(crate) last_accessed: SystemTime,
}

#[cfg(unix)]
fn file_id(metadata: &Metadata) -> Option<FileId> {
    use std::os::unix::fs::MetadataExt;
    Some((metadata.dev(), metadata.ino()))
}

#[cfg(not(unix))]
fn file_id(_metadata: &Metadata) -> Option<FileId> {
    None
}

/// Total bytes on disk, counting each hardlinked file once
pub(crate) fn disk_usage(entries: &[EntryInfo]) -> u64 {
    let mut seen: HashSet<FileId> = HashSet::new();
    entries
        .iter()
        .flat_map(|e| &e.files)
        .filter(|f| f.id.is_none_or(|id| seen.insert(id)))
        .map(|f| f.len)
        .sum()
}

/// Size the cache is trimmed down to once it exceeds `budget`
#[must_use]
pub fn trim_target(budget: u64) -> u64 {
    // u128 keeps 2 * budget from overflowing; the quotient always fits
    u64::try_from(u128::from(budget) * 2 / 3).unwrap_or(u64::MAX)
}

/// Every completed entry in the cache, skipping staging and lock files
pub(crate) fn scan_entries(layout: &CacheLayout) -> Result<Vec<EntryInfo>> {
    let root = layout.cache_dir();
    let mut grouped: HashMap<PathBuf, EntryInfo> = HashMap::new();

    if !root.exists() {
        return Ok(Vec::new());
    }

    let walker = WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .filter_entry(|e| !layout.is_internal(e.path()));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if is_vanished(&e) => continue,
            Err(e) => {
                let path = e.path().map(Path::to_path_buf);
                let source = e
                    .into_io_error()
                    .unwrap_or_else(|| io::Error::other("filesystem loop"));
                return Err(match path {
                    Some(p) => Error::io(source, p, "read_dir"),
                    None => Error::io_no_path(source, "read_dir"),
                });
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let metadata = match entry.metadata() {
            Ok(m) => m,
            Err(e) if is_vanished(&e) => continue,
            Err(e) => {
                let source = e
                    .into_io_error()
                    .unwrap_or_else(|| io::Error::other("metadata unavailable"));
                return Err(Error::io(source, entry.path(), "metadata"));
            }
        };
        let last_accessed = metadata
            .accessed()
            .or_else(|_| metadata.modified())
            .unwrap_or(SystemTime::UNIX_EPOCH);

        let stem = entry_stem(entry.path());
        let info = grouped.entry(stem.clone()).or_insert_with(|| EntryInfo {
            stem,
            files: Vec::new(),
            last_accessed: SystemTime::UNIX_EPOCH,
        });
        info.files.push(EntryFile {
            path: entry.into_path(),
            len: metadata.len(),
            id: file_id(&metadata),
        });
        info.last_accessed = info.last_accessed.max(last_accessed);
    }

    Ok(grouped.into_values().collect())
}

fn is_vanished(e: &walkdir::Error) -> bool {
    e.io_error()
        .is_some_and(|io| io.kind() == io::ErrorKind::NotFound)
}

/// Removes least-recently-read entries until the cache fits its budget
#[derive(Debug, Clone)]
pub struct Evictor {
    layout: CacheLayout,
    max_size_bytes: Option<u64>,
}

impl Evictor {
    /// Create an evictor for the cache with the given layout
    #[must_use]
    pub fn new(layout: CacheLayout, max_size_bytes: Option<u64>) -> Self {
        Self {
            layout,
            max_size_bytes,
        }
    }

    /// Run one eviction pass
    ///
    /// Without a budget this does nothing. Otherwise, if the cache exceeds the
    /// budget, entries are removed oldest access first until the total is at
    /// or below two thirds of the budget.
    pub fn run(&self) -> Result<EvictionStats> {
        let mut stats = EvictionStats::default();

        let Some(budget) = self.max_size_bytes else {
            return Ok(stats);
        };

        let mut entries = scan_entries(&self.layout)?;
        stats.files_scanned = entries.iter().map(|e| e.files.len()).sum();

        let total_size = disk_usage(&entries);
        stats.current_size = total_size;
        if total_size <= budget {
            tracing::debug!(
                size = total_size,
                budget = budget,
                "Cache within budget, nothing to evict"
            );
            return Ok(stats);
        }

        let target = trim_target(budget);
        entries.sort_by(|a, b| {
            a.last_accessed
                .cmp(&b.last_accessed)
                .then_with(|| a.stem.cmp(&b.stem))
        });

        let mut links: HashMap<FileId, usize> = HashMap::new();
        for id in entries.iter().flat_map(|e| &e.files).filter_map(|f| f.id) {
            *links.entry(id).or_default() += 1;
        }

        let mut current_size = total_size;
        for entry in &entries {
            if current_size <= target {
                break;
            }
            if self.remove_entry(entry) {
                let freed = released_bytes(entry, &mut links);
                stats.entries_removed += 1;
                stats.bytes_freed += freed;
                current_size = current_size.saturating_sub(freed);
            }
        }

        stats.current_size = current_size;
        tracing::info!(
            removed = stats.entries_removed,
            freed = stats.bytes_freed,
            current = stats.current_size,
            budget = budget,
            "Evicted least recently used cache entries"
        );
        Ok(stats)
    }

    /// Delete every file of an entry; true once none of them remain
    fn remove_entry(&self, entry: &EntryInfo) -> bool {
        let _lock = match self.lock_for(entry) {
            Ok(lock) => lock,
            Err(e) => {
                tracing::warn!(
                    entry = %entry.stem.display(),
                    error = %e,
                    "Failed to lock cache entry for eviction"
                );
                return false;
            }
        };

        let mut removed = true;
        for file in &entry.files {
            match fs::remove_file(&file.path) {
                Ok(()) => {
                    tracing::debug!(path = %file.path.display(), "Evicted cache file");
                }
                // removed concurrently by another worker
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    removed = false;
                    tracing::warn!(
                        path = %file.path.display(),
                        error = %e,
                        "Failed to evict cache file"
                    );
                }
            }
        }
        if let Some(parent) = entry.stem.parent() {
            self.prune_empty_dirs(parent);
        }
        removed
    }

    /// Entries named by a rule key are locked; anything else is removed as is
    fn lock_for(&self, entry: &EntryInfo) -> Result<Option<EntryLock>> {
        let key = entry
            .stem
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| RuleKey::new(n).ok());
        match key {
            Some(key) => EntryLock::exclusive(&self.layout.lock_path(&key)).map(Some),
            None => Ok(None),
        }
    }

    /// Remove empty shard directories up to, but never including, the root
    fn prune_empty_dirs(&self, start: &Path) {
        let root = self.layout.cache_dir();
        let mut dir = start;
        while dir != root && dir.starts_with(root) {
            if fs::remove_dir(dir).is_err() {
                break;
            }
            match dir.parent() {
                Some(parent) => dir = parent,
                None => break,
            }
        }
    }
}

/// Bytes actually released by removing `entry`: a hardlinked file frees its
/// space with its last remaining link
fn released_bytes(entry: &EntryInfo, links: &mut HashMap<FileId, usize>) -> u64 {
    entry
        .files
        .iter()
        .filter(|f| match f.id.and_then(|id| links.get_mut(&id)) {
            Some(count) => {
                *count = count.saturating_sub(1);
                *count == 0
            }
            None => true,
        })
        .map(|f| f.len)
        .sum()
}
