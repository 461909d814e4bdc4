//! Directory-backed artifact cache
//!
//! All state lives on disk; there is no in-memory index. Every operation
//! derives paths from the rule key and goes straight to the filesystem, so
//! any number of threads or processes can share one cache directory.

use crate::cache::ArtifactCache;
use crate::config::{DirCacheConfig, format_bytes, is_writable};
use crate::evict::{EvictionStats, Evictor, disk_usage, scan_entries};
use crate::layout::CacheLayout;
use crate::lock::EntryLock;
use crate::metadata;
use crate::publish::{Staging, publish};
use crate::{ArtifactInfo, ArtifactMetadata, BorrowablePath, CacheResult, Error, Result, RuleKey};
use std::fs::{self, File, FileTimes};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::SystemTime;

/// Summary of what is currently stored
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of entries (one per stored rule key)
    pub entries: usize,
    /// Number of files, sidecars included
    pub files: usize,
    /// Total size of all files in bytes, hardlinked aliases counted once
    pub total_bytes: u64,
    /// Total size formatted for humans
    pub human_size: String,
}

/// Artifact cache storing entries in a local directory
#[derive(Debug)]
pub struct DirArtifactCache {
    name: String,
    layout: CacheLayout,
    do_store: bool,
    max_size_bytes: Option<u64>,
    closed: AtomicBool,
}

impl DirArtifactCache {
    /// Open a cache in `root/sub_dir`
    ///
    /// When `do_store` is set the directory is created and checked for write
    /// access here, so a misconfigured cache fails immediately rather than on
    /// the first store. A read-only cache touches nothing.
    ///
    /// # Errors
    /// Returns error if `sub_dir` is absolute, or if storing is enabled and
    /// the cache directory cannot be created or written.
    pub fn new(
        name: impl Into<String>,
        root: &Path,
        sub_dir: impl AsRef<Path>,
        do_store: bool,
        max_size_bytes: Option<u64>,
    ) -> Result<Self> {
        let name = name.into();
        let sub_dir = sub_dir.as_ref();
        if sub_dir.is_absolute() {
            return Err(Error::configuration(format!(
                "Cache subdirectory must be relative, got {}",
                sub_dir.display()
            )));
        }
        let cache_dir = normalize(&root.join(sub_dir));

        if do_store {
            fs::create_dir_all(&cache_dir)
                .map_err(|e| Error::io(e, &cache_dir, "create_dir_all"))?;
            if !is_writable(&cache_dir) {
                return Err(Error::configuration(format!(
                    "Cache directory {} is not writable",
                    cache_dir.display()
                )));
            }
        }

        tracing::debug!(
            cache = %name,
            dir = %cache_dir.display(),
            do_store,
            max_size_bytes = ?max_size_bytes,
            "Opened directory cache"
        );

        Ok(Self {
            name,
            layout: CacheLayout::new(cache_dir),
            do_store,
            max_size_bytes,
            closed: AtomicBool::new(false),
        })
    }

    /// Open the cache described by `config`
    ///
    /// # Errors
    /// Returns error if no cache directory can be resolved or opened.
    pub fn from_config(config: &DirCacheConfig) -> Result<Self> {
        let dir = config.cache_dir()?;
        Self::new(
            config.name.clone(),
            &dir,
            ".",
            config.mode.stores(),
            config.max_size_bytes,
        )
    }

    /// The resolved cache directory
    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        self.layout.cache_dir()
    }

    /// Configured size budget
    #[must_use]
    pub const fn max_size_bytes(&self) -> Option<u64> {
        self.max_size_bytes
    }

    /// Where the entry file for `key` lives
    #[must_use]
    pub fn path_for_rule_key(&self, key: &RuleKey, extension: Option<&str>) -> PathBuf {
        self.layout.path_for(key, extension)
    }

    /// Every stored file, sidecars included, sorted by path
    ///
    /// Files still being staged by an in-flight store are not listed.
    pub fn all_files_in_cache(&self) -> Result<Vec<PathBuf>> {
        let entries = scan_entries(&self.layout)?;
        let mut files: Vec<PathBuf> = entries
            .into_iter()
            .flat_map(|entry| entry.files)
            .map(|file| file.path)
            .collect();
        files.sort();
        Ok(files)
    }

    /// Trim the cache to two thirds of its budget once it exceeds it
    pub fn delete_old_files(&self) -> Result<EvictionStats> {
        Evictor::new(self.layout.clone(), self.max_size_bytes).run()
    }

    /// Current entry count and footprint
    pub fn stats(&self) -> Result<CacheStats> {
        let entries = scan_entries(&self.layout)?;
        let total_bytes = disk_usage(&entries);
        Ok(CacheStats {
            entries: entries.len(),
            files: entries.iter().map(|e| e.files.len()).sum(),
            total_bytes,
            human_size: format_bytes(total_bytes),
        })
    }

    fn publish_entry(
        &self,
        staging: &Staging,
        key: &RuleKey,
        encoded_metadata: &[u8],
        data: tempfile::TempPath,
    ) -> Result<()> {
        let sidecar = staging.write_in(encoded_metadata)?;

        // readers take the same lock, so they never see one store's data
        // with another store's metadata
        let _lock = EntryLock::exclusive(&self.layout.lock_path(key))?;
        publish(sidecar, &self.layout.metadata_path(key))?;
        publish(data, &self.layout.data_path(key))
    }

    /// Copy the entry to `output`; `None` when the entry vanished meanwhile
    fn read_entry(
        &self,
        key: &RuleKey,
        output: &Path,
    ) -> Result<Option<(ArtifactMetadata, u64)>> {
        let data_path = self.layout.data_path(key);
        let metadata_path = self.layout.metadata_path(key);

        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| Error::io(e, parent, "create_dir_all"))?;
        }

        // pin the data file and read its sidecar under the shared lock;
        // published files are only ever replaced, never rewritten
        let lock = EntryLock::shared(&self.layout.lock_path(key));
        let mut data = match File::open(&data_path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::io(e, &data_path, "open")),
        };
        let metadata = match fs::read(&metadata_path) {
            Ok(bytes) => metadata::decode(&bytes)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => ArtifactMetadata::new(),
            Err(e) => return Err(Error::io(e, &metadata_path, "read")),
        };
        drop(lock);

        let size = copy_pinned(&mut data, &data_path, output)?;
        touch_file(&data, &data_path);
        touch(&metadata_path);

        Ok(Some((metadata, size)))
    }

    fn fetch_error(&self, key: &RuleKey, error: &Error) -> CacheResult {
        tracing::warn!(
            cache = %self.name,
            rule_key = %key,
            error = %error,
            "Failed to read cache entry"
        );
        CacheResult::error(self.name.clone(), error.to_string())
    }
}

impl ArtifactCache for DirArtifactCache {
    fn fetch(&self, key: &RuleKey, output: &Path) -> CacheResult {
        let data_path = self.layout.data_path(key);
        match fs::metadata(&data_path) {
            Ok(m) if m.is_file() => {}
            Ok(_) => {
                let error = Error::io(
                    io::Error::other("entry is not a regular file"),
                    &data_path,
                    "metadata",
                );
                return self.fetch_error(key, &error);
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(cache = %self.name, rule_key = %key, "Cache miss");
                return CacheResult::miss();
            }
            Err(e) => return self.fetch_error(key, &Error::io(e, &data_path, "metadata")),
        }

        match self.read_entry(key, output) {
            Ok(Some((metadata, size))) => {
                tracing::debug!(
                    cache = %self.name,
                    rule_key = %key,
                    size,
                    output = %output.display(),
                    "Cache hit"
                );
                CacheResult::hit(self.name.clone(), metadata, size)
            }
            Ok(None) => {
                tracing::debug!(
                    cache = %self.name,
                    rule_key = %key,
                    "Cache entry evicted during fetch"
                );
                CacheResult::miss()
            }
            Err(e) => self.fetch_error(key, &e),
        }
    }

    fn store(&self, info: &ArtifactInfo, output: BorrowablePath<'_>) -> Result<()> {
        if !self.do_store {
            tracing::debug!(
                cache = %self.name,
                rule_key = %info.primary_key(),
                "Store skipped, cache is read-only"
            );
            return Ok(());
        }

        let staging = Staging::open(self.layout.staging_dir())?;
        let encoded = metadata::encode(info.metadata())?;
        let staged = match &output {
            BorrowablePath::Borrowable(path) => staging.move_in(path)?,
            BorrowablePath::NotBorrowable(path) => staging.copy_in(path)?,
        };

        for key in info.secondary_keys() {
            let linked = staging.link_in(&staged)?;
            self.publish_entry(&staging, key, &encoded, linked)?;
        }
        self.publish_entry(&staging, info.primary_key(), &encoded, staged)?;

        tracing::debug!(
            cache = %self.name,
            rule_key = %info.primary_key(),
            keys = info.rule_keys().len(),
            borrowed = output.is_borrowable(),
            "Stored artifact"
        );

        if self.max_size_bytes.is_some()
            && let Err(e) = self.delete_old_files()
        {
            tracing::warn!(
                cache = %self.name,
                error = %e,
                "Eviction after store failed"
            );
        }
        Ok(())
    }

    fn is_store_supported(&self) -> bool {
        self.do_store
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) || !self.do_store {
            return;
        }
        if Staging::remove_if_empty(&self.layout.staging_dir()) {
            tracing::debug!(cache = %self.name, "Removed staging directory");
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Copy an open entry file to `output`, carrying over its permissions
fn copy_pinned(data: &mut File, data_path: &Path, output: &Path) -> Result<u64> {
    let permissions = data
        .metadata()
        .map_err(|e| Error::io(e, data_path, "metadata"))?
        .permissions();
    let mut out = File::create(output).map_err(|e| Error::io(e, output, "create"))?;
    let size = io::copy(data, &mut out).map_err(|e| Error::io(e, output, "copy"))?;
    out.set_permissions(permissions)
        .map_err(|e| Error::io(e, output, "set_permissions"))?;
    Ok(size)
}

/// Refresh the access time of an already open entry file
fn touch_file(file: &File, path: &Path) {
    if let Err(e) = file.set_times(FileTimes::new().set_accessed(SystemTime::now())) {
        tracing::warn!(
            path = %path.display(),
            error = %e,
            "Failed to refresh access time"
        );
    }
}

/// Refresh the access time, which eviction reads as recency
fn touch(path: &Path) {
    let result = File::open(path)
        .and_then(|f| f.set_times(FileTimes::new().set_accessed(SystemTime::now())));
    match result {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "Failed to refresh access time"
            );
        }
    }
}

/// Drop `.` components so `root/.` and `root` name the same directory
fn normalize(path: &Path) -> PathBuf {
    let normalized: PathBuf = path
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect();
    if normalized.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        normalized
    }
}
