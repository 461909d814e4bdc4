//! Artifact cache trait for pluggable cache backends

use crate::{ArtifactInfo, BorrowablePath, CacheResult, Result, RuleKey};
use std::path::Path;

/// A store of build artifacts addressed by rule key
///
/// Implementations must be thread-safe (`Send + Sync`) so one instance can be
/// shared by concurrent build workers.
pub trait ArtifactCache: Send + Sync {
    /// Fetch the artifact stored under `key` into `output`
    ///
    /// Never fails: a missing entry is a [`CacheResultType::Miss`] and a
    /// failure reading an existing entry is a [`CacheResultType::Error`], so
    /// callers can always fall back to rebuilding.
    ///
    /// [`CacheResultType::Miss`]: crate::CacheResultType::Miss
    /// [`CacheResultType::Error`]: crate::CacheResultType::Error
    fn fetch(&self, key: &RuleKey, output: &Path) -> CacheResult;

    /// Store `output` under every rule key of `info`
    ///
    /// # Errors
    /// Returns error if the artifact cannot be written; no partial entry is
    /// left visible.
    fn store(&self, info: &ArtifactInfo, output: BorrowablePath<'_>) -> Result<()>;

    /// Whether stores are persisted
    fn is_store_supported(&self) -> bool;

    /// Release held resources; safe to call more than once
    fn close(&self);

    /// Label used in logs and cache results
    fn name(&self) -> &str;
}
