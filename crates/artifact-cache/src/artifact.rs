//! Values exchanged with the cache on store and fetch

use crate::{Error, Result, RuleKey};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Free-form string metadata stored alongside an artifact
pub type ArtifactMetadata = BTreeMap<String, String>;

/// Describes an artifact being stored
///
/// One artifact may be addressable by several rule keys, e.g. when two
/// independent targets legitimately produce byte-identical output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactInfo {
    rule_keys: Vec<RuleKey>,
    metadata: ArtifactMetadata,
}

impl ArtifactInfo {
    /// Start building an artifact description
    #[must_use]
    pub fn builder() -> ArtifactInfoBuilder {
        ArtifactInfoBuilder::default()
    }

    /// Rule keys in insertion order; never empty
    #[must_use]
    pub fn rule_keys(&self) -> &[RuleKey] {
        &self.rule_keys
    }

    /// The key the artifact is written under first
    #[must_use]
    pub fn primary_key(&self) -> &RuleKey {
        // `build` rejects an empty key set
        &self.rule_keys[0]
    }

    /// Keys the artifact is duplicated to after the primary one
    #[must_use]
    pub fn secondary_keys(&self) -> &[RuleKey] {
        &self.rule_keys[1..]
    }

    /// Metadata to persist in the sidecar
    #[must_use]
    pub fn metadata(&self) -> &ArtifactMetadata {
        &self.metadata
    }
}

/// Builder for [`ArtifactInfo`]
#[derive(Debug, Default, Clone)]
pub struct ArtifactInfoBuilder {
    rule_keys: Vec<RuleKey>,
    metadata: ArtifactMetadata,
}

impl ArtifactInfoBuilder {
    /// Add a rule key; duplicates are ignored
    #[must_use]
    pub fn rule_key(mut self, key: RuleKey) -> Self {
        if !self.rule_keys.contains(&key) {
            self.rule_keys.push(key);
        }
        self
    }

    /// Add several rule keys
    #[must_use]
    pub fn rule_keys(self, keys: impl IntoIterator<Item = RuleKey>) -> Self {
        keys.into_iter().fold(self, Self::rule_key)
    }

    /// Replace the metadata mapping
    #[must_use]
    pub fn metadata(mut self, metadata: ArtifactMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Add a single metadata entry
    #[must_use]
    pub fn metadata_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Finish building
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyArtifactInfo`] if no rule key was added.
    pub fn build(self) -> Result<ArtifactInfo> {
        if self.rule_keys.is_empty() {
            return Err(Error::EmptyArtifactInfo);
        }
        Ok(ArtifactInfo {
            rule_keys: self.rule_keys,
            metadata: self.metadata,
        })
    }
}

/// Outcome of a fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CacheResultType {
    /// The artifact was found and copied to the destination
    Hit,
    /// Nothing is stored under the key
    Miss,
    /// An entry exists but could not be read
    Error,
}

impl CacheResultType {
    /// Whether the artifact was retrieved
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Hit)
    }
}

/// Result of a single fetch call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheResult {
    kind: CacheResultType,
    #[serde(skip_serializing_if = "Option::is_none")]
    cache_source: Option<String>,
    #[serde(default)]
    metadata: ArtifactMetadata,
    #[serde(default)]
    artifact_size_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_message: Option<String>,
}

impl CacheResult {
    /// A hit served by the named cache
    #[must_use]
    pub fn hit(
        cache_source: impl Into<String>,
        metadata: ArtifactMetadata,
        artifact_size_bytes: u64,
    ) -> Self {
        Self {
            kind: CacheResultType::Hit,
            cache_source: Some(cache_source.into()),
            metadata,
            artifact_size_bytes,
            error_message: None,
        }
    }

    /// A miss: empty metadata and zero size
    #[must_use]
    pub fn miss() -> Self {
        Self {
            kind: CacheResultType::Miss,
            cache_source: None,
            metadata: ArtifactMetadata::new(),
            artifact_size_bytes: 0,
            error_message: None,
        }
    }

    /// A failure reading an entry that nominally exists
    #[must_use]
    pub fn error(cache_source: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: CacheResultType::Error,
            cache_source: Some(cache_source.into()),
            metadata: ArtifactMetadata::new(),
            artifact_size_bytes: 0,
            error_message: Some(message.into()),
        }
    }

    /// Result kind
    #[must_use]
    pub const fn kind(&self) -> CacheResultType {
        self.kind
    }

    /// Name of the cache that produced this result (hits and errors)
    #[must_use]
    pub fn cache_source(&self) -> Option<&str> {
        self.cache_source.as_deref()
    }

    /// Metadata stored with the artifact; empty on miss
    #[must_use]
    pub fn metadata(&self) -> &ArtifactMetadata {
        &self.metadata
    }

    /// Size of the stored data file; zero unless a hit
    #[must_use]
    pub const fn artifact_size_bytes(&self) -> u64 {
        self.artifact_size_bytes
    }

    /// Rendered error, for `Error` results
    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }
}

/// Source file handed to a store, with the caller's ownership intent
///
/// A borrowable path transfers ownership: the cache may move the file into
/// place and the caller must not expect it to exist afterwards. A
/// non-borrowable path is only read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BorrowablePath<'a> {
    /// The cache may take the file
    Borrowable(PathBuf),
    /// The cache must copy the file and leave it untouched
    NotBorrowable(&'a Path),
}

impl<'a> BorrowablePath<'a> {
    /// A path the cache may take ownership of
    #[must_use]
    pub fn borrowable(path: impl Into<PathBuf>) -> Self {
        Self::Borrowable(path.into())
    }

    /// A path the cache may only copy from
    #[must_use]
    pub const fn not_borrowable(path: &'a Path) -> Self {
        Self::NotBorrowable(path)
    }

    /// The underlying path
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::Borrowable(path) => path,
            Self::NotBorrowable(path) => path,
        }
    }

    /// Whether the cache may move the file
    #[must_use]
    pub const fn is_borrowable(&self) -> bool {
        matches!(self, Self::Borrowable(_))
    }
}
