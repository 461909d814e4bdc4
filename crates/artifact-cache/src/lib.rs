//! Local directory artifact cache for build systems
//!
//! A build step's output is stored under a rule key, a fingerprint of all of
//! its inputs. A later build computing the same rule key fetches the stored
//! output instead of running the step again.
//!
//! # Overview
//!
//! - Entries are sharded by rule key: `<dir>/<key[0:2]>/<key[2:4]>/<key>`,
//!   with the metadata in a `<key>.metadata` sidecar next to the data file
//! - Every file is published by atomic rename, so concurrent readers never
//!   see partial content
//! - One artifact can be stored under several rule keys at once
//! - An optional size budget evicts the least recently fetched entries
//!
//! There is no in-memory index. The directory is the only state, and any
//! number of threads or processes may share it.
//!
//! # Example
//!
//! ```no_run
//! use artifact_cache::{ArtifactCache, ArtifactInfo, BorrowablePath, DirArtifactCache, RuleKey};
//! use std::path::Path;
//!
//! # fn main() -> artifact_cache::Result<()> {
//! let root = Path::new("/var/cache");
//! let cache = DirArtifactCache::new("dir", root, "build", true, Some(1 << 30))?;
//! let key = RuleKey::new("aabb0123123234e324")?;
//!
//! let info = ArtifactInfo::builder().rule_key(key.clone()).build()?;
//! cache.store(&info, BorrowablePath::not_borrowable(Path::new("out/app.jar")))?;
//!
//! let result = cache.fetch(&key, Path::new("restored/app.jar"));
//! assert!(result.kind().is_success());
//! # Ok(())
//! # }
//! ```

// TODO(cache-docs): Add # Errors documentation to the remaining fallible public functions
#![expect(
    clippy::missing_errors_doc,
    reason = "Error documentation to be added incrementally"
)]

mod artifact;
mod cache;
pub mod config;
mod dir;
mod error;
pub mod evict;
pub mod layout;
mod lock;
pub mod metadata;
mod publish;
mod rule_key;

// Re-export error types at crate root
pub use error::{Error, Result};

// Re-export main types
pub use artifact::{
    ArtifactInfo, ArtifactInfoBuilder, ArtifactMetadata, BorrowablePath, CacheResult,
    CacheResultType,
};
pub use cache::ArtifactCache;
pub use config::{CacheMode, DirCacheConfig, format_bytes, parse_size};
pub use dir::{CacheStats, DirArtifactCache};
pub use evict::EvictionStats;
pub use rule_key::RuleKey;
