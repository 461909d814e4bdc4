//! Error types for the artifact cache

// Rust 1.92 compiler bug: false positives for thiserror/miette derive macro fields
// https://github.com/rust-lang/rust/issues/147648
#![allow(unused_assignments)]

use miette::Diagnostic;
use std::path::Path;
use thiserror::Error;

/// Error type for artifact cache operations
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// I/O error while reading or writing the cache directory
    #[error("I/O {operation} failed{}", path.as_ref().map_or(String::new(), |p| format!(": {}", p.display())))]
    #[diagnostic(
        code(artifact_cache::io),
        help("Check file permissions and free space on the cache volume")
    )]
    Io {
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
        /// Path that caused the error, if available
        path: Option<Box<Path>>,
        /// Operation that failed (e.g., "copy", "rename", "create_dir_all")
        operation: String,
    },

    /// Configuration or construction error
    #[error("Cache configuration error: {message}")]
    #[diagnostic(code(artifact_cache::config))]
    Configuration {
        /// Error message describing the configuration issue
        message: String,
    },

    /// A rule key that cannot be used as a cache address
    #[error("Invalid rule key {key:?}: {reason}")]
    #[diagnostic(
        code(artifact_cache::invalid_rule_key),
        help("Rule keys are non-empty hexadecimal strings")
    )]
    InvalidRuleKey {
        /// The rejected key text
        key: String,
        /// Why it was rejected
        reason: String,
    },

    /// An artifact description without any rule key
    #[error("Artifact info requires at least one rule key")]
    #[diagnostic(code(artifact_cache::empty_artifact_info))]
    EmptyArtifactInfo,

    /// Metadata sidecar encode/decode failure
    #[error("Serialization error: {message}")]
    #[diagnostic(code(artifact_cache::serialization))]
    Serialization {
        /// Error message describing the serialization issue
        message: String,
    },
}

impl Error {
    /// Create a configuration error
    #[must_use]
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
        }
    }

    /// Create an I/O error with path context
    #[must_use]
    pub fn io(
        source: std::io::Error,
        path: impl AsRef<Path>,
        operation: impl Into<String>,
    ) -> Self {
        Self::Io {
            source,
            path: Some(path.as_ref().into()),
            operation: operation.into(),
        }
    }

    /// Create an I/O error without path context
    #[must_use]
    pub fn io_no_path(source: std::io::Error, operation: impl Into<String>) -> Self {
        Self::Io {
            source,
            path: None,
            operation: operation.into(),
        }
    }

    /// Create an invalid rule key error
    #[must_use]
    pub fn invalid_rule_key(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidRuleKey {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Create a serialization error
    #[must_use]
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

    /// True when the underlying cause is a missing file or directory
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
    }
}

/// Result type for artifact cache operations
pub type Result<T> = std::result::Result<T, Error>;
