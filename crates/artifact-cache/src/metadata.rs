//! Metadata sidecar codec
//!
//! The sidecar holds the artifact's metadata as a JSON object. The mapping is
//! a `BTreeMap`, so the encoding is deterministic for a given mapping.

use crate::artifact::ArtifactMetadata;
use crate::{Error, Result};

/// Encode metadata for the sidecar file
pub fn encode(metadata: &ArtifactMetadata) -> Result<Vec<u8>> {
    serde_json::to_vec(metadata)
        .map_err(|e| Error::serialization(format!("Failed to encode artifact metadata: {e}")))
}

/// Decode a sidecar file's contents
///
/// An empty file decodes to an empty mapping.
pub fn decode(bytes: &[u8]) -> Result<ArtifactMetadata> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(ArtifactMetadata::new());
    }
    serde_json::from_slice(bytes)
        .map_err(|e| Error::serialization(format!("Failed to parse artifact metadata: {e}")))
}
