//! Configuration for directory caches

use crate::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable overriding the default cache directory
pub const CACHE_DIR_ENV: &str = "ARTIFACT_CACHE_DIR";

/// Whether a cache accepts stores
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheMode {
    /// Fetch and store
    #[default]
    ReadWrite,
    /// Fetch only; stores are silently skipped
    ReadOnly,
}

impl CacheMode {
    /// Whether stores write to disk
    #[must_use]
    pub const fn stores(self) -> bool {
        matches!(self, Self::ReadWrite)
    }
}

/// Configuration of a directory cache
///
/// In TOML this is the `[cache]` table:
///
/// ```toml
/// [cache]
/// dir = "/var/cache/build"
/// dir_max_size = "10GB"
/// dir_mode = "readwrite"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DirCacheConfig {
    /// Label used in logs and cache results
    #[serde(default = "default_name")]
    pub name: String,

    /// Cache directory; resolved from the environment when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,

    /// Size budget in bytes; no eviction when absent
    #[serde(
        default,
        rename = "dir_max_size",
        alias = "max_size",
        deserialize_with = "deserialize_size",
        skip_serializing_if = "Option::is_none"
    )]
    pub max_size_bytes: Option<u64>,

    /// Read/write mode
    #[serde(default, rename = "dir_mode", alias = "mode")]
    pub mode: CacheMode,
}

impl Default for DirCacheConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            dir: None,
            max_size_bytes: None,
            mode: CacheMode::default(),
        }
    }
}

#[derive(Deserialize)]
struct ConfigFile {
    #[serde(default)]
    cache: DirCacheConfig,
}

impl DirCacheConfig {
    /// Configuration for the given directory with defaults otherwise
    #[must_use]
    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
            ..Self::default()
        }
    }

    /// Parse the `[cache]` table of a TOML document
    ///
    /// A document without the table yields the default configuration.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(text)
            .map_err(|e| Error::configuration(format!("Invalid cache configuration: {e}")))?;
        Ok(file.cache)
    }

    /// The configured directory, or the default one for this machine
    pub fn cache_dir(&self) -> Result<PathBuf> {
        match &self.dir {
            Some(dir) => Ok(dir.clone()),
            None => default_cache_dir(),
        }
    }
}

fn default_name() -> String {
    "dir".to_string()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SizeValue {
    Bytes(u64),
    Text(String),
}

fn deserialize_size<'de, D>(deserializer: D) -> std::result::Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<SizeValue> = Option::deserialize(deserializer)?;
    match value {
        None => Ok(None),
        Some(SizeValue::Bytes(n)) => Ok(Some(n)),
        Some(SizeValue::Text(s)) => parse_size(&s).map(Some).map_err(serde::de::Error::custom),
    }
}

/// Parse a human size such as `"512"`, `"10KB"`, `"1.5 MB"` or `"10GB"`
///
/// Units are binary multiples (1 KB = 1024 bytes) and case-insensitive.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn parse_size(text: &str) -> Result<u64> {
    let trimmed = text.trim();
    let split = trimmed
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(split);

    let multiplier: u64 = match unit.trim().to_ascii_uppercase().as_str() {
        "" | "B" => 1,
        "K" | "KB" | "KIB" => 1 << 10,
        "M" | "MB" | "MIB" => 1 << 20,
        "G" | "GB" | "GIB" => 1 << 30,
        "T" | "TB" | "TIB" => 1 << 40,
        other => {
            return Err(Error::configuration(format!(
                "Unknown size unit {other:?} in {text:?}"
            )));
        }
    };

    if number.is_empty() {
        return Err(Error::configuration(format!("Missing number in size {text:?}")));
    }

    if let Ok(whole) = number.parse::<u64>() {
        return whole
            .checked_mul(multiplier)
            .ok_or_else(|| Error::configuration(format!("Size {text:?} is too large")));
    }

    let fractional: f64 = number
        .parse()
        .map_err(|_| Error::configuration(format!("Invalid number in size {text:?}")))?;
    let bytes = fractional * multiplier as f64;
    if !bytes.is_finite() || bytes >= u64::MAX as f64 {
        return Err(Error::configuration(format!("Size {text:?} is too large")));
    }
    Ok(bytes.floor() as u64)
}

/// Format bytes as a human-readable size (e.g., "1.5 GB")
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}

/// Inputs for determining the default cache directory
#[derive(Debug, Clone, Default)]
pub struct CacheDirInputs {
    /// Explicit override (`ARTIFACT_CACHE_DIR`)
    pub override_dir: Option<PathBuf>,
    /// `XDG_CACHE_HOME`
    pub xdg_cache_home: Option<PathBuf>,
    /// Platform cache directory
    pub os_cache_dir: Option<PathBuf>,
    /// Home directory
    pub home_dir: Option<PathBuf>,
    /// Temporary directory
    pub temp_dir: PathBuf,
}

impl CacheDirInputs {
    /// Read the inputs from the process environment
    #[must_use]
    pub fn from_env() -> Self {
        let non_empty = |var: &str| {
            std::env::var(var)
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from)
        };
        Self {
            override_dir: non_empty(CACHE_DIR_ENV),
            xdg_cache_home: non_empty("XDG_CACHE_HOME"),
            os_cache_dir: dirs::cache_dir(),
            home_dir: dirs::home_dir(),
            temp_dir: std::env::temp_dir(),
        }
    }
}

/// Pick the first writable candidate directory
///
/// Resolution order:
/// 1) `ARTIFACT_CACHE_DIR` (explicit override)
/// 2) `XDG_CACHE_HOME/artifact-cache`
/// 3) OS cache dir/artifact-cache
/// 4) `~/.artifact-cache`
/// 5) `TMPDIR/artifact-cache` (fallback)
pub fn resolve_cache_dir(inputs: CacheDirInputs) -> Result<PathBuf> {
    let mut candidates: Vec<PathBuf> = Vec::new();

    if let Some(dir) = inputs.override_dir.filter(|p| !p.as_os_str().is_empty()) {
        candidates.push(dir);
    }
    if let Some(xdg) = inputs.xdg_cache_home {
        candidates.push(xdg.join("artifact-cache"));
    }
    if let Some(os_cache) = inputs.os_cache_dir {
        candidates.push(os_cache.join("artifact-cache"));
    }
    if let Some(home) = inputs.home_dir {
        candidates.push(home.join(".artifact-cache"));
    }
    candidates.push(inputs.temp_dir.join("artifact-cache"));

    for path in candidates {
        // Nix builds point HOME at a directory that never exists
        if path.starts_with("/homeless-shelter") {
            continue;
        }
        if std::fs::create_dir_all(&path).is_ok() && is_writable(&path) {
            return Ok(path);
        }
        tracing::debug!(path = %path.display(), "Cache directory candidate not writable");
    }
    Err(Error::configuration(
        "Failed to determine a writable cache directory",
    ))
}

/// The default cache directory for this process
pub fn default_cache_dir() -> Result<PathBuf> {
    resolve_cache_dir(CacheDirInputs::from_env())
}

/// Check a directory for write access by creating and removing a file
pub(crate) fn is_writable(dir: &Path) -> bool {
    let marker = dir.join(".write_check");
    match std::fs::OpenOptions::new()
        .create(true)
        .truncate(true)
        .write(true)
        .open(&marker)
    {
        Ok(_) => {
            let _ = std::fs::remove_file(&marker);
            true
        }
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn parse_size_units() {
        assert_eq!(parse_size("512").unwrap(), 512);
        assert_eq!(parse_size("0").unwrap(), 0);
        assert_eq!(parse_size("10KB").unwrap(), 10 * 1024);
        assert_eq!(parse_size("1.5 MB").unwrap(), 1024 * 1024 * 3 / 2);
        assert_eq!(parse_size("10GB").unwrap(), 10 * 1024 * 1024 * 1024);
        assert_eq!(parse_size(" 2 tb ").unwrap(), 2 * (1u64 << 40));
        assert_eq!(parse_size("3b").unwrap(), 3);
    }

    #[test]
    fn parse_size_rejects_garbage() {
        assert!(parse_size("").is_err());
        assert!(parse_size("GB").is_err());
        assert!(parse_size("10 parsecs").is_err());
        assert!(parse_size("1.2.3MB").is_err());
        assert!(parse_size("99999999999TB").is_err());
    }

    #[test]
    fn format_bytes_scales() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1023), "1023 B");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(10 * 1024 * 1024), "10.0 MB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3.0 GB");
    }

    #[test]
    fn config_defaults() {
        let config = DirCacheConfig::default();
        assert_eq!(config.name, "dir");
        assert_eq!(config.mode, CacheMode::ReadWrite);
        assert!(config.max_size_bytes.is_none());
        assert!(config.dir.is_none());
    }

    #[test]
    fn config_from_toml() {
        let config = DirCacheConfig::from_toml_str(
            r#"
            [cache]
            dir = "/var/cache/build"
            dir_max_size = "10GB"
            dir_mode = "readonly"
            "#,
        )
        .unwrap();
        assert_eq!(config.dir, Some(PathBuf::from("/var/cache/build")));
        assert_eq!(config.max_size_bytes, Some(10 * 1024 * 1024 * 1024));
        assert_eq!(config.mode, CacheMode::ReadOnly);
        assert!(!config.mode.stores());
    }

    #[test]
    fn config_from_toml_numeric_size() {
        let config = DirCacheConfig::from_toml_str("[cache]\ndir_max_size = 0\n").unwrap();
        assert_eq!(config.max_size_bytes, Some(0));
    }

    #[test]
    fn config_without_table_is_default() {
        let config = DirCacheConfig::from_toml_str("[other]\nkey = 1\n").unwrap();
        assert_eq!(config, DirCacheConfig::default());
    }

    #[test]
    fn config_rejects_bad_size_and_mode() {
        assert!(DirCacheConfig::from_toml_str("[cache]\ndir_max_size = \"lots\"\n").is_err());
        assert!(DirCacheConfig::from_toml_str("[cache]\ndir_mode = \"sometimes\"\n").is_err());
    }

    #[test]
    fn config_serializes_with_config_keys() {
        let config = DirCacheConfig {
            max_size_bytes: Some(1024),
            ..DirCacheConfig::with_dir("/c")
        };
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["dir_max_size"], 1024);
        assert_eq!(json["dir_mode"], "readwrite");
    }

    #[test]
    fn cache_dir_prefers_explicit_dir() {
        let config = DirCacheConfig::with_dir("/explicit");
        assert_eq!(config.cache_dir().unwrap(), PathBuf::from("/explicit"));
    }

    #[test]
    fn resolve_respects_override() {
        let tmp = TempDir::new().unwrap();
        let override_dir = tmp.path().join("override");
        let inputs = CacheDirInputs {
            override_dir: Some(override_dir.clone()),
            temp_dir: tmp.path().to_path_buf(),
            ..CacheDirInputs::default()
        };
        assert_eq!(resolve_cache_dir(inputs).unwrap(), override_dir);
        assert!(override_dir.is_dir());
    }

    #[test]
    fn resolve_skips_homeless_shelter() {
        let tmp = TempDir::new().unwrap();
        let inputs = CacheDirInputs {
            override_dir: None,
            xdg_cache_home: Some(PathBuf::from("/homeless-shelter/.cache")),
            os_cache_dir: None,
            home_dir: Some(PathBuf::from("/homeless-shelter")),
            temp_dir: tmp.path().to_path_buf(),
        };
        let dir = resolve_cache_dir(inputs).unwrap();
        assert_eq!(dir, tmp.path().join("artifact-cache"));
    }

    #[test]
    fn resolve_uses_xdg_before_home() {
        let tmp = TempDir::new().unwrap();
        let inputs = CacheDirInputs {
            override_dir: None,
            xdg_cache_home: Some(tmp.path().join("xdg")),
            os_cache_dir: None,
            home_dir: Some(tmp.path().join("home")),
            temp_dir: tmp.path().to_path_buf(),
        };
        assert_eq!(
            resolve_cache_dir(inputs).unwrap(),
            tmp.path().join("xdg").join("artifact-cache")
        );
    }

    #[test]
    fn writable_check_leaves_nothing_behind() {
        let tmp = TempDir::new().unwrap();
        assert!(is_writable(tmp.path()));
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
        assert!(!is_writable(&tmp.path().join("missing")));
    }
}
