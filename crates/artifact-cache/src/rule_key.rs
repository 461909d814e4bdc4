//! Rule keys: the fingerprints artifacts are stored under

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Fingerprint of a build step's transitive inputs, as lowercase hex
///
/// The key is opaque to the cache: it is only compared by value and used as a
/// file name component, so the only requirement is that it is non-empty hex.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RuleKey(String);

impl RuleKey {
    /// Create a rule key from its hex representation
    ///
    /// Upper-case digits are normalized to lower case.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRuleKey`] if the string is empty or contains
    /// anything other than hexadecimal digits.
    pub fn new(hex: impl Into<String>) -> Result<Self> {
        let s = hex.into();
        if s.is_empty() {
            return Err(Error::invalid_rule_key(s, "rule key is empty"));
        }
        if !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Error::invalid_rule_key(s, "rule key must be hexadecimal"));
        }
        Ok(Self(s.to_ascii_lowercase()))
    }

    /// Get the hex representation
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RuleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RuleKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for RuleKey {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<RuleKey> for String {
    fn from(key: RuleKey) -> Self {
        key.0
    }
}

impl AsRef<str> for RuleKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
