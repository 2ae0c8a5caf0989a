//! Capability identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Maximum length of a capability id in bytes.
pub const MAX_ID_LEN: usize = 64;

/// Unique, stable capability identifier within one registry.
///
/// Ids double as install directory names, so they are restricted to
/// lowercase ASCII alphanumerics, `-` and `_`, must not start or end with
/// a separator, and are at most [`MAX_ID_LEN`] bytes long.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct CapabilityId(String);

/// Deserialize with validation so a crafted state or cache file cannot
/// smuggle a path component through an id.
impl<'de> Deserialize<'de> for CapabilityId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::new(s).map_err(serde::de::Error::custom)
    }
}

impl CapabilityId {
    /// Create a new `CapabilityId`, validating the format.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidId`] if the id is empty, too long, or
    /// contains characters outside the allowed set.
    pub fn new(id: impl Into<String>) -> CoreResult<Self> {
        let id = id.into();
        Self::validate(&id)?;
        Ok(Self(id))
    }

    /// Create a `CapabilityId` without validation (for tests and constants).
    #[must_use]
    pub fn from_static(id: &str) -> Self {
        Self(id.to_string())
    }

    /// Get the inner string value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check whether a string is a valid capability id.
    #[must_use]
    pub fn is_valid_id(id: &str) -> bool {
        Self::validate(id).is_ok()
    }

    fn validate(id: &str) -> CoreResult<()> {
        if id.is_empty() {
            return Err(CoreError::InvalidId("id must not be empty".into()));
        }
        if id.len() > MAX_ID_LEN {
            return Err(CoreError::InvalidId(format!(
                "id must be at most {MAX_ID_LEN} bytes, got {}",
                id.len()
            )));
        }
        if !id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
        {
            return Err(CoreError::InvalidId(format!(
                "id must contain only lowercase alphanumerics, '-' and '_', got: {id}"
            )));
        }
        let is_sep = |c: char| c == '-' || c == '_';
        if id.starts_with(is_sep) || id.ends_with(is_sep) {
            return Err(CoreError::InvalidId(format!(
                "id must not start or end with a separator, got: {id}"
            )));
        }
        Ok(())
    }
}

impl fmt::Display for CapabilityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CapabilityId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::str::FromStr for CapabilityId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_typical_ids() {
        for id in ["demo", "web-search", "rag_chat", "agent2"] {
            assert!(CapabilityId::is_valid_id(id), "{id} should be valid");
        }
    }

    #[test]
    fn rejects_path_like_ids() {
        for id in ["", "../etc", "a/b", "Demo", "-lead", "trail_", "has space"] {
            assert!(
                matches!(CapabilityId::new(id), Err(CoreError::InvalidId(_))),
                "{id:?} should be rejected"
            );
        }
    }

    #[test]
    fn rejects_overlong_id() {
        let id = "a".repeat(MAX_ID_LEN + 1);
        assert!(CapabilityId::new(id).is_err());
    }

    #[test]
    fn deserialize_validates() {
        let ok: CapabilityId = serde_json::from_str("\"demo\"").unwrap();
        assert_eq!(ok.as_str(), "demo");

        let bad: Result<CapabilityId, _> = serde_json::from_str("\"../../x\"");
        assert!(bad.is_err());
    }
}
