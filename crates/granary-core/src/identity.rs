//! Grain identity
//!
//! TigerStyle: Explicit validation on construction, immutable afterwards.

use crate::constants::*;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// =============================================================================
// GrainType
// =============================================================================

/// Tag naming a registered grain type (e.g. `square`, `cube`)
///
/// Type tags are ASCII alphanumerics plus `-`, `_` and `.`.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GrainType(String);

impl GrainType {
    /// Create a new grain type tag with validation
    pub fn new(tag: impl Into<String>) -> Result<Self> {
        let tag = tag.into();

        if tag.is_empty() {
            return Err(Error::invalid_identity(
                tag,
                "grain type must not be empty",
            ));
        }

        if tag.len() > GRAIN_TYPE_LENGTH_BYTES_MAX {
            return Err(Error::invalid_identity(
                tag.clone(),
                format!(
                    "grain type length {} exceeds limit {}",
                    tag.len(),
                    GRAIN_TYPE_LENGTH_BYTES_MAX
                ),
            ));
        }

        let valid = tag
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.');
        if !valid {
            return Err(Error::invalid_identity(
                tag,
                "grain type contains invalid characters",
            ));
        }

        Ok(Self(tag))
    }

    /// Get the tag as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GrainType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for GrainType {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<GrainType> for String {
    fn from(value: GrainType) -> Self {
        value.0
    }
}

impl AsRef<str> for GrainType {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// =============================================================================
// GrainKey
// =============================================================================

/// Caller-chosen key of a grain
///
/// Keys are opaque: the runtime only compares and hashes them.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum GrainKey {
    /// 128-bit key (GUID-keyed grains)
    Uuid(Uuid),
    /// Free-form string key
    String(String),
}

impl GrainKey {
    /// Generate a fresh random UUID key
    pub fn random() -> Self {
        Self::Uuid(Uuid::new_v4())
    }

    /// Check that the key is not the zero/empty value
    fn validate(&self) -> std::result::Result<(), String> {
        match self {
            GrainKey::Uuid(uuid) if uuid.is_nil() => Err("key must not be the nil UUID".into()),
            GrainKey::String(s) if s.is_empty() => Err("key must not be empty".into()),
            GrainKey::String(s) if s.len() > GRAIN_KEY_LENGTH_BYTES_MAX => Err(format!(
                "key length {} exceeds limit {}",
                s.len(),
                GRAIN_KEY_LENGTH_BYTES_MAX
            )),
            GrainKey::String(s) if s.chars().any(char::is_control) => {
                Err("key contains control characters".into())
            }
            _ => Ok(()),
        }
    }
}

impl fmt::Display for GrainKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GrainKey::Uuid(uuid) => write!(f, "{}", uuid),
            GrainKey::String(s) => f.write_str(s),
        }
    }
}

impl From<Uuid> for GrainKey {
    fn from(value: Uuid) -> Self {
        GrainKey::Uuid(value)
    }
}

impl From<String> for GrainKey {
    fn from(value: String) -> Self {
        GrainKey::String(value)
    }
}

impl From<&str> for GrainKey {
    fn from(value: &str) -> Self {
        GrainKey::String(value.to_string())
    }
}

// =============================================================================
// GrainId
// =============================================================================

/// Identity of a grain: type tag plus key
///
/// Equal identities address the same logical grain for the lifetime of the
/// process. Construction rejects the nil UUID and the empty string as keys.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawGrainId")]
pub struct GrainId {
    grain_type: GrainType,
    key: GrainKey,
}

impl GrainId {
    /// Create a new GrainId with validation
    ///
    /// # Errors
    /// Returns `InvalidIdentity` if the type tag is malformed or the key is
    /// the zero/empty value.
    pub fn new(grain_type: impl AsRef<str>, key: impl Into<GrainKey>) -> Result<Self> {
        let grain_type = GrainType::new(grain_type.as_ref())?;
        Self::with_type(grain_type, key)
    }

    /// Create a GrainId from an already validated type tag
    pub fn with_type(grain_type: GrainType, key: impl Into<GrainKey>) -> Result<Self> {
        let key = key.into();

        if let Err(reason) = key.validate() {
            return Err(Error::invalid_identity(
                format!("{}/{}", grain_type, key),
                reason,
            ));
        }

        Ok(Self { grain_type, key })
    }

    /// Create a GrainId with a fresh random UUID key
    pub fn random(grain_type: impl AsRef<str>) -> Result<Self> {
        Self::new(grain_type, GrainKey::random())
    }

    /// Get the grain type
    pub fn grain_type(&self) -> &GrainType {
        &self.grain_type
    }

    /// Get the key
    pub fn key(&self) -> &GrainKey {
        &self.key
    }
}

/// Unvalidated wire form of a [`GrainId`]
#[derive(Deserialize)]
struct RawGrainId {
    grain_type: GrainType,
    key: GrainKey,
}

impl fmt::Display for GrainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.grain_type, self.key)
    }
}

impl TryFrom<RawGrainId> for GrainId {
    type Error = Error;

    fn try_from(raw: RawGrainId) -> Result<Self> {
        Self::with_type(raw.grain_type, raw.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_grain_id_valid() {
        let key = Uuid::new_v4();
        let id = GrainId::new("square", key).unwrap();
        assert_eq!(id.grain_type().as_str(), "square");
        assert_eq!(id.key(), &GrainKey::Uuid(key));
        assert_eq!(id.to_string(), format!("square/{}", key));
    }

    #[test]
    fn test_grain_id_nil_uuid_rejected() {
        let result = GrainId::new("square", Uuid::nil());
        assert!(matches!(result, Err(Error::InvalidIdentity { .. })));
    }

    #[test]
    fn test_grain_id_empty_string_rejected() {
        let result = GrainId::new("cube", "");
        assert!(matches!(result, Err(Error::InvalidIdentity { .. })));
    }

    #[test]
    fn test_grain_id_key_too_long() {
        let long_key = "k".repeat(GRAIN_KEY_LENGTH_BYTES_MAX + 1);
        let result = GrainId::new("cube", long_key);
        assert!(matches!(result, Err(Error::InvalidIdentity { .. })));
    }

    #[test]
    fn test_grain_type_invalid_chars() {
        assert!(GrainType::new("square grain").is_err());
        assert!(GrainType::new("").is_err());
        assert!(GrainType::new("square.v2").is_ok());
    }

    #[test]
    fn test_equal_identities_hash_equal() {
        let key = Uuid::new_v4();
        let a = GrainId::new("square", key).unwrap();
        let b = GrainId::new("square", key).unwrap();
        let c = GrainId::new("cube", key).unwrap();

        let mut set = HashSet::new();
        set.insert(a.clone());
        assert!(set.contains(&b));
        assert!(!set.contains(&c));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_grain_id_serde() {
        let id = GrainId::new("cube", "alice").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        let back: GrainId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);

        let bad = r#"{"grain_type":"bad type","key":{"kind":"string","value":"a"}}"#;
        assert!(serde_json::from_str::<GrainId>(bad).is_err());

        let empty = r#"{"grain_type":"cube","key":{"kind":"string","value":""}}"#;
        assert!(serde_json::from_str::<GrainId>(empty).is_err());
    }
}
