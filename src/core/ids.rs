//! Identifiers
//!
//! Strongly typed ids for players, content records, artifacts and
//! rate-limit violations. All implement `Ord` so they can key `BTreeMap`s
//! and iterate in a stable order.

use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// PLAYER ID
// =============================================================================

/// Unique player identifier (UUID as bytes).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct PlayerId(pub [u8; 16]);

impl PlayerId {
    /// Create from raw bytes.
    pub const fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Create from UUID string.
    pub fn from_uuid_str(s: &str) -> Option<Self> {
        uuid::Uuid::parse_str(s).ok().map(|u| Self(*u.as_bytes()))
    }

    /// Convert to UUID string.
    pub fn to_uuid_string(&self) -> String {
        uuid::Uuid::from_bytes(self.0).to_string()
    }

    /// Get raw bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// First four bytes as hex, for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_uuid_string())
    }
}

// =============================================================================
// STRING IDS
// =============================================================================

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Create from anything string-like.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Borrow as `&str`.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(
    /// Content record id (level, difficulty or question).
    RecordId
);

string_id!(
    /// Collectible artifact granted at a level threshold.
    ArtifactId
);

/// Rate-limit violation record id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ViolationId(pub uuid::Uuid);

impl ViolationId {
    /// Fresh random id.
    pub fn new_v4() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl fmt::Display for ViolationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_player_id_uuid_roundtrip() {
        let id = PlayerId::new([7; 16]);
        let s = id.to_uuid_string();
        assert_eq!(PlayerId::from_uuid_str(&s), Some(id));
        assert_eq!(id.to_string(), s);
    }

    #[test]
    fn test_player_id_rejects_garbage() {
        assert!(PlayerId::from_uuid_str("not-a-uuid").is_none());
    }

    #[test]
    fn test_short_is_eight_hex_chars() {
        let id = PlayerId::new([0xab; 16]);
        assert_eq!(id.short(), "abababab");
    }

    #[test]
    fn test_string_ids_serialize_transparently() {
        let id = RecordId::new("q-17");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"q-17\"");
        let artifact: ArtifactId = serde_json::from_str("\"star-wand\"").unwrap();
        assert_eq!(artifact.as_str(), "star-wand");
    }
}
