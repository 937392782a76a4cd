//! Identifier newtypes
//!
//! Restrictions are keyed by the Discord snowflake while violation records are
//! keyed by the backend's numeric user id. The two never mix implicitly.

use std::str::FromStr;
use std::sync::Arc;

use dashmap::DashMap;
use derive_more::{Display, From};
use poise::serenity_prelude::UserId;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Backend-assigned violation id
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, From, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ViolationId(pub i64);

/// Backend-internal numeric user id
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, From, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct InternalUserId(pub i64);

/// Discord user snowflake
///
/// Serialized as a string, the way Discord ids travel over JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, From)]
pub struct PlatformUserId(pub u64);

impl PlatformUserId {
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Convert into serenity's id type. Snowflakes are never zero.
    #[must_use]
    pub fn to_user_id(self) -> UserId {
        UserId::new(self.0)
    }
}

impl From<UserId> for PlatformUserId {
    fn from(id: UserId) -> Self {
        Self(id.get())
    }
}

impl FromStr for PlatformUserId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

impl Serialize for PlatformUserId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for PlatformUserId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(u64),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Text(text) => text.parse().map_err(serde::de::Error::custom),
            Raw::Number(number) => Ok(Self(number)),
        }
    }
}

/// Two-way cache between platform and internal user ids
#[derive(Clone, Default)]
pub struct IdentityMap {
    by_platform: Arc<DashMap<PlatformUserId, InternalUserId>>,
    by_internal: Arc<DashMap<InternalUserId, PlatformUserId>>,
}

impl IdentityMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember a resolved pair in both directions
    pub fn insert(&self, platform: PlatformUserId, internal: InternalUserId) {
        self.by_platform.insert(platform, internal);
        self.by_internal.insert(internal, platform);
    }

    #[must_use]
    pub fn internal_for(&self, platform: PlatformUserId) -> Option<InternalUserId> {
        self.by_platform.get(&platform).map(|entry| *entry.value())
    }

    #[must_use]
    pub fn platform_for(&self, internal: InternalUserId) -> Option<PlatformUserId> {
        self.by_internal.get(&internal).map(|entry| *entry.value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_id_serializes_as_string() {
        let id = PlatformUserId(123_456_789_012_345_678);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"123456789012345678\"");

        let parsed: PlatformUserId = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, id);

        // Numeric payloads are accepted too
        let parsed: PlatformUserId = serde_json::from_str("42").unwrap();
        assert_eq!(parsed, PlatformUserId(42));

        assert!(serde_json::from_str::<PlatformUserId>("\"not-a-number\"").is_err());
    }

    #[test]
    fn test_identity_map_both_directions() {
        let map = IdentityMap::new();
        assert!(map.internal_for(PlatformUserId(10)).is_none());

        map.insert(PlatformUserId(10), InternalUserId(7));
        assert_eq!(map.internal_for(PlatformUserId(10)), Some(InternalUserId(7)));
        assert_eq!(map.platform_for(InternalUserId(7)), Some(PlatformUserId(10)));
        assert!(map.platform_for(InternalUserId(8)).is_none());
    }
}
