//! Restriction snapshot on local disk
//!
//! A fast-path copy of the restriction cache used to enforce restrictions
//! before the backend has been consulted after a restart. Never authoritative.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::ids::PlatformUserId;
use super::violation::FeatureRestriction;
use super::WarningResult;

/// Current snapshot format
pub const SNAPSHOT_VERSION: u32 = 1;

const fn default_version() -> u32 {
    SNAPSHOT_VERSION
}

/// Restrictions per user at a point in time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestrictionSnapshot {
    /// Files written before versioning are version 1
    #[serde(default = "default_version")]
    pub version: u32,
    pub restrictions: BTreeMap<PlatformUserId, BTreeSet<FeatureRestriction>>,
    pub saved_at: DateTime<Utc>,
}

impl RestrictionSnapshot {
    #[must_use]
    pub fn new(
        restrictions: BTreeMap<PlatformUserId, BTreeSet<FeatureRestriction>>,
        saved_at: DateTime<Utc>,
    ) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            restrictions,
            saved_at,
        }
    }
}

/// Reads and writes the snapshot file
///
/// Clones share one write lock, so saves never interleave on the temp file.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Load the snapshot; a missing or unreadable file yields `None`
    pub async fn load(&self) -> Option<RestrictionSnapshot> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No restriction snapshot at {}", self.path.display());
                return None;
            }
            Err(e) => {
                warn!("Failed to read restriction snapshot {}: {e}", self.path.display());
                return None;
            }
        };

        match serde_json::from_str::<RestrictionSnapshot>(&content) {
            Ok(snapshot) if snapshot.version > SNAPSHOT_VERSION => {
                warn!(
                    "Ignoring restriction snapshot with unknown version {}",
                    snapshot.version
                );
                None
            }
            Ok(snapshot) => {
                info!(
                    users = snapshot.restrictions.len(),
                    saved_at = %snapshot.saved_at,
                    "Loaded restriction snapshot"
                );
                Some(snapshot)
            }
            Err(e) => {
                warn!("Ignoring corrupt restriction snapshot {}: {e}", self.path.display());
                None
            }
        }
    }

    /// Write the snapshot, replacing the previous file atomically
    ///
    /// Concurrent saves are serialized; the last one to take the lock wins.
    ///
    /// # Errors
    /// Returns an error if serialization or any file operation fails.
    pub async fn save(&self, snapshot: &RestrictionSnapshot) -> WarningResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let content = serde_json::to_string_pretty(snapshot)?;
        let tmp = self.path.with_extension("json.tmp");
        let _guard = self.write_lock.lock().await;
        fs::write(&tmp, content).await?;
        fs::rename(&tmp, &self.path).await?;

        debug!(
            users = snapshot.restrictions.len(),
            "Saved restriction snapshot to {}",
            self.path.display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RestrictionSnapshot {
        let mut restrictions = BTreeMap::new();
        restrictions.insert(
            PlatformUserId(111),
            BTreeSet::from([FeatureRestriction::MessageLink, FeatureRestriction::RateLimit]),
        );
        restrictions.insert(
            PlatformUserId(222),
            BTreeSet::from([FeatureRestriction::VoiceSpeak]),
        );
        RestrictionSnapshot::new(restrictions, Utc::now())
    }

    #[tokio::test]
    async fn test_save_then_load_reproduces_map() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("nested").join("restrictions.json"));
        let snapshot = sample();

        store.save(&snapshot).await.unwrap();
        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.restrictions, snapshot.restrictions);

        // Saving what was loaded yields the same map again
        store.save(&loaded).await.unwrap();
        assert_eq!(store.load().await.unwrap().restrictions, snapshot.restrictions);
    }

    #[tokio::test]
    async fn test_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("absent.json"));
        assert!(store.load().await.is_none());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("restrictions.json");
        tokio::fs::write(&path, "{ not json").await.unwrap();

        assert!(SnapshotStore::new(&path).load().await.is_none());
    }

    #[tokio::test]
    async fn test_unversioned_file_reads_as_v1() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("restrictions.json");
        let legacy = r#"{
            "restrictions": { "123456789": ["MESSAGE_EMBED", "TIMEOUT"] },
            "savedAt": "2024-05-01T12:00:00.000Z"
        }"#;
        tokio::fs::write(&path, legacy).await.unwrap();

        let loaded = SnapshotStore::new(&path).load().await.unwrap();
        assert_eq!(loaded.version, 1);
        assert_eq!(
            loaded.restrictions[&PlatformUserId(123_456_789)],
            BTreeSet::from([FeatureRestriction::MessageEmbed, FeatureRestriction::Timeout])
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_saves_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("restrictions.json"));

        for _ in 0..5 {
            let saves: Vec<_> = (0..8)
                .map(|_| {
                    let store = store.clone();
                    tokio::spawn(async move { store.save(&sample()).await })
                })
                .collect();
            for save in saves {
                save.await.unwrap().unwrap();
            }
        }

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.restrictions, sample().restrictions);
        assert!(!dir.path().join("restrictions.json.tmp").exists());
    }

    #[test]
    fn test_snapshot_keys_are_strings() {
        let value = serde_json::to_value(sample()).unwrap();
        assert_eq!(value["version"], 1);
        assert!(value["restrictions"]["111"].is_array());
        assert!(value["savedAt"].is_string());
    }
}
