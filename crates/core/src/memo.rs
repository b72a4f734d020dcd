//! Process-lifetime memoization.
//!
//! Pure caches: dropping or clearing them only costs performance. They are
//! owned by whoever builds the orchestrator environment rather than living
//! in globals, so tests can start from a clean slate.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::RwLock;

use crate::driver::Driver;
use crate::settings::ResolvedSettings;

/// Remote builds already completed this process, keyed by (url, scenario checksum).
#[derive(Debug, Default)]
pub struct RemoteBuildCache {
    entries: RwLock<HashMap<(String, String), ResolvedSettings>>,
}

impl RemoteBuildCache {
    pub async fn get(&self, url: &str, scenario_checksum: &str) -> Option<ResolvedSettings> {
        let entries = self.entries.read().await;
        entries.get(&(url.to_string(), scenario_checksum.to_string())).cloned()
    }

    pub async fn insert(&self, url: &str, settings: ResolvedSettings) {
        let key = (url.to_string(), settings.scenario_checksum.clone());
        self.entries.write().await.insert(key, settings);
    }

    pub async fn remove(&self, url: &str, scenario_checksum: &str) -> Option<ResolvedSettings> {
        let mut entries = self.entries.write().await;
        entries.remove(&(url.to_string(), scenario_checksum.to_string()))
    }

    pub async fn count(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }
}

/// Detected server versions, keyed by (connection, driver).
#[derive(Debug, Default)]
pub struct VersionCache {
    entries: RwLock<HashMap<(String, Driver), String>>,
}

impl VersionCache {
    pub async fn get(&self, connection: &str, driver: Driver) -> Option<String> {
        self.entries.read().await.get(&(connection.to_string(), driver)).cloned()
    }

    pub async fn insert(&self, connection: &str, driver: Driver, version: String) {
        self.entries.write().await.insert((connection.to_string(), driver), version);
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }
}

/// All process-wide caches used by the orchestrator.
#[derive(Debug, Default)]
pub struct ReuseCaches {
    pub remote_builds: RemoteBuildCache,
    pub versions: VersionCache,
    stale_purged: AtomicBool,
}

impl ReuseCaches {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Returns true exactly once per cache lifetime (until [`ReuseCaches::clear`]).
    pub fn claim_stale_purge(&self) -> bool {
        !self.stale_purged.swap(true, Ordering::SeqCst)
    }

    pub async fn clear(&self) {
        self.remote_builds.clear().await;
        self.versions.clear().await;
        self.stale_purged.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::fixtures;

    #[tokio::test]
    async fn test_remote_cache_keyed_by_url_and_scenario() {
        let cache = RemoteBuildCache::default();
        cache.insert("http://peer", fixtures::settings("test_app", "s1")).await;

        assert!(cache.get("http://peer", "s1").await.is_some());
        assert!(cache.get("http://peer", "s2").await.is_none());
        assert!(cache.get("http://other", "s1").await.is_none());
        assert_eq!(cache.count().await, 1);

        assert!(cache.remove("http://peer", "s1").await.is_some());
        assert!(cache.get("http://peer", "s1").await.is_none());
        assert!(cache.remove("http://peer", "s1").await.is_none());
    }

    #[tokio::test]
    async fn test_version_cache() {
        let cache = VersionCache::default();
        assert!(cache.get("main", Driver::Sqlite).await.is_none());
        cache.insert("main", Driver::Sqlite, "3.45.0".into()).await;
        assert_eq!(cache.get("main", Driver::Sqlite).await.as_deref(), Some("3.45.0"));
    }

    #[tokio::test]
    async fn test_clear_resets_everything() {
        let caches = ReuseCaches::new();
        caches.remote_builds.insert("http://peer", fixtures::settings("test_app", "s1")).await;
        caches.versions.insert("main", Driver::Sqlite, "3".into()).await;
        assert!(caches.claim_stale_purge());
        assert!(!caches.claim_stale_purge());

        caches.clear().await;

        assert_eq!(caches.remote_builds.count().await, 0);
        assert!(caches.versions.get("main", Driver::Sqlite).await.is_none());
        assert!(caches.claim_stale_purge());
    }
}
