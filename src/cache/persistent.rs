//! On-disk cache for cross-run memoization
//!
//! Each key lives in its own JSON file named after the percent-encoded key.
//! Read and write failures degrade to a cache miss; the cache never fails a
//! collection run.

use super::Cache;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;

const ENTRY_EXTENSION: &str = "json";

#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    key: String,
    value: Value,
    expires_at: DateTime<Utc>,
}

impl StoredEntry {
    fn is_valid(&self) -> bool {
        Utc::now() < self.expires_at
    }
}

/// File-backed cache rooted at a directory
pub struct PersistentCache {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl PersistentCache {
    /// Open (and create if needed) a cache directory
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create cache directory {}", dir.display()))?;

        Ok(Self {
            dir,
            lock: Mutex::new(()),
        })
    }

    /// Default location under the user's cache directory
    pub fn default_dir() -> PathBuf {
        if let Some(cache_dir) = dirs::cache_dir() {
            return cache_dir.join("cloudmap");
        }
        if let Some(home) = dirs::home_dir() {
            return home.join(".cloudmap").join("cache");
        }
        PathBuf::from(".cloudmap-cache")
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{}", urlencoding::encode(key), ENTRY_EXTENSION))
    }

    fn read_entry(path: &Path) -> Option<StoredEntry> {
        let content = std::fs::read_to_string(path).ok()?;
        match serde_json::from_str(&content) {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::debug!("Ignoring unreadable cache file {}: {}", path.display(), e);
                None
            }
        }
    }

    fn entry_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&self.dir)
            .with_context(|| format!("Failed to read cache directory {}", self.dir.display()))?
        {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some(ENTRY_EXTENSION) {
                files.push(path);
            }
        }
        Ok(files)
    }

    /// Remove expired or unreadable entries, returning how many were removed
    pub fn purge_expired(&self) -> Result<usize> {
        let _guard = self.lock.lock();
        let mut removed = 0;
        for path in self.entry_files()? {
            let stale = Self::read_entry(&path).map_or(true, |e| !e.is_valid());
            if stale {
                std::fs::remove_file(&path)
                    .with_context(|| format!("Failed to remove {}", path.display()))?;
                removed += 1;
            }
        }
        tracing::debug!("Purged {} expired cache entries", removed);
        Ok(removed)
    }

    /// Remove every entry
    pub fn clear(&self) -> Result<usize> {
        let _guard = self.lock.lock();
        let files = self.entry_files()?;
        for path in &files {
            std::fs::remove_file(path)
                .with_context(|| format!("Failed to remove {}", path.display()))?;
        }
        Ok(files.len())
    }

    fn write_entry(&self, entry: &StoredEntry) -> Result<()> {
        let path = self.entry_path(&entry.key);
        let content = serde_json::to_string(entry)?;
        std::fs::write(&path, content)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }
}

impl Cache for PersistentCache {
    fn get(&self, key: &str) -> Option<Value> {
        let _guard = self.lock.lock();
        let path = self.entry_path(key);
        let entry = Self::read_entry(&path)?;

        // Percent-encoding is injective, but guard against hand-edited files
        if entry.key != key {
            return None;
        }

        if !entry.is_valid() {
            tracing::debug!("Persistent cache entry {} expired", key);
            let _ = std::fs::remove_file(&path);
            return None;
        }

        Some(entry.value)
    }

    fn set(&self, key: &str, value: Value, ttl: Duration) {
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|d| Utc::now().checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        let entry = StoredEntry {
            key: key.to_string(),
            value,
            expires_at,
        };

        let _guard = self.lock.lock();
        if let Err(e) = self.write_entry(&entry) {
            tracing::warn!("Failed to persist cache entry {}: {:#}", key, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let cache = PersistentCache::open(dir.path()).unwrap();
            cache.set(
                "services:eu-west-1",
                json!(["ec2", "s3"]),
                Duration::from_secs(3600),
            );
        }

        let cache = PersistentCache::open(dir.path()).unwrap();
        assert_eq!(cache.get("services:eu-west-1"), Some(json!(["ec2", "s3"])));
    }

    #[test]
    fn test_absent_after_expiry() {
        let dir = tempfile::tempdir().unwrap();
        let cache = PersistentCache::open(dir.path()).unwrap();
        cache.set("k", json!(true), Duration::from_millis(40));
        assert_eq!(cache.get("k"), Some(json!(true)));

        std::thread::sleep(Duration::from_millis(80));
        assert_eq!(cache.get("k"), None);
        assert!(!cache.entry_path("k").exists());
    }

    #[test]
    fn test_keys_with_separators_map_to_distinct_files() {
        let dir = tempfile::tempdir().unwrap();
        let cache = PersistentCache::open(dir.path()).unwrap();
        cache.set("a/b", json!(1), Duration::from_secs(60));
        cache.set("a:b", json!(2), Duration::from_secs(60));

        assert_eq!(cache.get("a/b"), Some(json!(1)));
        assert_eq!(cache.get("a:b"), Some(json!(2)));
    }

    #[test]
    fn test_corrupt_file_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = PersistentCache::open(dir.path()).unwrap();
        std::fs::write(cache.entry_path("broken"), "not json").unwrap();
        assert_eq!(cache.get("broken"), None);
    }

    #[test]
    fn test_purge_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let cache = PersistentCache::open(dir.path()).unwrap();
        cache.set("old", json!(1), Duration::from_millis(10));
        cache.set("fresh", json!(2), Duration::from_secs(60));
        std::thread::sleep(Duration::from_millis(30));

        assert_eq!(cache.purge_expired().unwrap(), 1);
        assert_eq!(cache.get("fresh"), Some(json!(2)));
        assert_eq!(cache.clear().unwrap(), 1);
        assert_eq!(cache.get("fresh"), None);
    }
}
