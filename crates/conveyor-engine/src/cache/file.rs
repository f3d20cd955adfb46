//! File-system cache store

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::{expiry, CacheError, CacheRecord, CacheStore};

/// One record on disk
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredEntry {
    key: String,
    flow_id: String,
    value: serde_json::Value,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl StoredEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// One JSON file per key under a cache directory.
///
/// Writes go to a temporary file that is renamed into place, so a reader
/// never sees half a record.
#[derive(Debug)]
pub struct FileStore {
    cache_dir: PathBuf,
    write_seq: AtomicU64,
}

impl FileStore {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self {
            cache_dir,
            write_seq: AtomicU64::new(0),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        self.cache_dir.join(format!("{:x}.json", digest))
    }

    async fn read_entry(path: &Path) -> Result<Option<StoredEntry>, CacheError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn entry_files(&self) -> Result<Vec<PathBuf>, CacheError> {
        let mut files = Vec::new();
        let mut dir = match tokio::fs::read_dir(&self.cache_dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(files),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                files.push(path);
            }
        }
        Ok(files)
    }

    /// Remove expired and unreadable entries
    pub async fn prune(&self) -> Result<PruneStats, CacheError> {
        info!(dir = %self.cache_dir.display(), "pruning cache");
        let mut stats = PruneStats::default();
        let now = Utc::now();

        for path in self.entry_files().await? {
            stats.total += 1;

            let stale = match Self::read_entry(&path).await {
                Ok(Some(entry)) => entry.is_expired(now),
                Ok(None) => continue,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "removing unreadable cache entry");
                    true
                }
            };

            if stale {
                if tokio::fs::remove_file(&path).await.is_ok() {
                    stats.removed += 1;
                }
                continue;
            }

            stats.kept += 1;
        }

        info!(total = stats.total, removed = stats.removed, kept = stats.kept, "cache prune complete");
        Ok(stats)
    }

    /// Get cache statistics
    pub async fn status(&self) -> Result<CacheStats, CacheError> {
        let mut stats = CacheStats::default();
        let now = Utc::now();

        for path in self.entry_files().await? {
            stats.entries += 1;

            if let Ok(meta) = tokio::fs::metadata(&path).await {
                stats.total_size += meta.len();
            }

            if let Ok(Some(entry)) = Self::read_entry(&path).await {
                if entry.is_expired(now) {
                    stats.expired += 1;
                }
            }
        }

        Ok(stats)
    }

    /// Remove every entry, returning how many were removed
    pub async fn clear(&self) -> Result<usize, CacheError> {
        let mut removed = 0;
        for path in self.entry_files().await? {
            tokio::fs::remove_file(&path).await?;
            removed += 1;
        }
        info!(dir = %self.cache_dir.display(), removed, "cache cleared");
        Ok(removed)
    }
}

#[async_trait]
impl CacheStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<CacheRecord>, CacheError> {
        let path = self.entry_path(key);
        let entry = match Self::read_entry(&path).await {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                debug!(key, "cache miss");
                return Ok(None);
            }
            // Prune removes these; until then they read as a miss
            Err(CacheError::Json(e)) => {
                warn!(key, path = %path.display(), error = %e, "ignoring unreadable cache entry");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        if entry.key != key || entry.is_expired(Utc::now()) {
            debug!(key, "cache entry stale");
            return Ok(None);
        }

        debug!(key, flow_id = %entry.flow_id, "cache hit");
        Ok(Some(CacheRecord {
            flow_id: entry.flow_id,
            value: entry.value,
        }))
    }

    async fn set(&self, key: &str, record: CacheRecord, ttl: Duration) -> Result<(), CacheError> {
        tokio::fs::create_dir_all(&self.cache_dir).await?;

        let entry = StoredEntry {
            key: key.to_string(),
            flow_id: record.flow_id,
            value: record.value,
            created_at: Utc::now(),
            expires_at: expiry(ttl),
        };
        let json = serde_json::to_vec_pretty(&entry)?;

        let path = self.entry_path(key);
        let seq = self.write_seq.fetch_add(1, Ordering::Relaxed);
        let tmp = path.with_extension(format!("{}.{}.tmp", std::process::id(), seq));
        tokio::fs::write(&tmp, json).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }
}

/// Statistics from a prune operation
#[derive(Debug, Default)]
pub struct PruneStats {
    /// Total entries found
    pub total: usize,
    /// Entries removed
    pub removed: usize,
    /// Entries kept
    pub kept: usize,
}

/// Cache statistics
#[derive(Debug, Default)]
pub struct CacheStats {
    /// Number of cache entries
    pub entries: usize,
    /// Entries past their expiry, awaiting prune
    pub expired: usize,
    /// Total size in bytes
    pub total_size: u64,
}

impl CacheStats {
    /// Format total size in human-readable form
    pub fn formatted_size(&self) -> String {
        const KB: f64 = 1024.0;
        let size = self.total_size as f64;
        if size < KB {
            format!("{} B", self.total_size)
        } else if size < KB * KB {
            format!("{:.1} KB", size / KB)
        } else if size < KB * KB * KB {
            format!("{:.1} MB", size / (KB * KB))
        } else {
            format!("{:.1} GB", size / (KB * KB * KB))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(flow_id: &str) -> CacheRecord {
        CacheRecord {
            flow_id: flow_id.to_string(),
            value: serde_json::json!({"didStepRun": true, "stepStatus": "passed", "flowId": flow_id}),
        }
    }

    #[tokio::test]
    async fn test_store_and_lookup() {
        let temp = TempDir::new().unwrap();
        let store = FileStore::new(temp.path().join("cache"));

        store.set("step-result:build-1:abc", record("f1"), Duration::from_secs(60)).await.unwrap();

        let found = store.get("step-result:build-1:abc").await.unwrap();
        assert_eq!(found, Some(record("f1")));
        assert!(store.has("step-result:build-1:abc").await.unwrap());
    }

    #[tokio::test]
    async fn test_cache_miss() {
        let temp = TempDir::new().unwrap();
        let store = FileStore::new(temp.path().join("cache"));

        assert_eq!(store.get("nothing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_corrupt_entry_reads_as_miss() {
        let temp = TempDir::new().unwrap();
        let store = FileStore::new(temp.path().join("cache"));
        store.set("k", record("f1"), Duration::from_secs(60)).await.unwrap();

        std::fs::write(store.entry_path("k"), "{ truncated").unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);

        store.set("k", record("f2"), Duration::from_secs(60)).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().unwrap().flow_id, "f2");
    }

    #[tokio::test]
    async fn test_persists_across_instances() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("cache");

        FileStore::new(dir.clone())
            .set("k", record("f1"), Duration::from_secs(60))
            .await
            .unwrap();

        let reopened = FileStore::new(dir);
        assert_eq!(reopened.get("k").await.unwrap().unwrap().flow_id, "f1");
    }

    #[tokio::test]
    async fn test_prune_removes_expired() {
        let temp = TempDir::new().unwrap();
        let store = FileStore::new(temp.path().join("cache"));

        store.set("old", record("f1"), Duration::ZERO).await.unwrap();
        store.set("new", record("f2"), Duration::from_secs(60)).await.unwrap();
        std::fs::write(store.cache_dir().join("junk.json"), "not json").unwrap();

        let status = store.status().await.unwrap();
        assert_eq!(status.entries, 3);
        assert_eq!(status.expired, 1);

        let stats = store.prune().await.unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.removed, 2);
        assert_eq!(stats.kept, 1);

        assert_eq!(store.get("old").await.unwrap(), None);
        assert!(store.get("new").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_clear() {
        let temp = TempDir::new().unwrap();
        let store = FileStore::new(temp.path().join("cache"));
        store.set("a", record("f1"), Duration::from_secs(60)).await.unwrap();
        store.set("b", record("f1"), Duration::from_secs(60)).await.unwrap();

        assert_eq!(store.clear().await.unwrap(), 2);
        assert_eq!(store.status().await.unwrap().entries, 0);
    }

    #[tokio::test]
    async fn test_status_missing_dir() {
        let temp = TempDir::new().unwrap();
        let store = FileStore::new(temp.path().join("absent"));

        let stats = store.status().await.unwrap();
        assert_eq!(stats.entries, 0);
        assert_eq!(stats.total_size, 0);
    }

    #[test]
    fn test_cache_stats_formatted_size() {
        let stats = CacheStats {
            total_size: 1536,
            ..Default::default()
        };
        assert_eq!(stats.formatted_size(), "1.5 KB");

        let stats = CacheStats {
            total_size: 500,
            ..Default::default()
        };
        assert_eq!(stats.formatted_size(), "500 B");
    }
}
