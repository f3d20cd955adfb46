//! Step result cache
//!
//! A [`FlowCache`] sits in front of a durable [`CacheStore`] for the length of
//! one flow. Every write is stamped with the flow id so later flows can tell
//! where a cached verdict came from.

mod file;
mod memory;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::status::Status;

pub use file::{CacheStats, FileStore, PruneStats};
pub use memory::MemoryStore;

/// A cached value together with the flow that wrote it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheRecord {
    pub flow_id: String,
    pub value: serde_json::Value,
}

/// Durable key/value storage with expiry.
///
/// Implementations must tolerate concurrent access to different keys; a
/// single `set` must be atomic for its key.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Read a live record
    async fn get(&self, key: &str) -> Result<Option<CacheRecord>, CacheError>;

    /// Write a record that expires after `ttl`
    async fn set(&self, key: &str, record: CacheRecord, ttl: Duration) -> Result<(), CacheError>;

    /// Whether a live record exists
    async fn has(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.get(key).await?.is_some())
    }

    /// Release resources held for the flow
    async fn cleanup(&self) -> Result<(), CacheError> {
        Ok(())
    }
}

/// Expiry settings per kind of record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheTtls {
    pub step_result: Duration,
}

impl CacheTtls {
    pub fn from_days(days: u64) -> Self {
        Self {
            step_result: Duration::from_secs(days * 24 * 60 * 60),
        }
    }
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self::from_days(30)
    }
}

/// What a step left behind for one artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawStepRecord", into = "RawStepRecord")]
pub enum StepRecord {
    /// The step body ran and produced a verdict
    Ran { status: Status, flow_id: String },
    /// The step was skipped
    NotRan,
}

impl StepRecord {
    pub fn did_run(&self) -> bool {
        matches!(self, Self::Ran { .. })
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawStepRecord {
    did_step_run: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    step_status: Option<Status>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    flow_id: Option<String>,
}

impl TryFrom<RawStepRecord> for StepRecord {
    type Error = String;

    fn try_from(raw: RawStepRecord) -> Result<Self, Self::Error> {
        if !raw.did_step_run {
            return Ok(Self::NotRan);
        }
        match (raw.step_status, raw.flow_id) {
            (Some(status), Some(flow_id)) => Ok(Self::Ran { status, flow_id }),
            _ => Err("a step that ran needs stepStatus and flowId".to_string()),
        }
    }
}

impl From<StepRecord> for RawStepRecord {
    fn from(record: StepRecord) -> Self {
        match record {
            StepRecord::Ran { status, flow_id } => Self {
                did_step_run: true,
                step_status: Some(status),
                flow_id: Some(flow_id),
            },
            StepRecord::NotRan => Self {
                did_step_run: false,
                step_status: None,
                flow_id: None,
            },
        }
    }
}

/// Cache view for one flow: a memo in front of the durable store.
///
/// Reads populate the memo and writes go to both, so a flow always sees its
/// own writes even if the store is eventually consistent.
pub struct FlowCache {
    flow_id: String,
    store: Arc<dyn CacheStore>,
    memo: Mutex<HashMap<String, CacheRecord>>,
    ttls: CacheTtls,
}

impl FlowCache {
    pub fn new(flow_id: impl Into<String>, store: Arc<dyn CacheStore>, ttls: CacheTtls) -> Self {
        Self {
            flow_id: flow_id.into(),
            store,
            memo: Mutex::new(HashMap::new()),
            ttls,
        }
    }

    /// A cache that forgets everything when the flow ends
    pub fn in_memory(flow_id: impl Into<String>) -> Self {
        Self::new(flow_id, Arc::new(MemoryStore::new()), CacheTtls::default())
    }

    pub fn flow_id(&self) -> &str {
        &self.flow_id
    }

    pub async fn get(&self, key: &str) -> Result<Option<CacheRecord>, CacheError> {
        if let Some(record) = self.memo_get(key) {
            return Ok(Some(record));
        }

        let record = self.store.get(key).await?;
        if let Some(record) = &record {
            self.memo_insert(key, record.clone());
        }
        Ok(record)
    }

    /// Write a value stamped with this flow's id
    pub async fn set(
        &self,
        key: &str,
        value: serde_json::Value,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let record = CacheRecord {
            flow_id: self.flow_id.clone(),
            value,
        };
        self.store.set(key, record.clone(), ttl).await?;
        self.memo_insert(key, record);
        Ok(())
    }

    pub async fn has(&self, key: &str) -> Result<bool, CacheError> {
        if self.memo_get(key).is_some() {
            return Ok(true);
        }
        self.store.has(key).await
    }

    /// Drop the memo and release the store. Safe to call more than once.
    pub async fn cleanup(&self) -> Result<(), CacheError> {
        self.memo
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        self.store.cleanup().await
    }

    /// Whether a step ran on content with this hash in any flow
    pub async fn did_step_run(&self, step_id: &str, package_hash: &str) -> Result<bool, CacheError> {
        Ok(self
            .get_step_result(step_id, package_hash)
            .await?
            .is_some_and(|r| r.did_run()))
    }

    pub async fn get_step_result(
        &self,
        step_id: &str,
        package_hash: &str,
    ) -> Result<Option<StepRecord>, CacheError> {
        let key = step_key(step_id, package_hash);
        match self.get(&key).await? {
            Some(record) => {
                let step_record = serde_json::from_value(record.value).map_err(|e| {
                    CacheError::InvalidRecord {
                        key: key.clone(),
                        reason: e.to_string(),
                    }
                })?;
                Ok(Some(step_record))
            }
            None => Ok(None),
        }
    }

    pub async fn set_step_result(
        &self,
        step_id: &str,
        package_hash: &str,
        record: StepRecord,
    ) -> Result<(), CacheError> {
        let key = step_key(step_id, package_hash);
        debug!(key = %key, did_run = record.did_run(), "caching step result");
        let value = serde_json::to_value(&record)?;
        self.set(&key, value, self.ttls.step_result).await
    }

    fn memo_get(&self, key: &str) -> Option<CacheRecord> {
        self.memo
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    fn memo_insert(&self, key: &str, record: CacheRecord) {
        self.memo
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), record);
    }
}

impl std::fmt::Debug for FlowCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowCache")
            .field("flow_id", &self.flow_id)
            .field("ttls", &self.ttls)
            .finish_non_exhaustive()
    }
}

/// Absolute expiry for a record written now
pub(crate) fn expiry(ttl: Duration) -> chrono::DateTime<chrono::Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| chrono::Utc::now().checked_add_signed(ttl))
        .unwrap_or(chrono::DateTime::<chrono::Utc>::MAX_UTC)
}

/// Cache key for a step's result on one content hash
pub fn step_key(step_id: &str, package_hash: &str) -> String {
    format!("step-result:{}:{}", step_id, package_hash)
}

/// Cache errors
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// IO error
    #[error("Cache IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("Cache serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// A record that does not have the expected shape
    #[error("Invalid cache record '{key}': {reason}")]
    InvalidRecord { key: String, reason: String },
}
