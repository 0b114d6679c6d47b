//! Document cache with tombstones and quota-aware eviction.
//!
//! The cache holds the last-known snapshot of every document the client
//! has read or written, so reads keep working offline. It is a
//! projection of remote state plus optimistic local writes — never a
//! second source of truth.
//!
//! Deletes are recorded as tombstones: the entry stays physically present
//! (so the pending delete is remembered across restarts) but reads report
//! "not found" until the remote delete is confirmed and the entry is
//! [`purge`](DocumentCache::purge)d.
//!
//! Persisting the cache can hit the backing store's quota. When it does,
//! the oldest 25% of entries (by last-write timestamp) are evicted and
//! the persist retried once; if it still fails the cache degrades to
//! in-memory-only operation for the rest of the session with a warning.

use std::sync::Arc;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{DayzeroError, Result};
use crate::remote::{DocKey, QueryCondition};
use crate::storage::KeyValueStore;

/// One cached document snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Last-known snapshot data.
    pub data: Value,
    /// Last-write instant, epoch milliseconds. Drives eviction order.
    pub timestamp: i64,
    /// Logically deleted, awaiting remote confirmation.
    #[serde(default)]
    pub tombstone: bool,
}

/// Key-value store of last-known document snapshots.
pub struct DocumentCache {
    entries: RwLock<IndexMap<String, CacheEntry>>,
    store: Arc<dyn KeyValueStore>,
    storage_key: String,
    memory_only: AtomicBool,
}

impl DocumentCache {
    /// Load the cache from durable storage, starting empty when the blob
    /// is absent. A corrupt blob is logged and discarded rather than
    /// failing startup.
    pub async fn load(store: Arc<dyn KeyValueStore>, storage_key: impl Into<String>) -> Self {
        let storage_key = storage_key.into();
        let entries = match store.get(&storage_key).await {
            Ok(Some(blob)) => match serde_json::from_str::<Vec<(String, CacheEntry)>>(&blob) {
                Ok(pairs) => pairs.into_iter().collect(),
                Err(e) => {
                    log::warn!("[Cache] discarding corrupt cache blob: {e}");
                    IndexMap::new()
                }
            },
            Ok(None) => IndexMap::new(),
            Err(e) => {
                log::warn!("[Cache] failed to read cache blob: {e}");
                IndexMap::new()
            }
        };

        log::debug!("[Cache] loaded {} entries", entries.len());
        Self {
            entries: RwLock::new(entries),
            store,
            storage_key,
            memory_only: AtomicBool::new(false),
        }
    }

    /// Last cached snapshot for `key`, or `None` if absent or
    /// tombstoned.
    pub fn get(&self, key: &DocKey) -> Option<Value> {
        let entries = self.entries.read().unwrap();
        entries
            .get(&key.path())
            .filter(|entry| !entry.tombstone)
            .map(|entry| entry.data.clone())
    }

    /// Replace the snapshot for `key`, clearing any tombstone.
    pub async fn set(&self, key: &DocKey, data: Value) -> Result<()> {
        {
            let mut entries = self.entries.write().unwrap();
            entries.insert(
                key.path(),
                CacheEntry {
                    data,
                    timestamp: now_millis(),
                    tombstone: false,
                },
            );
        }
        self.persist().await
    }

    /// Shallow-merge `partial` into the existing snapshot for `key`.
    ///
    /// When both the existing snapshot and `partial` are JSON objects,
    /// top-level fields of `partial` win; otherwise `partial` replaces
    /// the snapshot. Always refreshes the entry timestamp and clears any
    /// tombstone.
    pub async fn merge(&self, key: &DocKey, partial: Value) -> Result<()> {
        {
            let mut entries = self.entries.write().unwrap();
            let path = key.path();
            let merged = match (entries.get(&path), &partial) {
                (Some(existing), Value::Object(new_fields)) => match &existing.data {
                    Value::Object(old_fields) => {
                        let mut fields = old_fields.clone();
                        for (k, v) in new_fields {
                            fields.insert(k.clone(), v.clone());
                        }
                        Value::Object(fields)
                    }
                    _ => partial.clone(),
                },
                _ => partial.clone(),
            };
            entries.insert(
                path,
                CacheEntry {
                    data: merged,
                    timestamp: now_millis(),
                    tombstone: false,
                },
            );
        }
        self.persist().await
    }

    /// Mark `key` deleted. The entry stays physically present until
    /// [`purge`](Self::purge) confirms the remote delete, but
    /// [`get`](Self::get) and [`query`](Self::query) report it absent
    /// immediately.
    pub async fn delete(&self, key: &DocKey) -> Result<()> {
        {
            let mut entries = self.entries.write().unwrap();
            let path = key.path();
            let data = entries
                .get(&path)
                .map(|entry| entry.data.clone())
                .unwrap_or(Value::Null);
            entries.insert(
                path,
                CacheEntry {
                    data,
                    timestamp: now_millis(),
                    tombstone: true,
                },
            );
        }
        self.persist().await
    }

    /// Physically remove the entry for `key`, tombstoned or not. Called
    /// once a remote delete is confirmed.
    pub async fn purge(&self, key: &DocKey) -> Result<()> {
        {
            let mut entries = self.entries.write().unwrap();
            entries.shift_remove(&key.path());
        }
        self.persist().await
    }

    /// Evaluate a conjunction of conditions against cached,
    /// non-tombstoned entries of `collection`.
    ///
    /// This is a best-effort client-side filter over whatever happens to
    /// be cached — not a query engine. Conditions needing server-side
    /// indexes or a full-collection scan cannot be answered here.
    pub fn query(&self, collection: &str, conditions: &[QueryCondition]) -> Vec<(DocKey, Value)> {
        let prefix = format!("{collection}/");
        let entries = self.entries.read().unwrap();
        entries
            .iter()
            .filter(|(path, entry)| path.starts_with(&prefix) && !entry.tombstone)
            .filter(|(_, entry)| conditions.iter().all(|c| c.matches(&entry.data)))
            .map(|(path, entry)| {
                let id = &path[prefix.len()..];
                (DocKey::new(collection, id), entry.data.clone())
            })
            .collect()
    }

    /// Number of physically present entries, tombstones included.
    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    /// Whether the cache holds no entries at all.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether persistence has been abandoned for this session after
    /// unrecoverable quota exhaustion.
    pub fn is_memory_only(&self) -> bool {
        self.memory_only.load(Ordering::SeqCst)
    }

    /// Drop all cached entries and the persisted blob.
    pub async fn clear(&self) -> Result<()> {
        {
            let mut entries = self.entries.write().unwrap();
            entries.clear();
        }
        self.store.remove(&self.storage_key).await
    }

    async fn persist(&self) -> Result<()> {
        if self.memory_only.load(Ordering::SeqCst) {
            return Ok(());
        }

        match self.try_persist().await {
            Err(DayzeroError::QuotaExceeded(_)) => {
                let evicted = self.evict_oldest_quarter();
                log::warn!(
                    "[Cache] storage quota exceeded, evicted {evicted} oldest entries and retrying"
                );
                match self.try_persist().await {
                    Ok(()) => Ok(()),
                    Err(e) => {
                        // Non-fatal: keep operating from memory for the
                        // rest of the session.
                        log::warn!("[Cache] persist still failing ({e}); cache is memory-only");
                        self.memory_only.store(true, Ordering::SeqCst);
                        Ok(())
                    }
                }
            }
            other => other,
        }
    }

    async fn try_persist(&self) -> Result<()> {
        let blob = {
            let entries = self.entries.read().unwrap();
            let pairs: Vec<(&String, &CacheEntry)> = entries.iter().collect();
            serde_json::to_string(&pairs)?
        };
        self.store.set(&self.storage_key, &blob).await
    }

    /// Remove the oldest 25% of entries by last-write timestamp.
    /// Returns how many were removed.
    fn evict_oldest_quarter(&self) -> usize {
        let mut entries = self.entries.write().unwrap();
        let count = entries.len().div_ceil(4);
        if entries.is_empty() {
            return 0;
        }

        let mut by_age: Vec<(String, i64)> = entries
            .iter()
            .map(|(path, entry)| (path.clone(), entry.timestamp))
            .collect();
        by_age.sort_by_key(|(_, timestamp)| *timestamp);

        for (path, _) in by_age.into_iter().take(count) {
            entries.shift_remove(&path);
        }
        count
    }
}

impl std::fmt::Debug for DocumentCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentCache")
            .field("entries", &self.len())
            .field("memory_only", &self.is_memory_only())
            .finish()
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
