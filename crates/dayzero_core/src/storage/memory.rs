//! In-memory key-value store.
//!
//! Used in tests and as the degraded backend once a real store has
//! reported unrecoverable quota exhaustion. An optional byte quota lets
//! tests exercise the eviction path deterministically.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::{BoxFuture, KeyValueStore};
use crate::error::{DayzeroError, Result};

/// In-memory [`KeyValueStore`] with an optional total-byte quota.
#[derive(Debug, Default, Clone)]
pub struct MemoryKvStore {
    entries: Arc<RwLock<HashMap<String, String>>>,
    quota_bytes: Option<usize>,
}

impl MemoryKvStore {
    /// Create an unbounded in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that rejects writes once the sum of stored key and
    /// value lengths would exceed `quota_bytes`.
    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            quota_bytes: Some(quota_bytes),
        }
    }

    /// Total bytes currently stored (keys + values).
    pub fn used_bytes(&self) -> usize {
        let entries = self.entries.read().unwrap();
        entries.iter().map(|(k, v)| k.len() + v.len()).sum()
    }
}

impl KeyValueStore for MemoryKvStore {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>>> {
        Box::pin(async move {
            let entries = self.entries.read().unwrap();
            Ok(entries.get(key).cloned())
        })
    }

    fn set<'a>(&'a self, key: &'a str, value: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut entries = self.entries.write().unwrap();

            if let Some(quota) = self.quota_bytes {
                let others: usize = entries
                    .iter()
                    .filter(|(k, _)| k.as_str() != key)
                    .map(|(k, v)| k.len() + v.len())
                    .sum();
                if others + key.len() + value.len() > quota {
                    return Err(DayzeroError::QuotaExceeded(key.to_string()));
                }
            }

            entries.insert(key.to_string(), value.to_string());
            Ok(())
        })
    }

    fn remove<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut entries = self.entries.write().unwrap();
            entries.remove(key);
            Ok(())
        })
    }
}
