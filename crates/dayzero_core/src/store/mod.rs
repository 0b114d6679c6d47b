//! Offline-first document store facade.
//!
//! [`DocStore`] is where a user action becomes either a direct remote
//! write or a queued operation. Online, calls go straight to the remote
//! store and refresh the cache; offline, a typed operation is appended to
//! the durable queue and the cache is updated optimistically so reads
//! stay consistent with what the user just did.
//!
//! Reads prefer the remote store when online but fall back to the cache
//! on transient failures, and serve the cache directly when offline.

use std::sync::Arc;

use serde_json::Value;

use crate::cache::DocumentCache;
use crate::connectivity::ConnectivityMonitor;
use crate::error::{DayzeroError, Result};
use crate::notify::{Notification, Notifier};
use crate::queue::{Operation, OperationKind, OperationQueue};
use crate::remote::{DocKey, QueryCondition, RemoteDocumentStore};

/// Online/offline-transparent document CRUD.
pub struct DocStore {
    remote: Arc<dyn RemoteDocumentStore>,
    cache: Arc<DocumentCache>,
    queue: Arc<OperationQueue>,
    monitor: Arc<ConnectivityMonitor>,
    notifier: Arc<dyn Notifier>,
}

impl DocStore {
    /// Assemble the facade from its collaborators.
    pub fn new(
        remote: Arc<dyn RemoteDocumentStore>,
        cache: Arc<DocumentCache>,
        queue: Arc<OperationQueue>,
        monitor: Arc<ConnectivityMonitor>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            remote,
            cache,
            queue,
            monitor,
            notifier,
        }
    }

    /// Create a document in `collection`, returning its id.
    ///
    /// Offline creates get a provisional `temp-` id; the queued create
    /// writes the document under that id on replay.
    pub async fn create(&self, collection: &str, data: Value) -> Result<String> {
        if self.monitor.is_online() {
            let key = DocKey::new(collection, uuid::Uuid::new_v4().to_string());
            self.remote.set_doc(&key, &data, false).await?;
            self.cache.set(&key, data).await?;
            Ok(key.id)
        } else {
            let key = DocKey::new(collection, format!("temp-{}", uuid::Uuid::new_v4()));
            self.queue
                .enqueue(Operation::new(
                    OperationKind::Create,
                    key.clone(),
                    Some(data.clone()),
                ))
                .await?;
            self.cache.set(&key, data).await?;
            self.notify_queued(&key);
            Ok(key.id)
        }
    }

    /// Merge `partial` into the document at `key`.
    ///
    /// Online, an update of an absent document recreates it with the
    /// partial as full content (the same policy the sync engine applies
    /// on replay).
    pub async fn update(&self, key: &DocKey, partial: Value) -> Result<()> {
        if self.monitor.is_online() {
            match self.remote.set_doc(key, &partial, true).await {
                Ok(()) => {}
                Err(DayzeroError::NotFound(_)) => {
                    log::debug!("[DocStore] update target {key} absent, recreating");
                    self.remote.set_doc(key, &partial, false).await?;
                }
                Err(e) => return Err(e),
            }
            self.cache.merge(key, partial).await
        } else {
            self.queue
                .enqueue(Operation::new(
                    OperationKind::Update,
                    key.clone(),
                    Some(partial.clone()),
                ))
                .await?;
            self.cache.merge(key, partial).await?;
            self.notify_queued(key);
            Ok(())
        }
    }

    /// Delete the document at `key`.
    ///
    /// Offline deletes tombstone the cache entry; the entry is physically
    /// removed once the queued delete is confirmed remote.
    pub async fn delete(&self, key: &DocKey) -> Result<()> {
        if self.monitor.is_online() {
            match self.remote.delete_doc(key).await {
                // Already gone remotely: the intent is satisfied.
                Ok(()) | Err(DayzeroError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
            self.cache.purge(key).await
        } else {
            self.queue
                .enqueue(Operation::new(OperationKind::Delete, key.clone(), None))
                .await?;
            self.cache.delete(key).await?;
            self.notify_queued(key);
            Ok(())
        }
    }

    /// Fetch the document at `key`.
    ///
    /// Online misses also clear any stale cache entry. Transient remote
    /// failures fall back to the cache instead of surfacing.
    pub async fn get(&self, key: &DocKey) -> Result<Option<Value>> {
        if self.monitor.is_online() {
            match self.remote.get_doc(key).await {
                Ok(Some(snapshot)) => {
                    self.cache.set(key, snapshot.clone()).await?;
                    Ok(Some(snapshot))
                }
                Ok(None) => {
                    self.cache.purge(key).await?;
                    Ok(None)
                }
                Err(e) if e.is_transient() => {
                    log::debug!("[DocStore] remote get failed ({e}), serving cache for {key}");
                    Ok(self.cache.get(key))
                }
                Err(e) => Err(e),
            }
        } else {
            Ok(self.cache.get(key))
        }
    }

    /// Query `collection` with a conjunction of conditions.
    ///
    /// Offline (or on transient failure) this degrades to the cache's
    /// best-effort client-side filter, which only sees cached documents.
    pub async fn query(
        &self,
        collection: &str,
        conditions: &[QueryCondition],
    ) -> Result<Vec<(DocKey, Value)>> {
        if self.monitor.is_online() {
            match self.remote.query_docs(collection, conditions).await {
                Ok(results) => {
                    for (key, snapshot) in &results {
                        self.cache.set(key, snapshot.clone()).await?;
                    }
                    Ok(results)
                }
                Err(e) if e.is_transient() => {
                    log::debug!("[DocStore] remote query failed ({e}), serving cache");
                    Ok(self.cache.query(collection, conditions))
                }
                Err(e) => Err(e),
            }
        } else {
            Ok(self.cache.query(collection, conditions))
        }
    }

    fn notify_queued(&self, key: &DocKey) {
        self.notifier.notify(&Notification::OfflineWriteQueued {
            target: key.path(),
        });
    }
}

impl std::fmt::Debug for DocStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocStore")
            .field("online", &self.monitor.is_online())
            .field("queued", &self.queue.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::LogNotifier;
    use crate::remote::QueryOp;
    use crate::storage::MemoryKvStore;
    use crate::test_utils::{FailureMode, ManualProbe, MockRemoteStore};
    use futures_lite::future::block_on;
    use serde_json::json;
    use std::time::Duration;

    struct Fixture {
        store: DocStore,
        remote: Arc<MockRemoteStore>,
        monitor: Arc<ConnectivityMonitor>,
        queue: Arc<OperationQueue>,
        cache: Arc<DocumentCache>,
    }

    fn create_test_store(online: bool) -> Fixture {
        let kv: Arc<dyn crate::storage::KeyValueStore> = Arc::new(MemoryKvStore::new());
        let remote = Arc::new(MockRemoteStore::new());
        let cache = Arc::new(block_on(DocumentCache::load(
            Arc::clone(&kv),
            "document_cache",
        )));
        let queue = Arc::new(block_on(OperationQueue::load(kv, "pending_operations")));
        let monitor = Arc::new(ConnectivityMonitor::new(
            Arc::new(ManualProbe::new(online)),
            Duration::from_secs(30),
            online,
        ));
        let store = DocStore::new(
            Arc::clone(&remote) as Arc<dyn RemoteDocumentStore>,
            Arc::clone(&cache),
            Arc::clone(&queue),
            Arc::clone(&monitor),
            Arc::new(LogNotifier),
        );
        Fixture {
            store,
            remote,
            monitor,
            queue,
            cache,
        }
    }

    #[test]
    fn test_online_update_writes_remote_and_cache() {
        let fx = create_test_store(true);
        let key = DocKey::new("users", "u1");
        fx.remote.insert(&key, json!({"uid": "u1"}));

        block_on(fx.store.update(&key, json!({"displayName": "Ana"}))).unwrap();

        assert_eq!(
            fx.remote.get_snapshot(&key),
            Some(json!({"uid": "u1", "displayName": "Ana"}))
        );
        assert!(fx.queue.is_empty());
        assert_eq!(
            fx.cache.get(&key),
            Some(json!({"displayName": "Ana"}))
        );
    }

    #[test]
    fn test_online_update_recreates_absent_doc() {
        let fx = create_test_store(true);
        let key = DocKey::new("users", "u1");

        block_on(fx.store.update(&key, json!({"uid": "u1"}))).unwrap();
        assert_eq!(fx.remote.get_snapshot(&key), Some(json!({"uid": "u1"})));
    }

    #[test]
    fn test_offline_writes_queue_and_apply_optimistically() {
        let fx = create_test_store(false);
        let key = DocKey::new("habits", "h1");

        block_on(fx.store.update(&key, json!({"name": "run"}))).unwrap();

        // Nothing hit the remote, the queue and cache did.
        assert_eq!(fx.remote.get_snapshot(&key), None);
        assert_eq!(fx.queue.len(), 1);
        assert_eq!(fx.cache.get(&key), Some(json!({"name": "run"})));
    }

    #[test]
    fn test_offline_create_uses_temp_id() {
        let fx = create_test_store(false);
        let id = block_on(fx.store.create("habits", json!({"name": "walk"}))).unwrap();
        assert!(id.starts_with("temp-"));
        assert_eq!(fx.queue.pending()[0].kind, OperationKind::Create);
    }

    #[test]
    fn test_offline_delete_tombstones() {
        let fx = create_test_store(false);
        let key = DocKey::new("habits", "h1");
        block_on(fx.cache.set(&key, json!({"name": "run"}))).unwrap();

        block_on(fx.store.delete(&key)).unwrap();

        assert_eq!(block_on(fx.store.get(&key)).unwrap(), None);
        assert_eq!(fx.cache.len(), 1, "tombstone still physically present");
        assert_eq!(fx.queue.pending()[0].kind, OperationKind::Delete);
    }

    #[test]
    fn test_online_get_falls_back_to_cache_on_transient_error() {
        let fx = create_test_store(true);
        let key = DocKey::new("users", "u1");
        block_on(fx.cache.set(&key, json!({"uid": "u1"}))).unwrap();

        fx.remote.set_failure(Some(FailureMode::Transient));
        let got = block_on(fx.store.get(&key)).unwrap();
        assert_eq!(got, Some(json!({"uid": "u1"})));
    }

    #[test]
    fn test_permission_errors_surface() {
        let fx = create_test_store(true);
        fx.remote.set_failure(Some(FailureMode::Permission));

        let err = block_on(fx.store.update(&DocKey::new("users", "u1"), json!({}))).unwrap_err();
        assert!(matches!(err, DayzeroError::PermissionDenied(_)));
        assert!(fx.queue.is_empty(), "permission failures are not queued");
    }

    #[test]
    fn test_offline_query_serves_cached_filter() {
        let fx = create_test_store(false);
        block_on(fx.cache.set(&DocKey::new("habits", "h1"), json!({"days": 3}))).unwrap();
        block_on(fx.cache.set(&DocKey::new("habits", "h2"), json!({"days": 9}))).unwrap();

        let hits = block_on(fx.store.query(
            "habits",
            &[QueryCondition::new("days", QueryOp::Gt, json!(5))],
        ))
        .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.id, "h2");

        // Still offline: the monitor state never changed.
        assert!(!fx.monitor.is_online());
    }
}
