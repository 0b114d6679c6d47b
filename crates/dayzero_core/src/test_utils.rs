//! Shared fakes for unit and integration tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};

use serde_json::Value;

use crate::connectivity::NetworkProbe;
use crate::error::{DayzeroError, Result};
use crate::notify::{Notification, Notifier};
use crate::remote::{DocKey, QueryCondition, RemoteDocumentStore};
use crate::storage::BoxFuture;

/// How [`MockRemoteStore`] should fail calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    /// Fail every call with a transient network error.
    Transient,
    /// Fail every call with a permission error.
    Permission,
}

/// In-memory remote document store with failure injection and call
/// counting (simulates the hosted store).
pub struct MockRemoteStore {
    docs: RwLock<HashMap<String, Value>>,
    denied_collections: RwLock<HashSet<String>>,
    failure: RwLock<Option<FailureMode>>,
    get_calls: AtomicUsize,
    set_calls: AtomicUsize,
    delete_calls: AtomicUsize,
    /// When set, the next polled future yields once before completing,
    /// so tests can interleave two tasks deterministically.
    yield_once: AtomicBool,
}

impl MockRemoteStore {
    /// Empty store, no failures.
    pub fn new() -> Self {
        Self {
            docs: RwLock::new(HashMap::new()),
            denied_collections: RwLock::new(HashSet::new()),
            failure: RwLock::new(None),
            get_calls: AtomicUsize::new(0),
            set_calls: AtomicUsize::new(0),
            delete_calls: AtomicUsize::new(0),
            yield_once: AtomicBool::new(false),
        }
    }

    /// Seed a document directly, bypassing counters and failures.
    pub fn insert(&self, key: &DocKey, data: Value) {
        self.docs.write().unwrap().insert(key.path(), data);
    }

    /// Raw snapshot, bypassing counters and failures.
    pub fn get_snapshot(&self, key: &DocKey) -> Option<Value> {
        self.docs.read().unwrap().get(&key.path()).cloned()
    }

    /// Fail all subsequent calls with the given mode (or stop failing).
    pub fn set_failure(&self, mode: Option<FailureMode>) {
        *self.failure.write().unwrap() = mode;
    }

    /// Reject writes to one collection with a permission error while the
    /// rest of the store keeps working.
    pub fn deny_collection(&self, collection: &str) {
        self.denied_collections
            .write()
            .unwrap()
            .insert(collection.to_string());
    }

    /// Make each remote call yield to the executor once before
    /// completing.
    pub fn set_yield_once(&self, yield_once: bool) {
        self.yield_once.store(yield_once, Ordering::SeqCst);
    }

    /// Number of `get_doc` calls observed.
    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    /// Number of `set_doc` calls observed.
    pub fn set_calls(&self) -> usize {
        self.set_calls.load(Ordering::SeqCst)
    }

    /// Number of `delete_doc` calls observed.
    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    /// Zero all call counters.
    pub fn reset_counters(&self) {
        self.get_calls.store(0, Ordering::SeqCst);
        self.set_calls.store(0, Ordering::SeqCst);
        self.delete_calls.store(0, Ordering::SeqCst);
    }

    fn check_failure(&self, key: &DocKey) -> Result<()> {
        if let Some(mode) = *self.failure.read().unwrap() {
            return Err(match mode {
                FailureMode::Transient => {
                    DayzeroError::TransientNetwork("mock connectivity failure".into())
                }
                FailureMode::Permission => {
                    DayzeroError::PermissionDenied(format!("mock rule rejects {key}"))
                }
            });
        }
        if self
            .denied_collections
            .read()
            .unwrap()
            .contains(&key.collection)
        {
            return Err(DayzeroError::PermissionDenied(format!(
                "mock rule rejects collection '{}'",
                key.collection
            )));
        }
        Ok(())
    }

    async fn maybe_yield(&self) {
        if self.yield_once.load(Ordering::SeqCst) {
            yield_now().await;
        }
    }
}

impl Default for MockRemoteStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteDocumentStore for MockRemoteStore {
    fn get_doc<'a>(&'a self, key: &'a DocKey) -> BoxFuture<'a, Result<Option<Value>>> {
        Box::pin(async move {
            self.maybe_yield().await;
            self.get_calls.fetch_add(1, Ordering::SeqCst);
            self.check_failure(key)?;
            Ok(self.docs.read().unwrap().get(&key.path()).cloned())
        })
    }

    fn set_doc<'a>(
        &'a self,
        key: &'a DocKey,
        data: &'a Value,
        merge: bool,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.maybe_yield().await;
            self.set_calls.fetch_add(1, Ordering::SeqCst);
            self.check_failure(key)?;

            let mut docs = self.docs.write().unwrap();
            let path = key.path();
            if merge {
                let Some(existing) = docs.get_mut(&path) else {
                    return Err(DayzeroError::NotFound(path));
                };
                match (existing, data) {
                    (Value::Object(old), Value::Object(new)) => {
                        for (k, v) in new {
                            old.insert(k.clone(), v.clone());
                        }
                    }
                    (existing, data) => *existing = data.clone(),
                }
            } else {
                docs.insert(path, data.clone());
            }
            Ok(())
        })
    }

    fn delete_doc<'a>(&'a self, key: &'a DocKey) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.maybe_yield().await;
            self.delete_calls.fetch_add(1, Ordering::SeqCst);
            self.check_failure(key)?;

            let mut docs = self.docs.write().unwrap();
            match docs.remove(&key.path()) {
                Some(_) => Ok(()),
                None => Err(DayzeroError::NotFound(key.path())),
            }
        })
    }

    fn query_docs<'a>(
        &'a self,
        collection: &'a str,
        conditions: &'a [QueryCondition],
    ) -> BoxFuture<'a, Result<Vec<(DocKey, Value)>>> {
        Box::pin(async move {
            self.maybe_yield().await;
            self.get_calls.fetch_add(1, Ordering::SeqCst);
            self.check_failure(&DocKey::new(collection, "*"))?;

            let prefix = format!("{collection}/");
            let docs = self.docs.read().unwrap();
            Ok(docs
                .iter()
                .filter(|(path, _)| path.starts_with(&prefix))
                .filter(|(_, doc)| conditions.iter().all(|c| c.matches(doc)))
                .map(|(path, doc)| {
                    (DocKey::new(collection, &path[prefix.len()..]), doc.clone())
                })
                .collect())
        })
    }
}

/// Probe whose verdict tests flip by hand.
pub struct ManualProbe {
    reachable: AtomicBool,
}

impl ManualProbe {
    /// Probe that starts reporting `reachable`.
    pub fn new(reachable: bool) -> Self {
        Self {
            reachable: AtomicBool::new(reachable),
        }
    }

    /// Change the verdict of subsequent checks.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }
}

impl NetworkProbe for ManualProbe {
    fn check<'a>(&'a self) -> BoxFuture<'a, bool> {
        Box::pin(async move { self.reachable.load(Ordering::SeqCst) })
    }
}

/// Notifier that records everything it was asked to deliver.
#[derive(Default)]
pub struct CollectingNotifier {
    events: Mutex<Vec<Notification>>,
}

impl CollectingNotifier {
    /// Empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything notified so far, in order.
    pub fn events(&self) -> Vec<Notification> {
        self.events.lock().unwrap().clone()
    }
}

impl Notifier for CollectingNotifier {
    fn notify(&self, notification: &Notification) {
        self.events.lock().unwrap().push(notification.clone());
    }
}

/// Future that returns `Pending` exactly once, then completes. Lets
/// tests force two cooperating tasks to interleave.
pub async fn yield_now() {
    struct YieldNow {
        yielded: bool,
    }

    impl std::future::Future for YieldNow {
        type Output = ();

        fn poll(
            mut self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<()> {
            if self.yielded {
                std::task::Poll::Ready(())
            } else {
                self.yielded = true;
                cx.waker().wake_by_ref();
                std::task::Poll::Pending
            }
        }
    }

    YieldNow { yielded: false }.await
}
