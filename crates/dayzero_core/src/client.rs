//! Unified Dayzero client API (async-first).
//!
//! [`DayzeroClient`] assembles the component graph from injected
//! collaborators and owns the one piece of wiring the components must
//! not own themselves: a connectivity transition to online triggers
//! exactly one sync drain (plus the tracker acknowledgement), never one
//! per probe tick.
//!
//! # Example
//!
//! ```ignore
//! use dayzero_core::client::DayzeroClient;
//! use dayzero_core::config::Config;
//!
//! let client = DayzeroClient::new(remote, storage, identity, probe, notifier, Config::default()).await;
//!
//! client.tracker().reset().await?;                 // online or offline
//! let days = client.tracker().current_streak().await?;
//!
//! // Embedder event loop:
//! client.set_link_state(true).await?;              // platform signal
//! client.probe_tick().await?;                      // every probe interval
//! ```

use std::sync::Arc;

use crate::cache::DocumentCache;
use crate::config::Config;
use crate::connectivity::{ConnectivityMonitor, NetworkProbe, Transition};
use crate::error::Result;
use crate::identity::IdentityProvider;
use crate::notify::Notifier;
use crate::queue::OperationQueue;
use crate::remote::RemoteDocumentStore;
use crate::storage::KeyValueStore;
use crate::store::DocStore;
use crate::sync::{SyncEngine, SyncStatus};
use crate::tracker::{ActionLog, StreakTracker};

/// The wired-up offline-first client.
pub struct DayzeroClient {
    config: Config,
    monitor: Arc<ConnectivityMonitor>,
    cache: Arc<DocumentCache>,
    queue: Arc<OperationQueue>,
    docs: Arc<DocStore>,
    engine: Arc<SyncEngine>,
    tracker: Arc<StreakTracker>,
}

impl DayzeroClient {
    /// Build the client, loading the durable queue, cache and action log
    /// from `storage` so state from before a restart is drainable again.
    ///
    /// Starts assuming online; feed the real platform state via
    /// [`set_link_state`](Self::set_link_state) once known.
    pub async fn new(
        remote: Arc<dyn RemoteDocumentStore>,
        storage: Arc<dyn KeyValueStore>,
        identity: Arc<dyn IdentityProvider>,
        probe: Arc<dyn NetworkProbe>,
        notifier: Arc<dyn Notifier>,
        config: Config,
    ) -> Self {
        let monitor = Arc::new(ConnectivityMonitor::new(
            probe,
            config.probe_interval(),
            true,
        ));
        let cache = Arc::new(DocumentCache::load(Arc::clone(&storage), config.cache_key.clone()).await);
        let queue = Arc::new(OperationQueue::load(Arc::clone(&storage), config.queue_key.clone()).await);
        let actions = ActionLog::load(Arc::clone(&storage), config.actions_key.clone()).await;

        let docs = Arc::new(DocStore::new(
            Arc::clone(&remote),
            Arc::clone(&cache),
            Arc::clone(&queue),
            Arc::clone(&monitor),
            Arc::clone(&notifier),
        ));
        let engine = Arc::new(SyncEngine::new(
            Arc::clone(&queue),
            Arc::clone(&cache),
            Arc::clone(&remote),
            Arc::clone(&identity),
            Arc::clone(&notifier),
            config.users_collection.clone(),
            config.anchor_field.clone(),
        ));
        let tracker = Arc::new(StreakTracker::new(
            Arc::clone(&docs),
            remote,
            Arc::clone(&cache),
            Arc::clone(&queue),
            Arc::clone(&monitor),
            identity,
            notifier,
            actions,
            config.users_collection.clone(),
            config.anchor_field.clone(),
        ));

        Self {
            config,
            monitor,
            cache,
            queue,
            docs,
            engine,
            tracker,
        }
    }

    /// The wiring configuration this client was built with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Offline-first document CRUD.
    pub fn docs(&self) -> &DocStore {
        &self.docs
    }

    /// The habit counter.
    pub fn tracker(&self) -> &StreakTracker {
        &self.tracker
    }

    /// The connectivity monitor (for UI subscriptions).
    pub fn monitor(&self) -> &ConnectivityMonitor {
        &self.monitor
    }

    /// The document cache (for diagnostics).
    pub fn cache(&self) -> &DocumentCache {
        &self.cache
    }

    /// Number of operations waiting for the next sync pass.
    pub fn pending_operations(&self) -> usize {
        self.queue.len()
    }

    /// Feed the platform reachability flag. An offline→online transition
    /// triggers one sync drain; everything else is a no-op.
    pub async fn set_link_state(&self, link_up: bool) -> Result<Option<SyncStatus>> {
        match self.monitor.set_link_state(link_up) {
            Some(Transition::CameOnline) => Ok(Some(self.drain_and_acknowledge().await?)),
            _ => Ok(None),
        }
    }

    /// Run one connectivity probe. Call this every
    /// [`Config::probe_interval`]. Only an offline→online transition
    /// triggers a sync drain — a steady online verdict does not.
    pub async fn probe_tick(&self) -> Result<Option<SyncStatus>> {
        match self.monitor.probe_tick().await {
            Some(Transition::CameOnline) => Ok(Some(self.drain_and_acknowledge().await?)),
            _ => Ok(None),
        }
    }

    /// Trigger a sync drain manually (e.g. a pull-to-refresh).
    pub async fn sync_now(&self) -> Result<SyncStatus> {
        self.drain_and_acknowledge().await
    }

    /// Blocking wrapper around [`sync_now`](Self::sync_now) for
    /// synchronous native callers.
    #[cfg(not(target_arch = "wasm32"))]
    pub fn sync_now_blocking(&self) -> Result<SyncStatus> {
        futures_lite::future::block_on(self.sync_now())
    }

    async fn drain_and_acknowledge(&self) -> Result<SyncStatus> {
        let status = self.engine.sync_now().await?;
        if matches!(status, SyncStatus::Completed(_)) {
            self.tracker.acknowledge_sync().await?;
        }
        Ok(status)
    }
}

impl std::fmt::Debug for DayzeroClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DayzeroClient")
            .field("online", &self.monitor.is_online())
            .field("pending_operations", &self.pending_operations())
            .finish()
    }
}
