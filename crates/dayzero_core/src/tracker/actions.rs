//! Persisted log of pending counter actions.
//!
//! While offline, reset/add-day actions are queued as operations for the
//! sync engine *and* recorded here, in the counter feature's own blob.
//! The log lets the tracker report how many actions are pending and
//! re-derive an optimistic anchor even if the cached profile was evicted
//! under storage pressure. It is cleared when a sync pass completes, so
//! actions are never applied twice.

use std::sync::Arc;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::storage::KeyValueStore;

/// Kind of a pending counter action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CounterActionKind {
    /// Anchor becomes the action's own timestamp.
    Reset,
    /// Anchor moves one day earlier.
    AddDay,
}

/// One pending counter action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CounterAction {
    /// What the action does.
    pub kind: CounterActionKind,
    /// Instant the user performed the action.
    pub timestamp: DateTime<Utc>,
}

/// Durable list of counter actions awaiting sync.
pub struct ActionLog {
    actions: RwLock<Vec<CounterAction>>,
    store: Arc<dyn KeyValueStore>,
    storage_key: String,
}

impl ActionLog {
    /// Load the log from durable storage, starting empty when the blob
    /// is absent or corrupt.
    pub async fn load(store: Arc<dyn KeyValueStore>, storage_key: impl Into<String>) -> Self {
        let storage_key = storage_key.into();
        let actions = match store.get(&storage_key).await {
            Ok(Some(blob)) => serde_json::from_str(&blob).unwrap_or_else(|e| {
                log::warn!("[Tracker] discarding corrupt action log: {e}");
                Vec::new()
            }),
            Ok(None) => Vec::new(),
            Err(e) => {
                log::warn!("[Tracker] failed to read action log: {e}");
                Vec::new()
            }
        };
        Self {
            actions: RwLock::new(actions),
            store,
            storage_key,
        }
    }

    /// Record an action and persist the log.
    pub async fn append(&self, kind: CounterActionKind, timestamp: DateTime<Utc>) -> Result<()> {
        {
            let mut actions = self.actions.write().unwrap();
            actions.push(CounterAction { kind, timestamp });
        }
        self.persist().await
    }

    /// Pending actions, in recorded order.
    pub fn pending(&self) -> Vec<CounterAction> {
        self.actions.read().unwrap().clone()
    }

    /// Number of pending actions.
    pub fn len(&self) -> usize {
        self.actions.read().unwrap().len()
    }

    /// Whether no actions are pending.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all pending actions and the persisted blob. Called after a
    /// sync pass has folded them remotely.
    pub async fn clear(&self) -> Result<()> {
        {
            let mut actions = self.actions.write().unwrap();
            actions.clear();
        }
        self.store.remove(&self.storage_key).await
    }

    /// Derive the anchor the pending actions imply on top of `base`.
    ///
    /// Actions are applied in timestamp order with the same semantics as
    /// the engine fold. With no base and no reset, an add-day starts from
    /// one day before `now` (a counter that was never anchored shows one
    /// day once a day is added).
    pub fn optimistic_anchor(
        &self,
        base: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        let mut actions = self.pending();
        if actions.is_empty() {
            return base;
        }
        actions.sort_by_key(|action| action.timestamp);

        let mut anchor = base;
        for action in actions {
            anchor = Some(match action.kind {
                CounterActionKind::Reset => action.timestamp,
                CounterActionKind::AddDay => {
                    anchor.unwrap_or(now) - chrono::Duration::days(1)
                }
            });
        }
        anchor
    }

    async fn persist(&self) -> Result<()> {
        let blob = {
            let actions = self.actions.read().unwrap();
            serde_json::to_string(&*actions)?
        };
        self.store.set(&self.storage_key, &blob).await
    }
}

impl std::fmt::Debug for ActionLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionLog")
            .field("pending", &self.len())
            .field("storage_key", &self.storage_key)
            .finish()
    }
}
