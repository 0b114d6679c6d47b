//! Counter domain logic.
//!
//! The counter is never stored. The profile document holds a single
//! anchor instant and the displayed value is always derived:
//! `max(0, floor((now − anchor) / 1 day))`. Partial days floor, a future
//! anchor clamps to zero.
//!
//! "Reset" sets the anchor to the instant of the action itself. "Add one
//! day" moves the anchor one day earlier instead of incrementing a
//! stored integer, which keeps the counter consistent with elapsed
//! wall-clock time even when the app stays closed for days.

mod actions;
mod profile;

pub use actions::{ActionLog, CounterAction, CounterActionKind};
pub use profile::UserProfile;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::cache::DocumentCache;
use crate::connectivity::ConnectivityMonitor;
use crate::error::{DayzeroError, Result};
use crate::identity::IdentityProvider;
use crate::notify::{Notification, Notifier};
use crate::queue::{Operation, OperationKind, OperationQueue};
use crate::remote::{DocKey, RemoteDocumentStore};
use crate::store::DocStore;

const SECONDS_PER_DAY: i64 = 86_400;

/// Days elapsed since `anchor`, floored, never negative.
pub fn days_since(anchor: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    let elapsed = (now - anchor).num_seconds();
    (elapsed / SECONDS_PER_DAY).max(0)
}

/// The habit counter: derived reads plus reset/add-day mutations that
/// work online or offline.
pub struct StreakTracker {
    docs: Arc<DocStore>,
    remote: Arc<dyn RemoteDocumentStore>,
    cache: Arc<DocumentCache>,
    queue: Arc<OperationQueue>,
    monitor: Arc<ConnectivityMonitor>,
    identity: Arc<dyn IdentityProvider>,
    notifier: Arc<dyn Notifier>,
    actions: ActionLog,
    users_collection: String,
    anchor_field: String,
}

impl StreakTracker {
    /// Assemble the tracker from its collaborators.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        docs: Arc<DocStore>,
        remote: Arc<dyn RemoteDocumentStore>,
        cache: Arc<DocumentCache>,
        queue: Arc<OperationQueue>,
        monitor: Arc<ConnectivityMonitor>,
        identity: Arc<dyn IdentityProvider>,
        notifier: Arc<dyn Notifier>,
        actions: ActionLog,
        users_collection: impl Into<String>,
        anchor_field: impl Into<String>,
    ) -> Self {
        Self {
            docs,
            remote,
            cache,
            queue,
            monitor,
            identity,
            notifier,
            actions,
            users_collection: users_collection.into(),
            anchor_field: anchor_field.into(),
        }
    }

    /// Current derived counter value.
    ///
    /// Reads through the offline-first store (remote when online, cache
    /// otherwise). Returns 0 when signed out, when no profile exists, or
    /// when no anchor has been set yet. If the cached profile was evicted
    /// while actions are still pending, the pending actions re-derive an
    /// optimistic anchor.
    pub async fn current_streak(&self) -> Result<i64> {
        let Some(key) = self.profile_key() else {
            return Ok(0);
        };

        let now = Utc::now();
        let anchor = match self.docs.get(&key).await? {
            Some(snapshot) => UserProfile::from_snapshot(snapshot)?.quit_since,
            None => self.actions.optimistic_anchor(None, now),
        };

        Ok(anchor.map(|anchor| days_since(anchor, now)).unwrap_or(0))
    }

    /// Number of counter actions queued while offline and not yet
    /// confirmed by a sync pass.
    pub fn pending_actions(&self) -> usize {
        self.actions.len()
    }

    /// Reset the counter: the anchor becomes now and the displayed value
    /// becomes 0, growing naturally afterwards.
    ///
    /// Returns `false` when signed out (no-op).
    pub async fn reset(&self) -> Result<bool> {
        let Some(key) = self.profile_key() else {
            return Ok(false);
        };
        let now = Utc::now();

        if self.monitor.is_online() {
            self.write_anchor(&key, now).await?;
        } else {
            self.queue
                .enqueue(Operation::at(OperationKind::Reset, key.clone(), None, now))
                .await?;
            self.cache.merge(&key, self.anchor_patch(now)).await?;
            self.actions.append(CounterActionKind::Reset, now).await?;
            self.notifier.notify(&Notification::OfflineWriteQueued {
                target: key.path(),
            });
        }
        Ok(true)
    }

    /// Move the anchor one day earlier, adding one day to the displayed
    /// counter.
    ///
    /// Returns `false` when signed out (no-op).
    pub async fn add_one_day(&self) -> Result<bool> {
        let Some(key) = self.profile_key() else {
            return Ok(false);
        };
        let now = Utc::now();

        if self.monitor.is_online() {
            // Never anchored yet: one day back from now, so the counter
            // shows exactly one day.
            let current = self.remote_anchor(&key).await?;
            let anchor = current.unwrap_or(now) - chrono::Duration::days(1);
            self.write_anchor(&key, anchor).await?;
        } else {
            self.queue
                .enqueue(Operation::at(OperationKind::AddDay, key.clone(), None, now))
                .await?;
            let cached = self
                .cache
                .get(&key)
                .and_then(|snapshot| UserProfile::from_snapshot(snapshot).ok())
                .and_then(|profile| profile.quit_since);
            let anchor = cached.unwrap_or(now) - chrono::Duration::days(1);
            self.cache.merge(&key, self.anchor_patch(anchor)).await?;
            self.actions.append(CounterActionKind::AddDay, now).await?;
            self.notifier.notify(&Notification::OfflineWriteQueued {
                target: key.path(),
            });
        }
        Ok(true)
    }

    /// Forget pending actions once a sync pass has folded them remotely.
    /// Called by the client facade after a completed drain.
    pub async fn acknowledge_sync(&self) -> Result<()> {
        if !self.actions.is_empty() {
            log::debug!(
                "[Tracker] clearing {} confirmed action(s)",
                self.actions.len()
            );
            self.actions.clear().await?;
        }
        Ok(())
    }

    fn profile_key(&self) -> Option<DocKey> {
        self.identity
            .current_user_id()
            .map(|uid| DocKey::new(self.users_collection.clone(), uid))
    }

    fn anchor_patch(&self, anchor: DateTime<Utc>) -> Value {
        let mut fields = serde_json::Map::new();
        fields.insert(
            self.anchor_field.clone(),
            Value::String(anchor.to_rfc3339()),
        );
        Value::Object(fields)
    }

    async fn remote_anchor(&self, key: &DocKey) -> Result<Option<DateTime<Utc>>> {
        match self.remote.get_doc(key).await? {
            Some(snapshot) => Ok(UserProfile::from_snapshot(snapshot)?.quit_since),
            None => Ok(None),
        }
    }

    async fn write_anchor(&self, key: &DocKey, anchor: DateTime<Utc>) -> Result<()> {
        let patch = self.anchor_patch(anchor);
        match self.remote.set_doc(key, &patch, true).await {
            Ok(()) => {}
            Err(DayzeroError::NotFound(_)) => {
                // First anchor write for a profile that was never
                // created: write a minimal full document.
                let mut fields = serde_json::Map::new();
                fields.insert("uid".to_string(), Value::String(key.id.clone()));
                fields.insert(
                    self.anchor_field.clone(),
                    Value::String(anchor.to_rfc3339()),
                );
                self.remote.set_doc(key, &Value::Object(fields), false).await?;
            }
            Err(e) => return Err(e),
        }
        self.cache.merge(key, patch).await
    }
}

impl std::fmt::Debug for StreakTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreakTracker")
            .field("pending_actions", &self.pending_actions())
            .finish()
    }
}
