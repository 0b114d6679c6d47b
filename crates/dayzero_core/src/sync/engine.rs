//! Sync engine orchestrator.
//!
//! On a came-online event the engine drains the operation queue exactly
//! once, reconciles against current remote state and performs one
//! consolidated remote write for the counter, regardless of queue depth.
//!
//! # Conflict model
//!
//! Counter operations are folded in timestamp order over the
//! freshly-fetched remote anchor: a `reset` assigns its own timestamp
//! absolutely, an `add-day` shifts the anchor being folded one day
//! earlier. Generic document operations are applied per-document,
//! independent of the fold.
//!
//! # Known race (by contract, not an oversight)
//!
//! If another client modified the remote anchor during this client's
//! offline window, the fetch in step one of the drain observes that value
//! and the fold is applied on top of it. The consolidated write is a
//! read-modify-write: the last sync to complete wins, and intervening
//! remote changes are overwritten. There is no causal merge.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::{SyncReport, SyncStatus};
use crate::cache::DocumentCache;
use crate::error::{DayzeroError, Result};
use crate::identity::IdentityProvider;
use crate::notify::{Notification, Notifier};
use crate::queue::{Operation, OperationKind, OperationQueue};
use crate::remote::{DocKey, RemoteDocumentStore};

/// Fold a sorted slice of operations onto a base anchor.
///
/// `reset` assigns the operation's own timestamp (later resets win over
/// earlier ones and over the base); `add-day` subtracts one day from the
/// anchor currently being folded, stacking with prior steps. Generic
/// operations do not touch the anchor.
pub fn fold_anchor(base: DateTime<Utc>, ops: &[Operation]) -> DateTime<Utc> {
    let mut anchor = base;
    for op in ops {
        match op.kind {
            OperationKind::Reset => anchor = op.timestamp,
            OperationKind::AddDay => anchor = anchor - chrono::Duration::days(1),
            _ => {}
        }
    }
    anchor
}

/// Drains the operation queue on reconnect and reconciles it against the
/// remote store.
pub struct SyncEngine {
    queue: Arc<OperationQueue>,
    cache: Arc<DocumentCache>,
    remote: Arc<dyn RemoteDocumentStore>,
    identity: Arc<dyn IdentityProvider>,
    notifier: Arc<dyn Notifier>,
    users_collection: String,
    anchor_field: String,
    drain_lock: AtomicBool,
}

impl SyncEngine {
    /// Assemble the engine from its collaborators.
    pub fn new(
        queue: Arc<OperationQueue>,
        cache: Arc<DocumentCache>,
        remote: Arc<dyn RemoteDocumentStore>,
        identity: Arc<dyn IdentityProvider>,
        notifier: Arc<dyn Notifier>,
        users_collection: impl Into<String>,
        anchor_field: impl Into<String>,
    ) -> Self {
        Self {
            queue,
            cache,
            remote,
            identity,
            notifier,
            users_collection: users_collection.into(),
            anchor_field: anchor_field.into(),
            drain_lock: AtomicBool::new(false),
        }
    }

    /// Run one sync drain.
    ///
    /// Single-flight: if a drain is already in progress this trigger is
    /// ignored — the running drain already observed every operation
    /// present at its start, so a second concurrent pass would only fold
    /// the same actions again. Returns
    /// [`SyncStatus::AlreadyRunning`] in that case.
    pub async fn sync_now(&self) -> Result<SyncStatus> {
        if self.drain_lock.swap(true, Ordering::SeqCst) {
            log::debug!("[SyncEngine] drain already in flight, ignoring trigger");
            return Ok(SyncStatus::AlreadyRunning);
        }

        let result = self.run_drain().await;
        self.drain_lock.store(false, Ordering::SeqCst);
        result
    }

    async fn run_drain(&self) -> Result<SyncStatus> {
        let Some(uid) = self.identity.current_user_id() else {
            log::debug!("[SyncEngine] no identity, skipping sync");
            return Ok(SyncStatus::NoIdentity);
        };

        if self.queue.is_empty() {
            return Ok(SyncStatus::QueueEmpty);
        }

        self.notifier.notify(&Notification::SyncStarted);
        let ops = self.queue.take_all().await?;
        log::info!("[SyncEngine] draining {} operation(s)", ops.len());

        let (counter_ops, doc_ops): (Vec<Operation>, Vec<Operation>) =
            ops.into_iter().partition(|op| op.kind.is_counter_op());

        let mut report = SyncReport::default();

        // Generic document operations, each against its own key.
        // Continue on error: one failure must not abort the pass.
        for op in doc_ops {
            match self.apply_doc_op(&op).await {
                Ok(()) => report.ops_applied += 1,
                Err(e) if e.is_transient() => {
                    let mut op = op;
                    op.retry_count += 1;
                    self.queue.requeue(op).await?;
                    report.ops_requeued += 1;
                }
                Err(e) => {
                    log::error!("[SyncEngine] {:?} for {} failed: {e}", op.kind, op.target);
                    report.failures.push(format!("{} {}: {e}", op_name(&op), op.target));
                }
            }
        }

        // Counter operations fold into one consolidated write.
        if !counter_ops.is_empty() {
            let profile_key = DocKey::new(self.users_collection.clone(), uid);
            match self.fold_and_write(&profile_key, &counter_ops).await {
                Ok(anchor) => {
                    report.ops_applied += counter_ops.len();
                    report.folded_anchor = Some(anchor);
                }
                Err(e) => {
                    if e.is_transient() {
                        // Atomicity from the caller's perspective: the
                        // folded write failed, so every folded operation
                        // goes back with its original timestamp.
                        for mut op in counter_ops {
                            op.retry_count += 1;
                            self.queue.requeue(op).await?;
                        }
                    }
                    self.notifier.notify(&Notification::SyncFailed {
                        reason: e.to_string(),
                    });
                    return Err(e);
                }
            }
        }

        self.notifier.notify(&Notification::SyncSucceeded {
            ops_applied: report.ops_applied,
        });
        log::info!(
            "[SyncEngine] drain complete: {} applied, {} requeued, {} failed",
            report.ops_applied,
            report.ops_requeued,
            report.failures.len()
        );
        Ok(SyncStatus::Completed(report))
    }

    /// Fetch the current remote anchor, fold the counter operations over
    /// it and issue exactly one remote write of the result.
    async fn fold_and_write(
        &self,
        profile_key: &DocKey,
        counter_ops: &[Operation],
    ) -> Result<DateTime<Utc>> {
        let snapshot = self.remote.get_doc(profile_key).await?;
        let base = snapshot
            .as_ref()
            .and_then(|doc| doc.get(&self.anchor_field))
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            // Absent profile or anchor: fold from the fetch moment. A
            // queued reset overrides this anyway.
            .unwrap_or_else(Utc::now);

        let anchor = fold_anchor(base, counter_ops);
        log::debug!(
            "[SyncEngine] folded {} counter op(s): {} -> {}",
            counter_ops.len(),
            base.to_rfc3339(),
            anchor.to_rfc3339()
        );

        let mut fields = serde_json::Map::new();
        fields.insert(
            self.anchor_field.clone(),
            Value::String(anchor.to_rfc3339()),
        );
        let patch = Value::Object(fields);

        match self.remote.set_doc(profile_key, &patch, true).await {
            Ok(()) => {}
            Err(DayzeroError::NotFound(_)) => {
                // Profile never created: recreate with a minimal document.
                let mut fields = serde_json::Map::new();
                fields.insert("uid".to_string(), Value::String(profile_key.id.clone()));
                fields.insert(
                    self.anchor_field.clone(),
                    Value::String(anchor.to_rfc3339()),
                );
                self.remote
                    .set_doc(profile_key, &Value::Object(fields), false)
                    .await?;
            }
            Err(e) => return Err(e),
        }

        self.cache.merge(profile_key, patch).await?;
        Ok(anchor)
    }

    async fn apply_doc_op(&self, op: &Operation) -> Result<()> {
        match op.kind {
            OperationKind::Create => {
                let payload = op.payload.clone().unwrap_or_else(empty_object);
                self.remote.set_doc(&op.target, &payload, false).await?;
                self.cache.set(&op.target, payload).await
            }
            OperationKind::Update => {
                let payload = op.payload.clone().unwrap_or_else(empty_object);
                match self.remote.set_doc(&op.target, &payload, true).await {
                    Ok(()) => {}
                    Err(DayzeroError::NotFound(_)) => {
                        // Document vanished while the update was queued:
                        // recreate it from the payload.
                        self.remote.set_doc(&op.target, &payload, false).await?;
                    }
                    Err(e) => return Err(e),
                }
                self.cache.merge(&op.target, payload).await
            }
            OperationKind::Delete => {
                match self.remote.delete_doc(&op.target).await {
                    // Already gone: the delete is satisfied.
                    Ok(()) | Err(DayzeroError::NotFound(_)) => {}
                    Err(e) => return Err(e),
                }
                // Remote delete confirmed: drop the tombstone.
                self.cache.purge(&op.target).await
            }
            // Counter ops are folded, never applied per-document.
            OperationKind::Reset | OperationKind::AddDay => Ok(()),
        }
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("pending", &self.queue.len())
            .field("in_flight", &self.drain_lock.load(Ordering::SeqCst))
            .finish()
    }
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

fn op_name(op: &Operation) -> &'static str {
    match op.kind {
        OperationKind::Reset => "reset",
        OperationKind::AddDay => "add-day",
        OperationKind::Create => "create",
        OperationKind::Update => "update",
        OperationKind::Delete => "delete",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::StaticIdentity;
    use crate::notify::LogNotifier;
    use crate::storage::{KeyValueStore, MemoryKvStore};
    use crate::test_utils::{FailureMode, MockRemoteStore};
    use chrono::TimeZone;
    use futures_lite::future::block_on;
    use serde_json::json;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn day(n: i64) -> chrono::Duration {
        chrono::Duration::days(n)
    }

    struct Fixture {
        engine: SyncEngine,
        remote: Arc<MockRemoteStore>,
        queue: Arc<OperationQueue>,
        cache: Arc<DocumentCache>,
    }

    fn create_test_engine(uid: Option<&str>) -> Fixture {
        let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryKvStore::new());
        let remote = Arc::new(MockRemoteStore::new());
        let queue = Arc::new(block_on(OperationQueue::load(
            Arc::clone(&kv),
            "pending_operations",
        )));
        let cache = Arc::new(block_on(DocumentCache::load(kv, "document_cache")));
        let identity = match uid {
            Some(uid) => StaticIdentity::signed_in(uid),
            None => StaticIdentity::signed_out(),
        };
        let engine = SyncEngine::new(
            Arc::clone(&queue),
            Arc::clone(&cache),
            Arc::clone(&remote) as Arc<dyn RemoteDocumentStore>,
            Arc::new(identity),
            Arc::new(LogNotifier),
            "users",
            "quitSince",
        );
        Fixture {
            engine,
            remote,
            queue,
            cache,
        }
    }

    fn counter_op(kind: OperationKind, at: DateTime<Utc>) -> Operation {
        Operation::at(kind, DocKey::new("users", "u1"), None, at)
    }

    #[test]
    fn test_fold_reset_is_idempotent() {
        let ops = vec![
            counter_op(OperationKind::Reset, ts(1000)),
            counter_op(OperationKind::Reset, ts(1000)),
        ];
        assert_eq!(fold_anchor(ts(0), &ops), ts(1000));
        assert_eq!(fold_anchor(ts(0), &ops[..1]), ts(1000));
    }

    #[test]
    fn test_fold_later_reset_wins() {
        let ops = vec![
            counter_op(OperationKind::Reset, ts(100)),
            counter_op(OperationKind::Reset, ts(900)),
        ];
        assert_eq!(fold_anchor(ts(5000), &ops), ts(900));
    }

    #[test]
    fn test_fold_add_day_stacks() {
        let ops = vec![
            counter_op(OperationKind::AddDay, ts(10)),
            counter_op(OperationKind::AddDay, ts(20)),
        ];
        assert_eq!(fold_anchor(ts(0), &ops), ts(0) - day(2));
    }

    #[test]
    fn test_fold_reset_then_add_day() {
        // [add-day@t1, reset@t2, add-day@t3] == reset-to-t2 minus one day.
        let ops = vec![
            counter_op(OperationKind::AddDay, ts(100)),
            counter_op(OperationKind::Reset, ts(200)),
            counter_op(OperationKind::AddDay, ts(300)),
        ];
        assert_eq!(fold_anchor(ts(0), &ops), ts(200) - day(1));
    }

    #[test]
    fn test_drain_result_independent_of_storage_order() {
        // Same operations, enqueued in two different physical orders.
        let orders: Vec<Vec<Operation>> = vec![
            vec![
                counter_op(OperationKind::AddDay, ts(100)),
                counter_op(OperationKind::Reset, ts(200)),
                counter_op(OperationKind::AddDay, ts(300)),
            ],
            vec![
                counter_op(OperationKind::AddDay, ts(300)),
                counter_op(OperationKind::AddDay, ts(100)),
                counter_op(OperationKind::Reset, ts(200)),
            ],
        ];

        let mut anchors = Vec::new();
        for ops in orders {
            let fx = create_test_engine(Some("u1"));
            for op in ops {
                block_on(fx.queue.enqueue(op)).unwrap();
            }
            let status = block_on(fx.engine.sync_now()).unwrap();
            anchors.push(status.report().unwrap().folded_anchor.unwrap());
        }

        assert_eq!(anchors[0], ts(200) - day(1));
        assert_eq!(anchors[1], anchors[0]);
    }

    #[test]
    fn test_drain_issues_exactly_one_remote_write() {
        let fx = create_test_engine(Some("u1"));
        let profile = DocKey::new("users", "u1");
        fx.remote
            .insert(&profile, json!({"uid": "u1", "quitSince": ts(0).to_rfc3339()}));

        for i in 0..5i64 {
            block_on(
                fx.queue
                    .enqueue(counter_op(OperationKind::AddDay, ts(100 + i))),
            )
            .unwrap();
        }
        fx.remote.reset_counters();

        let status = block_on(fx.engine.sync_now()).unwrap();
        let report = status.report().unwrap();

        assert_eq!(report.ops_applied, 5);
        assert_eq!(fx.remote.set_calls(), 1, "write amplification must be O(1)");
        assert!(fx.queue.is_empty());
        assert_eq!(report.folded_anchor, Some(ts(0) - day(5)));
    }

    #[test]
    fn test_empty_queue_does_no_remote_io() {
        let fx = create_test_engine(Some("u1"));
        let status = block_on(fx.engine.sync_now()).unwrap();
        assert_eq!(status, SyncStatus::QueueEmpty);
        assert_eq!(fx.remote.get_calls(), 0);
        assert_eq!(fx.remote.set_calls(), 0);
    }

    #[test]
    fn test_no_identity_leaves_queue_untouched() {
        let fx = create_test_engine(None);
        block_on(fx.queue.enqueue(counter_op(OperationKind::Reset, ts(5)))).unwrap();

        let status = block_on(fx.engine.sync_now()).unwrap();
        assert_eq!(status, SyncStatus::NoIdentity);
        assert_eq!(fx.queue.len(), 1);
        assert_eq!(fx.remote.get_calls(), 0);
    }

    #[test]
    fn test_absent_profile_is_created_by_fold() {
        let fx = create_test_engine(Some("u1"));
        block_on(fx.queue.enqueue(counter_op(OperationKind::Reset, ts(777)))).unwrap();

        let status = block_on(fx.engine.sync_now()).unwrap();
        assert_eq!(status.report().unwrap().folded_anchor, Some(ts(777)));

        let written = fx.remote.get_snapshot(&DocKey::new("users", "u1")).unwrap();
        assert_eq!(written["uid"], "u1");
        assert_eq!(written["quitSince"], ts(777).to_rfc3339());
    }

    #[test]
    fn test_transient_failure_requeues_counter_ops() {
        let fx = create_test_engine(Some("u1"));
        let op = counter_op(OperationKind::Reset, ts(50));
        let id = op.id.clone();
        block_on(fx.queue.enqueue(op)).unwrap();

        fx.remote.set_failure(Some(FailureMode::Transient));
        let err = block_on(fx.engine.sync_now()).unwrap_err();
        assert!(err.is_transient());

        // Back in the queue with original timestamp and bumped retry.
        let pending = fx.queue.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, id);
        assert_eq!(pending[0].timestamp, ts(50));
        assert_eq!(pending[0].retry_count, 1);

        // The next (successful) drain applies it.
        fx.remote.set_failure(None);
        let status = block_on(fx.engine.sync_now()).unwrap();
        assert_eq!(status.report().unwrap().folded_anchor, Some(ts(50)));
        assert!(fx.queue.is_empty());
    }

    #[test]
    fn test_permission_failure_is_not_requeued() {
        let fx = create_test_engine(Some("u1"));
        block_on(fx.queue.enqueue(counter_op(OperationKind::Reset, ts(50)))).unwrap();

        fx.remote.set_failure(Some(FailureMode::Permission));
        let err = block_on(fx.engine.sync_now()).unwrap_err();
        assert!(matches!(err, DayzeroError::PermissionDenied(_)));
        assert!(fx.queue.is_empty(), "retrying cannot fix authorization");
    }

    #[test]
    fn test_generic_delete_of_absent_doc_is_satisfied() {
        let fx = create_test_engine(Some("u1"));
        let key = DocKey::new("habits", "h1");
        block_on(fx.cache.set(&key, json!({"name": "run"}))).unwrap();
        block_on(fx.cache.delete(&key)).unwrap();
        block_on(
            fx.queue
                .enqueue(Operation::at(OperationKind::Delete, key.clone(), None, ts(9))),
        )
        .unwrap();

        let status = block_on(fx.engine.sync_now()).unwrap();
        assert_eq!(status.report().unwrap().ops_applied, 1);
        // Tombstone dropped after confirmation.
        assert_eq!(fx.cache.len(), 0);
    }

    #[test]
    fn test_generic_update_of_absent_doc_recreates() {
        let fx = create_test_engine(Some("u1"));
        let key = DocKey::new("habits", "h1");
        block_on(fx.queue.enqueue(Operation::at(
            OperationKind::Update,
            key.clone(),
            Some(json!({"name": "walk"})),
            ts(9),
        )))
        .unwrap();

        block_on(fx.engine.sync_now()).unwrap();
        assert_eq!(fx.remote.get_snapshot(&key), Some(json!({"name": "walk"})));
    }

    #[test]
    fn test_single_flight_second_trigger_is_noop() {
        let fx = create_test_engine(Some("u1"));
        fx.remote.insert(
            &DocKey::new("users", "u1"),
            json!({"uid": "u1", "quitSince": ts(0).to_rfc3339()}),
        );
        block_on(fx.queue.enqueue(counter_op(OperationKind::Reset, ts(10)))).unwrap();

        // Remote calls yield once, so the second sync starts while the
        // first holds the drain lock.
        fx.remote.set_yield_once(true);
        let (a, b) = block_on(futures_lite::future::zip(
            fx.engine.sync_now(),
            fx.engine.sync_now(),
        ));

        let statuses = [a.unwrap(), b.unwrap()];
        assert!(statuses.contains(&SyncStatus::AlreadyRunning));
        assert!(
            statuses
                .iter()
                .any(|s| matches!(s, SyncStatus::Completed(_)))
        );
        // Exactly one fold-and-write happened.
        assert_eq!(fx.remote.set_calls(), 1);
        assert!(fx.queue.is_empty());
    }

    #[test]
    fn test_notifications_distinguish_success_and_failure() {
        use crate::notify::Notification;
        use crate::test_utils::CollectingNotifier;

        let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryKvStore::new());
        let remote = Arc::new(MockRemoteStore::new());
        let queue = Arc::new(block_on(OperationQueue::load(
            Arc::clone(&kv),
            "pending_operations",
        )));
        let cache = Arc::new(block_on(DocumentCache::load(kv, "document_cache")));
        let notifier = Arc::new(CollectingNotifier::new());
        let engine = SyncEngine::new(
            Arc::clone(&queue),
            cache,
            Arc::clone(&remote) as Arc<dyn RemoteDocumentStore>,
            Arc::new(StaticIdentity::signed_in("u1")),
            Arc::clone(&notifier) as Arc<dyn Notifier>,
            "users",
            "quitSince",
        );

        block_on(queue.enqueue(counter_op(OperationKind::Reset, ts(1)))).unwrap();
        remote.set_failure(Some(FailureMode::Transient));
        block_on(engine.sync_now()).unwrap_err();

        remote.set_failure(None);
        block_on(engine.sync_now()).unwrap();

        let events = notifier.events();
        assert_eq!(events[0], Notification::SyncStarted);
        assert!(matches!(events[1], Notification::SyncFailed { .. }));
        assert_eq!(events[2], Notification::SyncStarted);
        assert_eq!(events[3], Notification::SyncSucceeded { ops_applied: 1 });
    }

    #[test]
    fn test_generic_failure_does_not_abort_pass() {
        let fx = create_test_engine(Some("u1"));
        // A create with a payload the mock rejects as permission-denied
        // for this specific collection.
        fx.remote.deny_collection("locked");
        block_on(fx.queue.enqueue(Operation::at(
            OperationKind::Create,
            DocKey::new("locked", "x"),
            Some(json!({})),
            ts(1),
        )))
        .unwrap();
        block_on(fx.queue.enqueue(Operation::at(
            OperationKind::Create,
            DocKey::new("open", "y"),
            Some(json!({"ok": true})),
            ts(2),
        )))
        .unwrap();

        let status = block_on(fx.engine.sync_now()).unwrap();
        let report = status.report().unwrap();
        assert_eq!(report.ops_applied, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(
            fx.remote.get_snapshot(&DocKey::new("open", "y")),
            Some(json!({"ok": true}))
        );
    }
}
