//! Durable queue of pending write operations.
//!
//! Every write made while offline becomes a typed [`Operation`] appended
//! here. The queue persists as one serialized blob after every mutation,
//! so operations enqueued before a crash or restart are still present and
//! drainable afterwards.
//!
//! Storage order is insertion order and carries no meaning: two writes
//! can be enqueued out of timestamp order (clock adjustments, re-queued
//! failures). [`take_all`](OperationQueue::take_all) therefore sorts by
//! timestamp before handing operations to the sync engine, which is the
//! only ordering the fold relies on.

use std::sync::Arc;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::remote::DocKey;
use crate::storage::KeyValueStore;

/// Kind of a queued write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationKind {
    /// Counter reset: anchor becomes the operation's own timestamp.
    Reset,
    /// Counter add-day: anchor moves one day earlier.
    AddDay,
    /// Generic document create (full write).
    Create,
    /// Generic document update (merge write).
    Update,
    /// Generic document delete.
    Delete,
}

impl OperationKind {
    /// Whether this kind participates in the anchor fold rather than
    /// being applied per-document.
    pub fn is_counter_op(&self) -> bool {
        matches!(self, OperationKind::Reset | OperationKind::AddDay)
    }
}

/// One pending write, queued for replay on reconnect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    /// Unique id, assigned at enqueue time if absent.
    pub id: String,
    /// What the operation does.
    pub kind: OperationKind,
    /// Document the operation targets.
    pub target: DocKey,
    /// Payload for generic create/update operations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// Client-observed instant of the user action. Replays preserve it.
    pub timestamp: DateTime<Utc>,
    /// How many sync passes have already failed to apply this operation.
    #[serde(default)]
    pub retry_count: u32,
}

impl Operation {
    /// Create an operation stamped now with a fresh id.
    pub fn new(kind: OperationKind, target: DocKey, payload: Option<Value>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            target,
            payload,
            timestamp: Utc::now(),
            retry_count: 0,
        }
    }

    /// Create an operation with an explicit timestamp.
    pub fn at(
        kind: OperationKind,
        target: DocKey,
        payload: Option<Value>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            timestamp,
            ..Self::new(kind, target, payload)
        }
    }
}

/// Durable, ordered list of pending operations.
pub struct OperationQueue {
    ops: RwLock<Vec<Operation>>,
    store: Arc<dyn KeyValueStore>,
    storage_key: String,
}

impl OperationQueue {
    /// Load the queue from durable storage, starting empty when the blob
    /// is absent. A corrupt blob is logged and discarded.
    pub async fn load(store: Arc<dyn KeyValueStore>, storage_key: impl Into<String>) -> Self {
        let storage_key = storage_key.into();
        let ops = match store.get(&storage_key).await {
            Ok(Some(blob)) => match serde_json::from_str::<Vec<Operation>>(&blob) {
                Ok(ops) => ops,
                Err(e) => {
                    log::warn!("[Queue] discarding corrupt queue blob: {e}");
                    Vec::new()
                }
            },
            Ok(None) => Vec::new(),
            Err(e) => {
                log::warn!("[Queue] failed to read queue blob: {e}");
                Vec::new()
            }
        };

        if !ops.is_empty() {
            log::info!("[Queue] loaded {} pending operation(s)", ops.len());
        }
        Self {
            ops: RwLock::new(ops),
            store,
            storage_key,
        }
    }

    /// Append an operation and persist the queue. Assigns an id when the
    /// caller left it empty. Never touches the remote store.
    pub async fn enqueue(&self, mut op: Operation) -> Result<()> {
        if op.id.is_empty() {
            op.id = uuid::Uuid::new_v4().to_string();
        }
        log::debug!("[Queue] enqueue {:?} for {}", op.kind, op.target);
        {
            let mut ops = self.ops.write().unwrap();
            ops.push(op);
        }
        self.persist().await
    }

    /// Remove and return every pending operation, sorted ascending by
    /// timestamp (stable, so equal timestamps keep insertion order).
    ///
    /// The queue is persisted empty before the caller starts replaying;
    /// operations that fail replay are individually re-queued via
    /// [`requeue`](Self::requeue).
    pub async fn take_all(&self) -> Result<Vec<Operation>> {
        let mut taken = {
            let mut ops = self.ops.write().unwrap();
            std::mem::take(&mut *ops)
        };
        if let Err(e) = self.persist().await {
            // Persisting the emptied queue failed; put the operations
            // back so nothing is lost.
            let mut ops = self.ops.write().unwrap();
            *ops = taken;
            return Err(e);
        }
        taken.sort_by_key(|op| op.timestamp);
        Ok(taken)
    }

    /// Put a failed operation back, preserving its original timestamp so
    /// a later drain folds it in the right position.
    pub async fn requeue(&self, op: Operation) -> Result<()> {
        log::debug!(
            "[Queue] requeue {:?} for {} (retry {})",
            op.kind,
            op.target,
            op.retry_count
        );
        {
            let mut ops = self.ops.write().unwrap();
            ops.push(op);
        }
        self.persist().await
    }

    /// Number of pending operations.
    pub fn len(&self) -> usize {
        self.ops.read().unwrap().len()
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of pending operations, in storage order.
    pub fn pending(&self) -> Vec<Operation> {
        self.ops.read().unwrap().clone()
    }

    async fn persist(&self) -> Result<()> {
        let blob = {
            let ops = self.ops.read().unwrap();
            serde_json::to_string(&*ops)?
        };
        self.store.set(&self.storage_key, &blob).await
    }
}

impl std::fmt::Debug for OperationQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationQueue")
            .field("pending", &self.len())
            .field("storage_key", &self.storage_key)
            .finish()
    }
}
