//! Sync engine and conflict fold.
//!
//! # Architecture
//!
//! ```text
//! ConnectivityMonitor ── came online ──▶ SyncEngine
//!                                          │ drain (single-flight)
//!                                OperationQueue (sorted by timestamp)
//!                                          │ fold over fetched anchor
//!                                RemoteDocumentStore (one write)
//!                                          │
//!                                    DocumentCache
//! ```
//!
//! # Key Components
//!
//! - [`SyncEngine`] - drains the queue once per reconnect and reconciles
//! - [`fold_anchor`] - the deterministic fold of counter operations
//! - [`SyncReport`] / [`SyncStatus`] - what a pass did, or why it didn't run

mod engine;

pub use engine::{SyncEngine, fold_anchor};

use chrono::{DateTime, Utc};

/// What one completed sync pass did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    /// Final folded anchor, when counter operations were folded.
    pub folded_anchor: Option<DateTime<Utc>>,
    /// Operations applied remotely (folded counter ops included).
    pub ops_applied: usize,
    /// Operations re-queued for a later pass after transient failures.
    pub ops_requeued: usize,
    /// Operations that failed non-retryably, described for the caller.
    /// These are reported, never silently dropped or blindly retried.
    pub failures: Vec<String>,
}

/// Outcome of a [`SyncEngine::sync_now`] call.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncStatus {
    /// The drain ran to completion.
    Completed(SyncReport),
    /// Another drain was already in flight; this trigger was a no-op.
    AlreadyRunning,
    /// Nothing was queued; no remote I/O happened.
    QueueEmpty,
    /// No authenticated user; the queue was left untouched.
    NoIdentity,
}

impl SyncStatus {
    /// The report, when the pass actually ran.
    pub fn report(&self) -> Option<&SyncReport> {
        match self {
            SyncStatus::Completed(report) => Some(report),
            _ => None,
        }
    }
}
