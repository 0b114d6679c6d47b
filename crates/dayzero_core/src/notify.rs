//! Fire-and-forget notification sink.
//!
//! The core reports sync lifecycle events and offline-queued writes so
//! the user can always tell whether a change is confirmed, pending, or
//! lost. Delivery guarantees (toasts, push, badges) are the sink's own
//! business.

use serde::{Deserialize, Serialize};

/// A user-facing event emitted by the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Notification {
    /// A sync drain started.
    SyncStarted,
    /// A sync drain finished and all folded writes are confirmed remote.
    SyncSucceeded {
        /// Number of operations applied in the pass.
        ops_applied: usize,
    },
    /// A sync drain failed; re-queued operations remain pending.
    SyncFailed {
        /// Human-readable failure reason.
        reason: String,
    },
    /// A write was queued while offline and is pending confirmation.
    OfflineWriteQueued {
        /// Path of the document the write targets.
        target: String,
    },
}

/// Sink for [`Notification`]s. Implementations must not block and must
/// not fail the caller; a lost notification is acceptable, a lost
/// queued write is not.
pub trait Notifier: Send + Sync {
    /// Deliver one notification, best-effort.
    fn notify(&self, notification: &Notification);
}

/// Default sink that writes notifications to the log facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: &Notification) {
        match notification {
            Notification::SyncStarted => log::info!("[Notify] sync started"),
            Notification::SyncSucceeded { ops_applied } => {
                log::info!("[Notify] sync succeeded, {ops_applied} operation(s) applied");
            }
            Notification::SyncFailed { reason } => {
                log::warn!("[Notify] sync failed: {reason}");
            }
            Notification::OfflineWriteQueued { target } => {
                log::info!("[Notify] offline write queued for {target}");
            }
        }
    }
}
