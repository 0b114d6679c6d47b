//! Configuration for the dayzero client core.
//!
//! Unlike an end-user config file, this is wiring the *embedder* decides
//! once at construction time: which collection holds user profiles, which
//! document field carries the anchor instant, how often to probe
//! connectivity, and under which keys the durable blobs are persisted.
//! It is plain data, constructed explicitly and injected — there is no
//! ambient global configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Wiring options for [`DayzeroClient`](crate::client::DayzeroClient) and
/// the components it assembles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Remote collection holding one profile document per user.
    pub users_collection: String,

    /// Document field carrying the anchor instant (RFC 3339 string).
    pub anchor_field: String,

    /// Interval, in seconds, at which the embedder should drive
    /// [`ConnectivityMonitor::probe_tick`](crate::connectivity::ConnectivityMonitor::probe_tick).
    pub probe_interval_secs: u64,

    /// Durable-storage key for the serialized operation queue.
    pub queue_key: String,

    /// Durable-storage key for the serialized document cache.
    pub cache_key: String,

    /// Durable-storage key for the counter feature's offline action log.
    pub actions_key: String,
}

impl Config {
    /// Probe interval as a [`Duration`].
    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            users_collection: "users".to_string(),
            anchor_field: "quitSince".to_string(),
            probe_interval_secs: 30,
            queue_key: "pending_operations".to_string(),
            cache_key: "document_cache".to_string(),
            actions_key: "offline_tracker_actions".to_string(),
        }
    }
}
