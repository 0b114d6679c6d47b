//! Connectivity monitoring.
//!
//! The monitor combines two signals into one boolean online state:
//!
//! 1. the platform's link-layer reachability flag, fed in by the embedder
//!    via [`ConnectivityMonitor::set_link_state`] (browser
//!    `online`/`offline` events, OS reachability callbacks), and
//! 2. a periodic active probe against a lightweight known resource,
//!    driven via [`ConnectivityMonitor::probe_tick`].
//!
//! The probe exists because the platform flag reports link-layer
//! connectivity, which can be true while the wide-area path is
//! unreachable (captive portals). A failed probe therefore forces the
//! combined state offline even when the link flag says online.
//!
//! Transitions are edge-triggered: consumers are notified once per
//! offline→online change, never once per probe tick, so rapid flapping
//! or repeated online signals within one probe interval collapse into a
//! single event.
//!
//! The monitor owns no timer; in the single-threaded event-driven model
//! the embedder schedules `probe_tick()` every
//! [`Config::probe_interval`](crate::config::Config::probe_interval).

mod subscribers;

pub use subscribers::{OnlineCallback, SubscriberRegistry, SubscriptionId};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::storage::BoxFuture;

/// One active reachability check against a known lightweight resource.
pub trait NetworkProbe: Send + Sync {
    /// Returns `true` when the resource was reachable within the
    /// platform's I/O timeout. Timeouts and failures are both `false`;
    /// the distinction does not matter to the monitor.
    fn check<'a>(&'a self) -> BoxFuture<'a, bool>;
}

/// Hook fired once per offline→online transition, outside core
/// guarantees. Models side effects like a service-worker update check;
/// failures are the hook's own problem.
pub trait UpdateHook: Send + Sync {
    /// Called after the monitor has flipped to online.
    fn on_online(&self);
}

/// An edge-triggered change of the combined online state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Offline → online. Triggers a sync drain.
    CameOnline,
    /// Online → offline.
    WentOffline,
}

/// Combines the platform link flag and active probes into one observable
/// online state.
pub struct ConnectivityMonitor {
    online: AtomicBool,
    probe: Arc<dyn NetworkProbe>,
    probe_interval: Duration,
    subscribers: SubscriberRegistry,
    update_hook: RwLock<Option<Arc<dyn UpdateHook>>>,
}

impl ConnectivityMonitor {
    /// Create a monitor starting in the given state.
    ///
    /// Browsers know `navigator.onLine` at startup; pass that as
    /// `initially_online`. When in doubt, start online — the first failed
    /// probe corrects it.
    pub fn new(
        probe: Arc<dyn NetworkProbe>,
        probe_interval: Duration,
        initially_online: bool,
    ) -> Self {
        Self {
            online: AtomicBool::new(initially_online),
            probe,
            probe_interval,
            subscribers: SubscriberRegistry::new(),
            update_hook: RwLock::new(None),
        }
    }

    /// Current combined online state.
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Interval at which the embedder should call
    /// [`probe_tick`](Self::probe_tick).
    pub fn probe_interval(&self) -> Duration {
        self.probe_interval
    }

    /// Install the optional update hook fired once per reconnect.
    pub fn set_update_hook(&self, hook: Arc<dyn UpdateHook>) {
        let mut slot = self.update_hook.write().unwrap();
        *slot = Some(hook);
    }

    /// Subscribe to state changes. The current state is published to the
    /// callback immediately, then once per change.
    pub fn subscribe(&self, callback: OnlineCallback) -> SubscriptionId {
        self.subscribers.subscribe(callback, self.is_online())
    }

    /// Remove a subscription.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscribers.unsubscribe(id)
    }

    /// Feed the platform reachability flag.
    ///
    /// Returns the transition if the combined state changed. A link-up
    /// signal is provisional: the next probe tick can still veto it.
    pub fn set_link_state(&self, link_up: bool) -> Option<Transition> {
        self.apply(link_up)
    }

    /// Run one active probe and reconcile the combined state with its
    /// verdict. A successful probe means online regardless of the link
    /// flag; a failed probe means offline even if the link flag says
    /// otherwise.
    pub async fn probe_tick(&self) -> Option<Transition> {
        let reachable = self.probe.check().await;
        if !reachable {
            log::debug!("[Connectivity] probe failed, forcing offline");
        }
        self.apply(reachable)
    }

    fn apply(&self, online_now: bool) -> Option<Transition> {
        let was_online = self.online.swap(online_now, Ordering::SeqCst);
        if was_online == online_now {
            // Debounce: repeated identical signals fire nothing.
            return None;
        }

        self.subscribers.emit(online_now);

        if online_now {
            log::info!("[Connectivity] came online");
            if let Some(hook) = self.update_hook.read().unwrap().clone() {
                hook.on_online();
            }
            Some(Transition::CameOnline)
        } else {
            log::warn!("[Connectivity] went offline");
            Some(Transition::WentOffline)
        }
    }
}

impl std::fmt::Debug for ConnectivityMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectivityMonitor")
            .field("online", &self.is_online())
            .field("probe_interval", &self.probe_interval)
            .field("subscribers", &self.subscribers.subscriber_count())
            .finish()
    }
}
