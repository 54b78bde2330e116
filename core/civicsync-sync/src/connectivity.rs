//! Connectivity monitoring.
//!
//! The monitor only reports what the environment tells it: it is fed by a
//! signal source (a reachability probe, OS events, a test) and never decides
//! reachability itself. Before the first signal the state is unknown, which
//! reads as offline.

use crate::listeners::{ListenerId, Listeners};
use civicsync_types::{ConnectivityState, ConnectivityTransition};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

struct MonitorInner {
    state: watch::Sender<Option<ConnectivityState>>,
    listeners: Listeners<ConnectivityTransition>,
}

/// Tracks whether the process believes it has network reach.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ConnectivityMonitor {
    inner: Arc<MonitorInner>,
}

impl std::fmt::Debug for ConnectivityMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectivityMonitor")
            .field("state", &*self.inner.state.borrow())
            .finish()
    }
}

impl ConnectivityMonitor {
    /// Creates a monitor in the unknown state.
    pub fn new() -> Self {
        let (state, _) = watch::channel(None);
        Self {
            inner: Arc::new(MonitorInner {
                state,
                listeners: Listeners::new(),
            }),
        }
    }

    /// Creates a monitor that already knows its state.
    pub fn with_state(state: ConnectivityState) -> Self {
        let monitor = Self::new();
        monitor.inner.state.send_replace(Some(state));
        monitor
    }

    /// Current state; unknown reads as offline.
    pub fn current_state(&self) -> ConnectivityState {
        self.inner
            .state
            .borrow()
            .unwrap_or(ConnectivityState::Offline)
    }

    /// Whether any signal has been received yet.
    pub fn is_known(&self) -> bool {
        self.inner.state.borrow().is_some()
    }

    /// Feeds an environment signal.
    ///
    /// Returns the transition it caused, if any. Repeating the current state
    /// is a no-op, and a first `offline` signal is not a transition because
    /// unknown already reads as offline.
    pub fn signal(&self, state: ConnectivityState) -> Option<ConnectivityTransition> {
        let mut transition = None;
        self.inner.state.send_if_modified(|current| {
            let from = current.unwrap_or(ConnectivityState::Offline);
            let changed = *current != Some(state);
            *current = Some(state);
            if from != state {
                transition = Some(ConnectivityTransition { from, to: state });
            }
            changed
        });

        if let Some(t) = transition {
            info!(from = %t.from, to = %t.to, "connectivity changed");
            self.inner.listeners.emit(&t);
        }
        transition
    }

    /// Shorthand for `signal(Online)`.
    pub fn set_online(&self) -> Option<ConnectivityTransition> {
        self.signal(ConnectivityState::Online)
    }

    /// Shorthand for `signal(Offline)`.
    pub fn set_offline(&self) -> Option<ConnectivityTransition> {
        self.signal(ConnectivityState::Offline)
    }

    /// Registers a callback invoked once per transition.
    pub fn on_change(
        &self,
        listener: impl Fn(&ConnectivityTransition) + Send + Sync + 'static,
    ) -> ListenerId {
        self.inner.listeners.add(listener)
    }

    /// Removes a callback registered with [`on_change`](Self::on_change).
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.listeners.remove(id)
    }

    /// Watches the raw state (`None` = unknown).
    pub fn subscribe(&self) -> watch::Receiver<Option<ConnectivityState>> {
        self.inner.state.subscribe()
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new()
    }
}
