//! Network reachability as reported by the environment.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Whether the process currently believes it can reach the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectivityState {
    Online,
    Offline,
}

impl ConnectivityState {
    #[must_use]
    pub fn is_online(self) -> bool {
        matches!(self, Self::Online)
    }
}

impl fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Online => f.write_str("online"),
            Self::Offline => f.write_str("offline"),
        }
    }
}

/// A change of connectivity state. `from != to` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectivityTransition {
    pub from: ConnectivityState,
    pub to: ConnectivityState,
}

impl ConnectivityTransition {
    /// True for `offline -> online`.
    #[must_use]
    pub fn is_reconnect(&self) -> bool {
        self.from == ConnectivityState::Offline && self.to == ConnectivityState::Online
    }
}
