//! Network status notifications from the store.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Connectivity as reported by the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkStatus {
    NetworkUp,
    NetworkDown,
}

impl NetworkStatus {
    pub fn from_active(active: bool) -> Self {
        if active {
            NetworkStatus::NetworkUp
        } else {
            NetworkStatus::NetworkDown
        }
    }
}

/// Receives network status changes.
pub trait ConnectivityObserver: Send + Sync {
    fn on_status(&self, status: NetworkStatus);
}

/// Remembers the last reported status.
#[derive(Default)]
pub struct NetworkStatusTracker {
    last: RwLock<Option<NetworkStatus>>,
}

impl NetworkStatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last(&self) -> Option<NetworkStatus> {
        *self.last.read()
    }
}

impl ConnectivityObserver for NetworkStatusTracker {
    fn on_status(&self, status: NetworkStatus) {
        match status {
            NetworkStatus::NetworkUp => info!("network connection is up, sync resumes"),
            NetworkStatus::NetworkDown => info!("network connection is down, sync paused"),
        }
        *self.last.write() = Some(status);
    }
}
