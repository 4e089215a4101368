//! Network Monitor
//!
//! Normalizes raw platform connectivity events into a small
//! [`NetworkState`] and forwards only real transitions to the lifecycle
//! manager.

use crate::manager::LifecycleHandle;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Last known network type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NetworkState {
    /// No usable network
    #[default]
    None,
    /// Mobile data
    Cellular,
    /// Wireless LAN
    Wifi,
    /// Ethernet, VPN or anything else
    Other,
}

impl NetworkState {
    /// Whether traffic can flow
    pub fn is_available(&self) -> bool {
        !matches!(self, NetworkState::None)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkState::None => "none",
            NetworkState::Cellular => "cellular",
            NetworkState::Wifi => "wifi",
            NetworkState::Other => "other",
        }
    }
}

impl fmt::Display for NetworkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw connectivity event as reported by a platform source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawNetworkEvent {
    /// A network became the default route
    Available(NetworkState),
    /// The default network changed capabilities (e.g. transport)
    CapabilitiesChanged(NetworkState),
    /// The default network went away
    Lost,
    /// Result of a connectivity poll
    Polled(NetworkState),
}

impl RawNetworkEvent {
    fn state(&self) -> NetworkState {
        match self {
            RawNetworkEvent::Available(state)
            | RawNetworkEvent::CapabilitiesChanged(state)
            | RawNetworkEvent::Polled(state) => *state,
            RawNetworkEvent::Lost => NetworkState::None,
        }
    }
}

/// A real change of network state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkEdge {
    pub previous: NetworkState,
    pub current: NetworkState,
}

/// Edge detector over raw network events
///
/// The monitor is the only writer of the network state; readers subscribe
/// through [`NetworkMonitor::subscribe`].
pub struct NetworkMonitor {
    state: watch::Sender<NetworkState>,
}

impl NetworkMonitor {
    /// Create a monitor starting from the state observed at startup
    pub fn new(initial: NetworkState) -> Self {
        let (state, _) = watch::channel(initial);
        Self { state }
    }

    /// Current state
    pub fn current(&self) -> NetworkState {
        *self.state.borrow()
    }

    /// Watch the state
    pub fn subscribe(&self) -> watch::Receiver<NetworkState> {
        self.state.subscribe()
    }

    /// Feed one raw event; returns the edge if the state actually changed
    pub fn observe(&self, event: RawNetworkEvent) -> Option<NetworkEdge> {
        let current = event.state();
        let previous = self.current();

        if current == previous {
            debug!("Network event {:?} without state change", event);
            return None;
        }

        self.state.send_replace(current);
        info!("Network changed: {} -> {}", previous, current);
        Some(NetworkEdge { previous, current })
    }

    /// Forward edges from a raw event stream into the lifecycle manager
    pub fn spawn(
        self,
        mut events: mpsc::Receiver<RawNetworkEvent>,
        lifecycle: LifecycleHandle,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if let Some(edge) = self.observe(event) {
                    if lifecycle
                        .notify_network_changed(edge.previous, edge.current)
                        .is_err()
                    {
                        debug!("Lifecycle manager gone, stopping network monitor");
                        break;
                    }
                }
            }
        })
    }
}
