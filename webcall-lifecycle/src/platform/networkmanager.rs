//! NetworkManager connectivity source
//!
//! Reads NetworkManager's global `State` and `PrimaryConnectionType` and
//! reduces them to a [`NetworkState`]. Property changes are forwarded as
//! [`RawNetworkEvent`]s; a poll loop can back them up on hosts where the
//! change signals are unreliable.

use crate::network::{NetworkState, RawNetworkEvent};
use crate::Result;
use futures::stream::StreamExt;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use zbus::{proxy, Connection};

/// `NM_STATE_CONNECTED_LOCAL`; anything below carries no traffic
const NM_STATE_CONNECTED_LOCAL: u32 = 50;

#[proxy(
    interface = "org.freedesktop.NetworkManager",
    default_service = "org.freedesktop.NetworkManager",
    default_path = "/org/freedesktop/NetworkManager"
)]
trait NetworkManager {
    #[zbus(property)]
    fn state(&self) -> zbus::Result<u32>;

    #[zbus(property)]
    fn primary_connection_type(&self) -> zbus::Result<String>;
}

/// Map NetworkManager's view onto a [`NetworkState`]
pub fn classify(state: u32, primary_connection_type: &str) -> NetworkState {
    if state < NM_STATE_CONNECTED_LOCAL {
        return NetworkState::None;
    }
    match primary_connection_type {
        "802-11-wireless" | "wifi" => NetworkState::Wifi,
        "gsm" | "cdma" | "wwan" => NetworkState::Cellular,
        "" => NetworkState::None,
        _ => NetworkState::Other,
    }
}

/// NetworkManager on the system bus
#[derive(Clone)]
pub struct NetworkManagerSource {
    proxy: NetworkManagerProxy<'static>,
}

impl NetworkManagerSource {
    pub async fn connect() -> Result<Self> {
        let connection = Connection::system().await?;
        let proxy = NetworkManagerProxy::new(&connection).await?;
        Ok(Self { proxy })
    }

    /// Current network state
    pub async fn current(&self) -> Result<NetworkState> {
        let state = self.proxy.state().await?;
        let kind = self.proxy.primary_connection_type().await?;
        Ok(classify(state, &kind))
    }

    /// Forward property changes to `tx`
    pub async fn spawn_signals(&self, tx: mpsc::Sender<RawNetworkEvent>) -> JoinHandle<()> {
        let source = self.clone();
        let mut state_stream = self.proxy.receive_state_changed().await;
        let mut type_stream = self.proxy.receive_primary_connection_type_changed().await;

        info!("Watching NetworkManager connectivity");

        tokio::spawn(async move {
            loop {
                let type_changed = tokio::select! {
                    Some(_) = state_stream.next() => false,
                    Some(_) = type_stream.next() => true,
                    else => break,
                };

                let current = match source.current().await {
                    Ok(current) => current,
                    Err(e) => {
                        warn!("Failed to read NetworkManager state: {}", e);
                        continue;
                    }
                };

                let event = match (current.is_available(), type_changed) {
                    (false, _) => RawNetworkEvent::Lost,
                    (true, true) => RawNetworkEvent::CapabilitiesChanged(current),
                    (true, false) => RawNetworkEvent::Available(current),
                };
                if tx.send(event).await.is_err() {
                    break;
                }
            }
            debug!("NetworkManager signal forwarding stopped");
        })
    }

    /// Poll the state every `period` and forward it to `tx`
    pub fn spawn_poll(&self, period: Duration, tx: mpsc::Sender<RawNetworkEvent>) -> JoinHandle<()> {
        let source = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                match source.current().await {
                    Ok(current) => {
                        if tx.send(RawNetworkEvent::Polled(current)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => debug!("Network poll failed: {}", e),
                }
            }
        })
    }
}
