//! DBus Interface
//!
//! Exposes the connection lifecycle on the session bus so the dialer UI and
//! the `webcall-daemon` control subcommands can drive it.
//!
//! ## Interface: org.webcall.Lifecycle
//!
//! ### Methods
//! - `GoOnline()` / `GoOffline()` - Change the connect intent
//! - `ConnectionStatus() -> y` - 0 offline, 1 reconnecting, 2 online
//! - `KeepAwakeMs() -> t` - Sleep-lock time held today
//! - `Snapshot() -> s` - Full manager state as JSON
//! - `SendMessage(s)` - Send a signaling message over the live session
//!
//! ### Signals
//! - `StatusChanged(s text, t timeout_ms, b important)`
//! - `StateChanged(s tag)` - `connected`, `disconnected` or `deactivated`
//! - `MessageReceived(s text)` - Inbound signaling payload

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use webcall_lifecycle::{
    InboundSink, LifecycleError, LifecycleHandle, StateEvent, StatusMessage, StatusSink,
};
use zbus::{connection, interface, object_server::SignalEmitter, proxy, Connection};

/// DBus service name
pub const SERVICE_NAME: &str = "org.webcall.Lifecycle";

/// DBus object path
pub const OBJECT_PATH: &str = "/org/webcall/Lifecycle";

/// DBus interface name
pub const INTERFACE_NAME: &str = "org.webcall.Lifecycle";

fn to_fdo(e: LifecycleError) -> zbus::fdo::Error {
    zbus::fdo::Error::Failed(e.user_message())
}

/// DBus interface for the WebCall daemon
pub struct LifecycleInterface {
    handle: LifecycleHandle,
}

impl LifecycleInterface {
    pub fn new(handle: LifecycleHandle) -> Self {
        Self { handle }
    }
}

#[interface(name = "org.webcall.Lifecycle")]
impl LifecycleInterface {
    /// Connect and keep the connection alive
    async fn go_online(&self) -> zbus::fdo::Result<()> {
        debug!("DBus: GoOnline called");
        self.handle.set_desired_state(true).map_err(to_fdo)
    }

    /// Disconnect and stop reconnecting
    async fn go_offline(&self) -> zbus::fdo::Result<()> {
        debug!("DBus: GoOffline called");
        self.handle.set_desired_state(false).map_err(to_fdo)
    }

    /// Connection status: 0 offline, 1 reconnecting, 2 online
    async fn connection_status(&self) -> zbus::fdo::Result<u8> {
        let status = self.handle.connection_status().await.map_err(to_fdo)?;
        Ok(status.as_u8())
    }

    /// Milliseconds the sleep lock was held today
    async fn keep_awake_ms(&self) -> zbus::fdo::Result<u64> {
        let snapshot = self.handle.snapshot().await.map_err(to_fdo)?;
        Ok(snapshot.keep_awake_ms_today)
    }

    /// Manager state as JSON
    async fn snapshot(&self) -> zbus::fdo::Result<String> {
        let snapshot = self.handle.snapshot().await.map_err(to_fdo)?;
        serde_json::to_string(&snapshot)
            .map_err(|e| zbus::fdo::Error::Failed(format!("Failed to encode snapshot: {}", e)))
    }

    /// Send a signaling message over the live session
    async fn send_message(&self, text: String) -> zbus::fdo::Result<()> {
        self.handle.send(text).await.map_err(to_fdo)
    }

    /// Signal: a new status line for the user
    #[zbus(signal)]
    async fn status_changed(
        signal_emitter: &SignalEmitter<'_>,
        text: &str,
        timeout_ms: u64,
        important: bool,
    ) -> zbus::Result<()>;

    /// Signal: structured connection state changed
    #[zbus(signal)]
    async fn state_changed(signal_emitter: &SignalEmitter<'_>, tag: &str) -> zbus::Result<()>;

    /// Signal: inbound signaling payload
    #[zbus(signal)]
    async fn message_received(signal_emitter: &SignalEmitter<'_>, text: &str) -> zbus::Result<()>;
}

/// Signals queued for emission
#[derive(Debug)]
enum Outgoing {
    Status(StatusMessage),
    State(StateEvent),
    Message(String),
}

/// Status and inbound sink that re-emits everything as DBus signals
///
/// Emission happens on a forwarding task so the manager never waits on the
/// bus, and signals keep their order.
pub struct DbusSignalSink {
    tx: mpsc::UnboundedSender<Outgoing>,
}

impl DbusSignalSink {
    /// Start forwarding onto `connection`
    pub fn spawn(connection: Connection) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<Outgoing>();

        let task = tokio::spawn(async move {
            let emitter = match SignalEmitter::new(&connection, OBJECT_PATH) {
                Ok(emitter) => emitter,
                Err(e) => {
                    warn!("Failed to create signal emitter: {}", e);
                    return;
                }
            };

            while let Some(outgoing) = rx.recv().await {
                let result = match &outgoing {
                    Outgoing::Status(message) => {
                        let timeout_ms = message
                            .timeout
                            .map(|t| t.as_millis() as u64)
                            .unwrap_or(0);
                        LifecycleInterface::status_changed(
                            &emitter,
                            &message.text,
                            timeout_ms,
                            message.important,
                        )
                        .await
                    }
                    Outgoing::State(event) => {
                        LifecycleInterface::state_changed(&emitter, event.as_str()).await
                    }
                    Outgoing::Message(text) => {
                        LifecycleInterface::message_received(&emitter, text).await
                    }
                };

                if let Err(e) = result {
                    warn!("Failed to emit {:?}: {}", outgoing, e);
                }
            }
            debug!("DBus signal forwarding stopped");
        });

        (Self { tx }, task)
    }
}

impl StatusSink for DbusSignalSink {
    fn status(&self, message: StatusMessage) {
        let _ = self.tx.send(Outgoing::Status(message));
    }

    fn state(&self, event: StateEvent) {
        let _ = self.tx.send(Outgoing::State(event));
    }
}

impl InboundSink for DbusSignalSink {
    fn deliver(&self, message: &str) -> webcall_lifecycle::Result<()> {
        self.tx
            .send(Outgoing::Message(message.to_string()))
            .map_err(|_| LifecycleError::RuntimeUnavailable("DBus signal forwarder stopped".into()))
    }
}

/// DBus server
pub struct DbusServer {
    /// DBus connection
    connection: Connection,
}

impl DbusServer {
    /// Connect to the session bus without claiming the service name yet
    pub async fn connect() -> Result<Self> {
        let connection = connection::Builder::session()?
            .build()
            .await
            .context("Failed to build DBus connection")?;
        Ok(Self { connection })
    }

    /// Connection handle for signal emission
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Serve the interface and claim the service name
    pub async fn serve(&self, handle: LifecycleHandle) -> Result<()> {
        info!("Starting DBus server on {}", SERVICE_NAME);

        self.connection
            .object_server()
            .at(OBJECT_PATH, LifecycleInterface::new(handle))
            .await
            .context("Failed to serve DBus interface")?;

        self.connection
            .request_name(SERVICE_NAME)
            .await
            .context("Failed to request DBus service name")?;

        info!("DBus interface {} ready at {}", INTERFACE_NAME, OBJECT_PATH);
        Ok(())
    }
}

#[proxy(
    interface = "org.webcall.Lifecycle",
    default_service = "org.webcall.Lifecycle",
    default_path = "/org/webcall/Lifecycle"
)]
pub trait Lifecycle {
    /// Connect and keep the connection alive
    async fn go_online(&self) -> zbus::Result<()>;

    /// Disconnect and stop reconnecting
    async fn go_offline(&self) -> zbus::Result<()>;

    /// Connection status: 0 offline, 1 reconnecting, 2 online
    async fn connection_status(&self) -> zbus::Result<u8>;

    /// Milliseconds the sleep lock was held today
    async fn keep_awake_ms(&self) -> zbus::Result<u64>;

    /// Manager state as JSON
    async fn snapshot(&self) -> zbus::Result<String>;

    /// Send a signaling message over the live session
    async fn send_message(&self, text: &str) -> zbus::Result<()>;
}

/// Proxy to a running daemon on the session bus
pub async fn client() -> Result<LifecycleProxy<'static>> {
    let connection = Connection::session()
        .await
        .context("Failed to connect to session bus")?;
    LifecycleProxy::new(&connection)
        .await
        .context("Failed to create lifecycle proxy")
}
