//! Signaling Session
//!
//! A [`SignalingSession`] owns one physical WebSocket. It forwards inbound
//! text and structural socket events to the lifecycle manager and never
//! decides on its own whether to reconnect.
//!
//! Inbound control pings are answered with a pong and reported as a
//! heartbeat. The server pings periodically, and that reciprocal ping keeps
//! working while the host restricts background work, so it is the liveness
//! source the staleness check relies on.

use crate::login::is_trust_failure;
use crate::manager::Command;
use crate::{LifecycleError, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async_tls_with_config, Connector, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

/// Close code for an intentional, orderly shutdown
pub const NORMAL_CLOSURE: u16 = 1000;

/// Close code reported when the socket broke without a close frame
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// How long `close_blocking` waits for the close handshake
const CLOSE_BLOCKING_TIMEOUT: Duration = Duration::from_secs(5);

/// Event reported by a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Inbound text message
    Text(String),
    /// Inbound control ping (already answered)
    Heartbeat,
    /// Answer to a ping we sent
    Pong,
    /// Socket closed
    Closed {
        code: u16,
        reason: String,
        remote: bool,
    },
    /// Transport error; a `Closed` event follows
    Error(String),
}

/// Channel a session reports its events through
///
/// Every event is tagged with the session's id so the manager can drop
/// events from sessions it already tore down.
#[derive(Clone)]
pub struct SessionEvents {
    session: u64,
    tx: mpsc::UnboundedSender<Command>,
}

impl SessionEvents {
    pub(crate) fn new(session: u64, tx: mpsc::UnboundedSender<Command>) -> Self {
        Self { session, tx }
    }

    /// Id of the session these events belong to
    pub fn session_id(&self) -> u64 {
        self.session
    }

    /// Report an event; silently dropped if the manager is gone
    pub fn emit(&self, event: SessionEvent) {
        let _ = self.tx.send(Command::Session {
            session: self.session,
            event,
        });
    }
}

/// One live signaling socket
#[async_trait]
pub trait SignalingSession: Send + Sync {
    /// Send a text message; fails if the socket is gone
    fn send(&self, text: &str) -> Result<()>;

    /// Send a liveness ping
    fn ping(&self) -> Result<()>;

    /// Start closing without waiting
    fn close(&self);

    /// Close and wait for the close handshake (bounded)
    async fn close_blocking(&self);
}

/// Opens signaling sessions
#[async_trait]
pub trait SessionConnector: Send + Sync {
    /// Connect to `address` within `timeout`
    async fn open(
        &self,
        address: &str,
        timeout: Duration,
        events: SessionEvents,
    ) -> Result<Box<dyn SignalingSession>>;
}

enum SessionCommand {
    Send(String),
    Ping,
    Close(Option<oneshot::Sender<()>>),
}

/// [`SignalingSession`] over `tokio-tungstenite`
pub struct WebSocketSession {
    command_tx: mpsc::UnboundedSender<SessionCommand>,
}

#[async_trait]
impl SignalingSession for WebSocketSession {
    fn send(&self, text: &str) -> Result<()> {
        self.command_tx
            .send(SessionCommand::Send(text.to_string()))
            .map_err(|_| LifecycleError::NoSession)
    }

    fn ping(&self) -> Result<()> {
        self.command_tx
            .send(SessionCommand::Ping)
            .map_err(|_| LifecycleError::NoSession)
    }

    fn close(&self) {
        let _ = self.command_tx.send(SessionCommand::Close(None));
    }

    async fn close_blocking(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self
            .command_tx
            .send(SessionCommand::Close(Some(done_tx)))
            .is_err()
        {
            return;
        }
        if tokio::time::timeout(CLOSE_BLOCKING_TIMEOUT, done_rx)
            .await
            .is_err()
        {
            warn!("Signaling socket did not close within {:?}", CLOSE_BLOCKING_TIMEOUT);
        }
    }
}

/// Opens [`WebSocketSession`]s
///
/// Uses the system trust roots unless built with [`WebSocketConnector::insecure`].
#[derive(Debug, Default, Clone)]
pub struct WebSocketConnector {
    /// Custom TLS setup, `None` for the default verifier
    tls: Option<Arc<rustls::ClientConfig>>,
}

impl WebSocketConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connector that accepts any server certificate, for self-hosted
    /// servers with self-signed certificates
    pub fn insecure() -> Result<Self> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let config = rustls::ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| LifecycleError::Configuration(format!("TLS setup failed: {}", e)))?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate))
            .with_no_client_auth();

        Ok(Self {
            tls: Some(Arc::new(config)),
        })
    }

    /// Connector matching the `insecure_tls` setting
    pub fn with_insecure_tls(insecure_tls: bool) -> Result<Self> {
        if insecure_tls {
            warn!("Signaling socket will accept any server certificate");
            Self::insecure()
        } else {
            Ok(Self::new())
        }
    }

    /// Whether certificate verification is switched off
    pub fn accepts_invalid_certs(&self) -> bool {
        self.tls.is_some()
    }
}

#[async_trait]
impl SessionConnector for WebSocketConnector {
    async fn open(
        &self,
        address: &str,
        timeout: Duration,
        events: SessionEvents,
    ) -> Result<Box<dyn SignalingSession>> {
        debug!("Opening signaling socket (session {})", events.session_id());

        let connector = self.tls.clone().map(Connector::Rustls);
        let connect = connect_async_tls_with_config(address, None, false, connector);
        let (ws_stream, _) = tokio::time::timeout(timeout, connect)
            .await
            .map_err(|_| LifecycleError::Timeout(format!("socket open after {:?}", timeout)))?
            .map_err(classify_ws_error)?;

        info!("Signaling socket open (session {})", events.session_id());

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_socket(ws_stream, command_rx, events));

        Ok(Box::new(WebSocketSession { command_tx }))
    }
}

async fn run_socket(
    ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    mut command_rx: mpsc::UnboundedReceiver<SessionCommand>,
    events: SessionEvents,
) {
    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            command = command_rx.recv() => match command {
                Some(SessionCommand::Send(text)) => {
                    if let Err(e) = write.send(Message::text(text)).await {
                        report_break(&events, e);
                        break;
                    }
                }
                Some(SessionCommand::Ping) => {
                    if let Err(e) = write.send(Message::Ping(Vec::new().into())).await {
                        report_break(&events, e);
                        break;
                    }
                }
                Some(SessionCommand::Close(done)) => {
                    let frame = CloseFrame {
                        code: CloseCode::Normal,
                        reason: "".into(),
                    };
                    if let Err(e) = write.send(Message::Close(Some(frame))).await {
                        debug!("Close frame not sent: {}", e);
                    }
                    let _ = write.close().await;
                    events.emit(SessionEvent::Closed {
                        code: NORMAL_CLOSURE,
                        reason: "closed by client".to_string(),
                        remote: false,
                    });
                    if let Some(done) = done {
                        let _ = done.send(());
                    }
                    break;
                }
                // session handle dropped
                None => {
                    let _ = write.close().await;
                    break;
                }
            },

            message = read.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    events.emit(SessionEvent::Text(text.as_str().to_string()));
                }
                Some(Ok(Message::Ping(payload))) => {
                    events.emit(SessionEvent::Heartbeat);
                    if let Err(e) = write.send(Message::Pong(payload)).await {
                        report_break(&events, e);
                        break;
                    }
                }
                Some(Ok(Message::Pong(_))) => {
                    events.emit(SessionEvent::Pong);
                }
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = match frame {
                        Some(frame) => (u16::from(frame.code), frame.reason.as_str().to_string()),
                        None => (ABNORMAL_CLOSURE, String::new()),
                    };
                    info!("Server closed signaling socket: {} {}", code, reason);
                    events.emit(SessionEvent::Closed {
                        code,
                        reason,
                        remote: true,
                    });
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    report_break(&events, e);
                    break;
                }
                None => {
                    events.emit(SessionEvent::Closed {
                        code: ABNORMAL_CLOSURE,
                        reason: "stream ended".to_string(),
                        remote: true,
                    });
                    break;
                }
            },
        }
    }

    debug!("Signaling socket task for session {} ended", events.session_id());
}

fn report_break(events: &SessionEvents, error: WsError) {
    warn!("Signaling socket error: {}", error);
    events.emit(SessionEvent::Error(error.to_string()));
    events.emit(SessionEvent::Closed {
        code: ABNORMAL_CLOSURE,
        reason: error.to_string(),
        remote: true,
    });
}

/// Certificate verifier that trusts every server
#[derive(Debug)]
struct AcceptAnyCertificate;

impl rustls::client::danger::ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

fn classify_ws_error(error: WsError) -> LifecycleError {
    if is_trust_failure(&error) {
        return LifecycleError::TrustFailure(error.to_string());
    }
    match error {
        WsError::Io(e) => LifecycleError::from_io_error(e, "socket open"),
        WsError::Http(response) => {
            LifecycleError::Session(format!("handshake rejected with {}", response.status()))
        }
        other => LifecycleError::Session(other.to_string()),
    }
}
