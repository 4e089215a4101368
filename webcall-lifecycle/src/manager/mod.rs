//! Connection Lifecycle Manager
//!
//! Keeps one signaling session alive for as long as the user wants to be
//! reachable. Every trigger (user intent, network edges, suspend edges,
//! watchdog ticks, session events, scheduled retries) is a [`Command`] on a
//! single queue, and one task owns all mutable state. Login and socket open
//! run in spawned tasks that post their results back tagged with the attempt
//! that started them, so a result for an attempt that was since cancelled is
//! recognised and dropped.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use webcall_lifecycle::{
//!     Collaborators, HttpLoginClient, LifecycleConfig, LifecycleManager, LoginSettings,
//!     MemoryStateStore, NetworkState, NoopWakeResource, TracingStatusSink, WebSocketConnector,
//! };
//!
//! # async fn example() -> webcall_lifecycle::Result<()> {
//! let login = HttpLoginClient::new(&LoginSettings::new("example.org", "alice"))?;
//! let collaborators = Collaborators {
//!     login: Arc::new(login),
//!     connector: Arc::new(WebSocketConnector::new()),
//!     status: Arc::new(TracingStatusSink),
//!     inbound: Arc::new(TracingStatusSink),
//!     store: Arc::new(MemoryStateStore::default()),
//!     sleep_lock: Arc::new(NoopWakeResource),
//!     network_hold: Arc::new(NoopWakeResource),
//! };
//!
//! let (handle, _task) =
//!     LifecycleManager::start(LifecycleConfig::default(), collaborators, NetworkState::Wifi);
//! handle.set_desired_state(true)?;
//! # Ok(())
//! # }
//! ```

mod state;

pub use state::ReconnectState;

use crate::backoff::{Backoff, ReconnectPolicy};
use crate::config::LifecycleConfig;
use crate::keepalive::{KeepAliveLock, NetworkHold, WakeResource};
use crate::login::{LoginClient, LoginReply};
use crate::network::NetworkState;
use crate::scheduler::{ScheduledTask, Scheduler};
use crate::session::{
    SessionConnector, SessionEvent, SessionEvents, SignalingSession, NORMAL_CLOSURE,
};
use crate::status::{InboundSink, StateEvent, StatusMessage, StatusSink};
use crate::store::{PersistedState, StateStore};
use crate::suspend::SuspendEdge;
use crate::{LifecycleError, Result};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use state::{transition, Action, Event};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Inbound message announcing the server accepted the registration
const SESSION_ACK_PREFIX: &str = "sessionId|";

/// Inbound keep-alive filler that carries no payload
const FILLER_PREFIX: &str = "dummy|";

/// Display time of network switch statuses
const NETWORK_STATUS_TIMEOUT: Duration = Duration::from_secs(3);

/// Work queued for the manager task
pub(crate) enum Command {
    SetDesired(bool),
    NetworkChanged {
        previous: NetworkState,
        current: NetworkState,
    },
    Suspend(SuspendEdge),
    ChargerChanged,
    WatchdogFired,
    CheckHeartbeat,
    Send {
        text: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Snapshot(oneshot::Sender<Snapshot>),
    Shutdown(oneshot::Sender<()>),
    AttemptDue {
        ticket: u64,
    },
    LoginFinished {
        attempt: u64,
        result: Result<LoginReply>,
    },
    SocketFinished {
        attempt: u64,
        session: u64,
        result: Result<Box<dyn SignalingSession>>,
    },
    Session {
        session: u64,
        event: SessionEvent,
    },
    LockExpired {
        generation: u64,
    },
}

/// Coarse connection status for UI surfaces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ConnectionStatus {
    Offline = 0,
    Connecting = 1,
    Online = 2,
}

impl ConnectionStatus {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Point-in-time view of the manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub state: ReconnectState,
    pub desired: bool,
    pub busy: bool,
    /// Consecutive failed attempts
    pub attempts: u32,
    pub network: NetworkState,
    pub session_live: bool,
    /// Server acknowledged the registration
    pub session_acknowledged: bool,
    /// Time until the pending retry fires
    pub pending_retry: Option<Duration>,
    pub keep_awake_held: bool,
    /// Sleep-lock time held today, including a running hold
    pub keep_awake_ms_today: u64,
    pub network_hold: bool,
}

impl Snapshot {
    /// An attempt in flight reports as connecting even if an old session lingers
    pub fn connection_status(&self) -> ConnectionStatus {
        if self.busy {
            ConnectionStatus::Connecting
        } else if self.session_live {
            ConnectionStatus::Online
        } else {
            ConnectionStatus::Offline
        }
    }
}

/// Platform and application services the manager talks to
pub struct Collaborators {
    pub login: Arc<dyn LoginClient>,
    pub connector: Arc<dyn SessionConnector>,
    pub status: Arc<dyn StatusSink>,
    pub inbound: Arc<dyn InboundSink>,
    pub store: Arc<dyn StateStore>,
    /// Host sleep prevention
    pub sleep_lock: Arc<dyn WakeResource>,
    /// Host network-teardown prevention
    pub network_hold: Arc<dyn WakeResource>,
}

/// Cloneable handle used by every trigger source
#[derive(Clone)]
pub struct LifecycleHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl LifecycleHandle {
    fn post(&self, command: Command) -> Result<()> {
        self.tx.send(command).map_err(|_| LifecycleError::ManagerClosed)
    }

    /// Record whether a live session is wanted
    ///
    /// `true` starts an attempt right away (replacing any pending retry);
    /// `false` cancels everything and closes the session.
    pub fn set_desired_state(&self, wanted: bool) -> Result<()> {
        self.post(Command::SetDesired(wanted))
    }

    pub fn notify_network_changed(
        &self,
        previous: NetworkState,
        current: NetworkState,
    ) -> Result<()> {
        self.post(Command::NetworkChanged { previous, current })
    }

    pub fn notify_suspend_edge(&self, edge: SuspendEdge) -> Result<()> {
        self.post(Command::Suspend(edge))
    }

    pub fn notify_charger_changed(&self) -> Result<()> {
        self.post(Command::ChargerChanged)
    }

    pub fn watchdog_fired(&self) -> Result<()> {
        self.post(Command::WatchdogFired)
    }

    pub fn check_heartbeat_staleness(&self) -> Result<()> {
        self.post(Command::CheckHeartbeat)
    }

    /// Send a text message on the live session
    pub async fn send(&self, text: impl Into<String>) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.post(Command::Send {
            text: text.into(),
            reply,
        })?;
        rx.await.map_err(|_| LifecycleError::ManagerClosed)?
    }

    pub async fn snapshot(&self) -> Result<Snapshot> {
        let (reply, rx) = oneshot::channel();
        self.post(Command::Snapshot(reply))?;
        rx.await.map_err(|_| LifecycleError::ManagerClosed)
    }

    pub async fn connection_status(&self) -> Result<ConnectionStatus> {
        Ok(self.snapshot().await?.connection_status())
    }

    /// Close the session and stop the manager task. The connect intent is
    /// left as persisted so the next start resumes it.
    pub async fn shutdown(&self) -> Result<()> {
        let (done, rx) = oneshot::channel();
        self.post(Command::Shutdown(done))?;
        rx.await.map_err(|_| LifecycleError::ManagerClosed)
    }
}

struct LiveSession {
    id: u64,
    handle: Box<dyn SignalingSession>,
    acknowledged: bool,
}

struct PendingRetry {
    ticket: u64,
    task: ScheduledTask,
    due: Instant,
}

/// Owns the connect cycle; driven through a [`LifecycleHandle`]
pub struct LifecycleManager {
    config: LifecycleConfig,
    state: ReconnectState,
    desired: bool,
    /// Bumped whenever an in-flight attempt must be disowned
    attempt: u64,
    /// Login or socket-open task of the current attempt
    in_flight: Option<JoinHandle<()>>,
    policy: ReconnectPolicy,
    network: NetworkState,
    session: Option<LiveSession>,
    next_session: u64,
    last_heartbeat: Option<Instant>,
    pending: Option<PendingRetry>,
    next_ticket: u64,
    keep_awake: KeepAliveLock,
    network_hold: NetworkHold,
    persisted: PersistedState,
    store: Arc<dyn StateStore>,
    login: Arc<dyn LoginClient>,
    connector: Arc<dyn SessionConnector>,
    status: Arc<dyn StatusSink>,
    inbound: Arc<dyn InboundSink>,
    scheduler: Scheduler,
    tx: mpsc::UnboundedSender<Command>,
}

impl LifecycleManager {
    /// Load persisted state and spawn the manager task on the current runtime
    pub fn start(
        config: LifecycleConfig,
        collaborators: Collaborators,
        initial_network: NetworkState,
    ) -> (LifecycleHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();

        let mut persisted = collaborators.store.load().unwrap_or_else(|e| {
            warn!("Failed to load lifecycle state, starting fresh: {}", e);
            PersistedState::default()
        });
        let migrated = persisted.migrate(&config.app_version);

        let policy = ReconnectPolicy::new(
            config.backoff_step,
            config.max_backoff,
            config.max_attempts,
        );

        let mut manager = Self {
            state: ReconnectState::Idle,
            desired: false,
            attempt: 0,
            in_flight: None,
            policy,
            network: initial_network,
            session: None,
            next_session: 1,
            last_heartbeat: None,
            pending: None,
            next_ticket: 1,
            keep_awake: KeepAliveLock::new(
                collaborators.sleep_lock,
                persisted.keep_awake.clone(),
            ),
            network_hold: NetworkHold::new(collaborators.network_hold),
            persisted,
            store: collaborators.store,
            login: collaborators.login,
            connector: collaborators.connector,
            status: collaborators.status,
            inbound: collaborators.inbound,
            scheduler: Scheduler::current(),
            tx: tx.clone(),
            config,
        };

        if migrated || manager.keep_awake.roll_over(today()) {
            manager.persist();
        }

        let task = tokio::spawn(manager.run(rx));
        (LifecycleHandle { tx }, task)
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        info!(
            "Lifecycle manager started (network {}, intent {})",
            self.network, self.persisted.connect_wanted
        );

        if self.persisted.connect_wanted && self.config.resume_persisted_intent {
            info!("Resuming connect intent in {:?}", self.config.boot_delay);
            self.desired = true;
            if self.network == NetworkState::Wifi && self.config.wifi_lock {
                self.network_hold.acquire().await;
            }
            self.apply(Event::Schedule(self.config.boot_delay)).await;
        }

        while let Some(command) = rx.recv().await {
            match command {
                Command::Shutdown(done) => {
                    self.shutdown().await;
                    let _ = done.send(());
                    break;
                }
                command => self.handle(command).await,
            }
        }

        info!("Lifecycle manager stopped");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::SetDesired(true) => self.go_online().await,
            Command::SetDesired(false) => self.go_offline().await,
            Command::NetworkChanged { previous, current } => {
                self.network_changed(previous, current).await
            }
            Command::Suspend(edge) => self.suspend_edge(edge).await,
            Command::ChargerChanged => self.charger_changed().await,
            Command::WatchdogFired => self.watchdog_fired().await,
            Command::CheckHeartbeat => self.check_heartbeat().await,
            Command::Send { text, reply } => {
                let result = match &self.session {
                    Some(live) => live.handle.send(&text),
                    None => Err(LifecycleError::NoSession),
                };
                let _ = reply.send(result);
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            Command::AttemptDue { ticket } => self.attempt_due(ticket).await,
            Command::LoginFinished { attempt, result } => {
                self.login_finished(attempt, result).await
            }
            Command::SocketFinished {
                attempt,
                session,
                result,
            } => self.socket_finished(attempt, session, result).await,
            Command::Session { session, event } => self.session_event(session, event).await,
            Command::LockExpired { generation } => {
                if self.keep_awake.expire(generation, now()).await.is_some() {
                    self.persist();
                }
            }
            // handled by the run loop
            Command::Shutdown(_) => {}
        }
    }

    /// Run one event through the transition table and execute the chosen
    /// action. Actions may produce a follow-up event, which is applied in turn.
    async fn apply(&mut self, event: Event) {
        let mut next = Some(event);
        while let Some(event) = next.take() {
            let step = match transition(self.state, event) {
                Ok(step) => step,
                Err(event) => {
                    debug!("Ignoring {:?} in state {}", event, self.state);
                    return;
                }
            };

            if step.next != self.state {
                debug!("State {} -> {}", self.state, step.next);
            }
            self.state = step.next;
            next = self.execute(step.action).await;
        }
    }

    async fn execute(&mut self, action: Action) -> Option<Event> {
        match action {
            Action::Schedule(delay) => {
                self.schedule_attempt(delay);
                None
            }
            Action::Login => {
                self.start_login().await;
                None
            }
            Action::OpenSocket(reply) => {
                self.open_socket(reply);
                None
            }
            Action::Register { session, handle } => {
                self.register(session, handle).await;
                None
            }
            Action::Backoff(error) => self.back_off(error).await,
            Action::Reconnect(delay) => {
                self.reconnect(delay).await;
                None
            }
            Action::Closed => {
                self.status.state(StateEvent::Disconnected);
                self.status
                    .status(StatusMessage::new("disconnected from WebCall server").notify());
                self.release_keep_awake().await;
                None
            }
            Action::Park => {
                self.park().await;
                None
            }
            Action::Teardown => {
                self.teardown().await;
                None
            }
            Action::GiveUp(error) => {
                self.give_up(error).await;
                None
            }
        }
    }

    // Triggers

    async fn go_online(&mut self) {
        if !self.desired {
            info!("Connect intent set");
            self.desired = true;
            self.policy.reset();
            self.persist();
        }

        if self.network == NetworkState::Wifi && self.config.wifi_lock {
            self.network_hold.acquire().await;
        }

        if self.session.is_some() {
            debug!("Session already live");
            return;
        }
        if self.state.is_busy() {
            debug!("Attempt already in flight");
            return;
        }

        self.status.status(StatusMessage::new("Connecting.."));
        self.apply(Event::Schedule(Duration::ZERO)).await;
    }

    async fn go_offline(&mut self) {
        let idle = self.state == ReconnectState::Idle
            && self.session.is_none()
            && self.pending.is_none();
        if !self.desired && idle {
            debug!("Already offline");
            return;
        }

        info!("Connect intent cleared");
        if self.cancel_pending() {
            self.status.status(StatusMessage::new("Stopped reconnecting"));
        }
        self.desired = false;
        self.persist();
        self.apply(Event::Stop).await;
    }

    async fn network_changed(&mut self, previous: NetworkState, current: NetworkState) {
        info!("Network {} -> {}", previous, current);
        self.network = current;

        // the hold only serves a wanted connection
        if current == NetworkState::Wifi && self.config.wifi_lock && self.desired {
            self.network_hold.acquire().await;
        } else if previous == NetworkState::Wifi {
            self.network_hold.release().await;
        }

        if !current.is_available() {
            let text = if previous == NetworkState::Wifi {
                "Wifi lost"
            } else {
                "Network lost"
            };
            self.status.status(StatusMessage::new(text).notify());

            if let Some(live) = self.session.take() {
                live.handle.close();
                self.status.state(StateEvent::Disconnected);
            }

            if self.desired {
                self.apply(Event::NetworkLost).await;
            } else {
                self.release_keep_awake().await;
            }
            return;
        }

        if current == previous || !self.desired {
            return;
        }
        if self.state.is_busy() {
            debug!("Network edge during an attempt, leaving it running");
            return;
        }

        self.hold_keep_awake(self.config.keep_awake_hold).await;

        let text = match (self.session.is_some(), current) {
            (true, NetworkState::Wifi) => "Reconnect Wifi...",
            (true, NetworkState::Cellular) => "Reconnect Mobile...",
            (true, _) => "Reconnect other...",
            (false, NetworkState::Wifi) => "Using Wifi network",
            (false, NetworkState::Cellular) => "Using mobile network",
            (false, _) => "Using other network",
        };
        self.status
            .status(StatusMessage::new(text).with_timeout(NETWORK_STATUS_TIMEOUT));

        let delay = self.config.network_change_delay;
        if let Some(live) = self.session.take() {
            live.handle.close();
            self.apply(Event::SessionBroken { delay }).await;
        } else {
            self.apply(Event::Schedule(delay)).await;
        }
    }

    async fn suspend_edge(&mut self, edge: SuspendEdge) {
        if !self.desired && self.session.is_none() {
            debug!("Suspend edge {:?} while offline", edge);
            return;
        }
        self.hold_keep_awake(self.config.suspend_edge_hold).await;

        match edge {
            SuspendEdge::Entering => {
                if let Some(live) = &self.session {
                    if let Err(e) = live.handle.ping() {
                        debug!("Ping before suspend failed: {}", e);
                    }
                } else if self.desired && !self.state.is_busy() && self.pending.is_none() {
                    self.status
                        .status(StatusMessage::new("Disconnected from WebCall server..."));
                    self.apply(Event::Schedule(Duration::ZERO)).await;
                }
            }
            SuspendEdge::Leaving => {
                if !self.desired || self.state.is_busy() {
                    return;
                }
                let delay = self.config.resume_delay;
                if let Some(live) = self.session.take() {
                    info!("Resumed from suspend, replacing session {}", live.id);
                    live.handle.close();
                    self.apply(Event::SessionBroken { delay }).await;
                } else {
                    self.apply(Event::Schedule(delay)).await;
                }
            }
        }
    }

    async fn charger_changed(&mut self) {
        if self.session.is_some() {
            self.check_heartbeat().await;
        } else if self.desired && !self.state.is_busy() && self.pending.is_none() {
            self.apply(Event::Schedule(Duration::ZERO)).await;
        }
    }

    async fn watchdog_fired(&mut self) {
        debug!("Watchdog tick");

        if let Some(live) = &self.session {
            if self.network.is_available() {
                if let Err(e) = live.handle.ping() {
                    debug!("Watchdog ping failed: {}", e);
                }
            }
            self.check_heartbeat().await;
        } else if self.desired && !self.state.is_busy() {
            self.apply(Event::Schedule(Duration::ZERO)).await;
        }
    }

    async fn check_heartbeat(&mut self) {
        if !self.desired {
            return;
        }

        if self.session.is_none() {
            if !self.state.is_busy() && self.pending.is_none() {
                self.apply(Event::Schedule(Duration::ZERO)).await;
            }
            return;
        }

        let age = self
            .last_heartbeat
            .map(|at| at.elapsed())
            .unwrap_or(Duration::MAX);
        if age <= self.config.staleness_threshold {
            debug!("Heartbeat {:?} old", age);
            return;
        }

        warn!("No heartbeat for {:?}, replacing session", age);
        self.hold_keep_awake(self.config.keep_awake_hold).await;
        if self.state.is_busy() {
            return;
        }
        if let Some(live) = self.session.take() {
            live.handle.close();
            self.apply(Event::SessionBroken {
                delay: Duration::ZERO,
            })
            .await;
        }
    }

    // Attempt pipeline

    async fn attempt_due(&mut self, ticket: u64) {
        match &self.pending {
            Some(pending) if pending.ticket == ticket => self.pending = None,
            _ => {
                debug!("Dropping stale attempt {}", ticket);
                return;
            }
        }

        if !self.desired {
            return;
        }
        if self.state.is_busy() || self.session.is_some() {
            debug!("Attempt {} skipped, already connecting or connected", ticket);
            return;
        }
        if !self.network.is_available() {
            self.status
                .status(StatusMessage::new("No network. Reconnect paused.").notify());
            self.apply(Event::NetworkLost).await;
            return;
        }

        self.apply(Event::Start).await;
    }

    async fn start_login(&mut self) {
        self.attempt += 1;
        let attempt = self.attempt;

        self.hold_keep_awake(self.config.keep_awake_hold).await;
        self.status.status(StatusMessage::new("Login..."));
        info!("Login attempt {} ({})", attempt, self.policy.status());

        let login = self.login.clone();
        let cookies = self.persisted.cookies.clone();
        let tx = self.tx.clone();
        self.in_flight = Some(tokio::spawn(async move {
            let result = login.login(cookies.as_deref()).await;
            let _ = tx.send(Command::LoginFinished { attempt, result });
        }));
    }

    async fn login_finished(&mut self, attempt: u64, result: Result<LoginReply>) {
        if attempt != self.attempt || self.state != ReconnectState::LoggingIn {
            debug!("Dropping login result of disowned attempt {}", attempt);
            return;
        }
        self.in_flight = None;

        match result {
            Ok(reply) => {
                if reply.cookies.is_some() && reply.cookies != self.persisted.cookies {
                    self.persisted.cookies = reply.cookies.clone();
                    self.persist();
                }
                self.apply(Event::LoginSucceeded(reply)).await;
            }
            Err(e) => self.apply(Event::LoginFailed(e)).await,
        }
    }

    fn open_socket(&mut self, reply: LoginReply) {
        let attempt = self.attempt;
        let session = self.next_session;
        self.next_session += 1;

        self.status.status(StatusMessage::new("Connecting.."));
        debug!("Opening session {} for attempt {}", session, attempt);

        let connector = self.connector.clone();
        let events = SessionEvents::new(session, self.tx.clone());
        let timeout = self.config.socket_open_timeout;
        let tx = self.tx.clone();
        self.in_flight = Some(tokio::spawn(async move {
            let result = connector.open(&reply.address, timeout, events).await;
            let _ = tx.send(Command::SocketFinished {
                attempt,
                session,
                result,
            });
        }));
    }

    async fn socket_finished(
        &mut self,
        attempt: u64,
        session: u64,
        result: Result<Box<dyn SignalingSession>>,
    ) {
        if attempt != self.attempt
            || self.state != ReconnectState::AwaitingSocketOpen
            || !self.desired
        {
            debug!("Dropping socket of disowned attempt {}", attempt);
            if let Ok(handle) = result {
                handle.close();
            }
            return;
        }
        self.in_flight = None;

        match result {
            Ok(handle) => self.apply(Event::SocketOpened { session, handle }).await,
            Err(e) => self.apply(Event::SocketFailed(e)).await,
        }
    }

    async fn register(&mut self, session: u64, handle: Box<dyn SignalingSession>) {
        if let Some(old) = self.session.take() {
            warn!("Closing leftover session {} before registering {}", old.id, session);
            old.handle.close();
        }

        if let Err(e) = handle.send(&self.config.registration_message) {
            warn!("Registration message not sent on session {}: {}", session, e);
        }

        info!("Session {} registered", session);
        self.policy.reset();
        self.last_heartbeat = Some(Instant::now());
        self.session = Some(LiveSession {
            id: session,
            handle,
            acknowledged: false,
        });
        self.release_keep_awake().await;
    }

    async fn back_off(&mut self, error: LifecycleError) -> Option<Event> {
        warn!("Attempt {} failed: {}", self.attempt, error);
        self.release_keep_awake().await;

        match self.policy.record_failure() {
            Backoff::Retry { attempt, delay } => {
                info!("Retrying in {:?} ({})", delay, self.policy.status());
                self.status.status(
                    StatusMessage::new("Failed to reconnect. Will try again...")
                        .important(attempt == self.config.important_attempt),
                );
                self.schedule_attempt(delay);
                None
            }
            Backoff::Exhausted { attempts } => {
                Some(Event::GiveUp(LifecycleError::RetriesExhausted(attempts)))
            }
        }
    }

    async fn reconnect(&mut self, delay: Duration) {
        self.last_heartbeat = None;
        self.status.state(StateEvent::Disconnected);

        if !self.desired {
            return;
        }

        self.hold_keep_awake(self.config.keep_awake_hold).await;
        if self.network.is_available() {
            self.schedule_attempt(delay);
        } else {
            self.status
                .status(StatusMessage::new("No network. Reconnect paused.").notify());
        }
    }

    async fn park(&mut self) {
        self.cancel_pending();
        self.disown_attempt();
        self.policy.reset();
        self.release_keep_awake().await;
        debug!("Parked until the network returns");
    }

    async fn teardown(&mut self) {
        self.disown_attempt();
        self.cancel_pending();
        if let Some(live) = self.session.take() {
            live.handle.close_blocking().await;
        }
        self.last_heartbeat = None;
        self.policy.reset();
        self.release_keep_awake().await;
        self.network_hold.release().await;

        self.status.state(StateEvent::Disconnected);
        self.status.status(StatusMessage::new("Offline"));
    }

    async fn give_up(&mut self, error: LifecycleError) {
        warn!("Giving up reconnecting: {}", error);

        self.disown_attempt();
        self.cancel_pending();
        if let Some(live) = self.session.take() {
            live.handle.close();
        }
        self.last_heartbeat = None;
        self.policy.reset();
        self.release_keep_awake().await;
        self.network_hold.release().await;

        self.desired = false;
        self.persist();

        let text = match error {
            LifecycleError::RetriesExhausted(_) => "Gave up reconnecting".to_string(),
            ref other => format!("Gave up reconnecting. {}", other.user_message()),
        };
        self.status.status(
            StatusMessage::new(text)
                .notify()
                .important(self.config.beep_on_give_up),
        );
        self.status.state(StateEvent::Deactivated);
    }

    // Session events

    async fn session_event(&mut self, session: u64, event: SessionEvent) {
        let Some(live) = self.session.as_mut().filter(|live| live.id == session) else {
            debug!("Dropping event of closed session {}", session);
            return;
        };

        match event {
            SessionEvent::Text(text) => {
                self.last_heartbeat = Some(Instant::now());
                if text.starts_with(FILLER_PREFIX) {
                    return;
                }
                if text.starts_with(SESSION_ACK_PREFIX) {
                    live.acknowledged = true;
                    info!("Session {} acknowledged by server", session);
                    self.status.status(StatusMessage::new("Ready to receive calls"));
                    self.status.state(StateEvent::Connected);
                    return;
                }
                match self.inbound.deliver(&text) {
                    Ok(()) => {}
                    Err(e @ LifecycleError::RuntimeUnavailable(_)) => {
                        self.apply(Event::GiveUp(e)).await;
                    }
                    Err(e) => warn!("Inbound message not delivered: {}", e),
                }
            }
            SessionEvent::Heartbeat => {
                self.last_heartbeat = Some(Instant::now());
                self.release_keep_awake().await;
                if self.keep_awake.roll_over(today()) {
                    self.persist();
                }
            }
            SessionEvent::Pong => {
                debug!("Pong on session {}", session);
            }
            SessionEvent::Error(e) => {
                warn!("Session {} error: {}", session, e);
            }
            SessionEvent::Closed {
                code,
                reason,
                remote,
            } => {
                info!(
                    "Session {} closed ({} {}, {})",
                    session,
                    code,
                    reason,
                    if remote { "remote" } else { "local" }
                );
                self.session = None;
                self.last_heartbeat = None;

                if code == NORMAL_CLOSURE || !self.desired {
                    self.apply(Event::SessionEnded).await;
                } else {
                    self.status
                        .status(StatusMessage::new("Disconnected from WebCall server...").notify());
                    self.apply(Event::SessionBroken {
                        delay: self.config.abnormal_close_delay,
                    })
                    .await;
                }
            }
        }
    }

    // Helpers

    fn schedule_attempt(&mut self, delay: Duration) {
        self.cancel_pending();

        let ticket = self.next_ticket;
        self.next_ticket += 1;

        let tx = self.tx.clone();
        let task = self.scheduler.schedule(delay, async move {
            let _ = tx.send(Command::AttemptDue { ticket });
        });
        debug!("Attempt {} scheduled in {:?}", ticket, delay);

        self.pending = Some(PendingRetry {
            ticket,
            task,
            due: Instant::now() + delay,
        });
    }

    /// Abort the running login or socket open and drop any result it still posts
    fn disown_attempt(&mut self) {
        self.attempt += 1;
        if let Some(task) = self.in_flight.take() {
            task.abort();
            debug!("Aborted attempt {}", self.attempt - 1);
        }
    }

    /// Returns true if a retry was pending
    fn cancel_pending(&mut self) -> bool {
        match self.pending.take() {
            Some(pending) => {
                pending.task.cancel();
                debug!("Cancelled attempt {}", pending.ticket);
                true
            }
            None => false,
        }
    }

    async fn hold_keep_awake(&mut self, hold: Duration) {
        if let Some(generation) = self.keep_awake.acquire(hold).await {
            let tx = self.tx.clone();
            self.scheduler.schedule(hold, async move {
                let _ = tx.send(Command::LockExpired { generation });
            });
        }
    }

    async fn release_keep_awake(&mut self) {
        if self.keep_awake.release(now()).await.is_some() {
            self.persist();
        }
    }

    fn persist(&mut self) {
        self.persisted.connect_wanted = self.desired;
        self.persisted.keep_awake = self.keep_awake.accounting().clone();
        if let Err(e) = self.store.save(&self.persisted) {
            warn!("Failed to persist lifecycle state: {}", e);
        }
    }

    fn snapshot(&self) -> Snapshot {
        let now = Instant::now();
        Snapshot {
            state: self.state,
            desired: self.desired,
            busy: self.state.is_busy(),
            attempts: self.policy.attempt(),
            network: self.network,
            session_live: self.session.is_some(),
            session_acknowledged: self
                .session
                .as_ref()
                .map(|live| live.acknowledged)
                .unwrap_or(false),
            pending_retry: self
                .pending
                .as_ref()
                .map(|pending| pending.due.saturating_duration_since(now)),
            keep_awake_held: self.keep_awake.is_held(),
            keep_awake_ms_today: self.keep_awake.held_ms_now(),
            network_hold: self.network_hold.is_held(),
        }
    }

    async fn shutdown(&mut self) {
        info!("Shutting down lifecycle manager");
        self.disown_attempt();
        self.cancel_pending();
        if let Some(live) = self.session.take() {
            live.handle.close_blocking().await;
        }
        self.release_keep_awake().await;
        self.network_hold.release().await;
        self.persist();
    }
}

fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

fn now() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}
