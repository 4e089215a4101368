//! Shared fakes for lifecycle scenario tests

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use webcall_lifecycle::{
    Collaborators, InboundSink, LifecycleConfig, LifecycleError, LifecycleHandle,
    LifecycleManager, LoginClient, LoginReply, MemoryStateStore, NetworkState, PersistedState,
    Result, SessionConnector, SessionEvent, SessionEvents, SignalingSession, Snapshot, StateEvent,
    StatusMessage, StatusSink, WakeResource,
};

/// Scripted result of one login exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    Accept,
    /// Server answered 503
    Transient,
    /// Server answered with a reserved token
    Reject(&'static str),
}

pub struct FakeLogin {
    script: Mutex<VecDeque<LoginOutcome>>,
    fallback: Mutex<LoginOutcome>,
    delay: Mutex<Duration>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    call_times: Mutex<Vec<Instant>>,
    cookies_seen: Mutex<Vec<Option<String>>>,
}

impl FakeLogin {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(LoginOutcome::Accept),
            delay: Mutex::new(Duration::ZERO),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            call_times: Mutex::new(Vec::new()),
            cookies_seen: Mutex::new(Vec::new()),
        }
    }

    /// Queue outcomes for the next logins
    pub fn script(&self, outcomes: impl IntoIterator<Item = LoginOutcome>) {
        self.script.lock().unwrap().extend(outcomes);
    }

    /// Outcome once the script is used up
    pub fn always(&self, outcome: LoginOutcome) {
        *self.fallback.lock().unwrap() = outcome;
    }

    /// Make every login take `delay`
    pub fn delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.call_times.lock().unwrap().clone()
    }

    pub fn cookies_seen(&self) -> Vec<Option<String>> {
        self.cookies_seen.lock().unwrap().clone()
    }
}

/// Counts a login as in flight until it returns or is aborted
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl LoginClient for FakeLogin {
    async fn login(&self, cookies: Option<&str>) -> Result<LoginReply> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);
        self.call_times.lock().unwrap().push(Instant::now());
        self.cookies_seen
            .lock()
            .unwrap()
            .push(cookies.map(str::to_string));

        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let outcome = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.lock().unwrap().clone());

        match outcome {
            LoginOutcome::Accept => Ok(LoginReply {
                address: format!("wss://example.org/rtcsig/ws?wsid={}&auto=true", n),
                cookies: Some("webcallid=abc".to_string()),
            }),
            LoginOutcome::Transient => Err(LifecycleError::LoginStatus(503)),
            LoginOutcome::Reject(token) => Err(LifecycleError::LoginRejected(token.to_string())),
        }
    }
}

/// What the manager did with one fake socket
pub struct FakeSessionState {
    pub address: String,
    pub events: SessionEvents,
    closed: AtomicBool,
    sent: Mutex<Vec<String>>,
    pings: AtomicUsize,
}

impl FakeSessionState {
    pub fn id(&self) -> u64 {
        self.events.session_id()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub fn pings(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }

    /// Simulate the server side
    pub fn emit(&self, event: SessionEvent) {
        self.events.emit(event);
    }

    pub fn server_close(&self, code: u16) {
        self.closed.store(true, Ordering::SeqCst);
        self.emit(SessionEvent::Closed {
            code,
            reason: String::new(),
            remote: true,
        });
    }
}

struct FakeSession(Arc<FakeSessionState>);

#[async_trait]
impl SignalingSession for FakeSession {
    fn send(&self, text: &str) -> Result<()> {
        if self.0.is_closed() {
            return Err(LifecycleError::NoSession);
        }
        self.0.sent.lock().unwrap().push(text.to_string());
        Ok(())
    }

    fn ping(&self) -> Result<()> {
        if self.0.is_closed() {
            return Err(LifecycleError::NoSession);
        }
        self.0.pings.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) {
        // a local close still reports back, like the real socket task
        if !self.0.closed.swap(true, Ordering::SeqCst) {
            self.0.emit(SessionEvent::Closed {
                code: 1000,
                reason: "closed by client".to_string(),
                remote: false,
            });
        }
    }

    async fn close_blocking(&self) {
        self.close();
    }
}

#[derive(Default)]
pub struct FakeConnector {
    sessions: Mutex<Vec<Arc<FakeSessionState>>>,
    failures: AtomicUsize,
}

impl FakeConnector {
    /// Fail the next `n` opens with a transport error
    pub fn fail_next(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    pub fn opened(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    /// Sessions not closed by either side
    pub fn live(&self) -> usize {
        self.sessions
            .lock()
            .unwrap()
            .iter()
            .filter(|s| !s.is_closed())
            .count()
    }

    pub fn session(&self, index: usize) -> Arc<FakeSessionState> {
        self.sessions.lock().unwrap()[index].clone()
    }

    pub fn last(&self) -> Arc<FakeSessionState> {
        self.sessions
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no session opened")
    }
}

#[async_trait]
impl SessionConnector for FakeConnector {
    async fn open(
        &self,
        address: &str,
        _timeout: Duration,
        events: SessionEvents,
    ) -> Result<Box<dyn SignalingSession>> {
        let failures = self.failures.load(Ordering::SeqCst);
        if failures > 0 {
            self.failures.store(failures - 1, Ordering::SeqCst);
            return Err(LifecycleError::ConnectionRefused("socket open".to_string()));
        }

        let state = Arc::new(FakeSessionState {
            address: address.to_string(),
            events,
            closed: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
            pings: AtomicUsize::new(0),
        });
        self.sessions.lock().unwrap().push(state.clone());
        Ok(Box::new(FakeSession(state)))
    }
}

/// Records statuses, state events and inbound messages
#[derive(Default)]
pub struct RecordingSink {
    statuses: Mutex<Vec<StatusMessage>>,
    states: Mutex<Vec<StateEvent>>,
    inbound: Mutex<Vec<String>>,
    runtime_down: AtomicBool,
}

impl RecordingSink {
    pub fn statuses(&self) -> Vec<StatusMessage> {
        self.statuses.lock().unwrap().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.statuses().into_iter().map(|s| s.text).collect()
    }

    pub fn has_status(&self, text: &str) -> bool {
        self.texts().iter().any(|t| t == text)
    }

    pub fn states(&self) -> Vec<StateEvent> {
        self.states.lock().unwrap().clone()
    }

    pub fn last_state(&self) -> Option<StateEvent> {
        self.states().last().copied()
    }

    pub fn inbound(&self) -> Vec<String> {
        self.inbound.lock().unwrap().clone()
    }

    pub fn set_runtime_down(&self, down: bool) {
        self.runtime_down.store(down, Ordering::SeqCst);
    }
}

impl StatusSink for RecordingSink {
    fn status(&self, message: StatusMessage) {
        self.statuses.lock().unwrap().push(message);
    }

    fn state(&self, event: StateEvent) {
        self.states.lock().unwrap().push(event);
    }
}

impl InboundSink for RecordingSink {
    fn deliver(&self, message: &str) -> Result<()> {
        if self.runtime_down.load(Ordering::SeqCst) {
            return Err(LifecycleError::RuntimeUnavailable("web view gone".to_string()));
        }
        self.inbound.lock().unwrap().push(message.to_string());
        Ok(())
    }
}

/// Wake resource that counts host calls
pub struct CountingWakeResource {
    name: &'static str,
    held: AtomicBool,
    acquires: AtomicUsize,
    releases: AtomicUsize,
}

impl CountingWakeResource {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            held: AtomicBool::new(false),
            acquires: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
        }
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::SeqCst)
    }

    pub fn acquires(&self) -> usize {
        self.acquires.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WakeResource for CountingWakeResource {
    fn name(&self) -> &str {
        self.name
    }

    async fn acquire(&self) -> Result<()> {
        self.acquires.fetch_add(1, Ordering::SeqCst);
        self.held.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn release(&self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
        self.held.store(false, Ordering::SeqCst);
    }
}

/// A running manager wired to fakes
pub struct Harness {
    pub handle: LifecycleHandle,
    pub task: JoinHandle<()>,
    pub login: Arc<FakeLogin>,
    pub connector: Arc<FakeConnector>,
    pub sink: Arc<RecordingSink>,
    pub store: Arc<MemoryStateStore>,
    pub sleep_lock: Arc<CountingWakeResource>,
    pub network_hold: Arc<CountingWakeResource>,
}

impl Harness {
    pub fn start(network: NetworkState) -> Self {
        Self::with(LifecycleConfig::default(), PersistedState::default(), network)
    }

    pub fn with(config: LifecycleConfig, persisted: PersistedState, network: NetworkState) -> Self {
        init_tracing();

        let login = Arc::new(FakeLogin::new());
        let connector = Arc::new(FakeConnector::default());
        let sink = Arc::new(RecordingSink::default());
        let store = Arc::new(MemoryStateStore::new(persisted));
        let sleep_lock = Arc::new(CountingWakeResource::new("sleep"));
        let network_hold = Arc::new(CountingWakeResource::new("wifi"));

        let collaborators = Collaborators {
            login: login.clone(),
            connector: connector.clone(),
            status: sink.clone(),
            inbound: sink.clone(),
            store: store.clone(),
            sleep_lock: sleep_lock.clone(),
            network_hold: network_hold.clone(),
        };
        let (handle, task) = LifecycleManager::start(config, collaborators, network);

        Self {
            handle,
            task,
            login,
            connector,
            sink,
            store,
            sleep_lock,
            network_hold,
        }
    }

    pub async fn snapshot(&self) -> Snapshot {
        self.handle.snapshot().await.expect("manager running")
    }

    /// Go online and wait for the session to register
    pub async fn online(&self) {
        self.handle.set_desired_state(true).unwrap();
        settle().await;
    }
}

/// Route manager logs to the test output at debug level
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Let every runnable task finish; the paused clock moves by 1ms
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

/// Advance the paused clock, running every timer that falls due
pub async fn advance(duration: Duration) {
    tokio::time::sleep(duration).await;
}
