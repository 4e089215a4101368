//! WebCall Connection Lifecycle
//!
//! Keeps a signaling WebSocket to a WebCall server alive across network
//! switches, suspend and server hiccups, with bounded retries and host wake
//! locks held only while network work is in progress.

pub mod backoff;
pub mod config;
pub mod keepalive;
pub mod login;
pub mod manager;
pub mod network;
pub mod platform;
pub mod scheduler;
pub mod session;
pub mod status;
pub mod store;
pub mod suspend;
pub mod watchdog;

mod error;

pub use backoff::{Backoff, ReconnectPolicy};
pub use config::LifecycleConfig;
pub use error::{LifecycleError, Result};
pub use keepalive::{KeepAliveAccounting, KeepAliveLock, NetworkHold, NoopWakeResource, WakeResource};
pub use login::{HttpLoginClient, LoginClient, LoginReply, LoginSettings};
pub use manager::{
    Collaborators, ConnectionStatus, LifecycleHandle, LifecycleManager, ReconnectState, Snapshot,
};
pub use network::{NetworkEdge, NetworkMonitor, NetworkState, RawNetworkEvent};
pub use scheduler::{ScheduledTask, Scheduler};
pub use session::{
    SessionConnector, SessionEvent, SessionEvents, SignalingSession, WebSocketConnector,
};
pub use status::{
    FanoutStatusSink, InboundSink, StateEvent, StatusMessage, StatusSink, TracingStatusSink,
};
pub use store::{JsonStateStore, MemoryStateStore, PersistedState, StateStore};
pub use suspend::{PowerEvent, PowerSuspendMonitor, RawPowerEvent, SuspendEdge};
pub use watchdog::{AlarmWatchdog, WatchdogHandle};
