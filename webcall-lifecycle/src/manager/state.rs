//! Reconnect state machine
//!
//! The transition table is a pure function of the current state and an
//! incoming event. It decides the next state and which action the manager
//! runs; the manager owns every side effect.

use crate::login::LoginReply;
use crate::session::SignalingSession;
use crate::LifecycleError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Where the manager is in the connect cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ReconnectState {
    /// Nothing scheduled and no session
    #[default]
    Idle,
    /// Login exchange in flight
    LoggingIn,
    /// Login succeeded, socket open in flight
    AwaitingSocketOpen,
    /// Session open and registered
    Registered,
    /// Waiting for a scheduled attempt or for the network to return
    BackoffWaiting,
    /// Reconnecting abandoned, connect intent cleared
    GivenUp,
}

impl ReconnectState {
    /// Whether an attempt is in flight
    pub fn is_busy(&self) -> bool {
        matches!(self, ReconnectState::LoggingIn | ReconnectState::AwaitingSocketOpen)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReconnectState::Idle => "idle",
            ReconnectState::LoggingIn => "logging_in",
            ReconnectState::AwaitingSocketOpen => "awaiting_socket_open",
            ReconnectState::Registered => "registered",
            ReconnectState::BackoffWaiting => "backoff_waiting",
            ReconnectState::GivenUp => "given_up",
        }
    }
}

impl fmt::Display for ReconnectState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input to the transition table
pub(crate) enum Event {
    /// Arm a retry after the delay
    Schedule(Duration),
    /// A due attempt passed its guards
    Start,
    LoginSucceeded(LoginReply),
    LoginFailed(LifecycleError),
    SocketOpened {
        session: u64,
        handle: Box<dyn SignalingSession>,
    },
    SocketFailed(LifecycleError),
    /// Live session torn down for a reason other than an orderly close
    SessionBroken { delay: Duration },
    /// Orderly close
    SessionEnded,
    /// No usable network while a session is wanted
    NetworkLost,
    /// Connect intent withdrawn
    Stop,
    GiveUp(LifecycleError),
}

impl Event {
    fn name(&self) -> &'static str {
        match self {
            Event::Schedule(_) => "schedule",
            Event::Start => "start",
            Event::LoginSucceeded(_) => "login_succeeded",
            Event::LoginFailed(_) => "login_failed",
            Event::SocketOpened { .. } => "socket_opened",
            Event::SocketFailed(_) => "socket_failed",
            Event::SessionBroken { .. } => "session_broken",
            Event::SessionEnded => "session_ended",
            Event::NetworkLost => "network_lost",
            Event::Stop => "stop",
            Event::GiveUp(_) => "give_up",
        }
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Schedule(delay) | Event::SessionBroken { delay } => {
                write!(f, "{}({:?})", self.name(), delay)
            }
            Event::LoginFailed(e) | Event::SocketFailed(e) | Event::GiveUp(e) => {
                write!(f, "{}({})", self.name(), e)
            }
            Event::SocketOpened { session, .. } => write!(f, "{}({})", self.name(), session),
            _ => f.write_str(self.name()),
        }
    }
}

/// Side effect chosen by a transition
pub(crate) enum Action {
    Schedule(Duration),
    Login,
    OpenSocket(LoginReply),
    Register {
        session: u64,
        handle: Box<dyn SignalingSession>,
    },
    Backoff(LifecycleError),
    Reconnect(Duration),
    Closed,
    Park,
    Teardown,
    GiveUp(LifecycleError),
}

pub(crate) struct Step {
    pub next: ReconnectState,
    pub action: Action,
}

impl Step {
    fn to(next: ReconnectState, action: Action) -> Self {
        Self { next, action }
    }
}

/// Look up the transition for `event` in `state`.
///
/// Events that are meaningless in the current state come back as `Err` so
/// the caller can log and drop them.
pub(crate) fn transition(state: ReconnectState, event: Event) -> Result<Step, Event> {
    use ReconnectState::*;

    let step = match (state, event) {
        (Idle | BackoffWaiting | GivenUp, Event::Schedule(delay)) => {
            Step::to(BackoffWaiting, Action::Schedule(delay))
        }
        (Idle | BackoffWaiting, Event::Start) => Step::to(LoggingIn, Action::Login),

        (LoggingIn, Event::LoginSucceeded(reply)) => {
            Step::to(AwaitingSocketOpen, Action::OpenSocket(reply))
        }
        (AwaitingSocketOpen, Event::SocketOpened { session, handle }) => {
            Step::to(Registered, Action::Register { session, handle })
        }
        (LoggingIn, Event::LoginFailed(error)) | (AwaitingSocketOpen, Event::SocketFailed(error)) => {
            if error.is_recoverable() {
                Step::to(BackoffWaiting, Action::Backoff(error))
            } else {
                Step::to(GivenUp, Action::GiveUp(error))
            }
        }

        (Registered, Event::SessionBroken { delay }) => {
            Step::to(BackoffWaiting, Action::Reconnect(delay))
        }
        (Registered, Event::SessionEnded) => Step::to(Idle, Action::Closed),

        (Idle | LoggingIn | AwaitingSocketOpen | Registered | BackoffWaiting, Event::NetworkLost) => {
            Step::to(BackoffWaiting, Action::Park)
        }

        (_, Event::Stop) => Step::to(Idle, Action::Teardown),

        (LoggingIn | AwaitingSocketOpen | Registered | BackoffWaiting, Event::GiveUp(error)) => {
            Step::to(GivenUp, Action::GiveUp(error))
        }

        (_, event) => return Err(event),
    };

    Ok(step)
}
