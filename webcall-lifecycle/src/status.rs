//! Status and message sinks
//!
//! The lifecycle manager reports what it is doing through a [`StatusSink`]
//! and hands inbound signaling payloads to an [`InboundSink`]. Both are
//! implemented by the embedding application; emissions from different
//! triggers are not ordered, so consumers treat the latest one as current.

use crate::Result;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Structured connection state for presentation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateEvent {
    /// Session is registered and acknowledged by the server
    Connected,
    /// Session is gone
    Disconnected,
    /// Reconnecting was abandoned and the connect intent cleared
    Deactivated,
}

impl StateEvent {
    /// Wire tag of this event
    pub fn as_str(&self) -> &'static str {
        match self {
            StateEvent::Connected => "connected",
            StateEvent::Disconnected => "disconnected",
            StateEvent::Deactivated => "deactivated",
        }
    }
}

impl fmt::Display for StateEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Human-readable status line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMessage {
    pub text: String,
    /// How long to display it; `None` keeps it until replaced
    pub timeout: Option<Duration>,
    /// Whether the user should be notified (not just shown) about it
    pub notify: bool,
    /// Whether the status deserves an audible cue
    pub important: bool,
}

impl StatusMessage {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            timeout: None,
            notify: false,
            important: false,
        }
    }

    pub fn notify(mut self) -> Self {
        self.notify = true;
        self
    }

    pub fn important(mut self, important: bool) -> Self {
        self.important = important;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Receiver of status lines and state events
pub trait StatusSink: Send + Sync {
    fn status(&self, message: StatusMessage);
    fn state(&self, event: StateEvent);
}

/// Receiver of opaque inbound signaling payloads
pub trait InboundSink: Send + Sync {
    /// Deliver one message.
    ///
    /// Returning [`LifecycleError::RuntimeUnavailable`](crate::LifecycleError::RuntimeUnavailable)
    /// makes the manager give up; other errors are logged and ignored.
    fn deliver(&self, message: &str) -> Result<()>;
}

/// Logs everything through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingStatusSink;

impl StatusSink for TracingStatusSink {
    fn status(&self, message: StatusMessage) {
        if message.important {
            info!(important = true, "Status: {}", message.text);
        } else {
            info!("Status: {}", message.text);
        }
    }

    fn state(&self, event: StateEvent) {
        info!("State: {}", event);
    }
}

impl InboundSink for TracingStatusSink {
    fn deliver(&self, message: &str) -> Result<()> {
        debug!("Inbound signaling message ({} bytes)", message.len());
        Ok(())
    }
}

/// Sends every emission to several sinks
#[derive(Default, Clone)]
pub struct FanoutStatusSink {
    sinks: Vec<Arc<dyn StatusSink>>,
}

impl FanoutStatusSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn StatusSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl StatusSink for FanoutStatusSink {
    fn status(&self, message: StatusMessage) {
        for sink in &self.sinks {
            sink.status(message.clone());
        }
    }

    fn state(&self, event: StateEvent) {
        for sink in &self.sinks {
            sink.state(event);
        }
    }
}
