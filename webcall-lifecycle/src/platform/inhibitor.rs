//! Systemd Logind Inhibitor Locks
//!
//! logind's `Inhibit()` returns a file descriptor; the inhibition lasts as
//! long as the descriptor stays open. A [`LogindInhibitor`] exposes that as a
//! [`WakeResource`] so the lifecycle manager can hold and release it.
//!
//! - `sleep` keeps the host from suspending during a login or socket open
//! - `idle` keeps idle actions (and with them network power saving) away
//!   while on Wifi

use crate::keepalive::WakeResource;
use crate::Result;
use async_trait::async_trait;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::sync::Mutex;
use tracing::{debug, info, warn};
use zbus::zvariant::OwnedFd as ZbusOwnedFd;
use zbus::Connection;

/// What an inhibitor blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InhibitType {
    Sleep,
    Idle,
}

impl InhibitType {
    fn as_what(&self) -> &'static str {
        match self {
            InhibitType::Sleep => "sleep",
            InhibitType::Idle => "idle",
        }
    }
}

/// Inhibitor lock mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InhibitMode {
    /// Block the operation until released
    Block,
    /// Delay the operation up to logind's `InhibitDelayMaxSec`
    Delay,
}

impl InhibitMode {
    fn as_str(&self) -> &'static str {
        match self {
            InhibitMode::Block => "block",
            InhibitMode::Delay => "delay",
        }
    }
}

/// logind inhibitor usable as a [`WakeResource`]
pub struct LogindInhibitor {
    name: String,
    what: InhibitType,
    mode: InhibitMode,
    who: String,
    why: String,
    connection: tokio::sync::Mutex<Option<Connection>>,
    lock: Mutex<Option<OwnedFd>>,
}

impl LogindInhibitor {
    pub fn new(what: InhibitType, mode: InhibitMode, why: impl Into<String>) -> Self {
        Self {
            name: format!("logind {}", what.as_what()),
            what,
            mode,
            who: "webcall-daemon".to_string(),
            why: why.into(),
            connection: tokio::sync::Mutex::new(None),
            lock: Mutex::new(None),
        }
    }

    /// Sleep inhibitor held while network work is in progress
    pub fn sleep() -> Self {
        Self::new(
            InhibitType::Sleep,
            InhibitMode::Block,
            "Keeping the signaling connection alive",
        )
    }

    /// Idle inhibitor held while on Wifi
    pub fn idle() -> Self {
        Self::new(
            InhibitType::Idle,
            InhibitMode::Block,
            "Keeping Wifi up for incoming calls",
        )
    }

    async fn connection(&self) -> Result<Connection> {
        let mut guard = self.connection.lock().await;
        if let Some(connection) = guard.as_ref() {
            return Ok(connection.clone());
        }
        let connection = Connection::system().await?;
        debug!("Connected to system DBus for inhibitor management");
        *guard = Some(connection.clone());
        Ok(connection)
    }

    fn is_held(&self) -> bool {
        match self.lock.lock() {
            Ok(lock) => lock.is_some(),
            Err(poisoned) => poisoned.into_inner().is_some(),
        }
    }

    fn store(&self, fd: Option<OwnedFd>) -> Option<OwnedFd> {
        match self.lock.lock() {
            Ok(mut lock) => std::mem::replace(&mut *lock, fd),
            Err(poisoned) => std::mem::replace(&mut *poisoned.into_inner(), fd),
        }
    }
}

#[async_trait]
impl WakeResource for LogindInhibitor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn acquire(&self) -> Result<()> {
        if self.is_held() {
            return Ok(());
        }

        let connection = self.connection().await?;
        let reply = connection
            .call_method(
                Some("org.freedesktop.login1"),
                "/org/freedesktop/login1",
                Some("org.freedesktop.login1.Manager"),
                "Inhibit",
                &(
                    self.what.as_what(),
                    self.who.as_str(),
                    self.why.as_str(),
                    self.mode.as_str(),
                ),
            )
            .await?;

        let fd: ZbusOwnedFd = reply.body().deserialize()?;

        // Duplicate the FD before zbus's OwnedFd drops it
        let dup_fd = nix::unistd::dup(fd.as_raw_fd()).map_err(std::io::Error::from)?;
        // Safety: dup returns a fresh, valid file descriptor we now own
        let owned_fd = unsafe { OwnedFd::from_raw_fd(dup_fd) };

        if self.store(Some(owned_fd)).is_some() {
            warn!("Replaced an existing {} inhibitor", self.what.as_what());
        }
        info!("Acquired {} inhibitor: {}", self.what.as_what(), self.why);
        Ok(())
    }

    async fn release(&self) {
        // closing the descriptor ends the inhibition
        if self.store(None).is_some() {
            info!("Released {} inhibitor", self.what.as_what());
        }
    }
}
