//! Keep-Awake Locks
//!
//! Two host resources keep the signaling session reachable:
//!
//! - the **sleep lock**, held for a bounded time while a login exchange,
//!   a socket open or a short suspend window is being bridged, and
//! - the **network hold**, held while the device sits on Wifi when the user
//!   asked for it.
//!
//! Every release of the sleep lock adds the held time to
//! [`KeepAliveAccounting`], which is persisted so the daemon can report how
//! much of the day the host was kept awake.

use crate::Result;
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// A host resource that can be held and released
#[async_trait]
pub trait WakeResource: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Take the resource
    async fn acquire(&self) -> Result<()>;

    /// Give the resource back; releasing an unheld resource is a no-op
    async fn release(&self);
}

/// Resource used when the host offers nothing to hold
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopWakeResource;

#[async_trait]
impl WakeResource for NoopWakeResource {
    fn name(&self) -> &str {
        "noop"
    }

    async fn acquire(&self) -> Result<()> {
        Ok(())
    }

    async fn release(&self) {}
}

/// Milliseconds the sleep lock was held since local midnight
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeepAliveAccounting {
    /// Day the total belongs to
    pub day: Option<NaiveDate>,
    /// Accumulated held time in milliseconds
    pub held_ms: u64,
}

impl KeepAliveAccounting {
    /// Start a new total if `today` is a different day. Returns true on rollover.
    pub fn roll_over(&mut self, today: NaiveDate) -> bool {
        if self.day == Some(today) {
            return false;
        }
        let rolled = self.day.is_some();
        self.day = Some(today);
        self.held_ms = 0;
        rolled
    }

    /// Add a held interval to today's total
    pub fn add(&mut self, held: Duration, today: NaiveDate) {
        self.roll_over(today);
        let ms = u64::try_from(held.as_millis()).unwrap_or(u64::MAX);
        self.held_ms = self.held_ms.saturating_add(ms);
    }

    /// Add a hold that ended at local time `end`
    ///
    /// Only the part after `end`'s midnight is counted; totals of earlier
    /// days are not kept.
    pub fn add_span(&mut self, held: Duration, end: NaiveDateTime) {
        let today = end.date();
        let since_midnight = (end - today.and_time(NaiveTime::MIN))
            .to_std()
            .unwrap_or(Duration::ZERO);
        self.add(held.min(since_midnight), today);
    }

    /// Forget everything
    pub fn reset(&mut self) {
        self.day = None;
        self.held_ms = 0;
    }
}

/// Bounded sleep-prevention lock with held-time accounting
///
/// Owned by the lifecycle manager. `acquire` returns a generation number;
/// the owner schedules [`KeepAliveLock::expire`] with it after the hold
/// elapses, and a later acquire bumps the generation so stale expiries do
/// nothing.
pub struct KeepAliveLock {
    resource: Arc<dyn WakeResource>,
    held_since: Option<Instant>,
    expires_at: Option<Instant>,
    generation: u64,
    accounting: KeepAliveAccounting,
}

impl KeepAliveLock {
    /// Create a lock over `resource`, continuing a persisted total
    pub fn new(resource: Arc<dyn WakeResource>, accounting: KeepAliveAccounting) -> Self {
        Self {
            resource,
            held_since: None,
            expires_at: None,
            generation: 0,
            accounting,
        }
    }

    /// Whether the host resource is currently held
    pub fn is_held(&self) -> bool {
        self.held_since.is_some()
    }

    /// Current accounting totals (excluding the running hold)
    pub fn accounting(&self) -> &KeepAliveAccounting {
        &self.accounting
    }

    /// Today's total including the hold that is still running
    pub fn held_ms_now(&self) -> u64 {
        let running = self
            .held_since
            .map(|since| u64::try_from(since.elapsed().as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0);
        self.accounting.held_ms.saturating_add(running)
    }

    /// Hold the resource for at least `hold`
    ///
    /// Returns the generation to pass to [`expire`](Self::expire) once the
    /// hold elapses, or `None` when an existing hold already lasts longer or
    /// the host refused the resource.
    pub async fn acquire(&mut self, hold: Duration) -> Option<u64> {
        let now = Instant::now();
        let until = now + hold;

        if let Some(expires_at) = self.expires_at {
            if self.is_held() && expires_at >= until {
                return None;
            }
        }

        if !self.is_held() {
            if let Err(e) = self.resource.acquire().await {
                warn!("Failed to acquire {} lock: {}", self.resource.name(), e);
                return None;
            }
            debug!("Acquired {} lock for {:?}", self.resource.name(), hold);
            self.held_since = Some(now);
        } else {
            debug!("Extended {} lock by {:?}", self.resource.name(), hold);
        }

        self.expires_at = Some(until);
        self.generation += 1;
        Some(self.generation)
    }

    /// Release the resource if held at local time `now`. Returns how long it was held.
    pub async fn release(&mut self, now: NaiveDateTime) -> Option<Duration> {
        let since = self.held_since.take()?;
        self.expires_at = None;
        self.generation += 1;

        self.resource.release().await;
        let held = since.elapsed();
        self.accounting.add_span(held, now);
        debug!(
            "Released {} lock after {}ms (today {}ms)",
            self.resource.name(),
            held.as_millis(),
            self.accounting.held_ms
        );
        Some(held)
    }

    /// Release the resource if `generation` is still the latest hold
    pub async fn expire(&mut self, generation: u64, now: NaiveDateTime) -> Option<Duration> {
        if generation != self.generation {
            return None;
        }
        self.release(now).await
    }

    /// Apply the daily rollover. Returns true if the total was reset.
    pub fn roll_over(&mut self, today: NaiveDate) -> bool {
        self.accounting.roll_over(today)
    }
}

/// Network-teardown prevention held while on Wifi
pub struct NetworkHold {
    resource: Arc<dyn WakeResource>,
    held: bool,
}

impl NetworkHold {
    pub fn new(resource: Arc<dyn WakeResource>) -> Self {
        Self {
            resource,
            held: false,
        }
    }

    pub fn is_held(&self) -> bool {
        self.held
    }

    pub async fn acquire(&mut self) {
        if self.held {
            return;
        }
        match self.resource.acquire().await {
            Ok(()) => {
                debug!("Acquired {} hold", self.resource.name());
                self.held = true;
            }
            Err(e) => warn!("Failed to acquire {} hold: {}", self.resource.name(), e),
        }
    }

    pub async fn release(&mut self) {
        if self.held {
            self.resource.release().await;
            self.held = false;
            debug!("Released {} hold", self.resource.name());
        }
    }
}
