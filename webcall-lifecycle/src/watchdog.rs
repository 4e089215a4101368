//! Alarm Watchdog
//!
//! Periodic last-resort liveness check. Each firing asks the lifecycle
//! manager to ping the live session and check heartbeat staleness, then
//! re-arms for the next period no matter what the desired connect state is.
//! The monotonic clock stops while the host sleeps, so the power monitor
//! nudges the watchdog on resume instead of waiting out the rest of the
//! period.

use crate::config::LifecycleConfig;
use crate::manager::LifecycleHandle;
use crate::scheduler::{ScheduledTask, Scheduler};
use std::time::Duration;
use tracing::{debug, info};

/// Default watchdog period
pub const WATCHDOG_PERIOD: Duration = Duration::from_secs(15 * 60);

/// Handle to a running watchdog
#[derive(Clone)]
pub struct WatchdogHandle {
    lifecycle: LifecycleHandle,
}

impl WatchdogHandle {
    /// Fire now, outside the regular period
    pub fn nudge(&self) {
        debug!("Watchdog nudged");
        if self.lifecycle.watchdog_fired().is_err() {
            debug!("Lifecycle manager gone, ignoring nudge");
        }
    }
}

/// Periodic trigger for heartbeat checks
pub struct AlarmWatchdog {
    period: Duration,
}

impl Default for AlarmWatchdog {
    fn default() -> Self {
        Self::new(WATCHDOG_PERIOD)
    }
}

impl AlarmWatchdog {
    pub fn new(period: Duration) -> Self {
        Self { period }
    }

    /// Watchdog firing every `config.watchdog_period`
    pub fn from_config(config: &LifecycleConfig) -> Self {
        Self::new(config.watchdog_period)
    }

    /// Arm the watchdog on the current runtime. It disarms itself once the
    /// lifecycle manager shuts down.
    pub fn spawn(self, lifecycle: LifecycleHandle) -> (WatchdogHandle, ScheduledTask) {
        let handle = WatchdogHandle {
            lifecycle: lifecycle.clone(),
        };

        info!("Watchdog armed every {:?}", self.period);
        let task = Scheduler::current().schedule_periodic(self.period, move || {
            let lifecycle = lifecycle.clone();
            async move {
                debug!("Watchdog alarm");
                if lifecycle.watchdog_fired().is_err() {
                    debug!("Lifecycle manager gone, disarming watchdog");
                    return false;
                }
                true
            }
        });

        (handle, task)
    }
}
