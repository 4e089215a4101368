//! Power Suspend Monitor
//!
//! Turns platform power signals into two edges, entering and leaving
//! suspend, plus charger changes.

use crate::manager::LifecycleHandle;
use crate::watchdog::WatchdogHandle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Transition into or out of a background-restricted state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuspendEdge {
    /// The host is about to suspend or restrict background work
    Entering,
    /// The host is interactive again
    Leaving,
}

/// Raw power signal from a platform source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawPowerEvent {
    /// logind `PrepareForSleep(start)`
    PrepareForSleep(bool),
    /// Session idle hint changed
    IdleHint(bool),
    /// UPower `OnBattery` changed
    OnBattery(bool),
}

/// Normalized power event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerEvent {
    Suspend(SuspendEdge),
    ChargerChanged { on_battery: bool },
}

/// Edge detector over raw power signals
#[derive(Debug, Default)]
pub struct PowerSuspendMonitor {
    suspended: bool,
    on_battery: Option<bool>,
}

impl PowerSuspendMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the last edge was entering suspend
    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    /// Feed one raw event; returns a normalized event on real transitions
    pub fn observe(&mut self, event: RawPowerEvent) -> Option<PowerEvent> {
        match event {
            RawPowerEvent::PrepareForSleep(entering) | RawPowerEvent::IdleHint(entering) => {
                if entering == self.suspended {
                    debug!("Power event {:?} without edge", event);
                    return None;
                }
                self.suspended = entering;
                let edge = if entering {
                    SuspendEdge::Entering
                } else {
                    SuspendEdge::Leaving
                };
                info!("Suspend edge: {:?}", edge);
                Some(PowerEvent::Suspend(edge))
            }
            RawPowerEvent::OnBattery(on_battery) => {
                let previous = self.on_battery.replace(on_battery);
                match previous {
                    // the first report only establishes the baseline
                    None => None,
                    Some(previous) if previous == on_battery => None,
                    Some(_) => {
                        info!("Charger {}", if on_battery { "disconnected" } else { "connected" });
                        Some(PowerEvent::ChargerChanged { on_battery })
                    }
                }
            }
        }
    }

    /// Forward normalized events into the lifecycle manager
    pub fn spawn(
        mut self,
        mut events: mpsc::Receiver<RawPowerEvent>,
        lifecycle: LifecycleHandle,
        watchdog: Option<WatchdogHandle>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let forwarded = match self.observe(event) {
                    Some(PowerEvent::Suspend(edge)) => {
                        if edge == SuspendEdge::Leaving {
                            if let Some(watchdog) = &watchdog {
                                watchdog.nudge();
                            }
                        }
                        lifecycle.notify_suspend_edge(edge)
                    }
                    Some(PowerEvent::ChargerChanged { .. }) => lifecycle.notify_charger_changed(),
                    None => Ok(()),
                };
                if forwarded.is_err() {
                    debug!("Lifecycle manager gone, stopping power monitor");
                    break;
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sleep_edges() {
        let mut monitor = PowerSuspendMonitor::new();

        assert_eq!(monitor.observe(RawPowerEvent::PrepareForSleep(false)), None);
        assert_eq!(
            monitor.observe(RawPowerEvent::PrepareForSleep(true)),
            Some(PowerEvent::Suspend(SuspendEdge::Entering))
        );
        assert!(monitor.is_suspended());
        assert_eq!(monitor.observe(RawPowerEvent::IdleHint(true)), None);
        assert_eq!(
            monitor.observe(RawPowerEvent::PrepareForSleep(false)),
            Some(PowerEvent::Suspend(SuspendEdge::Leaving))
        );
    }

    #[test]
    fn test_charger_baseline_is_silent() {
        let mut monitor = PowerSuspendMonitor::new();

        assert_eq!(monitor.observe(RawPowerEvent::OnBattery(true)), None);
        assert_eq!(monitor.observe(RawPowerEvent::OnBattery(true)), None);
        assert_eq!(
            monitor.observe(RawPowerEvent::OnBattery(false)),
            Some(PowerEvent::ChargerChanged { on_battery: false })
        );
    }
}
