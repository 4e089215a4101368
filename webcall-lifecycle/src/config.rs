//! Lifecycle manager configuration

use crate::backoff::{
    BACKOFF_STEP, IMPORTANT_ATTEMPT, MAX_BACKOFF_DELAY, MAX_RECONNECT_ATTEMPTS,
};
use crate::watchdog::WATCHDOG_PERIOD;
use std::time::Duration;

/// Server pings every 60 seconds; a session silent for longer than this is stale
pub const STALENESS_THRESHOLD: Duration = Duration::from_secs(130);

/// Sleep-lock hold while a login or socket open is in progress
pub const KEEP_AWAKE_HOLD: Duration = Duration::from_secs(3 * 60);

/// Sleep-lock hold around suspend edges
pub const SUSPEND_EDGE_HOLD: Duration = Duration::from_secs(2);

/// Delay before logging in again after a network switch, so the server
/// notices the old session is gone and does not reject the login
pub const NETWORK_CHANGE_DELAY: Duration = Duration::from_secs(3);

/// Delay before reconnecting after an abnormal close
pub const ABNORMAL_CLOSE_DELAY: Duration = Duration::from_secs(5);

/// Delay before reconnecting after leaving suspend
pub const RESUME_DELAY: Duration = Duration::from_secs(2);

/// Delay before resuming a persisted connect intent at startup
pub const BOOT_DELAY: Duration = Duration::from_secs(16);

/// Socket open timeout
pub const SOCKET_OPEN_TIMEOUT: Duration = Duration::from_secs(22);

/// First message sent on a fresh session
pub const REGISTRATION_MESSAGE: &str = "init|";

/// Lifecycle manager configuration
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Delay added per failed attempt
    pub backoff_step: Duration,
    /// Longest delay between attempts
    pub max_backoff: Duration,
    /// Failed attempts before giving up
    pub max_attempts: u32,
    /// Failure count whose retry status is flagged important
    pub important_attempt: u32,
    /// Heartbeat age after which a session counts as dead
    pub staleness_threshold: Duration,
    /// Sleep-lock hold for network work
    pub keep_awake_hold: Duration,
    /// Sleep-lock hold around suspend edges
    pub suspend_edge_hold: Duration,
    /// Delay after a network switch
    pub network_change_delay: Duration,
    /// Delay after an abnormal close
    pub abnormal_close_delay: Duration,
    /// Delay after leaving suspend
    pub resume_delay: Duration,
    /// Delay before resuming a persisted intent
    pub boot_delay: Duration,
    /// Resume a persisted connect intent at startup
    pub resume_persisted_intent: bool,
    /// Socket open timeout
    pub socket_open_timeout: Duration,
    /// Watchdog period
    pub watchdog_period: Duration,
    /// First message on a fresh session
    pub registration_message: String,
    /// Hold the network resource while on Wifi
    pub wifi_lock: bool,
    /// Flag the give-up status as important
    pub beep_on_give_up: bool,
    /// Client version, used to scope persisted accounting
    pub app_version: String,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            backoff_step: BACKOFF_STEP,
            max_backoff: MAX_BACKOFF_DELAY,
            max_attempts: MAX_RECONNECT_ATTEMPTS,
            important_attempt: IMPORTANT_ATTEMPT,
            staleness_threshold: STALENESS_THRESHOLD,
            keep_awake_hold: KEEP_AWAKE_HOLD,
            suspend_edge_hold: SUSPEND_EDGE_HOLD,
            network_change_delay: NETWORK_CHANGE_DELAY,
            abnormal_close_delay: ABNORMAL_CLOSE_DELAY,
            resume_delay: RESUME_DELAY,
            boot_delay: BOOT_DELAY,
            resume_persisted_intent: true,
            socket_open_timeout: SOCKET_OPEN_TIMEOUT,
            watchdog_period: WATCHDOG_PERIOD,
            registration_message: REGISTRATION_MESSAGE.to_string(),
            wifi_lock: false,
            beep_on_give_up: true,
            app_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
