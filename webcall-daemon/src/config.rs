//! Daemon Configuration
//!
//! Configuration management for the WebCall daemon.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use webcall_lifecycle::{LifecycleConfig, LoginSettings, WebSocketConnector};

/// Daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// WebCall server account
    #[serde(default)]
    pub server: ServerConfig,

    /// Reconnect timing
    #[serde(default)]
    pub lifecycle: LifecycleSection,

    /// User policy toggles
    #[serde(default)]
    pub policy: PolicyConfig,

    /// Storage paths
    pub paths: PathConfig,
}

/// WebCall server account
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server host name, optionally with port
    #[serde(default)]
    pub domain: String,

    /// Client identity registered on the server
    #[serde(default)]
    pub username: String,

    /// Skip TLS certificate verification
    #[serde(default)]
    pub insecure_tls: bool,
}

/// Reconnect timing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleSection {
    /// Backoff added per failed attempt (seconds)
    #[serde(default = "default_backoff_step_secs")]
    pub backoff_step_secs: u64,

    /// Backoff ceiling (seconds)
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,

    /// Failed attempts before giving up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Heartbeat age after which the session counts as dead (seconds)
    #[serde(default = "default_staleness_secs")]
    pub staleness_secs: u64,

    /// Keep-awake hold for network work (seconds)
    #[serde(default = "default_keep_awake_secs")]
    pub keep_awake_secs: u64,

    /// Delay before resuming a persisted connect intent (seconds)
    #[serde(default = "default_boot_delay_secs")]
    pub boot_delay_secs: u64,

    /// Watchdog period (minutes)
    #[serde(default = "default_watchdog_minutes")]
    pub watchdog_minutes: u64,

    /// Login connect timeout (seconds)
    #[serde(default = "default_login_connect_timeout_secs")]
    pub login_connect_timeout_secs: u64,

    /// Login request timeout (seconds)
    #[serde(default = "default_login_timeout_secs")]
    pub login_timeout_secs: u64,

    /// WebSocket open timeout (seconds)
    #[serde(default = "default_socket_timeout_secs")]
    pub socket_timeout_secs: u64,
}

impl Default for LifecycleSection {
    fn default() -> Self {
        Self {
            backoff_step_secs: default_backoff_step_secs(),
            max_backoff_secs: default_max_backoff_secs(),
            max_attempts: default_max_attempts(),
            staleness_secs: default_staleness_secs(),
            keep_awake_secs: default_keep_awake_secs(),
            boot_delay_secs: default_boot_delay_secs(),
            watchdog_minutes: default_watchdog_minutes(),
            login_connect_timeout_secs: default_login_connect_timeout_secs(),
            login_timeout_secs: default_login_timeout_secs(),
            socket_timeout_secs: default_socket_timeout_secs(),
        }
    }
}

/// User policy toggles
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Keep the network up while on Wifi
    #[serde(default)]
    pub wifi_lock: bool,

    /// Mark the give-up status as important
    #[serde(default = "default_true")]
    pub beep_on_give_up: bool,

    /// Poll NetworkManager every N seconds in addition to its signals (0 = off)
    #[serde(default)]
    pub network_poll_secs: u64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            wifi_lock: false,
            beep_on_give_up: true,
            network_poll_secs: 0,
        }
    }
}

/// Storage paths
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathConfig {
    /// Configuration directory
    pub config_dir: PathBuf,

    /// Data directory (persisted lifecycle state)
    pub data_dir: PathBuf,
}

fn default_backoff_step_secs() -> u64 {
    10
}

fn default_max_backoff_secs() -> u64 {
    1200
}

fn default_max_attempts() -> u32 {
    120
}

fn default_staleness_secs() -> u64 {
    130
}

fn default_keep_awake_secs() -> u64 {
    180
}

fn default_boot_delay_secs() -> u64 {
    16
}

fn default_watchdog_minutes() -> u64 {
    15
}

fn default_login_connect_timeout_secs() -> u64 {
    22
}

fn default_login_timeout_secs() -> u64 {
    32
}

fn default_socket_timeout_secs() -> u64 {
    22
}

fn default_true() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join("webcall");

        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join("webcall");

        Self {
            server: ServerConfig::default(),
            lifecycle: LifecycleSection::default(),
            policy: PolicyConfig::default(),
            paths: PathConfig {
                config_dir,
                data_dir,
            },
        }
    }
}

impl Config {
    /// Load configuration from file, creating default if not found
    pub fn load() -> Result<Self> {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join("webcall");

        Self::load_from(&config_dir.join("daemon.toml"))
    }

    /// Load configuration from `config_path`, writing defaults there if it is missing
    pub fn load_from(config_path: &Path) -> Result<Self> {
        if config_path.exists() {
            let contents =
                fs::read_to_string(config_path).context("Failed to read config file")?;
            let config: Config =
                toml::from_str(&contents).context("Failed to parse config file")?;
            Ok(config)
        } else {
            let mut config = Config::default();
            if let Some(dir) = config_path.parent() {
                config.paths.config_dir = dir.to_path_buf();
            }
            config.save()?;
            Ok(config)
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        fs::create_dir_all(&self.paths.config_dir).context("Failed to create config directory")?;

        let config_path = self.paths.config_dir.join("daemon.toml");
        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(&config_path, contents).context("Failed to write config file")?;

        Ok(())
    }

    /// Ensure all required directories exist
    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.paths.config_dir).context("Failed to create config directory")?;
        fs::create_dir_all(&self.paths.data_dir).context("Failed to create data directory")?;
        Ok(())
    }

    /// Whether domain and username are both set
    pub fn is_server_configured(&self) -> bool {
        !self.server.domain.trim().is_empty() && !self.server.username.trim().is_empty()
    }

    /// Lifecycle policy for the manager
    ///
    /// A persisted connect intent is only resumed at startup when there is a
    /// server to connect to.
    pub fn lifecycle(&self) -> LifecycleConfig {
        let section = &self.lifecycle;
        LifecycleConfig {
            backoff_step: Duration::from_secs(section.backoff_step_secs),
            max_backoff: Duration::from_secs(section.max_backoff_secs),
            max_attempts: section.max_attempts,
            staleness_threshold: Duration::from_secs(section.staleness_secs),
            keep_awake_hold: Duration::from_secs(section.keep_awake_secs),
            boot_delay: Duration::from_secs(section.boot_delay_secs),
            watchdog_period: self.watchdog_period(),
            socket_open_timeout: Duration::from_secs(section.socket_timeout_secs),
            resume_persisted_intent: self.is_server_configured(),
            wifi_lock: self.policy.wifi_lock,
            beep_on_give_up: self.policy.beep_on_give_up,
            ..LifecycleConfig::default()
        }
    }

    /// Settings for the login exchange
    pub fn login_settings(&self) -> LoginSettings {
        let mut settings = LoginSettings::new(&self.server.domain, &self.server.username);
        settings.insecure_tls = self.server.insecure_tls;
        settings.connect_timeout = Duration::from_secs(self.lifecycle.login_connect_timeout_secs);
        settings.timeout = Duration::from_secs(self.lifecycle.login_timeout_secs);
        settings
    }

    /// Signaling socket connector honoring `server.insecure_tls`
    pub fn socket_connector(&self) -> Result<WebSocketConnector> {
        WebSocketConnector::with_insecure_tls(self.server.insecure_tls)
            .context("Failed to set up signaling TLS")
    }

    /// Watchdog period
    pub fn watchdog_period(&self) -> Duration {
        Duration::from_secs(self.lifecycle.watchdog_minutes.max(1) * 60)
    }

    /// Network poll period, if polling is enabled
    pub fn network_poll_period(&self) -> Option<Duration> {
        match self.policy.network_poll_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}
