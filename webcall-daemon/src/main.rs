//! WebCall Daemon
//!
//! Background service that keeps the WebCall signaling connection alive.
//! It wires the host's power, network and sleep-inhibit facilities to the
//! connection lifecycle manager and exposes control over DBus.

mod config;
mod dbus;
mod diagnostics;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use config::Config;
use diagnostics::{format_millis, init_logging, BuildInfo, Cli, DiagnosticCommand};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use webcall_lifecycle::platform::{spawn_power_signals, LogindInhibitor, NetworkManagerSource};
use webcall_lifecycle::{
    AlarmWatchdog, Collaborators, FanoutStatusSink, HttpLoginClient, InboundSink,
    JsonStateStore, LifecycleError, LifecycleHandle, LifecycleManager, LoginClient, LoginReply,
    NetworkMonitor, NetworkState, NoopWakeResource, PowerSuspendMonitor, ScheduledTask, StatusSink,
    TracingStatusSink, WakeResource,
};

/// Login client used while no server account is configured
struct UnconfiguredLogin;

#[async_trait]
impl LoginClient for UnconfiguredLogin {
    async fn login(&self, _cookies: Option<&str>) -> webcall_lifecycle::Result<LoginReply> {
        Err(LifecycleError::Configuration(
            "set server.domain and server.username in daemon.toml".into(),
        ))
    }
}

/// Running daemon
struct Daemon {
    handle: LifecycleHandle,
    manager: JoinHandle<()>,
    watchdog: ScheduledTask,
    /// Monitors and forwarders, aborted on shutdown
    tasks: Vec<JoinHandle<()>>,
    _dbus: Option<dbus::DbusServer>,
}

impl Daemon {
    async fn start(config: Config) -> Result<Self> {
        let mut tasks = Vec::new();

        let login: Arc<dyn LoginClient> = if config.is_server_configured() {
            Arc::new(
                HttpLoginClient::new(&config.login_settings())
                    .context("Failed to create login client")?,
            )
        } else {
            warn!("No WebCall server configured; connect requests will fail until one is set");
            Arc::new(UnconfiguredLogin)
        };

        // Wake resources and monitors live on the system bus
        let system_bus = zbus::Connection::system().await;
        let (sleep_lock, network_hold): (Arc<dyn WakeResource>, Arc<dyn WakeResource>) =
            match &system_bus {
                Ok(_) => (
                    Arc::new(LogindInhibitor::sleep()),
                    Arc::new(LogindInhibitor::idle()),
                ),
                Err(e) => {
                    warn!("System bus unavailable, running without inhibitors: {}", e);
                    (Arc::new(NoopWakeResource), Arc::new(NoopWakeResource))
                }
            };

        let network_source = match NetworkManagerSource::connect().await {
            Ok(source) => Some(source),
            Err(e) => {
                warn!("NetworkManager unavailable, assuming a network is present: {}", e);
                None
            }
        };
        let initial_network = match &network_source {
            Some(source) => source.current().await.unwrap_or_else(|e| {
                warn!("Failed to read network state: {}", e);
                NetworkState::Other
            }),
            None => NetworkState::Other,
        };
        info!("Initial network: {}", initial_network);

        // Session bus for control and signals
        let dbus_server = match dbus::DbusServer::connect().await {
            Ok(server) => Some(server),
            Err(e) => {
                warn!("Session bus unavailable, running without DBus control: {}", e);
                None
            }
        };

        let mut status = FanoutStatusSink::new().with(Arc::new(TracingStatusSink));
        let inbound: Arc<dyn InboundSink> = match &dbus_server {
            Some(server) => {
                let (sink, task) = dbus::DbusSignalSink::spawn(server.connection().clone());
                tasks.push(task);
                let sink = Arc::new(sink);
                status = status.with(sink.clone() as Arc<dyn StatusSink>);
                sink
            }
            None => Arc::new(TracingStatusSink),
        };

        let collaborators = Collaborators {
            login,
            connector: Arc::new(config.socket_connector()?),
            status: Arc::new(status),
            inbound,
            store: Arc::new(JsonStateStore::new(&config.paths.data_dir)),
            sleep_lock,
            network_hold,
        };

        let lifecycle = config.lifecycle();
        let watchdog = AlarmWatchdog::from_config(&lifecycle);
        let (handle, manager) = LifecycleManager::start(lifecycle, collaborators, initial_network);

        if let Some(source) = &network_source {
            let (tx, rx) = mpsc::channel(16);
            tasks.push(source.spawn_signals(tx.clone()).await);
            if let Some(period) = config.network_poll_period() {
                info!("Polling network state every {:?}", period);
                tasks.push(source.spawn_poll(period, tx));
            }
            tasks.push(NetworkMonitor::new(initial_network).spawn(rx, handle.clone()));
        }

        let (watchdog, watchdog_task) = watchdog.spawn(handle.clone());

        if system_bus.is_ok() {
            let (tx, rx) = mpsc::channel(16);
            match spawn_power_signals(tx).await {
                Ok(task) => {
                    tasks.push(task);
                    tasks.push(PowerSuspendMonitor::new().spawn(
                        rx,
                        handle.clone(),
                        Some(watchdog),
                    ));
                }
                Err(e) => warn!("Power signals unavailable: {}", e),
            }
        }

        if let Some(server) = &dbus_server {
            server
                .serve(handle.clone())
                .await
                .context("Failed to start DBus server")?;
        }

        Ok(Self {
            handle,
            manager,
            watchdog: watchdog_task,
            tasks,
            _dbus: dbus_server,
        })
    }

    /// Stop the manager, keeping the persisted connect intent
    async fn shutdown(self) -> Result<()> {
        if let Err(e) = self.handle.shutdown().await {
            warn!("Lifecycle manager already stopped: {}", e);
        }
        if let Err(e) = self.manager.await {
            error!("Lifecycle manager task failed: {}", e);
        }
        self.watchdog.cancel();
        for task in self.tasks {
            task.abort();
        }
        info!("WebCall daemon stopped");
        Ok(())
    }
}

/// Handle diagnostic commands
async fn handle_diagnostic_command(command: &DiagnosticCommand) -> Result<()> {
    match command {
        DiagnosticCommand::Version { verbose } => {
            BuildInfo::get().display(*verbose);
            Ok(())
        }
        DiagnosticCommand::DumpConfig => {
            let config = Config::load().context("Failed to load configuration")?;

            println!("\n=== Daemon Configuration ===");
            println!("\n[Server]");
            println!("Domain: {}", config.server.domain);
            println!("Username: {}", config.server.username);
            println!("Insecure TLS: {}", config.server.insecure_tls);

            println!("\n[Lifecycle]");
            println!("Backoff step: {} seconds", config.lifecycle.backoff_step_secs);
            println!("Backoff cap: {} seconds", config.lifecycle.max_backoff_secs);
            println!("Max attempts: {}", config.lifecycle.max_attempts);
            println!("Heartbeat staleness: {} seconds", config.lifecycle.staleness_secs);
            println!("Keep-awake hold: {} seconds", config.lifecycle.keep_awake_secs);
            println!("Boot delay: {} seconds", config.lifecycle.boot_delay_secs);
            println!("Watchdog: {} minutes", config.lifecycle.watchdog_minutes);

            println!("\n[Policy]");
            println!("Wifi lock: {}", config.policy.wifi_lock);
            println!("Beep on give up: {}", config.policy.beep_on_give_up);
            println!("Network poll: {} seconds", config.policy.network_poll_secs);

            println!("\n[Paths]");
            println!("Config: {}", config.paths.config_dir.display());
            println!("Data: {}", config.paths.data_dir.display());
            Ok(())
        }
        DiagnosticCommand::Status => {
            let proxy = dbus::client().await?;
            let json = proxy
                .snapshot()
                .await
                .context("Failed to query daemon (is it running?)")?;
            let snapshot: webcall_lifecycle::Snapshot =
                serde_json::from_str(&json).context("Failed to decode snapshot")?;

            println!("\n=== Connection ===");
            println!("Status: {:?}", snapshot.connection_status());
            println!("State: {}", snapshot.state);
            println!("Wanted: {}", snapshot.desired);
            println!("Network: {}", snapshot.network);
            println!("Failed attempts: {}", snapshot.attempts);
            if let Some(retry) = snapshot.pending_retry {
                println!("Next attempt in: {}", format_millis(retry.as_millis() as u64));
            }
            println!(
                "Keep-awake today: {}{}",
                format_millis(snapshot.keep_awake_ms_today),
                if snapshot.keep_awake_held { " (held)" } else { "" }
            );
            Ok(())
        }
        DiagnosticCommand::Online => {
            let proxy = dbus::client().await?;
            proxy.go_online().await.context("Failed to go online")?;
            println!("Connect requested");
            Ok(())
        }
        DiagnosticCommand::Offline => {
            let proxy = dbus::client().await?;
            proxy.go_offline().await.context("Failed to go offline")?;
            println!("Disconnect requested");
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(command) = &cli.command {
        return handle_diagnostic_command(command).await;
    }

    init_logging(&cli).context("Failed to initialize logging")?;

    info!("Starting WebCall daemon v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::load().context("Failed to load configuration")?;
    config
        .ensure_directories()
        .context("Failed to create daemon directories")?;

    let daemon = Daemon::start(config)
        .await
        .context("Failed to start daemon")?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown requested");

    daemon.shutdown().await
}
