//! Diagnostics and Debug Logging
//!
//! Logging setup and the diagnostic subcommands of the WebCall daemon.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::{fmt, EnvFilter};

/// WebCall daemon command-line interface
#[derive(Parser, Debug)]
#[command(name = "webcall-daemon")]
#[command(about = "Keeps the WebCall signaling connection alive", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Set log level (error, warn, info, debug, trace)
    #[arg(short, long, value_name = "LEVEL", default_value = "info")]
    pub log_level: String,

    /// Enable JSON structured logging
    #[arg(long)]
    pub json_logs: bool,

    /// Show timestamps in logs
    #[arg(long, default_value = "true")]
    pub timestamps: bool,

    /// Diagnostic subcommand
    #[command(subcommand)]
    pub command: Option<DiagnosticCommand>,
}

/// Diagnostic and control commands
#[derive(Subcommand, Debug)]
pub enum DiagnosticCommand {
    /// Show daemon version and build information
    Version {
        /// Show detailed build information
        #[arg(long)]
        verbose: bool,
    },

    /// Show current configuration
    DumpConfig,

    /// Ask the running daemon for its connection state
    Status,

    /// Ask the running daemon to connect
    Online,

    /// Ask the running daemon to disconnect
    Offline,
}

/// Initialize logging based on CLI configuration
pub fn init_logging(cli: &Cli) -> Result<()> {
    let log_level = cli.log_level.parse::<Level>().with_context(|| {
        format!(
            "Invalid log level '{}'. Valid levels: error, warn, info, debug, trace",
            cli.log_level
        )
    })?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level.as_str()))
        .context("Failed to create log filter")?;

    let subscriber = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(true)
        .with_line_number(true);

    match (cli.json_logs, cli.timestamps) {
        (true, true) => subscriber.json().init(),
        (true, false) => subscriber.without_time().json().init(),
        (false, true) => subscriber.init(),
        (false, false) => subscriber.without_time().init(),
    }

    info!(
        "Logging initialized: level={}, json={}, timestamps={}",
        log_level, cli.json_logs, cli.timestamps
    );

    Ok(())
}

/// Build information
pub struct BuildInfo {
    pub version: &'static str,
    pub git_hash: Option<&'static str>,
    pub build_timestamp: &'static str,
    pub rustc_version: &'static str,
}

impl BuildInfo {
    /// Get build information
    pub fn get() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION"),
            git_hash: option_env!("GIT_HASH"),
            build_timestamp: env!("BUILD_TIMESTAMP"),
            rustc_version: env!("RUSTC_VERSION"),
        }
    }

    /// Display build information
    pub fn display(&self, verbose: bool) {
        println!("WebCall Daemon v{}", self.version);

        if verbose {
            if let Some(hash) = self.git_hash {
                println!("Git commit: {}", hash);
            }
            println!("Build time: {}", self.build_timestamp);
            println!("Rust compiler: {}", self.rustc_version);
            println!("Platform: {}", std::env::consts::OS);
            println!("Architecture: {}", std::env::consts::ARCH);
        }
    }
}

/// Format a millisecond total as `1h 02m 03s`
pub fn format_millis(ms: u64) -> String {
    let secs = ms / 1000;
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{}h {:02}m {:02}s", h, m, s)
    } else if m > 0 {
        format!("{}m {:02}s", m, s)
    } else {
        format!("{}s", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_millis() {
        assert_eq!(format_millis(0), "0s");
        assert_eq!(format_millis(59_999), "59s");
        assert_eq!(format_millis(61_000), "1m 01s");
        assert_eq!(format_millis(3_723_000), "1h 02m 03s");
    }

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["webcall-daemon"]);
        assert_eq!(cli.log_level, "info");
        assert!(cli.timestamps);
        assert!(!cli.json_logs);
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_cli_subcommands() {
        let cli = Cli::parse_from(["webcall-daemon", "version", "--verbose"]);
        assert!(matches!(
            cli.command,
            Some(DiagnosticCommand::Version { verbose: true })
        ));

        let cli = Cli::parse_from(["webcall-daemon", "dump-config"]);
        assert!(matches!(cli.command, Some(DiagnosticCommand::DumpConfig)));
    }
}
