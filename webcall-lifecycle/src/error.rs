//! Error handling for the WebCall connection lifecycle
//!
//! Every failure the lifecycle manager can observe is a [`LifecycleError`].
//! The manager never hands these back to whoever asked it to connect; it
//! classifies them and turns them into state transitions and status events.
//!
//! ## Error Categories
//!
//! ### Transient transport
//! Timeouts, refused connections, DNS failures, non-200 login replies and
//! abnormal socket breaks. Always retried with backoff.
//!
//! ### Terminal server
//! Reserved rejection tokens returned by the login exchange
//! (`fatal`, `error`, `busy`, `noservice`, `notregistered`). Never retried.
//!
//! ### Terminal trust
//! Certificate-chain validation failures. Never retried.
//!
//! ### Resource exhaustion
//! The attempt budget ran out after backing off the whole way.
//!
//! ## Example
//!
//! ```rust
//! use webcall_lifecycle::LifecycleError;
//!
//! let error = LifecycleError::LoginRejected("notregistered".to_string());
//! assert!(error.is_terminal());
//! assert!(!error.is_recoverable());
//!
//! let error = LifecycleError::LoginStatus(502);
//! assert!(error.is_recoverable());
//! ```

use thiserror::Error;

/// Result type for lifecycle operations
pub type Result<T> = std::result::Result<T, LifecycleError>;

/// Errors that can occur while keeping the signaling session alive
#[derive(Error, Debug)]
pub enum LifecycleError {
    /// I/O error (file system, sockets)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// DBus error while talking to a platform service
    #[error("DBus error: {0}")]
    Dbus(#[from] zbus::Error),

    /// Operation timed out
    #[error("Connection timeout: {0}")]
    Timeout(String),

    /// Remote refused the connection
    #[error("Connection refused: {0}")]
    ConnectionRefused(String),

    /// No route to the server
    #[error("Network unreachable: {0}")]
    NetworkUnreachable(String),

    /// Generic transport failure (reset, DNS, broken pipe)
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Login endpoint answered with a non-200 status
    #[error("Login failed with HTTP status {0}")]
    LoginStatus(u16),

    /// Login endpoint answered with a reserved rejection token
    #[error("Login rejected by server: {0}")]
    LoginRejected(String),

    /// Login response could not be interpreted as an address
    #[error("Malformed login response: {0}")]
    MalformedLoginResponse(String),

    /// Server certificate chain could not be validated
    #[error("Certificate trust failure: {0}")]
    TrustFailure(String),

    /// The consumer of inbound signaling messages is not available
    #[error("Signaling runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    /// The retry budget has been used up
    #[error("Gave up after {0} attempts")]
    RetriesExhausted(u32),

    /// Signaling socket failed to open or broke
    #[error("Session error: {0}")]
    Session(String),

    /// `send` was called while no session is live
    #[error("No live signaling session")]
    NoSession,

    /// Invalid or incomplete configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The lifecycle manager task is gone
    #[error("Lifecycle manager is not running")]
    ManagerClosed,
}

impl LifecycleError {
    /// Convert a generic I/O error into a more specific network error
    ///
    /// # Examples
    ///
    /// ```rust
    /// use webcall_lifecycle::LifecycleError;
    /// use std::io::{Error, ErrorKind};
    ///
    /// let io_error = Error::new(ErrorKind::TimedOut, "read timed out");
    /// let error = LifecycleError::from_io_error(io_error, "login exchange");
    ///
    /// assert!(matches!(error, LifecycleError::Timeout(_)));
    /// ```
    pub fn from_io_error(error: std::io::Error, context: &str) -> Self {
        use std::io::ErrorKind;

        match error.kind() {
            ErrorKind::TimedOut => LifecycleError::Timeout(format!("{}: {}", context, error)),
            ErrorKind::ConnectionRefused => {
                LifecycleError::ConnectionRefused(format!("{}: {}", context, error))
            }
            ErrorKind::NetworkUnreachable | ErrorKind::HostUnreachable => {
                LifecycleError::NetworkUnreachable(format!("{}: {}", context, error))
            }
            ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::BrokenPipe => {
                LifecycleError::NetworkError(format!(
                    "{}: connection interrupted ({})",
                    context, error
                ))
            }
            _ => LifecycleError::Io(error),
        }
    }

    /// Check if this error is transient and the attempt may be retried
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            LifecycleError::Timeout(_)
                | LifecycleError::ConnectionRefused(_)
                | LifecycleError::NetworkUnreachable(_)
                | LifecycleError::NetworkError(_)
                | LifecycleError::LoginStatus(_)
                | LifecycleError::Session(_)
                | LifecycleError::Io(_)
        )
    }

    /// Check if this error must end reconnecting immediately
    ///
    /// Terminal errors bypass backoff: the manager gives up and clears the
    /// desired connect intent.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use webcall_lifecycle::LifecycleError;
    ///
    /// let error = LifecycleError::TrustFailure("unknown issuer".to_string());
    /// assert!(error.is_terminal());
    ///
    /// let error = LifecycleError::Timeout("login".to_string());
    /// assert!(!error.is_terminal());
    /// ```
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LifecycleError::LoginRejected(_)
                | LifecycleError::MalformedLoginResponse(_)
                | LifecycleError::TrustFailure(_)
                | LifecycleError::RuntimeUnavailable(_)
                | LifecycleError::RetriesExhausted(_)
        )
    }

    /// Get a short message suitable for a status line
    ///
    /// # Examples
    ///
    /// ```rust
    /// use webcall_lifecycle::LifecycleError;
    ///
    /// let error = LifecycleError::LoginRejected("busy".to_string());
    /// assert_eq!(error.user_message(), "Server rejected login (busy).");
    /// ```
    pub fn user_message(&self) -> String {
        match self {
            LifecycleError::LoginRejected(token) => {
                format!("Server rejected login ({}).", token)
            }
            LifecycleError::MalformedLoginResponse(_) => {
                "Unexpected answer from server.".to_string()
            }
            LifecycleError::TrustFailure(_) => {
                "Server certificate not trusted. Check the server domain.".to_string()
            }
            LifecycleError::RuntimeUnavailable(msg) => {
                format!("Call handling unavailable: {}.", msg)
            }
            LifecycleError::RetriesExhausted(n) => {
                format!("No connection after {} attempts.", n)
            }
            LifecycleError::LoginStatus(code) => {
                format!("Server answered with status {}.", code)
            }
            LifecycleError::Timeout(_) => "Connection timeout. Check network connection.".to_string(),
            LifecycleError::ConnectionRefused(_) => "Connection refused by server.".to_string(),
            LifecycleError::NetworkUnreachable(_) => "Network unreachable.".to_string(),
            LifecycleError::NetworkError(msg) => format!("Network error: {}.", msg),
            LifecycleError::Session(msg) => format!("Connection error: {}.", msg),
            LifecycleError::NoSession => "Not connected.".to_string(),
            LifecycleError::Configuration(msg) => {
                format!("Configuration error: {}. Check your settings.", msg)
            }
            LifecycleError::ManagerClosed => "Service is shutting down.".to_string(),
            LifecycleError::Io(e) => format!("I/O error: {}.", e),
            LifecycleError::Json(e) => format!("Data format error: {}.", e),
            LifecycleError::Dbus(e) => format!("System bus error: {}.", e),
        }
    }
}
