//! Login Exchange
//!
//! An HTTPS GET against the deployment's login endpoint returns the address
//! of the signaling socket to open. The first line of the body is
//! pipe-delimited; its first token is either the address or one of the
//! reserved rejection tokens.
//!
//! ```text
//! GET https://{domain}/rtcsig/login?id={username}&ver={version}
//!
//! wss://{domain}/rtcsig/ws?wsid=1234|1700000000|ok
//! ```

use crate::{LifecycleError, Result};
use async_trait::async_trait;
use reqwest::header::{CONNECTION, COOKIE, SET_COOKIE};
use reqwest::{StatusCode, Url};
use std::error::Error as StdError;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Login response tokens that end reconnecting
pub const TERMINAL_TOKENS: [&str; 5] = ["fatal", "error", "busy", "noservice", "notregistered"];

/// Minimum number of `|` separated tokens in a usable response
const MIN_RESPONSE_TOKENS: usize = 3;

/// Successful login exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginReply {
    /// Address of the signaling socket, ready to open
    pub address: String,
    /// Cookie header value to persist, if the server set any
    pub cookies: Option<String>,
}

/// Performs the login exchange
#[async_trait]
pub trait LoginClient: Send + Sync {
    /// Log in, sending `cookies` if known
    async fn login(&self, cookies: Option<&str>) -> Result<LoginReply>;
}

/// Settings for [`HttpLoginClient`]
#[derive(Debug, Clone)]
pub struct LoginSettings {
    /// Server host name, optionally with port
    pub domain: String,
    /// Stable client identity
    pub username: String,
    /// Version tag sent as `ver`
    pub version: String,
    /// Accept any server certificate
    pub insecure_tls: bool,
    /// TCP/TLS connect timeout
    pub connect_timeout: Duration,
    /// Timeout for the whole request
    pub timeout: Duration,
}

impl LoginSettings {
    pub fn new(domain: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            username: username.into(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            insecure_tls: false,
            connect_timeout: Duration::from_secs(22),
            timeout: Duration::from_secs(32),
        }
    }

    /// Full login URL
    pub fn login_url(&self) -> Result<Url> {
        if self.domain.trim().is_empty() {
            return Err(LifecycleError::Configuration("server domain not set".into()));
        }
        if self.username.trim().is_empty() {
            return Err(LifecycleError::Configuration("username not set".into()));
        }

        Url::parse_with_params(
            &format!("https://{}/rtcsig/login", self.domain.trim()),
            &[("id", self.username.trim()), ("ver", self.version.as_str())],
        )
        .map_err(|e| LifecycleError::Configuration(format!("invalid server domain: {}", e)))
    }
}

/// Login client over `reqwest`
pub struct HttpLoginClient {
    client: reqwest::Client,
    url: Url,
}

impl HttpLoginClient {
    pub fn new(settings: &LoginSettings) -> Result<Self> {
        let url = settings.login_url()?;

        if settings.insecure_tls {
            warn!("TLS certificate verification disabled for {}", settings.domain);
        }

        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.timeout)
            .danger_accept_invalid_certs(settings.insecure_tls)
            .build()
            .map_err(|e| LifecycleError::Configuration(format!("HTTP client: {}", e)))?;

        Ok(Self { client, url })
    }
}

#[async_trait]
impl LoginClient for HttpLoginClient {
    async fn login(&self, cookies: Option<&str>) -> Result<LoginReply> {
        info!("Login request to {}", self.url.host_str().unwrap_or("server"));

        let mut request = self.client.get(self.url.clone()).header(CONNECTION, "close");
        if let Some(cookies) = cookies.filter(|c| !c.is_empty()) {
            request = request.header(COOKIE, cookies);
        }

        let response = request.send().await.map_err(classify_http_error)?;

        let status = response.status();
        if status != StatusCode::OK {
            warn!("Login answered with status {}", status);
            return Err(LifecycleError::LoginStatus(status.as_u16()));
        }

        let cookies = collect_cookies(response.headers().get_all(SET_COOKIE).iter());
        let body = response.text().await.map_err(classify_http_error)?;
        let address = parse_login_response(&body)?;

        debug!("Login accepted");
        Ok(LoginReply {
            address: session_address(&address),
            cookies,
        })
    }
}

/// Extract the socket address from a login response body
///
/// # Examples
///
/// ```rust
/// use webcall_lifecycle::login::parse_login_response;
/// use webcall_lifecycle::LifecycleError;
///
/// let address = parse_login_response("wss://example.org/ws?id=1|17|ok\n").unwrap();
/// assert_eq!(address, "wss://example.org/ws?id=1");
///
/// let err = parse_login_response("notregistered|||").unwrap_err();
/// assert!(matches!(err, LifecycleError::LoginRejected(_)));
/// ```
pub fn parse_login_response(body: &str) -> Result<String> {
    let line = body.lines().next().unwrap_or("").trim();
    let tokens: Vec<&str> = line.split('|').collect();
    let first = tokens.first().copied().unwrap_or("").trim();

    if TERMINAL_TOKENS.contains(&first) {
        return Err(LifecycleError::LoginRejected(first.to_string()));
    }

    if tokens.len() < MIN_RESPONSE_TOKENS || first.is_empty() {
        return Err(LifecycleError::MalformedLoginResponse(line.to_string()));
    }

    Ok(first.to_string())
}

/// Address to open for an automatic (non-interactive) session
pub fn session_address(address: &str) -> String {
    let separator = if address.contains('?') { '&' } else { '?' };
    format!("{}{}auto=true", address, separator)
}

/// Join the `name=value` parts of `Set-Cookie` headers into one `Cookie` value
fn collect_cookies<'a>(
    headers: impl Iterator<Item = &'a reqwest::header::HeaderValue>,
) -> Option<String> {
    let pairs: Vec<String> = headers
        .filter_map(|value| value.to_str().ok())
        .filter_map(|value| value.split(';').next())
        .map(|pair| pair.trim().to_string())
        .filter(|pair| pair.contains('='))
        .collect();

    if pairs.is_empty() {
        None
    } else {
        Some(pairs.join("; "))
    }
}

/// Whether an error chain reports a certificate validation failure
pub(crate) fn is_trust_failure(error: &(dyn StdError + 'static)) -> bool {
    let mut current: Option<&(dyn StdError + 'static)> = Some(error);
    while let Some(err) = current {
        let text = err.to_string().to_lowercase();
        if text.contains("trust anchor")
            || text.contains("unknownissuer")
            || text.contains("unknown issuer")
            || text.contains("invalid peer certificate")
            || text.contains("certificate verify failed")
        {
            return true;
        }
        current = err.source();
    }
    false
}

fn classify_http_error(error: reqwest::Error) -> LifecycleError {
    if is_trust_failure(&error) {
        return LifecycleError::TrustFailure(error.to_string());
    }
    if error.is_timeout() {
        return LifecycleError::Timeout(format!("login: {}", error));
    }
    if error.is_connect() {
        return LifecycleError::ConnectionRefused(format!("login: {}", error));
    }
    LifecycleError::NetworkError(format!("login: {}", error))
}
