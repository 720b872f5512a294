//! Server configuration types.
//!
//! A [`ServerConfig`] is created by the caller before any connection attempt
//! and never mutated afterwards. The transport is a tagged enum so every
//! variant only carries the fields it needs.

use crate::error::{ToolmeshError, ToolmeshResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Default connect timeout per attempt.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
/// Default number of connect attempts per `connect_single` cycle.
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Priority given to configs that don't set one; sorts last.
pub const DEFAULT_PRIORITY: u32 = 999;
/// Upper bound for socket reconnect backoff.
pub const MAX_RECONNECT_DELAY_MS: u64 = 30_000;

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}
fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}
fn default_priority() -> u32 {
    DEFAULT_PRIORITY
}
fn default_true() -> bool {
    true
}
fn default_reconnect_attempts() -> u32 {
    5
}
fn default_reconnect_base_delay_ms() -> u64 {
    1_000
}

/// Immutable description of one server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Unique key for this server.
    pub name: String,
    /// Transport variant and its address.
    #[serde(flatten)]
    pub transport: TransportConfig,
    /// Deadline for a single connect attempt, in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Number of connect attempts before giving up.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Lower connects first.
    #[serde(default = "default_priority")]
    pub priority: u32,
}

/// Transport-specific part of a [`ServerConfig`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TransportConfig {
    /// Local subprocess over stdin/stdout.
    Process(ProcessConfig),
    /// One POST per request.
    Http(EndpointConfig),
    /// Persistent WebSocket connection.
    Socket(SocketConfig),
    /// Receive-only server-sent event feed.
    Stream(EndpointConfig),
}

/// Subprocess launch parameters.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProcessConfig {
    /// Executable to spawn.
    pub command: String,
    /// Arguments passed to the executable.
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment variables.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Working directory for the child.
    #[serde(default)]
    pub cwd: Option<PathBuf>,
}

/// Address and request decoration for URL-based transports.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Endpoint URL.
    pub url: String,
    /// Extra headers attached to every request.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Already-resolved credentials.
    #[serde(default)]
    pub auth: Option<AuthConfig>,
}

/// WebSocket endpoint plus its reconnect policy.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SocketConfig {
    /// Endpoint URL (`ws://` or `wss://`).
    pub url: String,
    /// Extra headers sent with the handshake.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Already-resolved credentials.
    #[serde(default)]
    pub auth: Option<AuthConfig>,
    /// What to do after an unsolicited close.
    #[serde(default)]
    pub reconnect: Option<ReconnectPolicy>,
}

/// Credential attached to outgoing requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthConfig {
    /// How the value is presented.
    pub kind: AuthKind,
    /// Token, key, or `user:password` pair.
    pub value: String,
}

/// Credential presentation scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthKind {
    /// `Authorization: Bearer <value>`.
    Bearer,
    /// `X-API-Key: <value>`.
    ApiKey,
    /// `Authorization: Basic base64(<value>)`.
    Basic,
}

/// Socket reconnect policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    /// Whether to reconnect after an unsolicited close.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Reconnect attempts before giving up.
    #[serde(default = "default_reconnect_attempts")]
    pub max_attempts: u32,
    /// First backoff delay, doubled per attempt.
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub base_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: default_reconnect_attempts(),
            base_delay_ms: default_reconnect_base_delay_ms(),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt number `attempt` (zero-based):
    /// `min(base_delay * 2^attempt, 30s)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let ms = self
            .base_delay_ms
            .saturating_mul(2u64.saturating_pow(attempt))
            .min(MAX_RECONNECT_DELAY_MS);
        Duration::from_millis(ms)
    }
}

/// Discriminant of [`TransportConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Subprocess pipe.
    Process,
    /// Request/response HTTP.
    Http,
    /// Duplex WebSocket.
    Socket,
    /// One-way event stream.
    Stream,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Process => "process",
            Self::Http => "http",
            Self::Socket => "socket",
            Self::Stream => "stream",
        };
        f.write_str(s)
    }
}

impl TransportConfig {
    /// Which transport this config selects.
    pub fn kind(&self) -> TransportKind {
        match self {
            Self::Process(_) => TransportKind::Process,
            Self::Http(_) => TransportKind::Http,
            Self::Socket(_) => TransportKind::Socket,
            Self::Stream(_) => TransportKind::Stream,
        }
    }
}

impl ServerConfig {
    fn with_transport(name: impl Into<String>, transport: TransportConfig) -> Self {
        Self {
            name: name.into(),
            transport,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_retries: DEFAULT_MAX_RETRIES,
            priority: DEFAULT_PRIORITY,
        }
    }

    /// A subprocess server.
    pub fn process(name: impl Into<String>, command: impl Into<String>, args: Vec<String>) -> Self {
        Self::with_transport(
            name,
            TransportConfig::Process(ProcessConfig {
                command: command.into(),
                args,
                ..ProcessConfig::default()
            }),
        )
    }

    /// An HTTP server.
    pub fn http(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self::with_transport(
            name,
            TransportConfig::Http(EndpointConfig {
                url: url.into(),
                ..EndpointConfig::default()
            }),
        )
    }

    /// A WebSocket server without automatic reconnect.
    pub fn socket(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self::with_transport(
            name,
            TransportConfig::Socket(SocketConfig {
                url: url.into(),
                ..SocketConfig::default()
            }),
        )
    }

    /// A server-sent event feed.
    pub fn stream(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self::with_transport(
            name,
            TransportConfig::Stream(EndpointConfig {
                url: url.into(),
                ..EndpointConfig::default()
            }),
        )
    }

    /// Set the connect priority.
    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    /// Set the per-attempt connect timeout.
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Set the number of connect attempts.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Attach credentials. Ignored for process servers.
    pub fn with_auth(mut self, kind: AuthKind, value: impl Into<String>) -> Self {
        let auth = Some(AuthConfig {
            kind,
            value: value.into(),
        });
        match &mut self.transport {
            TransportConfig::Http(ep) | TransportConfig::Stream(ep) => ep.auth = auth,
            TransportConfig::Socket(sock) => sock.auth = auth,
            TransportConfig::Process(_) => {}
        }
        self
    }

    /// Add a request header. Ignored for process servers.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        match &mut self.transport {
            TransportConfig::Http(ep) | TransportConfig::Stream(ep) => {
                ep.headers.insert(key.into(), value.into());
            }
            TransportConfig::Socket(sock) => {
                sock.headers.insert(key.into(), value.into());
            }
            TransportConfig::Process(_) => {}
        }
        self
    }

    /// Set the socket reconnect policy. Ignored for other transports.
    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        if let TransportConfig::Socket(sock) = &mut self.transport {
            sock.reconnect = Some(policy);
        }
        self
    }

    /// Which transport this server uses.
    pub fn kind(&self) -> TransportKind {
        self.transport.kind()
    }

    /// Connect timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Check that every field the transport needs is present and well-formed.
    pub fn validate(&self) -> ToolmeshResult<()> {
        if self.name.trim().is_empty() {
            return Err(ToolmeshError::Config("server name must not be empty".into()));
        }

        match &self.transport {
            TransportConfig::Process(p) => {
                if p.command.trim().is_empty() {
                    return Err(ToolmeshError::Config(format!(
                        "server '{}': process transport requires a command",
                        self.name
                    )));
                }
                Ok(())
            }
            TransportConfig::Http(ep) | TransportConfig::Stream(ep) => {
                check_url(&self.name, &ep.url, &["http", "https"])
            }
            TransportConfig::Socket(sock) => check_url(&self.name, &sock.url, &["ws", "wss"]),
        }
    }
}

fn check_url(server: &str, url: &str, schemes: &[&str]) -> ToolmeshResult<()> {
    if url.trim().is_empty() {
        return Err(ToolmeshError::Config(format!(
            "server '{server}': transport requires a url"
        )));
    }

    let scheme = url.split_once("://").map(|(scheme, _)| scheme.to_ascii_lowercase());
    match scheme {
        Some(s) if schemes.contains(&s.as_str()) => Ok(()),
        _ => Err(ToolmeshError::Config(format!(
            "server '{server}': url '{url}' must use one of: {}",
            schemes.join(", ")
        ))),
    }
}
