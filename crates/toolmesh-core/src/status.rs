use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Lifecycle state of one server connection.
///
/// `Disconnected` is only ever reported transiently; an explicit disconnect
/// removes the entry altogether.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerState {
    /// A connect attempt is in flight.
    Connecting,
    /// Transport is live and the last probe (if any) succeeded.
    Connected,
    /// Last connect cycle or probe failed.
    Error,
    /// Torn down by the caller.
    Disconnected,
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
            Self::Disconnected => "disconnected",
        };
        f.write_str(s)
    }
}

/// Status record for one server, as exposed to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    /// Server name.
    pub name: String,
    /// Current lifecycle state.
    pub status: ServerState,
    /// Time of the last successful connect or probe.
    pub last_ping: Option<DateTime<Utc>>,
    /// Round-trip time of the last successful probe.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    /// Message of the most recent failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Failed connect attempts since the last successful connect.
    pub retry_attempts: u32,
    /// Regenerated on every successful connect.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<Uuid>,
}

impl ConnectionStatus {
    /// A fresh entry for a server whose first connect attempt is starting.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: ServerState::Connecting,
            last_ping: None,
            latency_ms: None,
            last_error: None,
            retry_attempts: 0,
            connection_id: None,
        }
    }

    /// Whether the router may send calls to this server.
    pub fn is_connected(&self) -> bool {
        self.status == ServerState::Connected
    }

    /// Record a successful connect.
    pub fn mark_connected(&mut self) {
        self.status = ServerState::Connected;
        self.last_ping = Some(Utc::now());
        self.last_error = None;
        self.retry_attempts = 0;
        self.connection_id = Some(Uuid::new_v4());
    }

    /// Record a successful liveness probe.
    pub fn mark_alive(&mut self, latency_ms: u64) {
        self.status = ServerState::Connected;
        self.last_ping = Some(Utc::now());
        self.latency_ms = Some(latency_ms);
        self.last_error = None;
    }

    /// Record a failure.
    pub fn mark_error(&mut self, message: impl Into<String>) {
        self.status = ServerState::Error;
        self.last_error = Some(message.into());
    }
}
