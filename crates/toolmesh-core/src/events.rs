//! Status events and the bounded queue that carries them.
//!
//! Producers (transports, the supervisor, the router) never block on the
//! sink: a full queue drops the event and logs a warning.

use std::fmt;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Lifecycle event raised by a single transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The transport became usable.
    Connected,
    /// An unsolicited inbound message.
    Message(serde_json::Value),
    /// A non-fatal error on the channel.
    Error(String),
    /// The channel went away, with an optional reason.
    Disconnected(Option<String>),
}

/// Human-readable status event for the notification sink.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// A connect attempt has started.
    Connecting {
        /// Server name.
        server: String,
        /// One-based attempt number.
        attempt: u32,
    },
    /// The server is connected.
    Connected {
        /// Server name.
        server: String,
        /// Identifier of this connection.
        connection_id: Uuid,
    },
    /// A connect attempt failed and another one is scheduled.
    Retrying {
        /// Server name.
        server: String,
        /// Attempt that just failed (one-based).
        attempt: u32,
        /// Sleep before the next attempt.
        delay_ms: u64,
        /// Failure message.
        error: String,
    },
    /// All connect attempts failed.
    ConnectFailed {
        /// Server name.
        server: String,
        /// Attempts made.
        attempts: u32,
        /// Last failure message.
        error: String,
    },
    /// A liveness probe failed.
    HealthCheckFailed {
        /// Server name.
        server: String,
        /// Failure message.
        error: String,
    },
    /// The server was explicitly disconnected.
    Disconnected {
        /// Server name.
        server: String,
    },
    /// A tool call moved to another server.
    Failover {
        /// Tool being called.
        tool: String,
        /// Server that failed.
        from: String,
        /// Server that takes over.
        to: String,
    },
    /// Forwarded transport lifecycle event.
    Transport {
        /// Server name.
        server: String,
        /// The transport's event.
        event: TransportEvent,
    },
}

impl ConnectionEvent {
    /// The server this event is about (the failing one for failovers).
    pub fn server(&self) -> &str {
        match self {
            Self::Connecting { server, .. }
            | Self::Connected { server, .. }
            | Self::Retrying { server, .. }
            | Self::ConnectFailed { server, .. }
            | Self::HealthCheckFailed { server, .. }
            | Self::Disconnected { server }
            | Self::Transport { server, .. } => server,
            Self::Failover { from, .. } => from,
        }
    }
}

impl fmt::Display for ConnectionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting { server, attempt } => {
                write!(f, "connecting to '{server}' (attempt {attempt})")
            }
            Self::Connected { server, .. } => write!(f, "connection established: '{server}'"),
            Self::Retrying {
                server,
                attempt,
                delay_ms,
                error,
            } => write!(
                f,
                "attempt {attempt} for '{server}' failed ({error}), retrying in {delay_ms}ms"
            ),
            Self::ConnectFailed {
                server,
                attempts,
                error,
            } => write!(f, "connection error: '{server}' after {attempts} attempts: {error}"),
            Self::HealthCheckFailed { server, error } => {
                write!(f, "health check failed for '{server}': {error}")
            }
            Self::Disconnected { server } => write!(f, "disconnected: '{server}'"),
            Self::Failover { tool, from, to } => {
                write!(f, "tool '{tool}' failed on '{from}', failing over to '{to}'")
            }
            Self::Transport { server, event } => match event {
                TransportEvent::Connected => write!(f, "transport '{server}' connected"),
                TransportEvent::Message(_) => write!(f, "transport '{server}' received a message"),
                TransportEvent::Error(e) => write!(f, "transport '{server}' error: {e}"),
                TransportEvent::Disconnected(Some(reason)) => {
                    write!(f, "transport '{server}' disconnected: {reason}")
                }
                TransportEvent::Disconnected(None) => {
                    write!(f, "transport '{server}' disconnected")
                }
            },
        }
    }
}

/// Sending half of the bounded status-event queue.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::Sender<ConnectionEvent>>,
}

impl EventSink {
    /// Create a sink and the receiver the notification consumer drains.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ConnectionEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx: Some(tx) }, rx)
    }

    /// A sink that discards every event.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Queue an event without waiting.
    pub fn emit(&self, event: ConnectionEvent) {
        let Some(tx) = &self.tx else {
            return;
        };
        match tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                warn!(event = %event, "Event queue full, dropping event");
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }

    /// Per-transport hook that logs and forwards lifecycle events.
    pub fn for_server(&self, server: impl Into<String>) -> TransportEvents {
        TransportEvents {
            server: server.into(),
            sink: self.clone(),
        }
    }
}

/// Lifecycle hook handed to each transport.
#[derive(Debug, Clone)]
pub struct TransportEvents {
    server: String,
    sink: EventSink,
}

impl TransportEvents {
    /// A hook that only logs.
    pub fn detached(server: impl Into<String>) -> Self {
        EventSink::disabled().for_server(server)
    }

    /// Server this hook belongs to.
    pub fn server(&self) -> &str {
        &self.server
    }

    /// The transport became usable.
    pub fn connected(&self) {
        info!(server = %self.server, "Transport connected");
        self.forward(TransportEvent::Connected);
    }

    /// An unsolicited inbound message.
    pub fn message(&self, payload: serde_json::Value) {
        debug!(server = %self.server, "Transport message received");
        self.forward(TransportEvent::Message(payload));
    }

    /// A non-fatal error.
    pub fn error(&self, message: impl Into<String>) {
        let message = message.into();
        warn!(server = %self.server, error = %message, "Transport error");
        self.forward(TransportEvent::Error(message));
    }

    /// The channel went away.
    pub fn disconnected(&self, reason: Option<String>) {
        info!(server = %self.server, reason = ?reason, "Transport disconnected");
        self.forward(TransportEvent::Disconnected(reason));
    }

    fn forward(&self, event: TransportEvent) {
        self.sink.emit(ConnectionEvent::Transport {
            server: self.server.clone(),
            event,
        });
    }
}
