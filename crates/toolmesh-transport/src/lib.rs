//! Transports for toolmesh servers.
//!
//! Every transport implements [`Transport`]: send a JSON-RPC request, report
//! lifecycle events, report connectedness, close. [`TransportFactory`]
//! builds them from a [`toolmesh_core::ServerConfig`] and tracks them by name.

/// Header construction for configured headers and credentials.
pub mod auth;
/// Transport registry and connector seam.
pub mod factory;
/// Request/response HTTP transport.
pub mod http;
/// JSON-RPC message types and tool calls.
pub mod protocol;
/// One-way event stream transport.
pub mod sse;
/// Subprocess transport.
pub mod stdio;
/// The transport contract.
pub mod transport;
/// Duplex WebSocket transport.
pub mod websocket;

pub use factory::{Connector, DefaultConnector, TransportFactory};
pub use http::HttpTransport;
pub use protocol::{call_tool, list_tools, McpToolDef};
pub use sse::{SseEvent, SseParser, StreamTransport};
pub use stdio::ProcessTransport;
pub use transport::Transport;
pub use websocket::{SocketTransport, HANDSHAKE_TIMEOUT};
