//! Core types and error definitions for toolmesh.
//!
//! This crate provides the types shared by the transport, supervisor and
//! router crates.
//!
//! # Main types
//!
//! - [`ToolmeshError`]: Unified error enum.
//! - [`ToolmeshResult`]: Convenience alias for `Result<T, ToolmeshError>`.
//! - [`ServerConfig`]: Immutable description of one server and its transport.
//! - [`ConnectionStatus`]: Per-server status record exposed to callers.
//! - [`ToolCallSpec`] / [`ToolChain`]: Tool call requests.
//! - [`EventSink`]: Bounded queue for human-readable status events.

/// Tool call and tool chain request types.
pub mod chain;
/// Server configuration.
pub mod config;
/// Error type.
pub mod error;
/// Status events.
pub mod events;
/// Connection status records.
pub mod status;

pub use chain::{ChainMode, ChainStepResult, StepOutcome, ToolCallSpec, ToolChain};
pub use config::{
    AuthConfig, AuthKind, EndpointConfig, ProcessConfig, ReconnectPolicy, ServerConfig,
    SocketConfig, TransportConfig, TransportKind,
};
pub use error::{ToolmeshError, ToolmeshResult};
pub use events::{ConnectionEvent, EventSink, TransportEvent, TransportEvents};
pub use status::{ConnectionStatus, ServerState};
