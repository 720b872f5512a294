use thiserror::Error;

/// Top-level error type for toolmesh.
///
/// Each variant corresponds to a failure family. Lifecycle failures
/// (timeouts, exhausted retries) are recorded in connection status; the
/// rest propagate to whoever issued the call.
#[derive(Error, Debug)]
pub enum ToolmeshError {
    /// A server configuration is missing a field or carries an invalid one.
    #[error("Config error: {0}")]
    Config(String),

    /// A server subprocess could not be started.
    #[error("Spawn error: {0}")]
    Spawn(String),

    /// Low-level channel failure (write, read, closed stream, socket error).
    #[error("Transport error: {0}")]
    Transport(String),

    /// Non-success HTTP status or request failure.
    #[error("HTTP error: {0}")]
    Http(String),

    /// An operation did not complete within its deadline.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The transport cannot perform the requested operation.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// The server answered with a tool-execution error.
    #[error("Tool error from '{server}': {message}")]
    Tool {
        /// Server that produced the error.
        server: String,
        /// Error message reported by the server.
        message: String,
    },

    /// No connected server could take the call.
    #[error("No available server for tool '{0}'")]
    NoAvailableServer(String),

    /// The transport is closed or was never connected.
    #[error("Not connected: {0}")]
    NotConnected(String),

    /// No configuration or connection is known under this name.
    #[error("Unknown server: {0}")]
    UnknownServer(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`ToolmeshError`].
pub type ToolmeshResult<T> = Result<T, ToolmeshError>;

impl ToolmeshError {
    /// Whether the failure is expected to clear up on its own (worth a retry).
    ///
    /// Timeouts, transport faults, HTTP failures and I/O errors are transient;
    /// bad configuration, unsupported operations and tool errors are not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_)
                | Self::Transport(_)
                | Self::Http(_)
                | Self::NotConnected(_)
                | Self::Io(_)
        )
    }
}
