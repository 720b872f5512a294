//! Process transport: a subprocess speaking newline-delimited JSON-RPC over
//! its standard streams.

use crate::protocol::{into_result, JsonRpcRequest};
use crate::transport::{dispatch_inbound, PendingRequests, Transport};
use async_trait::async_trait;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::Mutex;
use toolmesh_core::{
    ProcessConfig, ToolmeshError, ToolmeshResult, TransportEvents, TransportKind,
};
use tracing::{debug, error, info, warn};

/// How long `close` waits for the child to exit after killing it.
const EXIT_WAIT: Duration = Duration::from_secs(5);

struct Shared {
    pending: PendingRequests,
    connected: AtomicBool,
    events: TransportEvents,
}

impl Shared {
    /// Mark the channel gone. Returns true only for the first caller.
    fn shut_down(&self, reason: Option<String>) -> bool {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return false;
        }
        self.pending.fail_all();
        self.events.disconnected(reason);
        true
    }
}

/// Transport backed by a child process.
pub struct ProcessTransport {
    name: String,
    stdin: Mutex<Option<ChildStdin>>,
    child: Mutex<Child>,
    shared: Arc<Shared>,
    request_timeout: Duration,
}

impl ProcessTransport {
    /// Start the subprocess. The transport is usable as soon as the spawn
    /// succeeds.
    pub fn spawn(
        name: impl Into<String>,
        config: &ProcessConfig,
        request_timeout: Duration,
        events: TransportEvents,
    ) -> ToolmeshResult<Self> {
        let name = name.into();
        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &config.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd.spawn().map_err(|e| {
            ToolmeshError::Spawn(format!(
                "failed to start '{}' for '{name}': {e}",
                config.command
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ToolmeshError::Spawn(format!("'{name}': stdin not available")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ToolmeshError::Spawn(format!("'{name}': stdout not available")))?;
        let stderr = child.stderr.take();

        let shared = Arc::new(Shared {
            pending: PendingRequests::new(),
            connected: AtomicBool::new(true),
            events,
        });

        let reader = shared.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            let reason = loop {
                match lines.next_line().await {
                    Ok(Some(line)) => dispatch_inbound(&line, &reader.pending, &reader.events),
                    Ok(None) => break "process exited".to_string(),
                    Err(e) => {
                        error!(server = %reader.events.server(), error = %e, "Error reading server stdout");
                        break format!("stdout read failed: {e}");
                    }
                }
            };
            reader.shut_down(Some(reason));
        });

        if let Some(stderr) = stderr {
            let server = name.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(server = %server, line = %line, "Server stderr");
                }
            });
        }

        info!(server = %name, command = %config.command, "Server process started");
        shared.events.connected();

        Ok(Self {
            name,
            stdin: Mutex::new(Some(stdin)),
            child: Mutex::new(child),
            shared,
            request_timeout,
        })
    }

    async fn write_line(&self, line: &str) -> ToolmeshResult<()> {
        let mut guard = self.stdin.lock().await;
        let stdin = guard
            .as_mut()
            .ok_or_else(|| ToolmeshError::NotConnected(format!("'{}' is closed", self.name)))?;
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| ToolmeshError::Transport(format!("write to '{}' failed: {e}", self.name)))?;
        stdin
            .write_all(b"\n")
            .await
            .map_err(|e| ToolmeshError::Transport(format!("write to '{}' failed: {e}", self.name)))?;
        stdin
            .flush()
            .await
            .map_err(|e| ToolmeshError::Transport(format!("flush to '{}' failed: {e}", self.name)))
    }
}

#[async_trait]
impl Transport for ProcessTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Process
    }

    async fn send(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> ToolmeshResult<serde_json::Value> {
        if !self.is_connected() {
            return Err(ToolmeshError::NotConnected(format!("'{}' is closed", self.name)));
        }

        let (id, rx) = self.shared.pending.register();
        let line = serde_json::to_string(&JsonRpcRequest::new(id, method, params))?;
        if let Err(e) = self.write_line(&line).await {
            self.shared.pending.forget(id);
            return Err(e);
        }

        let resp = self
            .shared
            .pending
            .wait(&self.name, id, method, rx, self.request_timeout)
            .await?;
        into_result(&self.name, resp)
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        // Closing stdin first lets well-behaved servers exit on their own.
        drop(self.stdin.lock().await.take());

        let mut child = self.child.lock().await;
        if let Err(e) = child.start_kill() {
            debug!(server = %self.name, error = %e, "Kill failed, process already gone");
        }
        if tokio::time::timeout(EXIT_WAIT, child.wait()).await.is_err() {
            warn!(server = %self.name, "Server process did not exit in time");
        }

        self.shared.shut_down(None);
    }
}
