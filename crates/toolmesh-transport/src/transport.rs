use crate::protocol::{methods, JsonRpcResponse};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;
use toolmesh_core::{ToolmeshError, ToolmeshResult, TransportEvents, TransportKind};
use tracing::debug;

/// Channel to one server.
///
/// Lifecycle events (connected, message, error, disconnected) are reported
/// through the [`TransportEvents`] hook the transport was built with.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Server name this transport is bound to.
    fn name(&self) -> &str;

    /// Transport variant.
    fn kind(&self) -> TransportKind;

    /// Send one request and wait for its result payload.
    async fn send(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> ToolmeshResult<serde_json::Value>;

    /// Whether the transport can currently carry requests.
    fn is_connected(&self) -> bool;

    /// Release the underlying resources. Closing twice is a no-op.
    async fn close(&self);

    /// Lightweight liveness check.
    async fn probe(&self) -> ToolmeshResult<()> {
        self.send(methods::LIST_TOOLS, None).await.map(|_| ())
    }
}

/// Requests waiting for a response, keyed by JSON-RPC id.
pub(crate) struct PendingRequests {
    next_id: AtomicU64,
    waiters: Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>,
}

impl PendingRequests {
    pub(crate) fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            waiters: Mutex::new(HashMap::new()),
        }
    }

    /// Allocate an id and a receiver for its response.
    pub(crate) fn register(&self) -> (u64, oneshot::Receiver<JsonRpcResponse>) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().insert(id, tx);
        (id, rx)
    }

    /// Hand a response to its waiter. Returns false for unknown ids.
    pub(crate) fn complete(&self, response: JsonRpcResponse) -> bool {
        let Some(id) = response.id else {
            return false;
        };
        let waiter = self.waiters.lock().remove(&id);
        match waiter {
            Some(tx) => tx.send(response).is_ok(),
            None => false,
        }
    }

    pub(crate) fn forget(&self, id: u64) {
        self.waiters.lock().remove(&id);
    }

    /// Drop every waiter; their receivers observe a closed channel.
    pub(crate) fn fail_all(&self) {
        self.waiters.lock().clear();
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.waiters.lock().len()
    }

    /// Wait for the response to `id`, giving up after `timeout`.
    pub(crate) async fn wait(
        &self,
        server: &str,
        id: u64,
        method: &str,
        rx: oneshot::Receiver<JsonRpcResponse>,
        timeout: Duration,
    ) -> ToolmeshResult<JsonRpcResponse> {
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(resp)) => Ok(resp),
            Ok(Err(_)) => Err(ToolmeshError::NotConnected(format!(
                "'{server}' closed before answering '{method}'"
            ))),
            Err(_) => {
                self.forget(id);
                Err(ToolmeshError::Timeout(format!(
                    "'{method}' on '{server}' timed out after {}ms",
                    timeout.as_millis()
                )))
            }
        }
    }
}

/// Route one inbound text frame/line: responses go to their waiter, anything
/// else is reported as an unsolicited message.
pub(crate) fn dispatch_inbound(text: &str, pending: &PendingRequests, events: &TransportEvents) {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return;
    }

    let value: serde_json::Value = match serde_json::from_str(trimmed) {
        Ok(v) => v,
        Err(e) => {
            debug!(server = %events.server(), line = %trimmed, error = %e, "Non-JSON line from server");
            return;
        }
    };

    let is_response =
        value.get("id").is_some() && (value.get("result").is_some() || value.get("error").is_some());
    if !is_response {
        events.message(value);
        return;
    }

    match serde_json::from_value::<JsonRpcResponse>(value) {
        Ok(resp) => {
            if !pending.complete(resp) {
                debug!(server = %events.server(), "Response for unknown or abandoned request");
            }
        }
        Err(e) => events.error(format!("malformed response: {e}")),
    }
}
