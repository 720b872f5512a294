//! Request/response transport: one JSON-RPC POST per call.

use crate::auth::{header_map, header_pairs};
use crate::protocol::{into_result, JsonRpcRequest, JsonRpcResponse};
use crate::transport::Transport;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use toolmesh_core::{EndpointConfig, ToolmeshError, ToolmeshResult, TransportEvents, TransportKind};
use tracing::debug;

/// HTTP endpoint. Connectionless, so it counts as connected until closed.
pub struct HttpTransport {
    name: String,
    url: String,
    client: reqwest::Client,
    next_id: AtomicU64,
    closed: AtomicBool,
    events: TransportEvents,
}

impl HttpTransport {
    /// Build the client. No request is made until the first `send`.
    pub fn new(
        name: impl Into<String>,
        config: &EndpointConfig,
        timeout: Duration,
        events: TransportEvents,
    ) -> ToolmeshResult<Self> {
        let name = name.into();
        let headers = header_map(&header_pairs(&config.headers, config.auth.as_ref()))?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| ToolmeshError::Http(format!("client setup for '{name}' failed: {e}")))?;

        events.connected();
        Ok(Self {
            name,
            url: config.url.clone(),
            client,
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            events,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Http
    }

    async fn send(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> ToolmeshResult<serde_json::Value> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ToolmeshError::NotConnected(format!("'{}' is closed", self.name)));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let body = JsonRpcRequest::new(id, method, params);
        debug!(server = %self.name, method, id, "HTTP request");

        let resp = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ToolmeshError::Timeout(format!("'{method}' on '{}' timed out", self.name))
                } else {
                    ToolmeshError::Http(format!("request to '{}' failed: {e}", self.name))
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let err = ToolmeshError::Http(format!("'{}' returned {status}: {text}", self.name));
            self.events.error(err.to_string());
            return Err(err);
        }

        let parsed: JsonRpcResponse = resp.json().await.map_err(|e| {
            ToolmeshError::Transport(format!("malformed response body from '{}': {e}", self.name))
        })?;
        into_result(&self.name, parsed)
    }

    fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.events.disconnected(None);
        }
    }
}
