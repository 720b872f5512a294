//! Duplex socket transport over WebSocket, with automatic reconnect after an
//! unsolicited close.

use crate::auth::header_pairs;
use crate::protocol::{into_result, JsonRpcRequest};
use crate::transport::{dispatch_inbound, PendingRequests, Transport};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use toolmesh_core::{
    ReconnectPolicy, SocketConfig, ToolmeshError, ToolmeshResult, TransportEvents, TransportKind,
};
use tracing::{debug, info, warn};

/// The opening handshake must finish within this window.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWriter = SplitSink<WsStream, Message>;
type WsReader = SplitStream<WsStream>;

struct SocketInner {
    name: String,
    url: String,
    headers: Vec<(String, String)>,
    policy: ReconnectPolicy,
    request_timeout: Duration,
    writer: Mutex<Option<WsWriter>>,
    reader: parking_lot::Mutex<Option<JoinHandle<()>>>,
    pending: PendingRequests,
    connected: AtomicBool,
    closed: AtomicBool,
    reconnect_attempts: AtomicU32,
    events: TransportEvents,
}

/// Persistent WebSocket connection to one server.
pub struct SocketTransport {
    inner: Arc<SocketInner>,
}

impl SocketTransport {
    /// Open the connection. Fails if the handshake does not complete within
    /// [`HANDSHAKE_TIMEOUT`].
    pub async fn connect(
        name: impl Into<String>,
        config: &SocketConfig,
        request_timeout: Duration,
        events: TransportEvents,
    ) -> ToolmeshResult<Self> {
        let inner = Arc::new(SocketInner {
            name: name.into(),
            url: config.url.clone(),
            headers: header_pairs(&config.headers, config.auth.as_ref()),
            // No policy configured means no automatic reconnect.
            policy: config.reconnect.clone().unwrap_or(ReconnectPolicy {
                enabled: false,
                ..ReconnectPolicy::default()
            }),
            request_timeout,
            writer: Mutex::new(None),
            reader: parking_lot::Mutex::new(None),
            pending: PendingRequests::new(),
            connected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            reconnect_attempts: AtomicU32::new(0),
            events,
        });

        inner.open().await?;
        Ok(Self { inner })
    }

    /// Reconnect attempts made since the last successful connection.
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.reconnect_attempts.load(Ordering::SeqCst)
    }
}

impl SocketInner {
    async fn open(self: &Arc<Self>) -> ToolmeshResult<()> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| ToolmeshError::Config(format!("'{}': invalid socket url: {e}", self.name)))?;
        for (key, value) in &self.headers {
            let key = HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| ToolmeshError::Config(format!("invalid header name '{key}': {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| ToolmeshError::Config(format!("invalid value for '{key}': {e}")))?;
            request.headers_mut().insert(key, value);
        }

        let (stream, _) =
            tokio::time::timeout(HANDSHAKE_TIMEOUT, tokio_tungstenite::connect_async(request))
                .await
                .map_err(|_| {
                    ToolmeshError::Timeout(format!(
                        "socket handshake with '{}' exceeded {}s",
                        self.name,
                        HANDSHAKE_TIMEOUT.as_secs()
                    ))
                })?
                .map_err(|e| {
                    ToolmeshError::Transport(format!("socket connect to '{}' failed: {e}", self.name))
                })?;

        let (write, read) = stream.split();
        *self.writer.lock().await = Some(write);
        self.connected.store(true, Ordering::SeqCst);
        self.events.connected();

        let handle = tokio::spawn(read_loop(self.clone(), read));
        *self.reader.lock() = Some(handle);
        Ok(())
    }

    /// Tear down a connection that finished opening after `close` ran.
    async fn discard_reopened(&self) {
        if let Some(handle) = self.reader.lock().take() {
            handle.abort();
        }
        if let Some(mut writer) = self.writer.lock().await.take() {
            if let Err(e) = writer.send(Message::Close(None)).await {
                debug!(server = %self.name, error = %e, "Close frame not delivered");
            }
        }
        self.pending.fail_all();
        if self.connected.swap(false, Ordering::SeqCst) {
            self.events.disconnected(None);
        }
    }

    fn handle_close(self: &Arc<Self>, reason: String) {
        let was_connected = self.connected.swap(false, Ordering::SeqCst);
        self.pending.fail_all();
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        if was_connected {
            self.events.disconnected(Some(reason));
        }
        if self.policy.enabled {
            schedule_reconnect(self.clone());
        }
    }
}

async fn read_loop(inner: Arc<SocketInner>, mut read: WsReader) {
    let reason = loop {
        match read.next().await {
            Some(Ok(Message::Text(text))) => {
                dispatch_inbound(&text, &inner.pending, &inner.events);
            }
            Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                Ok(text) => dispatch_inbound(text, &inner.pending, &inner.events),
                Err(_) => debug!(server = %inner.name, "Ignoring non-UTF-8 binary frame"),
            },
            Some(Ok(Message::Close(frame))) => {
                break frame
                    .map(|f| format!("closed by server: {}", f.reason))
                    .unwrap_or_else(|| "closed by server".to_string());
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                inner.events.error(format!("socket error: {e}"));
                break format!("socket error: {e}");
            }
            None => break "stream ended".to_string(),
        }
    };

    inner.writer.lock().await.take();
    inner.handle_close(reason);
}

fn schedule_reconnect(inner: Arc<SocketInner>) {
    tokio::spawn(async move {
        loop {
            if inner.closed.load(Ordering::SeqCst) {
                return;
            }
            let attempt = inner.reconnect_attempts.load(Ordering::SeqCst);
            if attempt >= inner.policy.max_attempts {
                inner.events.error(format!(
                    "giving up after {attempt} reconnect attempts"
                ));
                return;
            }

            let delay = inner.policy.delay_for(attempt);
            inner.reconnect_attempts.fetch_add(1, Ordering::SeqCst);
            info!(
                server = %inner.name,
                attempt = attempt + 1,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Scheduling socket reconnect"
            );
            tokio::time::sleep(delay).await;

            if inner.closed.load(Ordering::SeqCst) {
                return;
            }
            match inner.open().await {
                Ok(()) => {
                    inner.reconnect_attempts.store(0, Ordering::SeqCst);
                    if inner.closed.load(Ordering::SeqCst) {
                        inner.discard_reopened().await;
                    }
                    return;
                }
                Err(e) => inner.events.error(format!("reconnect failed: {e}")),
            }
        }
    });
}

#[async_trait]
impl Transport for SocketTransport {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Socket
    }

    async fn send(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> ToolmeshResult<serde_json::Value> {
        let inner = &self.inner;
        let (id, rx) = inner.pending.register();
        let text = serde_json::to_string(&JsonRpcRequest::new(id, method, params))?;

        {
            let mut guard = inner.writer.lock().await;
            let Some(writer) = guard.as_mut() else {
                inner.pending.forget(id);
                return Err(ToolmeshError::NotConnected(format!(
                    "socket '{}' is not open",
                    inner.name
                )));
            };
            if let Err(e) = writer.send(Message::Text(text)).await {
                inner.pending.forget(id);
                return Err(ToolmeshError::Transport(format!(
                    "socket send to '{}' failed: {e}",
                    inner.name
                )));
            }
        }

        let resp = inner
            .pending
            .wait(&inner.name, id, method, rx, inner.request_timeout)
            .await?;
        into_result(&inner.name, resp)
    }

    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        let inner = &self.inner;
        if inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(mut writer) = inner.writer.lock().await.take() {
            if let Err(e) = writer.send(Message::Close(None)).await {
                debug!(server = %inner.name, error = %e, "Close frame not delivered");
            }
        }

        if let Some(handle) = inner.reader.lock().take() {
            handle.abort();
        }
        inner.pending.fail_all();
        if inner.connected.swap(false, Ordering::SeqCst) {
            inner.events.disconnected(None);
        } else {
            warn!(server = %inner.name, "Closing a socket that was already down");
        }
    }
}

impl Drop for SocketTransport {
    fn drop(&mut self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        if let Some(handle) = self.inner.reader.lock().take() {
            handle.abort();
        }
    }
}
