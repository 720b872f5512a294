//! One-way event stream transport (Server-Sent Events).
//!
//! The stream only receives. Requests need a companion HTTP transport, so
//! [`Transport::send`] reports [`ToolmeshError::Unsupported`].

use crate::auth::{header_map, header_pairs};
use crate::transport::Transport;
use async_trait::async_trait;
use futures_util::StreamExt;
use parking_lot::Mutex;
use reqwest::header::{HeaderValue, ACCEPT};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use toolmesh_core::{EndpointConfig, ToolmeshError, ToolmeshResult, TransportEvents, TransportKind};
use tracing::{debug, info};

/// One dispatched event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// `event:` field, if the server named the event.
    pub event: Option<String>,
    /// `data:` lines joined with `\n`.
    pub data: String,
}

/// Incremental parser fed with raw chunks. Bytes are buffered until a full
/// line arrives, so a UTF-8 sequence may straddle chunk boundaries.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseParser {
    /// Feed a chunk and return every event it completed.
    pub fn feed(&mut self, chunk: impl AsRef<[u8]>) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk.as_ref());
        let mut out = Vec::new();

        while let Some(line_end) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=line_end).collect();
            let line = String::from_utf8_lossy(&raw[..line_end])
                .trim_end_matches('\r')
                .to_string();

            if line.is_empty() {
                if let Some(event) = self.dispatch() {
                    out.push(event);
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
                None => (line.as_str(), ""),
            };
            match field {
                "data" => self.data.push(value.to_string()),
                "event" => self.event = Some(value.to_string()),
                _ => {}
            }
        }

        out
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseEvent { event, data })
    }
}

impl SseEvent {
    /// Payload forwarded as a transport message: JSON data is parsed, other
    /// data is kept as a string, and named events are wrapped as
    /// `{"event": name, "data": payload}`.
    pub fn into_payload(self) -> serde_json::Value {
        let data = serde_json::from_str(&self.data)
            .unwrap_or_else(|_| serde_json::Value::String(self.data));
        match self.event {
            Some(name) => serde_json::json!({ "event": name, "data": data }),
            None => data,
        }
    }
}

/// Subscription to a server's event stream.
pub struct StreamTransport {
    name: String,
    subscribed: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
    reader: Mutex<Option<JoinHandle<()>>>,
    events: TransportEvents,
}

impl StreamTransport {
    /// Open the stream. The response headers must arrive within `timeout`.
    pub async fn connect(
        name: impl Into<String>,
        config: &EndpointConfig,
        timeout: Duration,
        events: TransportEvents,
    ) -> ToolmeshResult<Self> {
        let name = name.into();
        let mut headers = header_map(&header_pairs(&config.headers, config.auth.as_ref()))?;
        headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));

        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| ToolmeshError::Http(format!("client setup for '{name}' failed: {e}")))?;

        let resp = tokio::time::timeout(timeout, client.get(&config.url).send())
            .await
            .map_err(|_| {
                ToolmeshError::Timeout(format!(
                    "event stream '{name}' did not open within {}ms",
                    timeout.as_millis()
                ))
            })?
            .map_err(|e| ToolmeshError::Http(format!("event stream '{name}' failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ToolmeshError::Http(format!(
                "event stream '{name}' returned {status}"
            )));
        }

        let subscribed = Arc::new(AtomicBool::new(true));
        let closed = Arc::new(AtomicBool::new(false));
        events.connected();
        info!(server = %name, url = %config.url, "Event stream subscribed");

        let task_events = events.clone();
        let task_subscribed = subscribed.clone();
        let task_closed = closed.clone();
        let handle = tokio::spawn(async move {
            let mut stream = resp.bytes_stream();
            let mut parser = SseParser::default();
            let mut reason = "stream ended".to_string();

            while let Some(chunk) = stream.next().await {
                match chunk {
                    Ok(bytes) => {
                        for event in parser.feed(&bytes) {
                            task_events.message(event.into_payload());
                        }
                    }
                    Err(e) => {
                        task_events.error(format!("stream read error: {e}"));
                        reason = format!("stream read error: {e}");
                        break;
                    }
                }
            }

            task_subscribed.store(false, Ordering::SeqCst);
            if !task_closed.load(Ordering::SeqCst) {
                task_events.disconnected(Some(reason));
            }
        });

        Ok(Self {
            name,
            subscribed,
            closed,
            reader: Mutex::new(Some(handle)),
            events,
        })
    }
}

#[async_trait]
impl Transport for StreamTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Stream
    }

    async fn send(
        &self,
        method: &str,
        _params: Option<serde_json::Value>,
    ) -> ToolmeshResult<serde_json::Value> {
        Err(ToolmeshError::Unsupported(format!(
            "'{}' is a receive-only event stream and cannot send '{method}'; pair it with an http transport",
            self.name
        )))
    }

    fn is_connected(&self) -> bool {
        self.subscribed.load(Ordering::SeqCst)
    }

    async fn probe(&self) -> ToolmeshResult<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(ToolmeshError::NotConnected(format!(
                "event stream '{}' is not subscribed",
                self.name
            )))
        }
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let handle = self.reader.lock().take();
        if let Some(handle) = handle {
            handle.abort();
        }
        let was_subscribed = self.subscribed.swap(false, Ordering::SeqCst);
        debug!(server = %self.name, "Event stream closed");
        if was_subscribed {
            self.events.disconnected(None);
        }
    }
}

impl Drop for StreamTransport {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(handle) = self.reader.lock().take() {
            handle.abort();
        }
    }
}
