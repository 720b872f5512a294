//! Builds transports from configuration and tracks them by server name.

use crate::http::HttpTransport;
use crate::sse::StreamTransport;
use crate::stdio::ProcessTransport;
use crate::transport::Transport;
use crate::websocket::SocketTransport;
use async_trait::async_trait;
use futures_util::future::join_all;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use toolmesh_core::{
    EventSink, ServerConfig, ToolmeshError, ToolmeshResult, TransportConfig, TransportEvents,
};
use tracing::{debug, info};

/// Opens a transport for one server configuration.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a transport for `config`, reporting lifecycle events to `events`.
    async fn connect(
        &self,
        config: &ServerConfig,
        events: TransportEvents,
    ) -> ToolmeshResult<Arc<dyn Transport>>;
}

/// Dispatches on the configured transport kind.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultConnector;

#[async_trait]
impl Connector for DefaultConnector {
    async fn connect(
        &self,
        config: &ServerConfig,
        events: TransportEvents,
    ) -> ToolmeshResult<Arc<dyn Transport>> {
        config.validate()?;
        let timeout = config.timeout();

        let transport: Arc<dyn Transport> = match &config.transport {
            TransportConfig::Process(p) => {
                Arc::new(ProcessTransport::spawn(&config.name, p, timeout, events)?)
            }
            TransportConfig::Http(ep) => {
                Arc::new(HttpTransport::new(&config.name, ep, timeout, events)?)
            }
            TransportConfig::Socket(sock) => {
                Arc::new(SocketTransport::connect(&config.name, sock, timeout, events).await?)
            }
            TransportConfig::Stream(ep) => {
                Arc::new(StreamTransport::connect(&config.name, ep, timeout, events).await?)
            }
        };
        Ok(transport)
    }
}

/// Name-keyed registry of live transports and the configs they came from.
pub struct TransportFactory {
    connector: Arc<dyn Connector>,
    events: EventSink,
    configs: RwLock<HashMap<String, ServerConfig>>,
    transports: RwLock<HashMap<String, Arc<dyn Transport>>>,
}

impl TransportFactory {
    /// Factory using the built-in transports.
    pub fn new(events: EventSink) -> Self {
        Self::with_connector(Arc::new(DefaultConnector), events)
    }

    /// Factory using a custom connector.
    pub fn with_connector(connector: Arc<dyn Connector>, events: EventSink) -> Self {
        Self {
            connector,
            events,
            configs: RwLock::new(HashMap::new()),
            transports: RwLock::new(HashMap::new()),
        }
    }

    /// Create and register a transport for `name`, replacing any previous
    /// one. The config is stored first, so a failed attempt can still be
    /// retried through [`TransportFactory::reconnect`].
    pub async fn create_transport(
        &self,
        name: &str,
        config: &ServerConfig,
    ) -> ToolmeshResult<Arc<dyn Transport>> {
        self.configs.write().insert(name.to_string(), config.clone());

        let transport = self
            .connector
            .connect(config, self.events.for_server(name))
            .await?;

        let previous = self
            .transports
            .write()
            .insert(name.to_string(), transport.clone());
        if let Some(previous) = previous {
            if !Arc::ptr_eq(&previous, &transport) {
                previous.close().await;
            }
        }

        info!(server = %name, kind = %config.kind(), "Transport created");
        Ok(transport)
    }

    /// Live transport for `name`.
    pub fn get_transport(&self, name: &str) -> Option<Arc<dyn Transport>> {
        self.transports.read().get(name).cloned()
    }

    /// Config last used to create `name`.
    pub fn stored_config(&self, name: &str) -> Option<ServerConfig> {
        self.configs.read().get(name).cloned()
    }

    /// Names with a registered transport.
    pub fn transport_names(&self) -> Vec<String> {
        self.transports.read().keys().cloned().collect()
    }

    /// Close and unregister `name`. Unknown names are ignored.
    pub async fn close_transport(&self, name: &str) {
        let removed = self.transports.write().remove(name);
        match removed {
            Some(transport) => {
                transport.close().await;
                debug!(server = %name, "Transport closed");
            }
            None => debug!(server = %name, "No transport to close"),
        }
    }

    /// Close every transport concurrently, then clear the table.
    pub async fn close_all(&self) {
        let snapshot: Vec<Arc<dyn Transport>> =
            self.transports.read().values().cloned().collect();
        join_all(snapshot.iter().map(|t| t.close())).await;
        self.transports.write().clear();
        info!(count = snapshot.len(), "All transports closed");
    }

    /// Close `name` if open, then create it again from the stored config.
    pub async fn reconnect(&self, name: &str) -> ToolmeshResult<Arc<dyn Transport>> {
        let config = self
            .stored_config(name)
            .ok_or_else(|| ToolmeshError::UnknownServer(name.to_string()))?;
        self.close_transport(name).await;
        self.create_transport(name, &config).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use toolmesh_core::TransportKind;

    struct FakeTransport {
        name: String,
        closed: AtomicBool,
        closes: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Transport for FakeTransport {
        fn name(&self) -> &str {
            &self.name
        }
        fn kind(&self) -> TransportKind {
            TransportKind::Http
        }
        async fn send(
            &self,
            _method: &str,
            _params: Option<serde_json::Value>,
        ) -> ToolmeshResult<serde_json::Value> {
            Ok(serde_json::json!({}))
        }
        fn is_connected(&self) -> bool {
            !self.closed.load(Ordering::SeqCst)
        }
        async fn close(&self) {
            if !self.closed.swap(true, Ordering::SeqCst) {
                self.closes.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    #[derive(Default)]
    struct FakeConnector {
        closes: Arc<AtomicUsize>,
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Connector for FakeConnector {
        async fn connect(
            &self,
            config: &ServerConfig,
            _events: TransportEvents,
        ) -> ToolmeshResult<Arc<dyn Transport>> {
            self.seen.lock().push(config.name.clone());
            Ok(Arc::new(FakeTransport {
                name: config.name.clone(),
                closed: AtomicBool::new(false),
                closes: self.closes.clone(),
            }))
        }
    }

    fn factory() -> (TransportFactory, Arc<FakeConnector>) {
        let connector = Arc::new(FakeConnector::default());
        let factory = TransportFactory::with_connector(connector.clone(), EventSink::disabled());
        (factory, connector)
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let (factory, _) = factory();
        let config = ServerConfig::http("api", "http://localhost:9");
        factory.create_transport("api", &config).await.unwrap();

        assert!(factory.get_transport("api").is_some());
        assert!(factory.get_transport("other").is_none());
        assert_eq!(factory.stored_config("api").unwrap(), config);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (factory, connector) = factory();
        factory
            .create_transport("api", &ServerConfig::http("api", "http://localhost:9"))
            .await
            .unwrap();

        factory.close_transport("api").await;
        factory.close_transport("api").await;
        factory.close_transport("never-created").await;
        assert_eq!(connector.closes.load(Ordering::SeqCst), 1);
        assert!(factory.get_transport("api").is_none());
    }

    #[tokio::test]
    async fn test_reconnect_uses_stored_config() {
        let (factory, connector) = factory();
        factory
            .create_transport("api", &ServerConfig::http("api", "http://localhost:9"))
            .await
            .unwrap();
        factory.close_transport("api").await;

        let transport = factory.reconnect("api").await.unwrap();
        assert_eq!(transport.name(), "api");
        assert!(transport.is_connected());
        assert_eq!(connector.seen.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_reconnect_unknown_fails() {
        let (factory, _) = factory();
        let err = factory.reconnect("ghost").await.err().unwrap();
        assert!(matches!(err, ToolmeshError::UnknownServer(_)));
    }

    #[tokio::test]
    async fn test_close_all_clears_table() {
        let (factory, connector) = factory();
        for name in ["a", "b", "c"] {
            factory
                .create_transport(name, &ServerConfig::http(name, "http://localhost:9"))
                .await
                .unwrap();
        }
        factory.close_all().await;
        assert!(factory.transport_names().is_empty());
        assert_eq!(connector.closes.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_recreate_closes_previous() {
        let (factory, connector) = factory();
        let config = ServerConfig::http("api", "http://localhost:9");
        let first = factory.create_transport("api", &config).await.unwrap();
        factory.create_transport("api", &config).await.unwrap();
        assert!(!first.is_connected());
        assert_eq!(connector.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalid_config_rejected_by_default_connector() {
        let factory = TransportFactory::new(EventSink::disabled());
        let err = factory
            .create_transport("bad", &ServerConfig::socket("bad", "http://not-a-socket"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ToolmeshError::Config(_)));
        assert!(factory.stored_config("bad").is_some());
    }
}
