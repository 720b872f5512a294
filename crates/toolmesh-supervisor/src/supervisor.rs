use crate::actor::ServerHandle;
use crate::settings::SupervisorSettings;
use crate::state::Shared;
use futures_util::future::join_all;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use toolmesh_core::{
    ConnectionEvent, ConnectionStatus, EventSink, ServerConfig, ToolmeshError, ToolmeshResult,
};
use toolmesh_transport::{Transport, TransportFactory};
use tracing::{debug, info};

struct Inner {
    shared: Arc<Shared>,
    actors: Mutex<HashMap<String, ServerHandle>>,
}

/// Connects servers, keeps them alive, and exposes their status.
///
/// Work for one server name is serialized on that name's actor; different
/// names proceed concurrently. Cloning is cheap and shares all state.
#[derive(Clone)]
pub struct ConnectionSupervisor {
    inner: Arc<Inner>,
}

impl ConnectionSupervisor {
    /// Supervisor with the built-in transports. Returns the receiving end of
    /// the status event queue.
    pub fn new(settings: SupervisorSettings) -> (Self, mpsc::Receiver<ConnectionEvent>) {
        let (events, rx) = EventSink::channel(settings.event_capacity);
        let factory = Arc::new(TransportFactory::new(events.clone()));
        (Self::with_factory(factory, events, settings), rx)
    }

    /// Supervisor over an existing factory and event sink.
    pub fn with_factory(
        factory: Arc<TransportFactory>,
        events: EventSink,
        settings: SupervisorSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                shared: Arc::new(Shared::new(factory, events, settings)),
                actors: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Status event sink shared with the transports.
    pub fn events(&self) -> &EventSink {
        &self.inner.shared.events
    }

    /// The transport registry.
    pub fn factory(&self) -> &Arc<TransportFactory> {
        &self.inner.shared.factory
    }

    /// Active settings.
    pub fn settings(&self) -> &SupervisorSettings {
        &self.inner.shared.settings
    }

    /// The live actor for `name`, spawning one if there is none or the
    /// registered one has shut down.
    fn handle(&self, name: &str) -> ServerHandle {
        let mut actors = self.inner.actors.lock();
        match actors.get(name) {
            Some(handle) if !handle.is_closed() => handle.clone(),
            _ => {
                let handle = ServerHandle::spawn(name.to_string(), self.inner.shared.clone());
                actors.insert(name.to_string(), handle.clone());
                handle
            }
        }
    }

    /// Start a connect cycle for `config` on its actor and wait until the
    /// first attempt is in flight. A cycle queued behind a shutdown is moved
    /// to a fresh actor, which only exists once the teardown has finished.
    async fn start_connect(&self, config: &ServerConfig) -> (ServerHandle, oneshot::Receiver<bool>) {
        loop {
            let handle = self.handle(&config.name);
            if let Some(outcome) = handle.begin_connect(config.clone()).await {
                return (handle, outcome);
            }
            debug!(server = %config.name, "Actor shut down before connect started, retrying");
        }
    }

    /// Connect every server, lowest `priority` first, and start a liveness
    /// monitor for each one that connected. Never fails as a whole.
    pub async fn connect_multiple(&self, configs: Vec<ServerConfig>) -> HashMap<String, bool> {
        let mut ordered = configs;
        ordered.sort_by_key(|c| c.priority);

        // Each attempt is in flight before the next server is started; the
        // cycles then run concurrently.
        let mut attempts = Vec::with_capacity(ordered.len());
        for config in ordered {
            self.inner.shared.register(&config.name);
            let (handle, outcome) = self.start_connect(&config).await;
            let name = config.name;
            attempts.push(async move {
                let connected = outcome.await.unwrap_or(false);
                if connected {
                    handle.start_monitor().await;
                }
                (name, connected)
            });
        }

        let results: HashMap<String, bool> = join_all(attempts).await.into_iter().collect();
        let connected = results.values().filter(|ok| **ok).count();
        info!(total = results.len(), connected, "Connected servers");
        results
    }

    /// One connect cycle for `config`. Does not start a liveness monitor;
    /// see [`ConnectionSupervisor::start_monitor`].
    pub async fn connect_single(&self, config: ServerConfig) -> bool {
        self.inner.shared.register(&config.name);
        let (_, outcome) = self.start_connect(&config).await;
        outcome.await.unwrap_or(false)
    }

    /// Start probing `name` periodically. No-op for unknown names or a
    /// monitor that is already running.
    pub async fn start_monitor(&self, name: &str) {
        let handle = self.inner.actors.lock().get(name).cloned();
        match handle {
            Some(handle) => handle.start_monitor().await,
            None => debug!(server = %name, "No server to monitor"),
        }
    }

    /// Stop probing `name` without disconnecting it.
    pub async fn stop_monitor(&self, name: &str) {
        let handle = self.inner.actors.lock().get(name).cloned();
        if let Some(handle) = handle {
            handle.stop_monitor().await;
        }
    }

    /// Stop the monitor, close the transport and forget the status of
    /// `name`. Disconnecting an unknown name is a no-op.
    pub async fn disconnect(&self, name: &str) {
        // The handle stays registered until the actor has torn down, so
        // concurrent work for `name` queues behind the teardown.
        let handle = self.inner.actors.lock().get(name).cloned();
        let existed = match handle {
            Some(handle) => {
                let had_status = handle.shutdown().await;
                let mut actors = self.inner.actors.lock();
                if actors.get(name).is_some_and(|h| h.same_actor(&handle)) {
                    actors.remove(name);
                }
                had_status
            }
            None => {
                self.inner.shared.factory.close_transport(name).await;
                self.inner.shared.remove(name)
            }
        };

        if existed {
            info!(server = %name, "Server disconnected");
            self.inner.shared.events.emit(ConnectionEvent::Disconnected {
                server: name.to_string(),
            });
        }
    }

    /// Stop every monitor, then close all transports concurrently, then
    /// clear all state.
    pub async fn disconnect_all(&self) {
        let mut names: Vec<String> = self
            .inner
            .shared
            .snapshot()
            .into_iter()
            .map(|s| s.name)
            .collect();
        let handles: Vec<(String, ServerHandle)> = self
            .inner
            .actors
            .lock()
            .iter()
            .map(|(name, handle)| (name.clone(), handle.clone()))
            .collect();
        join_all(handles.iter().map(|(_, handle)| handle.shutdown())).await;
        {
            let mut actors = self.inner.actors.lock();
            for (name, handle) in &handles {
                if actors.get(name).is_some_and(|h| h.same_actor(handle)) {
                    actors.remove(name);
                }
            }
        }

        self.inner.shared.factory.close_all().await;
        names.extend(self.inner.shared.clear());
        names.sort();
        names.dedup();
        for name in names {
            self.inner
                .shared
                .events
                .emit(ConnectionEvent::Disconnected { server: name });
        }
        info!("All servers disconnected");
    }

    /// Connect `name` again from the config it was last connected with and
    /// restart its monitor.
    pub async fn reconnect(&self, name: &str) -> ToolmeshResult<bool> {
        let config = self
            .inner
            .shared
            .factory
            .stored_config(name)
            .ok_or_else(|| ToolmeshError::UnknownServer(name.to_string()))?;

        self.inner.shared.register(name);
        let (handle, outcome) = self.start_connect(&config).await;
        let connected = outcome.await.unwrap_or(false);
        if connected {
            handle.start_monitor().await;
        }
        Ok(connected)
    }

    /// Status of every known server, in registration order.
    pub fn get_connection_statuses(&self) -> Vec<ConnectionStatus> {
        self.inner.shared.snapshot()
    }

    /// Status of one server.
    pub fn status(&self, name: &str) -> Option<ConnectionStatus> {
        self.inner.shared.get(name)
    }

    /// Live transport of one server.
    pub fn transport(&self, name: &str) -> Option<Arc<dyn Transport>> {
        self.inner.shared.factory.get_transport(name)
    }
}
