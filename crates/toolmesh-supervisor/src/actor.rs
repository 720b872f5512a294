//! One task per server name. Connects, retries, probes and shutdown for a
//! name all run on its actor, so they never overlap.

use crate::state::Shared;
use std::pin::pin;
use std::sync::Arc;
use std::task::Poll;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use toolmesh_core::{ConnectionEvent, ServerConfig, ServerState, ToolmeshError};
use tracing::{debug, error, info, warn};

const COMMAND_QUEUE: usize = 16;

enum Command {
    Connect {
        config: ServerConfig,
        started: oneshot::Sender<()>,
        reply: oneshot::Sender<bool>,
    },
    StartMonitor,
    StopMonitor,
    Shutdown {
        reply: oneshot::Sender<bool>,
    },
}

/// Sending side of a server actor.
#[derive(Clone)]
pub(crate) struct ServerHandle {
    tx: mpsc::Sender<Command>,
}

impl ServerHandle {
    pub(crate) fn spawn(name: String, shared: Arc<Shared>) -> Self {
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE);
        let actor = ServerActor {
            name,
            shared,
            config: None,
        };
        tokio::spawn(actor.run(rx));
        Self { tx }
    }

    /// Queue a connect cycle and wait until its first attempt is under way.
    /// Returns the receiver for the cycle's outcome, or `None` if the actor
    /// shut down before the cycle started.
    pub(crate) async fn begin_connect(
        &self,
        config: ServerConfig,
    ) -> Option<oneshot::Receiver<bool>> {
        let (started, started_rx) = oneshot::channel();
        let (reply, reply_rx) = oneshot::channel();
        self.tx
            .send(Command::Connect {
                config,
                started,
                reply,
            })
            .await
            .ok()?;
        started_rx.await.ok()?;
        Some(reply_rx)
    }

    /// Whether the actor behind this handle has stopped.
    pub(crate) fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub(crate) fn same_actor(&self, other: &ServerHandle) -> bool {
        self.tx.same_channel(&other.tx)
    }

    pub(crate) async fn start_monitor(&self) {
        let _ = self.tx.send(Command::StartMonitor).await;
    }

    pub(crate) async fn stop_monitor(&self) {
        let _ = self.tx.send(Command::StopMonitor).await;
    }

    /// Once queued work is done, stop the monitor, close the transport,
    /// drop the status entry and end the actor. Returns whether a status
    /// entry existed.
    pub(crate) async fn shutdown(&self) -> bool {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Command::Shutdown { reply }).await.is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }
}

struct ServerActor {
    name: String,
    shared: Arc<Shared>,
    config: Option<ServerConfig>,
}

impl ServerActor {
    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        let mut monitor: Option<Interval> = None;

        loop {
            tokio::select! {
                command = rx.recv() => match command {
                    Some(Command::Connect { config, started, reply }) => {
                        let connected = self.connect(config, Some(started)).await;
                        let _ = reply.send(connected);
                    }
                    Some(Command::StartMonitor) => {
                        if monitor.is_none() {
                            monitor = Some(self.new_interval());
                            debug!(server = %self.name, "Liveness monitor started");
                        }
                    }
                    Some(Command::StopMonitor) => {
                        if monitor.take().is_some() {
                            debug!(server = %self.name, "Liveness monitor stopped");
                        }
                    }
                    Some(Command::Shutdown { reply }) => {
                        drop(monitor.take());
                        self.shared.factory.close_transport(&self.name).await;
                        let had_status = self.shared.remove(&self.name);
                        let _ = reply.send(had_status);
                        break;
                    }
                    None => break,
                },
                () = next_tick(&mut monitor) => self.probe().await,
            }
        }

        debug!(server = %self.name, "Server actor stopped");
    }

    fn new_interval(&self) -> Interval {
        let period = self.shared.settings.health_interval().max(Duration::from_millis(1));
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        interval
    }

    /// Up to `max_retries` attempts with capped exponential backoff.
    /// `started` fires once the first attempt has reached the connector.
    async fn connect(
        &mut self,
        config: ServerConfig,
        mut started: Option<oneshot::Sender<()>>,
    ) -> bool {
        self.config = Some(config.clone());
        let shared = &self.shared;
        let name = self.name.as_str();
        let attempts = config.max_retries.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            shared.upsert(name, |s| s.status = ServerState::Connecting);
            shared.events.emit(ConnectionEvent::Connecting {
                server: name.to_string(),
                attempt,
            });

            let mut attempt_fut = pin!(tokio::time::timeout(
                config.timeout(),
                shared.factory.create_transport(name, &config)
            ));
            // Poll once so the attempt is in flight before the caller moves
            // on to the next server.
            let first = futures_util::poll!(attempt_fut.as_mut());
            if let Some(started) = started.take() {
                let _ = started.send(());
            }
            let outcome = match first {
                Poll::Ready(outcome) => outcome,
                Poll::Pending => attempt_fut.await,
            };
            let error = match outcome {
                Ok(Ok(_)) => {
                    let connection_id = shared.upsert(name, |s| {
                        s.mark_connected();
                        s.connection_id
                    });
                    info!(server = %name, attempt, "Server connected");
                    if let Some(connection_id) = connection_id {
                        shared.events.emit(ConnectionEvent::Connected {
                            server: name.to_string(),
                            connection_id,
                        });
                    }
                    return true;
                }
                Ok(Err(e)) => e.to_string(),
                Err(_) => ToolmeshError::Timeout(format!(
                    "connect to '{name}' exceeded {}ms",
                    config.timeout_ms
                ))
                .to_string(),
            };

            shared.upsert(name, |s| s.retry_attempts += 1);
            if attempt < attempts {
                let delay = shared.settings.retry_delay(attempt);
                let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
                warn!(server = %name, attempt, delay_ms, error = %error, "Connect failed, retrying");
                shared.events.emit(ConnectionEvent::Retrying {
                    server: name.to_string(),
                    attempt,
                    delay_ms,
                    error: error.clone(),
                });
                tokio::time::sleep(delay).await;
            }
            last_error = error;
        }

        error!(server = %name, attempts, error = %last_error, "Connect failed, giving up");
        shared.upsert(name, |s| s.mark_error(last_error.clone()));
        shared.events.emit(ConnectionEvent::ConnectFailed {
            server: name.to_string(),
            attempts,
            error: last_error,
        });
        false
    }

    /// One liveness probe. A failure marks the server `error` and runs a
    /// connect cycle with its original config.
    async fn probe(&mut self) {
        let Some(config) = self.config.clone() else {
            return;
        };

        let started = Instant::now();
        let result = match self.shared.factory.get_transport(&self.name) {
            Some(transport) => tokio::time::timeout(config.timeout(), transport.probe())
                .await
                .unwrap_or_else(|_| {
                    Err(ToolmeshError::Timeout(format!(
                        "probe of '{}' exceeded {}ms",
                        self.name, config.timeout_ms
                    )))
                }),
            None => Err(ToolmeshError::NotConnected(format!(
                "no transport for '{}'",
                self.name
            ))),
        };

        match result {
            Ok(()) => {
                let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
                self.shared.modify(&self.name, |s| s.mark_alive(latency_ms));
                debug!(server = %self.name, latency_ms, "Liveness probe ok");
            }
            Err(e) => {
                let message = e.to_string();
                warn!(server = %self.name, error = %message, "Liveness probe failed");
                self.shared.modify(&self.name, |s| s.mark_error(message.clone()));
                self.shared.events.emit(ConnectionEvent::HealthCheckFailed {
                    server: self.name.clone(),
                    error: message,
                });
                self.connect(config, None).await;
            }
        }
    }
}

async fn next_tick(monitor: &mut Option<Interval>) {
    match monitor {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
