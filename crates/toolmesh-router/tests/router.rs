#![allow(clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use toolmesh_core::{
    ChainMode, ConnectionEvent, EventSink, ServerConfig, StepOutcome, ToolCallSpec, ToolChain,
    ToolmeshError, ToolmeshResult, TransportEvents, TransportKind,
};
use toolmesh_router::{ChainSettings, ToolRouter};
use toolmesh_supervisor::{ConnectionSupervisor, SupervisorSettings};
use toolmesh_transport::{Connector, Transport, TransportFactory};

/// Shared script for every fake server.
#[derive(Default)]
struct Script {
    /// Servers whose tool calls fail.
    broken: Mutex<HashSet<String>>,
    /// Servers that refuse to connect.
    unreachable: Mutex<HashSet<String>>,
    /// `(server, tool)` for every tool call received.
    calls: Mutex<Vec<(String, String)>>,
    /// Calls to `slow` that still report `running`.
    slow_polls_left: AtomicU32,
}

struct FakeServer {
    name: String,
    script: Arc<Script>,
}

#[async_trait]
impl Transport for FakeServer {
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
        if method != "tools/call" {
            return Ok(serde_json::json!({"tools": []}));
        }
        let params = params.unwrap_or_default();
        let tool = params["name"].as_str().unwrap_or_default().to_string();
        self.script
            .calls
            .lock()
            .push((self.name.clone(), tool.clone()));

        if self.script.broken.lock().contains(&self.name) || tool == "boom" {
            return Err(ToolmeshError::Tool {
                server: self.name.clone(),
                message: format!("{tool} exploded"),
            });
        }
        if tool == "flagged" {
            return Ok(serde_json::json!({
                "content": [{"type": "text", "text": "bad input"}],
                "isError": true
            }));
        }
        if tool == "slow" {
            let left = self.script.slow_polls_left.load(Ordering::SeqCst);
            if left > 0 {
                self.script.slow_polls_left.store(left - 1, Ordering::SeqCst);
                return Ok(serde_json::json!({"status": "running"}));
            }
            return Ok(serde_json::json!({"status": "completed", "server": self.name}));
        }

        Ok(serde_json::json!({
            "server": self.name,
            "tool": tool,
            "arguments": params["arguments"],
        }))
    }

    fn is_connected(&self) -> bool {
        true
    }

    async fn close(&self) {}
}

struct FakeConnector {
    script: Arc<Script>,
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(
        &self,
        config: &ServerConfig,
        _events: TransportEvents,
    ) -> ToolmeshResult<Arc<dyn Transport>> {
        if self.script.unreachable.lock().contains(&config.name) {
            return Err(ToolmeshError::Transport("unreachable".into()));
        }
        Ok(Arc::new(FakeServer {
            name: config.name.clone(),
            script: self.script.clone(),
        }))
    }
}

struct Harness {
    router: ToolRouter,
    script: Arc<Script>,
    events: mpsc::Receiver<ConnectionEvent>,
}

async fn harness(servers: &[&str], configure: impl FnOnce(&Script)) -> Harness {
    let script = Arc::new(Script::default());
    configure(&script);

    let settings = SupervisorSettings {
        health_interval_ms: 60_000,
        retry_base_delay_ms: 1,
        retry_max_delay_ms: 1,
        event_capacity: 64,
    };
    let (sink, events) = EventSink::channel(settings.event_capacity);
    let connector = Arc::new(FakeConnector {
        script: script.clone(),
    });
    let factory = Arc::new(TransportFactory::with_connector(connector, sink.clone()));
    let supervisor = ConnectionSupervisor::with_factory(factory, sink, settings);

    let configs = servers
        .iter()
        .enumerate()
        .map(|(i, name)| {
            ServerConfig::http(*name, format!("http://{name}.local"))
                .with_priority(i as u32)
                .with_max_retries(1)
        })
        .collect();
    supervisor.connect_multiple(configs).await;

    let router = ToolRouter::new(
        supervisor,
        ChainSettings {
            completion_poll_attempts: 5,
            completion_poll_interval_ms: 1,
        },
    );
    Harness {
        router,
        script,
        events,
    }
}

fn failovers(rx: &mut mpsc::Receiver<ConnectionEvent>) -> Vec<(String, String)> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let ConnectionEvent::Failover { from, to, .. } = event {
            out.push((from, to));
        }
    }
    out
}

#[tokio::test]
async fn test_routes_to_first_connected_server() {
    let h = harness(&["primary", "secondary"], |_| {}).await;

    assert_eq!(h.router.select_best_server("search").as_deref(), Some("primary"));
    let result = h
        .router
        .execute_tool("search", serde_json::json!({"q": "rust"}))
        .await
        .unwrap();
    assert_eq!(result["server"], "primary");
    assert_eq!(result["arguments"]["q"], "rust");
}

#[tokio::test]
async fn test_skips_servers_that_never_connected() {
    let h = harness(&["dead", "alive"], |s| {
        s.unreachable.lock().insert("dead".into());
    })
    .await;

    assert_eq!(h.router.select_best_server("search").as_deref(), Some("alive"));
    let result = h.router.execute_tool("search", serde_json::json!({})).await.unwrap();
    assert_eq!(result["server"], "alive");
}

#[tokio::test]
async fn test_fails_over_once_to_another_server() {
    let mut h = harness(&["a", "b"], |s| {
        s.broken.lock().insert("a".into());
    })
    .await;

    let result = h.router.execute_tool("search", serde_json::json!({})).await.unwrap();
    assert_eq!(result["server"], "b");
    assert_eq!(
        *h.script.calls.lock(),
        vec![("a".to_string(), "search".to_string()), ("b".to_string(), "search".to_string())]
    );
    assert_eq!(failovers(&mut h.events), vec![("a".to_string(), "b".to_string())]);
}

#[tokio::test]
async fn test_is_error_result_triggers_failover() {
    let h = harness(&["a", "b"], |_| {}).await;

    let err = h
        .router
        .execute_tool("flagged", serde_json::json!({}))
        .await
        .unwrap_err();
    // Both servers flag the call, so the backup's error surfaces.
    match err {
        ToolmeshError::Tool { server, message } => {
            assert_eq!(server, "b");
            assert_eq!(message, "bad input");
        }
        other => panic!("expected tool error, got {other:?}"),
    }
    assert_eq!(h.script.calls.lock().len(), 2);
}

#[tokio::test]
async fn test_single_server_failure_returns_original_error() {
    let mut h = harness(&["only"], |s| {
        s.broken.lock().insert("only".into());
    })
    .await;

    let err = h.router.execute_tool("search", serde_json::json!({})).await.unwrap_err();
    assert!(matches!(err, ToolmeshError::Tool { ref server, .. } if server == "only"));
    assert_eq!(h.script.calls.lock().len(), 1);
    assert!(failovers(&mut h.events).is_empty());
}

#[tokio::test]
async fn test_no_connected_server_makes_no_call() {
    let h = harness(&["x", "y"], |s| {
        s.unreachable.lock().insert("x".into());
        s.unreachable.lock().insert("y".into());
    })
    .await;

    let err = h.router.execute_tool("search", serde_json::json!({})).await.unwrap_err();
    assert!(matches!(err, ToolmeshError::NoAvailableServer(ref t) if t == "search"));
    assert_eq!(err.to_string(), "No available server for tool 'search'");
    assert!(h.script.calls.lock().is_empty());
}

#[tokio::test]
async fn test_parallel_chain_keeps_order_and_isolates_failure() {
    let h = harness(&["only"], |_| {}).await;

    let chain = ToolChain {
        calls: vec![
            ToolCallSpec::new("first", serde_json::json!({"n": 0})),
            ToolCallSpec::new("boom", serde_json::json!({"n": 1})),
            ToolCallSpec::new("third", serde_json::json!({"n": 2})),
        ],
        mode: ChainMode::Parallel,
    };
    let results = h.router.execute_tool_chain(&chain).await;

    assert_eq!(results.len(), 3);
    for (i, step) in results.iter().enumerate() {
        assert_eq!(step.index, i);
        assert_eq!(step.tool_name, chain.calls[i].tool_name);
        assert_eq!(step.is_error(), i == 1);
    }
    assert_eq!(results[2].result().unwrap()["arguments"]["n"], 2);
}

#[tokio::test]
async fn test_sequential_chain_stops_at_first_failure() {
    let h = harness(&["only"], |_| {}).await;

    let chain = ToolChain {
        calls: vec![
            ToolCallSpec::new("first", serde_json::json!({})),
            ToolCallSpec::new("boom", serde_json::json!({})),
            ToolCallSpec::new("never", serde_json::json!({})),
        ],
        mode: ChainMode::Sequential,
    };
    let results = h.router.execute_tool_chain(&chain).await;

    assert!(matches!(results[0].outcome, StepOutcome::Completed { .. }));
    assert!(matches!(results[1].outcome, StepOutcome::Failed { .. }));
    assert_eq!(results[2].outcome, StepOutcome::Skipped);

    let tools: Vec<String> = h.script.calls.lock().iter().map(|(_, t)| t.clone()).collect();
    assert_eq!(tools, vec!["first", "boom"]);
}

#[tokio::test]
async fn test_wait_for_completion_polls_until_done() {
    let h = harness(&["only"], |s| {
        s.slow_polls_left.store(2, Ordering::SeqCst);
    })
    .await;

    let chain = ToolChain {
        calls: vec![
            ToolCallSpec::new("slow", serde_json::json!({})).wait_for_completion(),
            ToolCallSpec::new("after", serde_json::json!({})),
        ],
        mode: ChainMode::Sequential,
    };
    let results = h.router.execute_tool_chain(&chain).await;

    assert_eq!(results[0].result().unwrap()["status"], "completed");
    assert!(!results[1].is_error());
    let tools: Vec<String> = h.script.calls.lock().iter().map(|(_, t)| t.clone()).collect();
    assert_eq!(tools, vec!["slow", "slow", "slow", "after"]);
}

#[tokio::test]
async fn test_wait_for_completion_gives_up() {
    let h = harness(&["only"], |s| {
        s.slow_polls_left.store(100, Ordering::SeqCst);
    })
    .await;

    let chain = ToolChain {
        calls: vec![ToolCallSpec::new("slow", serde_json::json!({})).wait_for_completion()],
        mode: ChainMode::Sequential,
    };
    let results = h.router.execute_tool_chain(&chain).await;

    match &results[0].outcome {
        StepOutcome::Failed { error } => assert!(error.contains("did not complete after 5 polls")),
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(h.script.calls.lock().len(), 5);
}
