#![cfg(unix)]
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashMap;
use std::time::Duration;
use toolmesh_core::{
    ConnectionEvent, EventSink, ProcessConfig, ToolmeshError, TransportEvent, TransportEvents,
};
use toolmesh_transport::{call_tool, ProcessTransport, Transport};

/// Answers every request line with `{"result": {"greeting": $GREETING}}`.
const ECHO_SERVER: &str = r#"
echo "server starting" >&2
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9]*\).*/\1/p')
  printf '{"jsonrpc":"2.0","method":"notifications/log","params":{"seen":%s}}\n' "$id"
  printf '{"jsonrpc":"2.0","id":%s,"result":{"greeting":"%s"}}\n' "$id" "$GREETING"
done
"#;

fn sh(script: &str) -> ProcessConfig {
    let mut env = HashMap::new();
    env.insert("GREETING".to_string(), "hello".to_string());
    ProcessConfig {
        command: "sh".into(),
        args: vec!["-c".into(), script.into()],
        env,
        cwd: Some(std::env::temp_dir()),
    }
}

#[tokio::test]
async fn test_process_round_trip() {
    let (sink, mut rx) = EventSink::channel(16);
    let transport = ProcessTransport::spawn(
        "local",
        &sh(ECHO_SERVER),
        Duration::from_secs(5),
        sink.for_server("local"),
    )
    .unwrap();
    assert!(transport.is_connected());

    let first = transport.send("tools/list", None).await.unwrap();
    assert_eq!(first["greeting"], "hello");

    let second = call_tool(&transport, "greet", serde_json::json!({})).await.unwrap();
    assert_eq!(second["greeting"], "hello");

    transport.close().await;
    assert!(!transport.is_connected());

    let mut notifications = 0;
    let mut disconnected = 0;
    while let Ok(event) = rx.try_recv() {
        match event {
            ConnectionEvent::Transport {
                event: TransportEvent::Message(v),
                ..
            } => {
                assert_eq!(v["method"], "notifications/log");
                notifications += 1;
            }
            ConnectionEvent::Transport {
                event: TransportEvent::Disconnected(_),
                ..
            } => disconnected += 1,
            _ => {}
        }
    }
    assert_eq!(notifications, 2);
    assert_eq!(disconnected, 1);
}

#[tokio::test]
async fn test_process_exit_disconnects() {
    let (sink, mut rx) = EventSink::channel(16);
    let transport = ProcessTransport::spawn(
        "short",
        &sh("exit 0"),
        Duration::from_secs(5),
        sink.for_server("short"),
    )
    .unwrap();

    let reason = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(ConnectionEvent::Transport {
                event: TransportEvent::Disconnected(reason),
                ..
            }) = rx.recv().await
            {
                return reason;
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(reason.as_deref(), Some("process exited"));
    assert!(!transport.is_connected());
    assert!(matches!(
        transport.send("tools/list", None).await.unwrap_err(),
        ToolmeshError::NotConnected(_)
    ));
}

#[tokio::test]
async fn test_silent_server_times_out() {
    let transport = ProcessTransport::spawn(
        "mute",
        &sh("cat > /dev/null"),
        Duration::from_millis(100),
        TransportEvents::detached("mute"),
    )
    .unwrap();

    let err = transport.send("tools/list", None).await.unwrap_err();
    assert!(matches!(err, ToolmeshError::Timeout(_)));
    transport.close().await;
}
