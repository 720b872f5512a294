#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;
use toolmesh_core::{
    AuthConfig, AuthKind, ConnectionEvent, EndpointConfig, EventSink, ToolmeshError,
    TransportEvent, TransportEvents,
};
use toolmesh_transport::{call_tool, list_tools, HttpTransport, StreamTransport, Transport};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn endpoint(url: String) -> EndpointConfig {
    EndpointConfig {
        url,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_list_tools_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rpc"))
        .and(body_partial_json(serde_json::json!({"method": "tools/list"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": {"tools": [{"name": "search", "description": "Web search"}]}
        })))
        .mount(&server)
        .await;

    let transport = HttpTransport::new(
        "web",
        &endpoint(format!("{}/rpc", server.uri())),
        Duration::from_secs(5),
        TransportEvents::detached("web"),
    )
    .unwrap();

    assert!(transport.is_connected());
    let tools = list_tools(&transport).await.unwrap();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].name, "search");
}

#[tokio::test]
async fn test_auth_and_custom_headers_are_sent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(header("authorization", "Bearer secret"))
        .and(header("x-client", "toolmesh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "result": {"content": [{"type": "text", "text": "ok"}]}
        })))
        .mount(&server)
        .await;

    let mut config = endpoint(server.uri());
    config.headers.insert("X-Client".into(), "toolmesh".into());
    config.auth = Some(AuthConfig {
        kind: AuthKind::Bearer,
        value: "secret".into(),
    });

    let transport = HttpTransport::new(
        "web",
        &config,
        Duration::from_secs(5),
        TransportEvents::detached("web"),
    )
    .unwrap();
    let result = call_tool(&transport, "search", serde_json::json!({"q": "rust"}))
        .await
        .unwrap();
    assert_eq!(result["content"][0]["text"], "ok");
}

#[tokio::test]
async fn test_error_status_is_http_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .mount(&server)
        .await;

    let (sink, mut rx) = EventSink::channel(8);
    let transport = HttpTransport::new(
        "web",
        &endpoint(server.uri()),
        Duration::from_secs(5),
        sink.for_server("web"),
    )
    .unwrap();

    let err = transport.send("tools/list", None).await.unwrap_err();
    assert!(matches!(err, ToolmeshError::Http(ref m) if m.contains("503")));

    // Connected first, then the error.
    assert!(matches!(
        rx.recv().await.unwrap(),
        ConnectionEvent::Transport { event: TransportEvent::Connected, .. }
    ));
    assert!(matches!(
        rx.recv().await.unwrap(),
        ConnectionEvent::Transport { event: TransportEvent::Error(_), .. }
    ));
}

#[tokio::test]
async fn test_malformed_body_is_transport_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>not json</html>"))
        .mount(&server)
        .await;

    let transport = HttpTransport::new(
        "web",
        &endpoint(server.uri()),
        Duration::from_secs(5),
        TransportEvents::detached("web"),
    )
    .unwrap();
    let err = transport.send("tools/list", None).await.unwrap_err();
    assert!(matches!(err, ToolmeshError::Transport(_)));
}

#[tokio::test]
async fn test_tool_error_result() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "result": {"content": [{"type": "text", "text": "rate limited"}], "isError": true}
        })))
        .mount(&server)
        .await;

    let transport = HttpTransport::new(
        "web",
        &endpoint(server.uri()),
        Duration::from_secs(5),
        TransportEvents::detached("web"),
    )
    .unwrap();
    match call_tool(&transport, "search", serde_json::json!({})).await {
        Err(ToolmeshError::Tool { server, message }) => {
            assert_eq!(server, "web");
            assert_eq!(message, "rate limited");
        }
        other => panic!("expected tool error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_closed_http_transport_refuses_requests() {
    let transport = HttpTransport::new(
        "web",
        &endpoint("http://127.0.0.1:1".into()),
        Duration::from_secs(1),
        TransportEvents::detached("web"),
    )
    .unwrap();
    transport.close().await;
    transport.close().await;
    assert!(!transport.is_connected());
    assert!(matches!(
        transport.send("tools/list", None).await.unwrap_err(),
        ToolmeshError::NotConnected(_)
    ));
}

#[tokio::test]
async fn test_event_stream_forwards_messages() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/events"))
        .and(header("accept", "text/event-stream"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(
                    ": hello\n\ndata: {\"progress\":10}\n\nevent: done\ndata: finished\n\n",
                ),
        )
        .mount(&server)
        .await;

    let (sink, mut rx) = EventSink::channel(16);
    let transport = StreamTransport::connect(
        "feed",
        &endpoint(format!("{}/events", server.uri())),
        Duration::from_secs(5),
        sink.for_server("feed"),
    )
    .await
    .unwrap();

    let mut messages = Vec::new();
    let mut disconnected = false;
    while let Ok(Some(event)) = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
        match event {
            ConnectionEvent::Transport {
                event: TransportEvent::Message(v),
                ..
            } => messages.push(v),
            ConnectionEvent::Transport {
                event: TransportEvent::Disconnected(_),
                ..
            } => {
                disconnected = true;
                break;
            }
            _ => {}
        }
    }

    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["progress"], 10);
    assert_eq!(messages[1]["event"], "done");
    assert_eq!(messages[1]["data"], "finished");
    assert!(disconnected);
    assert!(!transport.is_connected());
    assert!(transport.probe().await.is_err());
}

#[tokio::test]
async fn test_event_stream_cannot_send() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(": idle\n\n"),
        )
        .mount(&server)
        .await;

    let transport = StreamTransport::connect(
        "feed",
        &endpoint(server.uri()),
        Duration::from_secs(5),
        TransportEvents::detached("feed"),
    )
    .await
    .unwrap();

    let err = transport.send("tools/call", None).await.unwrap_err();
    assert!(matches!(err, ToolmeshError::Unsupported(_)));
    transport.close().await;
    assert!(!transport.is_connected());
}

#[tokio::test]
async fn test_event_stream_error_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let err = StreamTransport::connect(
        "feed",
        &endpoint(server.uri()),
        Duration::from_secs(5),
        TransportEvents::detached("feed"),
    )
    .await
    .err()
    .unwrap();
    assert!(matches!(err, ToolmeshError::Http(_)));
}
