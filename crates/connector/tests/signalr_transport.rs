//! SignalR transport against a local mock hub

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use base64::Engine;
use bxfeed_connector_lib::hub::protocol::{parse_frame, InboundFrame};
use bxfeed_connector_lib::hub::{HubTransport, SignalrTransport, TransportEvent};
use bxfeed_connector_lib::{
    handler_fn, ClientConfig, ConnectorError, FeedEvent, HandlerRegistry, HandlerResult,
    SubscriptionClient,
};
use flate2::write::DeflateEncoder;
use flate2::Compression;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::io::Write;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

const TOKEN: &str = "token-1";

#[derive(Clone, Default)]
struct MockHub {
    started: Arc<Mutex<Vec<HashMap<String, String>>>>,
}

async fn negotiate(Query(params): Query<HashMap<String, String>>) -> impl IntoResponse {
    if params.get("clientProtocol").map(String::as_str) != Some("1.5") {
        return (StatusCode::BAD_REQUEST, Json(json!({})));
    }
    (
        StatusCode::OK,
        Json(json!({"ConnectionToken": TOKEN, "ConnectionId": "c-1", "KeepAliveTimeout": 20.0})),
    )
}

async fn start(
    State(hub): State<MockHub>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<Value> {
    hub.started.lock().unwrap().push(params);
    Json(json!({"Response": "started"}))
}

async fn connect(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    if params.get("connectionToken").map(String::as_str) != Some(TOKEN) {
        return StatusCode::FORBIDDEN.into_response();
    }
    ws.on_upgrade(serve_socket)
}

fn compressed(value: &Value) -> String {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(value.to_string().as_bytes()).unwrap();
    base64::engine::general_purpose::STANDARD.encode(encoder.finish().unwrap())
}

fn push(method: &str, args: Value) -> Message {
    Message::Text(json!({"C": "d-1", "M": [{"H": "C3", "M": method, "A": args}]}).to_string())
}

/// Answers Subscribe with success for every channel, then heartbeats and
/// one ticker push
async fn serve_socket(mut socket: WebSocket) {
    socket.send(Message::Text(json!({"C": "d-0", "S": 1, "M": []}).to_string())).await.ok();
    while let Some(Ok(message)) = socket.recv().await {
        let Message::Text(text) = message else {
            continue;
        };
        let invocation: Value = serde_json::from_str(&text).unwrap();
        let id = invocation["I"].to_string();
        let result = match invocation["M"].as_str() {
            Some("Subscribe") => {
                let channels = invocation["A"][0].as_array().map_or(0, Vec::len);
                json!(vec![json!({"Success": true, "ErrorCode": null}); channels])
            }
            _ => json!({"Success": false, "ErrorCode": "UNKNOWN_METHOD"}),
        };
        let reply = json!({"R": result, "I": id.trim_matches('"')});
        if socket.send(Message::Text(reply.to_string())).await.is_err() {
            return;
        }
        if invocation["M"] == "Subscribe" {
            break;
        }
    }

    let ticker = json!({"symbol": "BTC-USD", "lastTradeRate": "43000", "bidRate": "42999", "askRate": "43001"});
    socket.send(push("ticker", json!([compressed(&ticker)]))).await.ok();
    loop {
        if socket.send(push("heartbeat", json!([]))).await.is_err() {
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(100)) => {}
            message = socket.recv() => match message {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
                _ => {}
            },
        }
    }
}

async fn spawn_hub(hub: MockHub) -> SocketAddr {
    let app = Router::new()
        .route("/signalr/negotiate", get(negotiate))
        .route("/signalr/start", get(start))
        .route("/signalr/connect", get(connect))
        .with_state(hub);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn next_frame(inbound: &mut mpsc::Receiver<TransportEvent>) -> InboundFrame {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), inbound.recv())
            .await
            .expect("timed out waiting for frame")
            .expect("inbound closed");
        let TransportEvent::Frame(text) = event else {
            panic!("unexpected transport event");
        };
        match parse_frame(&text).unwrap() {
            InboundFrame::Other | InboundFrame::KeepAlive => continue,
            InboundFrame::Pushes(pushes) if pushes.is_empty() => continue,
            frame => return frame,
        }
    }
}

#[tokio::test]
async fn test_handshake_and_invoke_round_trip() {
    let hub = MockHub::default();
    let addr = spawn_hub(hub.clone()).await;
    let transport = SignalrTransport::new(&format!("http://{}/signalr", addr)).unwrap();

    let mut connection = transport.connect("c3").await.unwrap();
    {
        let started = hub.started.lock().unwrap();
        assert_eq!(started.len(), 1);
        assert_eq!(started[0]["connectionToken"], TOKEN);
        assert_eq!(started[0]["connectionData"], r#"[{"name":"c3"}]"#);
        assert_eq!(started[0]["transport"], "webSockets");
    }

    let invocation = json!({"H": "c3", "M": "Subscribe", "A": [["heartbeat"]], "I": 0});
    connection.outbound.send(invocation.to_string()).await.unwrap();

    match next_frame(&mut connection.inbound).await {
        InboundFrame::Response { id, result } => {
            assert_eq!(id, Some(0));
            assert_eq!(result, json!([{"Success": true, "ErrorCode": null}]));
        }
        other => panic!("expected response, got {:?}", other),
    }
    match next_frame(&mut connection.inbound).await {
        InboundFrame::Pushes(pushes) => assert_eq!(pushes[0].method, "ticker"),
        other => panic!("expected pushes, got {:?}", other),
    }
}

#[tokio::test]
async fn test_negotiate_failure_is_connection_failure() {
    let app = Router::new().route(
        "/signalr/negotiate",
        get(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let transport = SignalrTransport::new(&format!("http://{}/signalr", addr)).unwrap();
    let result = transport.connect("c3").await;
    assert!(matches!(result, Err(ConnectorError::ConnectionFailed(_))));
}

#[tokio::test]
async fn test_subscription_client_over_signalr() {
    let addr = spawn_hub(MockHub::default()).await;
    let transport = SignalrTransport::new(&format!("http://{}/signalr", addr)).unwrap();
    let client = Arc::new(SubscriptionClient::new(
        transport,
        ClientConfig {
            feed: "it".to_string(),
            heartbeat_timeout: Duration::from_secs(2),
            ..ClientConfig::default()
        },
    ));

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let registry = Arc::new(HandlerRegistry::new().on(
        "ticker",
        handler_fn(move |event: Arc<FeedEvent>| {
            let events_tx = events_tx.clone();
            async move {
                events_tx.send(event).ok();
                HandlerResult::Ok(())
            }
        }),
    ));

    let listener = Arc::clone(&client);
    let session = tokio::spawn(async move {
        listener
            .listen(vec!["ticker_BTC-USD".to_string()], registry)
            .await
    });

    let event = tokio::time::timeout(Duration::from_secs(5), events_rx.recv())
        .await
        .unwrap()
        .unwrap();
    let FeedEvent::Ticker(ticker) = event.as_ref() else {
        panic!("expected ticker event");
    };
    assert_eq!(ticker.symbol, "BTC-USD");
    assert!(client.connected_handle().load(std::sync::atomic::Ordering::SeqCst));

    client.stop();
    let result = tokio::time::timeout(Duration::from_secs(5), session)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());
}
