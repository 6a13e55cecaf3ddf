use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::connect_async;
use tungstenite::http::StatusCode;
use tungstenite::protocol::Message as WsMessage;
use url::Url;

use super::http::{self, DebugApi, parse_interaction_query};
use super::message::{ClientFrame, decode};
use super::websocket;
use crate::actor::clock;
use crate::broker::message::TickerUpdate;
use crate::broker::publisher::{PublisherHandle, PublisherSnapshot};
use crate::broker::{Broker, Topic};
use crate::config::Settings;
use crate::debug::{InteractionQuery, Operation};
use crate::persistence::Persistence;

fn broker() -> Arc<Broker> {
    Arc::new(
        Broker::start(
            Settings::default(),
            Persistence::temporary().unwrap(),
            clock::system(),
        )
        .unwrap(),
    )
}

async fn wait_for_publisher(
    publisher: &PublisherHandle,
    done: impl Fn(&PublisherSnapshot) -> bool,
) -> PublisherSnapshot {
    for _ in 0..400 {
        let snapshot = publisher.snapshot().await.unwrap();
        if done(&snapshot) {
            return snapshot;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("publisher never settled");
}

async fn gateway(broker: Arc<Broker>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(websocket::serve(listener, broker));
    format!("ws://{addr}{}", websocket::GATEWAY_PATH)
}

#[test]
fn test_decode_frames() {
    assert_eq!(
        decode(WsMessage::text("aapl,msft")),
        ClientFrame::Topics("aapl,msft".into())
    );
    assert_eq!(
        decode(WsMessage::binary(b"googl".to_vec())),
        ClientFrame::Topics("googl".into())
    );
    assert_eq!(
        decode(WsMessage::binary(vec![0xff, 0xfe])),
        ClientFrame::Ignored
    );
    assert_eq!(decode(WsMessage::Ping(Vec::new().into())), ClientFrame::Ignored);
    assert_eq!(decode(WsMessage::Close(None)), ClientFrame::Close);
}

#[test]
fn test_parse_interaction_query() {
    let url = Url::parse(
        "http://localhost/debug/interactions?limit=5&componentId=abc&operation=distribute_ping&since=10",
    )
    .unwrap();
    let query = parse_interaction_query(&url).unwrap();
    assert_eq!(query.limit, Some(5));
    assert_eq!(query.component_id.as_deref(), Some("abc"));
    assert_eq!(query.operation, Some(Operation::DistributePing));
    assert_eq!(query.since, Some(10));

    let empty = Url::parse("http://localhost/debug/interactions").unwrap();
    assert_eq!(parse_interaction_query(&empty).unwrap(), InteractionQuery::default());

    let bad = Url::parse("http://localhost/debug/interactions?limit=lots").unwrap();
    assert!(parse_interaction_query(&bad).is_err());
    let bad = Url::parse("http://localhost/debug/interactions?operation=shout").unwrap();
    assert!(parse_interaction_query(&bad).is_err());
}

#[tokio::test]
async fn test_debug_routes() {
    let broker = broker();
    let api = DebugApi::new(broker.tracker().cloned(), None);

    let stats = api.route("GET", "/debug/stats").await;
    assert_eq!(stats.status, StatusCode::OK);
    assert!(stats.body.is_array());

    let overview = api.route("GET", "/debug/overview").await;
    assert_eq!(overview.status, StatusCode::OK);
    assert_eq!(overview.body["totalMessages"], 0);

    let timeline = api.route("GET", "/debug/timeline?minutes=2").await;
    assert_eq!(timeline.status, StatusCode::OK);

    assert_eq!(
        api.route("GET", "/debug/interactions?limit=x").await.status,
        StatusCode::BAD_REQUEST
    );
    assert_eq!(
        api.route("GET", "/debug/timeline?minutes=-1").await.status,
        StatusCode::BAD_REQUEST
    );
    assert_eq!(
        api.route("DELETE", "/debug/stats").await.status,
        StatusCode::METHOD_NOT_ALLOWED
    );
    assert_eq!(api.route("GET", "/nope").await.status, StatusCode::NOT_FOUND);
    assert_eq!(
        api.route("POST", "/feed").await.status,
        StatusCode::SERVICE_UNAVAILABLE
    );
}

#[tokio::test]
async fn test_debug_routes_without_tracker() {
    let api = DebugApi::default();
    let reply = api.route("GET", "/debug/stats").await;
    assert_eq!(reply.status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(reply.body["error"].is_string());
}

#[tokio::test]
async fn test_debug_api_over_tcp() {
    let broker = broker();
    let api = Arc::new(DebugApi::new(broker.tracker().cloned(), None));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(http::serve(listener, api));

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET /debug/interactions?limit=3 HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await
        .unwrap();
    let mut raw = String::new();
    stream.read_to_string(&mut raw).await.unwrap();

    assert!(raw.starts_with("HTTP/1.1 200 OK\r\n"), "{raw}");
    assert!(raw.contains("Content-Type: application/json"));
    let (_, body) = raw.split_once("\r\n\r\n").unwrap();
    let body: serde_json::Value = serde_json::from_str(body).unwrap();
    assert!(body.is_array());

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(b"GARBAGE\r\n\r\n").await.unwrap();
    let mut raw = String::new();
    stream.read_to_string(&mut raw).await.unwrap();
    assert!(raw.starts_with("HTTP/1.1 400"), "{raw}");
}

#[tokio::test]
async fn test_websocket_round_trip() {
    let broker = broker();
    let url = gateway(broker.clone()).await;
    let (mut ws, _) = connect_async(url.as_str()).await.unwrap();

    ws.send(WsMessage::text(" aapl , googl")).await.unwrap();
    let aapl = broker.publisher(&Topic::parse("AAPL").unwrap()).unwrap();
    wait_for_publisher(&aapl, |s| !s.subscribers.is_empty()).await;

    broker
        .publish(TickerUpdate {
            ticker: "AAPL".into(),
            value: 176.23,
        })
        .await
        .unwrap();

    let frame = ws.next().await.unwrap().unwrap();
    let value: serde_json::Value = serde_json::from_str(frame.to_text().unwrap()).unwrap();
    assert_eq!(value["content"]["ticker"], "AAPL");
    assert_eq!(value["content"]["value"], 176.23);
    assert_eq!(value["publisherId"], aapl.id.to_string());

    ws.close(None).await.unwrap();
    wait_for_publisher(&aapl, |s| s.subscribers.is_empty()).await;
}

#[tokio::test]
async fn test_websocket_rejects_other_paths() {
    let broker = broker();
    let url = gateway(broker).await.replace("/ws", "/elsewhere");
    assert!(connect_async(url.as_str()).await.is_err());
}
