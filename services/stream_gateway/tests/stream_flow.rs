//! End-to-end streaming tests: a live gateway server, real WebSocket
//! clients, stubbed collaborators.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use stream_gateway::config::{GatewayConfig, SimHolding, SimToken, SimTopic, StoreConfig};
use stream_gateway::sim::{StaticDirectory, StaticVerifier};
use stream_gateway::{Collaborators, GatewayServer, PriceProvider};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use types::PriceQuote;

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// AAA always quotes at 100 against a 98 reference; BBB never quotes.
struct StubProvider;

#[async_trait]
impl PriceProvider for StubProvider {
    async fn fetch(
        &self,
        symbols: &[String],
    ) -> stream_gateway::Result<HashMap<String, PriceQuote>> {
        Ok(symbols
            .iter()
            .filter(|s| s.as_str() == "AAA")
            .map(|s| {
                (
                    s.clone(),
                    PriceQuote::from_reference(s.clone(), 100.0, 98.0, chrono::Utc::now()),
                )
            })
            .collect())
    }
}

fn test_config() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.limiter.store = StoreConfig::Memory;
    config.limiter.capacity = 1000.0;
    config.limiter.refill_per_sec = 1000.0;
    config.poll.trading_interval_secs = 1;
    config.poll.off_hours_interval_secs = 1;
    config.sim.topics = vec![SimTopic {
        id: 1,
        owner_user_id: 10,
        public: false,
        symbols: vec!["AAA".into(), "BBB".into()],
        holdings: vec![SimHolding {
            symbol: "AAA".into(),
            quantity: 2.0,
            cost_basis: Some(95.0),
        }],
    }];
    config.sim.tokens = vec![
        SimToken {
            token: "alpha".into(),
            user_id: 10,
            email: "alpha@example.com".into(),
        },
        SimToken {
            token: "beta".into(),
            user_id: 99,
            email: "beta@example.com".into(),
        },
    ];
    config
}

async fn start_server(config: GatewayConfig) -> SocketAddr {
    let collaborators = Collaborators {
        verifier: Arc::new(StaticVerifier::from_config(&config.sim)),
        directory: Arc::new(StaticDirectory::from_config(&config.sim)),
        provider: Arc::new(StubProvider),
    };
    let server = GatewayServer::new(config, collaborators).unwrap();
    let (addr, serve) = warp::serve(server.routes()).bind_ephemeral(([127, 0, 0, 1], 0));
    tokio::spawn(serve);
    addr
}

async fn connect(addr: SocketAddr, topic: i64, token: &str) -> WsClient {
    let url = format!("ws://{addr}/ws/{topic}?token={token}");
    let (client, _response) = connect_async(url).await.expect("websocket handshake");
    client
}

/// Next text frame as JSON, skipping protocol-level control frames.
async fn next_json(client: &mut WsClient) -> serde_json::Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .expect("socket error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).expect("frame is JSON");
        }
    }
}

/// Next price_update frame, skipping pongs.
async fn next_price_update(client: &mut WsClient) -> serde_json::Value {
    loop {
        let frame = next_json(client).await;
        if frame["type"] == "price_update" {
            return frame;
        }
    }
}

fn assert_topic_one_payload(frame: &serde_json::Value) {
    assert_eq!(frame["type"], "price_update");
    assert_eq!(frame["topic_id"], 1);
    let items = frame["items"].as_array().expect("items array");
    assert_eq!(items.len(), 2);

    assert_eq!(items[0]["symbol"], "AAA");
    assert_eq!(items[0]["price"], 100.0);
    assert_eq!(items[0]["delta"], 2.0);
    assert_eq!(items[0]["quantity"], 2.0);
    assert_eq!(items[0]["market_value"], 200.0);
    assert_eq!(items[0]["unrealized_pnl"], 10.0);

    assert_eq!(items[1]["symbol"], "BBB");
    assert!(items[1]["price"].is_null());
    assert!(items[1]["delta"].is_null());
    assert!(items[1]["unrealized_pnl"].is_null());

    assert!(frame["timestamp"].is_string());
}

#[tokio::test(flavor = "multi_thread")]
async fn two_clients_stream_the_same_topic() {
    let addr = start_server(test_config()).await;

    let mut first = connect(addr, 1, "alpha").await;
    let mut second = connect(addr, 1, "alpha").await;

    // Both get the immediate current-state frame without waiting a tick.
    let initial_first = next_price_update(&mut first).await;
    let initial_second = next_price_update(&mut second).await;
    assert_topic_one_payload(&initial_first);
    assert_topic_one_payload(&initial_second);

    // And both get the worker's broadcast within one poll interval.
    let cycle_first = next_price_update(&mut first).await;
    let cycle_second = next_price_update(&mut second).await;
    assert_topic_one_payload(&cycle_first);
    assert_topic_one_payload(&cycle_second);
    assert_eq!(cycle_first["items"], cycle_second["items"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn one_disconnecting_client_does_not_stop_the_other() {
    let addr = start_server(test_config()).await;

    let mut staying = connect(addr, 1, "alpha").await;
    let mut leaving = connect(addr, 1, "alpha").await;

    next_price_update(&mut staying).await;
    next_price_update(&mut leaving).await;

    leaving.close(None).await.expect("clean close");
    drop(leaving);

    // The surviving client keeps receiving cycles.
    let frame = next_price_update(&mut staying).await;
    assert_topic_one_payload(&frame);
    let frame = next_price_update(&mut staying).await;
    assert_topic_one_payload(&frame);
}

#[tokio::test(flavor = "multi_thread")]
async fn bad_credential_closes_with_4401() {
    let addr = start_server(test_config()).await;
    let mut client = connect(addr, 1, "bogus").await;

    let msg = tokio::time::timeout(Duration::from_secs(5), client.next())
        .await
        .expect("timed out")
        .expect("stream ended")
        .expect("socket error");
    match msg {
        Message::Close(Some(frame)) => {
            assert_eq!(u16::from(frame.code), 4401);
            assert_eq!(frame.reason, "credential rejected");
        }
        other => panic!("expected close frame, got {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn foreign_topic_closes_with_4403() {
    let addr = start_server(test_config()).await;
    // Valid credential, but user 99 does not own topic 1.
    let mut client = connect(addr, 1, "beta").await;

    let msg = tokio::time::timeout(Duration::from_secs(5), client.next())
        .await
        .expect("timed out")
        .expect("stream ended")
        .expect("socket error");
    match msg {
        Message::Close(Some(frame)) => assert_eq!(u16::from(frame.code), 4403),
        other => panic!("expected close frame, got {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_topic_closes_with_4404() {
    let addr = start_server(test_config()).await;
    let mut client = connect(addr, 42, "alpha").await;

    let msg = tokio::time::timeout(Duration::from_secs(5), client.next())
        .await
        .expect("timed out")
        .expect("stream ended")
        .expect("socket error");
    match msg {
        Message::Close(Some(frame)) => assert_eq!(u16::from(frame.code), 4404),
        other => panic!("expected close frame, got {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn keepalive_ping_gets_a_pong() {
    let addr = start_server(test_config()).await;
    let mut client = connect(addr, 1, "alpha").await;

    next_price_update(&mut client).await;

    client
        .send(Message::Text(r#"{"type":"ping"}"#.to_string()))
        .await
        .expect("send ping");

    // The pong may interleave with broadcast frames.
    loop {
        let frame = next_json(&mut client).await;
        if frame["type"] == "pong" {
            break;
        }
        assert_eq!(frame["type"], "price_update");
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn non_keepalive_inbound_content_is_ignored() {
    let addr = start_server(test_config()).await;
    let mut client = connect(addr, 1, "alpha").await;

    next_price_update(&mut client).await;

    client
        .send(Message::Text(r#"{"type":"order","side":"buy"}"#.to_string()))
        .await
        .expect("send junk");

    // Connection stays up and keeps streaming.
    let frame = next_price_update(&mut client).await;
    assert_topic_one_payload(&frame);
}
