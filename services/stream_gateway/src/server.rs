//! WebSocket gateway server.
//!
//! One streaming endpoint per topic: `GET /ws/{topic_id}?token=...`.
//! The connection handler verifies the credential, authorizes the topic,
//! sends the immediate current-state frame, then relays registry frames
//! out and keepalive pings in until the client goes away. Authorization
//! failures close the socket with an explicit application code before the
//! connection ever reaches the registry; everything below that boundary
//! is absorbed and logged inside the core.

use crate::auth::CredentialVerifier;
use crate::config::{GatewayConfig, StoreConfig};
use crate::directory::TopicDirectory;
use crate::registry::{ConnectionHandle, ConnectionRegistry};
use crate::source::{PriceProvider, PriceSource};
use crate::worker::build_update;
use crate::{GatewayError, Result};
use chrono::Utc;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use metrics::counter;
use ratelimit::{BucketStore, MemoryBucketStore, RedisBucketStore, TokenBucket};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};
use types::{ClientFrame, Principal, PriceUpdate, StreamFrame, TopicId, TopicSnapshot};
use warp::ws::{Message, WebSocket};
use warp::Filter;

/// Close codes for connect-time rejection, in the application range.
const CLOSE_BAD_CREDENTIAL: u16 = 4401;
const CLOSE_UNAUTHORIZED: u16 = 4403;
const CLOSE_UNKNOWN_TOPIC: u16 = 4404;

/// The external collaborators this core consumes, injected at startup.
pub struct Collaborators {
    pub verifier: Arc<dyn CredentialVerifier>,
    pub directory: Arc<dyn TopicDirectory>,
    pub provider: Arc<dyn PriceProvider>,
}

struct AppState {
    registry: Arc<ConnectionRegistry>,
    verifier: Arc<dyn CredentialVerifier>,
    directory: Arc<dyn TopicDirectory>,
    source: Arc<PriceSource>,
    limiter: Arc<TokenBucket>,
    heartbeat: Duration,
}

/// Query parameters on the stream endpoint.
#[derive(Debug, Deserialize)]
struct StreamQuery {
    token: Option<String>,
}

pub struct GatewayServer {
    bind_address: String,
    port: u16,
    state: Arc<AppState>,
}

impl GatewayServer {
    pub fn new(config: GatewayConfig, collaborators: Collaborators) -> Result<Self> {
        let store: Arc<dyn BucketStore> = match &config.limiter.store {
            StoreConfig::Redis { url } => Arc::new(RedisBucketStore::new(url)?),
            StoreConfig::Memory => Arc::new(MemoryBucketStore::new()),
        };
        let limiter = Arc::new(TokenBucket::new(config.limiter.bucket_config(), store));
        let source = Arc::new(PriceSource::new(
            collaborators.provider,
            limiter.clone(),
            config.limiter.acquire_timeout(),
        ));
        let registry = Arc::new(ConnectionRegistry::new(
            collaborators.directory.clone(),
            source.clone(),
            config.poll.schedule(),
            config.max_connections,
        ));

        Ok(Self {
            bind_address: config.bind_address.clone(),
            port: config.port,
            state: Arc::new(AppState {
                registry,
                verifier: collaborators.verifier,
                directory: collaborators.directory,
                source,
                limiter,
                heartbeat: Duration::from_secs(config.heartbeat_interval_secs),
            }),
        })
    }

    /// The warp filter tree: stream endpoint plus health and status.
    pub fn routes(
        &self,
    ) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
        let state = self.state.clone();
        let with_state = warp::any().map(move || state.clone());

        let ws_route = warp::path!("ws" / i64)
            .and(warp::query::<StreamQuery>())
            .and(warp::ws())
            .and(with_state.clone())
            .map(
                |topic_id: i64, query: StreamQuery, ws: warp::ws::Ws, state: Arc<AppState>| {
                    ws.on_upgrade(move |socket| {
                        handle_connection(socket, TopicId(topic_id), query.token, state)
                    })
                },
            );

        let health_route = warp::path("health")
            .map(|| warp::reply::with_status("OK", warp::http::StatusCode::OK));

        let status_route = warp::path("status")
            .and(with_state)
            .and_then(status_handler);

        ws_route.or(health_route).or(status_route)
    }

    /// Serve until the surrounding task is cancelled.
    pub async fn run(&self) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.bind_address, self.port)
            .parse()
            .map_err(|e| GatewayError::Configuration {
                message: format!("invalid bind address: {e}"),
            })?;
        info!(%addr, "stream gateway listening");
        warp::serve(self.routes()).run(addr).await;
        Ok(())
    }
}

async fn status_handler(
    state: Arc<AppState>,
) -> std::result::Result<impl warp::Reply, warp::Rejection> {
    let limiter = state.limiter.get_stats().await.ok();
    let body = serde_json::json!({
        "status": "running",
        "service": "stream-gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "connections": state.registry.connection_count().await,
        "topics": state.registry.topic_count().await,
        "rate_limiter": limiter,
    });
    Ok(warp::reply::json(&body))
}

async fn handle_connection(
    socket: WebSocket,
    topic: TopicId,
    token: Option<String>,
    state: Arc<AppState>,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let principal = match authenticate(&state, topic, token.as_deref()).await {
        Ok(principal) => principal,
        Err(e) => {
            let (code, reason) = close_for(&e);
            counter!("gateway_rejected_connections_total").increment(1);
            info!(topic = %topic, code, reason, "connection rejected");
            let _ = ws_tx.send(Message::close_with(code, reason)).await;
            return;
        }
    };

    let (tx, mut rx) = mpsc::unbounded_channel();
    let connection = ConnectionHandle::new(principal.clone(), tx);
    let connection_id = connection.id();

    let cached = match state.registry.subscribe(topic, connection).await {
        Ok(cached) => cached,
        Err(e) => {
            warn!(topic = %topic, error = %e, "subscription refused");
            let _ = ws_tx
                .send(Message::close_with(1013u16, "subscription refused"))
                .await;
            return;
        }
    };
    counter!("gateway_connections_total").increment(1);
    info!(topic = %topic, connection = %connection_id, user = principal.user_id, "client connected");

    // Immediate current-state frame: the topic's cached last broadcast,
    // or one fresh fetch when this subscriber is the one waking the topic.
    let initial = match cached {
        Some(update) => update,
        None => initial_snapshot(&state, topic).await,
    };
    if !send_frame(&mut ws_tx, &StreamFrame::PriceUpdate(initial)).await {
        state.registry.unsubscribe(topic, connection_id).await;
        return;
    }

    let mut heartbeat = interval(state.heartbeat);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick of a tokio interval fires immediately; consume it.
    heartbeat.tick().await;

    loop {
        tokio::select! {
            frame = rx.recv() => {
                match frame {
                    Some(frame) => {
                        if !send_frame(&mut ws_tx, &frame).await {
                            break;
                        }
                    }
                    // Registry dropped our handle.
                    None => break,
                }
            }
            inbound = ws_rx.next() => {
                match inbound {
                    Some(Ok(msg)) => {
                        if !handle_inbound(&mut ws_tx, msg).await {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        debug!(connection = %connection_id, error = %e, "socket error");
                        break;
                    }
                    None => break,
                }
            }
            _ = heartbeat.tick() => {
                if ws_tx.send(Message::ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    // Exactly once, on every exit path.
    state.registry.unsubscribe(topic, connection_id).await;
    counter!("gateway_disconnections_total").increment(1);
    info!(topic = %topic, connection = %connection_id, "client disconnected");
}

async fn authenticate(
    state: &AppState,
    topic: TopicId,
    token: Option<&str>,
) -> Result<Principal> {
    let token = token.ok_or(GatewayError::CredentialRejected)?;
    let principal = state.verifier.verify(token).await?;
    state.directory.authorize(topic, &principal).await?;
    Ok(principal)
}

fn close_for(error: &GatewayError) -> (u16, &'static str) {
    match error {
        GatewayError::CredentialRejected => (CLOSE_BAD_CREDENTIAL, "credential rejected"),
        GatewayError::TopicUnauthorized { .. } => (CLOSE_UNAUTHORIZED, "not authorized for topic"),
        GatewayError::TopicNotFound { .. } => (CLOSE_UNKNOWN_TOPIC, "unknown topic"),
        _ => (1011, "internal error"),
    }
}

/// Current state for a topic whose worker has not broadcast yet.
async fn initial_snapshot(state: &AppState, topic: TopicId) -> PriceUpdate {
    let snapshot = match state.directory.resolve(topic).await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            warn!(topic = %topic, error = %e, "initial topic resolution failed");
            TopicSnapshot::default()
        }
    };
    let quotes = state.source.fetch(&snapshot.symbols).await;
    build_update(topic, &snapshot, &quotes, Utc::now())
}

/// Returns false once the socket is done for.
async fn send_frame(ws_tx: &mut SplitSink<WebSocket, Message>, frame: &StreamFrame) -> bool {
    let json = match serde_json::to_string(frame) {
        Ok(json) => json,
        Err(e) => {
            warn!(error = %e, "failed to serialize outbound frame");
            return true;
        }
    };
    ws_tx.send(Message::text(json)).await.is_ok()
}

/// Handle one inbound frame. Keepalives get a pong; this is a push-only
/// channel, so any other content is ignored. Returns false to close.
async fn handle_inbound(ws_tx: &mut SplitSink<WebSocket, Message>, msg: Message) -> bool {
    if msg.is_close() {
        return false;
    }
    if msg.is_ping() {
        return ws_tx.send(Message::pong(msg.into_bytes())).await.is_ok();
    }
    if let Ok(text) = msg.to_str() {
        let is_ping = text.trim() == "ping"
            || matches!(
                serde_json::from_str::<ClientFrame>(text),
                Ok(ClientFrame::Ping)
            );
        if is_ping {
            return send_frame(ws_tx, &StreamFrame::Pong).await;
        }
        debug!("ignoring inbound frame on push-only channel");
    }
    true
}
