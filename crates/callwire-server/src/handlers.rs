//! Connection handlers for the Callwire server.
//!
//! This module owns the WebSocket substrate: it upgrades sockets, hands each
//! one to the relay, pumps the session's outbound queue to the socket and
//! feeds decoded inbound frames to the session.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use crate::tls;
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use callwire_core::{ChannelHandle, Dispatched, RegistryStats, Relay, Session};
use callwire_protocol::{Encoded, Encoding, Frame, FrameCodec};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::time::Instant;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

type WsSink = SplitSink<WebSocket, Message>;

/// Shared server state.
pub struct AppState {
    /// The signaling relay.
    pub relay: Arc<Relay>,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            relay: Arc::new(Relay::with_config(config.relay_config())),
            config,
        }
    }
}

/// Query parameters accepted on the WebSocket endpoint.
#[derive(Debug, Default, Deserialize)]
struct WsParams {
    #[serde(default)]
    encoding: Encoding,
}

/// Build the HTTP router.
pub fn build_router(state: Arc<AppState>) -> Router {
    let app = Router::new()
        .route(&state.config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler));

    let static_dir = Path::new(&state.config.static_dir);
    let app = if static_dir.is_dir() {
        debug!(dir = %static_dir.display(), "Serving static files");
        app.fallback_service(ServeDir::new(static_dir))
    } else {
        app
    };

    app.layer(TraceLayer::new_for_http()).with_state(state)
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    let scheme = if config.tls.enabled() { "wss" } else { "ws" };
    info!("Callwire server listening on {}", addr);
    info!(
        "WebSocket endpoint: {}://{}{}",
        scheme, addr, config.transport.websocket_path
    );

    if config.tls.enabled() {
        let tls_config = tls::load_server_config(&config.tls)?;
        let app = build_router(Arc::new(AppState::new(config)));
        return tls::serve_tls(listener, app, tls_config).await;
    }

    serve(listener, Arc::new(AppState::new(config))).await
}

/// Serve connections from `listener` until Ctrl-C.
///
/// # Errors
///
/// Returns an error if the server fails while accepting connections.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<()> {
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("Callwire server stopped");
    Ok(())
}

pub(crate) async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutdown signal received");
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Registry statistics handler.
async fn stats_handler(State(state): State<Arc<AppState>>) -> Json<RegistryStats> {
    Json(state.relay.stats())
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let max_size = state.config.limits.max_message_size;
    ws.max_message_size(max_size)
        .max_frame_size(max_size)
        .on_upgrade(move |socket| handle_websocket(socket, state, params.encoding))
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>, encoding: Encoding) {
    let _metrics_guard = ConnectionMetricsGuard::new();
    let mut codec = FrameCodec::new(encoding);
    let (mut sender, mut receiver) = socket.split();
    let (channel, mut outbound) = ChannelHandle::pair(state.config.limits.outbound_queue);

    let mut session = match state.relay.connect(channel) {
        Ok(session) => session,
        Err(e) => {
            metrics::record_error("rejected");
            let frame = Frame::error(e.code(), e.to_string());
            if send_frame(&mut sender, &codec, &frame).await.is_ok() {
                let _ = sender.send(Message::Close(None)).await;
            }
            return;
        }
    };
    metrics::record_registry(state.relay.stats());

    let connection_id = session.id().clone();
    debug!(connection = %connection_id, encoding = encoding.as_str(), "WebSocket connected");

    let interval = state.config.heartbeat.interval();
    let timeout = state.config.heartbeat.timeout();
    let mut heartbeat = tokio::time::interval_at(Instant::now() + interval, interval);
    let mut last_seen = Instant::now();

    // Message processing loop
    loop {
        tokio::select! {
            biased;

            // Frames queued for this endpoint by the relay
            Some(frame) = outbound.recv() => {
                if send_frame(&mut sender, &codec, &frame).await.is_err() {
                    break;
                }
            }

            // Receive from WebSocket
            msg = receiver.next() => {
                last_seen = Instant::now();
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        metrics::record_message(text.len(), "inbound");
                        match codec.decode_text(&text) {
                            Ok(frame) => dispatch_frame(&session, frame),
                            Err(e) => {
                                warn!(connection = %connection_id, error = %e, "Malformed text frame");
                                metrics::record_error("decode");
                            }
                        }
                    }
                    Some(Ok(Message::Binary(data))) => {
                        metrics::record_message(data.len(), "inbound");
                        codec.feed(&data);
                        loop {
                            match codec.next_frame() {
                                Ok(Some(frame)) => dispatch_frame(&session, frame),
                                Ok(None) => break,
                                Err(e) => {
                                    warn!(connection = %connection_id, error = %e, "Malformed binary frame");
                                    metrics::record_error("decode");
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection = %connection_id, "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(connection = %connection_id, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(connection = %connection_id, "WebSocket stream ended");
                        break;
                    }
                }
            }

            _ = heartbeat.tick() => {
                if last_seen.elapsed() >= timeout {
                    info!(connection = %connection_id, "Heartbeat timeout");
                    metrics::record_error("timeout");
                    break;
                }
                if sender.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    session.disconnect();
    metrics::record_registry(state.relay.stats());
    debug!(connection = %connection_id, "WebSocket disconnected");
}

/// Hand one decoded frame to the session and record the outcome.
fn dispatch_frame(session: &Session, frame: Frame) {
    let start = std::time::Instant::now();
    match session.dispatch(frame) {
        Dispatched::Forwarded(kind) => metrics::record_signal(kind, "forwarded"),
        Dispatched::Dropped(kind, reason) => metrics::record_signal(kind, reason.as_str()),
        Dispatched::Replied(_) | Dispatched::Ignored(_) => {}
    }
    metrics::record_latency(start.elapsed().as_secs_f64());
}

/// Encode a frame with the connection's codec and send it.
///
/// A frame that fails to encode is logged and skipped.
async fn send_frame(sender: &mut WsSink, codec: &FrameCodec, frame: &Frame) -> Result<()> {
    let encoded = match codec.encode(frame) {
        Ok(encoded) => encoded,
        Err(e) => {
            warn!(frame_type = %frame.frame_type(), error = %e, "Failed to encode frame");
            metrics::record_error("encode");
            return Ok(());
        }
    };

    metrics::record_message(encoded.len(), "outbound");
    let message = match encoded {
        Encoded::Text(text) => Message::Text(text),
        Encoded::Binary(data) => Message::Binary(data.to_vec()),
    };
    sender.send(message).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use callwire_protocol::{codec, error_codes, SignalKind};
    use serde_json::json;
    use std::net::SocketAddr;
    use std::time::Duration;
    use tokio::net::TcpStream;
    use tokio_tungstenite::tungstenite::Message as WsMessage;
    use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    fn test_config() -> Config {
        Config {
            host: "127.0.0.1".to_string(),
            port: 0,
            static_dir: "does-not-exist".to_string(),
            ..Config::default()
        }
    }

    async fn spawn_server(config: Config) -> (SocketAddr, Arc<AppState>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(AppState::new(config));
        tokio::spawn(serve(listener, Arc::clone(&state)));
        (addr, state)
    }

    async fn connect(addr: SocketAddr, query: &str) -> Client {
        let (ws, _) = connect_async(format!("ws://{addr}/ws{query}")).await.unwrap();
        ws
    }

    /// Next relay frame, skipping transport-level pings.
    async fn recv(ws: &mut Client) -> Frame {
        let mut codec = FrameCodec::new(Encoding::MessagePack);
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
                .await
                .expect("timed out waiting for frame")
                .expect("stream ended")
                .unwrap();
            match msg {
                WsMessage::Text(text) => return codec::decode_json(&text).unwrap(),
                WsMessage::Binary(data) => {
                    codec.feed(&data);
                    if let Some(frame) = codec.next_frame().unwrap() {
                        return frame;
                    }
                }
                WsMessage::Ping(_) | WsMessage::Pong(_) => {}
                other => panic!("unexpected message: {other:?}"),
            }
        }
    }

    async fn greeting(ws: &mut Client) -> String {
        match recv(ws).await {
            Frame::Connected { connection_id, .. } => connection_id,
            other => panic!("expected connected, got {other:?}"),
        }
    }

    async fn roster(ws: &mut Client) -> Vec<String> {
        match recv(ws).await {
            Frame::PresenceUpdate { peers } => peers,
            other => panic!("expected presence-update, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_json_roster_and_offer() {
        let (addr, state) = spawn_server(test_config()).await;

        let mut a = connect(addr, "").await;
        let id_a = greeting(&mut a).await;
        assert_eq!(roster(&mut a).await, vec![id_a.clone()]);

        let mut b = connect(addr, "?encoding=json").await;
        let id_b = greeting(&mut b).await;
        let both = vec![id_a.clone(), id_b.clone()];
        assert_eq!(roster(&mut b).await, both);
        assert_eq!(roster(&mut a).await, both);

        let offer = json!({
            "type": "negotiation-offer",
            "peer": id_b,
            "payload": {"type": "offer", "sdp": "v=0"}
        });
        a.send(WsMessage::Text(offer.to_string())).await.unwrap();
        assert_eq!(
            recv(&mut b).await,
            Frame::signal(
                SignalKind::NegotiationOffer,
                id_a.clone(),
                Some(json!({"type": "offer", "sdp": "v=0"}))
            )
        );

        b.close(None).await.unwrap();
        assert_eq!(roster(&mut a).await, vec![id_a]);
        assert_eq!(state.relay.registry().len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_frame_keeps_connection() {
        let (addr, _state) = spawn_server(test_config()).await;

        let mut a = connect(addr, "").await;
        greeting(&mut a).await;
        roster(&mut a).await;

        a.send(WsMessage::Text("not json".into())).await.unwrap();
        a.send(WsMessage::Text(r#"{"type":"ping","timestamp":7}"#.into()))
            .await
            .unwrap();
        assert_eq!(recv(&mut a).await, Frame::pong(Some(7)));
    }

    #[tokio::test]
    async fn test_msgpack_encoding() {
        let (addr, _state) = spawn_server(test_config()).await;

        let mut a = connect(addr, "?encoding=msgpack").await;
        let id_a = greeting(&mut a).await;
        roster(&mut a).await;

        let mut b = connect(addr, "?encoding=messagepack").await;
        let id_b = greeting(&mut b).await;
        roster(&mut b).await;
        roster(&mut a).await;

        // Two frames in one binary message.
        let mut data = codec::encode(&Frame::signal(SignalKind::CallRequest, id_b.clone(), None))
            .unwrap()
            .to_vec();
        data.extend_from_slice(
            &codec::encode(&Frame::signal(SignalKind::CallReject, id_b, None)).unwrap(),
        );
        a.send(WsMessage::Binary(data)).await.unwrap();

        assert_eq!(
            recv(&mut b).await,
            Frame::signal(SignalKind::CallRequest, id_a.clone(), None)
        );
        assert_eq!(
            recv(&mut b).await,
            Frame::signal(SignalKind::CallReject, id_a.clone(), None)
        );

        b.send(WsMessage::Text(
            json!({"type": "call-accept", "peer": id_a}).to_string(),
        ))
        .await
        .unwrap();
        match a.next().await.unwrap().unwrap() {
            WsMessage::Binary(data) => {
                let frame = codec::decode(&data).unwrap();
                assert_eq!(frame.signal_kind(), Some(SignalKind::CallAccept));
            }
            other => panic!("expected binary message, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_capacity_rejection() {
        let mut config = test_config();
        config.limits.max_connections = 1;
        let (addr, state) = spawn_server(config).await;

        let mut a = connect(addr, "").await;
        greeting(&mut a).await;
        roster(&mut a).await;

        let mut b = connect(addr, "").await;
        match recv(&mut b).await {
            Frame::Error { code, .. } => assert_eq!(code, error_codes::CAPACITY_REACHED),
            other => panic!("expected error, got {other:?}"),
        }
        assert_eq!(state.relay.registry().len(), 1);
    }

    #[tokio::test]
    async fn test_heartbeat_timeout() {
        let mut config = test_config();
        config.heartbeat.interval_ms = 20;
        config.heartbeat.timeout_ms = 60;
        let (addr, state) = spawn_server(config).await;

        // Never read, so transport pings go unanswered.
        let _silent = connect(addr, "").await;

        // One broadcast on join, one on teardown.
        let deadline = Instant::now() + Duration::from_secs(5);
        while state.relay.stats().presence_broadcasts < 2 {
            assert!(Instant::now() < deadline, "endpoint never timed out");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn test_stats_handler() {
        let state = Arc::new(AppState::new(test_config()));
        let (handle, _rx) = ChannelHandle::pair(64);
        let _session = state.relay.connect(handle).unwrap();

        let Json(stats) = stats_handler(State(Arc::clone(&state))).await;
        assert_eq!(stats.endpoints, 1);
        assert_eq!(stats.presence_broadcasts, 1);
    }
}
