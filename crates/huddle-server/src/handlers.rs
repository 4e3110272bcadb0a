//! Connection handlers for Huddle server.
//!
//! This module handles the connection lifecycle, the room creation endpoint,
//! and the health check.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::BytesMut;
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use huddle_core::{create_room, CreateRoomError, Engine, MemoryStore, Outcome, Session};
use huddle_protocol::{codec, ClientEvent, Encoding, ServerEvent};
use serde::Deserialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// The room engine.
    pub engine: Arc<Engine>,
    /// Server configuration.
    pub config: Config,
    connections: AtomicUsize,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(engine: Arc<Engine>, config: Config) -> Self {
        Self {
            engine,
            config,
            connections: AtomicUsize::new(0),
        }
    }

    /// Live WebSocket connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }

    fn try_acquire(self: &Arc<Self>) -> Option<ConnectionSlot> {
        let max = self.config.limits.max_connections;
        let previous = self.connections.fetch_add(1, Ordering::AcqRel);
        if previous >= max {
            self.connections.fetch_sub(1, Ordering::AcqRel);
            return None;
        }
        Some(ConnectionSlot(Arc::clone(self)))
    }
}

/// One counted connection; released on drop.
struct ConnectionSlot(Arc<AppState>);

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.0.connections.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Build the HTTP router.
pub fn app(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config.cors_origins);

    Router::new()
        .route(&state.config.transport.websocket_path, get(ws_handler))
        .route("/api/rooms", post(create_room_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    if origins.is_empty() || origins.iter().any(|origin| origin.trim() == "*") {
        return layer.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.trim().parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(allowed))
}

/// Run the HTTP/WebSocket server until Ctrl-C.
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

    let engine = Engine::start(config.engine_config(), Arc::new(MemoryStore::new()));
    let stats_publisher = config.metrics.enabled.then(|| {
        metrics::spawn_engine_stats(&engine, engine.config().sweep_interval)
    });
    let state = Arc::new(AppState::new(Arc::clone(&engine), config.clone()));
    let app = app(state);

    // Bind and serve
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Huddle server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(engine))
        .await?;

    if let Some(publisher) = stats_publisher {
        publisher.abort();
    }
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal(engine: Arc<Engine>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutting down");
    engine.shutdown().await;
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.engine.stats();
    metrics::set_engine_stats(stats);

    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "rooms": stats.rooms,
        "connections": stats.connections,
        "typing": stats.typing,
    }))
}

/// Body of `POST /api/rooms`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomRequest {
    /// Requested identifier; a random one is allocated when absent.
    #[serde(default)]
    pub room_id: Option<String>,
}

/// Room creation handler.
async fn create_room_handler(
    State(state): State<Arc<AppState>>,
    body: Option<Json<CreateRoomRequest>>,
) -> Response {
    let request = body.map(|Json(request)| request).unwrap_or_default();
    let store = state.engine.store().as_ref();

    match create_room(store, request.room_id.as_deref()).await {
        Ok(room) => {
            info!(room = %room, "Room created");
            metrics::record_room_created();
            (StatusCode::CREATED, Json(serde_json::json!({ "id": room }))).into_response()
        }
        Err(e) => {
            let status = match &e {
                CreateRoomError::Invalid => StatusCode::BAD_REQUEST,
                CreateRoomError::AlreadyExists(_) => StatusCode::CONFLICT,
                CreateRoomError::Exhausted => StatusCode::SERVICE_UNAVAILABLE,
                CreateRoomError::Store(_) => {
                    error!(error = %e, "Room creation failed");
                    metrics::record_error("store");
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            };
            debug!(status = %status, error = %e, "Room not created");
            (status, Json(serde_json::json!({ "error": e.to_string() }))).into_response()
        }
    }
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    let Some(slot) = state.try_acquire() else {
        warn!(
            max = state.config.limits.max_connections,
            "Connection limit reached"
        );
        metrics::record_rejected_connection();
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    };

    ws.max_message_size(state.config.limits.max_message_size)
        .on_upgrade(move |socket| handle_websocket(socket, state, slot))
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>, _slot: ConnectionSlot) {
    let _metrics_guard = ConnectionMetricsGuard::new();

    let (mut session, mut outbox) = state.engine.connect();
    let connection_id = session.id().clone();
    debug!(connection = %connection_id, "WebSocket connected");

    let (mut sender, mut receiver) = socket.split();

    // Replies use the encoding of the client's most recent frame.
    let mut encoding = Encoding::Json;
    let mut read_buffer = BytesMut::with_capacity(4096);
    let max_message_size = state.config.limits.max_message_size;

    loop {
        tokio::select! {
            biased;

            event = outbox.recv() => match event {
                Some(event) => {
                    if let Err(e) = send_event(&mut sender, &event, encoding).await {
                        debug!(connection = %connection_id, error = %e, "Send failed");
                        break;
                    }
                }
                None => {
                    debug!(connection = %connection_id, "Outbox closed");
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            },

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        encoding = Encoding::Json;
                        if text.len() > max_message_size {
                            metrics::record_dropped("too_large");
                            continue;
                        }
                        match codec::decode_json::<ClientEvent>(&text) {
                            Ok(event) => handle_event(&mut session, event, &state).await,
                            Err(e) => {
                                debug!(connection = %connection_id, error = %e, "Malformed event");
                                metrics::record_dropped("malformed");
                            }
                        }
                    }
                    Some(Ok(Message::Binary(data))) => {
                        encoding = Encoding::MessagePack;
                        if data.len() > max_message_size {
                            metrics::record_dropped("too_large");
                            continue;
                        }
                        read_buffer.extend_from_slice(&data);

                        loop {
                            match codec::decode_from::<ClientEvent>(&mut read_buffer) {
                                Ok(Some(event)) => handle_event(&mut session, event, &state).await,
                                Ok(None) => break,
                                Err(e) => {
                                    debug!(connection = %connection_id, error = %e, "Malformed frame");
                                    metrics::record_dropped("malformed");
                                    read_buffer.clear();
                                    break;
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
        }
    }

    session.disconnect();
    debug!(connection = %connection_id, "WebSocket disconnected");
}

/// Validate an inbound event and apply it to the session.
async fn handle_event(session: &mut Session, event: ClientEvent, state: &AppState) {
    let start = Instant::now();
    let kind = event.kind();
    metrics::record_inbound(kind);

    match event.validate_with(state.engine.config().max_content_chars) {
        Ok(command) => match session.handle(command).await {
            Outcome::Persisted(_) => metrics::record_message_persisted(),
            Outcome::StoreFailed => metrics::record_error("store"),
            Outcome::Applied => {}
        },
        Err(rejection) => {
            debug!(
                connection = %session.id(),
                event = kind,
                reason = rejection.as_str(),
                "Event dropped"
            );
            metrics::record_dropped(rejection.as_str());
        }
    }

    metrics::record_latency(start.elapsed().as_secs_f64());
}

/// Send an event to the WebSocket in the given encoding.
async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &ServerEvent,
    encoding: Encoding,
) -> Result<()> {
    let message = match encoding {
        Encoding::Json => Message::Text(codec::encode_json(event)?),
        Encoding::MessagePack => Message::Binary(codec::encode(event)?.to_vec()),
    };
    let bytes = match &message {
        Message::Text(text) => text.len(),
        Message::Binary(data) => data.len(),
        _ => 0,
    };
    metrics::record_outbound(event.kind(), bytes);
    sender.send(message).await?;
    Ok(())
}
