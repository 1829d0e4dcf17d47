//! `LivehubServer`: axum HTTP + WebSocket boundary around the hub.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::rejection::JsonRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use livehub_core::{ChannelId, Message, ParticipantId, Role};
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::{ClientConfig, ServerConfig};
use crate::error::ApiError;
use crate::health::{self, HealthResponse};
use crate::metrics::ANNOUNCEMENTS_TOTAL;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::{ChannelSubscribers, Client, Hub, Participant};

/// Shared state accessible from axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Channel registry.
    pub hub: Hub,
    /// Limits applied to every accepted connection.
    pub client_config: ClientConfig,
    /// Root shutdown token; each client runs on a child of it.
    pub shutdown: CancellationToken,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle for `/metrics`, if a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

/// The livehub server.
pub struct LivehubServer {
    config: ServerConfig,
    hub: Hub,
    shutdown: Arc<ShutdownCoordinator>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    start_time: Instant,
    metrics: Option<PrometheusHandle>,
}

impl LivehubServer {
    /// Create a server and start its hub loop. Must run inside a tokio runtime.
    pub fn new(config: ServerConfig) -> Self {
        let shutdown = Arc::new(ShutdownCoordinator::new());
        let (hub, hub_task) = Hub::start(config.hub, shutdown.token());
        Self {
            config,
            hub,
            shutdown,
            tasks: Mutex::new(vec![hub_task]),
            start_time: Instant::now(),
            metrics: None,
        }
    }

    /// Serve `/metrics` from this recorder handle.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Build the axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            hub: self.hub.clone(),
            client_config: self.config.client,
            shutdown: self.shutdown.token(),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
        };

        Router::new()
            .route("/ws/livestream/{channel_id}", get(ws_handler))
            .route("/api/livestream/{channel_id}/viewers", get(viewers_handler))
            .route(
                "/api/livestream/{channel_id}/announcement",
                post(announcement_handler),
            )
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .layer(TraceLayer::new_for_http())
            .layer(cors_layer(&self.config.cors_allowed_origins))
            .with_state(state)
    }

    /// Bind the configured address and serve until shutdown.
    ///
    /// Returns the bound address (useful with port `0`).
    pub async fn listen(&self) -> std::io::Result<SocketAddr> {
        let listener = TcpListener::bind((self.config.host.as_str(), self.config.port)).await?;
        let addr = listener.local_addr()?;
        let app = self.router();
        let token = self.shutdown.token();

        let handle = tokio::spawn(async move {
            let serve = axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await });
            if let Err(e) = serve.await {
                error!(error = %e, "http server failed");
            }
        });
        self.tasks.lock().await.push(handle);

        info!(%addr, "livehub listening");
        Ok(addr)
    }

    /// Cancel every task and wait for the hub loop and HTTP server to stop.
    pub async fn shutdown(&self, timeout: Option<Duration>) {
        let handles: Vec<_> = self.tasks.lock().await.drain(..).collect();
        self.shutdown.graceful_shutdown(handles, timeout).await;
    }

    /// The channel registry.
    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    /// The shutdown coordinator.
    pub fn coordinator(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// The server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        let list: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|o| match HeaderValue::from_str(o) {
                Ok(v) => Some(v),
                Err(_) => {
                    warn!(origin = %o, "ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        AllowOrigin::list(list)
    };
    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
}

/// Query string of the upgrade request.
#[derive(Debug, Default, Deserialize)]
pub struct UpgradeParams {
    /// Caller-supplied participant id.
    pub participant_id: Option<String>,
    /// `publisher` or `subscriber`.
    pub role: Option<String>,
}

/// Body of an announcement request.
#[derive(Debug, Deserialize)]
pub struct AnnouncementRequest {
    /// Announcement text.
    pub content: String,
    /// Posting participant.
    pub sender_id: String,
    /// Must be `publisher`.
    pub sender_role: String,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// GET /ws/livestream/{channel_id}?participant_id=&role=
async fn ws_handler(
    State(state): State<AppState>,
    Path(channel_id): Path<String>,
    Query(params): Query<UpgradeParams>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, ApiError> {
    let (Some(participant_id), Some(role)) = (non_empty(params.participant_id), non_empty(params.role))
    else {
        return Err(ApiError::BadRequest("Missing required parameters".into()));
    };
    if channel_id.trim().is_empty() {
        return Err(ApiError::BadRequest("Missing required parameters".into()));
    }
    let role: Role = role
        .parse()
        .map_err(|e: livehub_core::CoreError| ApiError::BadRequest(e.to_string()))?;
    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => return Ok(rejection.into_response()),
    };

    let participant = Participant::new(
        ParticipantId::from_raw(participant_id),
        ChannelId::from_raw(channel_id),
        role,
    );
    let config = state.client_config;

    Ok(upgrade
        .max_message_size(config.max_message_size)
        .max_frame_size(config.max_message_size)
        .on_upgrade(move |socket| async move {
            let client = Client::new(participant, socket, config);
            let participant_id = client.participant().id.clone();
            if let Err(e) = client.start(&state.hub, &state.shutdown).await {
                warn!(%participant_id, error = %e, "could not register client");
            }
        }))
}

/// GET /api/livestream/{channel_id}/viewers
async fn viewers_handler(
    State(state): State<AppState>,
    Path(channel_id): Path<String>,
) -> Json<ChannelSubscribers> {
    Json(
        state
            .hub
            .channel_subscribers(&ChannelId::from_raw(channel_id))
            .await,
    )
}

/// POST /api/livestream/{channel_id}/announcement
async fn announcement_handler(
    State(state): State<AppState>,
    Path(channel_id): Path<String>,
    body: Result<Json<AnnouncementRequest>, JsonRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Ok(Json(request)) = body else {
        return Err(ApiError::BadRequest("Invalid request body".into()));
    };
    if request.sender_role != Role::Publisher.as_str() {
        return Err(ApiError::Forbidden(
            "Only publishers can send announcements".into(),
        ));
    }
    let message = Message::announcement(
        ChannelId::from_raw(channel_id),
        ParticipantId::from_raw(request.sender_id),
        request.content,
    );
    state.hub.publish(&message).await?;
    counter!(ANNOUNCEMENTS_TOTAL).increment(1);
    info!(
        channel_id = %message.channel_id(),
        sender_id = %message.sender_id(),
        "announcement broadcast"
    );

    Ok(Json(json!({ "message": "Announcement sent successfully" })))
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(state.start_time))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match state.metrics {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            crate::metrics::render(&handle),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
