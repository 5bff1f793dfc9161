//! HTTP surface: `/chat`, `/history/{session_id}` and `/health`
//!
//! Handlers translate between JSON bodies and [`AgentService`]; every
//! failure is rendered as `{ "detail": ... }` through [`ApiError`].

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use compass_core::config::ServerConfig;
use compass_core::{AgentService, HealthStatus, TurnError, DEFAULT_SESSION_ID};

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<AgentService>,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default = "default_session_id")]
    pub session_id: String,
}

fn default_session_id() -> String {
    DEFAULT_SESSION_ID.to_string()
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub response: String,
    pub session_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ClearResponse {
    pub status: String,
    pub message: String,
}

/// Error returned to HTTP clients as `{ "detail": ... }`
#[derive(Debug)]
pub enum ApiError {
    NotReady,
    BadRequest(StatusCode, String),
    Turn(TurnError),
    Internal(String),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.status(), rejection.body_text())
    }
}

impl From<TurnError> for ApiError {
    fn from(err: TurnError) -> Self {
        match err {
            TurnError::NotReady => ApiError::NotReady,
            other => ApiError::Turn(other),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            ApiError::NotReady => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Agent not initialized".to_string(),
            ),
            ApiError::BadRequest(status, detail) => (status, detail),
            ApiError::Turn(err) => {
                tracing::error!("Turn failed: {}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, turn_detail(&err))
            }
            ApiError::Internal(detail) => (StatusCode::INTERNAL_SERVER_ERROR, detail),
        };
        (status, Json(serde_json::json!({ "detail": detail }))).into_response()
    }
}

/// Detail shown to clients for a failed turn. Store errors carry internal ids
/// and are reported generically.
fn turn_detail(err: &TurnError) -> String {
    match err {
        TurnError::Store(_) => "Conversation history could not be updated".to_string(),
        other => other.to_string(),
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/chat", post(chat_handler))
        .route("/history/{session_id}", delete(clear_history_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Bind and start serving. The agent does not need to be ready yet.
pub async fn start(
    config: &ServerConfig,
    service: Arc<AgentService>,
) -> Result<ServerHandle, std::io::Error> {
    let router = build_router(AppState { service });
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(addr = %local_addr, "Compass server listening");

    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!("Server stopped: {}", e);
        }
    });

    Ok(ServerHandle {
        addr: local_addr,
        server,
    })
}

/// Handle returned by `start()`; dropping it does not stop the server.
pub struct ServerHandle {
    pub addr: SocketAddr,
    server: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Wait until the server task ends
    pub async fn wait(self) {
        let _ = self.server.await;
    }

    pub fn abort(&self) {
        self.server.abort();
    }
}

async fn chat_handler(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, ApiError> {
    let Json(request) = payload?;
    if !state.service.is_ready() {
        return Err(ApiError::NotReady);
    }

    // Run the turn in its own task so a dropped connection cannot cut it short
    let service = state.service.clone();
    let turn = tokio::spawn(async move {
        service
            .chat(Some(&request.session_id), &request.message)
            .await
    });
    let outcome = match turn.await {
        Ok(result) => result?,
        Err(e) => {
            tracing::error!("Chat task failed: {}", e);
            return Err(ApiError::Internal("Chat turn aborted".to_string()));
        }
    };

    Ok(Json(ChatResponse {
        response: outcome.response,
        session_id: outcome.session_id,
    }))
}

async fn clear_history_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Json<ClearResponse> {
    state.service.clear_history(&session_id).await;
    Json(ClearResponse {
        status: "ok".to_string(),
        message: format!("History for session {} cleared", session_id),
    })
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthStatus> {
    Json(state.service.health())
}
