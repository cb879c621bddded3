//! HTTP/SSE surface: routes, middleware stack, and the shared [`AppState`] every handler closes
//! over.
//!
//! Middleware order: CORS -> rate-limit -> auth (session token) -> security headers -> handler ->
//! exception mapping.

pub mod auth;
pub mod board;
pub mod chat;
pub mod mcp;
pub mod misc;
pub mod ratelimit;

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use dashmap::DashMap;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::board::BoardEngine;
use crate::error::{ErrorEnvelope, TheresError};
use crate::llm::facade::LLMFacade;
use crate::mcp::McpSupervisor;
use crate::memory::MemoryStore;
use crate::security::SessionToken;
use crate::store::RelationalStore;

/// Newtype so `TheresError` can implement `IntoResponse` without an orphan-rule violation (it
/// lives in a different module than axum's trait).
pub struct ApiError(pub TheresError);

impl From<TheresError> for ApiError {
    fn from(err: TheresError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let envelope = ErrorEnvelope::from(&self.0);
        (status, Json(envelope)).into_response()
    }
}

/// Per-conversation cancellation flags set by `POST /api/chat/cancel/{conversation_id}` and
/// polled by the chat orchestrator between stream chunks.
pub type CancellationFlags = DashMap<String, Arc<std::sync::atomic::AtomicBool>>;

pub struct AppState {
    pub facade: Arc<LLMFacade>,
    pub store: Arc<RelationalStore>,
    pub supervisor: Arc<McpSupervisor>,
    pub board: Arc<BoardEngine>,
    pub memory: Arc<dyn MemoryStore>,
    pub session_token: SessionToken,
    pub cancellations: CancellationFlags,
}

/// Build the full router: CORS -> rate-limit -> auth -> security headers -> routes, mapped onto
/// axum's outer-wraps-inner layering (so this reads top-to-bottom in request order once you
/// remember the last `.layer()` call runs first).
pub fn build_router(state: Arc<AppState>) -> Router {
    let limiter = ratelimit::RateLimiter::new(ratelimit::RateLimitConfig::default());
    let _sweeper = limiter.clone().spawn_sweeper(Duration::from_secs(300), Duration::from_secs(300));

    let api = Router::new()
        .route("/api/chat/send", post(chat::send))
        .route("/api/chat/cancel/{conversation_id}", post(chat::cancel))
        .route("/api/chat/conversations", get(chat::list_conversations))
        .route("/api/chat/conversations/{id}/messages", get(chat::list_messages))
        .route("/api/board/deliberate", post(board::deliberate))
        .route("/api/board/decisions", get(board::list_decisions))
        .route("/api/board/decisions/{id}", get(board::get_decision))
        .route("/api/board/decisions/{id}", delete(board::delete_decision))
        .route("/api/mcp/servers", get(mcp::list_servers))
        .route("/api/mcp/servers", post(mcp::add_server))
        .route("/api/mcp/servers/{id}", delete(mcp::remove_server))
        .route("/api/mcp/servers/{id}/start", post(mcp::start_server))
        .route("/api/mcp/servers/{id}/stop", post(mcp::stop_server))
        .route("/api/mcp/tools/call", post(mcp::call_tool))
        .route_layer(axum::middleware::from_fn(auth::security_headers))
        .route_layer(axum::middleware::from_fn_with_state(state.clone(), auth::require_session_token));

    Router::new()
        .route("/health", get(misc::health))
        .route("/health/services", get(misc::health_services))
        .route("/api/auth/token", get(misc::auth_token))
        .merge(api)
        .fallback(not_found)
        .layer(axum::middleware::from_fn(ratelimit::middleware))
        .layer(axum::Extension(limiter))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Unmatched route: the error-envelope taxonomy's `HTTP_ERROR` code, not `UNKNOWN_ERROR` —
/// this is a client mistake (bad path), not a server fault.
async fn not_found() -> Response {
    let envelope = ErrorEnvelope {
        code: "HTTP_ERROR".to_string(),
        message: "No such route.".to_string(),
        recoverable: Some(true),
        details: None,
    };
    (StatusCode::NOT_FOUND, Json(envelope)).into_response()
}
