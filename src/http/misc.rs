//! Health checks and the session-token bootstrap endpoint.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::http::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok", version: env!("CARGO_PKG_VERSION") })
}

#[derive(Serialize)]
pub struct DependencyHealth {
    pub name: String,
    pub available: bool,
    pub critical: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback: Option<String>,
}

#[derive(Serialize)]
pub struct ServicesHealthResponse {
    pub dependencies: Vec<DependencyHealth>,
}

/// Per-dependency availability. The relational store is critical (no fallback, the process is
/// useless without it); MCP servers and web search are not (the board/chat still work with
/// fewer tools or without web context).
pub async fn health_services(State(state): State<Arc<AppState>>) -> Json<ServicesHealthResponse> {
    let store_available = state.store.list_conversations(1).await.is_ok();
    let mcp_servers = state.supervisor.list_servers();
    let any_mcp_running = mcp_servers.iter().any(|s| matches!(s.status, crate::mcp::ServerStatus::Running));

    Json(ServicesHealthResponse {
        dependencies: vec![
            DependencyHealth {
                name: "relational_store".to_string(),
                available: store_available,
                critical: true,
                fallback: None,
            },
            DependencyHealth {
                name: "mcp_supervisor".to_string(),
                available: mcp_servers.is_empty() || any_mcp_running,
                critical: false,
                fallback: Some("tool calls unavailable; chat and board still function".to_string()),
            },
        ],
    })
}

#[derive(Serialize)]
pub struct TokenResponse {
    pub token: String,
}

/// Returns the live session token. Exempt from auth (the desktop shell needs this before it has
/// the token); CORS should restrict origins to the local desktop shell in front of this.
pub async fn auth_token(State(state): State<Arc<AppState>>) -> Json<TokenResponse> {
    Json(TokenResponse { token: state.session_token.as_str().to_string() })
}
