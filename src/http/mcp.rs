//! MCP server management routes: CRUD over configured servers plus start/stop lifecycle and
//! namespaced tool invocation.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;

use crate::http::{ApiError, AppState};
use crate::mcp::{ServerView, ToolCallResult};

#[derive(Deserialize)]
pub struct AddServerRequest {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub enabled: bool,
}

pub async fn list_servers(State(state): State<Arc<AppState>>) -> Json<Vec<ServerView>> {
    Json(state.supervisor.list_servers())
}

pub async fn add_server(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AddServerRequest>,
) -> Result<Json<ServerView>, ApiError> {
    let view = state
        .supervisor
        .add_server(req.name, req.command, req.args, req.env, req.enabled)
        .await?;
    Ok(Json(view))
}

#[derive(serde::Serialize)]
pub struct RemoveResponse {
    pub removed: bool,
}

pub async fn remove_server(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Result<Json<RemoveResponse>, ApiError> {
    state.supervisor.remove_server(&id).await?;
    Ok(Json(RemoveResponse { removed: true }))
}

#[derive(serde::Serialize)]
pub struct LifecycleResponse {
    pub ok: bool,
}

pub async fn start_server(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Result<Json<LifecycleResponse>, ApiError> {
    state.supervisor.start_server(&id).await?;
    Ok(Json(LifecycleResponse { ok: true }))
}

pub async fn stop_server(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Result<Json<LifecycleResponse>, ApiError> {
    state.supervisor.stop_server(&id).await?;
    Ok(Json(LifecycleResponse { ok: true }))
}

#[derive(Deserialize)]
pub struct CallToolRequest {
    /// `"<server_id>__<tool_name>"`.
    pub tool: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

pub async fn call_tool(State(state): State<Arc<AppState>>, Json(req): Json<CallToolRequest>) -> Json<ToolCallResult> {
    Json(state.supervisor.execute_tool_call(&req.tool, req.arguments).await)
}
