//! Board deliberation routes: streaming the fan-out/synthesis events as SSE, plus decision
//! history CRUD over the persisted records.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::sse::{Event as SseEvent, Sse};
use axum::Json;
use futures_util::StreamExt;
use serde::Deserialize;

use crate::board::BoardEvent;
use crate::http::{ApiError, AppState};
use crate::security::injection_guard;

#[derive(Deserialize)]
pub struct DeliberateRequest {
    pub question: String,
    pub context: Option<String>,
}

pub async fn deliberate(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DeliberateRequest>,
) -> axum::response::Response {
    use axum::response::IntoResponse;

    let screening = injection_guard::screen(&req.question);
    if !screening.is_safe {
        return ApiError(crate::error::TheresError::Validation(format!(
            "question rejected by prompt-injection screening: {:?}",
            screening.threat_type
        )))
        .into_response();
    }

    let event_stream = state
        .board
        .clone()
        .deliberate(req.question, req.context)
        .map(|event: BoardEvent| -> Result<SseEvent, Infallible> {
            Ok(SseEvent::default().data(serde_json::to_string(&event).unwrap_or_default()))
        })
        .boxed();

    Sse::new(event_stream).into_response()
}

pub async fn list_decisions(State(state): State<Arc<AppState>>) -> Result<Json<Vec<crate::store::BoardDecisionRecord>>, ApiError> {
    Ok(Json(state.board.list_decisions(50).await?))
}

pub async fn get_decision(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<crate::store::BoardDecisionRecord>, ApiError> {
    match state.board.get_decision(&id).await? {
        Some(decision) => Ok(Json(decision)),
        None => Err(ApiError(crate::error::TheresError::Validation(format!("no decision with id {id}")))),
    }
}

#[derive(serde::Serialize)]
pub struct DeleteResponse {
    pub deleted: bool,
}

pub async fn delete_decision(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Result<Json<DeleteResponse>, ApiError> {
    let deleted = state.board.delete_decision(&id).await?;
    Ok(Json(DeleteResponse { deleted }))
}
