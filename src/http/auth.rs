//! Session-token auth and security-header middleware.
//!
//! An `axum::middleware::from_fn_with_state` guard checking against
//! [`crate::security::SessionToken`] instead of a static API key, accepting the token from
//! either the header or the query-string fallback a browser `EventSource` client needs (it
//! cannot set custom headers).

use std::sync::Arc;

use axum::extract::{Query, Request, State};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use crate::http::AppState;
use crate::security::session_token::HEADER_NAME;

#[derive(Deserialize)]
struct TokenQuery {
    #[serde(rename = "token")]
    token: Option<String>,
}

pub async fn require_session_token(State(state): State<Arc<AppState>>, req: Request, next: Next) -> Response {
    if crate::security::session_token::is_exempt(req.uri().path(), req.method()) {
        return next.run(req).await;
    }

    let header_token = req.headers().get(HEADER_NAME).and_then(|v| v.to_str().ok()).map(str::to_string);
    let query_token = Query::<TokenQuery>::try_from_uri(req.uri()).ok().and_then(|q| q.0.token);

    let candidate = header_token.or(query_token);
    match candidate {
        Some(token) if state.session_token.matches(&token) => next.run(req).await,
        _ => (StatusCode::UNAUTHORIZED, "request is not authorized").into_response(),
    }
}

/// `X-Content-Type-Options`, `X-Frame-Options`, `Referrer-Policy`, `Permissions-Policy` on every
/// response, regardless of route or outcome.
pub async fn security_headers(req: Request, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert("x-content-type-options", HeaderValue::from_static("nosniff"));
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert("referrer-policy", HeaderValue::from_static("strict-origin-when-cross-origin"));
    headers.insert(
        "permissions-policy",
        HeaderValue::from_static("camera=(), microphone=(), geolocation=()"),
    );
    response
}
