//! Error taxonomy for the core.
//!
//! [`TheresError`] is the single error currency threaded through the LLM streaming core, the
//! MCP supervisor, the board engine, and the HTTP layer. Every variant carries enough structure
//! to produce the stable `{code, message, recoverable, details}` envelope at the HTTP boundary
//! without string-matching the error message a second time.

use serde::Serialize;

/// The core's recoverable-error type.
///
/// Constructors classify the failure once, at the point it is first observed (HTTP status,
/// provider-specific message pattern, validator rejection, ...); everything downstream just
/// reads the variant.
#[derive(Debug, thiserror::Error)]
pub enum TheresError {
    #[error("could not reach {provider}: {detail}")]
    ApiUnreachable { provider: String, detail: String },

    #[error("{provider} request timed out after {timeout_secs}s")]
    ApiTimeout { provider: String, timeout_secs: u64 },

    #[error("{provider} returned a server error: {detail}")]
    ApiServerError { provider: String, detail: String },

    #[error("authentication with {provider} failed")]
    ApiAuthFailed { provider: String },

    #[error("request is not authorized")]
    Unauthorized,

    #[error("{provider} rate limit exceeded{}", retry_after.map(|s| format!(", retry after {s}s")).unwrap_or_default())]
    ApiRateLimited {
        provider: String,
        retry_after: Option<u64>,
    },

    #[error("context window exceeded for {provider}: estimated {estimated} tokens, budget {budget}")]
    ContextTooLong {
        provider: String,
        estimated: usize,
        budget: usize,
    },

    #[error("{provider} generation failed: {detail}")]
    GenerationFailed { provider: String, detail: String },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("no API key configured for {0}")]
    MissingApiKey(String),

    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    #[error("{message}")]
    Recoverable { message: String, details: Option<serde_json::Value> },

    #[error("unknown error: {0}")]
    Unknown(String),
}

impl TheresError {
    /// Stable `UPPER_SNAKE` code used in the HTTP error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            TheresError::ApiUnreachable { .. } => "API_UNREACHABLE",
            TheresError::ApiTimeout { .. } => "API_TIMEOUT",
            TheresError::ApiServerError { .. } => "API_SERVER_ERROR",
            TheresError::ApiAuthFailed { .. } => "API_AUTH_FAILED",
            TheresError::Unauthorized => "UNAUTHORIZED",
            TheresError::ApiRateLimited { .. } => "API_RATE_LIMITED",
            TheresError::ContextTooLong { .. } => "LLM_CONTEXT_TOO_LONG",
            TheresError::GenerationFailed { .. } => "LLM_GENERATION_FAILED",
            TheresError::Validation(_) => "VALIDATION_ERROR",
            TheresError::MissingApiKey(_) => "MISSING_API_KEY",
            TheresError::UnknownProvider(_) => "UNKNOWN_PROVIDER",
            TheresError::Recoverable { .. } => "RECOVERABLE_ERROR",
            TheresError::Unknown(_) => "UNKNOWN_ERROR",
        }
    }

    /// HTTP status this error maps onto.
    pub fn status_code(&self) -> u16 {
        match self {
            TheresError::Unauthorized | TheresError::ApiAuthFailed { .. } => 401,
            TheresError::Validation(_) | TheresError::MissingApiKey(_) => 422,
            TheresError::UnknownProvider(_) => 400,
            TheresError::ApiRateLimited { .. } => 429,
            TheresError::Recoverable { .. } => 400,
            TheresError::ApiUnreachable { .. }
            | TheresError::ApiTimeout { .. }
            | TheresError::ApiServerError { .. } => 502,
            TheresError::ContextTooLong { .. } | TheresError::GenerationFailed { .. } => 422,
            TheresError::Unknown(_) => 500,
        }
    }

    /// Whether the client can plausibly retry/fix the request without operator intervention.
    pub fn recoverable(&self) -> bool {
        match self {
            TheresError::Recoverable { .. }
            | TheresError::Validation(_)
            | TheresError::MissingApiKey(_)
            | TheresError::UnknownProvider(_)
            | TheresError::ContextTooLong { .. }
            | TheresError::ApiRateLimited { .. } => true,
            _ => false,
        }
    }

    /// A short, user-safe message suitable for a terminal `StreamEvent::Error`.
    ///
    /// Technical detail (upstream body text, stack traces) is logged by the caller at `error`
    /// level but never placed here.
    pub fn user_safe_message(&self) -> String {
        match self {
            TheresError::ApiUnreachable { provider, .. } => {
                format!("Could not reach {provider}. Check your connection and try again.")
            }
            TheresError::ApiTimeout { provider, .. } => {
                format!("{provider} took too long to respond.")
            }
            TheresError::ApiServerError { provider, .. } => {
                format!("{provider} is temporarily unavailable.")
            }
            TheresError::ApiAuthFailed { provider } => {
                format!("Authentication with {provider} failed. Check your API key.")
            }
            TheresError::Unauthorized => "This request is not authorized.".to_string(),
            TheresError::ApiRateLimited { provider, .. } => {
                format!("{provider} rate limit reached. Please wait and try again.")
            }
            TheresError::ContextTooLong { .. } => {
                "The conversation is too long for this model's context window.".to_string()
            }
            TheresError::GenerationFailed { provider, .. } => {
                format!("{provider} failed to generate a response.")
            }
            TheresError::Validation(msg) => msg.clone(),
            TheresError::MissingApiKey(provider) => {
                format!("No API key configured for {provider}. Add one in settings.")
            }
            TheresError::UnknownProvider(provider) => format!("Unknown provider: {provider}."),
            TheresError::Recoverable { message, .. } => message.clone(),
            TheresError::Unknown(_) => "Something went wrong.".to_string(),
        }
    }

    /// Classify an HTTP status code + body from a streaming or utility call.
    ///
    /// Recognises `"context length exceeded"`-style bodies per the propagation policy and
    /// otherwise falls back to a generic per-status classification.
    pub fn from_http_status(provider: &str, status: u16, body: &str) -> Self {
        let lower = body.to_lowercase();
        if lower.contains("context length") || lower.contains("context_length")
            || lower.contains("maximum context") || lower.contains("too many tokens")
        {
            return TheresError::ContextTooLong {
                provider: provider.to_string(),
                estimated: 0,
                budget: 0,
            };
        }
        match status {
            401 | 403 => TheresError::ApiAuthFailed {
                provider: provider.to_string(),
            },
            404 => TheresError::GenerationFailed {
                provider: provider.to_string(),
                detail: format!("model or endpoint not found: {body}"),
            },
            429 => {
                let retry_after = None;
                TheresError::ApiRateLimited {
                    provider: provider.to_string(),
                    retry_after,
                }
            }
            500..=599 => TheresError::ApiServerError {
                provider: provider.to_string(),
                detail: body.to_string(),
            },
            _ => TheresError::GenerationFailed {
                provider: provider.to_string(),
                detail: format!("HTTP {status}: {body}"),
            },
        }
    }
}

/// Run `primary`; on failure, log it at `warn` and fall back to `default` rather than failing
/// the whole request. For non-critical dependencies (memory retrieval, web search) a degraded
/// answer beats no answer.
pub async fn with_graceful_degradation<T, F>(dependency: &str, primary: F, default: T) -> T
where
    F: std::future::Future<Output = Result<T, TheresError>>,
{
    match primary.await {
        Ok(value) => value,
        Err(e) => {
            log::warn!("{dependency} unavailable, degrading: {e}");
            default
        }
    }
}

/// Stable JSON error envelope returned by every HTTP handler.
#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recoverable: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl From<&TheresError> for ErrorEnvelope {
    fn from(err: &TheresError) -> Self {
        let details = match err {
            TheresError::Recoverable { details, .. } => details.clone(),
            _ => None,
        };
        ErrorEnvelope {
            code: err.code().to_string(),
            message: err.user_safe_message(),
            recoverable: Some(err.recoverable()),
            details,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_length_body_classifies_as_context_too_long() {
        let err = TheresError::from_http_status("openai", 400, "This model's maximum context length is 8192 tokens");
        assert_eq!(err.code(), "LLM_CONTEXT_TOO_LONG");
    }

    #[test]
    fn auth_status_classifies_as_auth_failed() {
        let err = TheresError::from_http_status("anthropic", 401, "invalid api key");
        assert_eq!(err.code(), "API_AUTH_FAILED");
        assert_eq!(err.status_code(), 401);
    }

    #[test]
    fn server_error_maps_to_502() {
        let err = TheresError::from_http_status("gemini", 503, "overloaded");
        assert_eq!(err.code(), "API_SERVER_ERROR");
        assert_eq!(err.status_code(), 502);
    }

    #[test]
    fn envelope_omits_details_when_absent() {
        let err = TheresError::Unauthorized;
        let envelope = ErrorEnvelope::from(&err);
        assert_eq!(envelope.code, "UNAUTHORIZED");
        assert!(envelope.details.is_none());
    }
}
