//! Per-process session token handshake.
//!
//! A fresh 32-byte URL-safe token is generated at process start, written to a 0600 file, and
//! held in memory for the lifetime of the process. Middleware compares the incoming token in
//! constant time so that a network observer cannot learn the token byte-by-byte from response
//! timing.

use rand::RngCore;
use subtle::ConstantTimeEq;

use crate::error::TheresError;

/// Header carrying the session token on every authenticated request.
pub const HEADER_NAME: &str = "X-Therese-Token";
/// Query-string fallback, used by contexts that cannot set custom headers (e.g. an `EventSource`
/// SSE client in a browser shell).
pub const QUERY_PARAM: &str = "token";

const TOKEN_BYTES: usize = 32;

/// The live session token for this process.
#[derive(Clone)]
pub struct SessionToken {
    value: String,
}

impl SessionToken {
    /// Generate a new random token and persist it to `path` with mode 0600.
    pub fn generate_and_persist(path: &std::path::Path) -> Result<Self, TheresError> {
        let mut bytes = [0u8; TOKEN_BYTES];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        let value = base64::Engine::encode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, bytes);
        write_token_file(path, &value)?;
        Ok(SessionToken { value })
    }

    /// The raw token string, e.g. to expose via `GET /api/auth/token`.
    pub fn as_str(&self) -> &str {
        &self.value
    }

    /// Constant-time comparison against a value supplied by a client.
    ///
    /// Unequal-length inputs are rejected up front (that leak is unavoidable and harmless —
    /// length is not secret) but once lengths match, every byte is compared; there is no
    /// early-exit on the first mismatching byte.
    pub fn matches(&self, candidate: &str) -> bool {
        let expected = self.value.as_bytes();
        let actual = candidate.as_bytes();
        if expected.len() != actual.len() {
            return false;
        }
        expected.ct_eq(actual).into()
    }

    /// Remove the on-disk token file. Called on graceful shutdown.
    pub fn clear(path: &std::path::Path) {
        let _ = std::fs::remove_file(path);
    }
}

#[cfg(unix)]
fn write_token_file(path: &std::path::Path, value: &str) -> Result<(), TheresError> {
    use std::fs::OpenOptions;
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| TheresError::Unknown(format!("could not create {parent:?}: {e}")))?;
    }
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
        .map_err(|e| TheresError::Unknown(format!("could not open {path:?}: {e}")))?;
    file.write_all(value.as_bytes())
        .map_err(|e| TheresError::Unknown(format!("could not write {path:?}: {e}")))
}

#[cfg(not(unix))]
fn write_token_file(path: &std::path::Path, value: &str) -> Result<(), TheresError> {
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    std::fs::write(path, value)
        .map_err(|e| TheresError::Unknown(format!("could not write {path:?}: {e}")))
}

/// Routes exempt from the session-token middleware: health checks, the bootstrap endpoint that
/// hands the token to the desktop shell, OAuth redirect callbacks, and CORS preflight.
pub fn is_exempt(path: &str, method: &http::Method) -> bool {
    if method == http::Method::OPTIONS {
        return true;
    }
    matches!(path, "/health" | "/health/services" | "/api/auth/token")
        || path.starts_with("/api/auth/oauth/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_token_persists_and_matches() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".session_token");
        let token = SessionToken::generate_and_persist(&path).unwrap();
        assert!(path.exists());
        assert!(token.matches(token.as_str()));
        assert!(!token.matches("not-the-token"));
    }

    #[test]
    fn tokens_have_no_padding_or_slashes_issue() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".session_token");
        let token = SessionToken::generate_and_persist(&path).unwrap();
        assert!(!token.as_str().contains('='));
    }

    #[test]
    fn health_and_token_bootstrap_routes_are_exempt() {
        assert!(is_exempt("/health", &http::Method::GET));
        assert!(is_exempt("/health/services", &http::Method::GET));
        assert!(is_exempt("/api/auth/token", &http::Method::GET));
        assert!(is_exempt("/anything", &http::Method::OPTIONS));
        assert!(!is_exempt("/api/chat/send", &http::Method::POST));
    }
}
