//! Request-scoped security envelope: secret encryption, the session-token handshake,
//! prompt-injection screening, and the file-indexing path sandbox.

pub mod encryption;
pub mod injection_guard;
pub mod path_sandbox;
pub mod session_token;

pub use encryption::EncryptionService;
pub use injection_guard::{screen, ThreatLevel, ThreatType};
pub use session_token::SessionToken;
