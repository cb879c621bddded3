//! Process configuration.
//!
//! Callers construct a `Config` directly (or via [`Config::from_env`]); no TOML/YAML parser is
//! introduced for a handful of paths and env overrides.

use std::path::PathBuf;

/// Per-provider API key environment variable(s), in facade preference order. Some providers are
/// reachable under more than one historically-used variable name (Gemini's API predates the
/// "Gemini" branding and is still commonly configured via `GOOGLE_API_KEY`; Grok's API key is
/// also accepted as `GROQ_API_KEY` by some tooling that conflates Grok with Groq); the first
/// variable set in the environment wins.
pub const PROVIDER_ENV_KEYS: &[(&str, &[&str])] = &[
    ("anthropic", &["ANTHROPIC_API_KEY"]),
    ("openai", &["OPENAI_API_KEY", "OPENROUTER_API_KEY"]),
    ("gemini", &["GEMINI_API_KEY", "GOOGLE_API_KEY"]),
    ("mistral", &["MISTRAL_API_KEY"]),
    ("grok", &["XAI_API_KEY", "GROQ_API_KEY"]),
];

/// First environment variable set for `provider`, per [`PROVIDER_ENV_KEYS`]'s alias order.
pub fn provider_api_key_from_env(provider: &str) -> Option<String> {
    PROVIDER_ENV_KEYS
        .iter()
        .find(|(name, _)| *name == provider)
        .and_then(|(_, vars)| vars.iter().find_map(|var| std::env::var(var).ok()))
}

/// Process-wide configuration, populated from the environment at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// `THERESE_ENV` — `"development"` | `"production"`. Controls whether tracebacks are
    /// included in `UNKNOWN_ERROR` envelopes.
    pub env: String,
    /// `THERESE_DATA_DIR` — base directory for the relational store, vector store, and
    /// generated outputs. Defaults to the OS data directory for the application.
    pub data_dir: PathBuf,
    /// Home directory under which `.therese/` on-disk state lives.
    pub home_dir: PathBuf,
}

impl Config {
    /// Build configuration from environment variables, falling back to platform defaults.
    pub fn from_env() -> Self {
        let home_dir = std::env::var_os("HOME")
            .map(PathBuf::from)
            .or_else(|| directories::UserDirs::new().map(|d| d.home_dir().to_path_buf()))
            .unwrap_or_else(|| PathBuf::from("."));

        let data_dir = std::env::var_os("THERESE_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| home_dir.join(".therese").join("data"));

        Config {
            env: std::env::var("THERESE_ENV").unwrap_or_else(|_| "development".to_string()),
            data_dir,
            home_dir,
        }
    }

    /// `true` when running with `THERESE_ENV=production`.
    pub fn is_production(&self) -> bool {
        self.env == "production"
    }

    /// `~/.therese` — base directory for session token, encryption key, and MCP config files.
    pub fn therese_dir(&self) -> PathBuf {
        self.home_dir.join(".therese")
    }

    pub fn session_token_path(&self) -> PathBuf {
        self.therese_dir().join(".session_token")
    }

    pub fn encryption_key_path(&self) -> PathBuf {
        self.therese_dir().join(".encryption_key")
    }

    pub fn encryption_salt_path(&self) -> PathBuf {
        self.therese_dir().join(".encryption_salt")
    }

    pub fn mcp_servers_path(&self) -> PathBuf {
        self.therese_dir().join("mcp_servers.json")
    }

    pub fn assistant_context_paths(&self) -> [PathBuf; 2] {
        [
            self.therese_dir().join("ASSISTANT.md"),
            self.home_dir.join("ASSISTANT.md"),
        ]
    }

    pub fn relational_store_path(&self) -> PathBuf {
        self.data_dir.join("therese.db")
    }

    pub fn vector_store_dir(&self) -> PathBuf {
        self.data_dir.join("qdrant")
    }

    pub fn outputs_dir(&self) -> PathBuf {
        self.data_dir.join("outputs")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_are_nested_under_therese_dir() {
        let config = Config {
            env: "development".to_string(),
            data_dir: PathBuf::from("/data"),
            home_dir: PathBuf::from("/home/alice"),
        };
        assert_eq!(
            config.session_token_path(),
            PathBuf::from("/home/alice/.therese/.session_token")
        );
        assert_eq!(
            config.mcp_servers_path(),
            PathBuf::from("/home/alice/.therese/mcp_servers.json")
        );
    }

    #[test]
    fn gemini_key_falls_back_to_google_api_key_alias() {
        std::env::remove_var("GEMINI_API_KEY");
        std::env::set_var("GOOGLE_API_KEY", "alias-value");
        assert_eq!(provider_api_key_from_env("gemini").as_deref(), Some("alias-value"));
        std::env::remove_var("GOOGLE_API_KEY");
    }

    #[test]
    fn is_production_reads_env_field() {
        let mut config = Config::default();
        config.env = "production".to_string();
        assert!(config.is_production());
        config.env = "development".to_string();
        assert!(!config.is_production());
    }
}
