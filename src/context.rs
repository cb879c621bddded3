//! User-scoped context that gets woven into every system prompt: stored preferences, identity,
//! and the long-form `ASSISTANT.md` the user maintains by hand.
//!
//! Storage and identity sit behind traits (`PreferencesStore`, `UserIdentityProvider`) rather
//! than one concrete profile type, the same way transport sits behind a client trait elsewhere
//! in this crate instead of a hardcoded HTTP client.

use std::path::PathBuf;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::TheresError;

/// Flat key-value preferences: `llm_provider`, `llm_model`, `{provider}_api_key`, and any
/// future setting. Kept flat rather than a typed struct so a new provider's API key doesn't
/// require a schema migration.
#[async_trait]
pub trait PreferencesStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, TheresError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), TheresError>;
    async fn delete(&self, key: &str) -> Result<(), TheresError>;
}

/// Who the assistant is talking to: name and any free-form identity facts (pronouns, role,
/// timezone) the user has chosen to share.
#[derive(Debug, Clone, Default)]
pub struct UserIdentity {
    pub name: Option<String>,
    pub facts: Vec<String>,
}

#[async_trait]
pub trait UserIdentityProvider: Send + Sync {
    async fn current(&self) -> Result<UserIdentity, TheresError>;
}

/// [`UserIdentityProvider`] backed by a [`PreferencesStore`]: reads `user_name` and
/// `user_facts` (a JSON array of strings) out of the same flat preferences a `PreferencesStore`
/// already holds, rather than introducing a second storage mechanism for one small record.
pub struct PreferencesIdentityProvider {
    preferences: std::sync::Arc<dyn PreferencesStore>,
}

impl PreferencesIdentityProvider {
    pub fn new(preferences: std::sync::Arc<dyn PreferencesStore>) -> Self {
        PreferencesIdentityProvider { preferences }
    }
}

#[async_trait]
impl UserIdentityProvider for PreferencesIdentityProvider {
    async fn current(&self) -> Result<UserIdentity, TheresError> {
        let name = self.preferences.get("user_name").await?;
        let facts = match self.preferences.get("user_facts").await? {
            Some(raw) => serde_json::from_str(&raw).unwrap_or_default(),
            None => Vec::new(),
        };
        Ok(UserIdentity { name, facts })
    }
}

/// File-backed [`PreferencesStore`]: a flat JSON object at `<therese_dir>/preferences.json`.
/// Any key ending in `_api_key` is transparently encrypted at rest via [`EncryptionService`] and
/// decrypted on read; every other key is stored in plaintext (the Non-goal excluding encryption
/// at rest for non-secret settings).
pub struct FilePreferencesStore {
    path: std::path::PathBuf,
    encryption: std::sync::Arc<crate::security::EncryptionService>,
    cache: tokio::sync::Mutex<std::collections::HashMap<String, String>>,
}

impl FilePreferencesStore {
    pub fn new(path: std::path::PathBuf, encryption: std::sync::Arc<crate::security::EncryptionService>) -> Self {
        FilePreferencesStore {
            path,
            encryption,
            cache: tokio::sync::Mutex::new(std::collections::HashMap::new()),
        }
    }

    fn load_from_disk(&self) -> std::collections::HashMap<String, String> {
        std::fs::read_to_string(&self.path)
            .ok()
            .and_then(|text| serde_json::from_str(&text).ok())
            .unwrap_or_default()
    }

    fn persist(&self, values: &std::collections::HashMap<String, String>) -> Result<(), TheresError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| TheresError::Unknown(format!("could not create {parent:?}: {e}")))?;
        }
        let text = serde_json::to_string_pretty(values)
            .map_err(|e| TheresError::Unknown(format!("could not serialize preferences: {e}")))?;
        std::fs::write(&self.path, text)
            .map_err(|e| TheresError::Unknown(format!("could not write {:?}: {e}", self.path)))
    }
}

#[async_trait]
impl PreferencesStore for FilePreferencesStore {
    async fn get(&self, key: &str) -> Result<Option<String>, TheresError> {
        let mut cache = self.cache.lock().await;
        if cache.is_empty() {
            *cache = self.load_from_disk();
        }
        let Some(raw) = cache.get(key).cloned() else {
            return Ok(None);
        };
        if key.ends_with("_api_key") {
            Ok(Some(self.encryption.decrypt(&raw).await?))
        } else {
            Ok(Some(raw))
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), TheresError> {
        let stored = if key.ends_with("_api_key") {
            self.encryption.encrypt(value).await?
        } else {
            value.to_string()
        };
        let mut cache = self.cache.lock().await;
        if cache.is_empty() {
            *cache = self.load_from_disk();
        }
        cache.insert(key.to_string(), stored);
        self.persist(&cache)
    }

    async fn delete(&self, key: &str) -> Result<(), TheresError> {
        let mut cache = self.cache.lock().await;
        if cache.is_empty() {
            *cache = self.load_from_disk();
        }
        cache.remove(key);
        self.persist(&cache)
    }
}

const PRIMARY_PROMPT_BUDGET_CHARS: usize = 10_000;
const BOARD_ADVISOR_BUDGET_CHARS: usize = 8_000;

/// Loads and caches `ASSISTANT.md`, the user's hand-maintained long-form context file.
///
/// Checked first at `~/.therese/ASSISTANT.md`, falling back to `~/ASSISTANT.md` so a user who
/// already keeps one at their home directory root for other tools doesn't have to duplicate it.
/// The file is read once and cached; `reload()` forces a re-read, e.g. in response to a file-
/// watcher event or an explicit user action in the shell.
pub struct AssistantContext {
    primary_path: PathBuf,
    fallback_path: PathBuf,
    cached: RwLock<Option<String>>,
}

impl AssistantContext {
    pub fn new(therese_dir: PathBuf, home_dir: PathBuf) -> Self {
        AssistantContext {
            primary_path: therese_dir.join("ASSISTANT.md"),
            fallback_path: home_dir.join("ASSISTANT.md"),
            cached: RwLock::new(None),
        }
    }

    fn read_from_disk(&self) -> Option<String> {
        std::fs::read_to_string(&self.primary_path)
            .or_else(|_| std::fs::read_to_string(&self.fallback_path))
            .ok()
    }

    /// Force a re-read from disk, replacing any cached contents.
    pub fn reload(&self) {
        let fresh = self.read_from_disk();
        *self.cached.write().expect("assistant context lock poisoned") = fresh;
    }

    fn contents(&self) -> Option<String> {
        {
            let cached = self.cached.read().expect("assistant context lock poisoned");
            if let Some(text) = cached.as_ref() {
                return Some(text.clone());
            }
        }
        let fresh = self.read_from_disk();
        *self.cached.write().expect("assistant context lock poisoned") = fresh.clone();
        fresh
    }

    /// Truncated to the primary system-prompt budget (10,000 chars).
    pub fn for_primary_prompt(&self) -> Option<String> {
        self.contents().map(|text| truncate_chars(&text, PRIMARY_PROMPT_BUDGET_CHARS))
    }

    /// Truncated to the (smaller) board-advisor budget (8,000 chars) — advisor prompts already
    /// carry the question, the other advisors' framing, and synthesis instructions, so less room
    /// is left for long-form context before a single advisor's prompt would dominate its own
    /// provider's context window.
    pub fn for_board_prompt(&self) -> Option<String> {
        self.contents().map(|text| truncate_chars(&text, BOARD_ADVISOR_BUDGET_CHARS))
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn falls_back_to_home_directory_assistant_md() {
        let dir = tempfile::tempdir().unwrap();
        let therese_dir = dir.path().join(".therese");
        let home_dir = dir.path().to_path_buf();
        fs::write(home_dir.join("ASSISTANT.md"), "fallback context").unwrap();

        let ctx = AssistantContext::new(therese_dir, home_dir);
        assert_eq!(ctx.for_primary_prompt().as_deref(), Some("fallback context"));
    }

    #[test]
    fn prefers_therese_dir_over_home_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let therese_dir = dir.path().join(".therese");
        fs::create_dir_all(&therese_dir).unwrap();
        fs::write(therese_dir.join("ASSISTANT.md"), "primary context").unwrap();
        let home_dir = dir.path().to_path_buf();
        fs::write(home_dir.join("ASSISTANT.md"), "fallback context").unwrap();

        let ctx = AssistantContext::new(therese_dir, home_dir);
        assert_eq!(ctx.for_primary_prompt().as_deref(), Some("primary context"));
    }

    #[test]
    fn primary_and_board_budgets_differ() {
        let dir = tempfile::tempdir().unwrap();
        let therese_dir = dir.path().join(".therese");
        fs::create_dir_all(&therese_dir).unwrap();
        let long_text = "x".repeat(20_000);
        fs::write(therese_dir.join("ASSISTANT.md"), &long_text).unwrap();
        let home_dir = dir.path().to_path_buf();

        let ctx = AssistantContext::new(therese_dir, home_dir);
        assert_eq!(ctx.for_primary_prompt().unwrap().chars().count(), PRIMARY_PROMPT_BUDGET_CHARS);
        assert_eq!(ctx.for_board_prompt().unwrap().chars().count(), BOARD_ADVISOR_BUDGET_CHARS);
    }

    #[tokio::test]
    async fn file_preferences_store_encrypts_api_keys_at_rest() {
        let dir = tempfile::tempdir().unwrap();
        let mut key = [0u8; 32];
        rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut key);
        let encryption = std::sync::Arc::new(crate::security::EncryptionService::from_key(&key));
        let store = FilePreferencesStore::new(dir.path().join("preferences.json"), encryption);

        store.set("llm_provider", "anthropic").await.unwrap();
        store.set("anthropic_api_key", "sk-ant-secret").await.unwrap();

        assert_eq!(store.get("llm_provider").await.unwrap().as_deref(), Some("anthropic"));
        assert_eq!(store.get("anthropic_api_key").await.unwrap().as_deref(), Some("sk-ant-secret"));

        let raw_on_disk = std::fs::read_to_string(dir.path().join("preferences.json")).unwrap();
        assert!(!raw_on_disk.contains("sk-ant-secret"));
        assert!(raw_on_disk.contains("enc:v1:"));
    }

    #[test]
    fn reload_picks_up_changed_contents() {
        let dir = tempfile::tempdir().unwrap();
        let therese_dir = dir.path().join(".therese");
        fs::create_dir_all(&therese_dir).unwrap();
        fs::write(therese_dir.join("ASSISTANT.md"), "v1").unwrap();
        let home_dir = dir.path().to_path_buf();

        let ctx = AssistantContext::new(therese_dir.clone(), home_dir);
        assert_eq!(ctx.for_primary_prompt().as_deref(), Some("v1"));
        fs::write(therese_dir.join("ASSISTANT.md"), "v2").unwrap();
        assert_eq!(ctx.for_primary_prompt().as_deref(), Some("v1"), "stays cached until reload");
        ctx.reload();
        assert_eq!(ctx.for_primary_prompt().as_deref(), Some("v2"));
    }
}
