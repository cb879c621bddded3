//! Minimal environment whitelist handed to MCP child processes.
//!
//! The child never inherits the full process environment — only a small whitelist plus the
//! server's own declared `env`, so a compromised or merely buggy tool server cannot read the
//! host's other provider API keys out of its environment.

use std::collections::HashMap;

const ALWAYS_PASSED: &[&str] = &["PATH", "HOME", "USER", "LANG", "TERM", "NODE_PATH", "TMPDIR"];
const PASSED_IF_SET: &[&str] = &["NVM_DIR", "NVM_BIN", "NPM_CONFIG_PREFIX"];

/// Build the environment for a child process: the whitelist read from the current process's own
/// environment, then `declared_env` merged on top (decrypting any value that looks encrypted).
pub async fn build(
    declared_env: &HashMap<String, String>,
    encryption: &crate::security::EncryptionService,
) -> HashMap<String, String> {
    let mut env = HashMap::new();
    for key in ALWAYS_PASSED.iter().chain(PASSED_IF_SET.iter()) {
        if let Ok(value) = std::env::var(key) {
            env.insert(key.to_string(), value);
        }
    }
    for (key, value) in declared_env {
        let resolved = if crate::security::EncryptionService::is_encrypted(value) {
            encryption.decrypt(value).await.unwrap_or_else(|_| value.clone())
        } else {
            value.clone()
        };
        env.insert(key.clone(), resolved);
    }
    env
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn host_environment_is_not_inherited_wholesale() {
        std::env::set_var("THERESE_TEST_SECRET_LEAK_CHECK", "should-not-leak");
        let mut key = [0u8; 32];
        rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut key);
        let encryption = crate::security::EncryptionService::from_key(&key);
        let env = build(&HashMap::new(), &encryption).await;
        assert!(!env.contains_key("THERESE_TEST_SECRET_LEAK_CHECK"));
        std::env::remove_var("THERESE_TEST_SECRET_LEAK_CHECK");
    }

    #[tokio::test]
    async fn declared_env_is_merged_and_decrypted() {
        let mut key = [0u8; 32];
        rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut key);
        let encryption = crate::security::EncryptionService::from_key(&key);
        let encrypted = encryption.encrypt("secret-value").await.unwrap();
        let mut declared = HashMap::new();
        declared.insert("API_TOKEN".to_string(), encrypted);
        declared.insert("PLAIN".to_string(), "plain-value".to_string());

        let env = build(&declared, &encryption).await;
        assert_eq!(env.get("API_TOKEN").map(String::as_str), Some("secret-value"));
        assert_eq!(env.get("PLAIN").map(String::as_str), Some("plain-value"));
    }
}
