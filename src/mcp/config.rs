//! Persisted MCP server configuration: `{servers: [...]}` JSON at a 0600 path.
//!
//! Per-server `env` values are stored through the caller as already-encrypted strings (the
//! supervisor decrypts at spawn time via [`crate::mcp::env::build`]); this module only owns the
//! shape of the file and its load/save mechanics.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::TheresError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MCPServerRecord {
    pub id: String,
    pub name: String,
    pub command: String,
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    pub enabled: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ServersFile {
    #[serde(default)]
    servers: Vec<MCPServerRecord>,
}

/// The on-disk record list, loaded into memory and rewritten wholesale on every mutation (small
/// N, infrequent writes, same approach as the preferences file).
pub struct ServerConfigStore {
    path: PathBuf,
    servers: Vec<MCPServerRecord>,
}

impl ServerConfigStore {
    pub fn load(path: &Path) -> Result<Self, TheresError> {
        let servers = if path.exists() {
            let raw = std::fs::read_to_string(path)
                .map_err(|e| TheresError::Unknown(format!("could not read {path:?}: {e}")))?;
            let file: ServersFile = serde_json::from_str(&raw)
                .map_err(|e| TheresError::Unknown(format!("malformed mcp config at {path:?}: {e}")))?;
            file.servers
        } else {
            Vec::new()
        };
        Ok(ServerConfigStore { path: path.to_path_buf(), servers })
    }

    pub fn servers(&self) -> &[MCPServerRecord] {
        &self.servers
    }

    /// Rejects a duplicate `(command, args)` pair. Allocates an 8-hex-character id.
    pub fn add_server(
        &mut self,
        name: String,
        command: String,
        args: Vec<String>,
        env: HashMap<String, String>,
        enabled: bool,
    ) -> Result<MCPServerRecord, TheresError> {
        if self.servers.iter().any(|s| s.command == command && s.args == args) {
            return Err(TheresError::Validation(format!(
                "a server with command \"{command}\" and the same arguments is already configured"
            )));
        }
        let record = MCPServerRecord {
            id: random_id(),
            name,
            command,
            args,
            env,
            enabled,
            created_at: chrono::Utc::now(),
        };
        self.servers.push(record.clone());
        self.persist()?;
        Ok(record)
    }

    pub fn remove_server(&mut self, id: &str) -> Result<(), TheresError> {
        let before = self.servers.len();
        self.servers.retain(|s| s.id != id);
        if self.servers.len() == before {
            return Err(TheresError::Validation(format!("no mcp server with id {id}")));
        }
        self.persist()
    }

    pub fn get(&self, id: &str) -> Option<&MCPServerRecord> {
        self.servers.iter().find(|s| s.id == id)
    }

    fn persist(&self) -> Result<(), TheresError> {
        let file = ServersFile { servers: self.servers.clone() };
        let json = serde_json::to_string_pretty(&file)
            .map_err(|e| TheresError::Unknown(format!("could not serialize mcp config: {e}")))?;
        write_0600(&self.path, &json)
    }
}

fn random_id() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 4];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(unix)]
fn write_0600(path: &Path, content: &str) -> Result<(), TheresError> {
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
    file.write_all(content.as_bytes())
        .map_err(|e| TheresError::Unknown(format!("could not write {path:?}: {e}")))
}

#[cfg(not(unix))]
fn write_0600(path: &Path, content: &str) -> Result<(), TheresError> {
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    std::fs::write(path, content).map_err(|e| TheresError::Unknown(format!("could not write {path:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_then_reload_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mcp_servers.json");

        let mut store = ServerConfigStore::load(&path).unwrap();
        store
            .add_server("fs".to_string(), "npx".to_string(), vec!["-y".to_string(), "mcp-fs".to_string()], HashMap::new(), true)
            .unwrap();

        let reloaded = ServerConfigStore::load(&path).unwrap();
        assert_eq!(reloaded.servers().len(), 1);
        assert_eq!(reloaded.servers()[0].name, "fs");
        assert!(reloaded.servers()[0].enabled);
    }

    #[test]
    fn duplicate_command_and_args_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mcp_servers.json");
        let mut store = ServerConfigStore::load(&path).unwrap();
        store
            .add_server("fs".to_string(), "npx".to_string(), vec!["-y".to_string()], HashMap::new(), true)
            .unwrap();
        let err = store
            .add_server("fs2".to_string(), "npx".to_string(), vec!["-y".to_string()], HashMap::new(), true)
            .unwrap_err();
        assert!(format!("{err}").contains("already configured"));
    }

    #[test]
    fn remove_server_drops_it_from_future_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mcp_servers.json");
        let mut store = ServerConfigStore::load(&path).unwrap();
        let record = store
            .add_server("fs".to_string(), "npx".to_string(), vec![], HashMap::new(), true)
            .unwrap();
        store.remove_server(&record.id).unwrap();
        let reloaded = ServerConfigStore::load(&path).unwrap();
        assert!(reloaded.servers().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn file_is_written_with_mode_0600() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mcp_servers.json");
        let mut store = ServerConfigStore::load(&path).unwrap();
        store
            .add_server("fs".to_string(), "npx".to_string(), vec![], HashMap::new(), true)
            .unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }
}
