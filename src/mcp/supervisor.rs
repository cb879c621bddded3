//! The MCP supervisor: owns every configured server's lifecycle, child process, and tool
//! namespace, and multiplexes JSON-RPC calls across them behind one shared request-id counter.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::error::TheresError;
use crate::llm::message::ToolDefinition;
use crate::mcp::config::{MCPServerRecord, ServerConfigStore};
use crate::mcp::env;
use crate::mcp::process::ChildProcess;
use crate::mcp::rpc::PROTOCOL_VERSION;
use crate::mcp::sandbox;
use crate::security::EncryptionService;

const CALL_TIMEOUT: Duration = Duration::from_secs(30);
const REAP_INTERVAL: Duration = Duration::from_secs(30);
const REAP_MAX_AGE: Duration = Duration::from_secs(60);
const STOP_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum ServerStatus {
    Stopped,
    Starting,
    Running,
    Error { message: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct MCPTool {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub server_id: String,
}

/// A server as seen by callers: its persisted record, live status, and populated tools.
#[derive(Clone, Serialize)]
pub struct ServerView {
    pub id: String,
    pub name: String,
    pub command: String,
    pub args: Vec<String>,
    pub enabled: bool,
    pub status: ServerStatus,
    pub tools: Vec<MCPTool>,
}

struct RunningServer {
    process: Arc<ChildProcess>,
}

struct ServerState {
    record: MCPServerRecord,
    status: ServerStatus,
    tools: Vec<MCPTool>,
    running: Option<RunningServer>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolCallResult {
    pub tool_name: String,
    pub server_id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub execution_time_ms: u64,
}

pub struct McpSupervisor {
    config_path: PathBuf,
    states: DashMap<String, Mutex<ServerState>>,
    request_ids: AtomicU64,
    encryption: Arc<EncryptionService>,
    reaper: Mutex<Option<JoinHandle<()>>>,
}

impl McpSupervisor {
    /// Load the persisted config and auto-start every `enabled` server. Spawns the periodic
    /// reaper task.
    pub async fn load(config_path: PathBuf, encryption: Arc<EncryptionService>) -> Result<Arc<Self>, TheresError> {
        let store = ServerConfigStore::load(&config_path)?;
        let states = DashMap::new();
        for record in store.servers() {
            states.insert(
                record.id.clone(),
                Mutex::new(ServerState {
                    record: record.clone(),
                    status: ServerStatus::Stopped,
                    tools: Vec::new(),
                    running: None,
                }),
            );
        }

        let supervisor = Arc::new(McpSupervisor {
            config_path,
            states,
            request_ids: AtomicU64::new(1),
            encryption,
            reaper: Mutex::new(None),
        });

        let to_start: Vec<String> = supervisor
            .states
            .iter()
            .filter(|e| e.value().try_lock().map(|s| s.record.enabled).unwrap_or(false))
            .map(|e| e.key().clone())
            .collect();
        for id in to_start {
            if let Err(e) = supervisor.start_server(&id).await {
                log::warn!("mcp server {id} failed to auto-start: {e}");
            }
        }

        supervisor.spawn_reaper().await;
        Ok(supervisor)
    }

    async fn spawn_reaper(self: &Arc<Self>) {
        let supervisor = Arc::clone(self);
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(REAP_INTERVAL).await;
                for entry in supervisor.states.iter() {
                    if let Ok(state) = entry.value().try_lock() {
                        if let Some(running) = &state.running {
                            running.process.reap_stale(REAP_MAX_AGE);
                        }
                    }
                }
            }
        });
        *self.reaper.lock().await = Some(handle);
    }

    pub async fn add_server(
        &self,
        name: String,
        command: String,
        args: Vec<String>,
        env: HashMap<String, String>,
        enabled: bool,
    ) -> Result<ServerView, TheresError> {
        sandbox::validate(&command, &args.iter().map(String::as_str).collect::<Vec<_>>())?;

        let mut store = ServerConfigStore::load(&self.config_path)?;
        let record = store.add_server(name, command, args, env, enabled)?;
        self.states.insert(
            record.id.clone(),
            Mutex::new(ServerState {
                record: record.clone(),
                status: ServerStatus::Stopped,
                tools: Vec::new(),
                running: None,
            }),
        );
        Ok(ServerView {
            id: record.id,
            name: record.name,
            command: record.command,
            args: record.args,
            enabled: record.enabled,
            status: ServerStatus::Stopped,
            tools: Vec::new(),
        })
    }

    pub async fn remove_server(&self, id: &str) -> Result<(), TheresError> {
        if self.states.contains_key(id) {
            let _ = self.stop_server(id).await;
        }
        self.states.remove(id);
        let mut store = ServerConfigStore::load(&self.config_path)?;
        store.remove_server(id)
    }

    pub fn list_servers(&self) -> Vec<ServerView> {
        let mut views = Vec::new();
        for entry in self.states.iter() {
            if let Ok(state) = entry.value().try_lock() {
                views.push(ServerView {
                    id: state.record.id.clone(),
                    name: state.record.name.clone(),
                    command: state.record.command.clone(),
                    args: state.record.args.clone(),
                    enabled: state.record.enabled,
                    status: state.status.clone(),
                    tools: state.tools.clone(),
                });
            }
        }
        views
    }

    /// Every running server's tools, flattened into the namespaced `"<server_id>__<tool_name>"`
    /// shape the LLM layer expects. Used to build the `tools` argument passed into
    /// [`crate::llm::facade::LLMFacade::stream_chat`].
    pub fn all_tool_definitions(&self) -> Vec<ToolDefinition> {
        self.list_servers()
            .into_iter()
            .flat_map(|server| {
                server.tools.into_iter().map(move |tool| ToolDefinition {
                    name: format!("{}__{}", tool.server_id, tool.name),
                    description: tool.description,
                    parameters_schema: tool.input_schema,
                })
            })
            .collect()
    }

    fn next_request_id(&self) -> u64 {
        self.request_ids.fetch_add(1, Ordering::SeqCst)
    }

    /// `stopped → starting → running`, or `starting → error` on spawn/handshake failure.
    pub async fn start_server(&self, id: &str) -> Result<(), TheresError> {
        let entry = self
            .states
            .get(id)
            .ok_or_else(|| TheresError::Validation(format!("no mcp server with id {id}")))?;
        let mut state = entry.lock().await;

        let command_path = sandbox::validate(&state.record.command, &state.record.args.iter().map(String::as_str).collect::<Vec<_>>())?;
        state.status = ServerStatus::Starting;

        let env = env::build(&state.record.env, &self.encryption).await;
        let process = match ChildProcess::spawn(&state.record.name, &command_path, &state.record.args, env) {
            Ok(p) => Arc::new(p),
            Err(e) => {
                state.status = ServerStatus::Error { message: e.to_string() };
                return Err(e);
            }
        };

        let init_params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "clientInfo": { "name": "therese", "version": env!("CARGO_PKG_VERSION") },
            "capabilities": {},
        });
        if let Err(e) = process.call_with_id(self.next_request_id(), "initialize", Some(init_params), CALL_TIMEOUT).await {
            state.status = ServerStatus::Error { message: e.to_string() };
            return Err(e);
        }
        let _ = process.notify("notifications/initialized", None).await;

        let tools = match process.call_with_id(self.next_request_id(), "tools/list", None, CALL_TIMEOUT).await {
            Ok(value) => parse_tools(&value, id),
            Err(e) => {
                state.status = ServerStatus::Error { message: e.to_string() };
                return Err(e);
            }
        };

        state.tools = tools;
        state.running = Some(RunningServer { process });
        state.status = ServerStatus::Running;
        Ok(())
    }

    /// `running → stopped`: SIGTERM then wait up to 5s, else SIGKILL. Clears the tool list.
    pub async fn stop_server(&self, id: &str) -> Result<(), TheresError> {
        let entry = self
            .states
            .get(id)
            .ok_or_else(|| TheresError::Validation(format!("no mcp server with id {id}")))?;
        let mut state = entry.lock().await;
        if let Some(running) = state.running.take() {
            running.process.stop_gracefully(STOP_GRACE).await;
        }
        state.tools.clear();
        state.status = ServerStatus::Stopped;
        Ok(())
    }

    /// Splits `"<server_id>__<tool_name>"` on the first `__` and routes to that server's
    /// `tools/call`.
    pub async fn execute_tool_call(&self, namespaced_tool: &str, arguments: Value) -> ToolCallResult {
        let started = std::time::Instant::now();
        let Some((server_id, tool_name)) = namespaced_tool.split_once("__") else {
            return ToolCallResult {
                tool_name: namespaced_tool.to_string(),
                server_id: String::new(),
                success: false,
                result: None,
                error: Some(format!("\"{namespaced_tool}\" is not a namespaced tool call")),
                execution_time_ms: 0,
            };
        };

        let Some(entry) = self.states.get(server_id) else {
            return ToolCallResult {
                tool_name: tool_name.to_string(),
                server_id: server_id.to_string(),
                success: false,
                result: None,
                error: Some(format!("no mcp server with id {server_id}")),
                execution_time_ms: started.elapsed().as_millis() as u64,
            };
        };
        let state = entry.lock().await;
        let Some(running) = &state.running else {
            return ToolCallResult {
                tool_name: tool_name.to_string(),
                server_id: server_id.to_string(),
                success: false,
                result: None,
                error: Some(format!("mcp server {server_id} is not running")),
                execution_time_ms: started.elapsed().as_millis() as u64,
            };
        };

        let params = json!({ "name": tool_name, "arguments": arguments });
        let process = Arc::clone(&running.process);
        drop(state);

        match process.call_with_id(self.next_request_id(), "tools/call", Some(params), CALL_TIMEOUT).await {
            Ok(result) => ToolCallResult {
                tool_name: tool_name.to_string(),
                server_id: server_id.to_string(),
                success: true,
                result: Some(result),
                error: None,
                execution_time_ms: started.elapsed().as_millis() as u64,
            },
            Err(e) => ToolCallResult {
                tool_name: tool_name.to_string(),
                server_id: server_id.to_string(),
                success: false,
                result: None,
                error: Some(e.user_safe_message()),
                execution_time_ms: started.elapsed().as_millis() as u64,
            },
        }
    }

    /// Stops the reaper, then every running server, in no particular order.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.reaper.lock().await.take() {
            handle.abort();
        }
        let ids: Vec<String> = self.states.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            let _ = self.stop_server(&id).await;
        }
    }
}

fn parse_tools(tools_list_result: &Value, server_id: &str) -> Vec<MCPTool> {
    tools_list_result
        .get("tools")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(|t| {
                    Some(MCPTool {
                        name: t.get("name")?.as_str()?.to_string(),
                        description: t.get("description").and_then(Value::as_str).unwrap_or("").to_string(),
                        input_schema: t.get("inputSchema").cloned().unwrap_or(json!({"type": "object"})),
                        server_id: server_id.to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn scripted_server_script() -> &'static str {
        r#"
import sys, json

def reply(id, result):
    sys.stdout.write(json.dumps({"jsonrpc": "2.0", "id": id, "result": result}) + "\n")
    sys.stdout.flush()

for raw in sys.stdin:
    raw = raw.strip()
    if not raw:
        continue
    msg = json.loads(raw)
    method = msg.get("method")
    msg_id = msg.get("id")
    if method == "initialize":
        reply(msg_id, {"protocolVersion": "2024-11-05"})
    elif method == "tools/list":
        reply(msg_id, {"tools": [{"name": "echo", "description": "", "inputSchema": {"type": "object"}}]})
    elif method == "tools/call":
        params = msg.get("params", {})
        reply(msg_id, {"content": params.get("arguments", {})})
    elif msg_id is not None:
        reply(msg_id, {})
"#
    }

    fn write_script(dir: &std::path::Path) -> std::path::PathBuf {
        let path = dir.join("scripted_server.py");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(scripted_server_script().as_bytes()).unwrap();
        path
    }

    fn test_encryption() -> Arc<EncryptionService> {
        let mut key = [0u8; 32];
        rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut key);
        Arc::new(EncryptionService::from_key(&key))
    }

    #[tokio::test]
    async fn start_server_transitions_to_running_and_populates_echo_tool() {
        let Ok(python3) = which::which("python3") else {
            eprintln!("skipping: python3 not found");
            return;
        };
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path());
        let config_path = dir.path().join("mcp_servers.json");

        let supervisor = McpSupervisor::load(config_path, test_encryption()).await.unwrap();
        let view = supervisor
            .add_server(
                "scripted".to_string(),
                python3.to_string_lossy().to_string(),
                vec![script.to_string_lossy().to_string()],
                HashMap::new(),
                false,
            )
            .await
            .unwrap();
        assert_eq!(view.status, ServerStatus::Stopped);

        supervisor.start_server(&view.id).await.unwrap();
        let servers = supervisor.list_servers();
        let started = servers.iter().find(|s| s.id == view.id).unwrap();
        assert_eq!(started.status, ServerStatus::Running);
        assert_eq!(started.tools.len(), 1);
        assert_eq!(started.tools[0].name, "echo");

        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn execute_tool_call_routes_by_namespace_and_returns_success() {
        let Ok(python3) = which::which("python3") else {
            eprintln!("skipping: python3 not found");
            return;
        };
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path());
        let config_path = dir.path().join("mcp_servers.json");

        let supervisor = McpSupervisor::load(config_path, test_encryption()).await.unwrap();
        let view = supervisor
            .add_server(
                "scripted".to_string(),
                python3.to_string_lossy().to_string(),
                vec![script.to_string_lossy().to_string()],
                HashMap::new(),
                false,
            )
            .await
            .unwrap();
        supervisor.start_server(&view.id).await.unwrap();

        let namespaced = format!("{}__echo", view.id);
        let result = supervisor.execute_tool_call(&namespaced, json!({"x": 1})).await;
        assert!(result.success);
        assert_eq!(result.result.unwrap()["content"]["x"], 1);

        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn all_tool_definitions_namespaces_by_server_id() {
        let Ok(python3) = which::which("python3") else {
            eprintln!("skipping: python3 not found");
            return;
        };
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path());
        let config_path = dir.path().join("mcp_servers.json");

        let supervisor = McpSupervisor::load(config_path, test_encryption()).await.unwrap();
        let view = supervisor
            .add_server(
                "scripted".to_string(),
                python3.to_string_lossy().to_string(),
                vec![script.to_string_lossy().to_string()],
                HashMap::new(),
                false,
            )
            .await
            .unwrap();
        supervisor.start_server(&view.id).await.unwrap();

        let definitions = supervisor.all_tool_definitions();
        assert_eq!(definitions.len(), 1);
        assert_eq!(definitions[0].name, format!("{}__echo", view.id));

        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn execute_tool_call_on_unknown_server_fails_gracefully() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("mcp_servers.json");
        let supervisor = McpSupervisor::load(config_path, test_encryption()).await.unwrap();
        let result = supervisor.execute_tool_call("nonexistent__tool", json!({})).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("no mcp server"));
    }

    #[tokio::test]
    async fn add_server_rejects_blocked_command() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("mcp_servers.json");
        let supervisor = McpSupervisor::load(config_path, test_encryption()).await.unwrap();
        let err = supervisor
            .add_server("bad".to_string(), "rm".to_string(), vec![], HashMap::new(), false)
            .await
            .unwrap_err();
        assert!(format!("{err}").to_lowercase().contains("bloqu"));
    }
}
