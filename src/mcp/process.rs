//! One live MCP child process: its stdin writer, stdout reader, stderr drain, and pending
//! JSON-RPC request map.
//!
//! Writes to stdin are serialised through a single [`tokio::sync::Mutex`] (the supervisor's only
//! writer); stdout has a single dedicated reader task that demultiplexes responses by `id` into
//! the pending map; stderr has its own dedicated reader task — draining it is mandatory, since an
//! MCP server that fills its stderr pipe and blocks on a full buffer would otherwise deadlock.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;

use crate::error::TheresError;
use crate::mcp::rpc::{self, IncomingMessage, OutgoingNotification, OutgoingRequest, RpcErrorObject};

type PendingSender = oneshot::Sender<Result<Value, RpcErrorObject>>;

/// A spawned, running MCP server process and the plumbing to talk JSON-RPC with it.
pub struct ChildProcess {
    name: String,
    child: Mutex<Child>,
    stdin: Mutex<ChildStdin>,
    next_id: AtomicU64,
    pending: Arc<DashMap<u64, PendingSender>>,
    pending_since: Arc<DashMap<u64, Instant>>,
    stdout_task: JoinHandle<()>,
    stderr_task: JoinHandle<()>,
}

impl ChildProcess {
    /// Spawn `command args...` with exactly `env` as its environment (no inheritance beyond
    /// what the caller already merged in, per the MCP environment whitelist).
    pub fn spawn(name: &str, command: &Path, args: &[String], env: HashMap<String, String>) -> Result<Self, TheresError> {
        let mut cmd = Command::new(command);
        cmd.args(args);
        cmd.env_clear();
        cmd.envs(env);
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            TheresError::Validation(format!("could not start mcp server {name}: {e}"))
        })?;

        let stdin = child.stdin.take().expect("piped stdin");
        let stdout = child.stdout.take().expect("piped stdout");
        let stderr = child.stderr.take().expect("piped stderr");

        let pending: Arc<DashMap<u64, PendingSender>> = Arc::new(DashMap::new());
        let pending_since: Arc<DashMap<u64, Instant>> = Arc::new(DashMap::new());

        let stdout_task = {
            let pending = pending.clone();
            let pending_since = pending_since.clone();
            let name = name.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                loop {
                    match lines.next_line().await {
                        Ok(Some(line)) => {
                            if let IncomingMessage::Response { id, result } = rpc::parse_line(&line) {
                                pending_since.remove(&id);
                                if let Some((_, sender)) = pending.remove(&id) {
                                    let _ = sender.send(result);
                                }
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            log::error!("mcp server {name}: stdout read error: {e}");
                            break;
                        }
                    }
                }
            })
        };

        let stderr_task = {
            let name = name.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let lower = line.to_ascii_lowercase();
                    if lower.contains("fatal") || lower.contains("error") {
                        log::error!("mcp server {name} stderr: {line}");
                    } else if lower.contains("warn") {
                        log::warn!("mcp server {name} stderr: {line}");
                    } else {
                        log::debug!("mcp server {name} stderr: {line}");
                    }
                }
            })
        };

        Ok(ChildProcess {
            name: name.to_string(),
            child: Mutex::new(child),
            stdin: Mutex::new(stdin),
            next_id: AtomicU64::new(1),
            pending,
            pending_since,
            stdout_task,
            stderr_task,
        })
    }

    /// Send a request and await its correlated response, failing with a typed timeout if none
    /// arrives within `timeout` (30s per call). Allocates its own id from
    /// this process's local counter — fine standalone, but the supervisor uses
    /// [`ChildProcess::call_with_id`] with a counter shared across every server it owns, so log
    /// correlation across servers stays unambiguous.
    pub async fn call(&self, method: &str, params: Option<Value>, timeout: Duration) -> Result<Value, TheresError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.call_with_id(id, method, params, timeout).await
    }

    pub async fn call_with_id(&self, id: u64, method: &str, params: Option<Value>, timeout: Duration) -> Result<Value, TheresError> {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);
        self.pending_since.insert(id, Instant::now());

        let line = OutgoingRequest::new(id, method, params).to_line();
        {
            let mut stdin = self.stdin.lock().await;
            if let Err(e) = stdin.write_all(line.as_bytes()).await {
                self.pending.remove(&id);
                self.pending_since.remove(&id);
                return Err(TheresError::ApiUnreachable {
                    provider: self.name.clone(),
                    detail: format!("could not write to mcp server stdin: {e}"),
                });
            }
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(error))) => Err(TheresError::GenerationFailed {
                provider: self.name.clone(),
                detail: format!("mcp error {}: {}", error.code, error.message),
            }),
            Ok(Err(_)) => Err(TheresError::ApiUnreachable {
                provider: self.name.clone(),
                detail: "mcp server closed its connection before responding".to_string(),
            }),
            Err(_) => {
                self.pending.remove(&id);
                self.pending_since.remove(&id);
                Err(TheresError::ApiTimeout { provider: self.name.clone(), timeout_secs: timeout.as_secs() })
            }
        }
    }

    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), TheresError> {
        let line = OutgoingNotification::new(method, params).to_line();
        let mut stdin = self.stdin.lock().await;
        stdin.write_all(line.as_bytes()).await.map_err(|e| TheresError::ApiUnreachable {
            provider: self.name.clone(),
            detail: format!("could not write notification to mcp server stdin: {e}"),
        })
    }

    /// Drop any pending request older than `max_age`, failing it silently (its sender is simply
    /// dropped, which completes the corresponding `call()`'s `rx.await` with an error). Intended
    /// to run from the supervisor's periodic reaper.
    pub fn reap_stale(&self, max_age: Duration) {
        let now = Instant::now();
        let stale: Vec<u64> = self
            .pending_since
            .iter()
            .filter(|entry| now.duration_since(*entry.value()) > max_age)
            .map(|entry| *entry.key())
            .collect();
        for id in stale {
            self.pending_since.remove(&id);
            self.pending.remove(&id);
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// SIGTERM, wait up to `grace`, else SIGKILL.
    pub async fn stop_gracefully(&self, grace: Duration) {
        let pid = { self.child.lock().await.id() };
        #[cfg(unix)]
        if let Some(pid) = pid {
            unsafe {
                libc::kill(pid as i32, libc::SIGTERM);
            }
        }
        #[cfg(not(unix))]
        let _ = pid;

        let mut child = self.child.lock().await;
        if tokio::time::timeout(grace, child.wait()).await.is_err() {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
    }
}

impl Drop for ChildProcess {
    fn drop(&mut self) {
        self.stdout_task.abort();
        self.stderr_task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    /// A tiny scripted MCP server: reads JSON-RPC lines from stdin, replies to `initialize` and
    /// `tools/list` with canned results, echoes `echo` tool calls, and logs a `warn:` line to
    /// stderr on startup so the stderr-keyword classification has something to observe.
    fn scripted_server_script() -> &'static str {
        r#"
import sys, json

def reply(id, result):
    sys.stdout.write(json.dumps({"jsonrpc": "2.0", "id": id, "result": result}) + "\n")
    sys.stdout.flush()

sys.stderr.write("warn: starting up\n")
sys.stderr.flush()

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

    fn python3_path() -> Option<std::path::PathBuf> {
        which::which("python3").ok()
    }

    #[tokio::test]
    async fn initialize_and_tools_list_round_trip() {
        let Some(python3) = python3_path() else {
            eprintln!("skipping: python3 not found on this machine");
            return;
        };
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path());

        let child = ChildProcess::spawn(
            "test-server",
            &python3,
            &[script.to_string_lossy().to_string()],
            HashMap::new(),
        )
        .unwrap();

        let init = child
            .call("initialize", Some(serde_json::json!({"protocolVersion": rpc::PROTOCOL_VERSION})), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(init["protocolVersion"], rpc::PROTOCOL_VERSION);

        let tools = child.call("tools/list", None, Duration::from_secs(5)).await.unwrap();
        assert_eq!(tools["tools"][0]["name"], "echo");

        let call = child
            .call("tools/call", Some(serde_json::json!({"name": "echo", "arguments": {"x": 1}})), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(call["content"]["x"], 1);

        child.stop_gracefully(Duration::from_secs(5)).await;
    }

    #[tokio::test]
    async fn call_times_out_when_server_never_responds() {
        let Some(python3) = python3_path() else {
            eprintln!("skipping: python3 not found on this machine");
            return;
        };
        let dir = tempfile::tempdir().unwrap();
        // A server that reads stdin but never writes a reply.
        let path = dir.path().join("silent_server.py");
        std::fs::write(&path, "import sys\nfor _ in sys.stdin:\n    pass\n").unwrap();

        let child = ChildProcess::spawn("silent", &python3, &[path.to_string_lossy().to_string()], HashMap::new()).unwrap();
        let result = child.call("initialize", None, Duration::from_millis(200)).await;
        assert!(matches!(result, Err(TheresError::ApiTimeout { .. })));
        assert_eq!(child.pending_count(), 0, "timed-out request must be removed from the pending map");
        child.stop_gracefully(Duration::from_millis(200)).await;
    }
}
