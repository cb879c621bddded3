//! Core data types shared by every provider adapter: [`Message`], [`ToolCall`], [`ToolResult`],
//! and [`StreamEvent`].
//!
//! `Message` is modelled as a struct with optional `tool_calls`/`tool_call_id` rather than a
//! classical tagged union so that the common fields (`role`, `content`) stay cheap to match on,
//! while the invariant that an assistant-with-tool-calls message and a tool-result message carry
//! different payloads is still enforced: `tool_calls` is only ever populated on `Assistant`
//! messages and `tool_call_id` only on `Tool` messages. Constructors enforce this; nothing
//! downstream needs to check both.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// The role a [`Message`] was authored under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A tool invocation requested by the LLM mid-stream.
///
/// `id` is opaque and provider-scoped: Anthropic issues `toolu_...` ids, OpenAI-compatible
/// providers issue `call_...` ids. `name` is namespaced `"<server_id>__<tool_name>"` by the MCP
/// supervisor before being handed to the LLM, so the orchestrator can route a reply without
/// consulting any other state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// The result of executing a [`ToolCall`], correlated back to it by `tool_call_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub result: serde_json::Value,
    pub is_error: bool,
}

impl ToolResult {
    /// Render `result` the way providers expect tool-result content: a string. Non-string JSON
    /// values are serialised; a bare JSON string is unwrapped so it isn't double-quoted.
    pub fn content_as_string(&self) -> String {
        match &self.result {
            serde_json::Value::String(s) => s.clone(),
            other => serde_json::to_string(other).unwrap_or_else(|_| "null".to_string()),
        }
    }
}

/// A single message in a conversation, immutable once emitted.
///
/// `tool_calls` is non-empty only on `Assistant` messages that requested one or more tool
/// invocations. `tool_call_id` is `Some` only on `Tool` messages, identifying which `ToolCall`
/// this is a reply to.
#[derive(Debug, Clone)]
pub struct Message {
    pub role: Role,
    pub content: Arc<str>,
    pub tool_calls: Vec<ToolCall>,
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn system(content: impl Into<Arc<str>>) -> Self {
        Message {
            role: Role::System,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<Arc<str>>) -> Self {
        Message {
            role: Role::User,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn assistant(content: impl Into<Arc<str>>) -> Self {
        Message {
            role: Role::Assistant,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn assistant_with_tool_calls(content: impl Into<Arc<str>>, tool_calls: Vec<ToolCall>) -> Self {
        Message {
            role: Role::Assistant,
            content: content.into(),
            tool_calls,
            tool_call_id: None,
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<Arc<str>>) -> Self {
        Message {
            role: Role::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }
}

/// Provider-agnostic tool schema passed alongside a chat request.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters_schema: serde_json::Value,
}

/// One event in the ordered stream a [`crate::llm::providers::Provider`] produces.
///
/// Exactly one terminal event (`Done` or `Error`) is emitted per successful stream; no `Text`
/// event follows a terminal one; a `ToolCall` for call *i* precedes any `Text` emitted after it
/// within the same turn.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Text(String),
    ToolCall(ToolCall),
    Done { stop_reason: String },
    Error { message: String, code: &'static str },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_result_unwraps_bare_json_strings() {
        let result = ToolResult {
            tool_call_id: "t1".into(),
            result: serde_json::Value::String("plain text".into()),
            is_error: false,
        };
        assert_eq!(result.content_as_string(), "plain text");
    }

    #[test]
    fn tool_result_stringifies_structured_json() {
        let result = ToolResult {
            tool_call_id: "t1".into(),
            result: serde_json::json!({"ok": true}),
            is_error: false,
        };
        assert_eq!(result.content_as_string(), r#"{"ok":true}"#);
    }
}
