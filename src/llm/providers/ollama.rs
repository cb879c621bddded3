//! Native Ollama adapter.
//!
//! Ollama's local daemon speaks its own `/api/chat` dialect rather than the OpenAI Chat
//! Completions format: the response body is newline-delimited JSON objects (one per chunk), not
//! an SSE stream, and each chunk carries a bare `{"message": {"content": "..."}, "done": bool}`
//! shape with no `choices` array. A chunk's `message.content` may legitimately be an empty
//! string (Ollama emits one while "thinking" on some models) — that must not be yielded as a
//! `Text` event, but must also not be mistaken for the stream terminator; only `done: true` ends
//! the stream. Ollama never emits tool calls through this endpoint, so no tool-call parsing is
//! attempted here. A 120s read timeout (vs. the 30s default for cloud providers) gives slower
//! local models room to produce their first token.

use std::time::Duration;

use async_stream::stream;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use serde_json::{json, Value};

use crate::error::TheresError;
use crate::llm::http_pool;
use crate::llm::message::{Message, Role, StreamEvent, ToolDefinition};
use crate::llm::provider_config::{LLMConfig, Provider};

use super::LLMProvider;

const READ_TIMEOUT: Duration = Duration::from_secs(120);

pub struct OllamaProvider;

#[async_trait]
impl LLMProvider for OllamaProvider {
    fn provider(&self) -> Provider {
        Provider::Ollama
    }

    async fn stream_chat(
        &self,
        config: &LLMConfig,
        messages: &[Message],
        system_prompt: &str,
        _tools: &[ToolDefinition],
    ) -> Result<BoxStream<'static, StreamEvent>, TheresError> {
        let mut wire_messages = vec![json!({"role": "system", "content": system_prompt})];
        wire_messages.extend(messages.iter().map(to_ollama_message));

        let body = json!({
            "model": config.model,
            "messages": wire_messages,
            "stream": true,
        });

        let client = http_pool::client_for(&config.base_url);
        let response = client
            .post(format!("{}/chat", config.base_url))
            .timeout(READ_TIMEOUT)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_connect_error(&e))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &text));
        }

        let mut byte_stream = response.bytes_stream();

        let stream = stream! {
            let mut buffer = String::new();
            loop {
                let chunk = match byte_stream.next().await {
                    Some(Ok(bytes)) => bytes,
                    Some(Err(e)) => {
                        yield StreamEvent::Error { message: e.to_string(), code: "stream_decode_error" };
                        return;
                    }
                    None => break,
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));
                while let Some(newline_pos) = buffer.find('\n') {
                    let line = buffer[..newline_pos].trim().to_string();
                    buffer.drain(..=newline_pos);
                    if line.is_empty() {
                        continue;
                    }
                    let parsed: Value = match serde_json::from_str(&line) {
                        Ok(v) => v,
                        Err(_) => continue,
                    };
                    if let Some(error_message) = parsed.get("error").and_then(Value::as_str) {
                        yield StreamEvent::Error { message: error_message.to_string(), code: "provider_stream_error" };
                        return;
                    }
                    if let Some(content) = parsed
                        .get("message")
                        .and_then(|m| m.get("content"))
                        .and_then(Value::as_str)
                    {
                        if !content.is_empty() {
                            yield StreamEvent::Text(content.to_string());
                        }
                    }
                    if parsed.get("done").and_then(Value::as_bool).unwrap_or(false) {
                        let stop_reason = parsed
                            .get("done_reason")
                            .and_then(Value::as_str)
                            .unwrap_or("stop")
                            .to_string();
                        yield StreamEvent::Done { stop_reason };
                        return;
                    }
                }
            }
            // Stream closed without an explicit `done: true` chunk (connection drop mid-body).
            yield StreamEvent::Error {
                message: "ollama closed the connection before completing the response".to_string(),
                code: "stream_truncated",
            };
        };

        Ok(stream.boxed())
    }
}

/// Ollama's `/api/chat` has no `tool` role (no tool-calling support here); tool results are
/// folded into a `user` turn so a continuation round still carries the information even though
/// the model can't distinguish it from ordinary user text.
fn to_ollama_message(message: &Message) -> Value {
    match message.role {
        Role::Tool => json!({"role": "user", "content": message.content.to_string()}),
        Role::System => json!({"role": "system", "content": message.content.to_string()}),
        Role::User => json!({"role": "user", "content": message.content.to_string()}),
        Role::Assistant => json!({"role": "assistant", "content": message.content.to_string()}),
    }
}

fn classify_connect_error(err: &reqwest::Error) -> TheresError {
    if err.is_timeout() {
        TheresError::ApiTimeout { provider: "ollama".to_string(), timeout_secs: READ_TIMEOUT.as_secs() }
    } else if err.is_connect() {
        TheresError::ApiUnreachable {
            provider: "ollama".to_string(),
            detail: "could not connect to the local ollama daemon".to_string(),
        }
    } else {
        TheresError::ApiUnreachable { provider: "ollama".to_string(), detail: err.to_string() }
    }
}

fn classify_status(status: u16, body: &str) -> TheresError {
    if status == 404 {
        return TheresError::GenerationFailed {
            provider: "ollama".to_string(),
            detail: format!("model not pulled locally: {body}"),
        };
    }
    TheresError::from_http_status("ollama", status, body)
}
