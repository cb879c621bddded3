//! Native Anthropic Messages API streaming adapter.
//!
//! The wire format is parsed directly from Anthropic's own SSE event types rather than routed
//! through an OpenAI-compatible shim, because `content_block_start` / `content_block_delta` /
//! `content_block_stop` carry information (which content block a delta belongs to, when a
//! `tool_use` block's JSON input is complete) that the OpenAI dialect doesn't have an equivalent
//! for.

use async_stream::stream;
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use serde_json::{json, Value};

use crate::error::TheresError;
use crate::llm::http_pool;
use crate::llm::message::{Message, Role, StreamEvent, ToolCall, ToolDefinition};
use crate::llm::provider_config::{LLMConfig, Provider};

use super::LLMProvider;

const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider;

#[async_trait]
impl LLMProvider for AnthropicProvider {
    fn provider(&self) -> Provider {
        Provider::Anthropic
    }

    async fn stream_chat(
        &self,
        config: &LLMConfig,
        messages: &[Message],
        system_prompt: &str,
        tools: &[ToolDefinition],
    ) -> Result<BoxStream<'static, StreamEvent>, TheresError> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| TheresError::MissingApiKey(Provider::Anthropic.as_str().to_string()))?;

        let mut body = json!({
            "model": config.model,
            "max_tokens": config.max_output_tokens.unwrap_or(8192),
            "system": system_prompt,
            "messages": to_anthropic_messages(messages),
            "stream": true,
        });
        if !tools.is_empty() {
            body["tools"] = Value::Array(tools.iter().map(to_anthropic_tool).collect());
        }

        let client = http_pool::client_for(&config.base_url);
        let response = client
            .post(format!("{}/messages", config.base_url))
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| TheresError::ApiUnreachable {
                provider: "anthropic".to_string(),
                detail: e.to_string(),
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            return Err(TheresError::from_http_status("anthropic", status, &text));
        }

        let mut event_stream = response.bytes_stream().eventsource();

        let stream = stream! {
            // `tool_use` blocks accumulate their `input` as a string of JSON fragments across
            // successive `input_json_delta` events; they only become a well-formed ToolCall once
            // `content_block_stop` closes the block.
            let mut current_tool_call: Option<(String, String, String)> = None;

            while let Some(event) = event_stream.next().await {
                let event = match event {
                    Ok(e) => e,
                    Err(e) => {
                        yield StreamEvent::Error { message: e.to_string(), code: "stream_decode_error" };
                        return;
                    }
                };
                if event.data.is_empty() {
                    continue;
                }
                let parsed: Value = match serde_json::from_str(&event.data) {
                    Ok(v) => v,
                    Err(_) => continue,
                };
                match event.event.as_str() {
                    "content_block_start" => {
                        if let Some(block) = parsed.get("content_block") {
                            if block.get("type").and_then(Value::as_str) == Some("tool_use") {
                                let id = block.get("id").and_then(Value::as_str).unwrap_or_default().to_string();
                                let name = block.get("name").and_then(Value::as_str).unwrap_or_default().to_string();
                                current_tool_call = Some((id, name, String::new()));
                            }
                        }
                    }
                    "content_block_delta" => {
                        if let Some(delta) = parsed.get("delta") {
                            match delta.get("type").and_then(Value::as_str) {
                                Some("text_delta") => {
                                    if let Some(text) = delta.get("text").and_then(Value::as_str) {
                                        yield StreamEvent::Text(text.to_string());
                                    }
                                }
                                Some("input_json_delta") => {
                                    if let Some((_, _, partial)) = current_tool_call.as_mut() {
                                        if let Some(fragment) = delta.get("partial_json").and_then(Value::as_str) {
                                            partial.push_str(fragment);
                                        }
                                    }
                                }
                                _ => {}
                            }
                        }
                    }
                    "content_block_stop" => {
                        if let Some((id, name, partial)) = current_tool_call.take() {
                            let arguments = if partial.is_empty() {
                                json!({})
                            } else {
                                serde_json::from_str(&partial).unwrap_or(Value::Null)
                            };
                            yield StreamEvent::ToolCall(ToolCall { id, name, arguments });
                        }
                    }
                    "message_delta" => {
                        if let Some(stop_reason) = parsed
                            .get("delta")
                            .and_then(|d| d.get("stop_reason"))
                            .and_then(Value::as_str)
                        {
                            yield StreamEvent::Done { stop_reason: stop_reason.to_string() };
                            return;
                        }
                    }
                    "error" => {
                        let message = parsed
                            .get("error")
                            .and_then(|e| e.get("message"))
                            .and_then(Value::as_str)
                            .unwrap_or("anthropic stream error")
                            .to_string();
                        yield StreamEvent::Error { message, code: "provider_stream_error" };
                        return;
                    }
                    _ => {}
                }
            }
        };

        Ok(stream.boxed())
    }
}

/// Anthropic has no `system` role message in the `messages` array (it's a top-level field) and
/// represents tool results as `user` messages containing a `tool_result` content block.
fn to_anthropic_messages(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .filter(|m| m.role != Role::System)
        .map(|m| match m.role {
            Role::Tool => json!({
                "role": "user",
                "content": [{
                    "type": "tool_result",
                    "tool_use_id": m.tool_call_id.clone().unwrap_or_default(),
                    "content": m.content.to_string(),
                }]
            }),
            Role::Assistant if !m.tool_calls.is_empty() => {
                let mut blocks = Vec::new();
                if !m.content.is_empty() {
                    blocks.push(json!({"type": "text", "text": m.content.to_string()}));
                }
                for call in &m.tool_calls {
                    blocks.push(json!({
                        "type": "tool_use",
                        "id": call.id,
                        "name": call.name,
                        "input": call.arguments,
                    }));
                }
                json!({"role": "assistant", "content": blocks})
            }
            Role::Assistant => json!({"role": "assistant", "content": m.content.to_string()}),
            Role::User => json!({"role": "user", "content": m.content.to_string()}),
            Role::System => unreachable!("filtered above"),
        })
        .collect()
}

fn to_anthropic_tool(tool: &ToolDefinition) -> Value {
    json!({
        "name": tool.name,
        "description": tool.description,
        "input_schema": tool.parameters_schema,
    })
}
