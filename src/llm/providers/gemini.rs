//! Native Gemini `streamGenerateContent` adapter.
//!
//! Gemini's wire format differs from both Anthropic and the OpenAI dialect enough to warrant its
//! own adapter: roles are `user`/`model` rather than `user`/`assistant`, the system prompt is a
//! dedicated `systemInstruction` field, function calls arrive as whole `functionCall` parts (no
//! incremental JSON accumulation needed, unlike Anthropic's `input_json_delta` or OpenAI's
//! indexed `tool_calls` deltas), and the API key travels in the query string rather than a
//! header.

use async_stream::stream;
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::TheresError;
use crate::llm::http_pool;
use crate::llm::message::{Message, Role, StreamEvent, ToolCall, ToolDefinition};
use crate::llm::provider_config::{LLMConfig, Provider};

use super::LLMProvider;

pub struct GeminiProvider;

#[async_trait]
impl LLMProvider for GeminiProvider {
    fn provider(&self) -> Provider {
        Provider::Gemini
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
            .ok_or_else(|| TheresError::MissingApiKey(Provider::Gemini.as_str().to_string()))?;

        let mut body = json!({
            "contents": to_gemini_contents(messages),
            "systemInstruction": {"parts": [{"text": system_prompt}]},
        });
        let mut gemini_tools = Vec::new();
        if !tools.is_empty() {
            gemini_tools.push(json!({
                "functionDeclarations": tools.iter().map(to_gemini_function_declaration).collect::<Vec<_>>()
            }));
        }
        // The grounding tool is additive and mutually compatible with function declarations in
        // Gemini's `tools` array; unlike function calling, no adapter logic needs to parse its
        // output back into a `StreamEvent` — grounded text simply arrives as ordinary `text` parts
        // with citation metadata the core doesn't surface.
        if config.enable_grounding {
            gemini_tools.push(json!({"googleSearch": {}}));
        }
        if !gemini_tools.is_empty() {
            body["tools"] = Value::Array(gemini_tools);
        }

        let client = http_pool::client_for(&config.base_url);
        let url = format!(
            "{}/models/{}:streamGenerateContent?alt=sse&key={}",
            config.base_url,
            config.model,
            urlencoding::encode(&api_key)
        );
        let response = client
            .post(url)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| TheresError::ApiUnreachable {
                provider: "gemini".to_string(),
                detail: e.to_string(),
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            return Err(TheresError::from_http_status("gemini", status, &text));
        }

        let mut event_stream = response.bytes_stream().eventsource();

        let stream = stream! {
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
                let Some(candidate) = parsed.get("candidates").and_then(|c| c.get(0)) else { continue };
                if let Some(parts) = candidate.get("content").and_then(|c| c.get("parts")).and_then(Value::as_array) {
                    for part in parts {
                        if let Some(text) = part.get("text").and_then(Value::as_str) {
                            yield StreamEvent::Text(text.to_string());
                        }
                        if let Some(call) = part.get("functionCall") {
                            let name = call.get("name").and_then(Value::as_str).unwrap_or_default().to_string();
                            let arguments = call.get("args").cloned().unwrap_or(json!({}));
                            yield StreamEvent::ToolCall(ToolCall {
                                id: format!("gemini_call_{}", Uuid::new_v4()),
                                name,
                                arguments,
                            });
                        }
                    }
                }
                if let Some(finish_reason) = candidate.get("finishReason").and_then(Value::as_str) {
                    yield StreamEvent::Done { stop_reason: finish_reason.to_ascii_lowercase() };
                    return;
                }
            }
        };

        Ok(stream.boxed())
    }
}

/// Gemini has no `tool` role: a tool's reply is sent as a `user`-turn `functionResponse` part,
/// and an assistant turn's function calls are `model`-turn `functionCall` parts.
fn to_gemini_contents(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .filter(|m| m.role != Role::System)
        .map(|m| match m.role {
            Role::Tool => json!({
                "role": "user",
                "parts": [{
                    "functionResponse": {
                        "name": m.tool_call_id.clone().unwrap_or_default(),
                        "response": {"result": m.content.to_string()},
                    }
                }]
            }),
            Role::Assistant if !m.tool_calls.is_empty() => {
                let mut parts = Vec::new();
                if !m.content.is_empty() {
                    parts.push(json!({"text": m.content.to_string()}));
                }
                for call in &m.tool_calls {
                    parts.push(json!({"functionCall": {"name": call.name, "args": call.arguments}}));
                }
                json!({"role": "model", "parts": parts})
            }
            Role::Assistant => json!({"role": "model", "parts": [{"text": m.content.to_string()}]}),
            Role::User => json!({"role": "user", "parts": [{"text": m.content.to_string()}]}),
            Role::System => unreachable!("filtered above"),
        })
        .collect()
}

fn to_gemini_function_declaration(tool: &ToolDefinition) -> Value {
    json!({
        "name": tool.name,
        "description": tool.description,
        "parameters": tool.parameters_schema,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assistant_role_maps_to_model_role() {
        let messages = vec![Message::assistant("hi")];
        let contents = to_gemini_contents(&messages);
        assert_eq!(contents[0]["role"], "model");
    }

    #[test]
    fn tool_result_becomes_user_turn_function_response() {
        let messages = vec![Message::tool_result("get_weather", "sunny")];
        let contents = to_gemini_contents(&messages);
        assert_eq!(contents[0]["role"], "user");
        assert_eq!(contents[0]["parts"][0]["functionResponse"]["name"], "get_weather");
    }
}
