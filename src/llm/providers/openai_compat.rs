//! Shared adapter for every provider that speaks an OpenAI-compatible Chat Completions dialect:
//! OpenAI itself, Mistral, Grok, and Ollama's OpenAI-compatible endpoint.
//!
//! Tool calls arrive spread across many `delta.tool_calls[i]` chunks indexed by position rather
//! than carrying the full call in one event the way Anthropic's `content_block_stop` does, so
//! this accumulates fragments by index until a finish reason closes them out.

use async_stream::stream;
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use serde_json::{json, Value};
use std::collections::BTreeMap;

use crate::error::TheresError;
use crate::llm::http_pool;
use crate::llm::message::{Message, Role, StreamEvent, ToolCall, ToolDefinition};
use crate::llm::provider_config::{LLMConfig, Provider};

use super::LLMProvider;

pub struct OpenAICompatProvider {
    provider: Provider,
}

impl OpenAICompatProvider {
    pub fn new(provider: Provider) -> Self {
        OpenAICompatProvider { provider }
    }
}

#[derive(Default, Clone)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

#[async_trait]
impl LLMProvider for OpenAICompatProvider {
    fn provider(&self) -> Provider {
        self.provider
    }

    async fn stream_chat(
        &self,
        config: &LLMConfig,
        messages: &[Message],
        system_prompt: &str,
        tools: &[ToolDefinition],
    ) -> Result<BoxStream<'static, StreamEvent>, TheresError> {
        let mut wire_messages = vec![json!({"role": "system", "content": system_prompt})];
        wire_messages.extend(messages.iter().map(to_openai_message));

        let mut body = json!({
            "model": config.model,
            "messages": wire_messages,
            "stream": true,
        });
        // Reasoning-model families (gpt-5, o1, o3, o4) reject the legacy `max_tokens` field and
        // require `max_completion_tokens` instead; every other OpenAI-compatible model (including
        // Mistral, Grok, and Ollama's compat endpoint) still expects `max_tokens`.
        let max_tokens_field = if uses_max_completion_tokens(&config.model) {
            "max_completion_tokens"
        } else {
            "max_tokens"
        };
        body[max_tokens_field] = json!(config.max_output_tokens.unwrap_or_else(|| default_max_tokens(self.provider)));
        let supports_tools = self.provider.supports_tool_calls();
        if supports_tools && !tools.is_empty() {
            body["tools"] = Value::Array(tools.iter().map(to_openai_tool).collect());
        }

        let client = http_pool::client_for(&config.base_url);
        let mut request = client
            .post(format!("{}/chat/completions", config.base_url))
            .header("content-type", "application/json");
        if let Some(key) = &config.api_key {
            request = request.bearer_auth(key);
        }

        let provider_name = self.provider.as_str().to_string();
        let response = request.json(&body).send().await.map_err(|e| TheresError::ApiUnreachable {
            provider: provider_name.clone(),
            detail: e.to_string(),
        })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            return Err(TheresError::from_http_status(&provider_name, status, &text));
        }

        let mut event_stream = response.bytes_stream().eventsource();

        let stream = stream! {
            let mut calls: BTreeMap<usize, PartialToolCall> = BTreeMap::new();

            while let Some(event) = event_stream.next().await {
                let event = match event {
                    Ok(e) => e,
                    Err(e) => {
                        yield StreamEvent::Error { message: e.to_string(), code: "stream_decode_error" };
                        return;
                    }
                };
                if event.data == "[DONE]" {
                    for (_, call) in calls {
                        yield finalize(call);
                    }
                    yield StreamEvent::Done { stop_reason: "stop".to_string() };
                    return;
                }
                if event.data.is_empty() {
                    continue;
                }
                let parsed: Value = match serde_json::from_str(&event.data) {
                    Ok(v) => v,
                    Err(_) => continue,
                };
                let Some(choice) = parsed.get("choices").and_then(|c| c.get(0)) else { continue };
                if let Some(delta) = choice.get("delta") {
                    if let Some(text) = delta.get("content").and_then(Value::as_str) {
                        if !text.is_empty() {
                            yield StreamEvent::Text(text.to_string());
                        }
                    }
                    if let Some(tool_calls) = supports_tools.then(|| delta.get("tool_calls")).flatten().and_then(Value::as_array) {
                        for tc in tool_calls {
                            let index = tc.get("index").and_then(Value::as_u64).unwrap_or(0) as usize;
                            let entry = calls.entry(index).or_default();
                            if let Some(id) = tc.get("id").and_then(Value::as_str) {
                                entry.id = id.to_string();
                            }
                            if let Some(function) = tc.get("function") {
                                if let Some(name) = function.get("name").and_then(Value::as_str) {
                                    entry.name.push_str(name);
                                }
                                if let Some(args) = function.get("arguments").and_then(Value::as_str) {
                                    entry.arguments.push_str(args);
                                }
                            }
                        }
                    }
                }
                if let Some(finish_reason) = choice.get("finish_reason").and_then(Value::as_str) {
                    if finish_reason == "tool_calls" {
                        for (_, call) in std::mem::take(&mut calls) {
                            yield finalize(call);
                        }
                    }
                    if finish_reason != "null" {
                        yield StreamEvent::Done { stop_reason: finish_reason.to_string() };
                        return;
                    }
                }
            }
        };

        Ok(stream.boxed())
    }
}

/// Reasoning-family models (`gpt-5*`, `o1*`, `o3*`, `o4*`) require `max_completion_tokens`.
fn uses_max_completion_tokens(model: &str) -> bool {
    let model = model.to_ascii_lowercase();
    ["gpt-5", "o1", "o3", "o4"]
        .iter()
        .any(|prefix| model.starts_with(prefix))
}

/// A conservative default output budget, used when the caller hasn't overridden one on
/// `LLMConfig`. Mistral and Grok accept generous completions; Ollama's local models are usually
/// memory-bound so a smaller default avoids surprising the user with a multi-minute generation.
fn default_max_tokens(provider: Provider) -> u32 {
    match provider {
        Provider::Ollama => 2048,
        _ => 4096,
    }
}

fn finalize(call: PartialToolCall) -> StreamEvent {
    let arguments = if call.arguments.is_empty() {
        json!({})
    } else {
        serde_json::from_str(&call.arguments).unwrap_or(Value::Null)
    };
    StreamEvent::ToolCall(ToolCall {
        id: call.id,
        name: call.name,
        arguments,
    })
}

fn to_openai_message(message: &Message) -> Value {
    match message.role {
        Role::Tool => json!({
            "role": "tool",
            "tool_call_id": message.tool_call_id.clone().unwrap_or_default(),
            "content": message.content.to_string(),
        }),
        Role::Assistant if !message.tool_calls.is_empty() => {
            let tool_calls: Vec<Value> = message
                .tool_calls
                .iter()
                .map(|call| {
                    json!({
                        "id": call.id,
                        "type": "function",
                        "function": {
                            "name": call.name,
                            "arguments": call.arguments.to_string(),
                        }
                    })
                })
                .collect();
            json!({"role": "assistant", "content": message.content.to_string(), "tool_calls": tool_calls})
        }
        Role::Assistant => json!({"role": "assistant", "content": message.content.to_string()}),
        Role::User => json!({"role": "user", "content": message.content.to_string()}),
        Role::System => json!({"role": "system", "content": message.content.to_string()}),
    }
}

fn to_openai_tool(tool: &ToolDefinition) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters_schema,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_message_maps_to_tool_role_with_call_id() {
        let message = Message::tool_result("call_1", "sunny");
        let wire = to_openai_message(&message);
        assert_eq!(wire["role"], "tool");
        assert_eq!(wire["tool_call_id"], "call_1");
    }

    #[test]
    fn assistant_tool_calls_are_serialized_with_stringified_arguments() {
        let message = Message::assistant_with_tool_calls(
            "",
            vec![ToolCall {
                id: "call_2".into(),
                name: "search".into(),
                arguments: json!({"q": "rust"}),
            }],
        );
        let wire = to_openai_message(&message);
        let args = wire["tool_calls"][0]["function"]["arguments"].as_str().unwrap();
        assert_eq!(args, r#"{"q":"rust"}"#);
    }

    #[test]
    fn reasoning_models_use_max_completion_tokens() {
        assert!(uses_max_completion_tokens("gpt-5-mini"));
        assert!(uses_max_completion_tokens("o3-mini"));
        assert!(uses_max_completion_tokens("o4-preview"));
        assert!(!uses_max_completion_tokens("gpt-4o-mini"));
        assert!(!uses_max_completion_tokens("mistral-small-latest"));
    }

    #[test]
    fn finalize_defaults_to_empty_object_for_blank_arguments() {
        let event = finalize(PartialToolCall {
            id: "call_3".into(),
            name: "noop".into(),
            arguments: String::new(),
        });
        match event {
            StreamEvent::ToolCall(tc) => assert_eq!(tc.arguments, json!({})),
            _ => panic!("expected a ToolCall event"),
        }
    }

    #[tokio::test]
    async fn mistral_ignores_tool_call_deltas_since_the_dialect_advertises_no_tool_support() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"ok\"},\"index\":0}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"x\",\"function\":{\"name\":\"f\",\"arguments\":\"{}\"}}]},\"index\":0}]}\n\n",
            "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\",\"index\":0}]}\n\n",
            "data: [DONE]\n\n",
        );
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_raw(body, "text/event-stream"),
            )
            .mount(&server)
            .await;

        let mut config = LLMConfig::default_for(Provider::Mistral);
        config.base_url = server.uri();
        config.api_key = Some("test-key".to_string());

        let provider = OpenAICompatProvider::new(Provider::Mistral);
        let mut stream = provider.stream_chat(&config, &[Message::user("hi")], "system", &[]).await.unwrap();

        let mut tool_calls = Vec::new();
        while let Some(event) = stream.next().await {
            if let StreamEvent::ToolCall(tc) = event {
                tool_calls.push(tc);
            }
        }
        assert!(tool_calls.is_empty(), "mistral adapter must not surface tool calls");
    }
}
