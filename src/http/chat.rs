//! Chat send/cancel and conversation history routes.
//!
//! SSE framing uses `async_stream::stream!` yielding `Ok(SseEvent::default().data(json))` for
//! each `StreamEvent`. A conversation and the user's message are always persisted before
//! generation begins, regardless of whether the LLM call succeeds.

use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_stream::stream;
use axum::extract::{Path, State};
use axum::response::sse::{Event as SseEvent, Sse};
use axum::response::IntoResponse;
use axum::Json;
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};

use crate::error::{with_graceful_degradation, TheresError};
use crate::http::{ApiError, AppState};
use crate::llm::message::{Message, Role as LlmRole, StreamEvent, ToolCall, ToolResult};
use crate::memory::MemoryScope;
use crate::security::injection_guard;
use crate::store::MessageRecord;

/// A runaway tool-calling loop (a model that keeps requesting tools forever) is bounded rather
/// than allowed to run until the client gives up.
const MAX_TOOL_ROUNDS: usize = 8;

#[derive(Deserialize)]
pub struct ChatSendRequest {
    pub message: String,
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub include_memory: bool,
    pub context_scope: Option<String>,
}

#[derive(Serialize)]
pub struct ChatSendResponse {
    pub conversation_id: String,
    pub text: String,
}

fn to_llm_message(record: MessageRecord) -> Message {
    match record.role {
        LlmRole::System => Message::system(record.content),
        LlmRole::User => Message::user(record.content),
        LlmRole::Assistant => Message::assistant(record.content),
        LlmRole::Tool => Message::tool_result(record.id, record.content),
    }
}

async fn ensure_conversation(state: &AppState, conversation_id: Option<String>, first_message: &str) -> Result<String, TheresError> {
    if let Some(id) = conversation_id {
        return Ok(id);
    }
    let title = first_message.chars().take(60).collect::<String>();
    let conversation = state.store.create_conversation(Some(title)).await?;
    Ok(conversation.id)
}

pub async fn send(State(state): State<Arc<AppState>>, Json(req): Json<ChatSendRequest>) -> axum::response::Response {
    let screening = injection_guard::screen(&req.message);
    if !screening.is_safe {
        return ApiError(TheresError::Validation(format!(
            "message rejected by prompt-injection screening: {:?}",
            screening.threat_type
        )))
        .into_response();
    }

    let conversation_id = match ensure_conversation(&state, req.conversation_id.clone(), &req.message).await {
        Ok(id) => id,
        Err(e) => return ApiError(e).into_response(),
    };
    if let Err(e) = state.store.add_message(&conversation_id, LlmRole::User, &req.message).await {
        return ApiError(e).into_response();
    }

    if req.stream {
        send_streaming(state, conversation_id, req).await.into_response()
    } else {
        send_blocking(state, conversation_id, req).await.into_response()
    }
}

async fn send_blocking(state: Arc<AppState>, conversation_id: String, req: ChatSendRequest) -> axum::response::Response {
    match run_blocking_turn(&state, &conversation_id, &req).await {
        Ok(text) => Json(ChatSendResponse { conversation_id, text }).into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}

async fn run_blocking_turn(state: &AppState, conversation_id: &str, req: &ChatSendRequest) -> Result<String, TheresError> {
    let config = state.facade.resolve_config().await?;
    let history = state.store.list_messages(conversation_id).await?;
    let mut messages: Vec<Message> = history.into_iter().map(to_llm_message).collect();
    messages.push(Message::user(req.message.clone()));
    let system_prompt = build_system_prompt(state, req).await?;
    let tools = state.supervisor.all_tool_definitions();

    let mut full_text = String::new();
    let mut provider_stream = state.facade.stream_chat(&config, &messages, &system_prompt, &tools).await?;
    let mut round = 0;
    loop {
        round += 1;
        let (round_text, round_tool_calls, terminal) = drain_round(&mut provider_stream).await?;
        full_text.push_str(&round_text);

        if round_tool_calls.is_empty() || round >= MAX_TOOL_ROUNDS {
            let _ = terminal;
            break;
        }
        let tool_results = execute_tool_calls(state, &round_tool_calls).await;
        provider_stream = state
            .facade
            .continue_with_tool_results(&config, &messages, &system_prompt, &round_text, &round_tool_calls, &tool_results, &tools)
            .await?;
        messages.push(Message::assistant_with_tool_calls(round_text, round_tool_calls));
        for result in &tool_results {
            messages.push(Message::tool_result(result.tool_call_id.clone(), result.content_as_string()));
        }
    }

    state.store.add_message(conversation_id, LlmRole::Assistant, &full_text).await?;
    Ok(full_text)
}

/// Drain one provider-stream segment (everything up to and including its terminal event).
/// Returns the segment's concatenated text, any tool calls it requested, and the terminal
/// `stop_reason`/error it ended with. Never yields past the terminal event, matching the
/// "exactly one terminal event per stream" contract each provider adapter upholds.
async fn drain_round(
    stream: &mut futures_util::stream::BoxStream<'static, StreamEvent>,
) -> Result<(String, Vec<ToolCall>, Option<String>), TheresError> {
    let mut text = String::new();
    let mut tool_calls = Vec::new();
    let mut stop_reason = None;
    while let Some(event) = stream.next().await {
        match event {
            StreamEvent::Text(chunk) => text.push_str(&chunk),
            StreamEvent::ToolCall(tc) => tool_calls.push(tc),
            StreamEvent::Done { stop_reason: reason } => {
                stop_reason = Some(reason);
                break;
            }
            StreamEvent::Error { message, code } => {
                return Err(TheresError::Recoverable {
                    message,
                    details: Some(serde_json::json!({ "code": code })),
                });
            }
        }
    }
    Ok((text, tool_calls, stop_reason))
}

/// Dispatch every tool call to the MCP supervisor and translate its `ToolCallResult` into the
/// `ToolResult` shape the continuation protocol expects, wrapping a failed call's error message
/// in a `{"error": ...}` value so the provider always gets a JSON result back.
async fn execute_tool_calls(state: &AppState, tool_calls: &[ToolCall]) -> Vec<ToolResult> {
    let mut results = Vec::with_capacity(tool_calls.len());
    for call in tool_calls {
        let outcome = state.supervisor.execute_tool_call(&call.name, call.arguments.clone()).await;
        let value = if outcome.success {
            outcome.result.unwrap_or(serde_json::Value::Null)
        } else {
            serde_json::json!({ "error": outcome.error.unwrap_or_else(|| "tool call failed".to_string()) })
        };
        results.push(ToolResult {
            tool_call_id: call.id.clone(),
            result: value,
            is_error: !outcome.success,
        });
    }
    results
}

async fn build_system_prompt(state: &AppState, req: &ChatSendRequest) -> Result<String, TheresError> {
    let mut addendum = None;
    let memory_block = if req.include_memory {
        let scope = match &req.context_scope {
            Some(id) => MemoryScope::Conversation { scope_id: id.clone() },
            None => MemoryScope::Global,
        };
        let matches = with_graceful_degradation(
            "memory_store",
            state.memory.search(&req.message, None, 0.5, &scope, 5),
            Vec::new(),
        )
        .await;
        crate::memory::format_memory_section(&matches)
    } else {
        None
    };
    if let Some(memory_block) = &memory_block {
        addendum = Some(memory_block.as_str());
    }
    state.facade.compose_system_prompt(addendum).await
}

/// Resolve everything the streaming turn needs before the first byte goes out: provider config,
/// history, and the composed system prompt. Kept outside the `stream!` block so a failure here
/// can be reported as a single terminal `error` event rather than an empty stream.
async fn prepare_streaming_turn(
    state: &AppState,
    conversation_id: &str,
    req: &ChatSendRequest,
) -> Result<(crate::llm::provider_config::LLMConfig, Vec<Message>, String), TheresError> {
    let config = state.facade.resolve_config().await?;
    let history = state.store.list_messages(conversation_id).await?;
    let mut messages: Vec<Message> = history.into_iter().map(to_llm_message).collect();
    messages.push(Message::user(req.message.clone()));
    let system_prompt = build_system_prompt(state, req).await?;
    Ok((config, messages, system_prompt))
}

fn sse_event(event: &StreamEvent) -> Result<SseEvent, Infallible> {
    Ok(SseEvent::default().data(serde_json::to_string(event).unwrap_or_default()))
}

async fn send_streaming(
    state: Arc<AppState>,
    conversation_id: String,
    req: ChatSendRequest,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let flag = Arc::new(AtomicBool::new(false));
    state.cancellations.insert(conversation_id.clone(), Arc::clone(&flag));

    let event_stream = stream! {
        match prepare_streaming_turn(&state, &conversation_id, &req).await {
            Ok((config, mut messages, system_prompt)) => {
                let tools = state.supervisor.all_tool_definitions();
                let mut full_text = String::new();

                match state.facade.stream_chat(&config, &messages, &system_prompt, &tools).await {
                    Ok(mut provider_stream) => {
                        let mut round = 0;
                        'rounds: loop {
                            round += 1;
                            let mut round_text = String::new();
                            let mut round_tool_calls = Vec::new();
                            while let Some(event) = provider_stream.next().await {
                                if flag.load(Ordering::SeqCst) {
                                    full_text.push_str(&round_text);
                                    break 'rounds;
                                }
                                if let StreamEvent::Text(chunk) = &event {
                                    round_text.push_str(chunk);
                                }
                                if let StreamEvent::ToolCall(tc) = &event {
                                    round_tool_calls.push(tc.clone());
                                }
                                let is_terminal = matches!(event, StreamEvent::Done { .. } | StreamEvent::Error { .. });
                                let is_error = matches!(event, StreamEvent::Error { .. });
                                yield sse_event(&event);
                                if is_terminal {
                                    full_text.push_str(&round_text);
                                    if is_error {
                                        break 'rounds;
                                    }
                                    break;
                                }
                            }

                            if round_tool_calls.is_empty() || round >= MAX_TOOL_ROUNDS {
                                break 'rounds;
                            }

                            let tool_results = execute_tool_calls(&state, &round_tool_calls).await;
                            match state
                                .facade
                                .continue_with_tool_results(&config, &messages, &system_prompt, &round_text, &round_tool_calls, &tool_results, &tools)
                                .await
                            {
                                Ok(next_stream) => {
                                    messages.push(Message::assistant_with_tool_calls(round_text, round_tool_calls));
                                    for result in &tool_results {
                                        messages.push(Message::tool_result(result.tool_call_id.clone(), result.content_as_string()));
                                    }
                                    provider_stream = next_stream;
                                }
                                Err(e) => {
                                    yield sse_event(&StreamEvent::Error { message: e.user_safe_message(), code: e.code() });
                                    break 'rounds;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        yield sse_event(&StreamEvent::Error { message: e.user_safe_message(), code: e.code() });
                    }
                }

                // Persisted even on cancellation: whatever text was produced before the flag was
                // observed is not lost, matching the cancellation-persists-partial-output rule.
                if !full_text.is_empty() {
                    let _ = state.store.add_message(&conversation_id, LlmRole::Assistant, &full_text).await;
                }
            }
            Err(e) => {
                yield sse_event(&StreamEvent::Error { message: e.user_safe_message(), code: e.code() });
            }
        }
        state.cancellations.remove(&conversation_id);
    };

    Sse::new(event_stream)
}

#[derive(Serialize)]
pub struct CancelResponse {
    pub cancelled: bool,
}

pub async fn cancel(State(state): State<Arc<AppState>>, Path(conversation_id): Path<String>) -> Json<CancelResponse> {
    let cancelled = match state.cancellations.get(&conversation_id) {
        Some(flag) => {
            flag.store(true, Ordering::SeqCst);
            true
        }
        None => false,
    };
    Json(CancelResponse { cancelled })
}

pub async fn list_conversations(State(state): State<Arc<AppState>>) -> Result<Json<Vec<crate::store::ConversationRecord>>, ApiError> {
    Ok(Json(state.store.list_conversations(50).await?))
}

pub async fn list_messages(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Result<Json<Vec<MessageRecord>>, ApiError> {
    Ok(Json(state.store.list_messages(&id).await?))
}
