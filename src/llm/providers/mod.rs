//! Per-provider chat-streaming adapters behind one [`LLMProvider`] trait.
//!
//! Anthropic gets a bespoke adapter because its Messages API SSE framing
//! (`content_block_start` / `_delta` / `_stop`) has no equivalent in the OpenAI dialect; OpenAI,
//! Mistral, and Grok speak OpenAI-compatible Chat Completions and share [`openai_compat`]; Gemini
//! gets its own adapter for its `generateContent`/`streamGenerateContent` wire format; Ollama gets
//! its own adapter for its newline-delimited `/api/chat` format, which is not OpenAI-compatible
//! despite superficially similar message shapes.

pub mod anthropic;
pub mod gemini;
pub mod ollama;
pub mod openai_compat;

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::error::TheresError;
use crate::llm::message::{Message, StreamEvent, ToolDefinition};
use crate::llm::provider_config::LLMConfig;

/// One provider's streaming chat contract.
///
/// `stream_chat` returns immediately with a stream; all request errors that occur after the
/// first byte of the response has been read (rate limits mid-stream, truncated bodies, malformed
/// SSE) surface as a `StreamEvent::Error` within the stream rather than as an `Err` from this
/// method, so callers only need one failure path once streaming has begun.
#[async_trait]
pub trait LLMProvider: Send + Sync {
    fn provider(&self) -> crate::llm::provider_config::Provider;

    async fn stream_chat(
        &self,
        config: &LLMConfig,
        messages: &[Message],
        system_prompt: &str,
        tools: &[ToolDefinition],
    ) -> Result<BoxStream<'static, StreamEvent>, TheresError>;
}
