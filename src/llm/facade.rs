//! Single entry point the rest of the crate talks to for chat completions: resolves which
//! provider/model/key to use, composes the system prompt, and dispatches to the matching
//! [`LLMProvider`] adapter. Callers hold this facade instead of reaching into a specific
//! provider client directly.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::stream::BoxStream;
use futures_util::StreamExt;

use crate::context::{AssistantContext, PreferencesStore, UserIdentityProvider};
use crate::error::TheresError;
use crate::llm::context::prepare_context;
use crate::llm::message::{Message, StreamEvent, ToolCall, ToolDefinition, ToolResult};
use crate::llm::provider_config::{LLMConfig, Provider};
use crate::llm::providers::anthropic::AnthropicProvider;
use crate::llm::providers::gemini::GeminiProvider;
use crate::llm::providers::ollama::OllamaProvider;
use crate::llm::providers::openai_compat::OpenAICompatProvider;
use crate::llm::providers::LLMProvider;

/// Holds one [`LLMProvider`] implementation per [`Provider`] variant, constructed once at
/// startup. Grok shares the OpenAI-compatible adapter with OpenAI and Mistral, differing only by
/// base URL/auth, which already lives on [`LLMConfig`]; Ollama gets its own native adapter.
pub struct LLMFacade {
    providers: HashMap<Provider, Arc<dyn LLMProvider>>,
    preferences: Arc<dyn PreferencesStore>,
    identity: Arc<dyn UserIdentityProvider>,
    assistant_context: Arc<AssistantContext>,
}

impl LLMFacade {
    pub fn new(
        preferences: Arc<dyn PreferencesStore>,
        identity: Arc<dyn UserIdentityProvider>,
        assistant_context: Arc<AssistantContext>,
    ) -> Self {
        let mut providers: HashMap<Provider, Arc<dyn LLMProvider>> = HashMap::new();
        providers.insert(Provider::Anthropic, Arc::new(AnthropicProvider));
        providers.insert(Provider::Gemini, Arc::new(GeminiProvider));
        providers.insert(Provider::OpenAI, Arc::new(OpenAICompatProvider::new(Provider::OpenAI)));
        providers.insert(Provider::Mistral, Arc::new(OpenAICompatProvider::new(Provider::Mistral)));
        providers.insert(Provider::Grok, Arc::new(OpenAICompatProvider::new(Provider::Grok)));
        providers.insert(Provider::Ollama, Arc::new(OllamaProvider));
        LLMFacade {
            providers,
            preferences,
            identity,
            assistant_context,
        }
    }

    /// Construct a facade over an explicit provider map, bypassing the real adapters. Used by
    /// tests that need to observe exactly what messages reach a provider without making network
    /// calls.
    #[cfg(test)]
    pub fn with_providers(
        providers: HashMap<Provider, Arc<dyn LLMProvider>>,
        preferences: Arc<dyn PreferencesStore>,
        identity: Arc<dyn UserIdentityProvider>,
        assistant_context: Arc<AssistantContext>,
    ) -> Self {
        LLMFacade { providers, preferences, identity, assistant_context }
    }

    /// Resolve the provider/model/key the user has chosen, falling back through
    /// [`Provider::fallback_order`] to the first provider with an API key configured (Ollama
    /// requires none and is the terminal fallback) if no explicit preference is set.
    pub async fn resolve_config(&self) -> Result<LLMConfig, TheresError> {
        if let Some(preferred) = self.preferences.get("llm_provider").await? {
            if let Some(provider) = Provider::from_str_loose(&preferred) {
                return self.build_config(provider).await;
            }
        }
        for provider in Provider::fallback_order() {
            if let Ok(config) = self.build_config(*provider).await {
                return Ok(config);
            }
        }
        self.build_config(Provider::Ollama).await
    }

    /// Resolve the config for a specific provider rather than the user's preferred/fallback one —
    /// used by the board engine, where each advisor has its own preferred provider.
    pub async fn config_for_provider(&self, provider: Provider) -> Result<LLMConfig, TheresError> {
        self.build_config(provider).await
    }

    async fn build_config(&self, provider: Provider) -> Result<LLMConfig, TheresError> {
        let mut config = LLMConfig::default_for(provider);
        if let Some(model) = self.preferences.get("llm_model").await? {
            config.model = model;
        }
        if config.requires_api_key() {
            let key_pref = format!("{}_api_key", provider.as_str());
            let stored_key = self.preferences.get(&key_pref).await?;
            match stored_key.or_else(|| crate::config::provider_api_key_from_env(provider.as_str())) {
                Some(key) => config.api_key = Some(key),
                None => {
                    return Err(TheresError::MissingApiKey(provider.as_str().to_string()));
                }
            }
        }
        Ok(config)
    }

    /// Compose the system prompt: identity facts, then the long-form `ASSISTANT.md` context
    /// (truncated to the primary-prompt budget), then any caller-supplied addendum (e.g. the
    /// board engine's per-advisor framing).
    pub async fn compose_system_prompt(&self, addendum: Option<&str>) -> Result<String, TheresError> {
        let identity = self.identity.current().await?;
        let mut sections = Vec::new();

        let mut identity_section = String::from("You are Therese, a local-first personal assistant.");
        if let Some(name) = &identity.name {
            identity_section.push_str(&format!(" You are speaking with {name}."));
        }
        for fact in &identity.facts {
            identity_section.push_str(&format!("\n- {fact}"));
        }
        sections.push(identity_section);

        if let Some(context) = self.assistant_context.for_primary_prompt() {
            sections.push(format!("## Long-form context\n{context}"));
        }

        if let Some(addendum) = addendum {
            sections.push(addendum.to_string());
        }

        Ok(sections.join("\n\n"))
    }

    /// Stream a chat turn using the resolved provider config.
    ///
    /// Before anything reaches the wire, `messages` and `system_prompt` are run through
    /// [`prepare_context`] and trimmed to `config.context_window_tokens - 4096`, then converted
    /// through the provider's native format so oldest history is dropped (in user/assistant
    /// pairs) rather than sent raw and risking a context-length rejection from the provider.
    pub async fn stream_chat(
        &self,
        config: &LLMConfig,
        messages: &[Message],
        system_prompt: &str,
        tools: &[ToolDefinition],
    ) -> Result<BoxStream<'static, StreamEvent>, TheresError> {
        let provider = self
            .providers
            .get(&config.provider)
            .ok_or_else(|| TheresError::UnknownProvider(config.provider.as_str().to_string()))?;

        let window = prepare_context(messages, system_prompt, config.context_window_tokens);
        let (trimmed_system, trimmed_messages) = match config.provider {
            Provider::Anthropic => window.to_anthropic_format(),
            Provider::Gemini => window.to_gemini_format(),
            Provider::OpenAI | Provider::Mistral | Provider::Grok | Provider::Ollama => {
                let with_system = window.to_openai_format();
                let system = with_system
                    .iter()
                    .find(|m| m.role == crate::llm::message::Role::System)
                    .map(|m| m.content.to_string())
                    .unwrap_or_default();
                let rest = with_system.into_iter().filter(|m| m.role != crate::llm::message::Role::System).collect();
                (system, rest)
            }
        };

        provider.stream_chat(config, &trimmed_messages, &trimmed_system, tools).await
    }

    /// Continue a turn after tool results have been gathered: append the assistant's partial
    /// turn (its text plus the tool calls it requested) and a turn carrying the results, in
    /// provider-native form, then restream.
    ///
    /// `tool_calls` and `tool_results` must be the same length, each result identified by
    /// `tool_call_id`; this is an invariant of the continuation protocol, not validated here
    /// because the MCP supervisor that produces `tool_results` already guarantees it by
    /// construction (one result per dispatched call).
    pub async fn continue_with_tool_results(
        &self,
        config: &LLMConfig,
        messages: &[Message],
        system_prompt: &str,
        assistant_text: &str,
        tool_calls: &[ToolCall],
        tool_results: &[ToolResult],
        tools: &[ToolDefinition],
    ) -> Result<BoxStream<'static, StreamEvent>, TheresError> {
        debug_assert_eq!(tool_calls.len(), tool_results.len());
        let mut continued: Vec<Message> = messages.to_vec();
        continued.push(Message::assistant_with_tool_calls(assistant_text, tool_calls.to_vec()));
        for result in tool_results {
            continued.push(Message::tool_result(result.tool_call_id.clone(), result.content_as_string()));
        }
        self.stream_chat(config, &continued, system_prompt, tools).await
    }

    /// Non-streaming convenience: fully consume [`LLMFacade::stream_chat`] and concatenate its
    /// `Text` events. Fails if the stream produced no text and ended in an `Error` event.
    ///
    /// `max_tokens_override`, when set, is applied to a local clone of `config` — never the
    /// shared instance a caller may be holding concurrently elsewhere, per the thread-safety
    /// requirement on this method.
    pub async fn generate_content(
        &self,
        config: &LLMConfig,
        prompt: &str,
        context: &[Message],
        system_prompt: &str,
        max_tokens_override: Option<usize>,
    ) -> Result<String, TheresError> {
        // Overriding max_tokens must not mutate the config the caller shares with other
        // in-flight requests, so we clone rather than taking `&mut`.
        let mut local_config = config.clone();
        if let Some(max_tokens) = max_tokens_override {
            local_config.max_output_tokens = Some(max_tokens as u32);
        }
        let mut messages: Vec<Message> = context.to_vec();
        messages.push(Message::user(prompt));

        const MAX_ATTEMPTS: u32 = 3;
        const BASE_DELAY_MS: u64 = 500;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.try_generate_once(&local_config, &messages, system_prompt).await {
                Ok(text) => return Ok(text),
                Err(e) if is_transient(&e) && attempt < MAX_ATTEMPTS => {
                    let delay = BASE_DELAY_MS * 2u64.pow(attempt - 1);
                    log::warn!("transient failure from {}, retrying in {delay}ms (attempt {attempt}/{MAX_ATTEMPTS}): {e}", local_config.provider.as_str());
                    tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn try_generate_once(
        &self,
        config: &LLMConfig,
        messages: &[Message],
        system_prompt: &str,
    ) -> Result<String, TheresError> {
        let mut stream = self.stream_chat(config, messages, system_prompt, &[]).await?;
        let mut text = String::new();
        let mut saw_only_errors = true;
        let mut last_error: Option<String> = None;
        while let Some(event) = stream.next().await {
            match event {
                StreamEvent::Text(chunk) => {
                    saw_only_errors = false;
                    text.push_str(&chunk);
                }
                StreamEvent::ToolCall(_) => saw_only_errors = false,
                StreamEvent::Done { .. } => break,
                StreamEvent::Error { message, .. } => {
                    last_error = Some(message);
                }
            }
        }
        if text.is_empty() && saw_only_errors {
            return Err(TheresError::GenerationFailed {
                provider: config.provider.as_str().to_string(),
                detail: last_error.unwrap_or_else(|| "stream produced no content".to_string()),
            });
        }
        Ok(text)
    }
}

/// Only connection-level/transient failures are worth retrying; auth, validation, and content
/// failures will just fail again.
fn is_transient(err: &TheresError) -> bool {
    matches!(
        err,
        TheresError::ApiUnreachable { .. } | TheresError::ApiTimeout { .. } | TheresError::ApiServerError { .. }
    )
}
