//! Per-provider identity and defaults.
//!
//! Every client gets a `model` and `base_url` handed to it up front rather than hardcoding them
//! in its constructor. Default model names and context windows below are current as of this
//! crate's writing and are expected to go stale — they exist so a user who sets only an API key
//! gets a working default, not as a guarantee of freshness.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Anthropic,
    OpenAI,
    Gemini,
    Mistral,
    Grok,
    Ollama,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Anthropic => "anthropic",
            Provider::OpenAI => "openai",
            Provider::Gemini => "gemini",
            Provider::Mistral => "mistral",
            Provider::Grok => "grok",
            Provider::Ollama => "ollama",
        }
    }

    pub fn from_str_loose(value: &str) -> Option<Provider> {
        match value.to_ascii_lowercase().as_str() {
            "anthropic" | "claude" => Some(Provider::Anthropic),
            "openai" | "gpt" => Some(Provider::OpenAI),
            "gemini" | "google" => Some(Provider::Gemini),
            "mistral" => Some(Provider::Mistral),
            "grok" | "xai" => Some(Provider::Grok),
            "ollama" => Some(Provider::Ollama),
            _ => None,
        }
    }

    /// Facade fallback order when the user has expressed no provider preference: cloud providers
    /// with broadly available free tiers first, Ollama last since it requires a local daemon.
    pub fn fallback_order() -> &'static [Provider] {
        &[
            Provider::Anthropic,
            Provider::OpenAI,
            Provider::Gemini,
            Provider::Mistral,
            Provider::Grok,
            Provider::Ollama,
        ]
    }

    /// Whether this provider's adapter parses/emits MCP-style [`crate::llm::message::ToolCall`]
    /// events. Only Anthropic and OpenAI do; Gemini's only tool-like capability is grounding
    /// (handled separately via `enable_grounding`), and Mistral/Grok/Ollama speak dialects this
    /// crate treats as text-only.
    pub fn supports_tool_calls(&self) -> bool {
        matches!(self, Provider::Anthropic | Provider::OpenAI)
    }
}

/// Resolved configuration for a single provider/model pairing.
#[derive(Debug, Clone)]
pub struct LLMConfig {
    pub provider: Provider,
    pub model: String,
    pub base_url: String,
    pub context_window_tokens: usize,
    pub api_key: Option<String>,
    /// Gemini-only: whether to inject the built-in Google Search grounding tool. Ignored by
    /// every other provider. Defaults to `true` (chat); callers doing document generation set it
    /// to `false` since grounding is not wanted there.
    pub enable_grounding: bool,
    /// Output-token ceiling sent to the provider. `None` lets the adapter use its own sane
    /// default; `Some` is how [`crate::llm::facade::LLMFacade::generate_content`]'s
    /// `max_tokens_override` reaches the wire request without mutating the caller's shared
    /// `LLMConfig`.
    pub max_output_tokens: Option<u32>,
}

impl LLMConfig {
    /// Seed defaults for a provider, before any user override from preferences or env is applied.
    pub fn default_for(provider: Provider) -> LLMConfig {
        let (model, base_url, context_window_tokens) = match provider {
            Provider::Anthropic => (
                "claude-sonnet-4-5-20250929",
                "https://api.anthropic.com/v1",
                200_000,
            ),
            Provider::OpenAI => ("gpt-4o-mini", "https://api.openai.com/v1", 128_000),
            Provider::Gemini => (
                "gemini-2.0-flash",
                "https://generativelanguage.googleapis.com/v1beta",
                1_000_000,
            ),
            Provider::Mistral => ("mistral-small-latest", "https://api.mistral.ai/v1", 128_000),
            Provider::Grok => ("grok-2-latest", "https://api.x.ai/v1", 131_072),
            Provider::Ollama => ("llama3.2", "http://localhost:11434/api", 8_192),
        };
        LLMConfig {
            provider,
            model: model.to_string(),
            base_url: base_url.to_string(),
            context_window_tokens,
            api_key: None,
            enable_grounding: true,
            max_output_tokens: None,
        }
    }

    pub fn requires_api_key(&self) -> bool {
        !matches!(self.provider, Provider::Ollama)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_provider_round_trips_through_from_str_loose() {
        for provider in [
            Provider::Anthropic,
            Provider::OpenAI,
            Provider::Gemini,
            Provider::Mistral,
            Provider::Grok,
            Provider::Ollama,
        ] {
            assert_eq!(Provider::from_str_loose(provider.as_str()), Some(provider));
        }
    }

    #[test]
    fn ollama_is_the_only_keyless_provider() {
        for provider in Provider::fallback_order() {
            if *provider == Provider::Ollama {
                continue;
            }
            assert!(LLMConfig::default_for(*provider).requires_api_key());
        }
        assert!(!LLMConfig::default_for(Provider::Ollama).requires_api_key());
    }

    #[test]
    fn only_anthropic_and_openai_advertise_tool_call_support() {
        assert!(Provider::Anthropic.supports_tool_calls());
        assert!(Provider::OpenAI.supports_tool_calls());
        assert!(!Provider::Gemini.supports_tool_calls());
        assert!(!Provider::Mistral.supports_tool_calls());
        assert!(!Provider::Grok.supports_tool_calls());
        assert!(!Provider::Ollama.supports_tool_calls());
    }
}
