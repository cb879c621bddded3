//! Context-window accounting and trimming.
//!
//! Token counts are estimated, not measured with a real tokenizer: `tokens ≈ chars / 4` plus a
//! small flat overhead per message for role/formatting tokens. Trimming evicts in user/assistant
//! pairs rather than one message at a time, so a dangling tool result or orphaned assistant reply
//! is never left at the head of the conversation after a trim.

use super::message::{Message, Role};

/// Flat per-message overhead added to the character-based estimate, accounting for role tags and
/// message framing that the provider's wire format adds but the raw content doesn't carry.
const PER_MESSAGE_OVERHEAD_TOKENS: usize = 4;

/// Estimate the token count of a single piece of text.
pub fn estimate_tokens(text: &str) -> usize {
    (text.chars().count() / 4).max(1)
}

/// Estimate the token count of `message`, including its tool-call payload if any.
pub fn estimate_message_tokens(message: &Message) -> usize {
    let mut total = estimate_tokens(&message.content) + PER_MESSAGE_OVERHEAD_TOKENS;
    for call in &message.tool_calls {
        total += estimate_tokens(&call.name);
        total += estimate_tokens(&call.arguments.to_string());
    }
    total
}

/// A bounded conversation history that trims itself to fit a provider's context window.
pub struct ContextWindow {
    messages: Vec<Message>,
    max_tokens: usize,
}

impl ContextWindow {
    pub fn new(max_tokens: usize) -> Self {
        ContextWindow {
            messages: Vec::new(),
            max_tokens,
        }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
        self.trim_to_fit();
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn total_tokens(&self) -> usize {
        self.messages.iter().map(estimate_message_tokens).sum()
    }

    /// Drop the oldest messages until the estimate fits `max_tokens`.
    ///
    /// The first (oldest) `System` message, if present, is never dropped — it anchors identity
    /// and long-form context and would otherwise be the first casualty since it tends to be the
    /// largest single message. Beyond that, messages are removed from the front two at a time
    /// (a user turn and the assistant turn that answered it) so a trim never leaves a dangling
    /// `Tool` result whose originating `Assistant` tool-call message was just evicted.
    pub fn trim_to_fit(&mut self) {
        while self.total_tokens() > self.max_tokens && self.messages.len() > 1 {
            let first_non_system = self
                .messages
                .iter()
                .position(|m| m.role != Role::System)
                .unwrap_or(0);
            if first_non_system >= self.messages.len() {
                break;
            }
            self.messages.remove(first_non_system);
            if first_non_system < self.messages.len() && self.messages[first_non_system].role != Role::System {
                self.messages.remove(first_non_system);
            }
        }
    }
}

/// Build the window the provider will see: system prompt, then history, trimmed to
/// `provider_context_window - 4096` tokens to leave headroom for the response.
pub fn prepare_context(history: &[Message], system_prompt: &str, provider_context_window: usize) -> ContextWindow {
    let max_tokens = provider_context_window.saturating_sub(4096).max(1);
    let mut window = ContextWindow::new(max_tokens);
    window.push(Message::system(system_prompt.to_string()));
    for message in history {
        window.push(message.clone());
    }
    window
}

impl ContextWindow {
    /// `(system, messages)` — Anthropic's Messages API takes the system prompt as a top-level
    /// field, never as a message in the array.
    pub fn to_anthropic_format(&self) -> (String, Vec<Message>) {
        let system = self
            .messages
            .iter()
            .find(|m| m.role == Role::System)
            .map(|m| m.content.to_string())
            .unwrap_or_default();
        let rest = self.messages.iter().filter(|m| m.role != Role::System).cloned().collect();
        (system, rest)
    }

    /// OpenAI-compatible Chat Completions: the system message stays in the array, prepended.
    pub fn to_openai_format(&self) -> Vec<Message> {
        self.messages.clone()
    }

    /// `(system, contents)` — Gemini's `generateContent` takes a separate `systemInstruction` and
    /// maps `assistant -> model` in its `contents` array; `tool` messages are folded into `user`
    /// turns the same way the Gemini adapter already does on the wire.
    pub fn to_gemini_format(&self) -> (String, Vec<Message>) {
        let system = self
            .messages
            .iter()
            .find(|m| m.role == Role::System)
            .map(|m| m.content.to_string())
            .unwrap_or_default();
        // `assistant -> model` role renaming happens where the Gemini adapter serialises these
        // onto the wire; this contract hands back plain `Message`s since `Role` has no `Model`
        // variant of its own.
        let contents = self.messages.iter().filter(|m| m.role != Role::System).cloned().collect();
        (system, contents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_tokens_is_chars_over_four_floor_one() {
        assert_eq!(estimate_tokens(""), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens(&"a".repeat(400)), 100);
    }

    #[test]
    fn trims_oldest_pairs_first_and_keeps_system_message() {
        let mut window = ContextWindow::new(40);
        window.push(Message::system("identity"));
        for i in 0..20 {
            window.push(Message::user(format!("question {i} padded out a fair bit")));
            window.push(Message::assistant(format!("answer {i} padded out a fair bit too")));
        }
        assert!(window.total_tokens() <= 40 + PER_MESSAGE_OVERHEAD_TOKENS * 2);
        assert_eq!(window.messages()[0].role, Role::System);
    }

    #[test]
    fn never_evicts_the_last_remaining_message() {
        let mut window = ContextWindow::new(1);
        window.push(Message::user(&"x".repeat(10_000)));
        assert_eq!(window.messages().len(), 1);
    }

    #[test]
    fn prepare_context_reserves_4096_tokens_of_headroom() {
        let window = prepare_context(&[Message::user("hi")], "system prompt", 8192);
        assert!(window.total_tokens() <= 8192 - 4096);
    }

    #[test]
    fn anthropic_format_splits_system_out_of_the_message_array() {
        let window = prepare_context(&[Message::user("hi")], "be terse", 100_000);
        let (system, messages) = window.to_anthropic_format();
        assert_eq!(system, "be terse");
        assert!(messages.iter().all(|m| m.role != Role::System));
    }

    #[test]
    fn openai_format_keeps_system_message_in_the_array() {
        let window = prepare_context(&[Message::user("hi")], "be terse", 100_000);
        let messages = window.to_openai_format();
        assert_eq!(messages[0].role, Role::System);
    }
}
