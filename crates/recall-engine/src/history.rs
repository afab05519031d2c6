use recall_providers::{ChatMessage, Role};

/// Context caps for the extractor conversation; the settings file overrides
/// the defaults.
#[derive(Debug, Clone, Copy)]
pub struct ContextCaps {
    pub max_messages: usize,
    pub max_tokens: usize,
}

impl Default for ContextCaps {
    fn default() -> Self {
        Self {
            max_messages: 40,
            max_tokens: 50_000,
        }
    }
}

/// Rough token estimate: ceil(chars / 4). Deliberately provider-agnostic.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// The extractor conversation. The system message at index 0 is the policy
/// carrier and survives every truncation.
#[derive(Debug, Clone, Default)]
pub struct ChatHistory {
    messages: Vec<ChatMessage>,
}

impl ChatHistory {
    pub fn with_system(system: impl Into<String>) -> Self {
        Self {
            messages: vec![ChatMessage::system(system)],
        }
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.messages.push(ChatMessage::user(content));
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.messages.push(ChatMessage::assistant(content));
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn estimated_tokens(&self) -> usize {
        self.messages
            .iter()
            .map(|m| estimate_tokens(&m.content))
            .sum()
    }

    /// Drop oldest non-system messages until both caps are satisfied.
    /// Returns the number of dropped messages; truncation is silent to the
    /// LLM, the caller logs it.
    pub fn truncate(&mut self, caps: &ContextCaps) -> usize {
        let mut dropped = 0;
        loop {
            let over_count = self.messages.len() > caps.max_messages;
            let over_tokens = self.estimated_tokens() > caps.max_tokens;
            if !over_count && !over_tokens {
                break;
            }

            let remove_at = if self
                .messages
                .first()
                .is_some_and(|m| m.role == Role::System)
            {
                1
            } else {
                0
            };
            if remove_at >= self.messages.len() {
                break;
            }
            self.messages.remove(remove_at);
            dropped += 1;
        }
        dropped
    }
}
