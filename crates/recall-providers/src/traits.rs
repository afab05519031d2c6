use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatReply {
    pub text: String,
    /// Session identifier echoed by session-capable providers; None for
    /// stateless chat-completions endpoints.
    pub provider_session_id: Option<String>,
}

/// The contract the session agent drives.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Post the conversation, return the assistant's reply. Implementations
    /// that maintain server-side sessions may ignore all but the newest turn.
    async fn send(&self, messages: &[ChatMessage]) -> Result<ChatReply>;
}

/// Seam for subprocess registration: every child a provider spawns is
/// reported here before the provider continues, which closes the
/// orphan-by-crash window to the interval between fork and register.
pub trait Spawner: Send + Sync {
    fn spawned(&self, pid: u32);
}

/// Spawner that registers nothing; for contexts without a supervisor.
#[derive(Debug, Default)]
pub struct NullSpawner;

impl Spawner for NullSpawner {
    fn spawned(&self, _pid: u32) {}
}
