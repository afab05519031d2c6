// Extractor LLM providers.
//
// Every provider satisfies the same contract: take the conversation so far,
// return the assistant's text and (for session-capable providers) the
// provider's own session identifier. Transient connectivity failures are
// distinguishable from permanent ones so the agent can decide whether to
// fall back.

mod claude;
mod error;
mod openai;
mod registry;
mod traits;

pub use claude::{ClaudeCliProvider, OBSERVER_CMD_MARKER};
pub use error::{Error, Result};
pub use openai::OpenAiCompatProvider;
pub use registry::{ProviderKind, ProviderSpec, build_provider};
pub use traits::{ChatMessage, ChatProvider, ChatReply, NullSpawner, Role, Spawner};
