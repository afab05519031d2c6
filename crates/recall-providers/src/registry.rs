use crate::claude::ClaudeCliProvider;
use crate::openai::OpenAiCompatProvider;
use crate::traits::{ChatProvider, Spawner};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Claude,
    LmStudio,
    OpenRouter,
    Gemini,
}

impl ProviderKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "claude" => Some(ProviderKind::Claude),
            "lmstudio" => Some(ProviderKind::LmStudio),
            "openrouter" => Some(ProviderKind::OpenRouter),
            "gemini" => Some(ProviderKind::Gemini),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Claude => "claude",
            ProviderKind::LmStudio => "lmstudio",
            ProviderKind::OpenRouter => "openrouter",
            ProviderKind::Gemini => "gemini",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Everything needed to construct one provider, resolved from settings.
#[derive(Debug, Clone)]
pub struct ProviderSpec {
    pub kind: ProviderKind,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub binary: Option<PathBuf>,
    /// Provider session to resume, for session-capable providers.
    pub resume_session: Option<String>,
}

impl ProviderSpec {
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            base_url: None,
            model: None,
            api_key: None,
            binary: None,
            resume_session: None,
        }
    }
}

pub fn build_provider(spec: &ProviderSpec, spawner: Arc<dyn Spawner>) -> Arc<dyn ChatProvider> {
    match spec.kind {
        ProviderKind::Claude => Arc::new(
            ClaudeCliProvider::new(
                spec.binary.clone().unwrap_or_else(|| PathBuf::from("claude")),
                spec.model.clone(),
                spawner,
            )
            .with_session(spec.resume_session.clone()),
        ),
        ProviderKind::LmStudio => Arc::new(OpenAiCompatProvider::lmstudio(
            spec.base_url
                .as_deref()
                .unwrap_or("http://localhost:1234/v1"),
            spec.model.as_deref().unwrap_or("local-model"),
        )),
        ProviderKind::OpenRouter => {
            let provider = match &spec.base_url {
                Some(base_url) => OpenAiCompatProvider::new(
                    "openrouter",
                    base_url,
                    spec.model.as_deref().unwrap_or("openrouter/auto"),
                    spec.api_key.clone(),
                ),
                None => OpenAiCompatProvider::openrouter(
                    spec.model.as_deref().unwrap_or("openrouter/auto"),
                    spec.api_key.clone(),
                ),
            };
            Arc::new(provider)
        }
        ProviderKind::Gemini => {
            let provider = match &spec.base_url {
                Some(base_url) => OpenAiCompatProvider::new(
                    "gemini",
                    base_url,
                    spec.model.as_deref().unwrap_or("gemini-2.0-flash"),
                    spec.api_key.clone(),
                ),
                None => OpenAiCompatProvider::gemini(
                    spec.model.as_deref().unwrap_or("gemini-2.0-flash"),
                    spec.api_key.clone(),
                ),
            };
            Arc::new(provider)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::NullSpawner;

    #[test]
    fn test_kind_parsing() {
        assert_eq!(ProviderKind::parse("claude"), Some(ProviderKind::Claude));
        assert_eq!(ProviderKind::parse("lmstudio"), Some(ProviderKind::LmStudio));
        assert_eq!(ProviderKind::parse("ollama"), None);
    }

    #[test]
    fn test_build_provider_names() {
        for (kind, name) in [
            (ProviderKind::Claude, "claude"),
            (ProviderKind::LmStudio, "lmstudio"),
            (ProviderKind::OpenRouter, "openrouter"),
            (ProviderKind::Gemini, "gemini"),
        ] {
            let provider = build_provider(&ProviderSpec::new(kind), Arc::new(NullSpawner));
            assert_eq!(provider.name(), name);
        }
    }
}
