use crate::{Error, Result};
use recall_engine::ContextCaps;
use recall_providers::{ProviderKind, ProviderSpec};
use recall_vector::{DecaySchedule, FederationConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// settings.json: the single user-facing configuration file. Unknown fields
// are ignored, missing fields default, so older files keep loading across
// upgrades.

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Extractor provider: claude | lmstudio | openrouter | gemini
    pub provider: String,
    pub fallback_provider: Option<String>,
    pub providers: ProviderEndpoints,
    pub vector: VectorSettings,
    pub federation: FederationSettings,
    pub replication: ReplicationSettings,
    pub context: ContextSettings,
    pub worker: WorkerSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            provider: "claude".to_string(),
            fallback_provider: None,
            providers: ProviderEndpoints::default(),
            vector: VectorSettings::default(),
            federation: FederationSettings::default(),
            replication: ReplicationSettings::default(),
            context: ContextSettings::default(),
            worker: WorkerSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ProviderEndpoints {
    pub claude: ClaudeSettings,
    pub lmstudio: EndpointSettings,
    pub openrouter: EndpointSettings,
    pub gemini: EndpointSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ClaudeSettings {
    pub binary: Option<PathBuf>,
    pub model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EndpointSettings {
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorSettings {
    /// sqlite-vec | chroma | none
    pub backend: String,
    /// Command line for the collection service (backend = chroma)
    pub collection_command: String,
    pub collection_args: Vec<String>,
    pub collection_name: String,
    pub embedding: EmbeddingSettings,
}

impl Default for VectorSettings {
    fn default() -> Self {
        Self {
            backend: "sqlite-vec".to_string(),
            collection_command: "chroma-mcp".to_string(),
            collection_args: Vec::new(),
            collection_name: "memory".to_string(),
            embedding: EmbeddingSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    /// http (OpenAI-compatible /embeddings) | hash (offline fallback)
    pub provider: String,
    pub base_url: String,
    pub model: String,
    pub dimensions: usize,
    pub api_key: Option<String>,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            provider: "http".to_string(),
            base_url: "http://localhost:1234/v1".to_string(),
            model: "text-embedding-nomic-embed-text-v1.5".to_string(),
            dimensions: 768,
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FederationSettings {
    pub max_remotes: usize,
    pub per_remote_timeout_secs: u64,
    pub overall_budget_secs: u64,
    /// golden | exponential | linear
    pub decay: String,
    pub allow: Vec<String>,
    pub read_only: bool,
}

impl Default for FederationSettings {
    fn default() -> Self {
        Self {
            max_remotes: 3,
            per_remote_timeout_secs: 5,
            overall_budget_secs: 15,
            decay: "golden".to_string(),
            allow: Vec::new(),
            read_only: true,
        }
    }
}

impl FederationSettings {
    pub fn to_config(&self) -> FederationConfig {
        FederationConfig {
            max_remotes: self.max_remotes,
            per_remote_timeout: Duration::from_secs(self.per_remote_timeout_secs),
            overall_budget: Duration::from_secs(self.overall_budget_secs),
            decay: DecaySchedule::parse(&self.decay).unwrap_or_default(),
            allow: self.allow.clone(),
            read_only: self.read_only,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationSettings {
    pub enabled: bool,
    pub remote_name: String,
    pub remote_url: Option<String>,
    pub auto_push: bool,
    pub idle_push_secs: u64,
}

impl Default for ReplicationSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            remote_name: "origin".to_string(),
            remote_url: None,
            auto_push: false,
            idle_push_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextSettings {
    pub max_messages: usize,
    pub max_tokens: usize,
}

impl Default for ContextSettings {
    fn default() -> Self {
        let caps = ContextCaps::default();
        Self {
            max_messages: caps.max_messages,
            max_tokens: caps.max_tokens,
        }
    }
}

impl ContextSettings {
    pub fn caps(&self) -> ContextCaps {
        ContextCaps {
            max_messages: self.max_messages,
            max_tokens: self.max_tokens,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    pub port: u16,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            port: crate::paths::DEFAULT_PORT,
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let settings: Settings = serde_json::from_str(&content)
            .map_err(|err| Error::Config(format!("bad settings file {}: {}", path.display(), err)))?;
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn provider_kind(&self) -> ProviderKind {
        ProviderKind::parse(&self.provider).unwrap_or(ProviderKind::Claude)
    }

    pub fn fallback_kind(&self) -> Option<ProviderKind> {
        self.fallback_provider
            .as_deref()
            .and_then(ProviderKind::parse)
    }

    /// Build the construction spec for one provider kind.
    pub fn provider_spec(&self, kind: ProviderKind) -> ProviderSpec {
        let mut spec = ProviderSpec::new(kind);
        match kind {
            ProviderKind::Claude => {
                spec.binary = self.providers.claude.binary.clone();
                spec.model = self.providers.claude.model.clone();
            }
            ProviderKind::LmStudio => {
                spec.base_url = self.providers.lmstudio.base_url.clone();
                spec.model = self.providers.lmstudio.model.clone();
            }
            ProviderKind::OpenRouter => {
                spec.base_url = self.providers.openrouter.base_url.clone();
                spec.model = self.providers.openrouter.model.clone();
                spec.api_key = self.providers.openrouter.api_key.clone();
            }
            ProviderKind::Gemini => {
                spec.base_url = self.providers.gemini.base_url.clone();
                spec.model = self.providers.gemini.model.clone();
                spec.api_key = self.providers.gemini.api_key.clone();
            }
        }
        spec
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_loads_defaults() {
        let temp = TempDir::new().unwrap();
        let settings = Settings::load(&temp.path().join("settings.json")).unwrap();

        assert_eq!(settings.worker.port, 37777);
        assert_eq!(settings.vector.backend, "sqlite-vec");
        assert_eq!(settings.federation.max_remotes, 3);
        assert_eq!(settings.provider_kind(), ProviderKind::Claude);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("settings.json");

        let mut settings = Settings::default();
        settings.provider = "lmstudio".to_string();
        settings.fallback_provider = Some("gemini".to_string());
        settings.context.max_messages = 12;
        settings.save(&path).unwrap();

        let loaded = Settings::load(&path).unwrap();
        assert_eq!(loaded.provider_kind(), ProviderKind::LmStudio);
        assert_eq!(loaded.fallback_kind(), Some(ProviderKind::Gemini));
        assert_eq!(loaded.context.caps().max_messages, 12);
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("settings.json");
        std::fs::write(&path, r#"{"provider":"gemini","future_option":{"x":1}}"#).unwrap();

        let loaded = Settings::load(&path).unwrap();
        assert_eq!(loaded.provider_kind(), ProviderKind::Gemini);
    }

    #[test]
    fn test_federation_settings_convert() {
        let settings = FederationSettings {
            decay: "exponential".to_string(),
            ..Default::default()
        };
        let config = settings.to_config();
        assert_eq!(config.per_remote_timeout, Duration::from_secs(5));
        assert_eq!(config.overall_budget, Duration::from_secs(15));
        assert_eq!(config.decay, DecaySchedule::Exponential);
    }
}
