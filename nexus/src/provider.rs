use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::adapters::{self, ProviderAdapter};
use crate::config::{NexusConfig, ProviderOverride};
use crate::error::ValidationError;
use crate::rate_limit::TokenBucket;
use crate::security;
use crate::session::is_valid_model_name;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_MAX_TOKENS: u32 = 4096;
const DEFAULT_RATE_LIMIT: u32 = 30;

/// Known model backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    Gemini,
    Groq,
    #[serde(rename = "chatgpt", alias = "openai")]
    ChatGpt,
    #[serde(rename = "huggingface", alias = "hf")]
    HuggingFace,
    Ollama,
    Mcp,
}

impl ProviderId {
    pub const ALL: [ProviderId; 6] = [
        ProviderId::Gemini,
        ProviderId::Groq,
        ProviderId::ChatGpt,
        ProviderId::HuggingFace,
        ProviderId::Ollama,
        ProviderId::Mcp,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ProviderId::Gemini => "gemini",
            ProviderId::Groq => "groq",
            ProviderId::ChatGpt => "chatgpt",
            ProviderId::HuggingFace => "huggingface",
            ProviderId::Ollama => "ollama",
            ProviderId::Mcp => "mcp",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            ProviderId::Gemini => "Google Gemini",
            ProviderId::Groq => "Groq",
            ProviderId::ChatGpt => "OpenAI ChatGPT",
            ProviderId::HuggingFace => "Hugging Face Inference",
            ProviderId::Ollama => "Ollama (local)",
            ProviderId::Mcp => "MCP server",
        }
    }

    pub fn default_model(self) -> &'static str {
        match self {
            ProviderId::Gemini => "gemini-2.0-flash",
            ProviderId::Groq => "llama-3.3-70b-versatile",
            ProviderId::ChatGpt => "gpt-4o-mini",
            ProviderId::HuggingFace => "mistralai/Mistral-7B-Instruct-v0.3",
            ProviderId::Ollama => "llama3.2",
            ProviderId::Mcp => "default",
        }
    }

    pub fn default_base_url(self) -> &'static str {
        match self {
            ProviderId::Gemini => "https://generativelanguage.googleapis.com",
            ProviderId::Groq => "https://api.groq.com/openai/v1",
            ProviderId::ChatGpt => "https://api.openai.com/v1",
            ProviderId::HuggingFace => "https://api-inference.huggingface.co",
            ProviderId::Ollama => "http://localhost:11434",
            ProviderId::Mcp => "http://localhost:3000/mcp",
        }
    }

    /// Environment variable holding this provider's credential.
    pub fn key_env(self) -> &'static str {
        match self {
            ProviderId::Gemini => "GEMINI_API_KEY",
            ProviderId::Groq => "GROQ_API_KEY",
            ProviderId::ChatGpt => "OPENAI_API_KEY",
            ProviderId::HuggingFace => "HUGGINGFACE_TOKEN",
            ProviderId::Ollama => "OLLAMA_HOST",
            ProviderId::Mcp => "MCP_AUTH_TOKEN",
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gemini" => Ok(ProviderId::Gemini),
            "groq" => Ok(ProviderId::Groq),
            "chatgpt" | "openai" => Ok(ProviderId::ChatGpt),
            "huggingface" | "hf" => Ok(ProviderId::HuggingFace),
            "ollama" => Ok(ProviderId::Ollama),
            "mcp" => Ok(ProviderId::Mcp),
            _ => Err(ValidationError::UnknownProvider(s.to_string())),
        }
    }
}

/// Provider credential. Formatting always masks the value.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthKey(String);

impl AuthKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn masked(&self) -> String {
        if self.0.is_empty() {
            return "(none)".to_string();
        }
        let head: String = self.0.chars().take(4).collect();
        format!("{head}***")
    }
}

impl fmt::Debug for AuthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AuthKey({})", self.masked())
    }
}

impl fmt::Display for AuthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.masked())
    }
}

/// Everything needed to call one provider.
#[derive(Clone, Debug)]
pub struct ProviderConfig {
    pub id: ProviderId,
    pub display_name: String,
    pub auth_key: AuthKey,
    pub base_url: String,
    pub default_model: String,
    pub max_tokens: u32,
    pub timeout: Duration,
    /// Requests per minute.
    pub rate_limit: u32,
}

impl ProviderConfig {
    pub fn new(id: ProviderId, key: impl Into<String>) -> Self {
        Self {
            id,
            display_name: id.display_name().to_string(),
            auth_key: AuthKey::new(key),
            base_url: id.default_base_url().to_string(),
            default_model: id.default_model().to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            timeout: DEFAULT_TIMEOUT,
            rate_limit: DEFAULT_RATE_LIMIT,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    pub fn apply_override(mut self, o: &ProviderOverride) -> Self {
        if let Some(secs) = o.timeout_secs {
            self.timeout = Duration::from_secs(secs.max(1));
        }
        if let Some(max_tokens) = o.max_tokens {
            self.max_tokens = max_tokens;
        }
        if let Some(rpm) = o.rate_limit_per_minute {
            self.rate_limit = rpm;
        }
        if let Some(url) = &o.base_url {
            self = self.with_base_url(url.clone());
        }
        self
    }

    /// Key format and base domain. A config that fails here never enters a registry.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let verdict = security::check_api_key(self.auth_key.expose(), self.id.as_str());
        if !verdict.accepted {
            return Err(ValidationError::InvalidKey {
                provider: self.id.to_string(),
                reason: verdict.reason,
            });
        }
        if !is_valid_model_name(&self.default_model) {
            return Err(ValidationError::Config(format!(
                "invalid default model for {}: {:?}",
                self.id, self.default_model
            )));
        }
        if !security::validate_domain(&self.base_url) {
            return Err(ValidationError::DomainNotAllowed {
                provider: self.id.to_string(),
                url: self.base_url.clone(),
            });
        }
        Ok(())
    }
}

/// A validated provider ready for dispatch.
pub struct ProviderEntry {
    pub config: ProviderConfig,
    pub adapter: Arc<dyn ProviderAdapter>,
    pub limiter: Arc<TokenBucket>,
}

/// Validated providers, keyed by id. Only [`ProviderRegistry::register`] inserts.
#[derive(Default)]
pub struct ProviderRegistry {
    entries: BTreeMap<ProviderId, ProviderEntry>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate `config` and register it with an explicit adapter.
    pub fn register(
        &mut self,
        config: ProviderConfig,
        adapter: Arc<dyn ProviderAdapter>,
    ) -> Result<(), ValidationError> {
        config.validate()?;
        tracing::info!(
            provider = %config.id,
            key = %config.auth_key,
            base_url = %config.base_url,
            "provider registered"
        );
        let limiter = Arc::new(TokenBucket::per_minute(config.rate_limit));
        self.entries.insert(
            config.id,
            ProviderEntry {
                config,
                adapter,
                limiter,
            },
        );
        Ok(())
    }

    /// Register with the built-in adapter for `config.id`.
    pub fn register_default(&mut self, config: ProviderConfig) -> Result<(), ValidationError> {
        let adapter = adapters::adapter_for(config.id);
        self.register(config, adapter)
    }

    /// Replace a provider's key. The new config is validated before the old one is dropped.
    /// The rate limiter carries over so rotation cannot refill it.
    pub fn rotate_key(&mut self, id: ProviderId, key: &str) -> Result<(), ValidationError> {
        let Some(entry) = self.entries.get(&id) else {
            return self.register_default(ProviderConfig::new(id, key));
        };
        let config = ProviderConfig {
            auth_key: AuthKey::new(key),
            ..entry.config.clone()
        };
        let adapter = entry.adapter.clone();
        let limiter = entry.limiter.clone();
        self.register(config, adapter)?;
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.limiter = limiter;
        }
        Ok(())
    }

    pub fn get(&self, id: ProviderId) -> Option<&ProviderEntry> {
        self.entries.get(&id)
    }

    pub fn contains(&self, id: ProviderId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn ids(&self) -> Vec<ProviderId> {
        self.entries.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProviderEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Build from process environment. Invalid providers are skipped and returned.
    pub fn from_env(config: &NexusConfig) -> (Self, Vec<ValidationError>) {
        Self::from_env_with(config, |name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable lookup.
    pub fn from_env_with(
        config: &NexusConfig,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> (Self, Vec<ValidationError>) {
        let mut registry = Self::new();
        let mut rejected = Vec::new();
        let lookup = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        for id in ProviderId::ALL {
            let base = match id {
                ProviderId::Ollama => match lookup("OLLAMA_HOST") {
                    Some(host) => ProviderConfig::new(id, "").with_base_url(normalize_host(&host)),
                    None => continue,
                },
                ProviderId::Mcp => match (lookup("MCP_SERVER_URL"), lookup("MCP_AUTH_TOKEN")) {
                    (Some(url), Some(token)) => {
                        ProviderConfig::new(id, token.trim()).with_base_url(url.trim())
                    }
                    _ => continue,
                },
                _ => match lookup(id.key_env()) {
                    Some(key) => ProviderConfig::new(id, key.trim()),
                    None => continue,
                },
            };
            let mut provider_config = match config.providers.get(id.as_str()) {
                Some(o) => base.apply_override(o),
                None => base,
            };
            if let Some(model) = config.default_models.get(id.as_str()) {
                if is_valid_model_name(model) {
                    provider_config.default_model = model.clone();
                } else {
                    tracing::warn!(provider = %id, "ignoring invalid default model {model:?}");
                    rejected.push(ValidationError::Config(format!(
                        "invalid default model for {id}: {model:?}"
                    )));
                }
            }
            if let Err(e) = registry.register_default(provider_config) {
                tracing::warn!(provider = %id, "provider not registered: {e}");
                rejected.push(e);
            }
        }
        (registry, rejected)
    }
}

/// `OLLAMA_HOST` is often given as `host:port`.
fn normalize_host(host: &str) -> String {
    let host = host.trim();
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("http://{host}")
    }
}
