use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::gateway::RetryPolicy;
use crate::session::ContextBudget;

const CONFIG_FILE: &str = "config.json";

/// Per-provider tuning from `config.json`. Keys never live here.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit_per_minute: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

/// Stored preferences: `<data-dir>/config.json`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NexusConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_provider: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub default_models: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_provider: Option<String>,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub context_budget: ContextBudget,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub providers: BTreeMap<String, ProviderOverride>,
}

impl NexusConfig {
    pub fn path(data_dir: &Path) -> PathBuf {
        data_dir.join(CONFIG_FILE)
    }

    /// Load from `<data_dir>/config.json`. A missing file gives defaults silently,
    /// an unreadable or invalid one gives defaults with a warning.
    pub fn load(data_dir: &Path) -> Self {
        let path = Self::path(data_dir);
        let data = match std::fs::read_to_string(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Self::default(),
            Err(e) => {
                tracing::warn!("cannot read {}: {e}; using defaults", path.display());
                return Self::default();
            }
        };
        match serde_json::from_str(&data) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("invalid {}: {e}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Save to `<data_dir>/config.json` (mode 0o600).
    pub fn save(&self, data_dir: &Path) -> Result<(), StoreError> {
        ensure_data_dir(data_dir)?;
        let path = Self::path(data_dir);
        let data = serde_json::to_string_pretty(self)?;
        write_private(&path, &data)?;
        Ok(())
    }
}

/// `~/.nexus`, or `./.nexus` when no home directory is known.
pub fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".nexus")
}

/// Create the data directory (mode 0o700) if needed.
pub fn ensure_data_dir(dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))?;
    }
    Ok(())
}

/// Write `data` to `path` and restrict it to the owner.
pub(crate) fn write_private(path: &Path, data: &str) -> std::io::Result<()> {
    std::fs::write(path, data)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(NexusConfig::load(dir.path()), NexusConfig::default());
    }

    #[test]
    fn invalid_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(NexusConfig::path(dir.path()), "{ not json").unwrap();
        assert_eq!(NexusConfig::load(dir.path()), NexusConfig::default());
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("nexus");
        let mut config = NexusConfig {
            default_provider: Some("groq".into()),
            fallback_provider: Some("gemini".into()),
            context_budget: ContextBudget::Tokens(8000),
            ..Default::default()
        };
        config
            .default_models
            .insert("groq".into(), "llama-3.1-8b-instant".into());
        config.retry.max_attempts = 4;
        config.save(&data_dir).unwrap();

        assert_eq!(NexusConfig::load(&data_dir), config);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let file_mode = std::fs::metadata(NexusConfig::path(&data_dir))
                .unwrap()
                .permissions()
                .mode();
            assert_eq!(file_mode & 0o777, 0o600);
            let dir_mode = std::fs::metadata(&data_dir).unwrap().permissions().mode();
            assert_eq!(dir_mode & 0o777, 0o700);
        }
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            NexusConfig::path(dir.path()),
            r#"{"default_provider":"ollama","providers":{"ollama":{"timeout_secs":120}}}"#,
        )
        .unwrap();
        let config = NexusConfig::load(dir.path());
        assert_eq!(config.default_provider.as_deref(), Some("ollama"));
        assert_eq!(config.providers["ollama"].timeout_secs, Some(120));
        assert_eq!(config.retry, RetryPolicy::default());
        assert_eq!(config.context_budget, ContextBudget::default());
    }
}
