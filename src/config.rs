use crate::error::{ProxyError, Result};
use crate::providers::Provider;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_preferred_provider")]
    pub preferred_provider: String,
    /// Target for requests naming a "sonnet" model.
    #[serde(default = "default_big_model")]
    pub big_model: String,
    /// Target for requests naming a "haiku" model.
    #[serde(default = "default_small_model")]
    pub small_model: String,
    #[serde(default)]
    pub providers: HashMap<String, ProviderOverride>,
}

/// Per-provider overrides of the built-in preset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderOverride {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub models: Option<Vec<String>>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8082
}

fn default_preferred_provider() -> String {
    "openai".to_string()
}

fn default_big_model() -> String {
    "gpt-4.1".to_string()
}

fn default_small_model() -> String {
    "gpt-4.1-mini".to_string()
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            preferred_provider: default_preferred_provider(),
            big_model: default_big_model(),
            small_model: default_small_model(),
            providers: HashMap::new(),
        }
    }
}

impl ProxyConfig {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ProxyError::config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Search standard locations for a config file.
    /// Priority: CLI arg > CWD > XDG config > home dir > built-in defaults
    pub fn find_and_load(explicit_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit_path {
            return Self::load(path);
        }

        for candidate in &config_search_paths() {
            if candidate.exists() {
                tracing::info!(path = %candidate.display(), "Loading config");
                return Self::load(candidate);
            }
        }

        tracing::info!("No config file found, using defaults and environment");
        Ok(Self::default())
    }

    /// Apply `PREFERRED_PROVIDER`, `BIG_MODEL` and `SMALL_MODEL` from the
    /// process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(provider) = non_empty("PREFERRED_PROVIDER") {
            self.preferred_provider = provider.to_lowercase();
        }
        if let Some(model) = non_empty("BIG_MODEL") {
            self.big_model = model;
        }
        if let Some(model) = non_empty("SMALL_MODEL") {
            self.small_model = model;
        }
    }

    /// Check that every provider name in the config is one we know.
    pub fn validate(&self) -> Result<()> {
        self.preferred()?;
        for name in self.providers.keys() {
            if Provider::from_name(name).is_none() {
                return Err(ProxyError::config(format!(
                    "Unknown provider section '{name}'. Known providers: openai, gemini, anthropic"
                )));
            }
        }
        Ok(())
    }

    pub fn preferred(&self) -> Result<Provider> {
        Provider::from_name(&self.preferred_provider).ok_or_else(|| {
            ProxyError::config(format!(
                "Unknown preferred provider '{}'. Known providers: openai, gemini (google), anthropic",
                self.preferred_provider
            ))
        })
    }

    fn override_for(&self, provider: Provider) -> Option<&ProviderOverride> {
        self.providers
            .iter()
            .find(|(name, _)| Provider::from_name(name) == Some(provider))
            .map(|(_, o)| o)
    }

    /// Resolve the effective base URL (config override or preset default)
    #[must_use]
    pub fn base_url(&self, provider: Provider) -> String {
        self.override_for(provider)
            .and_then(|o| o.base_url.clone())
            .unwrap_or_else(|| provider.preset().base_url.to_string())
    }

    #[must_use]
    pub fn api_key_env(&self, provider: Provider) -> String {
        self.override_for(provider)
            .and_then(|o| o.api_key_env.clone())
            .unwrap_or_else(|| provider.preset().default_api_key_env.to_string())
    }

    /// Model names the provider is known to serve.
    #[must_use]
    pub fn catalog(&self, provider: Provider) -> Vec<String> {
        match self.override_for(provider).and_then(|o| o.models.clone()) {
            Some(models) => models,
            None => provider
                .preset()
                .models
                .iter()
                .map(|m| (*m).to_string())
                .collect(),
        }
    }
}

/// Supplies the API key for a provider. Injected into the request pipeline so
/// translation never reads global state.
pub trait CredentialSource: Send + Sync {
    fn api_key(&self, provider: Provider) -> Option<String>;
}

/// Reads each provider's key from the environment variable configured for it.
#[derive(Debug, Clone)]
pub struct EnvCredentials {
    vars: HashMap<Provider, String>,
}

impl EnvCredentials {
    #[must_use]
    pub fn from_config(config: &ProxyConfig) -> Self {
        let vars = Provider::ALL
            .into_iter()
            .map(|p| (p, config.api_key_env(p)))
            .collect();
        Self { vars }
    }
}

impl CredentialSource for EnvCredentials {
    fn api_key(&self, provider: Provider) -> Option<String> {
        let var = self.vars.get(&provider)?;
        std::env::var(var).ok().filter(|k| !k.trim().is_empty())
    }
}

/// Fixed keys, mostly useful for tests and embedding.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials(pub HashMap<Provider, String>);

impl CredentialSource for StaticCredentials {
    fn api_key(&self, provider: Provider) -> Option<String> {
        self.0.get(&provider).cloned()
    }
}

#[must_use]
pub fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    // CWD
    paths.push(PathBuf::from("claude-bridge.toml"));

    // XDG / platform config dir
    if cfg!(target_os = "macos") {
        if let Some(home) = dirs_path() {
            paths.push(
                home.join("Library")
                    .join("Application Support")
                    .join("claude-bridge")
                    .join("config.toml"),
            );
        }
    } else {
        if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
            paths.push(PathBuf::from(xdg).join("claude-bridge").join("config.toml"));
        }
        if let Some(home) = dirs_path() {
            paths.push(home.join(".config").join("claude-bridge").join("config.toml"));
        }
    }

    // Home directory fallback
    if let Some(home) = dirs_path() {
        paths.push(home.join(".claude-bridge.toml"));
    }

    paths
}

fn dirs_path() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
