use crate::error::{ProxyError, Result};
use crate::pricing::{DEFAULT_PRICING_URL, DEFAULT_TTL_HOURS};
use crate::providers::{AuthScheme, ProviderPreset};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub provider: ProviderConfig,
    /// Model aliases applied to translated requests (client id -> backend id).
    #[serde(default)]
    pub models: HashMap<String, String>,
    #[serde(default)]
    pub pricing: PricingConfig,
    #[serde(default)]
    pub accounting: AccountingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_provider_name")]
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    /// `"bearer"` or `"key"`; defaults to the preset's scheme.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_scheme: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_pricing_url")]
    pub url: String,
    #[serde(default = "default_ttl_hours")]
    pub ttl_hours: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountingConfig {
    /// Ask the backend to report billed cost (OpenRouter `usage.include`).
    #[serde(default = "default_true")]
    pub request_cost: bool,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            provider: ProviderConfig::default(),
            models: HashMap::new(),
            pricing: PricingConfig::default(),
            accounting: AccountingConfig::default(),
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            name: default_provider_name(),
            base_url: None,
            api_key_env: None,
            auth_scheme: None,
        }
    }
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: default_pricing_url(),
            ttl_hours: default_ttl_hours(),
        }
    }
}

impl Default for AccountingConfig {
    fn default() -> Self {
        Self { request_cost: true }
    }
}

fn default_port() -> u16 {
    8787
}

fn default_provider_name() -> String {
    "fal".to_string()
}

fn default_pricing_url() -> String {
    DEFAULT_PRICING_URL.to_string()
}

fn default_ttl_hours() -> i64 {
    DEFAULT_TTL_HOURS
}

fn default_true() -> bool {
    true
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

    /// Search standard locations for a config file, falling back to defaults.
    /// Priority: CLI arg > CWD > XDG config > home dir
    pub fn find_and_load(explicit_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit_path {
            return Self::load(path);
        }

        for candidate in config_search_paths() {
            if candidate.exists() {
                tracing::info!(path = %candidate.display(), "Loading config");
                return Self::load(&candidate);
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn preset(&self) -> Option<&'static ProviderPreset> {
        ProviderPreset::from_name(&self.provider.name)
    }

    /// Resolve the effective base URL (config override or provider preset default)
    pub fn effective_base_url(&self) -> Result<String> {
        if let Some(ref url) = self.provider.base_url {
            return Ok(url.trim_end_matches('/').to_string());
        }

        let preset = self.preset().ok_or_else(|| {
            let known: Vec<&str> = ProviderPreset::all().iter().map(|p| p.name).collect();
            ProxyError::config(format!(
                "Unknown provider '{}' and no base_url configured. Known providers: {}",
                self.provider.name,
                known.join(", ")
            ))
        })?;

        Ok(preset.base_url.to_string())
    }

    pub fn auth_scheme(&self) -> Result<AuthScheme> {
        match self.provider.auth_scheme {
            Some(ref name) => AuthScheme::from_name(name).ok_or_else(|| {
                ProxyError::config(format!("Unknown auth_scheme '{name}', expected bearer or key"))
            }),
            None => Ok(self
                .preset()
                .map_or(AuthScheme::Bearer, |p| p.auth_scheme)),
        }
    }

    /// Environment variable holding the fallback API key.
    pub fn api_key_env(&self) -> Option<&str> {
        self.provider
            .api_key_env
            .as_deref()
            .or_else(|| self.preset().map(|p| p.default_api_key_env))
    }

    /// The configured fallback key, used when a request carries no credential.
    pub fn fallback_api_key(&self) -> Option<String> {
        self.api_key_env()
            .and_then(|var| std::env::var(var).ok())
            .filter(|key| !key.is_empty())
    }

    pub fn chat_completions_url(&self) -> Result<String> {
        Ok(format!("{}/chat/completions", self.effective_base_url()?))
    }
}

pub fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    // CWD
    paths.push(PathBuf::from("fal-router-proxy.toml"));

    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        paths.push(PathBuf::from(xdg).join("fal-router-proxy").join("config.toml"));
    }

    if let Some(home) = home_dir() {
        paths.push(home.join(".config").join("fal-router-proxy").join("config.toml"));
        paths.push(home.join(".fal-router-proxy.toml"));
    }

    paths
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
