//! Runtime configuration
//!
//! Loaded from YAML (an explicit path, or `<config_dir>/cascade/config.yaml`
//! when present) and then overridden from the environment.

use crate::cost::PricingTable;
use crate::source::EnrichmentSource;
use crate::throttle::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Credentials and limits for the people-directory API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrimaryConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub requests_per_minute: u32,
    pub timeout_secs: u64,
}

impl Default for PrimaryConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.ai-ark.com/v1".to_string(),
            requests_per_minute: 100,
            timeout_secs: 60,
        }
    }
}

/// Credentials and limits for the profile-scraping dataset API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub username: Option<String>,
    pub password: Option<String>,
    pub base_url: String,
    pub profile_dataset: String,
    pub search_dataset: String,
    pub requests_per_minute: u32,
    pub timeout_secs: u64,
    /// Snapshot polls before giving up.
    pub poll_attempts: u32,
    pub poll_interval_secs: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            username: None,
            password: None,
            base_url: "https://api.brightdata.com".to_string(),
            profile_dataset: "gd_linkedin_profile".to_string(),
            search_dataset: "gd_linkedin_people_search".to_string(),
            requests_per_minute: 30,
            timeout_secs: 120,
            poll_attempts: 30,
            poll_interval_secs: 10,
        }
    }
}

impl NetworkConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebsiteConfig {
    pub requests_per_minute: u32,
    pub timeout_secs: u64,
    /// Paths crawled after the homepage.
    pub pages: Vec<String>,
    /// Scheme used for bare domains.
    pub scheme: String,
}

impl Default for WebsiteConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 100,
            timeout_secs: 30,
            pages: vec!["/contact".into(), "/about".into(), "/team".into()],
            scheme: "https".to_string(),
        }
    }
}

/// Credentials and model settings for the LLM research source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub api_version: String,
    pub requests_per_minute: u32,
    pub timeout_secs: u64,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.anthropic.com".to_string(),
            model: "claude-3-sonnet-20240229".to_string(),
            max_tokens: 3000,
            api_version: "2023-06-01".to_string(),
            requests_per_minute: 50,
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub concurrency: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self { concurrency: 5 }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CascadeConfig {
    pub primary: PrimaryConfig,
    pub network: NetworkConfig,
    pub website: WebsiteConfig,
    pub ai: AiConfig,
    pub retry: RetryPolicy,
    pub pricing: PricingTable,
    pub batch: BatchConfig,
    /// Waterfall order.
    pub priority: Vec<EnrichmentSource>,
}

impl Default for CascadeConfig {
    fn default() -> Self {
        Self {
            primary: PrimaryConfig::default(),
            network: NetworkConfig::default(),
            website: WebsiteConfig::default(),
            ai: AiConfig::default(),
            retry: RetryPolicy::default(),
            pricing: PricingTable::default(),
            batch: BatchConfig::default(),
            priority: vec![
                EnrichmentSource::Primary,
                EnrichmentSource::Network,
                EnrichmentSource::Ai,
            ],
        }
    }
}

impl CascadeConfig {
    /// Default config file location (~/.config/cascade/config.yaml on Linux).
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("cascade").join("config.yaml"))
    }

    /// Load from `path`, or from the default location if it exists, then
    /// apply environment overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => match Self::default_path().filter(|p| p.exists()) {
                Some(p) => Self::from_file(&p)?,
                None => Self::default(),
            },
        };
        config.apply_env_from(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&text)
    }

    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }

    /// Override fields from environment-style variables looked up via `lookup`.
    /// Unparseable numeric values are ignored with a warning.
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let rate = |key: &str| {
            let raw = text(key)?;
            match raw.trim().parse::<u32>() {
                Ok(v) => Some(v),
                Err(_) => {
                    tracing::warn!(var = key, value = %raw, "ignoring non-numeric rate limit");
                    None
                }
            }
        };

        if let Some(v) = text("AI_ARK_API_KEY") {
            self.primary.api_key = Some(v);
        }
        if let Some(v) = text("AI_ARK_BASE_URL") {
            self.primary.base_url = v;
        }
        if let Some(v) = rate("AI_ARK_RATE_LIMIT") {
            self.primary.requests_per_minute = v;
        }
        if let Some(v) = text("BRIGHT_DATA_USERNAME") {
            self.network.username = Some(v);
        }
        if let Some(v) = text("BRIGHT_DATA_PASSWORD") {
            self.network.password = Some(v);
        }
        if let Some(v) = rate("LINKEDIN_RATE_LIMIT") {
            self.network.requests_per_minute = v;
        }
        if let Some(v) = rate("WEBSITE_RATE_LIMIT") {
            self.website.requests_per_minute = v;
        }
        if let Some(v) = text("ANTHROPIC_API_KEY") {
            self.ai.api_key = Some(v);
        }
        if let Some(v) = text("CLAUDE_MODEL") {
            self.ai.model = v;
        }
        if let Some(v) = rate("AI_RATE_LIMIT") {
            self.ai.requests_per_minute = v;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let rates = [
            ("primary", self.primary.requests_per_minute),
            ("network", self.network.requests_per_minute),
            ("website", self.website.requests_per_minute),
            ("ai", self.ai.requests_per_minute),
        ];
        for (name, rpm) in rates {
            if rpm == 0 {
                return Err(ConfigError::Invalid(format!(
                    "{}.requests_per_minute must be at least 1",
                    name
                )));
            }
        }
        if self.batch.concurrency == 0 {
            return Err(ConfigError::Invalid(
                "batch.concurrency must be at least 1".into(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry.max_attempts must be at least 1".into()));
        }
        if self.retry.floor_ms > self.retry.ceiling_ms {
            return Err(ConfigError::Invalid(format!(
                "retry.floor_ms ({}) exceeds retry.ceiling_ms ({})",
                self.retry.floor_ms, self.retry.ceiling_ms
            )));
        }
        if !self.retry.multiplier.is_finite() || self.retry.multiplier < 1.0 {
            return Err(ConfigError::Invalid("retry.multiplier must be >= 1".into()));
        }
        if self.priority.is_empty() {
            return Err(ConfigError::Invalid("priority must name at least one source".into()));
        }
        for (i, source) in self.priority.iter().enumerate() {
            if self.priority[..i].contains(source) {
                return Err(ConfigError::Invalid(format!(
                    "priority lists {:?} more than once",
                    source
                )));
            }
        }
        Ok(())
    }
}
