use config::{Config, Environment, File};
use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Load(#[from] config::ConfigError),
    #[error("OpenAI API key not found: set RECIPE_EXTRACTOR__OPENAI__API_KEY or OPENAI_API_KEY")]
    MissingApiKey,
    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub fetch: FetchSettings,
    #[serde(default)]
    pub openai: OpenAiSettings,
    #[serde(default)]
    pub extraction: ExtractionSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

/// Outbound page fetch settings.
#[derive(Debug, Deserialize, Clone)]
pub struct FetchSettings {
    #[serde(default = "default_fetch_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Idle pooled connections kept per target host.
    #[serde(default = "default_max_idle_per_host")]
    pub max_idle_per_host: usize,
    /// Skip TLS certificate checks. Local debugging only.
    #[serde(default)]
    pub insecure_ssl: bool,
    /// Pages with a larger body are rejected before parsing.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_fetch_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            max_idle_per_host: default_max_idle_per_host(),
            insecure_ssl: false,
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct OpenAiSettings {
    /// Falls back to the `OPENAI_API_KEY` environment variable.
    pub api_key: Option<String>,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_model_timeout")]
    pub timeout_secs: u64,
}

impl Default for OpenAiSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_base_url(),
            model: default_model(),
            temperature: 0.0,
            max_tokens: default_max_tokens(),
            timeout_secs: default_model_timeout(),
        }
    }
}

impl OpenAiSettings {
    pub fn resolve_api_key(&self) -> Result<String, ConfigError> {
        pick_api_key(self.api_key.clone(), || std::env::var("OPENAI_API_KEY").ok())
    }
}

fn pick_api_key(
    configured: Option<String>,
    from_env: impl FnOnce() -> Option<String>,
) -> Result<String, ConfigError> {
    configured
        .filter(|k| !k.trim().is_empty())
        .or_else(from_env)
        .filter(|k| !k.trim().is_empty())
        .ok_or(ConfigError::MissingApiKey)
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractionSettings {
    /// Re-asks after a malformed model answer; total attempts is this plus one.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Characters of cleaned page content sent to the model.
    #[serde(default = "default_content_limit")]
    pub content_limit: usize,
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            content_limit: default_content_limit(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_fetch_timeout() -> u64 {
    10
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_max_idle_per_host() -> usize {
    8
}

fn default_max_body_bytes() -> usize {
    5 * 1024 * 1024
}

fn default_base_url() -> String {
    "https://api.openai.com".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_model_timeout() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    2
}

fn default_content_limit() -> usize {
    15_000
}

impl Settings {
    /// Load settings with the following priority (highest to lowest):
    /// 1. Environment variables with the `RECIPE_EXTRACTOR__` prefix
    /// 2. `config.toml` in the current directory
    /// 3. Defaults
    ///
    /// Nested keys use a double underscore: `RECIPE_EXTRACTOR__OPENAI__MODEL`.
    pub fn load() -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(File::with_name("config").required(false))
            .add_source(
                Environment::with_prefix("RECIPE_EXTRACTOR")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}
