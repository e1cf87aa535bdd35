//! Configuration loading

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sitecache_core::{
    CacheVersion, DEFAULT_API_PREFIX, DEFAULT_CACHE_VERSION, DEFAULT_PRECACHE, PrecacheManifest,
    WorkerConfig,
};
use std::path::Path;
use tracing::info;
use url::Url;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub origin: OriginConfig,
    #[serde(default)]
    pub worker: WorkerSection,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Bearer token for `/_sitecache/install` and `/_sitecache/activate`
    #[serde(default)]
    pub admin_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            admin_token: None,
        }
    }
}

/// Site origin the cache sits in front of
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OriginConfig {
    #[serde(default = "default_origin_url")]
    pub url: String,
    #[serde(default)]
    pub skip_tls_verify: bool,
    #[serde(default = "default_follow_redirects")]
    pub follow_redirects: bool,
}

impl Default for OriginConfig {
    fn default() -> Self {
        Self {
            url: default_origin_url(),
            skip_tls_verify: false,
            follow_redirects: default_follow_redirects(),
        }
    }
}

/// Cache version and precache manifest of the deployment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSection {
    #[serde(default = "default_cache_version")]
    pub cache_version: String,
    #[serde(default = "default_precache")]
    pub precache: Vec<String>,
    #[serde(default = "default_api_prefix")]
    pub api_prefix: String,
    #[serde(default = "default_root_path")]
    pub root_path: String,
}

impl Default for WorkerSection {
    fn default() -> Self {
        Self {
            cache_version: default_cache_version(),
            precache: default_precache(),
            api_prefix: default_api_prefix(),
            root_path: default_root_path(),
        }
    }
}

/// Storage backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// `local`, `memory` or `s3`
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default)]
    pub local: LocalStorageConfig,
    #[serde(default)]
    pub s3: S3StorageConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            local: LocalStorageConfig::default(),
            s3: S3StorageConfig::default(),
        }
    }
}

/// Local storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalStorageConfig {
    #[serde(default = "default_local_path")]
    pub path: String,
}

impl Default for LocalStorageConfig {
    fn default() -> Self {
        Self {
            path: default_local_path(),
        }
    }
}

/// S3 storage configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct S3StorageConfig {
    pub bucket: Option<String>,
    pub region: Option<String>,
    pub endpoint: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub prefix: Option<String>,
    #[serde(default)]
    pub allow_http: bool,
}

/// Chat function configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    #[serde(default = "default_chat_enabled")]
    pub enabled: bool,
    #[serde(default = "default_chat_api_url")]
    pub api_url: String,
    /// Falls back to `ANTHROPIC_API_KEY`
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_chat_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_max_history")]
    pub max_history: usize,
    #[serde(default = "default_anthropic_version")]
    pub anthropic_version: String,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            enabled: default_chat_enabled(),
            api_url: default_chat_api_url(),
            api_key: None,
            model: default_chat_model(),
            max_tokens: default_max_tokens(),
            max_history: default_max_history(),
            anthropic_version: default_anthropic_version(),
            system_prompt: default_system_prompt(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// `pretty` or `json`
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// Default value functions
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_origin_url() -> String {
    "https://powerscraperpro.com".to_string()
}

fn default_follow_redirects() -> bool {
    true
}

fn default_cache_version() -> String {
    DEFAULT_CACHE_VERSION.to_string()
}

fn default_precache() -> Vec<String> {
    DEFAULT_PRECACHE.iter().map(|p| p.to_string()).collect()
}

fn default_api_prefix() -> String {
    DEFAULT_API_PREFIX.to_string()
}

fn default_root_path() -> String {
    "/".to_string()
}

fn default_backend() -> String {
    "local".to_string()
}

fn default_local_path() -> String {
    "./data/cache".to_string()
}

fn default_chat_enabled() -> bool {
    true
}

fn default_chat_api_url() -> String {
    "https://api.anthropic.com/v1/messages".to_string()
}

fn default_chat_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_max_history() -> usize {
    sitecache_core::functions::DEFAULT_MAX_HISTORY
}

fn default_anthropic_version() -> String {
    "2023-06-01".to_string()
}

fn default_system_prompt() -> String {
    "You are the assistant for the PowerScraper Pro website. Answer questions about \
     the app and media library management concisely."
        .to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &str) -> Result<Self> {
        let config_path = Path::new(path);

        if !config_path.exists() {
            info!("Config file not found at {}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path))?;

        info!("Loaded configuration from {}", path);
        Ok(config)
    }

    /// Build the worker configuration of this deployment
    pub fn worker_config(&self) -> Result<WorkerConfig> {
        let version = CacheVersion::new(self.worker.cache_version.as_str())
            .context("Invalid [worker] cache_version")?;
        let manifest = PrecacheManifest::new(self.worker.precache.iter().cloned())
            .context("Invalid [worker] precache list")?;
        let origin = Url::parse(&self.origin.url)
            .with_context(|| format!("Invalid [origin] url: {}", self.origin.url))?;

        let config = WorkerConfig::new(version, manifest, origin)
            .with_api_prefix(self.worker.api_prefix.as_str())
            .with_root_path(self.worker.root_path.as_str());
        config.validate().context("Invalid worker configuration")?;
        Ok(config)
    }

    /// Chat API key from the file or the environment
    pub fn chat_api_key(&self) -> Option<String> {
        self.chat
            .api_key
            .clone()
            .filter(|key| !key.is_empty())
            .or_else(|| std::env::var("ANTHROPIC_API_KEY").ok())
            .filter(|key| !key.is_empty())
    }
}
