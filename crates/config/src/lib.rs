//! Configuration loading, validation, and management for ToolRelay.
//!
//! Loads configuration from `~/.toolrelay/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use toolrelay_core::Backoff;

/// The root configuration structure.
///
/// Maps directly to `~/.toolrelay/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key (can be overridden per-provider)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Default LLM provider
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Default model
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Default temperature
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    /// Default max tokens per LLM response
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,

    /// Provider-specific configurations
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,

    /// HTTP surface
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Chat orchestrator limits and canned text
    #[serde(default)]
    pub agent: AgentConfig,

    /// Outbound capability call defaults
    #[serde(default)]
    pub executor: ExecutorConfig,

    /// Where capability definitions are read from
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Discovery-service registration
    #[serde(default)]
    pub announce: AnnounceConfig,
}

fn default_provider() -> String {
    "openai".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_true() -> bool {
    true
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("default_provider", &self.default_provider)
            .field("default_model", &self.default_model)
            .field("default_temperature", &self.default_temperature)
            .field("default_max_tokens", &self.default_max_tokens)
            .field("providers", &self.providers)
            .field("gateway", &self.gateway)
            .field("agent", &self.agent)
            .field("executor", &self.executor)
            .field("registry", &self.registry)
            .field("announce", &self.announce)
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("default_model", &self.default_model)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    /// Largest accepted request body
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    /// Allowed CORS origins; empty allows any origin
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

fn default_port() -> u16 {
    8787
}
fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_max_body_bytes() -> usize {
    1024 * 1024
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            max_body_bytes: default_max_body_bytes(),
            cors_origins: vec![],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Most model calls one request may make
    #[serde(default = "default_max_round_trips")]
    pub max_round_trips: usize,

    /// Prepended to every conversation
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Final answer when the round-trip cap is reached
    #[serde(default = "default_unable_to_complete")]
    pub unable_to_complete_message: String,

    /// Events the orchestrator may produce ahead of the caller's reads
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,

    /// Run the calls of one model turn concurrently
    #[serde(default = "default_true")]
    pub parallel_tool_calls: bool,
}

fn default_max_round_trips() -> usize {
    8
}
fn default_system_prompt() -> String {
    "You are a helpful assistant. Use the available tools when they help answer the user. \
     Tool results are JSON; report failures honestly."
        .into()
}
fn default_unable_to_complete() -> String {
    "I was unable to complete this request within the allowed number of steps.".into()
}
fn default_event_buffer() -> usize {
    1
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_round_trips: default_max_round_trips(),
            system_prompt: default_system_prompt(),
            unable_to_complete_message: default_unable_to_complete(),
            event_buffer: default_event_buffer(),
            parallel_tool_calls: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,

    #[serde(default = "default_max_attempts")]
    pub default_max_attempts: u32,

    #[serde(default = "default_backoff_ms")]
    pub default_backoff_ms: u64,

    #[serde(default)]
    pub backoff: Backoff,

    /// Response bodies larger than this are rejected as malformed
    #[serde(default = "default_max_response_bytes")]
    pub max_response_bytes: usize,
}

fn default_timeout_ms() -> u64 {
    10_000
}
fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_ms() -> u64 {
    200
}
fn default_max_response_bytes() -> usize {
    2 * 1024 * 1024
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_timeout_ms(),
            default_max_attempts: default_max_attempts(),
            default_backoff_ms: default_backoff_ms(),
            backoff: Backoff::default(),
            max_response_bytes: default_max_response_bytes(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistryBackend {
    #[default]
    Sqlite,
    File,
    Memory,
}

impl std::fmt::Display for RegistryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Sqlite => "sqlite",
            Self::File => "file",
            Self::Memory => "memory",
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default)]
    pub backend: RegistryBackend,

    /// Database or definitions file; defaults to a file under the config dir
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Snapshot cache lifetime; 0 reads the store on every request
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

fn default_cache_ttl_secs() -> u64 {
    5
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            backend: RegistryBackend::default(),
            path: None,
            cache_ttl_secs: default_cache_ttl_secs(),
        }
    }
}

impl RegistryConfig {
    /// The configured path, or the backend's default location.
    pub fn resolved_path(&self) -> PathBuf {
        match (&self.path, self.backend) {
            (Some(path), _) => path.clone(),
            (None, RegistryBackend::File) => AppConfig::config_dir().join("capabilities.toml"),
            (None, _) => AppConfig::config_dir().join("capabilities.db"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnounceConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_registry_host")]
    pub registry_host: String,

    #[serde(default = "default_registry_port")]
    pub registry_port: u16,

    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Address to advertise instead of the detected one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advertise_address: Option<String>,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default)]
    pub meta: BTreeMap<String, String>,
}

fn default_registry_host() -> String {
    "127.0.0.1".into()
}
fn default_registry_port() -> u16 {
    8500
}
fn default_service_name() -> String {
    "toolrelay".into()
}

impl Default for AnnounceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            registry_host: default_registry_host(),
            registry_port: default_registry_port(),
            service_name: default_service_name(),
            advertise_address: None,
            tags: vec![],
            meta: BTreeMap::new(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a variable lookup (the process environment in
    /// production, a map in tests):
    /// - `TOOLRELAY_API_KEY` (highest priority), `OPENAI_API_KEY`, `OPENROUTER_API_KEY`
    /// - `TOOLRELAY_PROVIDER`, `TOOLRELAY_MODEL`
    /// - `TOOLRELAY_PORT`, `TOOLRELAY_ADVERTISE_ADDRESS`
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if self.api_key.is_none() {
            self.api_key = lookup("TOOLRELAY_API_KEY")
                .or_else(|| lookup("OPENAI_API_KEY"))
                .or_else(|| lookup("OPENROUTER_API_KEY"));
        }

        if let Some(provider) = lookup("TOOLRELAY_PROVIDER") {
            self.default_provider = provider;
        }

        if let Some(model) = lookup("TOOLRELAY_MODEL") {
            self.default_model = model;
        }

        if let Some(port) = lookup("TOOLRELAY_PORT") {
            self.gateway.port = port.parse().map_err(|_| {
                ConfigError::ValidationError(format!("TOOLRELAY_PORT is not a valid port: {port}"))
            })?;
        }

        if let Some(address) = lookup("TOOLRELAY_ADVERTISE_ADDRESS") {
            self.announce.advertise_address = Some(address);
        }

        self.validate()
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".toolrelay")
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.default_temperature < 0.0 || self.default_temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "default_temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.agent.max_round_trips == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_round_trips must be at least 1".into(),
            ));
        }

        if self.agent.event_buffer == 0 {
            return Err(ConfigError::ValidationError(
                "agent.event_buffer must be at least 1".into(),
            ));
        }

        if self.executor.default_max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "executor.default_max_attempts must be at least 1".into(),
            ));
        }

        if self.executor.default_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "executor.default_timeout_ms must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Generate a default config TOML string (for the `init` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            default_provider: default_provider(),
            default_model: default_model(),
            default_temperature: default_temperature(),
            default_max_tokens: default_max_tokens(),
            providers: HashMap::new(),
            gateway: GatewayConfig::default(),
            agent: AgentConfig::default(),
            executor: ExecutorConfig::default(),
            registry: RegistryConfig::default(),
            announce: AnnounceConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
