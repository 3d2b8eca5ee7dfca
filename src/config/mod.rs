//! Configuration management for FilePilot

use crate::filesystem::DEFAULT_CHUNK_SIZE;
use crate::llm::anthropic::DEFAULT_BASE_URL;
use crate::orchestrator::{OrchestratorSettings, DEFAULT_BASE_INSTRUCTION, DEFAULT_MAX_OUTPUT_TOKENS, DEFAULT_MODEL};
use crate::utils::errors::ConfigError;
use crate::utils::http::HttpClientConfig;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Main application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Completion endpoint settings
    pub provider: ProviderConfig,
    /// File access settings
    pub filesystem: FilesystemConfig,
    /// Prompt settings
    pub assistant: AssistantConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Configuration for the completion provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Provider name; also selects the `<NAME>_API_KEY` environment variable
    pub name: String,
    /// API key (the environment variable wins when both are set)
    pub api_key: Option<String>,
    /// Base URL for the provider API
    pub base_url: String,
    /// Model used for every command
    pub model: String,
    pub max_output_tokens: u32,
    /// Local limiter capacity, refilled once per minute
    pub requests_per_minute: u32,
    pub connect_timeout_secs: u64,
    /// Total timeout for the connection check
    pub request_timeout_secs: u64,
    /// Longest silence tolerated mid-stream; 0 disables the check
    pub chunk_idle_timeout_secs: u64,
}

/// File access configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilesystemConfig {
    /// Chunk size for binary reads (bytes)
    pub chunk_size: usize,
}

/// Prompt configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssistantConfig {
    /// First section of every system prompt
    pub base_instruction: String,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            name: "anthropic".to_string(),
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            max_output_tokens: DEFAULT_MAX_OUTPUT_TOKENS,
            requests_per_minute: 50,
            connect_timeout_secs: 10,
            request_timeout_secs: 30,
            chunk_idle_timeout_secs: 60,
        }
    }
}

impl Default for FilesystemConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            base_instruction: DEFAULT_BASE_INSTRUCTION.to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Check if the configuration is valid
    pub fn validate(&self) -> Result<()> {
        Url::parse(&self.provider.base_url).map_err(|e| ConfigError::InvalidValue {
            key: "provider.base_url".to_string(),
            value: format!("{} ({})", self.provider.base_url, e),
        })?;

        if self.provider.model.trim().is_empty() {
            return Err(invalid("provider.model", &self.provider.model));
        }
        if self.provider.requests_per_minute == 0 {
            return Err(invalid("provider.requests_per_minute", "0"));
        }
        if self.provider.max_output_tokens == 0 {
            return Err(invalid("provider.max_output_tokens", "0"));
        }
        if self.filesystem.chunk_size == 0 {
            return Err(invalid("filesystem.chunk_size", "0"));
        }
        if !LOG_LEVELS.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(invalid("logging.level", &self.logging.level));
        }

        Ok(())
    }

    /// API key from the environment or, failing that, the config file
    pub fn resolved_api_key(&self) -> Option<String> {
        ApiKeyResolver::resolve_api_key(&self.provider.name, self.provider.api_key.as_deref())
    }

    /// Orchestrator settings derived from the provider and assistant sections
    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            model: self.provider.model.clone(),
            max_output_tokens: self.provider.max_output_tokens,
            base_instruction: self.assistant.base_instruction.clone(),
            chunk_idle_timeout: match self.provider.chunk_idle_timeout_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
        }
    }

    /// HTTP client settings for the provider
    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            connect_timeout: Duration::from_secs(self.provider.connect_timeout_secs),
            request_timeout: Duration::from_secs(self.provider.request_timeout_secs),
            ..HttpClientConfig::default()
        }
    }
}

fn invalid(key: &str, value: &str) -> crate::utils::errors::PilotError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
    .into()
}

/// Configuration manager for loading, saving, and managing application configuration
#[derive(Debug)]
pub struct ConfigManager {
    config: Config,
    config_path: PathBuf,
}

impl ConfigManager {
    /// Load from the default location, writing defaults on first run
    pub fn new() -> Result<Self> {
        Self::from_path(Self::default_config_path()?)
    }

    /// Load from `path`, writing defaults there if it does not exist
    pub fn from_path<P: Into<PathBuf>>(path: P) -> Result<Self> {
        let config_path = path.into();
        let config = if config_path.exists() {
            Self::load_config(&config_path)?
        } else {
            let default_config = Config::default();
            Self::save_config(&config_path, &default_config)?;
            default_config
        };

        Ok(Self { config, config_path })
    }

    /// Get the current configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get a mutable reference to the configuration
    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Save the current configuration to disk
    pub fn save(&self) -> Result<()> {
        Self::save_config(&self.config_path, &self.config)
    }

    /// `<config dir>/filepilot/config.toml`
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().ok_or_else(|| ConfigError::FileNotFound {
            path: PathBuf::from("config directory"),
        })?;

        Ok(config_dir.join("filepilot").join("config.toml"))
    }

    /// Load configuration from file
    fn load_config(path: &Path) -> Result<Config> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::ReadError { source: e })?;

        toml::from_str(&content)
            .map_err(|e| ConfigError::ParseError { source: e })
            .map_err(Into::into)
    }

    /// Save configuration to file
    fn save_config(path: &Path, config: &Config) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| ConfigError::WriteError { source: e })?;
            }
        }

        let content = toml::to_string_pretty(config).map_err(|e| ConfigError::SerializeError { source: e })?;

        fs::write(path, content).map_err(|e| ConfigError::WriteError { source: e })?;

        Ok(())
    }
}

/// Centralized API key resolution logic
pub struct ApiKeyResolver;

impl ApiKeyResolver {
    /// Get API key for provider with environment variable precedence
    pub fn resolve_api_key(provider_name: &str, config_api_key: Option<&str>) -> Option<String> {
        if let Ok(api_key) = std::env::var(Self::env_key_name(provider_name)) {
            if !api_key.trim().is_empty() {
                return Some(api_key);
            }
        }

        config_api_key
            .filter(|key| !key.trim().is_empty())
            .map(str::to_string)
    }

    /// Get environment variable name for provider
    pub fn env_key_name(provider_name: &str) -> String {
        format!("{}_API_KEY", provider_name.to_uppercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::errors::PilotError;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.provider.requests_per_minute, 50);
        assert_eq!(config.provider.max_output_tokens, 4000);
        assert_eq!(config.filesystem.chunk_size, 1024 * 1024);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.provider.base_url = "not a url".to_string();
        assert!(matches!(
            config.validate(),
            Err(PilotError::Config(ConfigError::InvalidValue { key, .. })) if key == "provider.base_url"
        ));

        let mut config = Config::default();
        config.provider.requests_per_minute = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.filesystem.chunk_size = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: Config = toml::from_str("[provider]\nmodel = \"claude-test\"\n").unwrap();
        assert_eq!(config.provider.model, "claude-test");
        assert_eq!(config.provider.requests_per_minute, 50);
        assert_eq!(config.assistant.base_instruction, DEFAULT_BASE_INSTRUCTION);
    }

    #[test]
    fn test_manager_writes_defaults_then_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut manager = ConfigManager::from_path(&path).unwrap();
        assert!(path.exists());
        assert_eq!(manager.config(), &Config::default());

        manager.config_mut().provider.model = "claude-other".to_string();
        manager.save().unwrap();

        let reloaded = ConfigManager::from_path(&path).unwrap();
        assert_eq!(reloaded.config().provider.model, "claude-other");
    }

    #[test]
    fn test_malformed_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "provider = [").unwrap();

        assert!(matches!(
            ConfigManager::from_path(&path),
            Err(PilotError::Config(ConfigError::ParseError { .. }))
        ));
    }

    #[test]
    fn test_derived_settings() {
        let mut config = Config::default();
        config.provider.chunk_idle_timeout_secs = 0;
        config.provider.connect_timeout_secs = 3;

        assert_eq!(config.orchestrator_settings().chunk_idle_timeout, None);
        assert_eq!(config.http_client_config().connect_timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_api_key_resolver_env_precedence() {
        std::env::set_var("FILEPILOT_ENV_TEST_API_KEY", "env-key");

        let result = ApiKeyResolver::resolve_api_key("filepilot_env_test", Some("config-key"));
        assert_eq!(result, Some("env-key".to_string()));

        std::env::remove_var("FILEPILOT_ENV_TEST_API_KEY");
    }

    #[test]
    fn test_api_key_resolver_config_fallback() {
        let result = ApiKeyResolver::resolve_api_key("filepilot_unset_test", Some("config-key"));
        assert_eq!(result, Some("config-key".to_string()));

        assert_eq!(ApiKeyResolver::resolve_api_key("filepilot_unset_test", Some("  ")), None);
        assert_eq!(ApiKeyResolver::resolve_api_key("filepilot_unset_test", None), None);
    }

    #[test]
    fn test_env_key_name_generation() {
        assert_eq!(ApiKeyResolver::env_key_name("anthropic"), "ANTHROPIC_API_KEY");
    }
}
