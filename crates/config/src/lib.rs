//! Configuration loading, validation, and management for Tendril agents.
//!
//! Loads settings from `~/.tendril/config.toml` (or the file named by
//! `TENDRIL_CONFIG`) with environment variable overrides. Every field has a
//! default, so an empty or missing file yields a working configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.tendril/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    /// System instruction sent with every model request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    /// How many tool invocations may run at once (1 = sequential)
    #[serde(default = "default_max_parallel_tools")]
    pub max_parallel_tools: usize,

    /// Whether direct tool calls are recorded in the conversation history
    #[serde(default = "default_true")]
    pub record_direct_tool_call: bool,

    /// Upper bound on context-overflow reliefs within a single call
    #[serde(default = "default_max_context_reductions")]
    pub max_context_reductions: u32,

    /// Throttling retry policy
    #[serde(default)]
    pub retry: RetryConfig,

    /// Conversation window management
    #[serde(default)]
    pub conversation: ConversationConfig,
}

fn default_max_parallel_tools() -> usize {
    1
}
fn default_max_context_reductions() -> u32 {
    8
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts (first try included) before a throttle becomes fatal
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Ceiling for the doubling backoff
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    6
}
fn default_initial_delay_ms() -> u64 {
    4_000
}
fn default_max_delay_ms() -> u64 {
    240_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

/// Which conversation manager the agent uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStrategy {
    /// Keep the most recent turns, trim the rest
    #[default]
    SlidingWindow,
    /// Never touch the history
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationConfig {
    #[serde(default)]
    pub strategy: ConversationStrategy,

    /// Maximum number of turns kept after each call
    #[serde(default = "default_window_size")]
    pub window_size: usize,

    /// Keep turns carrying guard content or cache points when trimming
    #[serde(default = "default_true")]
    pub preserve_protected: bool,
}

fn default_window_size() -> usize {
    20
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            strategy: ConversationStrategy::default(),
            window_size: default_window_size(),
            preserve_protected: true,
        }
    }
}

impl AgentSettings {
    /// Load configuration from `$TENDRIL_CONFIG` or `~/.tendril/config.toml`,
    /// then apply environment overrides:
    /// - `TENDRIL_SYSTEM_PROMPT`
    /// - `TENDRIL_MAX_PARALLEL_TOOLS`
    /// - `TENDRIL_WINDOW_SIZE`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = std::env::var("TENDRIL_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| Self::config_dir().join("config.toml"));
        let mut config = Self::load_from(&config_path)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

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

        Self::from_toml_str(&content).map_err(|e| match e {
            ConfigError::ParseError { reason, .. } => ConfigError::ParseError {
                path: path.to_path_buf(),
                reason,
            },
            other => other,
        })
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::ParseError {
            path: PathBuf::from("<inline>"),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a key lookup (the process environment in [`load`](Self::load)).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(prompt) = lookup("TENDRIL_SYSTEM_PROMPT") {
            self.system_prompt = Some(prompt);
        }

        if let Some(raw) = lookup("TENDRIL_MAX_PARALLEL_TOOLS") {
            self.max_parallel_tools = parse_override("TENDRIL_MAX_PARALLEL_TOOLS", &raw)?;
        }

        if let Some(raw) = lookup("TENDRIL_WINDOW_SIZE") {
            self.conversation.window_size = parse_override("TENDRIL_WINDOW_SIZE", &raw)?;
        }

        self.validate()
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".tendril")
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_parallel_tools == 0 {
            return Err(ConfigError::ValidationError(
                "max_parallel_tools must be greater than 0".into(),
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "retry.max_attempts must be greater than 0".into(),
            ));
        }

        if self.retry.initial_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::ValidationError(
                "retry.initial_delay_ms must not exceed retry.max_delay_ms".into(),
            ));
        }

        if self.conversation.window_size == 0 {
            return Err(ConfigError::ValidationError(
                "conversation.window_size must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            system_prompt: None,
            max_parallel_tools: default_max_parallel_tools(),
            record_direct_tool_call: true,
            max_context_reductions: default_max_context_reductions(),
            retry: RetryConfig::default(),
            conversation: ConversationConfig::default(),
        }
    }
}

fn parse_override<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| {
        ConfigError::ValidationError(format!("{key} must be a non-negative integer, got '{raw}'"))
    })
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
