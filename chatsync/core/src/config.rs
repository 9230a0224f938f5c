//! TOML Configuration File Support
//!
//! Configuration for the chat client, loaded from
//! `$XDG_CONFIG_HOME/chatsync/client.toml`.
//!
//! # Configuration Priority
//!
//! Configuration values are loaded with the following priority (highest first):
//! 1. CLI arguments ([`ConfigOverrides`])
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [connection]
//! url = "wss://chat.example.com/ws/chat"
//! max_reconnect_attempts = 5
//! reconnect_delay_ms = 3000
//! connect_timeout_ms = 10000
//!
//! [reveal]
//! interval_ms = 30
//! step = 2
//!
//! [endpoint]
//! host = "chat.example.com"
//! secure = true
//! development = false
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::endpoint::{resolve_endpoint, EndpointContext};
use crate::facade::SyncConfig;

#[cfg(feature = "websocket")]
use crate::transport::websocket::DEFAULT_CONNECT_TIMEOUT;

#[cfg(not(feature = "websocket"))]
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// Connection section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionToml {
    /// Full `ws(s)://` address, or a path on the current host
    pub url: Option<String>,

    /// Reconnect attempts before giving up
    pub max_reconnect_attempts: Option<u32>,

    /// Fixed delay between reconnect attempts in milliseconds
    pub reconnect_delay_ms: Option<u64>,

    /// WebSocket handshake timeout in milliseconds
    pub connect_timeout_ms: Option<u64>,
}

/// Reveal section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RevealToml {
    /// Time between reveal ticks in milliseconds
    pub interval_ms: Option<u64>,

    /// Characters revealed per tick
    pub step: Option<usize>,
}

/// Endpoint section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointToml {
    /// Host the client is served from
    pub host: Option<String>,

    /// Use `wss`
    pub secure: Option<bool>,

    /// Development build
    pub development: Option<bool>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientToml {
    /// Connection section
    pub connection: ConnectionToml,

    /// Reveal section
    pub reveal: RevealToml,

    /// Endpoint section
    pub endpoint: EndpointToml,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Resolved client configuration
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Address resolution inputs
    pub endpoint: EndpointContext,

    /// Engine tuning
    pub sync: SyncConfig,

    /// WebSocket handshake timeout
    pub connect_timeout: Duration,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    source: ConfigSource,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: EndpointContext::default(),
            sync: SyncConfig::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl ClientConfig {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Set the configuration source
    pub fn set_source(&mut self, source: ConfigSource) {
        self.source = source;
    }

    /// Resolved channel address
    #[must_use]
    pub fn address(&self) -> String {
        resolve_endpoint(&self.endpoint)
    }

    /// Check value ranges
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] if the reveal interval or step
    /// is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sync.reveal.interval.is_zero() {
            return Err(ConfigError::ValidationError(
                "reveal interval must be positive".to_string(),
            ));
        }
        if self.sync.reveal.step == 0 {
            return Err(ConfigError::ValidationError(
                "reveal step must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/chatsync/client.toml` or
/// `~/.config/chatsync/client.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("chatsync").join("client.toml"))
}

/// Load configuration from the default path and the environment
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed, or if the
/// result fails validation. A missing config file is not an error.
pub fn load_config() -> Result<ClientConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path and the environment
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed, or
/// if the result fails validation.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<ClientConfig, ConfigError> {
    load_config_with_env(path, |key| std::env::var(key).ok())
}

fn load_config_with_env(
    path: Option<PathBuf>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<ClientConfig, ConfigError> {
    let mut config = ClientConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: ClientToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config);
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config, env);
    config.validate()?;

    Ok(config)
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut ClientConfig, toml: &ClientToml) {
    if toml.connection.url.is_some() {
        config.endpoint.override_url = toml.connection.url.clone();
    }
    if let Some(attempts) = toml.connection.max_reconnect_attempts {
        config.sync.reconnect.max_attempts = attempts;
    }
    if let Some(delay) = toml.connection.reconnect_delay_ms {
        config.sync.reconnect.delay = Duration::from_millis(delay);
    }
    if let Some(timeout) = toml.connection.connect_timeout_ms {
        config.connect_timeout = Duration::from_millis(timeout);
    }

    if let Some(interval) = toml.reveal.interval_ms {
        config.sync.reveal.interval = Duration::from_millis(interval);
    }
    if let Some(step) = toml.reveal.step {
        config.sync.reveal.step = step;
    }

    if let Some(ref host) = toml.endpoint.host {
        config.endpoint.host = host.clone();
    }
    if let Some(secure) = toml.endpoint.secure {
        config.endpoint.secure = secure;
    }
    if let Some(development) = toml.endpoint.development {
        config.endpoint.development = development;
    }
}

fn parse_flag(value: &str) -> bool {
    value != "0" && value.to_lowercase() != "false"
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Option<T> {
    let parsed = value.parse::<T>().ok();
    if parsed.is_none() {
        tracing::warn!(key, value, "Ignoring unparseable environment value");
    }
    parsed
}

/// Apply environment variable overrides to the config
fn apply_env_config(config: &mut ClientConfig, env: impl Fn(&str) -> Option<String>) {
    if let Some(url) = env("CHATSYNC_WS_URL") {
        config.endpoint.override_url = Some(url);
        config.source = ConfigSource::Env;
    }
    if let Some(n) = env("CHATSYNC_MAX_RECONNECT_ATTEMPTS")
        .and_then(|v| parse_env::<u32>("CHATSYNC_MAX_RECONNECT_ATTEMPTS", &v))
    {
        config.sync.reconnect.max_attempts = n;
        config.source = ConfigSource::Env;
    }
    if let Some(ms) = env("CHATSYNC_RECONNECT_DELAY_MS")
        .and_then(|v| parse_env::<u64>("CHATSYNC_RECONNECT_DELAY_MS", &v))
    {
        config.sync.reconnect.delay = Duration::from_millis(ms);
        config.source = ConfigSource::Env;
    }
    if let Some(ms) = env("CHATSYNC_CONNECT_TIMEOUT_MS")
        .and_then(|v| parse_env::<u64>("CHATSYNC_CONNECT_TIMEOUT_MS", &v))
    {
        config.connect_timeout = Duration::from_millis(ms);
        config.source = ConfigSource::Env;
    }
    if let Some(ms) = env("CHATSYNC_REVEAL_INTERVAL_MS")
        .and_then(|v| parse_env::<u64>("CHATSYNC_REVEAL_INTERVAL_MS", &v))
    {
        config.sync.reveal.interval = Duration::from_millis(ms);
        config.source = ConfigSource::Env;
    }
    if let Some(step) =
        env("CHATSYNC_REVEAL_STEP").and_then(|v| parse_env::<usize>("CHATSYNC_REVEAL_STEP", &v))
    {
        config.sync.reveal.step = step;
        config.source = ConfigSource::Env;
    }
    if let Some(host) = env("CHATSYNC_HOST") {
        config.endpoint.host = host;
        config.source = ConfigSource::Env;
    }
    if let Some(secure) = env("CHATSYNC_SECURE") {
        config.endpoint.secure = parse_flag(&secure);
        config.source = ConfigSource::Env;
    }
    if let Some(dev) = env("CHATSYNC_DEV") {
        config.endpoint.development = parse_flag(&dev);
        config.source = ConfigSource::Env;
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Builder for applying CLI overrides to configuration
///
/// Use this after [`load_config`], then call [`ClientConfig::validate`].
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Address override (full URL or path)
    pub url: Option<String>,

    /// Host override
    pub host: Option<String>,

    /// Force `wss`
    pub secure: Option<bool>,

    /// Force development endpoint
    pub development: Option<bool>,

    /// Reconnect attempts override
    pub max_reconnect_attempts: Option<u32>,

    /// Reconnect delay override (milliseconds)
    pub reconnect_delay_ms: Option<u64>,

    /// Reveal interval override (milliseconds)
    pub reveal_interval_ms: Option<u64>,

    /// Reveal step override
    pub reveal_step: Option<usize>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set address override
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Set reconnect attempts override
    #[must_use]
    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = Some(attempts);
        self
    }

    /// Set reconnect delay override
    #[must_use]
    pub fn with_reconnect_delay_ms(mut self, ms: u64) -> Self {
        self.reconnect_delay_ms = Some(ms);
        self
    }

    /// Set reveal cadence overrides
    #[must_use]
    pub fn with_reveal(mut self, interval_ms: u64, step: usize) -> Self {
        self.reveal_interval_ms = Some(interval_ms);
        self.reveal_step = Some(step);
        self
    }

    fn is_empty(&self) -> bool {
        self.url.is_none()
            && self.host.is_none()
            && self.secure.is_none()
            && self.development.is_none()
            && self.max_reconnect_attempts.is_none()
            && self.reconnect_delay_ms.is_none()
            && self.reveal_interval_ms.is_none()
            && self.reveal_step.is_none()
    }

    /// Apply overrides to a configuration
    pub fn apply(&self, config: &mut ClientConfig) {
        if self.is_empty() {
            return;
        }
        config.source = ConfigSource::Cli;

        if self.url.is_some() {
            config.endpoint.override_url = self.url.clone();
        }
        if let Some(ref host) = self.host {
            config.endpoint.host = host.clone();
        }
        if let Some(secure) = self.secure {
            config.endpoint.secure = secure;
        }
        if let Some(development) = self.development {
            config.endpoint.development = development;
        }
        if let Some(attempts) = self.max_reconnect_attempts {
            config.sync.reconnect.max_attempts = attempts;
        }
        if let Some(ms) = self.reconnect_delay_ms {
            config.sync.reconnect.delay = Duration::from_millis(ms);
        }
        if let Some(ms) = self.reveal_interval_ms {
            config.sync.reveal.interval = Duration::from_millis(ms);
        }
        if let Some(step) = self.reveal_step {
            config.sync.reveal.step = step;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
