//! Configuration
//!
//! Centralized configuration for the transport, loaded from a TOML file at
//! `~/.config/courier/courier.toml`, environment variables and defaults.
//!
//! # Configuration Priority
//!
//! Configuration values are loaded with the following priority (highest first):
//! 1. CLI arguments (applied by the binary after loading)
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [server]
//! api_url = "https://api.example.com"
//! ticket_path = "/api/v1/auth/ws-ticket/"
//!
//! [reconnect]
//! max_attempts = 5
//! base_delay_ms = 1000
//! max_delay_ms = 30000
//!
//! [transport]
//! connect_timeout_ms = 10000
//! request_timeout_ms = 10000
//! channel_capacity = 100
//! max_frame_size = 1048576
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::endpoint::EndpointBuilder;
use crate::reconnect::ReconnectPolicy;

/// Default HTTP origin of the backend
pub const DEFAULT_API_URL: &str = "http://localhost:8000";

/// Default path of the ticket endpoint
pub const DEFAULT_TICKET_PATH: &str = "/api/v1/auth/ws-ticket/";

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

/// Tracks where the effective configuration last came from
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Built-in default
    #[default]
    Default,
}

// =============================================================================
// Effective Configuration
// =============================================================================

/// Effective transport configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CourierConfig {
    /// HTTP origin of the backend (e.g. `https://api.example.com`)
    pub api_url: String,

    /// Path of the ticket endpoint, relative to `api_url`
    pub ticket_path: String,

    /// Maximum consecutive reconnect attempts before giving up
    pub max_reconnect_attempts: u32,

    /// Base delay of the exponential backoff in milliseconds
    pub reconnect_base_delay_ms: u64,

    /// Cap of the exponential backoff in milliseconds
    pub reconnect_max_delay_ms: u64,

    /// Handshake timeout for the duplex transport in milliseconds
    pub connect_timeout_ms: u64,

    /// Timeout of the ticket request in milliseconds
    pub request_timeout_ms: u64,

    /// Capacity of the per-link inbound and outbound channels
    pub channel_capacity: usize,

    /// Largest inbound frame accepted, in bytes
    pub max_frame_size: usize,

    /// Path of the file the configuration was loaded from, if any
    #[serde(skip)]
    pub config_file_path: Option<PathBuf>,

    /// Where the configuration last came from
    #[serde(skip)]
    pub source: ConfigSource,
}

impl Default for CourierConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            ticket_path: DEFAULT_TICKET_PATH.to_string(),
            max_reconnect_attempts: 5,
            reconnect_base_delay_ms: 1000,
            reconnect_max_delay_ms: 30_000,
            connect_timeout_ms: 10_000,
            request_timeout_ms: 10_000,
            channel_capacity: 100,
            max_frame_size: 1024 * 1024,
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl CourierConfig {
    /// Defaults overridden by environment variables
    ///
    /// Environment variables:
    /// - `COURIER_API_URL` (falls back to `API_URL`): backend HTTP origin
    /// - `COURIER_TICKET_PATH`: ticket endpoint path
    /// - `COURIER_RECONNECT_ATTEMPTS`: maximum reconnect attempts
    /// - `COURIER_RECONNECT_BASE_DELAY`: backoff base in ms
    /// - `COURIER_RECONNECT_MAX_DELAY`: backoff cap in ms
    /// - `COURIER_CONNECT_TIMEOUT`: handshake timeout in ms
    /// - `COURIER_REQUEST_TIMEOUT`: ticket request timeout in ms
    /// - `COURIER_CHANNEL_CAPACITY`: per-link channel capacity
    /// - `COURIER_MAX_FRAME_SIZE`: largest inbound frame in bytes
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if the resulting values are inconsistent.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        apply_env_config(&mut config, |key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Check that values are usable
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        EndpointBuilder::from_api_url(&self.api_url)
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;

        if !self.ticket_path.starts_with('/') {
            return Err(ConfigError::ValidationError(format!(
                "ticket_path must start with '/': {}",
                self.ticket_path
            )));
        }
        if self.reconnect_base_delay_ms == 0 {
            return Err(ConfigError::ValidationError(
                "reconnect_base_delay_ms must be greater than zero".into(),
            ));
        }
        if self.reconnect_max_delay_ms < self.reconnect_base_delay_ms {
            return Err(ConfigError::ValidationError(format!(
                "reconnect_max_delay_ms ({}) is below reconnect_base_delay_ms ({})",
                self.reconnect_max_delay_ms, self.reconnect_base_delay_ms
            )));
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "channel_capacity must be greater than zero".into(),
            ));
        }
        if self.max_frame_size == 0 {
            return Err(ConfigError::ValidationError(
                "max_frame_size must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// Reconnection policy described by this configuration
    #[must_use]
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy::new(
            self.max_reconnect_attempts,
            Duration::from_millis(self.reconnect_base_delay_ms),
            Duration::from_millis(self.reconnect_max_delay_ms),
        )
    }

    /// Handshake timeout as a `Duration`
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Ticket request timeout as a `Duration`
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

// =============================================================================
// TOML File Format
// =============================================================================

/// Root of the TOML configuration file
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CourierToml {
    /// `[server]` section
    pub server: ServerToml,
    /// `[reconnect]` section
    pub reconnect: ReconnectToml,
    /// `[transport]` section
    pub transport: TransportToml,
}

/// `[server]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerToml {
    /// Backend HTTP origin
    pub api_url: Option<String>,
    /// Ticket endpoint path
    pub ticket_path: Option<String>,
}

/// `[reconnect]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectToml {
    /// Maximum reconnect attempts
    pub max_attempts: Option<u32>,
    /// Backoff base in ms
    pub base_delay_ms: Option<u64>,
    /// Backoff cap in ms
    pub max_delay_ms: Option<u64>,
}

/// `[transport]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportToml {
    /// Handshake timeout in ms
    pub connect_timeout_ms: Option<u64>,
    /// Ticket request timeout in ms
    pub request_timeout_ms: Option<u64>,
    /// Per-link channel capacity
    pub channel_capacity: Option<usize>,
    /// Largest inbound frame in bytes
    pub max_frame_size: Option<usize>,
}

// =============================================================================
// Loading
// =============================================================================

/// Default configuration file location
///
/// `$XDG_CONFIG_HOME/courier/courier.toml` (typically `~/.config/courier/courier.toml`)
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("courier").join("courier.toml"))
}

/// Load configuration from the default file location, environment and defaults
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be read or parsed,
/// or if the resulting values are invalid. A missing file is not an error.
pub fn load_config() -> Result<CourierConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path
///
/// # Arguments
///
/// * `path` - Optional path to the configuration file. If `None`, only defaults
///   and environment variables are used.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed, or if
/// validation fails.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<CourierConfig, ConfigError> {
    let config = load_unvalidated_config_from_path(path)?;
    config.validate()?;
    Ok(config)
}

/// Layer defaults, file and environment without validating the result
///
/// For callers that apply further overrides (such as command-line flags)
/// and call [`CourierConfig::validate`] themselves.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_unvalidated_config_from_path(
    path: Option<PathBuf>,
) -> Result<CourierConfig, ConfigError> {
    let mut config = CourierConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: CourierToml = toml::from_str(&toml_content)?;
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

    apply_env_config(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut CourierConfig, toml: &CourierToml) {
    if let Some(ref url) = toml.server.api_url {
        config.api_url.clone_from(url);
    }
    if let Some(ref path) = toml.server.ticket_path {
        config.ticket_path.clone_from(path);
    }

    if let Some(attempts) = toml.reconnect.max_attempts {
        config.max_reconnect_attempts = attempts;
    }
    if let Some(delay) = toml.reconnect.base_delay_ms {
        config.reconnect_base_delay_ms = delay;
    }
    if let Some(delay) = toml.reconnect.max_delay_ms {
        config.reconnect_max_delay_ms = delay;
    }

    if let Some(timeout) = toml.transport.connect_timeout_ms {
        config.connect_timeout_ms = timeout;
    }
    if let Some(timeout) = toml.transport.request_timeout_ms {
        config.request_timeout_ms = timeout;
    }
    if let Some(capacity) = toml.transport.channel_capacity {
        config.channel_capacity = capacity;
    }
    if let Some(size) = toml.transport.max_frame_size {
        config.max_frame_size = size;
    }
}

/// Apply environment overrides, reading variables through `lookup`
fn apply_env_config<F>(config: &mut CourierConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(url) = lookup("COURIER_API_URL").or_else(|| lookup("API_URL")) {
        config.api_url = url;
        config.source = ConfigSource::Env;
    }
    if let Some(path) = lookup("COURIER_TICKET_PATH") {
        config.ticket_path = path;
        config.source = ConfigSource::Env;
    }

    let parsed_u64 = |key: &str| lookup(key).and_then(|v| v.parse::<u64>().ok());

    if let Some(attempts) = lookup("COURIER_RECONNECT_ATTEMPTS").and_then(|v| v.parse().ok()) {
        config.max_reconnect_attempts = attempts;
        config.source = ConfigSource::Env;
    }
    if let Some(ms) = parsed_u64("COURIER_RECONNECT_BASE_DELAY") {
        config.reconnect_base_delay_ms = ms;
        config.source = ConfigSource::Env;
    }
    if let Some(ms) = parsed_u64("COURIER_RECONNECT_MAX_DELAY") {
        config.reconnect_max_delay_ms = ms;
        config.source = ConfigSource::Env;
    }
    if let Some(ms) = parsed_u64("COURIER_CONNECT_TIMEOUT") {
        config.connect_timeout_ms = ms;
        config.source = ConfigSource::Env;
    }
    if let Some(ms) = parsed_u64("COURIER_REQUEST_TIMEOUT") {
        config.request_timeout_ms = ms;
        config.source = ConfigSource::Env;
    }
    if let Some(capacity) = lookup("COURIER_CHANNEL_CAPACITY").and_then(|v| v.parse().ok()) {
        config.channel_capacity = capacity;
        config.source = ConfigSource::Env;
    }
    if let Some(size) = lookup("COURIER_MAX_FRAME_SIZE").and_then(|v| v.parse().ok()) {
        config.max_frame_size = size;
        config.source = ConfigSource::Env;
    }
}
