//! # Configuration Management
//!
//! Centralized configuration for the session layer.
//!
//! This module provides structured configuration for endpoints, the deferred
//! task queue and logging.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - TOML strings via `from_toml()`
//! - `PEERLINK_*` environment variables via `from_env()`
//! - Direct instantiation with defaults
//!
//! Durations are written in milliseconds, log levels as lowercase names.

use crate::error::{ProtocolError, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Message id the endpoint registers with the transport (0xBEEF)
pub const DEFAULT_MESSAGE_ID: u16 = 0xBEEF;

/// Payload ceiling of the observed host transport
pub const DEFAULT_MAX_PACKET_SIZE: usize = 4096;

/// How often connections are checked against the peer roster
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(600);

/// How long a deferred task is retried before it is abandoned
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_millis(5000);

/// Smallest ceiling that still fits a handshake packet
const MIN_PACKET_SIZE: usize = 64;

/// Main configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct NetworkConfig {
    /// Endpoint configuration
    #[serde(default)]
    pub endpoint: EndpointConfig,

    /// Deferred task queue configuration
    #[serde(default)]
    pub tasks: TaskConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl NetworkConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables
    ///
    /// Unparseable values are reported rather than silently ignored.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(val) = env_parse::<u16>("PEERLINK_MESSAGE_ID")? {
            config.endpoint.message_id = val;
        }

        if let Some(val) = env_parse::<usize>("PEERLINK_MAX_PACKET_SIZE")? {
            config.endpoint.max_packet_size = val;
        }

        if let Some(val) = env_parse::<u64>("PEERLINK_CLEANUP_INTERVAL_MS")? {
            config.endpoint.cleanup_interval = Duration::from_millis(val);
        }

        if let Some(val) = env_parse::<bool>("PEERLINK_LOOPBACK_FILTER")? {
            config.endpoint.loopback_filter = val;
        }

        if let Some(val) = env_parse::<u64>("PEERLINK_TASK_TIMEOUT_MS")? {
            config.tasks.default_timeout = Duration::from_millis(val);
        }

        if let Some(val) = env_parse::<usize>("PEERLINK_MAX_TASKS")? {
            config.tasks.max_tasks = val;
        }

        if let Ok(level) = std::env::var("PEERLINK_LOG_LEVEL") {
            config.logging.log_level = level
                .parse::<Level>()
                .map_err(|_| ProtocolError::ConfigError(format!("Invalid log level: {level}")))?;
        }

        Ok(config)
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.endpoint.validate());
        errors.extend(self.tasks.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| ProtocolError::ConfigError(format!("Invalid value for {name}: {raw}"))),
        Err(_) => Ok(None),
    }
}

/// Endpoint configuration
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct EndpointConfig {
    /// Transport message id used for all session traffic
    pub message_id: u16,

    /// Largest encoded packet the transport accepts, in bytes
    pub max_packet_size: usize,

    /// Interval between roster cleanups
    #[serde(with = "duration_serde")]
    pub cleanup_interval: Duration,

    /// Drop SYNs that are echoes of our own pending handshakes
    pub loopback_filter: bool,

    /// Log every packet's text at trace level
    pub trace_packets: bool,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            message_id: DEFAULT_MESSAGE_ID,
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
            loopback_filter: true,
            trace_packets: false,
        }
    }
}

impl EndpointConfig {
    /// Validate endpoint configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.max_packet_size < MIN_PACKET_SIZE {
            errors.push(format!(
                "max_packet_size too small: {} bytes (minimum: {MIN_PACKET_SIZE})",
                self.max_packet_size
            ));
        }

        if self.cleanup_interval < Duration::from_secs(1) {
            errors.push(format!(
                "cleanup_interval too short: {:?} (minimum: 1s)",
                self.cleanup_interval
            ));
        } else if self.cleanup_interval > Duration::from_secs(86_400) {
            errors.push(format!(
                "cleanup_interval too long: {:?} (maximum: 24h)",
                self.cleanup_interval
            ));
        }

        errors
    }
}

/// Deferred task queue configuration
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct TaskConfig {
    /// Retry window for tasks that do not choose their own expiry
    #[serde(with = "duration_serde")]
    pub default_timeout: Duration,

    /// Tasks the queue holds before rejecting new ones
    pub max_tasks: usize,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            default_timeout: DEFAULT_TASK_TIMEOUT,
            max_tasks: 10_000,
        }
    }
}

impl TaskConfig {
    /// Validate task queue configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.default_timeout.is_zero() {
            errors.push("default_timeout cannot be zero".to_string());
        } else if self.default_timeout > Duration::from_secs(3600) {
            errors.push(format!(
                "default_timeout too long: {:?} (maximum: 1h)",
                self.default_timeout
            ));
        }

        if self.max_tasks == 0 {
            errors.push("max_tasks must be at least 1".to_string());
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to log to console
    pub log_to_console: bool,

    /// Whether to log to file
    pub log_to_file: bool,

    /// Path to log file (if log_to_file is true)
    pub log_file_path: Option<String>,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("peerlink"),
            log_level: Level::INFO,
            log_to_console: true,
            log_to_file: false,
            log_file_path: None,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        if self.log_to_file {
            if let Some(ref path) = self.log_file_path {
                if let Some(parent) = Path::new(path).parent() {
                    if !parent.as_os_str().is_empty() && !parent.exists() {
                        errors.push(format!(
                            "Log file directory does not exist: {}",
                            parent.display()
                        ));
                    }
                }
            } else {
                errors.push("log_file_path must be specified when log_to_file is true".to_string());
            }
        }

        if !self.log_to_console && !self.log_to_file {
            errors
                .push("At least one logging output (console or file) must be enabled".to_string());
        }

        errors
    }
}

/// Helper module for Duration serialization/deserialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}
