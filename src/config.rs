//! # Configuration Management
//!
//! Centralized configuration for channels, sessions and logging.
//!
//! ## Configuration Sources
//! - TOML files via [`ProtocolConfig::from_file`]
//! - TOML strings via [`ProtocolConfig::from_toml`]
//! - Environment variable overrides via [`ProtocolConfig::from_env`]
//! - Direct instantiation with defaults
//!
//! Durations are written as integer milliseconds, log levels as lowercase
//! strings:
//!
//! ```toml
//! [channel]
//! min_message_length = 11
//! max_message_length = 16777216
//! close_grace_period = 500
//! event_capacity = 64
//!
//! [session]
//! handshake_timeout = 5000
//! request_timeout = 30000
//! event_capacity = 256
//! ```

use crate::error::{ProtocolError, Result};
use crate::protocol::envelope::ENVELOPE_HEADER_LEN;
use crate::utils::timeout;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Smallest legal frame payload: a bare envelope header with an empty body.
pub const DEFAULT_MIN_MESSAGE_LENGTH: usize = ENVELOPE_HEADER_LEN;

/// Largest frame payload accepted by default (16 MB).
pub const DEFAULT_MAX_MESSAGE_LENGTH: usize = 16 * 1024 * 1024;

/// Hard ceiling for `max_message_length`; the length header is a `u32`.
pub const MAX_MESSAGE_LENGTH_LIMIT: usize = u32::MAX as usize;

/// Top-level configuration for a session endpoint
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ProtocolConfig {
    /// Channel framing and lifecycle settings
    #[serde(default)]
    pub channel: ChannelConfig,

    /// Session orchestration settings
    #[serde(default)]
    pub session: SessionConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ProtocolConfig {
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

    /// Start from defaults and apply `SESSION_PROTOCOL_*` environment overrides.
    ///
    /// Unparseable values are reported rather than silently ignored.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(val) = env_parse::<usize>("SESSION_PROTOCOL_MAX_MESSAGE_LENGTH")? {
            config.channel.max_message_length = val;
        }
        if let Some(val) = env_parse::<usize>("SESSION_PROTOCOL_MIN_MESSAGE_LENGTH")? {
            config.channel.min_message_length = val;
        }
        if let Some(val) = env_parse::<u64>("SESSION_PROTOCOL_HANDSHAKE_TIMEOUT_MS")? {
            config.session.handshake_timeout = Duration::from_millis(val);
        }
        if let Some(val) = env_parse::<u64>("SESSION_PROTOCOL_REQUEST_TIMEOUT_MS")? {
            config.session.request_timeout = Duration::from_millis(val);
        }
        if let Ok(level) = std::env::var("SESSION_PROTOCOL_LOG_LEVEL") {
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
        errors.extend(self.channel.validate());
        errors.extend(self.session.validate());
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

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| ProtocolError::ConfigError(format!("Invalid value for {key}: '{raw}'"))),
        Err(_) => Ok(None),
    }
}

/// Channel framing and lifecycle settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChannelConfig {
    /// Smallest frame payload accepted, in bytes
    pub min_message_length: usize,

    /// Largest frame payload accepted, in bytes
    pub max_message_length: usize,

    /// How long `close()` waits for an in-flight receive before cancelling it
    #[serde(with = "duration_serde")]
    pub close_grace_period: Duration,

    /// Buffer size of the channel event broadcast
    pub event_capacity: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            min_message_length: DEFAULT_MIN_MESSAGE_LENGTH,
            max_message_length: DEFAULT_MAX_MESSAGE_LENGTH,
            close_grace_period: timeout::CLOSE_GRACE_PERIOD,
            event_capacity: 64,
        }
    }
}

impl ChannelConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.min_message_length < ENVELOPE_HEADER_LEN {
            errors.push(format!(
                "Min message length {} is below the envelope header size ({ENVELOPE_HEADER_LEN})",
                self.min_message_length
            ));
        }

        if self.max_message_length < self.min_message_length {
            errors.push(format!(
                "Max message length {} is smaller than min message length {}",
                self.max_message_length, self.min_message_length
            ));
        } else if self.max_message_length > MAX_MESSAGE_LENGTH_LIMIT {
            errors.push(format!(
                "Max message length too large: {} bytes (limit: {MAX_MESSAGE_LENGTH_LIMIT})",
                self.max_message_length
            ));
        }

        if self.close_grace_period.as_secs() > 60 {
            errors.push("Close grace period too long (maximum: 60s)".to_string());
        }

        if self.event_capacity == 0 {
            errors.push("Channel event capacity must be greater than 0".to_string());
        }

        errors
    }
}

/// Session orchestration settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionConfig {
    /// Upper bound for the whole handshake exchange
    #[serde(with = "duration_serde")]
    pub handshake_timeout: Duration,

    /// How long an outbound request waits for its response
    #[serde(with = "duration_serde")]
    pub request_timeout: Duration,

    /// Buffer size of the session event broadcast
    pub event_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: timeout::HANDSHAKE_TIMEOUT,
            request_timeout: timeout::REQUEST_TIMEOUT,
            event_capacity: 256,
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.handshake_timeout.as_millis() < 10 {
            errors.push("Handshake timeout too short (minimum: 10ms)".to_string());
        } else if self.handshake_timeout.as_secs() > 300 {
            errors.push("Handshake timeout too long (maximum: 300s)".to_string());
        }

        if self.request_timeout.as_millis() < 10 {
            errors.push("Request timeout too short (minimum: 10ms)".to_string());
        } else if self.request_timeout.as_secs() > 3600 {
            errors.push("Request timeout too long (maximum: 1 hour)".to_string());
        }

        if self.event_capacity == 0 {
            errors.push("Session event capacity must be greater than 0".to_string());
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
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
            app_name: String::from("session-protocol"),
            log_level: Level::INFO,
            log_to_console: true,
            log_to_file: false,
            log_file_path: None,
            json_format: false,
        }
    }
}

impl LoggingConfig {
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

/// Duration as integer milliseconds
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

/// tracing::Level as a lowercase string
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
