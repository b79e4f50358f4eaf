//! Configuration management for the Log Listener Proxy daemon.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/log-listener-proxy/config.toml`.
//! Values from the file can be overridden by `LOG_LISTENER_*` environment
//! variables, which in turn are overridden by command-line flags.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::{ChannelSettings, RegistrySettings};

/// Prefix shared by every environment override.
pub const ENV_PREFIX: &str = "LOG_LISTENER_";

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("ttl_secs must be greater than 0")]
    InvalidTtl,

    #[error("reader_queue_capacity must be greater than 0")]
    InvalidQueueCapacity,

    #[error("host must not be empty")]
    EmptyHost,

    #[error("port_manager url must start with http:// or https://, got {0}")]
    InvalidPortManagerUrl(String),

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure for the proxy daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// General daemon configuration.
    pub daemon: DaemonConfig,

    /// Listen address.
    pub server: ServerConfig,

    /// Session lifetime and relay tuning.
    pub session: SessionConfig,

    /// External port allocation.
    pub port_manager: PortManagerConfig,
}

/// General daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Interface to bind.
    pub host: String,

    /// Port to bind when the port manager is disabled (0 picks a free port).
    pub port: u16,
}

/// Session and channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Lifetime of a session in seconds, from creation.
    pub ttl_secs: u64,

    /// Seconds a drained channel keeps its readers.
    pub linger_secs: u64,

    /// Messages buffered per reader before it is dropped.
    pub reader_queue_capacity: usize,

    /// Let readers wait on a channel whose writer has not connected yet.
    pub readers_wait_for_writer: bool,
}

/// Port manager side-service configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PortManagerConfig {
    /// Ask the port manager for the listen port instead of using `server.port`.
    pub enabled: bool,

    /// Base URL of the port manager.
    pub url: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8160,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 3600, // 1 hour
            linger_secs: 5,
            reader_queue_capacity: 1024,
            readers_wait_for_writer: true,
        }
    }
}

impl Default for PortManagerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: "http://portmanager.airflow-fs.svc/manage".to_string(),
        }
    }
}

impl SessionConfig {
    /// Registry settings derived from this section.
    pub fn registry_settings(&self) -> RegistrySettings {
        RegistrySettings {
            ttl: Duration::from_secs(self.ttl_secs),
            channel: ChannelSettings {
                linger: Duration::from_secs(self.linger_secs),
                reader_queue_capacity: self.reader_queue_capacity,
                readers_wait_for_writer: self.readers_wait_for_writer,
            },
        }
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("log-listener-proxy")
        .join("config.toml")
}

/// Reads `LOG_LISTENER_{name}`, treating an empty value as unset.
fn env_value(name: &str) -> Option<String> {
    std::env::var(format!("{ENV_PREFIX}{name}"))
        .ok()
        .filter(|v| !v.is_empty())
}

/// Parses an override, keeping the current value when it does not parse.
fn parse_override<T: FromStr>(name: &str, raw: &str) -> Option<T> {
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Ignoring unparsable {}{}={:?}", ENV_PREFIX, name, raw);
            None
        }
    }
}

/// Accepts the boolean spellings commonly found in deployment manifests.
fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - LOG_LISTENER_HOST: Override listen address
    /// - LOG_LISTENER_PORT: Override listen port
    /// - LOG_LISTENER_TTL: Override session TTL in seconds
    /// - LOG_LISTENER_USE_PORT_MANAGER: Enable or disable the port manager
    /// - LOG_LISTENER_PORT_MANAGER_URL: Override the port manager URL
    /// - LOG_LISTENER_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    pub fn apply_env_overrides(&mut self) {
        if let Some(host) = env_value("HOST") {
            tracing::info!("Overriding host from environment: {}", host);
            self.server.host = host;
        }

        if let Some(raw) = env_value("PORT") {
            if let Some(port) = parse_override::<u16>("PORT", &raw) {
                tracing::info!("Overriding port from environment: {}", port);
                self.server.port = port;
            }
        }

        if let Some(raw) = env_value("TTL") {
            if let Some(ttl) = parse_override::<u64>("TTL", &raw) {
                tracing::info!("Overriding ttl_secs from environment: {}", ttl);
                self.session.ttl_secs = ttl;
            }
        }

        if let Some(raw) = env_value("USE_PORT_MANAGER") {
            match parse_bool(&raw) {
                Some(enabled) => {
                    tracing::info!("Overriding port_manager.enabled from environment: {}", enabled);
                    self.port_manager.enabled = enabled;
                }
                None => tracing::warn!(
                    "Ignoring unparsable {}USE_PORT_MANAGER={:?}",
                    ENV_PREFIX,
                    raw
                ),
            }
        }

        if let Some(url) = env_value("PORT_MANAGER_URL") {
            tracing::info!("Overriding port_manager.url from environment: {}", url);
            self.port_manager.url = url;
        }

        if let Some(level) = env_value("LOG_LEVEL") {
            tracing::info!("Overriding log_level from environment: {}", level);
            self.daemon.log_level = level;
        }
    }

    /// Validate the configuration values.
    ///
    /// Returns an error if any configuration value is outside the valid range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session.ttl_secs == 0 {
            return Err(ConfigError::InvalidTtl);
        }

        if self.session.reader_queue_capacity == 0 {
            return Err(ConfigError::InvalidQueueCapacity);
        }

        if self.server.host.trim().is_empty() {
            return Err(ConfigError::EmptyHost);
        }

        let url = &self.port_manager.url;
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ConfigError::InvalidPortManagerUrl(url.clone()));
        }

        let level = self.daemon.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.daemon.log_level.clone()));
        }

        Ok(())
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    /// If the file exists but is invalid TOML, returns an error with
    /// a helpful message.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Save configuration to a file.
    ///
    /// Creates parent directories if they don't exist.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    const ENV_VARS: &[&str] = &[
        "LOG_LISTENER_HOST",
        "LOG_LISTENER_PORT",
        "LOG_LISTENER_TTL",
        "LOG_LISTENER_USE_PORT_MANAGER",
        "LOG_LISTENER_PORT_MANAGER_URL",
        "LOG_LISTENER_LOG_LEVEL",
    ];

    fn clear_env() {
        for var in ENV_VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.daemon.log_level, "info");
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8160);
        assert_eq!(config.session.ttl_secs, 3600);
        assert_eq!(config.session.linger_secs, 5);
        assert_eq!(config.session.reader_queue_capacity, 1024);
        assert!(config.session.readers_wait_for_writer);
        assert!(!config.port_manager.enabled);
        assert_eq!(
            config.port_manager.url,
            "http://portmanager.airflow-fs.svc/manage"
        );
    }

    #[test]
    fn test_registry_settings() {
        let mut config = Config::default();
        config.session.ttl_secs = 10;
        config.session.linger_secs = 2;
        config.session.reader_queue_capacity = 8;
        config.session.readers_wait_for_writer = false;

        let settings = config.session.registry_settings();
        assert_eq!(settings.ttl, Duration::from_secs(10));
        assert_eq!(settings.channel.linger, Duration::from_secs(2));
        assert_eq!(settings.channel.reader_queue_capacity, 8);
        assert!(!settings.channel.readers_wait_for_writer);
    }

    #[test]
    fn test_from_toml_empty() {
        // Empty TOML should use all defaults
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_from_toml_partial() {
        let toml = r#"
[server]
port = 9000

[session]
ttl_secs = 60
"#;
        let config = Config::from_toml(toml).unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.session.ttl_secs, 60);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.session.linger_secs, 5);
    }

    #[test]
    fn test_from_toml_full() {
        let toml = r#"
[daemon]
log_level = "trace"

[server]
host = "127.0.0.1"
port = 18160

[session]
ttl_secs = 120
linger_secs = 1
reader_queue_capacity = 16
readers_wait_for_writer = false

[port_manager]
enabled = true
url = "http://ports.local/manage/"
"#;
        let config = Config::from_toml(toml).unwrap();

        assert_eq!(config.daemon.log_level, "trace");
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 18160);
        assert_eq!(config.session.ttl_secs, 120);
        assert_eq!(config.session.linger_secs, 1);
        assert_eq!(config.session.reader_queue_capacity, 16);
        assert!(!config.session.readers_wait_for_writer);
        assert!(config.port_manager.enabled);
        assert_eq!(config.port_manager.url, "http://ports.local/manage/");
    }

    #[test]
    fn test_from_toml_invalid_syntax() {
        let toml = r#"
[server
port = 1
"#;
        let err = Config::from_toml(toml).unwrap_err().to_string();
        assert!(err.contains("Invalid TOML"));
    }

    #[test]
    fn test_from_toml_wrong_type() {
        let toml = r#"
[server]
port = "not a number"
"#;
        assert!(Config::from_toml(toml).is_err());
    }

    #[test]
    fn test_port_out_of_range() {
        let toml = r#"
[server]
port = 70000
"#;
        assert!(Config::from_toml(toml).is_err());
    }

    #[test]
    fn test_to_toml_and_back() {
        let mut original = Config::default();
        original.session.ttl_secs = 42;
        original.port_manager.enabled = true;

        let toml = original.to_toml().unwrap();
        assert!(toml.contains("[server]"));
        assert!(toml.contains("[port_manager]"));

        let loaded = Config::from_toml(&toml).unwrap();
        assert_eq!(original, loaded);
    }

    #[test]
    fn test_load_missing_file() {
        let config = Config::load("/nonexistent/path/config.toml").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested").join("config.toml");

        let mut original = Config::default();
        original.daemon.log_level = "debug".to_string();
        original.server.port = 0;

        original.save(&config_path).unwrap();
        assert!(config_path.exists());
        let loaded = Config::load(&config_path).unwrap();

        assert_eq!(original, loaded);
    }

    #[test]
    fn test_load_invalid_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        fs::write(&config_path, "invalid [ toml").unwrap();

        let err = Config::load(&config_path).unwrap_err().to_string();
        assert!(err.contains("Failed to parse config file"));
    }

    #[test]
    fn test_default_config_path() {
        let path = default_config_path();
        assert!(path.to_string_lossy().contains("log-listener-proxy"));
        assert!(path.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        clear_env();
        std::env::set_var("LOG_LISTENER_HOST", "127.0.0.1");
        std::env::set_var("LOG_LISTENER_PORT", "9999");
        std::env::set_var("LOG_LISTENER_TTL", "30");
        std::env::set_var("LOG_LISTENER_USE_PORT_MANAGER", "true");
        std::env::set_var("LOG_LISTENER_PORT_MANAGER_URL", "http://pm.test/manage");
        std::env::set_var("LOG_LISTENER_LOG_LEVEL", "debug");

        let mut config = Config::default();
        config.apply_env_overrides();

        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 9999);
        assert_eq!(config.session.ttl_secs, 30);
        assert!(config.port_manager.enabled);
        assert_eq!(config.port_manager.url, "http://pm.test/manage");
        assert_eq!(config.daemon.log_level, "debug");

        clear_env();
    }

    #[test]
    #[serial]
    fn test_env_override_empty_does_not_override() {
        clear_env();
        std::env::set_var("LOG_LISTENER_HOST", "");
        std::env::set_var("LOG_LISTENER_LOG_LEVEL", "");

        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config, Config::default());

        clear_env();
    }

    #[test]
    #[serial]
    fn test_env_override_unparsable_is_ignored() {
        clear_env();
        std::env::set_var("LOG_LISTENER_PORT", "eighty");
        std::env::set_var("LOG_LISTENER_TTL", "-1");
        std::env::set_var("LOG_LISTENER_USE_PORT_MANAGER", "maybe");

        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config, Config::default());

        clear_env();
    }

    #[test]
    #[serial]
    fn test_env_override_unset_does_not_override() {
        clear_env();
        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_parse_bool_spellings() {
        for yes in ["1", "true", "TRUE", "yes", "on"] {
            assert_eq!(parse_bool(yes), Some(true));
        }
        for no in ["0", "false", "False", "no", "off"] {
            assert_eq!(parse_bool(no), Some(false));
        }
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn test_validate_default_config() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_validate_zero_ttl() {
        let mut config = Config::default();
        config.session.ttl_secs = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidTtl));
    }

    #[test]
    fn test_validate_zero_capacity() {
        let mut config = Config::default();
        config.session.reader_queue_capacity = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidQueueCapacity));
    }

    #[test]
    fn test_validate_empty_host() {
        let mut config = Config::default();
        config.server.host = "  ".to_string();
        assert_eq!(config.validate(), Err(ConfigError::EmptyHost));
    }

    #[test]
    fn test_validate_port_manager_url() {
        let mut config = Config::default();
        config.port_manager.url = "ftp://ports".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidPortManagerUrl("ftp://ports".to_string()))
        );

        config.port_manager.url = "https://ports/manage".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_log_level() {
        let mut config = Config::default();
        config.daemon.log_level = "verbose".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidLogLevel("verbose".to_string()))
        );

        config.daemon.log_level = "WARN".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_allows_zero_linger() {
        let mut config = Config::default();
        config.session.linger_secs = 0;
        assert!(config.validate().is_ok());
    }
}
