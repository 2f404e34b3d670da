//! Configuration management for the ScreenBridge daemon.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/screenbridge/config.toml`.

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::{DetachSettings, SessionSettings, TerminalSize};

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),

    #[error("{field} must be a socket address such as 0.0.0.0:3000, got {value}")]
    InvalidAddress { field: &'static str, value: String },

    #[error("{0} must not be empty")]
    Empty(&'static str),

    #[error("default terminal size must be positive, got {cols}x{rows}")]
    InvalidTerminalSize { cols: u16, rows: u16 },

    #[error("{field} must be at most {max} ms, got {value}", max = MAX_DELAY_MS)]
    DelayTooLong { field: &'static str, value: u64 },
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Upper bound for every configurable delay.
const MAX_DELAY_MS: u64 = 10_000;

/// Main configuration structure for the ScreenBridge daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// General daemon configuration.
    pub daemon: DaemonConfig,

    /// Listener configuration.
    pub server: ServerConfig,

    /// Screen attach configuration.
    pub session: SessionConfig,

    /// Detach protocol timing and keys.
    pub detach: DetachConfig,
}

/// General daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,
}

/// Listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Address of the HTTP API and static files.
    pub http_addr: String,

    /// Address of the WebSocket bridge.
    pub ws_addr: String,

    /// Directory served for paths outside `/api`.
    pub static_dir: PathBuf,
}

/// Screen attach configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// The screen executable, looked up on PATH when not absolute.
    pub screen_binary: String,

    /// TERM value for attached sessions.
    pub term: String,

    /// Terminal width until the client resizes.
    pub default_cols: u16,

    /// Terminal height until the client resizes.
    pub default_rows: u16,
}

/// Detach protocol configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DetachConfig {
    /// Screen command prefix written by the fallback (Ctrl-A).
    pub prefix_key: String,

    /// Key written after the prefix.
    pub detach_key: String,

    pub grace_delay_ms: u64,
    pub key_delay_ms: u64,
    pub fallback_grace_delay_ms: u64,

    /// Upper bound on `screen -S <name> -X detach`; expiry falls back to keys.
    pub command_timeout_ms: u64,

    /// How long to wait for the attach process to exit after a kill.
    pub exit_wait_ms: u64,
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
            http_addr: "0.0.0.0:3000".to_string(),
            ws_addr: "0.0.0.0:3001".to_string(),
            static_dir: PathBuf::from("public"),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            screen_binary: "screen".to_string(),
            term: "xterm-256color".to_string(),
            default_cols: 80,
            default_rows: 24,
        }
    }
}

impl Default for DetachConfig {
    fn default() -> Self {
        Self {
            prefix_key: "\u{1}".to_string(),
            detach_key: "d".to_string(),
            grace_delay_ms: 100,
            key_delay_ms: 100,
            fallback_grace_delay_ms: 200,
            command_timeout_ms: 2000,
            exit_wait_ms: 2000,
        }
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("screenbridge")
        .join("config.toml")
}

impl ServerConfig {
    /// Parsed HTTP listen address.
    pub fn http_socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        parse_addr("server.http_addr", &self.http_addr)
    }

    /// Parsed WebSocket listen address.
    pub fn ws_socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        parse_addr("server.ws_addr", &self.ws_addr)
    }
}

fn parse_addr(field: &'static str, value: &str) -> Result<SocketAddr, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidAddress {
        field,
        value: value.to_string(),
    })
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - SCREENBRIDGE_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    /// - SCREENBRIDGE_HTTP_ADDR: Override the HTTP listen address
    /// - SCREENBRIDGE_WS_ADDR: Override the WebSocket listen address
    /// - SCREENBRIDGE_SCREEN_BINARY: Override the screen executable
    pub fn apply_env_overrides(&mut self) {
        let overrides: [(&str, &mut String); 4] = [
            ("SCREENBRIDGE_LOG_LEVEL", &mut self.daemon.log_level),
            ("SCREENBRIDGE_HTTP_ADDR", &mut self.server.http_addr),
            ("SCREENBRIDGE_WS_ADDR", &mut self.server.ws_addr),
            ("SCREENBRIDGE_SCREEN_BINARY", &mut self.session.screen_binary),
        ];

        for (var, field) in overrides {
            if let Ok(value) = std::env::var(var) {
                if !value.is_empty() {
                    tracing::info!("Overriding config from {}: {}", var, value);
                    *field = value;
                }
            }
        }
    }

    /// Validate the configuration values.
    ///
    /// The screen binary is not looked up here; a missing binary surfaces
    /// as a command failure on first use.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let level = self.daemon.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.daemon.log_level.clone()));
        }

        self.server.http_socket_addr()?;
        self.server.ws_socket_addr()?;

        if self.session.screen_binary.trim().is_empty() {
            return Err(ConfigError::Empty("session.screen_binary"));
        }
        if self.session.term.trim().is_empty() {
            return Err(ConfigError::Empty("session.term"));
        }
        if self.session.default_cols == 0 || self.session.default_rows == 0 {
            return Err(ConfigError::InvalidTerminalSize {
                cols: self.session.default_cols,
                rows: self.session.default_rows,
            });
        }

        if self.detach.prefix_key.is_empty() {
            return Err(ConfigError::Empty("detach.prefix_key"));
        }
        if self.detach.detach_key.is_empty() {
            return Err(ConfigError::Empty("detach.detach_key"));
        }

        let delays = [
            ("detach.grace_delay_ms", self.detach.grace_delay_ms),
            ("detach.key_delay_ms", self.detach.key_delay_ms),
            ("detach.fallback_grace_delay_ms", self.detach.fallback_grace_delay_ms),
            ("detach.command_timeout_ms", self.detach.command_timeout_ms),
            ("detach.exit_wait_ms", self.detach.exit_wait_ms),
        ];
        for (field, value) in delays {
            if value > MAX_DELAY_MS {
                return Err(ConfigError::DelayTooLong { field, value });
            }
        }

        Ok(())
    }

    /// Builds the settings shared by all connection sessions.
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            term: self.session.term.clone(),
            default_size: TerminalSize::new(self.session.default_cols, self.session.default_rows),
            detach: DetachSettings {
                prefix_key: self.detach.prefix_key.as_bytes().to_vec(),
                detach_key: self.detach.detach_key.as_bytes().to_vec(),
                grace_delay: Duration::from_millis(self.detach.grace_delay_ms),
                key_delay: Duration::from_millis(self.detach.key_delay_ms),
                fallback_grace_delay: Duration::from_millis(self.detach.fallback_grace_delay_ms),
                command_timeout: Duration::from_millis(self.detach.command_timeout_ms),
                exit_wait: Duration::from_millis(self.detach.exit_wait_ms),
            },
        }
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
        "SCREENBRIDGE_LOG_LEVEL",
        "SCREENBRIDGE_HTTP_ADDR",
        "SCREENBRIDGE_WS_ADDR",
        "SCREENBRIDGE_SCREEN_BINARY",
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
        assert_eq!(config.server.http_addr, "0.0.0.0:3000");
        assert_eq!(config.server.ws_addr, "0.0.0.0:3001");
        assert_eq!(config.server.static_dir, PathBuf::from("public"));
        assert_eq!(config.session.screen_binary, "screen");
        assert_eq!(config.session.term, "xterm-256color");
        assert_eq!((config.session.default_cols, config.session.default_rows), (80, 24));
        assert_eq!(config.detach.prefix_key, "\u{1}");
        assert_eq!(config.detach.detach_key, "d");
        assert_eq!(config.detach.command_timeout_ms, 2000);
        assert_eq!(config.detach.exit_wait_ms, 2000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_session_settings_from_defaults() {
        let settings = Config::default().session_settings();
        assert_eq!(settings, SessionSettings::default());
    }

    #[test]
    fn test_from_toml_empty() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_from_toml_partial() {
        let toml = r#"
[server]
ws_addr = "127.0.0.1:4001"

[detach]
key_delay_ms = 50
command_timeout_ms = 750
"#;
        let config = Config::from_toml(toml).unwrap();
        assert_eq!(config.server.ws_addr, "127.0.0.1:4001");
        assert_eq!(config.server.http_addr, "0.0.0.0:3000");
        assert_eq!(config.detach.key_delay_ms, 50);
        assert_eq!(config.detach.grace_delay_ms, 100);
        let detach = config.session_settings().detach;
        assert_eq!(detach.key_delay, Duration::from_millis(50));
        assert_eq!(detach.command_timeout, Duration::from_millis(750));
    }

    #[test]
    fn test_from_toml_invalid_syntax() {
        let result = Config::from_toml("[server\nhttp_addr = ");
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("Invalid TOML"));
    }

    #[test]
    fn test_from_toml_wrong_type() {
        let toml = r#"
[session]
default_cols = "wide"
"#;
        assert!(Config::from_toml(toml).is_err());
    }

    #[test]
    fn test_roundtrip_custom() {
        let mut config = Config::default();
        config.session.screen_binary = "/usr/local/bin/screen".to_string();
        config.detach.detach_key = "D".to_string();

        let toml = config.to_toml().unwrap();
        let parsed = Config::from_toml(&toml).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn test_load_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::load(temp_dir.path().join("missing.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.daemon.log_level = "debug".to_string();
        config.save(&config_path).unwrap();
        assert!(config_path.exists());

        let loaded = Config::load(&config_path).unwrap();
        assert_eq!(loaded, config);
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
        assert!(path.to_string_lossy().contains("screenbridge"));
        assert!(path.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn test_validate_log_level() {
        let mut config = Config::default();
        config.daemon.log_level = "WARN".to_string();
        assert!(config.validate().is_ok());

        config.daemon.log_level = "loud".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidLogLevel("loud".to_string()))
        );
    }

    #[test]
    fn test_validate_addresses() {
        let mut config = Config::default();
        config.server.ws_addr = "localhost".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidAddress {
                field: "server.ws_addr",
                value: "localhost".to_string(),
            })
        );
    }

    #[test]
    fn test_validate_does_not_require_screen_installed() {
        let mut config = Config::default();
        config.session.screen_binary = "/nonexistent/screen".to_string();
        assert!(config.validate().is_ok());

        config.session.screen_binary = " ".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::Empty("session.screen_binary"))
        );
    }

    #[test]
    fn test_validate_terminal_size_and_keys() {
        let mut config = Config::default();
        config.session.default_rows = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidTerminalSize { .. })
        ));

        let mut config = Config::default();
        config.detach.detach_key.clear();
        assert_eq!(config.validate(), Err(ConfigError::Empty("detach.detach_key")));
    }

    #[test]
    fn test_validate_delay_bound() {
        let mut config = Config::default();
        config.detach.exit_wait_ms = MAX_DELAY_MS + 1;
        let err = config.validate().unwrap_err();
        assert_eq!(
            err,
            ConfigError::DelayTooLong {
                field: "detach.exit_wait_ms",
                value: MAX_DELAY_MS + 1,
            }
        );
        assert!(err.to_string().contains("10000"));

        let mut config = Config::default();
        config.detach.command_timeout_ms = MAX_DELAY_MS + 1;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DelayTooLong {
                field: "detach.command_timeout_ms",
                ..
            })
        ));
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        clear_env();
        std::env::set_var("SCREENBRIDGE_LOG_LEVEL", "debug");
        std::env::set_var("SCREENBRIDGE_WS_ADDR", "127.0.0.1:9001");
        std::env::set_var("SCREENBRIDGE_SCREEN_BINARY", "/opt/screen");

        let mut config = Config::default();
        config.apply_env_overrides();

        assert_eq!(config.daemon.log_level, "debug");
        assert_eq!(config.server.ws_addr, "127.0.0.1:9001");
        assert_eq!(config.server.http_addr, "0.0.0.0:3000");
        assert_eq!(config.session.screen_binary, "/opt/screen");

        clear_env();
    }

    #[test]
    #[serial]
    fn test_env_override_empty_does_not_override() {
        clear_env();
        std::env::set_var("SCREENBRIDGE_HTTP_ADDR", "");

        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config.server.http_addr, "0.0.0.0:3000");

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
}
