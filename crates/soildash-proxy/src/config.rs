//! Proxy configuration.
//!
//! Values come from three layers, later ones winning: a TOML file,
//! environment variables, then command-line flags.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Proxy configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Listener settings.
    pub server: ServerConfig,
    /// The device being relayed.
    pub device: DeviceConfig,
    /// Authentication and rate limiting.
    pub security: SecurityConfig,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Save configuration to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Write {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Apply the proxy's environment variables on top of this configuration.
    ///
    /// `var` looks a variable up by name; pass `|name| std::env::var(name).ok()`
    /// for the process environment. Recognized variables are `DEVICE_IP`,
    /// `DEVICE_PORT`, `PROXY_PORT`, `ENABLE_AUTH`, `AUTH_USER`,
    /// `AUTH_PASSWORD`, `RATE_LIMIT_WINDOW` (milliseconds) and `RATE_LIMIT_MAX`.
    pub fn apply_env<F>(&mut self, var: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(ip) = var("DEVICE_IP") {
            self.device.ip = ip;
        }
        if let Some(port) = var("DEVICE_PORT") {
            self.device.port = parse_env("DEVICE_PORT", &port)?;
        }
        if let Some(port) = var("PROXY_PORT") {
            self.server.port = parse_env("PROXY_PORT", &port)?;
        }
        if let Some(enabled) = var("ENABLE_AUTH") {
            // Only the literal "true" turns auth on.
            self.security.auth_enabled = enabled == "true";
        }
        if let Some(user) = var("AUTH_USER") {
            self.security.auth_user = user;
        }
        if let Some(password) = var("AUTH_PASSWORD") {
            self.security.auth_password = password;
        }
        if let Some(window) = var("RATE_LIMIT_WINDOW") {
            self.security.rate_limit_window_ms = parse_env("RATE_LIMIT_WINDOW", &window)?;
        }
        if let Some(max) = var("RATE_LIMIT_MAX") {
            self.security.rate_limit_max = parse_env("RATE_LIMIT_MAX", &max)?;
        }
        Ok(())
    }

    /// Validate the configuration and return any errors.
    ///
    /// # Example
    ///
    /// ```
    /// use soildash_proxy::Config;
    ///
    /// let config = Config::default();
    /// config.validate().expect("Default config should be valid");
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        errors.extend(self.server.validate());
        errors.extend(self.device.validate());
        errors.extend(self.security.validate());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Load and validate configuration from a file.
    pub fn load_validated<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }
}

fn parse_env<T>(name: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Env {
        name,
        value: value.to_string(),
        message: e.to_string(),
    })
}

/// Listener configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Interface to bind.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

impl ServerConfig {
    /// `host:port` string for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if self.host.is_empty() {
            errors.push(ValidationError::new("server.host", "host cannot be empty"));
        }
        if self.port == 0 {
            errors.push(ValidationError::new("server.port", "port cannot be 0"));
        }
        errors
    }
}

/// Where the device lives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Device IP address or host name.
    pub ip: String,
    /// Device HTTP port.
    pub port: u16,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            ip: "192.168.4.1".to_string(),
            port: 80,
            timeout_secs: 5,
        }
    }
}

impl DeviceConfig {
    /// `ip:port` as reported by `/health`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }

    /// Base URL of the device.
    pub fn base_url(&self) -> String {
        format!("http://{}", self.address())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if self.ip.is_empty() {
            errors.push(ValidationError::new("device.ip", "device IP cannot be empty"));
        }
        if self.port == 0 {
            errors.push(ValidationError::new("device.port", "port cannot be 0"));
        }
        if self.timeout_secs == 0 {
            errors.push(ValidationError::new(
                "device.timeout_secs",
                "timeout must be at least 1 second",
            ));
        }
        errors
    }
}

/// Basic auth and per-client rate limiting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Require HTTP basic auth on every route.
    pub auth_enabled: bool,
    pub auth_user: String,
    pub auth_password: String,
    /// Rate limit window in milliseconds.
    pub rate_limit_window_ms: u64,
    /// Requests allowed per client per window.
    pub rate_limit_max: u32,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            auth_enabled: false,
            auth_user: "admin".to_string(),
            auth_password: "password".to_string(),
            rate_limit_window_ms: 60_000,
            rate_limit_max: 100,
        }
    }
}

impl SecurityConfig {
    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_millis(self.rate_limit_window_ms)
    }

    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if self.auth_enabled && self.auth_user.is_empty() {
            errors.push(ValidationError::new(
                "security.auth_user",
                "user cannot be empty when auth is enabled",
            ));
        }
        if self.auth_enabled && self.auth_password.is_empty() {
            errors.push(ValidationError::new(
                "security.auth_password",
                "password cannot be empty when auth is enabled",
            ));
        }
        if self.rate_limit_window_ms == 0 {
            errors.push(ValidationError::new(
                "security.rate_limit_window_ms",
                "window cannot be 0",
            ));
        }
        if self.rate_limit_max == 0 {
            errors.push(ValidationError::new(
                "security.rate_limit_max",
                "limit must allow at least one request",
            ));
        }
        errors
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid value '{value}' for {name}: {message}")]
    Env {
        name: &'static str,
        value: String,
        message: String,
    },
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation error with context.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    /// The field path (e.g., `device.port`).
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: &str) -> Self {
        Self {
            field: field.to_string(),
            message: message.to_string(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("soildash")
        .join("proxy.toml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.server.bind_addr(), "0.0.0.0:3000");
        assert_eq!(config.device.address(), "192.168.4.1:80");
        assert!(!config.security.auth_enabled);
        assert_eq!(config.security.rate_limit_max, 100);
        assert_eq!(config.security.rate_limit_window(), Duration::from_secs(60));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let toml = r#"
            [device]
            ip = "10.0.0.42"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.device.ip, "10.0.0.42");
        assert_eq!(config.device.port, 80);
        assert_eq!(config.server.port, 3000);
    }

    #[test]
    fn test_config_save_and_load() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("nested").join("proxy.toml");

        let mut config = Config::default();
        config.server.port = 8081;
        config.security.auth_enabled = true;
        config.save(&path).unwrap();

        let loaded = Config::load_validated(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_missing_file() {
        let err = Config::load("/nonexistent/soildash/proxy.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_load_invalid_toml() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("proxy.toml");
        std::fs::write(&path, "[device\nip = ").unwrap();
        assert!(matches!(Config::load(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_env(env(&[
                ("DEVICE_IP", "10.1.1.5"),
                ("DEVICE_PORT", "8080"),
                ("PROXY_PORT", "4000"),
                ("ENABLE_AUTH", "true"),
                ("AUTH_USER", "grower"),
                ("AUTH_PASSWORD", "s3cret"),
                ("RATE_LIMIT_WINDOW", "1000"),
                ("RATE_LIMIT_MAX", "5"),
            ]))
            .unwrap();

        assert_eq!(config.device.address(), "10.1.1.5:8080");
        assert_eq!(config.server.port, 4000);
        assert!(config.security.auth_enabled);
        assert_eq!(config.security.auth_user, "grower");
        assert_eq!(config.security.auth_password, "s3cret");
        assert_eq!(config.security.rate_limit_window(), Duration::from_secs(1));
        assert_eq!(config.security.rate_limit_max, 5);
    }

    #[test]
    fn test_enable_auth_requires_literal_true() {
        let mut config = Config::default();
        config.apply_env(env(&[("ENABLE_AUTH", "yes")])).unwrap();
        assert!(!config.security.auth_enabled);
    }

    #[test]
    fn test_env_parse_error() {
        let mut config = Config::default();
        let err = config
            .apply_env(env(&[("DEVICE_PORT", "eighty")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Env { name: "DEVICE_PORT", .. }));
        assert!(err.to_string().contains("eighty"));
    }

    #[test]
    fn test_validation_collects_errors() {
        let mut config = Config::default();
        config.device.ip = String::new();
        config.server.port = 0;
        config.security.rate_limit_max = 0;

        let Err(ConfigError::Validation(errors)) = config.validate() else {
            panic!("expected validation errors");
        };
        assert_eq!(errors.len(), 3);
        assert!(errors.iter().any(|e| e.field == "device.ip"));
    }

    #[test]
    fn test_auth_requires_credentials() {
        let mut config = Config::default();
        config.security.auth_enabled = true;
        config.security.auth_password = String::new();
        assert!(config.validate().is_err());
    }
}
