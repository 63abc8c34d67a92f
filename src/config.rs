//! Configuration management for xenapi.
//!
//! Configuration is loaded with the following priority (highest to lowest):
//! 1. Environment variables
//! 2. Configuration file (JSON)
//! 3. Default values

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::proxy::DEFAULT_RETRY_ATTEMPTS;
use crate::transport::{HttpOptions, HttpProxy};

/// Client configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where and how to connect.
    pub connection: ConnectionSection,
    /// Session behavior.
    pub session: SessionSection,
    /// Logging configuration.
    pub logging: LoggingSection,
}

/// Connection configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSection {
    /// Management API URL (`http://` or `https://`).
    pub url: String,
    /// HTTP proxy host.
    pub proxy_host: Option<String>,
    /// HTTP proxy port.
    pub proxy_port: Option<u16>,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    /// Verify server certificates on https.
    pub verify_tls: bool,
}

impl Default for ConnectionSection {
    fn default() -> Self {
        Self {
            url: "http://localhost/".to_string(),
            proxy_host: None,
            proxy_port: None,
            timeout_secs: 60,
            verify_tls: true,
        }
    }
}

/// Session configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    /// Attempts per call when the session keeps expiring.
    pub retry_attempts: u32,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
        }
    }
}

/// Logging configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Log level (error, warn, info, debug, trace) or a full filter.
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Apply environment variable overrides.
    pub fn apply_env(&mut self) {
        self.apply_vars(|name| std::env::var(name).ok());
    }

    fn apply_vars(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(url) = var("XENAPI_URL") {
            self.connection.url = url;
        }

        if let Some(host) = var("XENAPI_PROXY_HOST") {
            self.connection.proxy_host = (!host.is_empty()).then_some(host);
        }

        if let Some(port) = var("XENAPI_PROXY_PORT").and_then(|p| p.parse().ok()) {
            self.connection.proxy_port = Some(port);
        }

        if let Some(secs) = var("XENAPI_TIMEOUT_SECS").and_then(|s| s.parse().ok()) {
            self.connection.timeout_secs = secs;
        }

        if let Some(verify) = var("XENAPI_VERIFY_TLS") {
            self.connection.verify_tls = !matches!(verify.as_str(), "0" | "false" | "no");
        }

        if let Some(level) = var("XENAPI_LOG_LEVEL").or_else(|| var("RUST_LOG")) {
            self.logging.level = level;
        }
    }

    /// Load configuration with full priority chain.
    ///
    /// Priority: env vars > config file > defaults
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        };

        config.apply_env();
        Ok(config)
    }

    /// Proxy to reach the server through, if one is configured.
    pub fn proxy(&self) -> Option<HttpProxy> {
        self.connection
            .proxy_host
            .as_ref()
            .map(|host| HttpProxy::new(host.clone(), self.connection.proxy_port))
    }

    /// Options for the HTTP transport.
    pub fn http_options(&self) -> HttpOptions {
        HttpOptions {
            proxy: self.proxy(),
            timeout: Duration::from_secs(self.connection.timeout_secs),
            verify_tls: self.connection.verify_tls,
        }
    }

    /// Get the log level filter string.
    pub fn log_filter(&self) -> &str {
        &self.logging.level
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// IO error reading config file.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    /// JSON parsing error.
    #[error("failed to parse config file: {0}")]
    Json(#[from] serde_json::Error),
}
