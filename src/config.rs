//! Configuration management for session-mux.
//!
//! Configuration is loaded with the following priority (highest to lowest):
//! 1. Command-line arguments
//! 2. Environment variables
//! 3. Configuration file (JSON)
//! 4. Default values

use std::fmt;
use std::net::IpAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::api::{ServerConfig, DEFAULT_ENDPOINT};
use crate::cli::Args;
use crate::lifecycle::DEFAULT_NOTIFICATION_BUFFER;

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration.
    pub server: ServerSection,
    /// Session lifecycle configuration.
    pub sessions: SessionsSection,
    /// Logging configuration.
    pub logging: LoggingSection,
}

/// How clients reach the server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// Many sessions over the HTTP endpoint.
    #[default]
    Http,
    /// One session over stdin/stdout.
    Stdio,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http => write!(f, "http"),
            Self::Stdio => write!(f, "stdio"),
        }
    }
}

impl FromStr for Transport {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(Self::Http),
            "stdio" => Ok(Self::Stdio),
            other => Err(ConfigError::InvalidTransport(other.to_string())),
        }
    }
}

/// Server configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// Host address to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Path of the session endpoint.
    pub endpoint: String,
    /// Enable graceful shutdown.
    pub graceful_shutdown: bool,
    /// Transport to serve.
    pub transport: Transport,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5004,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            graceful_shutdown: true,
            transport: Transport::Http,
        }
    }
}

/// Session lifecycle section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsSection {
    /// Terminate sessions idle for this many seconds. Unset: never.
    pub idle_timeout_secs: Option<u64>,
    /// Seconds between idle sweeps.
    pub reap_interval_secs: u64,
    /// Notifications buffered per session before slow streams lag.
    pub notification_buffer: usize,
}

impl Default for SessionsSection {
    fn default() -> Self {
        Self {
            idle_timeout_secs: None,
            reap_interval_secs: 30,
            notification_buffer: DEFAULT_NOTIFICATION_BUFFER,
        }
    }
}

/// Logging configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Log level (error, warn, info, debug, trace).
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
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_vars(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary variable source.
    fn apply_vars<F>(&mut self, var: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = var("SESSION_MUX_HOST") {
            self.server.host = host;
        }

        if let Some(port) = var("SESSION_MUX_PORT") {
            self.server.port = port
                .parse()
                .map_err(|_| ConfigError::InvalidValue("SESSION_MUX_PORT", port))?;
        }

        if let Some(endpoint) = var("SESSION_MUX_ENDPOINT") {
            self.server.endpoint = endpoint;
        }

        if let Some(transport) = var("SESSION_MUX_TRANSPORT") {
            self.server.transport = transport.parse()?;
        }

        if let Some(timeout) = var("SESSION_MUX_IDLE_TIMEOUT") {
            self.sessions.idle_timeout_secs = Some(
                timeout
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue("SESSION_MUX_IDLE_TIMEOUT", timeout))?,
            );
        }

        if let Some(level) = var("SESSION_MUX_LOG_LEVEL").or_else(|| var("RUST_LOG")) {
            self.logging.level = level;
        }

        Ok(())
    }

    /// Apply CLI argument overrides.
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(host) = args.host {
            self.server.host = host.to_string();
        }

        if let Some(port) = args.port {
            self.server.port = port;
        }

        if let Some(ref endpoint) = args.endpoint {
            self.server.endpoint = endpoint.clone();
        }

        if args.stdio {
            self.server.transport = Transport::Stdio;
        }

        if let Some(timeout) = args.idle_timeout {
            self.sessions.idle_timeout_secs = Some(timeout);
        }

        if let Some(ref level) = args.log_level {
            self.logging.level = level.clone();
        }
    }

    /// Load configuration with full priority chain.
    ///
    /// Priority: CLI args > env vars > config file > defaults
    pub fn load(args: &Args) -> Result<Self, ConfigError> {
        let mut config = match args.config {
            Some(ref path) => Config::from_file(path)?,
            None => Config::default(),
        };

        config.apply_env()?;
        config.apply_args(args);

        Ok(config)
    }

    /// Convert to ServerConfig for the HTTP server.
    pub fn to_server_config(&self) -> Result<ServerConfig, ConfigError> {
        let host: IpAddr = self
            .server
            .host
            .parse()
            .map_err(|_| ConfigError::InvalidHost(self.server.host.clone()))?;

        let endpoint = &self.server.endpoint;
        if !is_static_endpoint(endpoint) {
            return Err(ConfigError::InvalidEndpoint(endpoint.clone()));
        }

        if self.sessions.reap_interval_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "sessions.reap_interval_secs",
                "0".to_string(),
            ));
        }

        let mut server_config = ServerConfig::new(host.to_string(), self.server.port)
            .with_endpoint(endpoint.clone());
        server_config.reap_interval = Duration::from_secs(self.sessions.reap_interval_secs);
        server_config.notification_buffer = self.sessions.notification_buffer;

        if let Some(secs) = self.sessions.idle_timeout_secs {
            server_config = server_config.with_idle_timeout(Duration::from_secs(secs));
        }

        if !self.server.graceful_shutdown {
            server_config = server_config.without_graceful_shutdown();
        }

        Ok(server_config)
    }

    /// Get the log level filter string.
    pub fn log_filter(&self) -> &str {
        &self.logging.level
    }
}

/// A literal route path: rooted, no empty segments, no route parameters or
/// wildcards, and not shadowing `/health`.
fn is_static_endpoint(endpoint: &str) -> bool {
    if endpoint == "/" {
        return true;
    }

    let Some(path) = endpoint.strip_prefix('/') else {
        return false;
    };

    endpoint != "/health"
        && !path.contains([':', '*', '{', '}'])
        && path.split('/').all(|segment| !segment.is_empty())
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid host address: {0}")]
    InvalidHost(String),

    #[error("invalid endpoint path: {0} (must be a literal path starting with '/', other than /health)")]
    InvalidEndpoint(String),

    #[error("invalid transport: {0} (expected http or stdio)")]
    InvalidTransport(String),

    #[error("invalid value for {0}: '{1}'")]
    InvalidValue(&'static str, String),
}
