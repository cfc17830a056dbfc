//! Server configuration loading from file and environment variables.

use courier_relay::RetryPolicy;
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use thiserror::Error;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server network settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Agent backend endpoint.
    #[serde(default)]
    pub agent: AgentConfig,

    /// Knowledge index endpoint.
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Invocation retry budget.
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "courier_relay=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// URL the invocation request is POSTed to.
    #[serde(default = "default_agent_url")]
    pub url: String,

    /// Upper bound on one streamed response, connect to last byte.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetrievalConfig {
    /// URL the retrieval query is POSTed to.
    #[serde(default = "default_retrieval_url")]
    pub url: String,

    /// Passages requested per prompt.
    #[serde(default = "default_number_of_results")]
    pub number_of_results: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Total invocation attempts, the first call included.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Wait before the first retry, doubled for each later one.
    #[serde(default = "default_base_delay_secs")]
    pub base_delay_secs: u64,
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_secs(self.base_delay_secs),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    3000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_agent_url() -> String {
    "http://127.0.0.1:8080/agent/invoke".to_string()
}

fn default_request_timeout_secs() -> u64 {
    300
}

fn default_retrieval_url() -> String {
    "http://127.0.0.1:8080/knowledge/retrieve".to_string()
}

fn default_number_of_results() -> u32 {
    15
}

fn default_max_attempts() -> u32 {
    courier_relay::retry::DEFAULT_MAX_ATTEMPTS
}

fn default_base_delay_secs() -> u64 {
    courier_relay::retry::DEFAULT_BASE_DELAY.as_secs()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            url: default_agent_url(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            url: default_retrieval_url(),
            number_of_results: default_number_of_results(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_secs: default_base_delay_secs(),
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `COURIER_HOST` overrides `server.host`
/// - `COURIER_PORT` overrides `server.port`
/// - `COURIER_LOG_LEVEL` overrides `logging.level`
/// - `COURIER_LOG_JSON` overrides `logging.json` (set to "true" to enable)
/// - `COURIER_AGENT_URL` overrides `agent.url`
/// - `COURIER_RETRIEVAL_URL` overrides `retrieval.url`
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

/// Applies `COURIER_*` overrides read through `lookup`. Unparseable values
/// are ignored.
pub fn apply_env_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(parsed) = lookup("COURIER_HOST").and_then(|v| v.parse().ok()) {
        config.server.host = parsed;
    }
    if let Some(parsed) = lookup("COURIER_PORT").and_then(|v| v.parse().ok()) {
        config.server.port = parsed;
    }
    if let Some(level) = lookup("COURIER_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = lookup("COURIER_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
    if let Some(url) = lookup("COURIER_AGENT_URL") {
        config.agent.url = url;
    }
    if let Some(url) = lookup("COURIER_RETRIEVAL_URL") {
        config.retrieval.url = url;
    }
}
