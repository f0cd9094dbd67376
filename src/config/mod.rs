//! Configuration management for movies-api
//!
//! This module handles loading, parsing, and validating application configuration
//! from YAML files and environment variables.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::auth::{AuthConfig, RateLimitConfig};
use crate::logging::LogFormat;

/// Prefix of every environment variable read by `Config::from_env`
pub const ENV_PREFIX: &str = "MOVIES_API_";

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Request rate limiter configuration
    #[serde(default)]
    pub limiter: LimiterConfig,

    /// Token lifetimes
    #[serde(default)]
    pub tokens: TokensConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::FileRead(format!("Failed to read config file: {}", e)))?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        // First, expand environment variables in the YAML string
        let expanded = expand_env_vars(yaml);
        serde_yaml::from_str(&expanded)
            .map_err(|e| ConfigError::Parse(format!("Failed to parse YAML: {}", e)))
    }

    /// Load configuration from environment variables with prefix MOVIES_API_
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        // Server config from env
        if let Some(host) = env_value::<String>("SERVER_HOST")? {
            config.server.host = host;
        }
        if let Some(port) = env_value("SERVER_PORT")? {
            config.server.port = port;
        }
        if let Some(environment) = env_value("SERVER_ENVIRONMENT")? {
            config.server.environment = environment;
        }
        if let Some(grace) = env_value("SERVER_SHUTDOWN_GRACE_SECS")? {
            config.server.shutdown_grace_secs = grace;
        }

        // Database config from env
        if let Some(path) = env_value::<String>("DATABASE_PATH")? {
            config.database.path = path;
        }
        if let Some(timeout) = env_value("DATABASE_QUERY_TIMEOUT_SECS")? {
            config.database.query_timeout_secs = timeout;
        }

        // Limiter config from env
        if let Some(enabled) = env_value("LIMITER_ENABLED")? {
            config.limiter.enabled = enabled;
        }
        if let Some(rps) = env_value("LIMITER_RPS")? {
            config.limiter.rps = rps;
        }
        if let Some(burst) = env_value("LIMITER_BURST")? {
            config.limiter.burst = burst;
        }
        if let Some(idle) = env_value("LIMITER_IDLE_TIMEOUT_SECS")? {
            config.limiter.idle_timeout_secs = idle;
        }
        if let Some(interval) = env_value("LIMITER_SWEEP_INTERVAL_SECS")? {
            config.limiter.sweep_interval_secs = interval;
        }
        if let Some(trust) = env_value("LIMITER_TRUST_PROXY_HEADERS")? {
            config.limiter.trust_proxy_headers = trust;
        }

        // Token lifetimes from env
        if let Some(ttl) = env_value("TOKENS_ACTIVATION_TTL_SECS")? {
            config.tokens.activation_ttl_secs = ttl;
        }
        if let Some(ttl) = env_value("TOKENS_AUTHENTICATION_TTL_SECS")? {
            config.tokens.authentication_ttl_secs = ttl;
        }

        // Logging config from env
        if let Some(level) = env_value::<String>("LOGGING_LEVEL")? {
            config.logging.level = level;
        }
        if let Some(format) = env_value("LOGGING_FORMAT")? {
            config.logging.format = format;
        }

        Ok(config)
    }

    /// Reject values the server cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.limiter.rps.is_finite() && self.limiter.rps > 0.0) {
            return Err(ConfigError::InvalidValue(
                "limiter.rps must be greater than zero".to_string(),
            ));
        }
        if self.limiter.burst == 0 {
            return Err(ConfigError::InvalidValue(
                "limiter.burst must be at least 1".to_string(),
            ));
        }

        let non_zero = [
            ("limiter.idle_timeout_secs", self.limiter.idle_timeout_secs),
            ("limiter.sweep_interval_secs", self.limiter.sweep_interval_secs),
            ("database.query_timeout_secs", self.database.query_timeout_secs),
            ("tokens.activation_ttl_secs", self.tokens.activation_ttl_secs),
            (
                "tokens.authentication_ttl_secs",
                self.tokens.authentication_ttl_secs,
            ),
        ];
        for (name, value) in non_zero {
            if value == 0 {
                return Err(ConfigError::InvalidValue(format!(
                    "{} must be greater than zero",
                    name
                )));
            }
        }

        Ok(())
    }
}

/// Deployment environment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Staging => "staging",
            Environment::Production => "production",
        }
    }

    /// Whether internal error detail may be returned to callers
    pub fn is_development(&self) -> bool {
        matches!(self, Environment::Development)
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "development" => Ok(Environment::Development),
            "staging" => Ok(Environment::Staging),
            "production" => Ok(Environment::Production),
            other => Err(format!(
                "Unknown environment: {} (expected development|staging|production)",
                other
            )),
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// Host address to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Deployment environment
    #[serde(default)]
    pub environment: Environment,

    /// How long in-flight requests and background work may run after a
    /// shutdown signal
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            environment: Environment::default(),
            shutdown_grace_secs: default_shutdown_grace(),
        }
    }
}

impl ServerConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    4000
}

fn default_shutdown_grace() -> u64 {
    30
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatabaseConfig {
    /// Path to SQLite database file
    #[serde(default = "default_db_path")]
    pub path: String,

    /// Deadline for a single store call
    #[serde(default = "default_query_timeout")]
    pub query_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            query_timeout_secs: default_query_timeout(),
        }
    }
}

impl DatabaseConfig {
    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }
}

fn default_db_path() -> String {
    "movies.db".to_string()
}

fn default_query_timeout() -> u64 {
    3
}

/// Request rate limiter configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LimiterConfig {
    /// Whether admission control is applied
    #[serde(default = "default_limiter_enabled")]
    pub enabled: bool,

    /// Refill rate in requests per second
    #[serde(default = "default_rps")]
    pub rps: f64,

    /// Bucket capacity
    #[serde(default = "default_burst")]
    pub burst: u32,

    /// Idle time after which a client's state is evicted
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// How often idle clients are swept
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Key clients by X-Forwarded-For / X-Real-IP instead of the peer address
    #[serde(default)]
    pub trust_proxy_headers: bool,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            enabled: default_limiter_enabled(),
            rps: default_rps(),
            burst: default_burst(),
            idle_timeout_secs: default_idle_timeout(),
            sweep_interval_secs: default_sweep_interval(),
            trust_proxy_headers: false,
        }
    }
}

impl LimiterConfig {
    pub fn to_rate_limit_config(&self) -> RateLimitConfig {
        RateLimitConfig {
            enabled: self.enabled,
            rps: self.rps,
            burst: self.burst,
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
            sweep_interval: Duration::from_secs(self.sweep_interval_secs),
        }
    }
}

fn default_limiter_enabled() -> bool {
    true
}

fn default_rps() -> f64 {
    2.0
}

fn default_burst() -> u32 {
    4
}

fn default_idle_timeout() -> u64 {
    180
}

fn default_sweep_interval() -> u64 {
    60
}

/// Token lifetimes
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokensConfig {
    #[serde(default = "default_activation_ttl")]
    pub activation_ttl_secs: u64,

    #[serde(default = "default_authentication_ttl")]
    pub authentication_ttl_secs: u64,
}

impl Default for TokensConfig {
    fn default() -> Self {
        Self {
            activation_ttl_secs: default_activation_ttl(),
            authentication_ttl_secs: default_authentication_ttl(),
        }
    }
}

impl TokensConfig {
    pub fn to_auth_config(&self) -> AuthConfig {
        AuthConfig {
            activation_ttl: Duration::from_secs(self.activation_ttl_secs),
            authentication_ttl: Duration::from_secs(self.authentication_ttl_secs),
        }
    }
}

fn default_activation_ttl() -> u64 {
    3 * 24 * 60 * 60 // 3 days
}

fn default_authentication_ttl() -> u64 {
    24 * 60 * 60 // 24 hours
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (json, pretty)
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Configuration error types
#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum ConfigError {
    /// Error reading configuration file
    #[error("Failed to read configuration file: {0}")]
    FileRead(String),

    /// Error parsing configuration
    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    /// Invalid configuration value
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Read and parse `MOVIES_API_<name>`; unset or empty is `None`
fn env_value<T: FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    let key = format!("{}{}", ENV_PREFIX, name);

    match std::env::var(&key) {
        Ok(raw) if !raw.is_empty() => raw
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Parse(format!("Invalid value for {}: {}", key, raw))),
        _ => Ok(None),
    }
}

static ENV_VAR_RX: Lazy<regex_lite::Regex> = Lazy::new(|| {
    regex_lite::Regex::new(r"\$\{([^}]+)\}")
        .expect("Invalid regex pattern for environment variable expansion")
});

/// Expand environment variables in a string
///
/// Supports `${VAR_NAME}` syntax
fn expand_env_vars(input: &str) -> String {
    ENV_VAR_RX
        .replace_all(input, |caps: &regex_lite::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| caps[0].to_string())
        })
        .into_owned()
}
