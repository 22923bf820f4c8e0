//! Baton Configuration System
//!
//! TOML-based configuration with environment variable overrides. Sections:
//! `[redis]` (lease store connection), `[lease]`, `[task]` (the listener the
//! active instance runs) and `[metrics]`.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),

    #[error("Environment variable error: {0}")]
    EnvError(String),
}

/// Root application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub redis: RedisConfig,
    pub lease: LeaseConfig,
    pub task: TaskConfig,
    pub metrics: MetricsConfig,
}

/// Lease store (Redis) connection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    /// Empty means no AUTH
    pub password: String,
    pub db: i64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            password: String::new(),
            db: 0,
        }
    }
}

impl RedisConfig {
    pub fn password(&self) -> Option<&str> {
        if self.password.is_empty() {
            None
        } else {
            Some(&self.password)
        }
    }
}

/// Lease timing and identity
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaseConfig {
    /// Key shared by every replica
    pub key: String,
    pub ttl_seconds: u64,
    /// Upper bound of the random delay added to each retry backoff
    pub jitter_ms: u64,
    /// Bound on every individual store call
    pub operation_timeout_ms: u64,
    /// Generated at load time when empty
    pub instance_id: String,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            key: "bot_redis_lock".to_string(),
            ttl_seconds: 30,
            jitter_ms: 250,
            operation_timeout_ms: 5000,
            instance_id: String::new(),
        }
    }
}

impl LeaseConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }

    pub fn jitter(&self) -> Duration {
        Duration::from_millis(self.jitter_ms)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

/// The listener process started while this instance holds the lease
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
    pub command: String,
    pub args: Vec<String>,
    /// Environment variable carrying the event-stream credential. Checked at
    /// startup and inherited by the child; empty disables the check.
    pub credential_env: String,
    pub stop_timeout_seconds: u64,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            command: String::new(),
            args: Vec::new(),
            credential_env: "BOT_TOKEN".to_string(),
            stop_timeout_seconds: 10,
        }
    }
}

impl TaskConfig {
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_seconds)
    }

    /// Fail if the credential variable is configured but missing or empty.
    pub fn require_credential(&self) -> Result<(), ConfigError> {
        if self.credential_env.is_empty() {
            return Ok(());
        }
        match std::env::var(&self.credential_env) {
            Ok(value) if !value.is_empty() => Ok(()),
            _ => Err(ConfigError::EnvError(format!(
                "{} must be set to the event-stream credential",
                self.credential_env
            ))),
        }
    }
}

/// Prometheus exporter
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 9090,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration with environment variable override
    pub fn load() -> Result<Self, ConfigError> {
        ConfigLoader::new().load()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.redis.host.is_empty() {
            return Err(ConfigError::ValidationError("redis.host must not be empty".into()));
        }
        if self.lease.key.is_empty() {
            return Err(ConfigError::ValidationError("lease.key must not be empty".into()));
        }
        // Renewal runs at ttl/2, so anything shorter rounds the period to zero.
        if self.lease.ttl_seconds < 2 {
            return Err(ConfigError::ValidationError(format!(
                "lease.ttl_seconds must be at least 2, got {}",
                self.lease.ttl_seconds
            )));
        }
        if self.lease.operation_timeout_ms == 0
            || self.lease.operation_timeout() >= self.lease.ttl() / 2
        {
            return Err(ConfigError::ValidationError(format!(
                "lease.operation_timeout_ms must be between 1 and half the TTL ({} ms), got {}",
                self.lease.ttl().as_millis() / 2,
                self.lease.operation_timeout_ms
            )));
        }
        if self.task.command.is_empty() {
            return Err(ConfigError::ValidationError("task.command must not be empty".into()));
        }
        Ok(())
    }

    /// Generate an example TOML configuration
    pub fn example_toml() -> String {
        r#"# Baton Configuration
# Environment variables (BATON_*) override these settings

[redis]
host = "127.0.0.1"
port = 6379
password = ""
db = 0

[lease]
key = "bot_redis_lock"
ttl_seconds = 30
jitter_ms = 250
operation_timeout_ms = 5000
instance_id = ""  # generated when empty

[task]
command = "/usr/local/bin/listener"
args = []
credential_env = "BOT_TOKEN"
stop_timeout_seconds = 10

[metrics]
enabled = false
port = 9090
"#
        .to_string()
    }
}
