//! Configuration loader with file and environment variable support

use crate::{AppConfig, ConfigError};
use std::env;
use std::path::PathBuf;
use tracing::info;

/// Standard config file search paths
const CONFIG_PATHS: &[&str] = &[
    "baton.toml",
    "config.toml",
    "./config/baton.toml",
    "/etc/baton/config.toml",
];

/// Configuration loader
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Create a loader with a specific config file path
    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            config_path: Some(path.into()),
        }
    }

    /// Load from file (if found), apply environment overrides, fill in the
    /// instance id and validate.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        self.load_with(|key| env::var(key).ok())
    }

    /// Same as [`load`](Self::load) with an explicit variable lookup.
    pub fn load_with<F>(&self, lookup: F) -> Result<AppConfig, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = AppConfig::default();

        if let Some(path) = self.find_config_file(&lookup) {
            info!(?path, "Loading configuration from file");
            config = AppConfig::from_file(&path)?;
        }

        apply_overrides(&mut config, &lookup)?;

        if config.lease.instance_id.is_empty() {
            config.lease.instance_id = uuid::Uuid::new_v4().to_string();
        }

        config.validate()?;
        Ok(config)
    }

    fn find_config_file<F>(&self, lookup: &F) -> Option<PathBuf>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = &self.config_path {
            if path.exists() {
                return Some(path.clone());
            }
        }

        if let Some(path) = lookup("BATON_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        CONFIG_PATHS
            .iter()
            .map(PathBuf::from)
            .find(|path| path.exists())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::EnvError(format!("{key} has an invalid value: {value:?}")))
}

fn apply_overrides<F>(config: &mut AppConfig, lookup: &F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    // Redis
    if let Some(val) = lookup("BATON_REDIS_HOST") {
        config.redis.host = val;
    }
    if let Some(val) = lookup("BATON_REDIS_PORT") {
        config.redis.port = parse_var("BATON_REDIS_PORT", &val)?;
    }
    if let Some(val) = lookup("BATON_REDIS_PASSWORD") {
        config.redis.password = val;
    }
    if let Some(val) = lookup("BATON_REDIS_DB") {
        config.redis.db = parse_var("BATON_REDIS_DB", &val)?;
    }

    // Lease
    if let Some(val) = lookup("BATON_LEASE_KEY") {
        config.lease.key = val;
    }
    if let Some(val) = lookup("BATON_LEASE_TTL_SECONDS") {
        config.lease.ttl_seconds = parse_var("BATON_LEASE_TTL_SECONDS", &val)?;
    }
    if let Some(val) = lookup("BATON_LEASE_JITTER_MS") {
        config.lease.jitter_ms = parse_var("BATON_LEASE_JITTER_MS", &val)?;
    }
    if let Some(val) = lookup("BATON_LEASE_OPERATION_TIMEOUT_MS") {
        config.lease.operation_timeout_ms = parse_var("BATON_LEASE_OPERATION_TIMEOUT_MS", &val)?;
    }
    if let Some(val) = lookup("BATON_INSTANCE_ID") {
        config.lease.instance_id = val;
    }

    // Task
    if let Some(val) = lookup("BATON_TASK_COMMAND") {
        config.task.command = val;
    }
    if let Some(val) = lookup("BATON_TASK_ARGS") {
        config.task.args = val.split_whitespace().map(str::to_string).collect();
    }
    if let Some(val) = lookup("BATON_TASK_CREDENTIAL_ENV") {
        config.task.credential_env = val;
    }
    if let Some(val) = lookup("BATON_TASK_STOP_TIMEOUT_SECONDS") {
        config.task.stop_timeout_seconds = parse_var("BATON_TASK_STOP_TIMEOUT_SECONDS", &val)?;
    }

    // Metrics
    if let Some(val) = lookup("BATON_METRICS_ENABLED") {
        config.metrics.enabled = parse_var("BATON_METRICS_ENABLED", &val)?;
    }
    if let Some(val) = lookup("BATON_METRICS_PORT") {
        config.metrics.port = parse_var("BATON_METRICS_PORT", &val)?;
    }

    Ok(())
}
