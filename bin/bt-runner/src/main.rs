//! Baton Runner
//!
//! Starts the configured listener on exactly one replica at a time. Every
//! replica runs this binary; the one holding the Redis lease runs the
//! listener, the others stand by and take over when it dies or loses the
//! lease.
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `BATON_CONFIG` | - | Path to a TOML config file |
//! | `BATON_REDIS_HOST` | `127.0.0.1` | Lease store host |
//! | `BATON_REDIS_PORT` | `6379` | Lease store port |
//! | `BATON_REDIS_PASSWORD` | - | Lease store password |
//! | `BATON_REDIS_DB` | `0` | Lease store database index |
//! | `BATON_LEASE_KEY` | `bot_redis_lock` | Lease key shared by all replicas |
//! | `BATON_LEASE_TTL_SECONDS` | `30` | Lease TTL; renewal and retry run at half of it |
//! | `BATON_TASK_COMMAND` | - | Listener executable (required) |
//! | `BATON_TASK_ARGS` | - | Whitespace-separated listener arguments |
//! | `BOT_TOKEN` | - | Event-stream credential, passed to the listener |
//! | `BATON_METRICS_ENABLED` | `false` | Expose Prometheus metrics |
//! | `BATON_METRICS_PORT` | `9090` | Metrics port |
//! | `RUST_LOG` | `info` | Log level |

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio_util::sync::CancellationToken;
use tracing::info;

use bt_config::AppConfig;
use bt_lease::{CommandTask, LeaseManager, LeaseSettings, RedisLeaseStore, RedisStoreConfig};

fn store_config(config: &AppConfig) -> RedisStoreConfig {
    RedisStoreConfig::new(config.redis.host.clone(), config.redis.port)
        .with_password(config.redis.password().map(str::to_string))
        .with_db(config.redis.db)
        .with_operation_timeout(config.lease.operation_timeout())
}

/// Connect to the lease store, giving up early if shutdown arrives first.
///
/// `Ok(None)` means shutdown won the race; a failed first PING is an error.
async fn connect_store(
    config: &RedisStoreConfig,
    shutdown: &CancellationToken,
) -> bt_lease::Result<Option<RedisLeaseStore>> {
    tokio::select! {
        biased;
        _ = shutdown.cancelled() => Ok(None),
        result = RedisLeaseStore::connect(config) => result.map(Some),
    }
}

fn lease_settings(config: &AppConfig) -> LeaseSettings {
    LeaseSettings::new(config.lease.key.clone())
        .with_ttl(config.lease.ttl())
        .with_jitter(config.lease.jitter())
        .with_task_stop_timeout(config.task.stop_timeout())
        .with_instance_id(config.lease.instance_id.clone())
}

#[tokio::main]
async fn main() -> Result<()> {
    bt_common::logging::init_logging("bt-runner");

    info!("Starting Baton Runner");

    // Installed first so a signal during startup still exits cleanly.
    let shutdown = bt_common::cancel_on_shutdown_signal(CancellationToken::new());

    let config = AppConfig::load().context("failed to load configuration")?;
    config
        .task
        .require_credential()
        .context("event-stream credential missing")?;
    info!(
        instance_id = %config.lease.instance_id,
        lease_key = %config.lease.key,
        ttl_seconds = config.lease.ttl_seconds,
        command = %config.task.command,
        "Configuration loaded"
    );

    if config.metrics.enabled {
        let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics.port));
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("failed to start metrics exporter")?;
        info!("Metrics exporter listening on http://{}/metrics", addr);
    }

    // Without a reachable lease store there is nothing to coordinate through.
    let Some(store) = connect_store(&store_config(&config), &shutdown)
        .await
        .context("lease store is not available")?
    else {
        info!("Shutdown requested during startup");
        return Ok(());
    };

    let task = CommandTask::new(config.task.command.clone(), config.task.args.clone());
    let manager = LeaseManager::new(Arc::new(store), Arc::new(task), lease_settings(&config));

    manager.run(shutdown).await;

    info!("Baton Runner shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config() -> AppConfig {
        let mut config = AppConfig::default();
        config.redis.host = "redis.internal".to_string();
        config.redis.password = "secret".to_string();
        config.redis.db = 2;
        config.lease.ttl_seconds = 10;
        config.lease.jitter_ms = 0;
        config.lease.instance_id = "replica-a".to_string();
        config.task.command = "/bin/listener".to_string();
        config
    }

    #[test]
    fn test_store_config_mapping() {
        let store = store_config(&config());
        assert_eq!(store.host, "redis.internal");
        assert_eq!(store.port, 6379);
        assert_eq!(store.password.as_deref(), Some("secret"));
        assert_eq!(store.db, 2);
        assert_eq!(store.operation_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_lease_settings_mapping() {
        let settings = lease_settings(&config());
        assert_eq!(settings.key, "bot_redis_lock");
        assert_eq!(settings.ttl, Duration::from_secs(10));
        assert_eq!(settings.backoff(), Duration::from_secs(5));
        assert_eq!(settings.instance_id, "replica-a");
        assert_eq!(settings.task_stop_timeout, Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_shutdown_during_connect_is_not_an_error() {
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let unreachable = RedisStoreConfig::new("127.0.0.1", 1);
        let store = connect_store(&unreachable, &shutdown).await.unwrap();
        assert!(store.is_none());
    }

    #[tokio::test]
    async fn test_unreachable_store_is_fatal() {
        let unreachable = RedisStoreConfig::new("127.0.0.1", 1)
            .with_operation_timeout(Duration::from_millis(500));
        let result = connect_store(&unreachable, &CancellationToken::new()).await;
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_password_means_no_auth() {
        let mut config = config();
        config.redis.password.clear();
        assert!(store_config(&config).password.is_none());
    }
}
