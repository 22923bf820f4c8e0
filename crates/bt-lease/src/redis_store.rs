//! Redis-backed lease store
//!
//! - `SET key token NX PX ttl` for acquisition
//! - Lua scripts for owner-verified extend and delete, so the comparison and
//!   the write happen in one server-side step
//! - Every call bounded by an operation timeout, so a partitioned connection
//!   surfaces as an error instead of stalling the renewal loop

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::IntoConnectionInfo;
use tracing::{debug, info};

use crate::error::{LeaseError, Result};
use crate::lease::OwnerToken;
use crate::store::LeaseStore;

const EXTEND_SCRIPT: &str = r#"
    if redis.call("GET", KEYS[1]) == ARGV[1] then
        return redis.call("PEXPIRE", KEYS[1], ARGV[2])
    else
        return 0
    end
"#;

const RELEASE_SCRIPT: &str = r#"
    if redis.call("GET", KEYS[1]) == ARGV[1] then
        return redis.call("DEL", KEYS[1])
    else
        return 0
    end
"#;

/// Connection parameters for the lease store
#[derive(Debug, Clone)]
pub struct RedisStoreConfig {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub db: i64,
    pub operation_timeout: Duration,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            password: None,
            db: 0,
            operation_timeout: Duration::from_secs(5),
        }
    }
}

impl RedisStoreConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    pub fn with_password(mut self, password: Option<String>) -> Self {
        self.password = password;
        self
    }

    pub fn with_db(mut self, db: i64) -> Self {
        self.db = db;
        self
    }

    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    fn connection_info(&self) -> Result<redis::ConnectionInfo> {
        let mut info = (self.host.as_str(), self.port)
            .into_connection_info()
            .map_err(|e| LeaseError::Connection(e.to_string()))?;
        info.redis.db = self.db;
        info.redis.password = self.password.clone();
        Ok(info)
    }
}

pub struct RedisLeaseStore {
    conn: ConnectionManager,
    operation_timeout: Duration,
    extend_script: redis::Script,
    release_script: redis::Script,
}

impl RedisLeaseStore {
    /// Open the connection and verify it with a PING.
    ///
    /// Any failure here is returned to the caller: without a reachable store
    /// there is nothing to coordinate through.
    pub async fn connect(config: &RedisStoreConfig) -> Result<Self> {
        let client = redis::Client::open(config.connection_info()?)
            .map_err(|e| LeaseError::Connection(e.to_string()))?;

        let conn = match tokio::time::timeout(
            config.operation_timeout,
            ConnectionManager::new(client),
        )
        .await
        {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => return Err(LeaseError::Connection(e.to_string())),
            Err(_) => {
                return Err(LeaseError::Timeout {
                    op: "connect",
                    timeout: config.operation_timeout,
                })
            }
        };

        let store = Self {
            conn,
            operation_timeout: config.operation_timeout,
            extend_script: redis::Script::new(EXTEND_SCRIPT),
            release_script: redis::Script::new(RELEASE_SCRIPT),
        };

        store.ping().await?;
        info!(host = %config.host, port = config.port, db = config.db, "Connected to lease store");

        Ok(store)
    }

    async fn bounded<T, F>(&self, op: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match tokio::time::timeout(self.operation_timeout, fut).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(LeaseError::Timeout {
                op,
                timeout: self.operation_timeout,
            }),
        }
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    // PX 0 is rejected by Redis
    (ttl.as_millis() as u64).max(1)
}

#[async_trait]
impl LeaseStore for RedisLeaseStore {
    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let pong: String = self
            .bounded("ping", redis::cmd("PING").query_async(&mut conn))
            .await?;
        debug!(reply = %pong, "Lease store ping");
        Ok(())
    }

    async fn try_acquire(&self, key: &str, token: &OwnerToken, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key)
            .arg(token.as_str())
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl));

        let result: Option<String> = self.bounded("acquire", cmd.query_async(&mut conn)).await?;
        Ok(result.is_some())
    }

    async fn extend_if_owner(&self, key: &str, token: &OwnerToken, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        let mut invocation = self.extend_script.key(key);
        invocation.arg(token.as_str()).arg(ttl_millis(ttl));

        let result: i64 = self.bounded("extend", invocation.invoke_async(&mut conn)).await?;
        Ok(result == 1)
    }

    async fn release_if_owner(&self, key: &str, token: &OwnerToken) -> Result<bool> {
        let mut conn = self.conn.clone();
        let mut invocation = self.release_script.key(key);
        invocation.arg(token.as_str());

        let result: i64 = self.bounded("release", invocation.invoke_async(&mut conn)).await?;
        Ok(result == 1)
    }

    async fn current_owner(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("GET");
        cmd.arg(key);
        self.bounded("read", cmd.query_async(&mut conn)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = RedisStoreConfig::new("redis.internal", 6380)
            .with_password(Some("secret".to_string()))
            .with_db(3)
            .with_operation_timeout(Duration::from_millis(500));

        let info = config.connection_info().unwrap();
        assert_eq!(info.redis.db, 3);
        assert_eq!(info.redis.password.as_deref(), Some("secret"));
        assert_eq!(config.operation_timeout, Duration::from_millis(500));
    }

    #[test]
    fn test_ttl_millis_never_zero() {
        assert_eq!(ttl_millis(Duration::ZERO), 1);
        assert_eq!(ttl_millis(Duration::from_secs(30)), 30_000);
    }

    #[tokio::test]
    async fn test_connect_to_unreachable_store_fails() {
        // Nothing listens on port 1; startup must surface an error, not hang or panic.
        let config = RedisStoreConfig::new("127.0.0.1", 1)
            .with_operation_timeout(Duration::from_millis(500));
        assert!(RedisLeaseStore::connect(&config).await.is_err());
    }
}
