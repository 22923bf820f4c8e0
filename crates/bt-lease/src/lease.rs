//! Lease identity, timing and lifecycle state

use std::fmt;
use std::time::Duration;

use rand::Rng;
use uuid::Uuid;

/// Proof of ownership stored as the lease value.
///
/// A fresh token is generated for every acquisition attempt, so a process
/// that lost the lease can never renew the record another replica created.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OwnerToken(String);

impl OwnerToken {
    /// `<instance_id>:<uuid>`; the prefix only aids inspection of the store.
    pub fn generate(instance_id: &str) -> Self {
        Self(format!("{}:{}", instance_id, Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OwnerToken {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Lower bound of the renewal period, so a degenerate TTL still yields a
/// usable ticker.
pub(crate) const MIN_RENEWAL_PERIOD: Duration = Duration::from_millis(1);

/// Half of `ttl`, never below [`MIN_RENEWAL_PERIOD`].
pub(crate) fn renewal_period_for(ttl: Duration) -> Duration {
    (ttl / 2).max(MIN_RENEWAL_PERIOD)
}

/// Lease parameters shared by acquisition, renewal and backoff
#[derive(Debug, Clone)]
pub struct LeaseSettings {
    /// Key every replica competes for
    pub key: String,

    /// Expiry set on acquisition and on every renewal
    pub ttl: Duration,

    /// Upper bound of the random delay added to the retry backoff
    pub jitter: Duration,

    /// How long the active task gets to wind down after cancellation
    pub task_stop_timeout: Duration,

    /// Prefix for generated owner tokens
    pub instance_id: String,
}

impl Default for LeaseSettings {
    fn default() -> Self {
        Self {
            key: "bot_redis_lock".to_string(),
            ttl: Duration::from_secs(30),
            jitter: Duration::from_millis(250),
            task_stop_timeout: Duration::from_secs(10),
            instance_id: Uuid::new_v4().to_string(),
        }
    }
}

impl LeaseSettings {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Default::default()
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_task_stop_timeout(mut self, timeout: Duration) -> Self {
        self.task_stop_timeout = timeout;
        self
    }

    pub fn with_instance_id(mut self, id: impl Into<String>) -> Self {
        self.instance_id = id.into();
        self
    }

    /// Renewal tick period: half the TTL, so one missed tick still leaves
    /// time for another attempt before expiry.
    pub fn renewal_period(&self) -> Duration {
        renewal_period_for(self.ttl)
    }

    /// Delay before the next acquisition attempt.
    pub fn backoff(&self) -> Duration {
        let base = self.renewal_period();
        let max_jitter = self.jitter.as_millis() as u64;
        if max_jitter == 0 {
            return base;
        }
        base + Duration::from_millis(rand::rng().random_range(0..=max_jitter))
    }

    pub fn new_token(&self) -> OwnerToken {
        OwnerToken::generate(&self.instance_id)
    }
}

/// Instance-local lifecycle of the lease manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Not holding; waiting for the next attempt
    Idle,
    /// Acquisition call in flight
    Acquiring,
    /// Lease held, renewal loop and active task running
    Holding,
    /// Giving the lease up
    Releasing,
    /// `run` has returned
    Stopped,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Acquiring => "acquiring",
            Self::Holding => "holding",
            Self::Releasing => "releasing",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
