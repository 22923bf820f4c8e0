//! Lease renewal loop
//!
//! Ticks every `ttl / 2` while the lease is held. The first failed renewal
//! (ownership mismatch or backend error) cancels the hold token, which stops
//! the active task, and ends the loop with [`RenewalOutcome::Lost`]. A hold
//! token cancelled from outside ends the loop with
//! [`RenewalOutcome::Stopped`] and no loss is reported.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::Result;
use crate::lease::{renewal_period_for, OwnerToken};
use crate::lease_metrics;
use crate::store::LeaseStore;

/// Why a held lease was lost
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LossReason {
    /// The stored owner token no longer matches ours
    OwnershipLost,
    /// The store could not be reached or returned an error
    BackendError(String),
}

impl LossReason {
    pub fn as_label(&self) -> &'static str {
        match self {
            Self::OwnershipLost => "ownership",
            Self::BackendError(_) => "backend_error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenewalOutcome {
    Lost(LossReason),
    Stopped,
}

/// One owner-verified extend, with metrics.
pub(crate) async fn renew_once(
    store: &dyn LeaseStore,
    key: &str,
    token: &OwnerToken,
    ttl: Duration,
) -> Result<bool> {
    match store.extend_if_owner(key, token, ttl).await {
        Ok(true) => {
            lease_metrics::record_renewed(key);
            Ok(true)
        }
        Ok(false) => Ok(false),
        Err(e) => {
            lease_metrics::record_backend_error(key, "extend");
            Err(e)
        }
    }
}

pub(crate) struct RenewalLoop {
    store: Arc<dyn LeaseStore>,
    key: String,
    token: OwnerToken,
    ttl: Duration,
}

impl RenewalLoop {
    pub(crate) fn new(store: Arc<dyn LeaseStore>, key: String, token: OwnerToken, ttl: Duration) -> Self {
        Self { store, key, token, ttl }
    }

    pub(crate) async fn run(self, hold: CancellationToken) -> RenewalOutcome {
        let period = renewal_period_for(self.ttl);
        // First renewal one period after acquisition, not immediately.
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = hold.cancelled() => {
                    debug!(lease_key = %self.key, "Renewal loop stopped");
                    return RenewalOutcome::Stopped;
                }
                _ = ticker.tick() => {}
            }

            let reason = match renew_once(&*self.store, &self.key, &self.token, self.ttl).await {
                Ok(true) => {
                    debug!(lease_key = %self.key, owner = %self.token, "Lease renewed");
                    continue;
                }
                Ok(false) => {
                    warn!(
                        lease_key = %self.key,
                        owner = %self.token,
                        "Lease renewal refused, another instance owns the lease"
                    );
                    LossReason::OwnershipLost
                }
                Err(e) => {
                    warn!(lease_key = %self.key, owner = %self.token, error = %e, "Lease renewal failed");
                    LossReason::BackendError(e.to_string())
                }
            };

            // Stop the active task before anyone else can act on the stream.
            hold.cancel();
            return RenewalOutcome::Lost(reason);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryLeaseStore, StoreOpKind};

    const KEY: &str = "lease";

    async fn held_lease(store: &InMemoryLeaseStore, ttl: Duration) -> OwnerToken {
        let token = OwnerToken::from("owner");
        assert!(store.try_acquire(KEY, &token, ttl).await.unwrap());
        token
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_without_loss_when_cancelled() {
        let store = Arc::new(InMemoryLeaseStore::new());
        let ttl = Duration::from_secs(2);
        let token = held_lease(&store, ttl).await;
        let hold = CancellationToken::new();

        let handle = tokio::spawn(
            RenewalLoop::new(store.clone(), KEY.to_string(), token, ttl).run(hold.clone()),
        );

        tokio::time::sleep(Duration::from_millis(2500)).await;
        hold.cancel();

        assert_eq!(handle.await.unwrap(), RenewalOutcome::Stopped);
        // Ticks at 1s and 2s
        assert_eq!(store.operations_of(StoreOpKind::Extend).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ownership_mismatch_cancels_hold() {
        let store = Arc::new(InMemoryLeaseStore::new());
        let ttl = Duration::from_secs(2);
        let token = held_lease(&store, ttl).await;
        let hold = CancellationToken::new();

        store.overwrite(KEY, "intruder", ttl);
        let outcome = RenewalLoop::new(store.clone(), KEY.to_string(), token, ttl)
            .run(hold.clone())
            .await;

        assert_eq!(outcome, RenewalOutcome::Lost(LossReason::OwnershipLost));
        assert!(hold.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_backend_error_is_a_loss() {
        let store = Arc::new(InMemoryLeaseStore::new());
        let ttl = Duration::from_secs(2);
        let token = held_lease(&store, ttl).await;
        let hold = CancellationToken::new();

        store.set_unreachable(true);
        let outcome = RenewalLoop::new(store.clone(), KEY.to_string(), token, ttl)
            .run(hold.clone())
            .await;

        assert!(matches!(outcome, RenewalOutcome::Lost(LossReason::BackendError(_))));
        assert!(hold.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_degenerate_ttl_reports_ownership_not_a_panic() {
        let store = Arc::new(InMemoryLeaseStore::new());
        let ttl = Duration::from_nanos(1);
        let token = held_lease(&store, ttl).await;
        let hold = CancellationToken::new();

        let outcome = RenewalLoop::new(store.clone(), KEY.to_string(), token, ttl)
            .run(hold.clone())
            .await;

        // The 1ns lease is long gone by the first 1ms tick.
        assert_eq!(outcome, RenewalOutcome::Lost(LossReason::OwnershipLost));
        assert!(hold.is_cancelled());
    }

    #[test]
    fn test_loss_labels() {
        assert_eq!(LossReason::OwnershipLost.as_label(), "ownership");
        assert_eq!(LossReason::BackendError("x".into()).as_label(), "backend_error");
    }
}
