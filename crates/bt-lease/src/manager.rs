//! Lease manager
//!
//! Drives one replica through acquire → hold → retry:
//! - `SET NX` style acquisition with a fresh owner token per attempt
//! - while holding, a renewal task and the active task run side by side
//!   under a per-hold cancellation token
//! - loss of the lease cancels the active task and falls back to a fixed
//!   `ttl / 2` backoff (plus jitter) before the next attempt
//! - shutdown stops both tasks, then releases the lease once

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::lease::{LeaseSettings, OwnerToken, RunState};
use crate::lease_metrics;
use crate::renewal::{self, LossReason, RenewalLoop, RenewalOutcome};
use crate::store::LeaseStore;
use crate::task::ActiveTask;

/// How a hold ended
#[derive(Debug, Clone, PartialEq, Eq)]
enum HoldOutcome {
    /// Renewal failed; the lease is no longer ours
    Lost(LossReason),
    /// Shutdown requested while holding
    Shutdown,
    /// The active task returned on its own while the lease was still held
    TaskEnded,
}

pub struct LeaseManager {
    store: Arc<dyn LeaseStore>,
    task: Arc<dyn ActiveTask>,
    settings: LeaseSettings,
    state_tx: watch::Sender<RunState>,
}

impl LeaseManager {
    pub fn new(store: Arc<dyn LeaseStore>, task: Arc<dyn ActiveTask>, settings: LeaseSettings) -> Self {
        let (state_tx, _) = watch::channel(RunState::Idle);
        Self {
            store,
            task,
            settings,
            state_tx,
        }
    }

    pub fn settings(&self) -> &LeaseSettings {
        &self.settings
    }

    /// Current lifecycle state
    pub fn state(&self) -> RunState {
        *self.state_tx.borrow()
    }

    /// Subscribe to lifecycle state changes
    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.state_tx.subscribe()
    }

    fn set_state(&self, state: RunState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!(lease_key = %self.settings.key, from = %previous, to = %state, "Lease state changed");
        }
    }

    /// Try to take the lease with a freshly generated owner token.
    ///
    /// `Ok(None)` means another instance holds it; that is the normal state
    /// of a standby replica, not an error.
    pub async fn acquire(&self) -> Result<Option<OwnerToken>> {
        let token = self.settings.new_token();
        match self
            .store
            .try_acquire(&self.settings.key, &token, self.settings.ttl)
            .await
        {
            Ok(true) => {
                lease_metrics::record_acquired(&self.settings.key);
                Ok(Some(token))
            }
            Ok(false) => {
                lease_metrics::record_standby(&self.settings.key);
                Ok(None)
            }
            Err(e) => {
                lease_metrics::record_backend_error(&self.settings.key, "acquire");
                Err(e)
            }
        }
    }

    /// Extend the lease if `token` still owns it. `Ok(false)` means it does not.
    pub async fn renew_once(&self, token: &OwnerToken) -> Result<bool> {
        renewal::renew_once(&*self.store, &self.settings.key, token, self.settings.ttl).await
    }

    /// Delete the lease if `token` still owns it.
    ///
    /// Returns `Ok(false)` when the lease had already expired or moved to
    /// another owner, so calling it twice is harmless.
    pub async fn release(&self, token: &OwnerToken) -> Result<bool> {
        match self.store.release_if_owner(&self.settings.key, token).await {
            Ok(deleted) => {
                lease_metrics::record_released(&self.settings.key, deleted);
                Ok(deleted)
            }
            Err(e) => {
                lease_metrics::record_backend_error(&self.settings.key, "release");
                Err(e)
            }
        }
    }

    async fn release_best_effort(&self, token: &OwnerToken) {
        match self.release(token).await {
            Ok(true) => {
                info!(lease_key = %self.settings.key, owner = %token, "Lease released");
            }
            Ok(false) => {
                debug!(lease_key = %self.settings.key, owner = %token, "Lease was already released");
            }
            Err(e) => {
                // Expiry cleans up after us.
                warn!(lease_key = %self.settings.key, error = %e, "Failed to release lease");
            }
        }
    }

    /// Compete for the lease until `shutdown` fires.
    ///
    /// Never returns because of lease loss or store errors; those lead back
    /// to standby and another attempt after the backoff.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            lease_key = %self.settings.key,
            instance_id = %self.settings.instance_id,
            ttl = ?self.settings.ttl,
            task = %self.task.name(),
            "Starting lease manager"
        );

        let mut standby_logged = false;

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            self.set_state(RunState::Acquiring);
            match self.acquire().await {
                Ok(Some(token)) => {
                    standby_logged = false;
                    info!(lease_key = %self.settings.key, owner = %token, "Lease acquired, starting active task");

                    if shutdown.is_cancelled() {
                        self.set_state(RunState::Releasing);
                        self.release_best_effort(&token).await;
                        break;
                    }

                    self.set_state(RunState::Holding);
                    match self.hold(&token, &shutdown).await {
                        HoldOutcome::Shutdown => {
                            info!(lease_key = %self.settings.key, "Shutdown requested, releasing lease");
                            self.set_state(RunState::Releasing);
                            self.release_best_effort(&token).await;
                            break;
                        }
                        HoldOutcome::TaskEnded => {
                            info!(lease_key = %self.settings.key, "Active task ended, releasing lease");
                            self.set_state(RunState::Releasing);
                            self.release_best_effort(&token).await;
                        }
                        HoldOutcome::Lost(reason) => {
                            lease_metrics::record_lost(&self.settings.key, reason.as_label());
                            warn!(
                                lease_key = %self.settings.key,
                                reason = reason.as_label(),
                                "Lease lost, active task stopped"
                            );
                        }
                    }
                }
                Ok(None) => {
                    if !standby_logged {
                        info!(lease_key = %self.settings.key, "Another instance holds the lease, standing by");
                        standby_logged = true;
                    } else {
                        debug!(lease_key = %self.settings.key, "Lease still held elsewhere");
                    }
                }
                Err(e) => {
                    standby_logged = false;
                    warn!(lease_key = %self.settings.key, error = %e, "Lease acquisition failed, will retry");
                }
            }

            self.set_state(RunState::Idle);
            if !self.backoff(&shutdown).await {
                break;
            }
        }

        self.set_state(RunState::Stopped);
        info!(lease_key = %self.settings.key, "Lease manager stopped");
    }

    /// Sleep before the next attempt. `false` if shutdown interrupted it.
    async fn backoff(&self, shutdown: &CancellationToken) -> bool {
        let delay = self.settings.backoff();
        debug!(lease_key = %self.settings.key, ?delay, "Backing off");
        tokio::select! {
            _ = shutdown.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    /// Run the renewal loop and the active task until one of them ends.
    ///
    /// Both are joined (the task within `task_stop_timeout`) before this
    /// returns, so no renewal can overlap the release that may follow.
    async fn hold(&self, token: &OwnerToken, shutdown: &CancellationToken) -> HoldOutcome {
        let hold = shutdown.child_token();
        // Dropping this future (e.g. the run task is aborted) stops both tasks.
        let _hold_guard = hold.clone().drop_guard();

        let mut renewal: JoinHandle<RenewalOutcome> = tokio::spawn(
            RenewalLoop::new(
                self.store.clone(),
                self.settings.key.clone(),
                token.clone(),
                self.settings.ttl,
            )
            .run(hold.clone()),
        );

        let mut active: JoinHandle<Result<()>> = tokio::spawn({
            let task = self.task.clone();
            let cancel = hold.clone();
            async move { task.start(cancel).await }
        });

        tokio::select! {
            result = &mut renewal => {
                let outcome = flatten_renewal(result);
                self.wait_for_task(active).await;
                classify(outcome, shutdown)
            }
            result = &mut active => {
                self.log_task_result(result);
                hold.cancel();
                let outcome = flatten_renewal(renewal.await);
                classify(outcome, shutdown)
            }
        }
    }

    async fn wait_for_task(&self, mut active: JoinHandle<Result<()>>) {
        match tokio::time::timeout(self.settings.task_stop_timeout, &mut active).await {
            Ok(result) => self.log_task_result(result),
            Err(_) => {
                error!(
                    task = %self.task.name(),
                    timeout = ?self.settings.task_stop_timeout,
                    "Active task ignored cancellation, aborting it"
                );
                active.abort();
                // The task must be gone before the lease can be released.
                match active.await {
                    Err(e) if e.is_cancelled() => {
                        debug!(task = %self.task.name(), "Active task aborted");
                    }
                    result => self.log_task_result(result),
                }
            }
        }
    }

    fn log_task_result(&self, result: std::result::Result<Result<()>, tokio::task::JoinError>) {
        match result {
            Ok(Ok(())) => debug!(task = %self.task.name(), "Active task finished"),
            Ok(Err(e)) => warn!(task = %self.task.name(), error = %e, "Active task failed"),
            Err(e) => error!(task = %self.task.name(), error = %e, "Active task panicked"),
        }
    }
}

fn flatten_renewal(result: std::result::Result<RenewalOutcome, tokio::task::JoinError>) -> RenewalOutcome {
    result.unwrap_or_else(|e| {
        error!(error = %e, "Renewal task panicked");
        RenewalOutcome::Lost(LossReason::BackendError(e.to_string()))
    })
}

fn classify(outcome: RenewalOutcome, shutdown: &CancellationToken) -> HoldOutcome {
    match outcome {
        RenewalOutcome::Lost(reason) => HoldOutcome::Lost(reason),
        RenewalOutcome::Stopped if shutdown.is_cancelled() => HoldOutcome::Shutdown,
        RenewalOutcome::Stopped => HoldOutcome::TaskEnded,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_prefers_loss_over_shutdown() {
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        assert_eq!(
            classify(RenewalOutcome::Lost(LossReason::OwnershipLost), &shutdown),
            HoldOutcome::Lost(LossReason::OwnershipLost)
        );
        assert_eq!(classify(RenewalOutcome::Stopped, &shutdown), HoldOutcome::Shutdown);
    }

    #[test]
    fn test_classify_stopped_without_shutdown_is_task_end() {
        let shutdown = CancellationToken::new();
        assert_eq!(classify(RenewalOutcome::Stopped, &shutdown), HoldOutcome::TaskEnded);
    }
}
