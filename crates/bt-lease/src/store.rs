//! Lease store abstraction
//!
//! Every operation that touches the lease record is a single atomic backend
//! call. Implementations must never compose a read and a write on the client
//! side.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::lease::OwnerToken;

#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Liveness check used once at startup.
    async fn ping(&self) -> Result<()>;

    /// Set `key` to `token` with expiry `ttl` only if `key` is absent.
    /// `Ok(false)` means another owner holds it.
    async fn try_acquire(&self, key: &str, token: &OwnerToken, ttl: Duration) -> Result<bool>;

    /// Reset the expiry of `key` to `ttl` only if it still stores `token`.
    /// `Ok(false)` means ownership is gone.
    async fn extend_if_owner(&self, key: &str, token: &OwnerToken, ttl: Duration) -> Result<bool>;

    /// Delete `key` only if it still stores `token`.
    async fn release_if_owner(&self, key: &str, token: &OwnerToken) -> Result<bool>;

    /// Current holder, if any.
    async fn current_owner(&self, key: &str) -> Result<Option<String>>;
}
