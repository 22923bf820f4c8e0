//! In-process lease store
//!
//! Same atomicity as the Redis store (one mutex guards each whole operation)
//! with expiry driven by `tokio::time`, so it follows paused virtual time in
//! tests. Also offers fault injection: an outage switch and an external
//! overwrite of the lease value.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::error::{LeaseError, Result};
use crate::lease::OwnerToken;
use crate::store::LeaseStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOpKind {
    Ping,
    Acquire,
    Extend,
    Release,
    Read,
}

/// One recorded store call
#[derive(Debug, Clone)]
pub struct StoreOp {
    pub kind: StoreOpKind,
    pub at: Instant,
    /// Owner token the call was made with, if any
    pub token: Option<String>,
    /// `Ok(result)` as returned to the caller, `Err(())` for a simulated outage
    pub outcome: std::result::Result<bool, ()>,
}

impl StoreOp {
    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, Ok(true))
    }
}

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Instant,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    unreachable: bool,
    log: Vec<StoreOp>,
}

impl Inner {
    fn live_value(&mut self, key: &str, now: Instant) -> Option<&mut Entry> {
        let expired = matches!(self.entries.get(key), Some(entry) if entry.expires_at <= now);
        if expired {
            self.entries.remove(key);
        }
        self.entries.get_mut(key)
    }

    fn record(
        &mut self,
        kind: StoreOpKind,
        at: Instant,
        token: Option<&OwnerToken>,
        outcome: std::result::Result<bool, ()>,
    ) {
        self.log.push(StoreOp {
            kind,
            at,
            token: token.map(|t| t.as_str().to_string()),
            outcome,
        });
    }
}

#[derive(Debug, Default)]
pub struct InMemoryLeaseStore {
    inner: Mutex<Inner>,
}

impl InMemoryLeaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, every call fails with [`LeaseError::Unavailable`].
    pub fn set_unreachable(&self, unreachable: bool) {
        self.inner.lock().unreachable = unreachable;
    }

    /// Store `value` under `key` regardless of the current owner, as another
    /// replica would after the lease expired.
    pub fn overwrite(&self, key: &str, value: &str, ttl: Duration) {
        let now = Instant::now();
        self.inner.lock().entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: now + ttl,
            },
        );
    }

    /// Current value without touching the call log.
    pub fn peek(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        self.inner
            .lock()
            .live_value(key, now)
            .map(|entry| entry.value.clone())
    }

    /// Calls made so far, oldest first.
    pub fn operations(&self) -> Vec<StoreOp> {
        self.inner.lock().log.clone()
    }

    pub fn operations_of(&self, kind: StoreOpKind) -> Vec<StoreOp> {
        self.inner
            .lock()
            .log
            .iter()
            .filter(|op| op.kind == kind)
            .cloned()
            .collect()
    }

    fn outage(&self, inner: &mut Inner, kind: StoreOpKind, token: Option<&OwnerToken>) -> Option<LeaseError> {
        if !inner.unreachable {
            return None;
        }
        inner.record(kind, Instant::now(), token, Err(()));
        Some(LeaseError::Unavailable("simulated outage".to_string()))
    }
}

#[async_trait]
impl LeaseStore for InMemoryLeaseStore {
    async fn ping(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if let Some(err) = self.outage(&mut inner, StoreOpKind::Ping, None) {
            return Err(err);
        }
        inner.record(StoreOpKind::Ping, Instant::now(), None, Ok(true));
        Ok(())
    }

    async fn try_acquire(&self, key: &str, token: &OwnerToken, ttl: Duration) -> Result<bool> {
        let mut inner = self.inner.lock();
        if let Some(err) = self.outage(&mut inner, StoreOpKind::Acquire, Some(token)) {
            return Err(err);
        }

        let now = Instant::now();
        let acquired = if inner.live_value(key, now).is_some() {
            false
        } else {
            inner.entries.insert(
                key.to_string(),
                Entry {
                    value: token.as_str().to_string(),
                    expires_at: now + ttl,
                },
            );
            true
        };

        inner.record(StoreOpKind::Acquire, now, Some(token), Ok(acquired));
        Ok(acquired)
    }

    async fn extend_if_owner(&self, key: &str, token: &OwnerToken, ttl: Duration) -> Result<bool> {
        let mut inner = self.inner.lock();
        if let Some(err) = self.outage(&mut inner, StoreOpKind::Extend, Some(token)) {
            return Err(err);
        }

        let now = Instant::now();
        let extended = match inner.live_value(key, now) {
            Some(entry) if entry.value == token.as_str() => {
                entry.expires_at = now + ttl;
                true
            }
            _ => false,
        };

        inner.record(StoreOpKind::Extend, now, Some(token), Ok(extended));
        Ok(extended)
    }

    async fn release_if_owner(&self, key: &str, token: &OwnerToken) -> Result<bool> {
        let mut inner = self.inner.lock();
        if let Some(err) = self.outage(&mut inner, StoreOpKind::Release, Some(token)) {
            return Err(err);
        }

        let now = Instant::now();
        let owned = matches!(inner.live_value(key, now), Some(entry) if entry.value == token.as_str());
        if owned {
            inner.entries.remove(key);
        }

        inner.record(StoreOpKind::Release, now, Some(token), Ok(owned));
        Ok(owned)
    }

    async fn current_owner(&self, key: &str) -> Result<Option<String>> {
        let mut inner = self.inner.lock();
        if let Some(err) = self.outage(&mut inner, StoreOpKind::Read, None) {
            return Err(err);
        }

        let now = Instant::now();
        let value = inner.live_value(key, now).map(|entry| entry.value.clone());
        inner.record(StoreOpKind::Read, now, None, Ok(value.is_some()));
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "lease";

    #[tokio::test(start_paused = true)]
    async fn test_set_if_absent() {
        let store = InMemoryLeaseStore::new();
        let a = OwnerToken::from("a");
        let b = OwnerToken::from("b");

        assert!(store.try_acquire(KEY, &a, Duration::from_secs(2)).await.unwrap());
        assert!(!store.try_acquire(KEY, &b, Duration::from_secs(2)).await.unwrap());
        assert_eq!(store.current_owner(KEY).await.unwrap().as_deref(), Some("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_frees_the_key() {
        let store = InMemoryLeaseStore::new();
        let a = OwnerToken::from("a");
        let b = OwnerToken::from("b");

        store.try_acquire(KEY, &a, Duration::from_secs(2)).await.unwrap();
        tokio::time::advance(Duration::from_millis(1999)).await;
        assert!(!store.try_acquire(KEY, &b, Duration::from_secs(2)).await.unwrap());

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(store.try_acquire(KEY, &b, Duration::from_secs(2)).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_extend_checks_owner() {
        let store = InMemoryLeaseStore::new();
        let a = OwnerToken::from("a");
        let b = OwnerToken::from("b");

        store.try_acquire(KEY, &a, Duration::from_secs(2)).await.unwrap();
        assert!(!store.extend_if_owner(KEY, &b, Duration::from_secs(2)).await.unwrap());

        tokio::time::advance(Duration::from_millis(1500)).await;
        assert!(store.extend_if_owner(KEY, &a, Duration::from_secs(2)).await.unwrap());

        // Extended from t=1.5s, so still alive at t=3s
        tokio::time::advance(Duration::from_millis(1500)).await;
        assert_eq!(store.peek(KEY).as_deref(), Some("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_extend_after_expiry_fails() {
        let store = InMemoryLeaseStore::new();
        let a = OwnerToken::from("a");

        store.try_acquire(KEY, &a, Duration::from_secs(1)).await.unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!store.extend_if_owner(KEY, &a, Duration::from_secs(1)).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_only_removes_own_lease() {
        let store = InMemoryLeaseStore::new();
        let a = OwnerToken::from("a");

        store.try_acquire(KEY, &a, Duration::from_secs(2)).await.unwrap();
        store.overwrite(KEY, "intruder", Duration::from_secs(2));

        assert!(!store.release_if_owner(KEY, &a).await.unwrap());
        assert_eq!(store.peek(KEY).as_deref(), Some("intruder"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_outage_fails_every_call_and_is_logged() {
        let store = InMemoryLeaseStore::new();
        let a = OwnerToken::from("a");

        store.set_unreachable(true);
        assert!(matches!(store.ping().await, Err(LeaseError::Unavailable(_))));
        tokio_test::assert_err!(store.try_acquire(KEY, &a, Duration::from_secs(2)).await);

        store.set_unreachable(false);
        assert!(tokio_test::assert_ok!(store.try_acquire(KEY, &a, Duration::from_secs(2)).await));

        let acquires = store.operations_of(StoreOpKind::Acquire);
        assert_eq!(acquires.len(), 2);
        assert!(acquires[0].outcome.is_err());
        assert!(acquires[1].succeeded());
    }
}
