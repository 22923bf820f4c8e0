//! Baton Lease
//!
//! Keeps exactly one replica of a listener active across many hosts, using a
//! Redis key as a time-bounded lease.
//!
//! # Features
//!
//! - **Atomic acquisition**: `SET NX PX` with a fresh owner token per attempt
//! - **Owner-verified renewal**: server-side compare-and-extend every `ttl / 2`
//! - **Prompt hand-off**: a failed renewal cancels the active task at once;
//!   standbys retry every `ttl / 2` plus jitter
//! - **Graceful release**: shutdown stops the task, then deletes the lease so
//!   a standby can take over without waiting for expiry
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use bt_lease::{CommandTask, LeaseManager, LeaseSettings, RedisLeaseStore, RedisStoreConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! async fn example() -> bt_lease::Result<()> {
//!     let store = RedisLeaseStore::connect(&RedisStoreConfig::new("127.0.0.1", 6379)).await?;
//!     let task = CommandTask::new("/usr/local/bin/listener", Vec::<String>::new());
//!
//!     let manager = LeaseManager::new(Arc::new(store), Arc::new(task), LeaseSettings::new("my-service:lock"));
//!
//!     let shutdown = CancellationToken::new();
//!     manager.run(shutdown).await;
//!     Ok(())
//! }
//! ```

mod error;
mod lease;
pub mod lease_metrics;
mod manager;
pub mod memory;
mod redis_store;
mod renewal;
mod store;
mod task;

pub use error::{LeaseError, Result};
pub use lease::{LeaseSettings, OwnerToken, RunState};
pub use manager::LeaseManager;
pub use memory::InMemoryLeaseStore;
pub use redis_store::{RedisLeaseStore, RedisStoreConfig};
pub use renewal::LossReason;
pub use store::LeaseStore;
pub use task::{ActiveTask, CommandTask};
