//! Error types for the lease crate

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LeaseError {
    #[error("Redis connection error: {0}")]
    Connection(String),

    #[error("Redis operation error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Lease store {op} timed out after {timeout:?}")]
    Timeout { op: &'static str, timeout: Duration },

    #[error("Lease store unavailable: {0}")]
    Unavailable(String),

    #[error("Active task failed: {0}")]
    Task(String),
}

pub type Result<T> = std::result::Result<T, LeaseError>;
