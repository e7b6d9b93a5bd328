//! Counting store adapter for the gateway.
//!
//! The rate limiter and the token blacklist both count or look up keys in an
//! external atomic store. This crate wraps that store behind the
//! [`CountingStore`] trait so the checks that depend on it can be exercised
//! against an in-memory [`MockStore`](mock::MockStore) in tests, while
//! production uses the Redis-backed [`RedisStore`](redis_store::RedisStore).
//!
//! The store's one non-negotiable property is atomicity: an
//! increment-with-expiry must be a single indivisible operation as seen by
//! every gateway instance sharing the store. That is what keeps the fixed
//! window consistent across a horizontally scaled fleet.

pub mod mock;
pub mod redis_store;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

pub use mock::MockStore;
pub use redis_store::RedisStore;

/// Errors surfaced by a counting store.
///
/// Store failures are never fatal to request handling; callers degrade the
/// single check that needed the store and log the error.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("counting store unavailable: {0}")]
    Unavailable(String),

    #[error("counting store backend error: {0}")]
    Backend(#[from] redis::RedisError),
}

/// An external atomic counter service.
#[async_trait]
pub trait CountingStore: Send + Sync {
    /// Atomically increment `key` and, only when this increment created the
    /// counter, set its expiry to `window`. Returns the post-increment count.
    ///
    /// Windows shorter than one second are coerced up to one second so a
    /// counter can never be created already expired.
    async fn incr_with_expiry(&self, key: &str, window: Duration) -> Result<i64, StoreError>;

    /// Remaining lifetime of `key`, or `None` when the key is missing or has
    /// no expiry set.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError>;

    /// Membership check used for the token blacklist.
    async fn key_exists(&self, key: &str) -> Result<bool, StoreError>;
}
