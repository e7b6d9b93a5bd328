//! In-memory counting store for tests.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::{CountingStore, StoreError};

struct CounterEntry {
    count: i64,
    expires_at: Instant,
}

/// A `CountingStore` backed by a `DashMap`, with failure injection.
///
/// Expiry is evaluated lazily on access, which reproduces the fixed-window
/// reset without any background task. `set_failing(true)` makes every
/// operation return `StoreError::Unavailable`, for exercising the
/// fail-open/fail-closed paths of the checks built on top.
#[derive(Default)]
pub struct MockStore {
    counters: DashMap<String, CounterEntry>,
    members: DashMap<String, ()>,
    failing: AtomicBool,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent operation fail, or restore normal behavior.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Register a key for `key_exists` lookups (blacklist fixtures).
    pub fn insert_key(&self, key: &str) {
        self.members.insert(key.to_string(), ());
    }

    /// Force a counter's window to elapse immediately.
    pub fn expire_now(&self, key: &str) {
        if let Some(mut entry) = self.counters.get_mut(key) {
            entry.expires_at = Instant::now();
        }
    }

    fn check_failing(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("mock store failing".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CountingStore for MockStore {
    async fn incr_with_expiry(&self, key: &str, window: Duration) -> Result<i64, StoreError> {
        self.check_failing()?;
        let window = window.max(Duration::from_secs(1));
        let now = Instant::now();

        let mut entry = self
            .counters
            .entry(key.to_string())
            .or_insert_with(|| CounterEntry {
                count: 0,
                expires_at: now + window,
            });
        if entry.expires_at <= now {
            // Window elapsed; this increment starts a fresh one.
            entry.count = 0;
            entry.expires_at = now + window;
        }
        entry.count += 1;
        Ok(entry.count)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        self.check_failing()?;
        let now = Instant::now();
        Ok(self.counters.get(key).and_then(|entry| {
            if entry.expires_at > now {
                Some(entry.expires_at - now)
            } else {
                None
            }
        }))
    }

    async fn key_exists(&self, key: &str) -> Result<bool, StoreError> {
        self.check_failing()?;
        Ok(self.members.contains_key(key))
    }
}
