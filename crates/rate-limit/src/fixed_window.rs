use std::sync::Arc;
use std::time::Duration;

use tollgate_counter::CountingStore;
use tracing::warn;

use crate::{Decision, LimitKey, LimitPolicy};

/// Fixed-window counter over an external counting store.
///
/// Cheaply cloneable and safe to share across request tasks; all state lives
/// in the store.
#[derive(Clone)]
pub struct FixedWindowLimiter {
    store: Arc<dyn CountingStore>,
}

impl FixedWindowLimiter {
    pub fn new(store: Arc<dyn CountingStore>) -> Self {
        Self { store }
    }

    /// Count this request against `key` and decide whether it is admitted.
    ///
    /// The increment happens on every check, denied requests included; a
    /// caller hammering a denied route keeps its window full.
    pub async fn check(&self, key: &LimitKey, policy: &LimitPolicy) -> Decision {
        let count = match self
            .store
            .incr_with_expiry(key.as_str(), policy.window)
            .await
        {
            Ok(count) => count,
            Err(e) => {
                warn!(key = key.as_str(), error = %e, "rate limit store error");
                return Decision::StoreUnavailable;
            }
        };

        if count > i64::from(policy.quota) {
            let retry_after = self.retry_after(key, policy).await;
            warn!(
                key = key.as_str(),
                count,
                limit = policy.quota,
                "rate limit exceeded"
            );
            return Decision::Deny {
                limit: policy.quota,
                retry_after,
            };
        }

        let remaining = i64::from(policy.quota) - count;
        Decision::Allow {
            limit: policy.quota,
            remaining: remaining.max(0) as u32,
        }
    }

    /// Remaining window for a denied key. Falls back to the full window when
    /// the counter expired between the increment and the lookup, or when the
    /// store cannot answer.
    async fn retry_after(&self, key: &LimitKey, policy: &LimitPolicy) -> Duration {
        match self.store.ttl(key.as_str()).await {
            Ok(Some(ttl)) if ttl > Duration::ZERO => ttl,
            Ok(_) => policy.window,
            Err(e) => {
                warn!(key = key.as_str(), error = %e, "rate limit ttl lookup failed");
                policy.window
            }
        }
    }
}
