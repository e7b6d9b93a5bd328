//! Rate limiting for the gateway.
//!
//! This crate implements **fixed window counting** against an external
//! atomic counting store: every check increments the caller's counter, the
//! counter expires at the window boundary, and the whole bucket resets at
//! once. The counting store (not this crate) guarantees that the
//! increment-plus-expiry is a single atomic operation, so the same quota
//! holds across every gateway instance that shares the store.
//!
//! On store failure the limiter reports [`Decision::StoreUnavailable`]
//! rather than guessing; the caller applies its configured
//! `DependencyPolicy`. The shipped policy is fail-open: availability of the
//! business system is prioritized over strict quota enforcement.

pub mod fixed_window;

use std::time::Duration;

use tollgate_common::LimitScope;

pub use fixed_window::FixedWindowLimiter;

/// An immutable quota/window pair, one per route class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitPolicy {
    pub quota: u32,
    pub window: Duration,
}

impl LimitPolicy {
    pub fn new(quota: u32, window: Duration) -> Self {
        Self { quota, window }
    }
}

/// The counting-store key for one caller/route pair.
///
/// Derived deterministically from the scope, the scope value, and the route
/// path: stable across requests from the same caller on the same route, and
/// distinct across different callers or routes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LimitKey(String);

impl LimitKey {
    pub fn new(scope: LimitScope, value: &str, path: &str) -> Self {
        let scope = match scope {
            LimitScope::Ip => "ip",
            LimitScope::Identity => "user",
        };
        Self(format!("ratelimit:{}:{}:{}", scope, value, path))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// The outcome of a rate-limit check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Within quota. `remaining` is floored at zero.
    Allow { limit: u32, remaining: u32 },
    /// Quota exceeded. `retry_after` is the counter's remaining lifetime,
    /// defaulting to the full window when the store cannot report it.
    Deny { limit: u32, retry_after: Duration },
    /// The counting store could not be reached; the caller decides whether
    /// the request passes.
    StoreUnavailable,
}
