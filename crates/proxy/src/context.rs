use std::sync::Arc;
use std::time::Instant;

use tollgate_auth::Identity;

use crate::upstream::ServiceTarget;

/// Per-request context carried through the Pingora proxy pipeline.
///
/// Request-scoped values (identity, rate-limit metadata, the pending breaker
/// report) live here rather than in shared state, so every stage reads what
/// the previous stages resolved for this request and nothing else.
pub struct RequestContext {
    /// Client IP address string.
    pub client_ip: String,

    /// HTTP method (cached for logging).
    pub method: String,

    /// Request path (cached for logging and route matching).
    pub path: String,

    /// Matched route index (into the config's routes vec).
    pub route_index: Option<usize>,

    /// Identity resolved by the auth gate, if the route required one.
    pub identity: Option<Identity>,

    /// (limit, remaining) from an allowed rate-limit check, echoed on the
    /// response.
    pub rate_limit: Option<(u32, u32)>,

    /// Resolved backend target for the matched route.
    pub target: Option<Arc<ServiceTarget>>,

    /// Service with a permitted breaker attempt that still owes its report.
    pub breaker_permit: Option<String>,

    /// Whether the request was blocked before forwarding (and by what).
    pub block_reason: Option<BlockReason>,

    /// Response status code (set during response phase).
    pub response_status: u16,

    /// Request start time for latency measurement.
    pub request_start: Instant,
}

#[derive(Debug, Clone)]
pub enum BlockReason {
    NoRoute,
    Unauthorized,
    RateLimited,
    BreakerOpen,
    NotConfigured,
}

impl RequestContext {
    /// Rate-limit metadata headers for synthesized responses produced after
    /// the limiter stage ran.
    pub fn rate_limit_headers(&self) -> Vec<(&'static str, String)> {
        match self.rate_limit {
            Some((limit, remaining)) => vec![
                ("x-ratelimit-limit", limit.to_string()),
                ("x-ratelimit-remaining", remaining.to_string()),
            ],
            None => Vec::new(),
        }
    }

    pub fn new() -> Self {
        Self {
            client_ip: String::new(),
            method: String::new(),
            path: String::new(),
            route_index: None,
            identity: None,
            rate_limit: None,
            target: None,
            breaker_permit: None,
            block_reason: None,
            response_status: 0,
            request_start: Instant::now(),
        }
    }
}
