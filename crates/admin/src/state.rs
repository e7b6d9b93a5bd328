use std::sync::Arc;

use prometheus::{HistogramOpts, HistogramVec, IntCounter, Opts, Registry};
use tollgate_breaker::BreakerRegistry;
use tollgate_common::AppConfig;

/// Shared state type alias used across all route handlers.
pub type SharedState = Arc<AppState>;

/// Central application state shared between the data plane and the admin API.
///
/// The configuration is loaded once at startup and read-only for the life of
/// the process.
pub struct AppState {
    pub config: AppConfig,
    pub breakers: Arc<BreakerRegistry>,
    pub metrics: GatewayMetrics,
    pub start_time: std::time::Instant,
}

/// Prometheus metrics collected by the gateway.
pub struct GatewayMetrics {
    pub registry: Registry,
    pub requests_total: IntCounter,
    pub requests_unauthorized: IntCounter,
    pub requests_rate_limited: IntCounter,
    pub requests_breaker_rejected: IntCounter,
    pub upstream_failures: IntCounter,
    pub request_duration: HistogramVec,
}

impl GatewayMetrics {
    /// Create a new GatewayMetrics instance with all counters and histograms
    /// registered against a fresh Prometheus registry.
    pub fn new() -> Self {
        let registry = Registry::new();

        let requests_total = IntCounter::with_opts(Opts::new(
            "gateway_requests_total",
            "Total number of requests processed",
        ))
        .expect("failed to create requests_total counter");

        let requests_unauthorized = IntCounter::with_opts(Opts::new(
            "gateway_requests_unauthorized",
            "Total number of requests rejected by the auth gate",
        ))
        .expect("failed to create requests_unauthorized counter");

        let requests_rate_limited = IntCounter::with_opts(Opts::new(
            "gateway_requests_rate_limited",
            "Total number of requests rejected by the rate limiter",
        ))
        .expect("failed to create requests_rate_limited counter");

        let requests_breaker_rejected = IntCounter::with_opts(Opts::new(
            "gateway_requests_breaker_rejected",
            "Total number of requests rejected by an open circuit breaker",
        ))
        .expect("failed to create requests_breaker_rejected counter");

        let upstream_failures = IntCounter::with_opts(Opts::new(
            "gateway_upstream_failures",
            "Total number of transport-level backend failures",
        ))
        .expect("failed to create upstream_failures counter");

        let request_duration = HistogramVec::new(
            HistogramOpts::new(
                "gateway_request_duration_seconds",
                "Request processing duration in seconds",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0]),
            &["service"],
        )
        .expect("failed to create request_duration histogram");

        registry
            .register(Box::new(requests_total.clone()))
            .expect("failed to register requests_total");
        registry
            .register(Box::new(requests_unauthorized.clone()))
            .expect("failed to register requests_unauthorized");
        registry
            .register(Box::new(requests_rate_limited.clone()))
            .expect("failed to register requests_rate_limited");
        registry
            .register(Box::new(requests_breaker_rejected.clone()))
            .expect("failed to register requests_breaker_rejected");
        registry
            .register(Box::new(upstream_failures.clone()))
            .expect("failed to register upstream_failures");
        registry
            .register(Box::new(request_duration.clone()))
            .expect("failed to register request_duration");

        Self {
            registry,
            requests_total,
            requests_unauthorized,
            requests_rate_limited,
            requests_breaker_rejected,
            upstream_failures,
            request_duration,
        }
    }
}

impl AppState {
    /// Create a new AppState from the given configuration and breaker
    /// registry.
    pub fn new(config: AppConfig, breakers: Arc<BreakerRegistry>) -> Self {
        Self {
            config,
            breakers,
            metrics: GatewayMetrics::new(),
            start_time: std::time::Instant::now(),
        }
    }
}
