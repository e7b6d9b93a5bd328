pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

use crate::state::SharedState;

pub use state::{AppState, GatewayMetrics, SharedState as SharedStateType};

/// Build the Axum router with all admin API routes and middleware.
pub fn build_router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Liveness probe, independent of the admission pipeline
        .route("/api/health", get(routes::health::health_check))
        // Circuit breaker states per service
        .route("/api/breakers", get(routes::breakers::get_breakers))
        // Prometheus metrics
        .route("/api/metrics", get(routes::metrics::get_metrics))
        .with_state(state)
        .layer(cors)
}

/// Start the admin API server on the specified address.
///
/// This function will block until the server is shut down.
pub async fn run_admin_server(state: SharedState, listen_addr: &str) -> anyhow::Result<()> {
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    tracing::info!("admin API server listening on {}", listen_addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Convenience function to create a SharedState.
pub fn new_shared_state(
    config: tollgate_common::AppConfig,
    breakers: Arc<tollgate_breaker::BreakerRegistry>,
) -> SharedState {
    Arc::new(AppState::new(config, breakers))
}
