use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::state::SharedState;

/// GET /api/health
///
/// Liveness probe. Always succeeds while the process is up, regardless of
/// the state of Redis or the backends.
pub async fn health_check(State(state): State<SharedState>) -> Json<Value> {
    let uptime = state.start_time.elapsed().as_secs();

    Json(json!({
        "status": "UP",
        "uptime_secs": uptime,
        "version": env!("CARGO_PKG_VERSION")
    }))
}
