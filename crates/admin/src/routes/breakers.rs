use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::state::SharedState;

/// GET /api/breakers
///
/// Returns the current state of every circuit breaker: closed, open, or
/// half-open, with the consecutive-failure count and in-flight probe count.
pub async fn get_breakers(State(state): State<SharedState>) -> Json<Value> {
    let snapshot = state.breakers.snapshot();

    Json(json!({ "breakers": snapshot }))
}
