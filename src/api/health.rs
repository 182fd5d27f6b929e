//! Health endpoint.

use crate::api::ApiState;
use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

/// GET /health
///
/// Flushes the aggregation cache before responding, so a successful
/// health check implies the store is no staler than this instant.
pub async fn health_check(State(state): State<ApiState>) -> Json<Value> {
    state.engine.flush().await;

    Json(json!({
        "status": "ok",
        "service": "otel-station",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}
