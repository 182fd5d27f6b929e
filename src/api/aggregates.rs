//! Cross-session aggregate handlers.

use crate::api::{clamp_limit, ApiState};
use crate::error::AppError;
use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
pub struct AggregateParams {
    pub limit: Option<i64>,
}

/// GET /api/v2/models: totals grouped by model, highest spend first.
pub async fn list_models(
    State(state): State<ApiState>,
    Query(params): Query<AggregateParams>,
) -> Result<Json<Value>, AppError> {
    let models = state
        .store
        .list_model_aggregates(clamp_limit(params.limit))
        .await?;

    Ok(Json(json!({
        "total": models.len(),
        "models": models,
    })))
}

/// GET /api/v2/tools: totals grouped by tool, most called first.
pub async fn list_tools(
    State(state): State<ApiState>,
    Query(params): Query<AggregateParams>,
) -> Result<Json<Value>, AppError> {
    let tools = state
        .store
        .list_tool_aggregates(clamp_limit(params.limit))
        .await?;

    Ok(Json(json!({
        "total": tools.len(),
        "tools": tools,
    })))
}
