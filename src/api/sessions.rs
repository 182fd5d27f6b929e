//! Session-scoped query handlers.

use crate::aggregator::models::{Session, SessionModel, SessionTool};
use crate::api::{clamp_limit, ApiState};
use crate::error::AppError;
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub limit: Option<i64>,
}

/// GET /api/v2/sessions/{session_id}
pub async fn get_session(
    State(state): State<ApiState>,
    Path(session_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let session = state
        .store
        .get_session(&session_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("session {}", session_id)))?;

    let models = state.store.list_session_models(&session_id).await?;
    let tools = state.store.list_session_tools(&session_id).await?;

    Ok(Json(session_detail(&session, &models, &tools)))
}

/// GET /api/v2/sessions/{session_id}/prompts
pub async fn get_session_prompts(
    State(state): State<ApiState>,
    Path(session_id): Path<String>,
    Query(params): Query<ListParams>,
) -> Result<Json<Value>, AppError> {
    let prompts = state
        .store
        .list_session_prompts(&session_id, clamp_limit(params.limit))
        .await?;

    let entries: Vec<Value> = prompts
        .iter()
        .map(|p| {
            json!({
                "timestamp": p.timestamp.to_rfc3339(),
                "prompt_text": p.prompt_text,
                "prompt_length": p.prompt_length,
            })
        })
        .collect();

    Ok(Json(json!({
        "session_id": session_id,
        "total": entries.len(),
        "prompts": entries,
    })))
}

/// GET /api/v2/users/{user_id}/sessions
pub async fn list_user_sessions(
    State(state): State<ApiState>,
    Path(user_id): Path<String>,
    Query(params): Query<ListParams>,
) -> Result<Json<Value>, AppError> {
    let sessions = state
        .store
        .list_sessions_by_user(&user_id, clamp_limit(params.limit))
        .await?;

    if sessions.is_empty() {
        return Ok(Json(json!({
            "user_id": user_id,
            "total_sessions": 0,
            "message": "No sessions found for this user",
        })));
    }

    let totals = session_totals(&sessions);

    Ok(Json(json!({
        "user_id": user_id,
        "organization_id": sessions[0].organization_id,
        "summary": totals,
        "sessions": session_list(&sessions),
    })))
}

/// GET /api/v2/orgs/{org_id}/sessions
pub async fn list_org_sessions(
    State(state): State<ApiState>,
    Path(org_id): Path<String>,
    Query(params): Query<ListParams>,
) -> Result<Json<Value>, AppError> {
    let sessions = state
        .store
        .list_sessions_by_org(&org_id, clamp_limit(params.limit))
        .await?;

    if sessions.is_empty() {
        return Ok(Json(json!({
            "organization_id": org_id,
            "total_sessions": 0,
            "message": "No sessions found for this organization",
        })));
    }

    let users: HashSet<&str> = sessions.iter().map(|s| s.user_id.as_str()).collect();
    let totals = session_totals(&sessions);

    Ok(Json(json!({
        "organization_id": org_id,
        "total_users": users.len(),
        "summary": totals,
        "sessions": session_list(&sessions),
    })))
}

fn session_detail(session: &Session, models: &[SessionModel], tools: &[SessionTool]) -> Value {
    let cost_by_model: HashMap<&str, f64> =
        models.iter().map(|m| (m.model.as_str(), m.cost_usd)).collect();

    let model_entries: Vec<Value> = models
        .iter()
        .map(|m| {
            json!({
                "model": m.model,
                "cost_usd": m.cost_usd,
                "request_count": m.request_count,
                "tokens": {
                    "input": m.input_tokens,
                    "output": m.output_tokens,
                    "cache_read": m.cache_read_tokens,
                    "cache_creation": m.cache_creation_tokens,
                },
                "avg_latency_ms": m.avg_latency_ms,
            })
        })
        .collect();

    let tool_entries: Vec<Value> = tools
        .iter()
        .map(|t| {
            json!({
                "tool_name": t.tool_name,
                "call_count": t.call_count,
                "success_count": t.success_count,
                "failure_count": t.failure_count,
                "total_execution_time_ms": t.total_execution_time_ms,
                "min_duration_ms": t.min_duration_ms,
                "avg_duration_ms": t.avg_duration_ms,
                "max_duration_ms": t.max_duration_ms,
                "decisions": {
                    "auto_approved": t.auto_approved_count,
                    "user_approved": t.user_approved_count,
                    "rejected": t.rejected_count,
                },
                "total_result_size_bytes": t.total_result_size_bytes,
            })
        })
        .collect();

    json!({
        "session_id": session.session_id,
        "user_id": session.user_id,
        "organization_id": session.organization_id,
        "window": {
            "start": session.start_time.to_rfc3339(),
            "end": session.end_time.to_rfc3339(),
            "duration_seconds": (session.end_time - session.start_time).num_seconds(),
        },
        "environment": {
            "client_name": session.client_name,
            "client_version": session.client_version,
            "terminal_type": session.terminal_type,
            "host_arch": session.host_arch,
            "os_type": session.os_type,
            "os_version": session.os_version,
        },
        "costs": {
            "total_usd": session.total_cost_usd,
            "by_model": cost_by_model,
        },
        "tokens": {
            "total": session.total_input_tokens
                + session.total_output_tokens
                + session.total_cache_read_tokens,
            "input": session.total_input_tokens,
            "output": session.total_output_tokens,
            "cache_read": session.total_cache_read_tokens,
            "cache_creation": session.total_cache_creation_tokens,
        },
        "activity": {
            "api_requests": session.api_request_count,
            "api_errors": session.api_error_count,
            "user_prompts": session.user_prompt_count,
            "tool_calls": session.tool_call_count,
            "active_time_seconds": session.total_active_time_seconds,
        },
        "performance": {
            "avg_api_latency_ms": if session.api_request_count > 0 {
                session.total_api_latency_ms / session.api_request_count as f64
            } else {
                0.0
            },
        },
        "models": model_entries,
        "tools": tool_entries,
        "metadata": {
            "created_at": session.created_at.to_rfc3339(),
            "updated_at": session.updated_at.to_rfc3339(),
        },
    })
}

fn session_totals(sessions: &[Session]) -> Value {
    let count = sessions.len() as i64;
    let total_cost: f64 = sessions.iter().map(|s| s.total_cost_usd).sum();
    let total_tokens: i64 = sessions
        .iter()
        .map(|s| s.total_input_tokens + s.total_output_tokens + s.total_cache_read_tokens)
        .sum();
    let api_requests: i64 = sessions.iter().map(|s| s.api_request_count).sum();
    let prompts: i64 = sessions.iter().map(|s| s.user_prompt_count).sum();
    let tool_calls: i64 = sessions.iter().map(|s| s.tool_call_count).sum();
    let active_time: f64 = sessions.iter().map(|s| s.total_active_time_seconds).sum();

    let first = sessions.iter().map(|s| s.start_time).min();
    let last = sessions.iter().map(|s| s.start_time).max();

    json!({
        "total_sessions": count,
        "first_session": first.map(|t| t.to_rfc3339()),
        "last_session": last.map(|t| t.to_rfc3339()),
        "total_cost_usd": total_cost,
        "avg_cost_per_session": total_cost / count as f64,
        "total_tokens": total_tokens,
        "total_api_requests": api_requests,
        "total_prompts": prompts,
        "total_tool_calls": tool_calls,
        "total_active_time_seconds": active_time,
    })
}

fn session_list(sessions: &[Session]) -> Vec<Value> {
    sessions
        .iter()
        .map(|s| {
            json!({
                "session_id": s.session_id,
                "user_id": s.user_id,
                "start_time": s.start_time.to_rfc3339(),
                "end_time": s.end_time.to_rfc3339(),
                "cost_usd": s.total_cost_usd,
                "total_tokens": s.total_input_tokens
                    + s.total_output_tokens
                    + s.total_cache_read_tokens,
                "api_requests": s.api_request_count,
                "tool_calls": s.tool_call_count,
            })
        })
        .collect()
}
