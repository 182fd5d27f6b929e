//! OTLP/HTTP ingest handlers.
//!
//! Each handler decodes the protobuf export request, renders it to the
//! canonical OTLP JSON form, appends one line to the matching role file,
//! and returns the empty protobuf acknowledgement. Ingest always succeeds
//! as long as the disk accepts writes; nothing is aggregated here.

use crate::collector::writer::FileWriter;
use crate::error::AppError;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use opentelemetry_proto::tonic::collector::logs::v1::{
    ExportLogsServiceRequest, ExportLogsServiceResponse,
};
use opentelemetry_proto::tonic::collector::metrics::v1::{
    ExportMetricsServiceRequest, ExportMetricsServiceResponse,
};
use opentelemetry_proto::tonic::collector::trace::v1::{
    ExportTraceServiceRequest, ExportTraceServiceResponse,
};
use prost::Message;
use std::sync::Arc;

/// Shared state for the ingest handlers: one writer per role file.
#[derive(Clone)]
pub struct CollectorState {
    pub metrics: Arc<FileWriter>,
    pub logs: Arc<FileWriter>,
    pub traces: Arc<FileWriter>,
}

/// POST /v1/metrics
pub async fn ingest_metrics(
    State(state): State<CollectorState>,
    body: Bytes,
) -> Result<Response, AppError> {
    let request = ExportMetricsServiceRequest::decode(body.as_ref())
        .map_err(|e| AppError::BadRequest(format!("failed to decode metrics request: {}", e)))?;

    let line = serde_json::to_string(&request)?;
    state
        .metrics
        .write_line(&line)
        .await
        .map_err(|e| AppError::WriteError(e.to_string()))?;

    tracing::debug!(
        resource_metrics = request.resource_metrics.len(),
        "stored metrics export"
    );

    Ok(protobuf_response(
        ExportMetricsServiceResponse::default().encode_to_vec(),
    ))
}

/// POST /v1/logs
pub async fn ingest_logs(
    State(state): State<CollectorState>,
    body: Bytes,
) -> Result<Response, AppError> {
    let request = ExportLogsServiceRequest::decode(body.as_ref())
        .map_err(|e| AppError::BadRequest(format!("failed to decode logs request: {}", e)))?;

    let line = serde_json::to_string(&request)?;
    state
        .logs
        .write_line(&line)
        .await
        .map_err(|e| AppError::WriteError(e.to_string()))?;

    tracing::debug!(resource_logs = request.resource_logs.len(), "stored logs export");

    Ok(protobuf_response(
        ExportLogsServiceResponse::default().encode_to_vec(),
    ))
}

/// POST /v1/traces
pub async fn ingest_traces(
    State(state): State<CollectorState>,
    body: Bytes,
) -> Result<Response, AppError> {
    let request = ExportTraceServiceRequest::decode(body.as_ref())
        .map_err(|e| AppError::BadRequest(format!("failed to decode traces request: {}", e)))?;

    let line = serde_json::to_string(&request)?;
    state
        .traces
        .write_line(&line)
        .await
        .map_err(|e| AppError::WriteError(e.to_string()))?;

    tracing::debug!(
        resource_spans = request.resource_spans.len(),
        "stored traces export"
    );

    Ok(protobuf_response(
        ExportTraceServiceResponse::default().encode_to_vec(),
    ))
}

fn protobuf_response(bytes: Vec<u8>) -> Response {
    ([(header::CONTENT_TYPE, "application/x-protobuf")], bytes).into_response()
}
