//! Domain types shared by the extractor, engine, and store.
//!
//! All timestamps are `chrono::DateTime<Utc>` in memory and Unix seconds in
//! the database. Token counts are 64-bit; monetary values are f64 USD.

use crate::aggregator::otlp::AttrMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-session summary counters, keyed by session id.
///
/// Created on the first record that references the session. `start_time`
/// tracks the earliest observed record timestamp; `end_time` the latest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub organization_id: String,
    pub user_id: String,

    // Environment strings, captured from record attributes and back-filled
    // while empty.
    pub client_name: String,
    pub client_version: String,
    pub terminal_type: String,
    pub host_arch: String,
    pub os_type: String,
    pub os_version: String,

    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,

    pub total_cost_usd: f64,
    pub total_input_tokens: i64,
    pub total_output_tokens: i64,
    pub total_cache_read_tokens: i64,
    pub total_cache_creation_tokens: i64,
    pub total_active_time_seconds: f64,

    pub api_request_count: i64,
    pub api_error_count: i64,
    pub user_prompt_count: i64,
    pub tool_call_count: i64,

    pub total_api_latency_ms: f64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// A zeroed session shell for a newly observed id.
    pub fn new(session_id: &str, timestamp: DateTime<Utc>) -> Self {
        Self {
            session_id: session_id.to_string(),
            organization_id: String::new(),
            user_id: String::new(),
            client_name: String::new(),
            client_version: String::new(),
            terminal_type: String::new(),
            host_arch: String::new(),
            os_type: String::new(),
            os_version: String::new(),
            start_time: timestamp,
            end_time: timestamp,
            total_cost_usd: 0.0,
            total_input_tokens: 0,
            total_output_tokens: 0,
            total_cache_read_tokens: 0,
            total_cache_creation_tokens: 0,
            total_active_time_seconds: 0.0,
            api_request_count: 0,
            api_error_count: 0,
            user_prompt_count: 0,
            tool_call_count: 0,
            total_api_latency_ms: 0.0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }
}

/// Per-model totals within a session, keyed by `(session_id, model)`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionModel {
    pub session_id: String,
    pub model: String,
    pub cost_usd: f64,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cache_read_tokens: i64,
    pub cache_creation_tokens: i64,
    pub request_count: i64,
    pub total_latency_ms: f64,
    pub avg_latency_ms: f64,
}

impl SessionModel {
    pub fn new(session_id: &str, model: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            model: model.to_string(),
            ..Default::default()
        }
    }
}

/// Per-tool statistics within a session, keyed by `(session_id, tool_name)`.
///
/// `min_duration_ms == 0` means "no positive duration observed yet"; the
/// first positive duration sets it. A genuine zero-length measurement is
/// indistinguishable from unset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionTool {
    pub session_id: String,
    pub tool_name: String,
    pub call_count: i64,
    pub success_count: i64,
    pub failure_count: i64,
    pub total_execution_time_ms: f64,
    pub min_duration_ms: f64,
    pub avg_duration_ms: f64,
    pub max_duration_ms: f64,

    // Decision counters classify calls along a separate axis and need not
    // cover every call.
    pub auto_approved_count: i64,
    pub user_approved_count: i64,
    pub rejected_count: i64,
    pub total_result_size_bytes: i64,
}

impl SessionTool {
    pub fn new(session_id: &str, tool_name: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            tool_name: tool_name.to_string(),
            ..Default::default()
        }
    }
}

/// A user prompt captured from a log record. Append-only, unique on
/// `(session_id, timestamp)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionPrompt {
    pub id: i64,
    pub session_id: String,
    pub prompt_text: String,
    pub prompt_length: i64,
    pub timestamp: DateTime<Utc>,
}

/// The processing cursor for one watched file.
///
/// `inode` identifies the file the cursor was taken against; 0 means
/// unknown (no row yet, or a platform without inodes).
#[derive(Debug, Clone, Default)]
pub struct ProcessingState {
    pub file_name: String,
    pub last_byte_offset: i64,
    pub last_processed_time: DateTime<Utc>,
    pub file_size_bytes: i64,
    pub inode: u64,
    pub updated_at: DateTime<Utc>,
}

impl ProcessingState {
    /// The zero-valued cursor used when no row exists for a file.
    pub fn empty(file_name: &str) -> Self {
        Self {
            file_name: file_name.to_string(),
            ..Default::default()
        }
    }
}

/// A metric value as it appears on an OTLP data point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    Int(i64),
    Double(f64),
}

impl MetricValue {
    pub fn as_f64(self) -> f64 {
        match self {
            Self::Int(v) => v as f64,
            Self::Double(v) => v,
        }
    }

    pub fn as_i64(self) -> i64 {
        match self {
            Self::Int(v) => v,
            Self::Double(v) => v as i64,
        }
    }
}

/// One metric data point with its merged attribute map.
#[derive(Debug, Clone)]
pub struct MetricRecord {
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub user_id: String,
    pub organization_id: String,
    pub service_name: String,
    pub metric_name: String,
    pub value: MetricValue,
    pub attributes: AttrMap,
}

/// One log record with its merged attribute map.
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub user_id: String,
    pub organization_id: String,
    pub service_name: String,
    pub severity_text: String,
    pub body: String,
    pub attributes: AttrMap,
}

/// One span, reduced to the fields the engine cares about.
#[derive(Debug, Clone)]
pub struct TraceRecord {
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub user_id: String,
    pub organization_id: String,
    pub service_name: String,
    pub span_name: String,
    pub duration_ms: f64,
    pub attributes: AttrMap,
}

/// Cross-session totals for one model, produced by a grouped store read.
#[derive(Debug, Clone, Serialize)]
pub struct ModelAggregate {
    pub model: String,
    pub total_sessions: i64,
    pub total_cost_usd: f64,
    pub total_requests: i64,
    pub total_input_tokens: i64,
    pub total_output_tokens: i64,
    pub avg_latency_ms: f64,
}

/// Cross-session totals for one tool, produced by a grouped store read.
#[derive(Debug, Clone, Serialize)]
pub struct ToolAggregate {
    pub tool_name: String,
    pub total_calls: i64,
    pub total_successes: i64,
    pub total_failures: i64,
    pub success_rate: f64,
    pub avg_duration_ms: f64,
    pub sessions_used_in: i64,
}
