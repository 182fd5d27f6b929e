//! OTLP envelope extraction.
//!
//! Pure functions over decoded OTLP export JSON. Three rules live here and
//! nowhere else:
//!
//! - **Attribute precedence**: data-point / log-record attributes override
//!   resource attributes. In practice the identifiers (`session.id`,
//!   `user.id`, `organization.id`) arrive at the data-point level.
//! - **Value-encoding tolerance**: attribute values may be tagged wrappers
//!   (`{"stringValue": ...}`, `{"intValue": 7}` or `{"intValue": "7"}`,
//!   `{"doubleValue": ...}`, `{"boolValue": ...}`) or raw primitives, and
//!   numeric fields additionally accept string spellings.
//! - **Emission**: only `sum` metrics emit records; records without a
//!   session id are still emitted (the engine drops them).

use crate::aggregator::models::{LogRecord, MetricRecord, MetricValue, TraceRecord};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;

/// Attribute keys the extractor resolves into record identifier fields.
pub const SESSION_ID_KEY: &str = "session.id";
pub const USER_ID_KEY: &str = "user.id";
pub const ORGANIZATION_ID_KEY: &str = "organization.id";
pub const SERVICE_NAME_KEY: &str = "service.name";

/// A typed attribute value, materialized early from the OTLP wire form.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    String(String),
    Int(i64),
    Double(f64),
    Bool(bool),
}

pub type AttrMap = HashMap<String, AttrValue>;

impl AttrValue {
    /// Parse either a tagged value object or a raw JSON primitive.
    pub fn from_json(value: &Value) -> Option<AttrValue> {
        match value {
            Value::String(s) => Some(AttrValue::String(s.clone())),
            Value::Bool(b) => Some(AttrValue::Bool(*b)),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(AttrValue::Int(i))
                } else {
                    n.as_f64().map(AttrValue::Double)
                }
            }
            Value::Object(map) => {
                if let Some(s) = map.get("stringValue").and_then(Value::as_str) {
                    Some(AttrValue::String(s.to_string()))
                } else if let Some(v) = map.get("intValue") {
                    // intValue is serialized as a JSON string for 64-bit
                    // safety, but some producers send a bare number.
                    match v {
                        Value::String(s) => s.parse().ok().map(AttrValue::Int),
                        Value::Number(n) => {
                            n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)).map(AttrValue::Int)
                        }
                        _ => None,
                    }
                } else if let Some(v) = map.get("doubleValue") {
                    match v {
                        Value::String(s) => s.parse().ok().map(AttrValue::Double),
                        Value::Number(n) => n.as_f64().map(AttrValue::Double),
                        _ => None,
                    }
                } else if let Some(v) = map.get("boolValue") {
                    match v {
                        Value::Bool(b) => Some(AttrValue::Bool(*b)),
                        Value::String(s) => Some(AttrValue::Bool(s == "true" || s == "1")),
                        _ => None,
                    }
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    /// The string form, or `None` for non-string values.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Coercing float accessor: ints widen, string spellings parse.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttrValue::Double(v) => Some(*v),
            AttrValue::Int(v) => Some(*v as f64),
            AttrValue::String(s) => s.trim().parse().ok(),
            AttrValue::Bool(_) => None,
        }
    }

    /// Coercing integer accessor: doubles truncate, string spellings parse.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            AttrValue::Int(v) => Some(*v),
            AttrValue::Double(v) => Some(*v as i64),
            AttrValue::String(s) => s.trim().parse().ok(),
            AttrValue::Bool(_) => None,
        }
    }

    /// Coercing bool accessor: accepts `"true"` / `"1"` string spellings.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttrValue::Bool(b) => Some(*b),
            AttrValue::String(s) => Some(s == "true" || s == "1"),
            _ => None,
        }
    }
}

/// Typed lookup helpers over a merged attribute map.
pub fn attr_str<'a>(attrs: &'a AttrMap, key: &str) -> &'a str {
    attrs.get(key).and_then(AttrValue::as_str).unwrap_or("")
}

pub fn attr_f64(attrs: &AttrMap, key: &str) -> f64 {
    attrs.get(key).and_then(AttrValue::as_f64).unwrap_or(0.0)
}

pub fn attr_i64(attrs: &AttrMap, key: &str) -> i64 {
    attrs.get(key).and_then(AttrValue::as_i64).unwrap_or(0)
}

pub fn attr_bool(attrs: &AttrMap, key: &str) -> bool {
    attrs.get(key).and_then(AttrValue::as_bool).unwrap_or(false)
}

/// Parse an OTLP attribute list (`[{"key": ..., "value": {...}}, ...]`).
fn parse_attribute_list(list: Option<&Value>) -> AttrMap {
    let mut attrs = AttrMap::new();
    let Some(Value::Array(items)) = list else {
        return attrs;
    };
    for item in items {
        let Some(key) = item.get("key").and_then(Value::as_str) else {
            continue;
        };
        let Some(value) = item.get("value").and_then(AttrValue::from_json) else {
            continue;
        };
        attrs.insert(key.to_string(), value);
    }
    attrs
}

/// Resource-level attributes of a `resourceMetrics` / `resourceLogs` /
/// `resourceSpans` block.
fn resource_attributes(block: &Value) -> AttrMap {
    parse_attribute_list(block.get("resource").and_then(|r| r.get("attributes")))
}

/// Merge resource and record-level attributes; record level wins.
fn merge_attributes(resource: &AttrMap, record: AttrMap) -> AttrMap {
    let mut merged = resource.clone();
    merged.extend(record);
    merged
}

/// Parse a `timeUnixNano` field, which arrives as a decimal string in
/// protojson but may be a bare number from other producers.
fn parse_unix_nanos(value: Option<&Value>) -> DateTime<Utc> {
    let nanos = match value {
        Some(Value::String(s)) => s.trim().parse::<i64>().unwrap_or(0),
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)).unwrap_or(0),
        _ => 0,
    };
    DateTime::from_timestamp_nanos(nanos)
}

/// Extract every `sum` data point from a metrics envelope.
pub fn extract_metric_records(envelope: &Value) -> Vec<MetricRecord> {
    let mut records = Vec::new();
    let Some(Value::Array(resource_metrics)) = envelope.get("resourceMetrics") else {
        return records;
    };

    for rm in resource_metrics {
        let resource_attrs = resource_attributes(rm);
        for sm in iter_array(rm.get("scopeMetrics")) {
            for metric in iter_array(sm.get("metrics")) {
                extract_sum_data_points(metric, &resource_attrs, &mut records);
            }
        }
    }

    records
}

fn extract_sum_data_points(metric: &Value, resource_attrs: &AttrMap, out: &mut Vec<MetricRecord>) {
    let Some(name) = metric.get("name").and_then(Value::as_str) else {
        return;
    };
    // Gauges and histograms may be present but carry nothing we aggregate.
    let Some(sum) = metric.get("sum") else {
        return;
    };

    for dp in iter_array(sum.get("dataPoints")) {
        let point_attrs = parse_attribute_list(dp.get("attributes"));
        let attrs = merge_attributes(resource_attrs, point_attrs);

        let value = if let Some(v) = dp.get("asInt") {
            match v {
                Value::String(s) => MetricValue::Int(s.trim().parse().unwrap_or(0)),
                Value::Number(n) => MetricValue::Int(n.as_i64().unwrap_or(0)),
                _ => continue,
            }
        } else if let Some(v) = dp.get("asDouble") {
            match v.as_f64() {
                Some(d) => MetricValue::Double(d),
                None => continue,
            }
        } else {
            continue;
        };

        out.push(MetricRecord {
            timestamp: parse_unix_nanos(dp.get("timeUnixNano")),
            session_id: attr_str(&attrs, SESSION_ID_KEY).to_string(),
            user_id: attr_str(&attrs, USER_ID_KEY).to_string(),
            organization_id: attr_str(&attrs, ORGANIZATION_ID_KEY).to_string(),
            service_name: attr_str(&attrs, SERVICE_NAME_KEY).to_string(),
            metric_name: name.to_string(),
            value,
            attributes: attrs,
        });
    }
}

/// Extract every log record from a logs envelope.
pub fn extract_log_records(envelope: &Value) -> Vec<LogRecord> {
    let mut records = Vec::new();
    let Some(Value::Array(resource_logs)) = envelope.get("resourceLogs") else {
        return records;
    };

    for rl in resource_logs {
        let resource_attrs = resource_attributes(rl);
        for sl in iter_array(rl.get("scopeLogs")) {
            for lr in iter_array(sl.get("logRecords")) {
                let log_attrs = parse_attribute_list(lr.get("attributes"));
                let attrs = merge_attributes(&resource_attrs, log_attrs);

                let body = lr
                    .get("body")
                    .and_then(AttrValue::from_json)
                    .and_then(|v| v.as_str().map(str::to_string))
                    .unwrap_or_default();

                records.push(LogRecord {
                    timestamp: parse_unix_nanos(lr.get("timeUnixNano")),
                    session_id: attr_str(&attrs, SESSION_ID_KEY).to_string(),
                    user_id: attr_str(&attrs, USER_ID_KEY).to_string(),
                    organization_id: attr_str(&attrs, ORGANIZATION_ID_KEY).to_string(),
                    service_name: attr_str(&attrs, SERVICE_NAME_KEY).to_string(),
                    severity_text: lr
                        .get("severityText")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    body,
                    attributes: attrs,
                });
            }
        }
    }

    records
}

/// Extract every span from a traces envelope.
///
/// Spans carry no per-record identifier overrides; only resource attributes
/// apply.
pub fn extract_trace_records(envelope: &Value) -> Vec<TraceRecord> {
    let mut records = Vec::new();
    let Some(Value::Array(resource_spans)) = envelope.get("resourceSpans") else {
        return records;
    };

    for rs in resource_spans {
        let attrs = resource_attributes(rs);
        for ss in iter_array(rs.get("scopeSpans")) {
            for span in iter_array(ss.get("spans")) {
                let Some(name) = span.get("name").and_then(Value::as_str) else {
                    continue;
                };

                let start = parse_unix_nanos(span.get("startTimeUnixNano"));
                let end = parse_unix_nanos(span.get("endTimeUnixNano"));
                let duration_ms = (end - start)
                    .num_nanoseconds()
                    .map(|n| n as f64 / 1e6)
                    .unwrap_or(0.0);

                records.push(TraceRecord {
                    timestamp: start,
                    session_id: attr_str(&attrs, SESSION_ID_KEY).to_string(),
                    user_id: attr_str(&attrs, USER_ID_KEY).to_string(),
                    organization_id: attr_str(&attrs, ORGANIZATION_ID_KEY).to_string(),
                    service_name: attr_str(&attrs, SERVICE_NAME_KEY).to_string(),
                    span_name: name.to_string(),
                    duration_ms,
                    attributes: attrs.clone(),
                });
            }
        }
    }

    records
}

fn iter_array(value: Option<&Value>) -> std::slice::Iter<'_, Value> {
    match value {
        Some(Value::Array(items)) => items.iter(),
        _ => [].iter(),
    }
}
