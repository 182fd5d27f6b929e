//! Aggregation engine with write-back cache.
//!
//! Folds typed records into per-session summary state plus per-model and
//! per-tool dimension tables within each session. All state lives in three maps
//! behind a single reader/writer lock; a periodic flush upserts the maps
//! into the store. Cache entries are never evicted on flush failure, so
//! the next tick retries with the latest state.
//!
//! Prompt rows do not go through the cache: they are append-only and keyed
//! by `(session_id, timestamp)`, so they are written straight to the store.

use crate::aggregator::models::{LogRecord, MetricRecord, Session, SessionModel, SessionTool, TraceRecord};
use crate::aggregator::otlp::{attr_bool, attr_f64, attr_i64, attr_str, AttrMap, AttrValue};
use crate::aggregator::store::Store;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Prompt text producers substitute when capture is disabled.
const REDACTED_PROMPT: &str = "<REDACTED>";

/// Metric and log-event names, derived from the producer's namespace
/// prefix (`claude_code` by default) so the engine stays producer-agnostic.
#[derive(Debug, Clone)]
pub struct EventNames {
    pub cost_usage: String,
    pub token_usage: String,
    pub session_count: String,
    pub active_time: String,
    pub api_request: String,
    pub api_error: String,
    pub user_prompt: String,
    pub tool_decision: String,
    pub tool_result: String,
}

impl EventNames {
    pub fn with_prefix(prefix: &str) -> Self {
        Self {
            cost_usage: format!("{prefix}.cost.usage"),
            token_usage: format!("{prefix}.token.usage"),
            session_count: format!("{prefix}.session.count"),
            active_time: format!("{prefix}.active_time.total"),
            api_request: format!("{prefix}.api_request"),
            api_error: format!("{prefix}.api_error"),
            user_prompt: format!("{prefix}.user_prompt"),
            tool_decision: format!("{prefix}.tool_decision"),
            tool_result: format!("{prefix}.tool_result"),
        }
    }
}

#[derive(Default)]
struct Cache {
    sessions: HashMap<String, Session>,
    session_models: HashMap<String, HashMap<String, SessionModel>>,
    session_tools: HashMap<String, HashMap<String, SessionTool>>,
}

/// The aggregation engine. Shared between the processor (folding) and the
/// flush timer; both take the write lock, so folding and flushing are
/// serialized and counters never observe partial updates.
pub struct Engine {
    store: Arc<Store>,
    cache: RwLock<Cache>,
    events: EventNames,
}

impl Engine {
    pub fn new(store: Arc<Store>, event_prefix: &str) -> Self {
        Self {
            store,
            cache: RwLock::new(Cache::default()),
            events: EventNames::with_prefix(event_prefix),
        }
    }

    /// Fold a metric record into the cache. Records without a session id
    /// are dropped.
    pub async fn process_metric(&self, record: &MetricRecord) {
        if record.session_id.is_empty() {
            return;
        }

        let mut cache = self.cache.write().await;
        let Cache { sessions, session_models, .. } = &mut *cache;

        let session = touch_session(sessions, record.session_id.as_str(), record.timestamp);
        absorb_identity(session, &record.user_id, &record.organization_id, &record.service_name);
        absorb_environment(session, &record.attributes);

        let model = attr_str(&record.attributes, "model");

        if record.metric_name == self.events.cost_usage {
            let cost = record.value.as_f64();
            session.total_cost_usd += cost;
            if !model.is_empty() && cost > 0.0 {
                let entry = model_entry(session_models, &record.session_id, model);
                entry.cost_usd += cost;
                entry.request_count += 1;
            }
        } else if record.metric_name == self.events.token_usage {
            let tokens = record.value.as_i64();
            let token_type = attr_str(&record.attributes, "type");

            // Unknown token types are ignored.
            match token_type {
                "input" => session.total_input_tokens += tokens,
                "output" => session.total_output_tokens += tokens,
                "cacheRead" => session.total_cache_read_tokens += tokens,
                "cacheCreation" => session.total_cache_creation_tokens += tokens,
                _ => return,
            }

            if !model.is_empty() && tokens > 0 {
                let entry = model_entry(session_models, &record.session_id, model);
                match token_type {
                    "input" => entry.input_tokens += tokens,
                    "output" => entry.output_tokens += tokens,
                    "cacheRead" => entry.cache_read_tokens += tokens,
                    "cacheCreation" => entry.cache_creation_tokens += tokens,
                    _ => {}
                }
            }
        } else if record.metric_name == self.events.active_time {
            session.total_active_time_seconds += record.value.as_f64();
        } else if record.metric_name == self.events.session_count {
            // Session-start marker. Creation and the earliest-timestamp
            // rule in touch_session already cover it.
        }
    }

    /// Fold a log record into the cache, dispatching on the event name.
    ///
    /// The event name comes from the `event.name` attribute when present;
    /// otherwise the body text is matched by substring.
    pub async fn process_log(&self, record: &LogRecord) {
        if record.session_id.is_empty() {
            return;
        }

        let event = record
            .attributes
            .get("event.name")
            .and_then(AttrValue::as_str)
            .filter(|name| !name.is_empty())
            .unwrap_or(record.body.as_str());

        let mut prompt = None;

        {
            let mut cache = self.cache.write().await;
            let Cache { sessions, session_models, session_tools } = &mut *cache;

            let session = touch_session(sessions, record.session_id.as_str(), record.timestamp);
            absorb_identity(session, &record.user_id, &record.organization_id, &record.service_name);
            absorb_environment(session, &record.attributes);

            if event.contains(&self.events.api_request) {
                session.api_request_count += 1;

                let duration_ms = attr_f64(&record.attributes, "duration_ms");
                if duration_ms > 0.0 {
                    session.total_api_latency_ms += duration_ms;

                    let model = attr_str(&record.attributes, "model");
                    if !model.is_empty() {
                        let entry = model_entry(session_models, &record.session_id, model);
                        entry.total_latency_ms += duration_ms;
                        // Request count is advanced by cost.usage; the
                        // average only exists once a request was costed.
                        if entry.request_count > 0 {
                            entry.avg_latency_ms =
                                entry.total_latency_ms / entry.request_count as f64;
                        }
                    }
                }
            } else if event.contains(&self.events.api_error) {
                session.api_error_count += 1;
            } else if event.contains(&self.events.user_prompt) {
                session.user_prompt_count += 1;

                if let Some(text) = record.attributes.get("prompt").and_then(AttrValue::as_str) {
                    if text != REDACTED_PROMPT {
                        prompt = Some((record.session_id.clone(), text.to_string(), record.timestamp));
                    }
                }
            } else if event.contains(&self.events.tool_result) {
                let tool_name = attr_str(&record.attributes, "tool_name");
                if !tool_name.is_empty() {
                    session.tool_call_count += 1;

                    let success = attr_bool(&record.attributes, "success");
                    let duration_ms = attr_f64(&record.attributes, "duration_ms");
                    let decision_source = attr_str(&record.attributes, "decision_source");
                    let decision_type = attr_str(&record.attributes, "decision_type");
                    let result_size = attr_i64(&record.attributes, "tool_result_size_bytes");

                    let tool = tool_entry(session_tools, &record.session_id, tool_name);
                    tool.call_count += 1;
                    if success {
                        tool.success_count += 1;
                    } else {
                        tool.failure_count += 1;
                    }

                    if duration_ms > 0.0 {
                        tool.total_execution_time_ms += duration_ms;
                        tool.avg_duration_ms = tool.total_execution_time_ms / tool.call_count as f64;
                        // min_duration_ms == 0 means unset; the first
                        // positive duration claims it.
                        if tool.min_duration_ms == 0.0 || duration_ms < tool.min_duration_ms {
                            tool.min_duration_ms = duration_ms;
                        }
                        if duration_ms > tool.max_duration_ms {
                            tool.max_duration_ms = duration_ms;
                        }
                    }

                    if decision_type == "reject" {
                        tool.rejected_count += 1;
                    } else if decision_source == "config" {
                        tool.auto_approved_count += 1;
                    } else {
                        // user_temporary, user_permanent, and friends.
                        tool.user_approved_count += 1;
                    }

                    tool.total_result_size_bytes += result_size;
                }
            } else if event.contains(&self.events.tool_decision) {
                // Marks the tool as used; call counters only move on
                // tool_result.
                let tool_name = attr_str(&record.attributes, "tool_name");
                if !tool_name.is_empty() {
                    tool_entry(session_tools, &record.session_id, tool_name);
                }
            }
        }

        // Prompt rows bypass the cache; the unique (session_id, timestamp)
        // constraint makes concurrent replays safe.
        if let Some((session_id, text, timestamp)) = prompt {
            if let Err(e) = self
                .store
                .insert_session_prompt(&session_id, &text, timestamp)
                .await
            {
                tracing::error!(session_id = %session_id, error = %e, "failed to insert session prompt");
            }
        }
    }

    /// Fold a trace record: keeps the session's end_time fresh.
    pub async fn process_trace(&self, record: &TraceRecord) {
        if record.session_id.is_empty() {
            return;
        }

        let mut cache = self.cache.write().await;
        let session = touch_session(&mut cache.sessions, record.session_id.as_str(), record.timestamp);
        absorb_identity(session, &record.user_id, &record.organization_id, &record.service_name);
        absorb_environment(session, &record.attributes);
    }

    /// Upsert the entire cache into the store: sessions, then models, then
    /// tools. Upsert errors are logged and the entry retained; the next
    /// flush retries with the latest state.
    pub async fn flush(&self) {
        let mut cache = self.cache.write().await;
        let now = Utc::now();

        let mut flushed_sessions = 0usize;
        for session in cache.sessions.values_mut() {
            session.updated_at = now;
            match self.store.upsert_session(session).await {
                Ok(()) => flushed_sessions += 1,
                Err(e) => {
                    tracing::error!(session_id = %session.session_id, error = %e, "failed to flush session");
                }
            }
        }

        let mut flushed_models = 0usize;
        for models in cache.session_models.values() {
            for model in models.values() {
                match self.store.upsert_session_model(model).await {
                    Ok(()) => flushed_models += 1,
                    Err(e) => {
                        tracing::error!(
                            session_id = %model.session_id,
                            model = %model.model,
                            error = %e,
                            "failed to flush session model"
                        );
                    }
                }
            }
        }

        let mut flushed_tools = 0usize;
        for tools in cache.session_tools.values() {
            for tool in tools.values() {
                match self.store.upsert_session_tool(tool).await {
                    Ok(()) => flushed_tools += 1,
                    Err(e) => {
                        tracing::error!(
                            session_id = %tool.session_id,
                            tool_name = %tool.tool_name,
                            error = %e,
                            "failed to flush session tool"
                        );
                    }
                }
            }
        }

        tracing::debug!(
            sessions = flushed_sessions,
            models = flushed_models,
            tools = flushed_tools,
            "flushed aggregation cache"
        );
    }
}

/// Get or create the cached session and advance its time window:
/// `end_time` tracks the latest record, `start_time` the earliest.
fn touch_session<'a>(
    sessions: &'a mut HashMap<String, Session>,
    session_id: &str,
    timestamp: DateTime<Utc>,
) -> &'a mut Session {
    let session = sessions
        .entry(session_id.to_string())
        .or_insert_with(|| Session::new(session_id, timestamp));

    if timestamp > session.end_time {
        session.end_time = timestamp;
    }
    if timestamp.timestamp() > 0
        && (session.start_time.timestamp() <= 0 || timestamp < session.start_time)
    {
        session.start_time = timestamp;
    }
    session
}

/// Fill identifier fields that are still empty. Identifiers never change
/// within a session; the first record that carries one wins.
fn absorb_identity(session: &mut Session, user_id: &str, organization_id: &str, service_name: &str) {
    if session.user_id.is_empty() && !user_id.is_empty() {
        session.user_id = user_id.to_string();
    }
    if session.organization_id.is_empty() && !organization_id.is_empty() {
        session.organization_id = organization_id.to_string();
    }
    if session.client_name.is_empty() && !service_name.is_empty() {
        session.client_name = service_name.to_string();
    }
}

/// Fill environment fields that are still empty from the record's merged
/// attribute map. Not every record kind carries them.
fn absorb_environment(session: &mut Session, attrs: &AttrMap) {
    let fill = |field: &mut String, key: &str| {
        if field.is_empty() {
            if let Some(value) = attrs.get(key).and_then(AttrValue::as_str) {
                *field = value.to_string();
            }
        }
    };
    fill(&mut session.client_version, "service.version");
    fill(&mut session.terminal_type, "terminal.type");
    fill(&mut session.host_arch, "host.arch");
    fill(&mut session.os_type, "os.type");
    fill(&mut session.os_version, "os.version");
}

fn model_entry<'a>(
    models: &'a mut HashMap<String, HashMap<String, SessionModel>>,
    session_id: &str,
    model: &str,
) -> &'a mut SessionModel {
    models
        .entry(session_id.to_string())
        .or_default()
        .entry(model.to_string())
        .or_insert_with(|| SessionModel::new(session_id, model))
}

fn tool_entry<'a>(
    tools: &'a mut HashMap<String, HashMap<String, SessionTool>>,
    session_id: &str,
    tool_name: &str,
) -> &'a mut SessionTool {
    tools
        .entry(session_id.to_string())
        .or_default()
        .entry(tool_name.to_string())
        .or_insert_with(|| SessionTool::new(session_id, tool_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::models::MetricValue;
    use tempfile::TempDir;

    async fn create_test_engine() -> (Arc<Store>, Engine, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(Store::open(&dir.path().join("engine.db")).await.unwrap());
        let engine = Engine::new(store.clone(), "claude_code");
        (store, engine, dir)
    }

    fn ts(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    fn attrs(pairs: &[(&str, AttrValue)]) -> AttrMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn cost_record(session: &str, cost: f64, model: &str, when: i64) -> MetricRecord {
        MetricRecord {
            timestamp: ts(when),
            session_id: session.to_string(),
            user_id: "u1".to_string(),
            organization_id: "org1".to_string(),
            service_name: "claude-code".to_string(),
            metric_name: "claude_code.cost.usage".to_string(),
            value: MetricValue::Double(cost),
            attributes: attrs(&[("model", AttrValue::String(model.to_string()))]),
        }
    }

    fn token_record(session: &str, token_type: &str, count: i64, model: &str) -> MetricRecord {
        MetricRecord {
            timestamp: ts(1_700_000_010),
            session_id: session.to_string(),
            user_id: String::new(),
            organization_id: String::new(),
            service_name: String::new(),
            metric_name: "claude_code.token.usage".to_string(),
            value: MetricValue::Int(count),
            attributes: attrs(&[
                ("type", AttrValue::String(token_type.to_string())),
                ("model", AttrValue::String(model.to_string())),
            ]),
        }
    }

    fn log_record(session: &str, body: &str, attributes: AttrMap, when: i64) -> LogRecord {
        LogRecord {
            timestamp: ts(when),
            session_id: session.to_string(),
            user_id: String::new(),
            organization_id: String::new(),
            service_name: String::new(),
            severity_text: "INFO".to_string(),
            body: body.to_string(),
            attributes,
        }
    }

    fn tool_result(session: &str, tool: &str, success: bool, duration_ms: f64, when: i64) -> LogRecord {
        log_record(
            session,
            "claude_code.tool_result",
            attrs(&[
                ("tool_name", AttrValue::String(tool.to_string())),
                ("success", AttrValue::Bool(success)),
                ("duration_ms", AttrValue::Double(duration_ms)),
            ]),
            when,
        )
    }

    #[tokio::test]
    async fn cost_metrics_fold_into_session_and_model_totals() {
        let (store, engine, _dir) = create_test_engine().await;

        engine.process_metric(&cost_record("s1", 1.25, "claude-3-5-sonnet", 100)).await;
        engine.process_metric(&cost_record("s1", 0.75, "claude-3-5-sonnet", 200)).await;
        engine.flush().await;

        let session = store.get_session("s1").await.unwrap().unwrap();
        assert!((session.total_cost_usd - 2.0).abs() < 1e-9);

        let models = store.list_session_models("s1").await.unwrap();
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].model, "claude-3-5-sonnet");
        assert!((models[0].cost_usd - 2.0).abs() < 1e-9);
        assert_eq!(models[0].request_count, 2);
    }

    #[tokio::test]
    async fn token_metrics_select_bucket_by_type() {
        let (store, engine, _dir) = create_test_engine().await;

        engine.process_metric(&cost_record("s1", 1.25, "claude-3-5-sonnet", 100)).await;
        engine.process_metric(&token_record("s1", "input", 1000, "claude-3-5-sonnet")).await;
        engine.process_metric(&token_record("s1", "output", 500, "claude-3-5-sonnet")).await;
        engine.process_metric(&token_record("s1", "weird", 9999, "claude-3-5-sonnet")).await;
        engine.flush().await;

        let session = store.get_session("s1").await.unwrap().unwrap();
        assert_eq!(session.total_input_tokens, 1000);
        assert_eq!(session.total_output_tokens, 500);
        assert_eq!(session.total_cache_read_tokens, 0);

        let models = store.list_session_models("s1").await.unwrap();
        assert_eq!(models[0].input_tokens, 1000);
        assert_eq!(models[0].output_tokens, 500);
    }

    #[tokio::test]
    async fn tool_results_track_min_avg_max_with_zero_sentinel() {
        let (store, engine, _dir) = create_test_engine().await;

        engine.process_log(&tool_result("s1", "Bash", true, 45.2, 100)).await;
        engine.process_log(&tool_result("s1", "Bash", true, 120.8, 110)).await;
        engine.process_log(&tool_result("s1", "Bash", false, 12.3, 120)).await;
        engine.flush().await;

        let tools = store.list_session_tools("s1").await.unwrap();
        assert_eq!(tools.len(), 1);
        let tool = &tools[0];
        assert_eq!(tool.call_count, 3);
        assert_eq!(tool.success_count, 2);
        assert_eq!(tool.failure_count, 1);
        assert!((tool.min_duration_ms - 12.3).abs() < 1e-3);
        assert!((tool.max_duration_ms - 120.8).abs() < 1e-3);
        assert!((tool.avg_duration_ms - 59.433).abs() < 1e-3);

        let session = store.get_session("s1").await.unwrap().unwrap();
        assert_eq!(session.tool_call_count, 3);
    }

    #[tokio::test]
    async fn first_positive_duration_claims_min() {
        let (store, engine, _dir) = create_test_engine().await;

        // A zero duration leaves min unset.
        engine.process_log(&tool_result("s1", "Read", true, 0.0, 100)).await;
        engine.process_log(&tool_result("s1", "Read", true, 45.2, 110)).await;
        engine.process_log(&tool_result("s1", "Read", false, 12.3, 120)).await;
        engine.flush().await;

        let tools = store.list_session_tools("s1").await.unwrap();
        assert!((tools[0].min_duration_ms - 12.3).abs() < 1e-3);
        assert_eq!(tools[0].call_count, 3);
    }

    #[tokio::test]
    async fn decisions_partition_into_three_buckets() {
        let (store, engine, _dir) = create_test_engine().await;

        let decided = |decision_type: &str, decision_source: &str, when: i64| {
            log_record(
                "s1",
                "claude_code.tool_result",
                attrs(&[
                    ("tool_name", AttrValue::String("Edit".to_string())),
                    ("success", AttrValue::Bool(true)),
                    ("decision_type", AttrValue::String(decision_type.to_string())),
                    ("decision_source", AttrValue::String(decision_source.to_string())),
                ]),
                when,
            )
        };

        engine.process_log(&decided("accept", "config", 100)).await;
        engine.process_log(&decided("accept", "user_temporary", 110)).await;
        engine.process_log(&decided("reject", "user_temporary", 120)).await;
        engine.flush().await;

        let tools = store.list_session_tools("s1").await.unwrap();
        assert_eq!(tools[0].auto_approved_count, 1);
        assert_eq!(tools[0].user_approved_count, 1);
        assert_eq!(tools[0].rejected_count, 1);
    }

    #[tokio::test]
    async fn api_requests_accumulate_latency_and_errors_count() {
        let (store, engine, _dir) = create_test_engine().await;

        engine.process_metric(&cost_record("s1", 0.5, "claude-3-5-sonnet", 90)).await;

        let api_log = log_record(
            "s1",
            "claude_code.api_request",
            attrs(&[
                ("duration_ms", AttrValue::Double(123.45)),
                ("model", AttrValue::String("claude-3-5-sonnet".to_string())),
            ]),
            100,
        );
        engine.process_log(&api_log).await;
        engine.process_log(&log_record("s1", "claude_code.api_error", attrs(&[]), 110)).await;
        engine.flush().await;

        let session = store.get_session("s1").await.unwrap().unwrap();
        assert_eq!(session.api_request_count, 1);
        assert_eq!(session.api_error_count, 1);
        assert!((session.total_api_latency_ms - 123.45).abs() < 1e-9);

        let models = store.list_session_models("s1").await.unwrap();
        assert!((models[0].total_latency_ms - 123.45).abs() < 1e-9);
        assert!((models[0].avg_latency_ms - 123.45).abs() < 1e-9);
    }

    #[tokio::test]
    async fn event_name_attribute_wins_over_body() {
        let (store, engine, _dir) = create_test_engine().await;

        let record = log_record(
            "s1",
            "some opaque body text",
            attrs(&[("event.name", AttrValue::String("claude_code.api_error".to_string()))]),
            100,
        );
        engine.process_log(&record).await;
        engine.flush().await;

        let session = store.get_session("s1").await.unwrap().unwrap();
        assert_eq!(session.api_error_count, 1);
    }

    #[tokio::test]
    async fn prompts_bypass_cache_and_deduplicate() {
        let (store, engine, _dir) = create_test_engine().await;

        let prompt = |text: &str, when: i64| {
            log_record(
                "s1",
                "claude_code.user_prompt",
                attrs(&[("prompt", AttrValue::String(text.to_string()))]),
                when,
            )
        };

        engine.process_log(&prompt("fix the tests", 100)).await;
        engine.process_log(&prompt("fix the tests", 100)).await; // replay
        engine.process_log(&prompt(REDACTED_PROMPT, 200)).await;

        // Prompts are visible before any flush.
        let prompts = store.list_session_prompts("s1", 10).await.unwrap();
        assert_eq!(prompts.len(), 1);
        assert_eq!(prompts[0].prompt_text, "fix the tests");

        engine.flush().await;
        let session = store.get_session("s1").await.unwrap().unwrap();
        assert_eq!(session.user_prompt_count, 3);
    }

    #[tokio::test]
    async fn records_without_session_id_are_dropped() {
        let (store, engine, _dir) = create_test_engine().await;

        engine.process_metric(&cost_record("", 5.0, "m", 100)).await;
        engine.process_log(&log_record("", "claude_code.api_request", attrs(&[]), 100)).await;
        engine.flush().await;

        assert!(store.list_sessions_by_user("u1", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn session_window_tracks_earliest_and_latest_timestamps() {
        let (store, engine, _dir) = create_test_engine().await;

        engine.process_metric(&cost_record("s1", 0.1, "m", 500)).await;
        engine.process_metric(&cost_record("s1", 0.1, "m", 200)).await;
        engine.process_metric(&cost_record("s1", 0.1, "m", 900)).await;
        engine.flush().await;

        let session = store.get_session("s1").await.unwrap().unwrap();
        assert_eq!(session.start_time.timestamp(), 200);
        assert_eq!(session.end_time.timestamp(), 900);
    }

    #[tokio::test]
    async fn trace_records_keep_end_time_fresh() {
        let (store, engine, _dir) = create_test_engine().await;

        engine.process_metric(&cost_record("s1", 0.1, "m", 100)).await;
        engine
            .process_trace(&TraceRecord {
                timestamp: ts(400),
                session_id: "s1".to_string(),
                user_id: String::new(),
                organization_id: String::new(),
                service_name: String::new(),
                span_name: "api_call".to_string(),
                duration_ms: 12.0,
                attributes: attrs(&[]),
            })
            .await;
        engine.flush().await;

        let session = store.get_session("s1").await.unwrap().unwrap();
        assert_eq!(session.end_time.timestamp(), 400);
    }

    #[tokio::test]
    async fn flush_is_idempotent() {
        let (store, engine, _dir) = create_test_engine().await;

        engine.process_metric(&cost_record("s1", 1.25, "m", 100)).await;
        engine.process_log(&tool_result("s1", "Bash", true, 10.0, 110)).await;

        engine.flush().await;
        let first = store.get_session("s1").await.unwrap().unwrap();
        let first_tools = store.list_session_tools("s1").await.unwrap();

        engine.flush().await;
        let second = store.get_session("s1").await.unwrap().unwrap();
        let second_tools = store.list_session_tools("s1").await.unwrap();

        assert_eq!(first.total_cost_usd, second.total_cost_usd);
        assert_eq!(first.tool_call_count, second.tool_call_count);
        assert_eq!(first.start_time, second.start_time);
        assert_eq!(first_tools[0].call_count, second_tools[0].call_count);
        assert_eq!(first_tools[0].avg_duration_ms, second_tools[0].avg_duration_ms);
    }

    #[tokio::test]
    async fn environment_fields_backfill_from_attributes() {
        let (store, engine, _dir) = create_test_engine().await;

        let mut record = cost_record("s1", 0.1, "m", 100);
        record.attributes.insert("terminal.type".to_string(), AttrValue::String("iTerm2".to_string()));
        record.attributes.insert("host.arch".to_string(), AttrValue::String("arm64".to_string()));
        record.attributes.insert("os.type".to_string(), AttrValue::String("darwin".to_string()));
        engine.process_metric(&record).await;
        engine.flush().await;

        let session = store.get_session("s1").await.unwrap().unwrap();
        assert_eq!(session.terminal_type, "iTerm2");
        assert_eq!(session.host_arch, "arm64");
        assert_eq!(session.os_type, "darwin");
        assert_eq!(session.client_name, "claude-code");
    }
}
