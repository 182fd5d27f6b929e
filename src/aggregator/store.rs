//! SQLite persistence for session aggregates and processing cursors.
//!
//! This module provides async database operations with:
//! - Connection pooling
//! - Ordered migrations at open time, with adoption of legacy databases
//! - Idempotent keyed upserts for every aggregate table
//! - WAL mode for concurrent reads/writes
//!
//! All timestamps are stored as Unix seconds.

use crate::aggregator::models::{
    ModelAggregate, ProcessingState, Session, SessionModel, SessionPrompt, SessionTool,
    ToolAggregate,
};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::path::Path;
use std::time::Duration;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Durable store handle.
///
/// Supports concurrent readers and a single writer (SQLite WAL). Every
/// write is durable on return.
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if missing) the database at `db_path` and bring the
    /// schema up to date.
    ///
    /// A migration failure here is fatal: the process must not run
    /// against a partially migrated schema.
    pub async fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create database directory {:?}", parent))?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(30))
            .pragma("synchronous", "NORMAL")
            .pragma("temp_store", "memory");

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(options)
            .await
            .with_context(|| format!("failed to open database {:?}", db_path))?;

        Self::adopt_legacy_schema(&pool).await?;

        MIGRATOR
            .run(&pool)
            .await
            .context("failed to run database migrations")?;

        tracing::info!(db_path = %db_path.display(), "database migrations completed");

        Ok(Self { pool })
    }

    /// Adopt a database created before migration bookkeeping existed.
    ///
    /// If the aggregate tables are present but the migration table is not,
    /// the earliest migration is recorded as already applied so the
    /// migrator only applies what came after it.
    async fn adopt_legacy_schema(pool: &SqlitePool) -> Result<()> {
        let has_tables: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'sessions'",
        )
        .fetch_one(pool)
        .await?;

        let has_marker: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = '_sqlx_migrations'",
        )
        .fetch_one(pool)
        .await?;

        if has_tables == 0 || has_marker > 0 {
            return Ok(());
        }

        let Some(first) = MIGRATOR.migrations.first() else {
            return Ok(());
        };

        tracing::warn!(
            version = first.version,
            "legacy database detected, recording initial migration as applied"
        );

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS _sqlx_migrations (
                version BIGINT PRIMARY KEY,
                description TEXT NOT NULL,
                installed_on TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                success BOOLEAN NOT NULL,
                checksum BLOB NOT NULL,
                execution_time BIGINT NOT NULL
            )",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "INSERT INTO _sqlx_migrations (version, description, success, checksum, execution_time)
             VALUES (?, ?, TRUE, ?, 0)",
        )
        .bind(first.version)
        .bind(first.description.as_ref())
        .bind(first.checksum.as_ref())
        .execute(pool)
        .await
        .context("failed to record initial migration for legacy database")?;

        Ok(())
    }

    /// Close the connection pool, blocking until checkpoints complete.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Insert or update a session. On conflict, `start_time` and
    /// `created_at` keep their inserted values; everything else is
    /// overwritten from the caller's state.
    pub async fn upsert_session(&self, session: &Session) -> Result<()> {
        sqlx::query(
            "INSERT INTO sessions (
                session_id, organization_id, user_id,
                client_name, client_version, terminal_type, host_arch, os_type, os_version,
                start_time, end_time,
                total_cost_usd, total_input_tokens, total_output_tokens,
                total_cache_read_tokens, total_cache_creation_tokens, total_active_time_seconds,
                api_request_count, api_error_count, user_prompt_count, tool_call_count,
                total_api_latency_ms, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(session_id) DO UPDATE SET
                organization_id = excluded.organization_id,
                user_id = excluded.user_id,
                client_name = excluded.client_name,
                client_version = excluded.client_version,
                terminal_type = excluded.terminal_type,
                host_arch = excluded.host_arch,
                os_type = excluded.os_type,
                os_version = excluded.os_version,
                end_time = excluded.end_time,
                total_cost_usd = excluded.total_cost_usd,
                total_input_tokens = excluded.total_input_tokens,
                total_output_tokens = excluded.total_output_tokens,
                total_cache_read_tokens = excluded.total_cache_read_tokens,
                total_cache_creation_tokens = excluded.total_cache_creation_tokens,
                total_active_time_seconds = excluded.total_active_time_seconds,
                api_request_count = excluded.api_request_count,
                api_error_count = excluded.api_error_count,
                user_prompt_count = excluded.user_prompt_count,
                tool_call_count = excluded.tool_call_count,
                total_api_latency_ms = excluded.total_api_latency_ms,
                updated_at = excluded.updated_at",
        )
        .bind(&session.session_id)
        .bind(&session.organization_id)
        .bind(&session.user_id)
        .bind(&session.client_name)
        .bind(&session.client_version)
        .bind(&session.terminal_type)
        .bind(&session.host_arch)
        .bind(&session.os_type)
        .bind(&session.os_version)
        .bind(session.start_time.timestamp())
        .bind(session.end_time.timestamp())
        .bind(session.total_cost_usd)
        .bind(session.total_input_tokens)
        .bind(session.total_output_tokens)
        .bind(session.total_cache_read_tokens)
        .bind(session.total_cache_creation_tokens)
        .bind(session.total_active_time_seconds)
        .bind(session.api_request_count)
        .bind(session.api_error_count)
        .bind(session.user_prompt_count)
        .bind(session.tool_call_count)
        .bind(session.total_api_latency_ms)
        .bind(session.created_at.timestamp())
        .bind(session.updated_at.timestamp())
        .execute(&self.pool)
        .await
        .context("failed to upsert session")?;

        Ok(())
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        let row = sqlx::query("SELECT * FROM sessions WHERE session_id = ?")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| session_from_row(&r)))
    }

    /// Sessions for a user, most recently started first.
    pub async fn list_sessions_by_user(&self, user_id: &str, limit: i64) -> Result<Vec<Session>> {
        let rows = sqlx::query(
            "SELECT * FROM sessions WHERE user_id = ? ORDER BY start_time DESC LIMIT ?",
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(session_from_row).collect())
    }

    /// Sessions for an organization, most recently started first.
    pub async fn list_sessions_by_org(&self, org_id: &str, limit: i64) -> Result<Vec<Session>> {
        let rows = sqlx::query(
            "SELECT * FROM sessions WHERE organization_id = ? ORDER BY start_time DESC LIMIT ?",
        )
        .bind(org_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(session_from_row).collect())
    }

    pub async fn upsert_session_model(&self, model: &SessionModel) -> Result<()> {
        sqlx::query(
            "INSERT INTO session_models (
                session_id, model, cost_usd, input_tokens, output_tokens,
                cache_read_tokens, cache_creation_tokens, request_count,
                total_latency_ms, avg_latency_ms
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(session_id, model) DO UPDATE SET
                cost_usd = excluded.cost_usd,
                input_tokens = excluded.input_tokens,
                output_tokens = excluded.output_tokens,
                cache_read_tokens = excluded.cache_read_tokens,
                cache_creation_tokens = excluded.cache_creation_tokens,
                request_count = excluded.request_count,
                total_latency_ms = excluded.total_latency_ms,
                avg_latency_ms = excluded.avg_latency_ms",
        )
        .bind(&model.session_id)
        .bind(&model.model)
        .bind(model.cost_usd)
        .bind(model.input_tokens)
        .bind(model.output_tokens)
        .bind(model.cache_read_tokens)
        .bind(model.cache_creation_tokens)
        .bind(model.request_count)
        .bind(model.total_latency_ms)
        .bind(model.avg_latency_ms)
        .execute(&self.pool)
        .await
        .context("failed to upsert session model")?;

        Ok(())
    }

    /// Per-model rows for a session, highest spend first.
    pub async fn list_session_models(&self, session_id: &str) -> Result<Vec<SessionModel>> {
        let rows = sqlx::query(
            "SELECT * FROM session_models WHERE session_id = ? ORDER BY cost_usd DESC",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|r| SessionModel {
                session_id: r.get("session_id"),
                model: r.get("model"),
                cost_usd: r.get("cost_usd"),
                input_tokens: r.get("input_tokens"),
                output_tokens: r.get("output_tokens"),
                cache_read_tokens: r.get("cache_read_tokens"),
                cache_creation_tokens: r.get("cache_creation_tokens"),
                request_count: r.get("request_count"),
                total_latency_ms: r.get("total_latency_ms"),
                avg_latency_ms: r.get("avg_latency_ms"),
            })
            .collect())
    }

    pub async fn upsert_session_tool(&self, tool: &SessionTool) -> Result<()> {
        sqlx::query(
            "INSERT INTO session_tools (
                session_id, tool_name, call_count, success_count, failure_count,
                total_execution_time_ms, min_duration_ms, avg_duration_ms, max_duration_ms,
                auto_approved_count, user_approved_count, rejected_count, total_result_size_bytes
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(session_id, tool_name) DO UPDATE SET
                call_count = excluded.call_count,
                success_count = excluded.success_count,
                failure_count = excluded.failure_count,
                total_execution_time_ms = excluded.total_execution_time_ms,
                min_duration_ms = excluded.min_duration_ms,
                avg_duration_ms = excluded.avg_duration_ms,
                max_duration_ms = excluded.max_duration_ms,
                auto_approved_count = excluded.auto_approved_count,
                user_approved_count = excluded.user_approved_count,
                rejected_count = excluded.rejected_count,
                total_result_size_bytes = excluded.total_result_size_bytes",
        )
        .bind(&tool.session_id)
        .bind(&tool.tool_name)
        .bind(tool.call_count)
        .bind(tool.success_count)
        .bind(tool.failure_count)
        .bind(tool.total_execution_time_ms)
        .bind(tool.min_duration_ms)
        .bind(tool.avg_duration_ms)
        .bind(tool.max_duration_ms)
        .bind(tool.auto_approved_count)
        .bind(tool.user_approved_count)
        .bind(tool.rejected_count)
        .bind(tool.total_result_size_bytes)
        .execute(&self.pool)
        .await
        .context("failed to upsert session tool")?;

        Ok(())
    }

    /// Per-tool rows for a session, most called first.
    pub async fn list_session_tools(&self, session_id: &str) -> Result<Vec<SessionTool>> {
        let rows = sqlx::query(
            "SELECT * FROM session_tools WHERE session_id = ? ORDER BY call_count DESC",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|r| SessionTool {
                session_id: r.get("session_id"),
                tool_name: r.get("tool_name"),
                call_count: r.get("call_count"),
                success_count: r.get("success_count"),
                failure_count: r.get("failure_count"),
                total_execution_time_ms: r.get("total_execution_time_ms"),
                min_duration_ms: r.get("min_duration_ms"),
                avg_duration_ms: r.get("avg_duration_ms"),
                max_duration_ms: r.get("max_duration_ms"),
                auto_approved_count: r.get("auto_approved_count"),
                user_approved_count: r.get("user_approved_count"),
                rejected_count: r.get("rejected_count"),
                total_result_size_bytes: r.get("total_result_size_bytes"),
            })
            .collect())
    }

    /// Insert a prompt row. A duplicate `(session_id, timestamp)` is a
    /// replay and is silently ignored.
    pub async fn insert_session_prompt(
        &self,
        session_id: &str,
        prompt_text: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO session_prompts (session_id, prompt_text, prompt_length, timestamp)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(session_id, timestamp) DO NOTHING",
        )
        .bind(session_id)
        .bind(prompt_text)
        .bind(prompt_text.chars().count() as i64)
        .bind(timestamp.timestamp())
        .execute(&self.pool)
        .await
        .context("failed to insert session prompt")?;

        Ok(())
    }

    /// Prompts for a session, newest first.
    pub async fn list_session_prompts(
        &self,
        session_id: &str,
        limit: i64,
    ) -> Result<Vec<SessionPrompt>> {
        let rows = sqlx::query(
            "SELECT id, session_id, prompt_text, prompt_length, timestamp
             FROM session_prompts WHERE session_id = ?
             ORDER BY timestamp DESC LIMIT ?",
        )
        .bind(session_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|r| SessionPrompt {
                id: r.get("id"),
                session_id: r.get("session_id"),
                prompt_text: r.get("prompt_text"),
                prompt_length: r.get("prompt_length"),
                timestamp: unix_ts(r.get("timestamp")),
            })
            .collect())
    }

    /// The processing cursor for a file. A missing row yields the
    /// zero-valued cursor, not an error.
    pub async fn get_processing_state(&self, file_name: &str) -> Result<ProcessingState> {
        let row = sqlx::query(
            "SELECT file_name, last_byte_offset, last_processed_time, file_size_bytes,
                    inode, updated_at
             FROM processing_state WHERE file_name = ?",
        )
        .bind(file_name)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(ProcessingState::empty(file_name));
        };

        Ok(ProcessingState {
            file_name: row.get("file_name"),
            last_byte_offset: row.get("last_byte_offset"),
            last_processed_time: unix_ts(row.get("last_processed_time")),
            file_size_bytes: row.get("file_size_bytes"),
            inode: row.get::<i64, _>("inode") as u64,
            updated_at: unix_ts(row.get("updated_at")),
        })
    }

    pub async fn update_processing_state(
        &self,
        file_name: &str,
        byte_offset: i64,
        file_size: i64,
        inode: u64,
    ) -> Result<()> {
        let now = Utc::now().timestamp();
        sqlx::query(
            "INSERT INTO processing_state
                (file_name, last_byte_offset, last_processed_time, file_size_bytes, inode, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(file_name) DO UPDATE SET
                last_byte_offset = excluded.last_byte_offset,
                last_processed_time = excluded.last_processed_time,
                file_size_bytes = excluded.file_size_bytes,
                inode = excluded.inode,
                updated_at = excluded.updated_at",
        )
        .bind(file_name)
        .bind(byte_offset)
        .bind(now)
        .bind(file_size)
        .bind(inode as i64)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("failed to update processing state")?;

        Ok(())
    }

    /// Cross-session totals grouped by model, highest spend first.
    pub async fn list_model_aggregates(&self, limit: i64) -> Result<Vec<ModelAggregate>> {
        let rows = sqlx::query(
            "SELECT
                model,
                COUNT(DISTINCT session_id) AS total_sessions,
                SUM(cost_usd) AS total_cost_usd,
                SUM(request_count) AS total_requests,
                SUM(input_tokens) AS total_input_tokens,
                SUM(output_tokens) AS total_output_tokens,
                CASE WHEN SUM(request_count) > 0
                    THEN SUM(total_latency_ms) / SUM(request_count)
                    ELSE 0 END AS avg_latency_ms
             FROM session_models
             GROUP BY model
             ORDER BY total_cost_usd DESC
             LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|r| ModelAggregate {
                model: r.get("model"),
                total_sessions: r.get("total_sessions"),
                total_cost_usd: r.get("total_cost_usd"),
                total_requests: r.get("total_requests"),
                total_input_tokens: r.get("total_input_tokens"),
                total_output_tokens: r.get("total_output_tokens"),
                avg_latency_ms: r.get("avg_latency_ms"),
            })
            .collect())
    }

    /// Cross-session totals grouped by tool, most called first.
    pub async fn list_tool_aggregates(&self, limit: i64) -> Result<Vec<ToolAggregate>> {
        let rows = sqlx::query(
            "SELECT
                tool_name,
                SUM(call_count) AS total_calls,
                SUM(success_count) AS total_successes,
                SUM(failure_count) AS total_failures,
                CASE WHEN SUM(call_count) > 0
                    THEN CAST(SUM(success_count) AS REAL) / CAST(SUM(call_count) AS REAL)
                    ELSE 0 END AS success_rate,
                CASE WHEN SUM(call_count) > 0
                    THEN SUM(total_execution_time_ms) / SUM(call_count)
                    ELSE 0 END AS avg_duration_ms,
                COUNT(DISTINCT session_id) AS sessions_used_in
             FROM session_tools
             GROUP BY tool_name
             ORDER BY total_calls DESC
             LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|r| ToolAggregate {
                tool_name: r.get("tool_name"),
                total_calls: r.get("total_calls"),
                total_successes: r.get("total_successes"),
                total_failures: r.get("total_failures"),
                success_rate: r.get("success_rate"),
                avg_duration_ms: r.get("avg_duration_ms"),
                sessions_used_in: r.get("sessions_used_in"),
            })
            .collect())
    }
}

fn unix_ts(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

fn session_from_row(row: &SqliteRow) -> Session {
    Session {
        session_id: row.get("session_id"),
        organization_id: row.get("organization_id"),
        user_id: row.get("user_id"),
        client_name: row.get("client_name"),
        client_version: row.get("client_version"),
        terminal_type: row.get("terminal_type"),
        host_arch: row.get("host_arch"),
        os_type: row.get("os_type"),
        os_version: row.get("os_version"),
        start_time: unix_ts(row.get("start_time")),
        end_time: unix_ts(row.get("end_time")),
        total_cost_usd: row.get("total_cost_usd"),
        total_input_tokens: row.get("total_input_tokens"),
        total_output_tokens: row.get("total_output_tokens"),
        total_cache_read_tokens: row.get("total_cache_read_tokens"),
        total_cache_creation_tokens: row.get("total_cache_creation_tokens"),
        total_active_time_seconds: row.get("total_active_time_seconds"),
        api_request_count: row.get("api_request_count"),
        api_error_count: row.get("api_error_count"),
        user_prompt_count: row.get("user_prompt_count"),
        tool_call_count: row.get("tool_call_count"),
        total_api_latency_ms: row.get("total_api_latency_ms"),
        created_at: unix_ts(row.get("created_at")),
        updated_at: unix_ts(row.get("updated_at")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn create_test_store() -> (Store, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Store::open(&dir.path().join("test.db")).await.unwrap();
        (store, dir)
    }

    fn sample_session(id: &str) -> Session {
        let mut session = Session::new(id, unix_ts(1_700_000_000));
        session.user_id = "u1".to_string();
        session.organization_id = "org1".to_string();
        session.total_cost_usd = 1.25;
        session.total_input_tokens = 1000;
        session
    }

    #[tokio::test]
    async fn upsert_and_get_session_roundtrip() {
        let (store, _dir) = create_test_store().await;

        let session = sample_session("s1");
        store.upsert_session(&session).await.unwrap();

        let loaded = store.get_session("s1").await.unwrap().unwrap();
        assert_eq!(loaded.session_id, "s1");
        assert_eq!(loaded.user_id, "u1");
        assert_eq!(loaded.total_cost_usd, 1.25);
        assert_eq!(loaded.total_input_tokens, 1000);

        assert!(store.get_session("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn conflict_preserves_start_time_and_created_at() {
        let (store, _dir) = create_test_store().await;

        let first = sample_session("s1");
        store.upsert_session(&first).await.unwrap();

        let mut second = sample_session("s1");
        second.start_time = unix_ts(1_800_000_000);
        second.created_at = unix_ts(1_800_000_000);
        second.end_time = unix_ts(1_800_000_100);
        second.total_cost_usd = 9.0;
        store.upsert_session(&second).await.unwrap();

        let loaded = store.get_session("s1").await.unwrap().unwrap();
        assert_eq!(loaded.start_time, first.start_time);
        assert_eq!(loaded.created_at.timestamp(), first.created_at.timestamp());
        assert_eq!(loaded.end_time, second.end_time);
        assert_eq!(loaded.total_cost_usd, 9.0);
    }

    #[tokio::test]
    async fn sessions_list_by_user_newest_first() {
        let (store, _dir) = create_test_store().await;

        for (id, start) in [("a", 100), ("b", 300), ("c", 200)] {
            let mut s = sample_session(id);
            s.start_time = unix_ts(start);
            store.upsert_session(&s).await.unwrap();
        }

        let sessions = store.list_sessions_by_user("u1", 10).await.unwrap();
        let ids: Vec<&str> = sessions.iter().map(|s| s.session_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);

        let limited = store.list_sessions_by_user("u1", 2).await.unwrap();
        assert_eq!(limited.len(), 2);
    }

    #[tokio::test]
    async fn processing_state_defaults_to_zero() {
        let (store, _dir) = create_test_store().await;

        let state = store.get_processing_state("metrics.jsonl").await.unwrap();
        assert_eq!(state.last_byte_offset, 0);
        assert_eq!(state.file_size_bytes, 0);
        assert_eq!(state.inode, 0);

        store
            .update_processing_state("metrics.jsonl", 4321, 9000, 777)
            .await
            .unwrap();

        let state = store.get_processing_state("metrics.jsonl").await.unwrap();
        assert_eq!(state.last_byte_offset, 4321);
        assert_eq!(state.file_size_bytes, 9000);
        assert_eq!(state.inode, 777);
    }

    #[tokio::test]
    async fn duplicate_prompts_are_ignored() {
        let (store, _dir) = create_test_store().await;

        let ts = unix_ts(1_700_000_000);
        store.insert_session_prompt("s1", "hello", ts).await.unwrap();
        store.insert_session_prompt("s1", "hello again", ts).await.unwrap();
        store
            .insert_session_prompt("s1", "later", unix_ts(1_700_000_001))
            .await
            .unwrap();

        let prompts = store.list_session_prompts("s1", 10).await.unwrap();
        assert_eq!(prompts.len(), 2);
        // Newest first; the replayed second insert did not overwrite.
        assert_eq!(prompts[0].prompt_text, "later");
        assert_eq!(prompts[1].prompt_text, "hello");
        assert_eq!(prompts[1].prompt_length, 5);
    }

    #[tokio::test]
    async fn session_models_ordered_by_cost() {
        let (store, _dir) = create_test_store().await;

        for (model, cost) in [("haiku", 0.10), ("opus", 3.50), ("sonnet", 1.20)] {
            let mut m = SessionModel::new("s1", model);
            m.cost_usd = cost;
            m.request_count = 1;
            store.upsert_session_model(&m).await.unwrap();
        }

        let models = store.list_session_models("s1").await.unwrap();
        let names: Vec<&str> = models.iter().map(|m| m.model.as_str()).collect();
        assert_eq!(names, vec!["opus", "sonnet", "haiku"]);
    }

    #[tokio::test]
    async fn tool_aggregates_group_across_sessions() {
        let (store, _dir) = create_test_store().await;

        for (session, calls, successes, total_ms) in
            [("s1", 4, 3, 400.0), ("s2", 6, 6, 200.0)]
        {
            let mut t = SessionTool::new(session, "Bash");
            t.call_count = calls;
            t.success_count = successes;
            t.failure_count = calls - successes;
            t.total_execution_time_ms = total_ms;
            store.upsert_session_tool(&t).await.unwrap();
        }

        let aggregates = store.list_tool_aggregates(10).await.unwrap();
        assert_eq!(aggregates.len(), 1);
        let agg = &aggregates[0];
        assert_eq!(agg.tool_name, "Bash");
        assert_eq!(agg.total_calls, 10);
        assert_eq!(agg.total_successes, 9);
        assert_eq!(agg.sessions_used_in, 2);
        assert!((agg.success_rate - 0.9).abs() < 1e-9);
        assert!((agg.avg_duration_ms - 60.0).abs() < 1e-9);
    }
}
