//! Incremental record-file processor.
//!
//! Periodically inspects each watched role file and reads only the bytes
//! appended since the last pass, using the per-file cursor persisted in
//! the store. Survives restarts, file rotation, and copy-truncate.
//!
//! Rotation detection compares inodes. A size decrease alone is not
//! sufficient: a replacement file can grow past the old offset before the
//! next pass observes it.

use crate::aggregator::engine::Engine;
use crate::aggregator::otlp;
use crate::aggregator::store::Store;
use crate::signals::ShutdownSignal;
use anyhow::{bail, Context, Result};
use serde_json::Value;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Cursor checkpoint cadence, in processed lines.
const CHECKPOINT_EVERY: usize = 100;

/// Which extractor a watched file feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileRole {
    Metrics,
    Logs,
    Traces,
}

/// One file under the output directory, identified by basename.
#[derive(Debug, Clone)]
pub struct WatchedFile {
    pub name: String,
    pub role: FileRole,
}

/// Tails the watched files and feeds extracted records into the engine.
pub struct Processor {
    data_dir: PathBuf,
    files: Vec<WatchedFile>,
    store: Arc<Store>,
    engine: Arc<Engine>,
}

impl Processor {
    pub fn new(
        data_dir: PathBuf,
        files: Vec<WatchedFile>,
        store: Arc<Store>,
        engine: Arc<Engine>,
    ) -> Self {
        Self {
            data_dir,
            files,
            store,
            engine,
        }
    }

    /// Run the processing loop until shutdown. Processes once immediately,
    /// then on every tick; an in-flight pass completes before the loop
    /// exits.
    pub async fn run(&self, interval: Duration, mut shutdown: broadcast::Receiver<ShutdownSignal>) {
        tracing::info!(
            data_dir = %self.data_dir.display(),
            interval_seconds = interval.as_secs(),
            "starting file processor"
        );

        self.process_all_files().await;

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await; // immediate first tick already handled above

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.process_all_files().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("file processor stopped");
                    break;
                }
            }
        }
    }

    /// One pass over every watched file, sequentially.
    pub async fn process_all_files(&self) {
        for file in &self.files {
            if let Err(e) = self.process_file(file).await {
                tracing::error!(file = %file.name, error = %e, "error processing file");
            }
        }
    }

    /// Process newly appended records from one file.
    ///
    /// Transient I/O errors return without advancing the cursor and are
    /// retried on the next tick. Malformed lines are logged and skipped
    /// with the cursor still advancing past them.
    pub async fn process_file(&self, file: &WatchedFile) -> Result<()> {
        let path = self.data_dir.join(&file.name);

        let metadata = match std::fs::metadata(&path) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e).with_context(|| format!("failed to stat {:?}", path)),
        };
        let cur_size = metadata.len() as i64;
        let cur_inode = file_inode(&metadata);

        let mut state = self.store.get_processing_state(&file.name).await?;

        if state.inode != 0 && cur_inode != 0 && cur_inode != state.inode {
            // A new file exists under the same name.
            tracing::info!(
                file = %file.name,
                old_inode = state.inode,
                new_inode = cur_inode,
                "file was rotated, resetting cursor"
            );
            state.last_byte_offset = 0;
            state.file_size_bytes = 0;
        } else if cur_size < state.last_byte_offset {
            // Copy-truncate or equivalent: same file, shorter than our
            // cursor.
            tracing::info!(
                file = %file.name,
                offset = state.last_byte_offset,
                size = cur_size,
                "file was truncated, resetting cursor"
            );
            state.last_byte_offset = 0;
            state.file_size_bytes = 0;
        } else if cur_size <= state.file_size_bytes && state.last_byte_offset >= cur_size {
            return Ok(()); // nothing new
        }

        let handle = std::fs::File::open(&path)
            .with_context(|| format!("failed to open {:?}", path))?;
        let mut reader = BufReader::new(handle);
        reader
            .seek(SeekFrom::Start(state.last_byte_offset as u64))
            .with_context(|| format!("failed to seek to {} in {:?}", state.last_byte_offset, path))?;

        let mut current_offset = state.last_byte_offset;
        let mut processed = 0usize;
        let mut buf = String::new();

        loop {
            buf.clear();
            let bytes_read = reader
                .read_line(&mut buf)
                .with_context(|| format!("failed to read {:?}", path))?;
            if bytes_read == 0 {
                break;
            }
            if !buf.ends_with('\n') {
                // Trailing line still being written; pick it up next pass.
                break;
            }

            current_offset += bytes_read as i64;

            let line = buf.trim();
            if line.is_empty() {
                continue;
            }

            if let Err(e) = self.process_line(file.role, line).await {
                tracing::warn!(
                    file = %file.name,
                    offset = current_offset - bytes_read as i64,
                    error = %e,
                    "skipping malformed record line"
                );
            }

            processed += 1;
            if processed % CHECKPOINT_EVERY == 0 {
                if let Err(e) = self
                    .store
                    .update_processing_state(&file.name, current_offset, cur_size, cur_inode)
                    .await
                {
                    tracing::error!(file = %file.name, error = %e, "error checkpointing cursor");
                }
            }
        }

        if processed > 0 {
            self.store
                .update_processing_state(&file.name, current_offset, cur_size, cur_inode)
                .await?;
            tracing::debug!(
                file = %file.name,
                lines = processed,
                offset = current_offset,
                "processed new lines"
            );
        }

        Ok(())
    }

    /// Parse a single record line and feed its records into the engine.
    async fn process_line(&self, role: FileRole, line: &str) -> Result<()> {
        let envelope = parse_envelope(line)?;

        match role {
            FileRole::Metrics => {
                for record in otlp::extract_metric_records(&envelope) {
                    self.engine.process_metric(&record).await;
                }
            }
            FileRole::Logs => {
                for record in otlp::extract_log_records(&envelope) {
                    self.engine.process_log(&record).await;
                }
            }
            FileRole::Traces => {
                for record in otlp::extract_trace_records(&envelope) {
                    self.engine.process_trace(&record).await;
                }
            }
        }

        Ok(())
    }
}

/// Decode a record line into its OTLP envelope.
///
/// Accepts the legacy wrapped form `{"data": "<json-encoded envelope>"}`
/// and the direct envelope form.
pub(crate) fn parse_envelope(line: &str) -> Result<Value> {
    let value: Value = serde_json::from_str(line).context("invalid JSON")?;

    if let Some(data) = value.get("data") {
        let Some(inner) = data.as_str() else {
            bail!("'data' field is not a string");
        };
        return serde_json::from_str(inner).context("invalid JSON in 'data' field");
    }

    Ok(value)
}

#[cfg(unix)]
fn file_inode(metadata: &std::fs::Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    metadata.ino()
}

#[cfg(not(unix))]
fn file_inode(_metadata: &std::fs::Metadata) -> u64 {
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrapped_and_direct_line_shapes_both_parse() {
        let wrapped = r#"{"data":"{\"resourceMetrics\":[]}"}"#;
        let direct = r#"{"resourceMetrics":[]}"#;

        let from_wrapped = parse_envelope(wrapped).unwrap();
        let from_direct = parse_envelope(direct).unwrap();
        assert_eq!(from_wrapped, from_direct);
    }

    #[test]
    fn malformed_lines_are_rejected_at_line_level() {
        assert!(parse_envelope("{not valid json}").is_err());
        assert!(parse_envelope(r#"{"data": 42}"#).is_err());
        assert!(parse_envelope(r#"{"data": "{broken"}"#).is_err());
    }
}
