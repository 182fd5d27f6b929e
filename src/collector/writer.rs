//! Append-only line writer for record files.
//!
//! One writer per role file. Each export request becomes exactly one
//! UTF-8 line terminated by `\n`; the processor relies on lines being
//! appended whole.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

pub struct FileWriter {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileWriter {
    /// Create a writer for `path`, creating the parent directory if
    /// needed. The file itself is created lazily on first write.
    pub fn new(path: PathBuf) -> Result<Self> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("failed to create directory {:?}", dir))?;
            }
        }

        Ok(Self {
            path,
            lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one line. Serialized against other writes through this
    /// handle so a line is written with a single syscall.
    pub async fn write_line(&self, line: &str) -> Result<()> {
        let _guard = self.lock.lock().await;

        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.path)
            .await
            .with_context(|| format!("failed to open {:?}", self.path))?;

        let mut buf = Vec::with_capacity(line.len() + 1);
        buf.extend_from_slice(line.as_bytes());
        buf.push(b'\n');

        file.write_all(&buf)
            .await
            .with_context(|| format!("failed to write to {:?}", self.path))?;

        Ok(())
    }
}
