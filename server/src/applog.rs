//! Append-only application log.
//!
//! Product-level events (timer changes, file operations, client-posted log
//! lines) are appended as JSON lines to `logs/app.log` under the workspace
//! base. This file is what the dashboard log viewer tails; operational
//! diagnostics go through `tracing` instead.

use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{trace, warn};

use crate::types::{LogEntry, LogLevel};

/// Lines returned when no limit is given.
pub const DEFAULT_TAIL: usize = 120;

/// Upper bound on lines returned by one tail request.
pub const MAX_TAIL: usize = 500;

/// Errors that can occur while appending or reading the log.
#[derive(Debug, Error)]
pub enum LogError {
    #[error("log I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("log serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// The tail of the log.
///
/// Lines that parse as JSON are returned exactly as stored, whatever their
/// shape; only unparseable lines are replaced.
#[derive(Debug, Clone, Serialize)]
pub struct LogTail {
    pub entries: Vec<Value>,
    /// Number of lines in the whole file.
    pub total: usize,
}

/// Handle to the JSON-lines log file.
#[derive(Debug, Clone)]
pub struct AppLog {
    path: PathBuf,
}

impl AppLog {
    /// Creates a handle for the log at `path`. Nothing is touched until the
    /// first append.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one entry as a single JSON line.
    pub async fn append<T>(&self, entry: &T) -> Result<(), LogError>
    where
        T: Serialize + ?Sized,
    {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;

        trace!(path = %self.path.display(), "Appended app log entry");
        Ok(())
    }

    /// Appends an entry, reporting failures through `tracing` only.
    pub async fn record(&self, entry: LogEntry) {
        if let Err(err) = self.append(&entry).await {
            warn!(
                error = %err,
                path = %self.path.display(),
                source = %entry.source,
                "App log append failed"
            );
        }
    }

    /// Returns the last `limit` entries (oldest first) and the total line
    /// count. A missing file is an empty log.
    ///
    /// Lines that parse as JSON are returned as written. Lines that do not
    /// are returned as error-level entries carrying the raw line as their
    /// message.
    pub async fn tail(&self, limit: usize) -> Result<LogTail, LogError> {
        let raw = match fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => String::new(),
            Err(err) => return Err(err.into()),
        };

        let lines: Vec<&str> = raw.lines().filter(|l| !l.trim().is_empty()).collect();
        let total = lines.len();
        let skip = total.saturating_sub(limit);

        let entries = lines[skip..]
            .iter()
            .map(|line| match serde_json::from_str::<Value>(line) {
                Ok(value) => Ok(value),
                Err(_) => serde_json::to_value(unreadable_line(line)),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(LogTail { entries, total })
    }
}

/// Stand-in entry for a line that is not JSON.
fn unreadable_line(line: &str) -> LogEntry {
    LogEntry {
        ts: Utc::now(),
        level: LogLevel::Error,
        source: "logs".to_string(),
        message: line.to_string(),
        duration_ms: None,
        detail: None,
        stack: None,
    }
}

/// Interprets a client-supplied `limit` query value.
///
/// Missing, zero or non-numeric input gives [`DEFAULT_TAIL`]; other values
/// are clamped to `1..=MAX_TAIL`.
pub fn tail_limit(raw: Option<&str>) -> usize {
    match raw.and_then(|v| v.trim().parse::<i64>().ok()) {
        None | Some(0) => DEFAULT_TAIL,
        Some(n) if n < 0 => 1,
        Some(n) => usize::try_from(n).map_or(MAX_TAIL, |n| n.min(MAX_TAIL)),
    }
}
