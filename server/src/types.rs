//! Shared record types for the Studio server.
//!
//! This module defines the data structures stored by [`crate::store`] and
//! exchanged over the HTTP API. All records serialize with camelCase field
//! names, matching the JSON the dashboard clients expect.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A customer the studio works for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Client {
    pub id: u64,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A body of work for a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: u64,
    pub client_id: u64,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// The unit of trackable work.
///
/// `time_spent_ms` holds the accumulated duration of all finished
/// intervals. `running_start` is set exactly while a timer is active.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: u64,
    pub project_id: u64,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due: Option<DateTime<Utc>>,
    #[serde(default)]
    pub time_spent_ms: u64,
    #[serde(default)]
    pub running_start: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Task {
    /// Returns true if a timer is currently active for this task.
    pub fn is_running(&self) -> bool {
        self.running_start.is_some()
    }
}

/// Timer transition requested by a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerAction {
    Start,
    Stop,
}

impl TimerAction {
    /// Parses the wire form (`"start"` / `"stop"`).
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "start" => Some(Self::Start),
            "stop" => Some(Self::Stop),
            _ => None,
        }
    }
}

/// File operation requested against the workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileAction {
    Create,
    Append,
    Read,
    List,
}

impl FileAction {
    /// Parses the wire form (`"create"`, `"append"`, `"read"`, `"list"`).
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "create" => Some(Self::Create),
            "append" => Some(Self::Append),
            "read" => Some(Self::Read),
            "list" => Some(Self::List),
            _ => None,
        }
    }

    /// Returns true if the action requires an explicit path.
    pub fn requires_path(self) -> bool {
        matches!(self, Self::Create | Self::Append | Self::Read)
    }

    /// Returns true if the action writes content.
    pub fn requires_content(self) -> bool {
        matches!(self, Self::Create | Self::Append)
    }
}

/// Record identifier as sent by clients.
///
/// Browser forms post ids either as JSON numbers or as numeric strings;
/// both are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum IdInput {
    Number(u64),
    Text(String),
}

impl IdInput {
    /// Returns the numeric id, or `None` if the text form is not a number.
    pub fn as_id(&self) -> Option<u64> {
        match self {
            Self::Number(id) => Some(*id),
            Self::Text(text) => text.trim().parse().ok(),
        }
    }
}

/// Severity of an application log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    #[default]
    Info,
    Warn,
    Error,
}

/// One line of the append-only application log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub ts: DateTime<Utc>,
    pub level: LogLevel,
    pub source: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl LogEntry {
    /// Creates an entry stamped with the current time.
    pub fn new(level: LogLevel, source: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            ts: Utc::now(),
            level,
            source: source.into(),
            message: message.into(),
            duration_ms: None,
            detail: None,
            stack: None,
        }
    }

    /// Shorthand for an info-level entry.
    pub fn info(source: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(LogLevel::Info, source, message)
    }

    /// Shorthand for an error-level entry.
    pub fn error(source: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(LogLevel::Error, source, message)
    }

    /// Attaches the request duration.
    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    /// Attaches structured detail.
    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = Some(detail);
        self
    }
}

/// Trims an optional client string, treating blank input as absent.
pub fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Parses an optional due date.
///
/// Accepts RFC 3339 timestamps and plain `YYYY-MM-DD` dates (midnight UTC).
/// Unparseable input is treated as absent rather than rejected.
pub fn parse_due(value: Option<&str>) -> Option<DateTime<Utc>> {
    let value = value.map(str::trim).filter(|v| !v.is_empty())?;
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }
    chrono::NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
