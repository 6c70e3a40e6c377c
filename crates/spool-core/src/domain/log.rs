//! Per-entry log lines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogSeverity {
    Info,
    Notice,
    Warning,
    Error,
}

/// One line in an entry's append-only log.
///
/// The queue stamps `timestamp` with its own clock when the line is appended,
/// so log times and the entry's `modified` come from the same source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryLog {
    pub timestamp: DateTime<Utc>,
    pub severity: LogSeverity,
    pub title: String,
    #[serde(default)]
    pub detail: String,
}

impl EntryLog {
    pub fn new(severity: LogSeverity, title: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            severity,
            title: title.into(),
            detail: detail.into(),
        }
    }

    pub fn info(title: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(LogSeverity::Info, title, detail)
    }

    pub fn warning(title: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(LogSeverity::Warning, title, detail)
    }

    pub fn error(title: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(LogSeverity::Error, title, detail)
    }
}
