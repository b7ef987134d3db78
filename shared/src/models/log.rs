//! Telemetry log entry
//!
//! Entries are buffered on the terminal and shipped off-device in
//! batches; this is audit/diagnostic data, distinct from process
//! tracing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Log severity, ordered
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
            Self::Critical => "CRITICAL",
        }
    }
}

/// One telemetry entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    /// Origin tag (e.g. "pos", "kitchen")
    pub source: String,
    /// Module within the source
    pub module: String,
    pub message: String,
    pub details: Option<serde_json::Value>,
    /// Correlation: shift active when the entry was created
    pub shift_id: Option<String>,
    /// Terminal that produced the entry
    pub device_id: String,
}

impl LogEntry {
    pub fn new(
        level: LogLevel,
        source: impl Into<String>,
        module: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: format!("log_{}", Uuid::new_v4()),
            timestamp: Utc::now(),
            level,
            source: source.into(),
            module: module.into(),
            message: message.into(),
            details: None,
            shift_id: None,
            device_id: String::new(),
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}
