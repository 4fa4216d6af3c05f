//! Bounded, newest-first log of replay events.
//!
//! Every entry is mirrored to `tracing` when appended, so the log is a
//! convenience for status consumers and never the only record.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Entries kept before the oldest is dropped.
pub const EVENT_LOG_CAPACITY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogCategory {
    Init,
    Info,
    Config,
    Timer,
    Start,
    Pause,
    Resume,
    Stop,
    Reset,
    Batch,
    LiveStages,
    Persist,
    Completed,
    Error,
}

impl LogCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogCategory::Init => "init",
            LogCategory::Info => "info",
            LogCategory::Config => "config",
            LogCategory::Timer => "timer",
            LogCategory::Start => "start",
            LogCategory::Pause => "pause",
            LogCategory::Resume => "resume",
            LogCategory::Stop => "stop",
            LogCategory::Reset => "reset",
            LogCategory::Batch => "batch",
            LogCategory::LiveStages => "live_stages",
            LogCategory::Persist => "persist",
            LogCategory::Completed => "completed",
            LogCategory::Error => "error",
        }
    }

    fn is_failure(&self) -> bool {
        matches!(self, LogCategory::Error)
    }
}

impl std::fmt::Display for LogCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub category: LogCategory,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone)]
pub struct EventLog {
    entries: VecDeque<LogEntry>,
    capacity: usize,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLog {
    pub fn new() -> Self {
        Self::with_capacity(EVENT_LOG_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, category: LogCategory, message: impl Into<String>) {
        self.push_entry(category, message.into(), None);
    }

    pub fn push_detail(
        &mut self,
        category: LogCategory,
        message: impl Into<String>,
        detail: impl Into<String>,
    ) {
        self.push_entry(category, message.into(), Some(detail.into()));
    }

    fn push_entry(&mut self, category: LogCategory, message: String, detail: Option<String>) {
        let detail_ref = detail.as_deref().unwrap_or("");
        if category.is_failure() {
            tracing::warn!(event = "replay.log", category = %category, detail = detail_ref, "{message}");
        } else {
            tracing::info!(event = "replay.log", category = %category, detail = detail_ref, "{message}");
        }

        if self.entries.len() == self.capacity {
            self.entries.pop_back();
        }
        self.entries.push_front(LogEntry {
            timestamp: Utc::now(),
            category,
            message,
            detail,
        });
    }

    /// Entries, newest first.
    pub fn entries(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
