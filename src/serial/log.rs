//! # Activity Log Module
//!
//! An append-only, size-bounded log of rendered traffic and session events.
//! The log is the operator-facing artifact (what a terminal window shows);
//! diagnostic logging goes through the `log` crate instead.

use std::fmt;
use std::sync::Mutex;

use chrono::{DateTime, Local};

/// Default maximum number of retained entries.
pub const DEFAULT_LOG_CAP: usize = 1000;

/// Entry category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogCategory {
    /// Inbound traffic rendered through the codec.
    Data,
    /// Session events and outbound echoes.
    System,
    /// Failures; every failure produces exactly one of these.
    Error,
}

impl fmt::Display for LogCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogCategory::Data => write!(f, "data"),
            LogCategory::System => write!(f, "system"),
            LogCategory::Error => write!(f, "error"),
        }
    }
}

/// One rendered line.
#[derive(Debug, Clone)]
pub struct LogEntry {
    /// Wall-clock time captured when the entry was appended, if requested.
    pub timestamp: Option<DateTime<Local>>,
    pub category: LogCategory,
    pub text: String,
}

impl LogEntry {
    /// Renders the entry as a single line, millisecond timestamp first.
    #[must_use]
    pub fn render(&self) -> String {
        match self.timestamp {
            Some(ts) => format!("[{}] {}", ts.format("%H:%M:%S%.3f"), self.text),
            None => self.text.clone(),
        }
    }
}

/// Bounded FIFO of [`LogEntry`] values.
///
/// When an append pushes the length past the cap, the oldest half is
/// discarded in one compaction step so the amortized cost stays constant.
pub struct ActivityLog {
    entries: Mutex<Vec<LogEntry>>,
    cap: usize,
}

impl ActivityLog {
    /// Creates a log with the default cap.
    #[must_use]
    pub fn new() -> Self {
        Self::with_cap(DEFAULT_LOG_CAP)
    }

    /// Creates a log with an explicit cap.
    #[must_use]
    pub fn with_cap(cap: usize) -> Self {
        ActivityLog {
            entries: Mutex::new(Vec::new()),
            cap: cap.max(1),
        }
    }

    /// Appends one entry, stamping the current wall-clock time when
    /// `with_timestamp` is set, and returns a copy for render callbacks.
    pub fn append(
        &self,
        category: LogCategory,
        text: impl Into<String>,
        with_timestamp: bool,
    ) -> LogEntry {
        let entry = LogEntry {
            timestamp: with_timestamp.then(Local::now),
            category,
            text: text.into(),
        };
        let Ok(mut entries) = self.entries.lock() else {
            return entry;
        };
        entries.push(entry.clone());
        if entries.len() > self.cap {
            let drop_count = entries.len() / 2;
            entries.drain(..drop_count);
        }
        entry
    }

    /// Empties the log.
    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }

    /// Snapshot of all entries, oldest first. Safe to call repeatedly.
    #[must_use]
    pub fn entries(&self) -> Vec<LogEntry> {
        match self.entries.lock() {
            Ok(entries) => entries.clone(),
            Err(_) => Vec::new(),
        }
    }

    /// Current entry count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    /// Whether the log holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rendered lines joined in order, the payload handed to an export sink.
    #[must_use]
    pub fn export_text(&self) -> String {
        self.entries()
            .iter()
            .map(LogEntry::render)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl Default for ActivityLog {
    fn default() -> Self {
        Self::new()
    }
}
