//! Append-only audit trail. Every notable pipeline event gets an entry with
//! enough context to reconstruct what happened after the fact; nothing in the
//! pipeline ever reads it back.

use chrono::Local;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: String,
    pub level: String,
    pub function: String,
    pub message: String,
    #[serde(default)]
    pub details: serde_json::Value,
}

impl LogEntry {
    pub fn new(
        level: &str,
        function: &str,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            timestamp: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            level: level.to_string(),
            function: function.to_string(),
            message: message.into(),
            details,
        }
    }
}

/// Injectable sink so components never touch global log state and tests can
/// observe what was recorded.
pub trait AuditSink: Send + Sync {
    fn record(&self, entry: LogEntry);
}

/// File-backed sink. The file holds one JSON array and is rewritten in full on
/// every entry (read-whole, append, write-whole).
pub struct JsonFileAudit {
    path: PathBuf,
    guard: Mutex<()>,
}

impl JsonFileAudit {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), guard: Mutex::new(()) }
    }
}

impl AuditSink for JsonFileAudit {
    fn record(&self, entry: LogEntry) {
        let _lock = self.guard.lock();

        let mut entries: Vec<LogEntry> = fs::read_to_string(&self.path)
            .ok()
            .and_then(|contents| serde_json::from_str(&contents).ok())
            .unwrap_or_default();
        entries.push(entry);

        match serde_json::to_string_pretty(&entries) {
            Ok(json) => {
                if let Err(e) = fs::write(&self.path, json) {
                    warn!(path = %self.path.display(), error = %e, "could not write audit log");
                }
            }
            Err(e) => warn!(error = %e, "could not serialize audit log"),
        }
    }
}

/// Test double capturing entries in memory.
#[cfg(test)]
pub struct MemoryAudit {
    pub entries: Mutex<Vec<LogEntry>>,
}

#[cfg(test)]
impl MemoryAudit {
    pub fn new() -> Self {
        Self { entries: Mutex::new(Vec::new()) }
    }

    pub fn count_level(&self, level: &str) -> usize {
        self.entries
            .lock()
            .expect("audit mutex")
            .iter()
            .filter(|e| e.level == level)
            .count()
    }
}

#[cfg(test)]
impl AuditSink for MemoryAudit {
    fn record(&self, entry: LogEntry) {
        self.entries.lock().expect("audit mutex").push(entry);
    }
}
