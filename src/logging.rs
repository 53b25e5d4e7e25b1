//! Request log kept in memory and appended to a JSONL file.
//!
//! Diagnostics go through `tracing`; this log holds the per-request summary
//! lines operators look at (client model, routed model, outcome), and backs
//! `GET /logs`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

const MAX_LOG_ENTRIES: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub component: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
}

impl LogEntry {
    pub fn new(level: LogLevel, component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            component: component.into(),
            message: message.into(),
            context: None,
        }
    }

    #[must_use]
    pub fn with_context(mut self, ctx: serde_json::Value) -> Self {
        self.context = Some(ctx);
        self
    }
}

/// One line per bridged request.
#[derive(Debug, Clone, Serialize)]
pub struct RequestSummary<'a> {
    pub method: &'a str,
    pub path: &'a str,
    /// Model the client asked for.
    pub client_model: &'a str,
    /// `provider/model` the request was routed to.
    pub routed_model: &'a str,
    pub messages: usize,
    pub tools: usize,
    pub status: u16,
}

impl RequestSummary<'_> {
    fn line(&self) -> String {
        let outcome = if self.status < 400 {
            format!("✓ {}", self.status)
        } else {
            format!("✗ {}", self.status)
        };
        format!(
            "{} {} {} | {} → {} | {} tools {} messages",
            self.method,
            self.path,
            outcome,
            self.client_model,
            display_name(self.routed_model),
            self.tools,
            self.messages
        )
    }
}

/// Last path segment of a model identifier.
fn display_name(model: &str) -> &str {
    model.rsplit('/').next().unwrap_or(model)
}

/// Ring-buffer logger that persists to JSONL
pub struct Logger {
    entries: VecDeque<LogEntry>,
    writer: Option<Box<dyn Write + Send>>,
}

impl Logger {
    pub fn new(file_path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file_path = file_path.as_ref();

        if let Some(parent) = file_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let mut entries = VecDeque::with_capacity(MAX_LOG_ENTRIES);

        if file_path.exists() {
            let reader = BufReader::new(File::open(file_path)?);
            for line in reader.lines().map_while(std::result::Result::ok) {
                if let Ok(entry) = serde_json::from_str::<LogEntry>(&line) {
                    if entries.len() >= MAX_LOG_ENTRIES {
                        entries.pop_front();
                    }
                    entries.push_back(entry);
                }
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(file_path)?;

        Ok(Self {
            entries,
            writer: Some(Box::new(BufWriter::new(file))),
        })
    }

    /// Memory-only logger.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            entries: VecDeque::new(),
            writer: None,
        }
    }

    /// Records the entry in memory even when the file write fails.
    pub fn log(&mut self, entry: LogEntry) {
        if let Err(e) = self.persist(&entry) {
            tracing::warn!(error = %e, "Failed to write log entry to file");
        }
        if self.entries.len() >= MAX_LOG_ENTRIES {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    fn persist(&mut self, entry: &LogEntry) -> std::io::Result<()> {
        let Some(writer) = self.writer.as_mut() else {
            return Ok(());
        };
        let json = serde_json::to_string(entry)?;
        writeln!(writer, "{json}")?;
        writer.flush()
    }

    /// Newest first.
    pub fn recent(&self, limit: usize) -> Vec<LogEntry> {
        self.entries.iter().rev().take(limit).cloned().collect()
    }
}

#[derive(Clone)]
pub struct SharedLogger(Arc<Mutex<Logger>>);

impl SharedLogger {
    pub fn new(file_path: impl AsRef<Path>) -> std::io::Result<Self> {
        Ok(Self(Arc::new(Mutex::new(Logger::new(file_path)?))))
    }

    #[must_use]
    pub fn in_memory() -> Self {
        Self(Arc::new(Mutex::new(Logger::in_memory())))
    }

    pub fn log(&self, entry: LogEntry) {
        if let Ok(mut logger) = self.0.lock() {
            logger.log(entry);
        }
    }

    pub fn info(&self, component: impl Into<String>, message: impl Into<String>) {
        self.log(LogEntry::new(LogLevel::Info, component, message));
    }

    pub fn warn(&self, component: impl Into<String>, message: impl Into<String>) {
        self.log(LogEntry::new(LogLevel::Warn, component, message));
    }

    pub fn error(&self, component: impl Into<String>, message: impl Into<String>) {
        self.log(LogEntry::new(LogLevel::Error, component, message));
    }

    pub fn debug(&self, component: impl Into<String>, message: impl Into<String>) {
        self.log(LogEntry::new(LogLevel::Debug, component, message));
    }

    pub fn log_with_context(
        &self,
        level: LogLevel,
        component: impl Into<String>,
        message: impl Into<String>,
        context: serde_json::Value,
    ) {
        self.log(LogEntry::new(level, component, message).with_context(context));
    }

    pub fn log_request(&self, summary: &RequestSummary<'_>) {
        let level = if summary.status < 400 {
            LogLevel::Info
        } else {
            LogLevel::Warn
        };
        let context = serde_json::to_value(summary).unwrap_or_default();
        tracing::info!("{}", summary.line());
        self.log_with_context(level, "request", summary.line(), context);
    }

    pub fn recent(&self, limit: usize) -> Vec<LogEntry> {
        self.0.lock().map(|l| l.recent(limit)).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(status: u16) -> RequestSummary<'static> {
        RequestSummary {
            method: "POST",
            path: "/v1/messages",
            client_model: "claude-3-5-haiku-20241022",
            routed_model: "openai/gpt-4.1-mini",
            messages: 3,
            tools: 2,
            status,
        }
    }

    #[test]
    fn test_request_summary_line() {
        assert_eq!(
            summary(200).line(),
            "POST /v1/messages ✓ 200 | claude-3-5-haiku-20241022 → gpt-4.1-mini | 2 tools 3 messages"
        );
        assert!(summary(502).line().contains("✗ 502"));
    }

    #[test]
    fn test_entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("bridge.jsonl");

        let logger = SharedLogger::new(&path).unwrap();
        logger.info("startup", "first");
        logger.log_request(&summary(502));
        drop(logger);

        let reopened = SharedLogger::new(&path).unwrap();
        let recent = reopened.recent(10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].component, "request");
        assert_eq!(recent[0].level, LogLevel::Warn);
        assert_eq!(recent[0].context.as_ref().unwrap()["routed_model"], "openai/gpt-4.1-mini");
        assert_eq!(recent[1].message, "first");
    }

    struct FullDisk;

    impl Write for FullDisk {
        fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "no space left on device"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_write_failure_is_reported_and_entry_kept() {
        let mut logger = Logger {
            entries: VecDeque::new(),
            writer: Some(Box::new(FullDisk)),
        };
        let entry = LogEntry::new(LogLevel::Info, "test", "kept");

        assert!(logger.persist(&entry).is_err());
        logger.log(entry);
        assert_eq!(logger.recent(1)[0].message, "kept");
    }

    #[test]
    fn test_ring_buffer_is_bounded() {
        let logger = SharedLogger::in_memory();
        for i in 0..(MAX_LOG_ENTRIES + 5) {
            logger.debug("test", format!("entry {i}"));
        }
        let recent = logger.recent(usize::MAX);
        assert_eq!(recent.len(), MAX_LOG_ENTRIES);
        assert_eq!(recent[0].message, format!("entry {}", MAX_LOG_ENTRIES + 4));
    }
}
