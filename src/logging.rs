// src/logging.rs

//! Explicit logger handle
//!
//! Components receive a `Logger` in their constructor instead of reaching
//! for a process-wide logger. Every record is forwarded to `tracing` (so
//! the subscriber installed by the binary sees it) and to the handle's
//! `LogSink`. Tests install a `CaptureSink` and assert on what a single
//! component logged.

use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};

/// Log level of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// A single log record as seen by a sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub level: Level,
    /// Component that produced the record (e.g. "pipeline", "migration")
    pub component: String,
    pub message: String,
}

/// Destination for log records
pub trait LogSink: Send + Sync {
    fn record(&self, record: &LogRecord);
}

/// Sink that drops records; `tracing` still receives them
#[derive(Debug, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn record(&self, _record: &LogRecord) {}
}

/// Sink that keeps every record in memory
#[derive(Debug, Default)]
pub struct CaptureSink {
    records: Mutex<Vec<LogRecord>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far
    pub fn records(&self) -> Vec<LogRecord> {
        self.records
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    /// Records at the given level
    pub fn at_level(&self, level: Level) -> Vec<LogRecord> {
        self.records()
            .into_iter()
            .filter(|r| r.level == level)
            .collect()
    }

    /// True if any record's message contains `needle`
    pub fn contains(&self, needle: &str) -> bool {
        self.records().iter().any(|r| r.message.contains(needle))
    }
}

impl LogSink for CaptureSink {
    fn record(&self, record: &LogRecord) {
        if let Ok(mut records) = self.records.lock() {
            records.push(record.clone());
        }
    }
}

/// Cloneable logger handle passed to every component
#[derive(Clone)]
pub struct Logger {
    sink: Arc<dyn LogSink>,
    component: Arc<str>,
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("component", &self.component)
            .finish_non_exhaustive()
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::tracing()
    }
}

impl Logger {
    /// Logger that only forwards to `tracing`
    pub fn tracing() -> Self {
        Self::with_sink(Arc::new(TracingSink))
    }

    /// Logger delivering records to `sink` as well as `tracing`
    pub fn with_sink(sink: Arc<dyn LogSink>) -> Self {
        Self {
            sink,
            component: Arc::from("sqlwarden"),
        }
    }

    /// Same sink, different component label
    pub fn scoped(&self, component: &str) -> Self {
        Self {
            sink: self.sink.clone(),
            component: Arc::from(component),
        }
    }

    pub fn component(&self) -> &str {
        &self.component
    }

    pub fn log(&self, level: Level, message: impl Into<String>) {
        let message = message.into();
        let component = &*self.component;
        match level {
            Level::Debug => debug!(component, "{}", message),
            Level::Info => info!(component, "{}", message),
            Level::Warn => warn!(component, "{}", message),
            Level::Error => error!(component, "{}", message),
        }
        self.sink.record(&LogRecord {
            level,
            component: component.to_string(),
            message,
        });
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.log(Level::Debug, message);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(Level::Info, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(Level::Warn, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(Level::Error, message);
    }
}
