//! Logging sink handed to the record mapper, the refresh coordinator and
//! the scheduler.
//!
//! The core never reaches for the global logger directly. It receives an
//! [`LogSink`] at construction time and reports through it, which keeps
//! the logger an explicit dependency and lets tests observe exactly what
//! was reported. [`GlobalLog`] forwards to whatever logger the binary
//! installed; [`MemoryLog`] keeps entries in memory.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use log::{Level, Log, Metadata, Record};

/// Shared handle to a logging sink.
pub type LogSink = Arc<dyn Log>;

/// Sink that forwards every entry to the process-wide `log` logger.
#[derive(Debug, Default, Clone, Copy)]
pub struct GlobalLog;

impl Log for GlobalLog {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= log::max_level() && log::logger().enabled(metadata)
    }

    fn log(&self, record: &Record<'_>) {
        if self.enabled(record.metadata()) {
            log::logger().log(record);
        }
    }

    fn flush(&self) {
        log::logger().flush();
    }
}

/// Returns a shared [`GlobalLog`] sink.
#[must_use]
pub fn global() -> LogSink {
    Arc::new(GlobalLog)
}

/// Writes one entry to `sink` with the given level and target.
pub fn emit(sink: &dyn Log, level: Level, target: &str, args: fmt::Arguments<'_>) {
    sink.log(
        &Record::builder()
            .level(level)
            .target(target)
            .args(args)
            .build(),
    );
}

/// A captured log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Severity of the entry.
    pub level: Level,
    /// Target the entry was logged under.
    pub target: String,
    /// Rendered message.
    pub message: String,
}

/// Sink that records every entry in memory.
///
/// Used by tests to assert on what the mapper and coordinator reported.
#[derive(Debug, Default)]
pub struct MemoryLog {
    entries: Mutex<Vec<Entry>>,
}

impl MemoryLog {
    /// Creates an empty in-memory sink.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Returns a copy of all captured entries.
    #[must_use]
    pub fn entries(&self) -> Vec<Entry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns the captured entries at exactly `level`.
    #[must_use]
    pub fn at_level(&self, level: Level) -> Vec<Entry> {
        self.entries()
            .into_iter()
            .filter(|e| e.level == level)
            .collect()
    }

    /// Discards all captured entries.
    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl Log for MemoryLog {
    fn enabled(&self, _metadata: &Metadata<'_>) -> bool {
        true
    }

    fn log(&self, record: &Record<'_>) {
        let entry = Entry {
            level: record.level(),
            target: record.target().to_string(),
            message: record.args().to_string(),
        };
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
    }

    fn flush(&self) {}
}
