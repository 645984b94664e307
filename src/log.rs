//! Progress and statistics reporting.
//!
//! Construction code reports through an injected [`ProgressLog`] handle.
//! Developer diagnostics go to `tracing` directly; this trait is for what an
//! embedding application wants to show its user.

use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

/// Sink for user-facing progress messages and named values.
pub trait ProgressLog: Send + Sync {
    /// A free-form progress message.
    fn message(&self, msg: &str);

    /// A named numeric value (timings, sparsities, counts).
    fn value(&self, name: &str, value: f64);
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLog;

impl ProgressLog for NoopLog {
    fn message(&self, _msg: &str) {}
    fn value(&self, _name: &str, _value: f64) {}
}

/// Forwards to `tracing::info!` under the `hsne` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLog;

impl ProgressLog for TracingLog {
    fn message(&self, msg: &str) {
        tracing::info!(target: "hsne", "{msg}");
    }

    fn value(&self, name: &str, value: f64) {
        tracing::info!(target: "hsne", name, value);
    }
}

/// One recorded entry of a [`MemoryLog`].
#[derive(Debug, Clone, PartialEq)]
pub enum LogEntry {
    /// From [`ProgressLog::message`].
    Message(String),
    /// From [`ProgressLog::value`].
    Value(String, f64),
}

/// Keeps every entry in memory.
#[derive(Debug, Default)]
pub struct MemoryLog {
    entries: Mutex<Vec<LogEntry>>,
}

impl MemoryLog {
    /// Empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the entries recorded so far.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().clone()
    }

    /// Last value recorded under `name`.
    pub fn last_value(&self, name: &str) -> Option<f64> {
        self.entries.lock().iter().rev().find_map(|e| match e {
            LogEntry::Value(n, v) if n == name => Some(*v),
            _ => None,
        })
    }
}

impl ProgressLog for MemoryLog {
    fn message(&self, msg: &str) {
        self.entries.lock().push(LogEntry::Message(msg.to_owned()));
    }

    fn value(&self, name: &str, value: f64) {
        self.entries
            .lock()
            .push(LogEntry::Value(name.to_owned(), value));
    }
}

/// Percent ticker for a loop of known length, safe to share across workers.
///
/// Emits `"{label}: {p}%"` each time another tenth of the work completes.
pub struct Progress<'a> {
    log: &'a dyn ProgressLog,
    label: &'a str,
    total: usize,
    done: AtomicUsize,
}

impl<'a> Progress<'a> {
    /// Ticker over `total` units of work.
    pub fn new(log: &'a dyn ProgressLog, label: &'a str, total: usize) -> Self {
        Self {
            log,
            label,
            total,
            done: AtomicUsize::new(0),
        }
    }

    /// Record one finished unit.
    pub fn tick(&self) {
        let done = self.done.fetch_add(1, Ordering::Relaxed) + 1;
        if self.total == 0 {
            return;
        }
        let before = (done - 1) * 10 / self.total;
        let after = done * 10 / self.total;
        if after > before {
            self.log
                .message(&format!("{}: {}%", self.label, after.min(10) * 10));
        }
    }

    /// Units recorded so far.
    pub fn done(&self) -> usize {
        self.done.load(Ordering::Relaxed)
    }
}
