//! Logging: tracing setup plus the observer channel for fiscal events.
//!
//! Internal diagnostics go through `tracing`. Events meant for the embedding
//! POS application (operator-visible messages, failures with their cause) are
//! delivered as [`LogRecord`]s to [`LogSink`] observers. Sinks are injected
//! into the orchestrator through a [`Logger`]; a process-wide [`LogHub`] is
//! available only between [`install_global`] and [`uninstall_global`].

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "info,fiscal_receipt=debug";
const LOG_FILE_PREFIX: &str = "fiscal";

// ---------------------------------------------------------------------------
// tracing subscriber
// ---------------------------------------------------------------------------

/// Install the global `tracing` subscriber (console, plus a daily rolling file
/// when `log_dir` is given).
///
/// The returned guard flushes the file writer on drop; keep it alive for as
/// long as logging should reach the file. Returns `None` when no file layer
/// was configured. Calling this twice is harmless: the second attempt to set
/// the global subscriber is ignored.
pub fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let console_layer = fmt::layer().with_target(true);

    match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir).ok();
            let file_appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let file_layer = fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(true);
            let _ = tracing_subscriber::registry()
                .with(env_filter)
                .with(console_layer)
                .with(file_layer)
                .try_init();
            Some(guard)
        }
        None => {
            let _ = tracing_subscriber::registry()
                .with(env_filter)
                .with(console_layer)
                .try_init();
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Records and sinks
// ---------------------------------------------------------------------------

/// One event published to observers.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub text: String,
    pub is_error: bool,
    /// Rendered underlying error, if the event carries one.
    pub cause: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl LogRecord {
    pub fn info(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: false,
            cause: None,
            timestamp: Utc::now(),
        }
    }

    pub fn error(text: impl Into<String>, cause: Option<String>) -> Self {
        Self {
            text: text.into(),
            is_error: true,
            cause,
            timestamp: Utc::now(),
        }
    }
}

/// Observer of fiscal log events.
///
/// Delivery is fire-and-forget. Implementations must not panic; a panicking
/// sink unwinds into whichever call emitted the record.
pub trait LogSink: Send + Sync {
    fn record(&self, record: &LogRecord);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl LogSink for NoopSink {
    fn record(&self, _record: &LogRecord) {}
}

/// Forwards records to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn record(&self, record: &LogRecord) {
        match (record.is_error, record.cause.as_deref()) {
            (true, Some(cause)) => tracing::error!(target: "fiscal", "{}: {cause}", record.text),
            (true, None) => tracing::error!(target: "fiscal", "{}", record.text),
            (false, _) => tracing::info!(target: "fiscal", "{}", record.text),
        }
    }
}

/// Keeps every record in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<LogRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<LogRecord> {
        lock(&self.records).clone()
    }

    pub fn texts(&self) -> Vec<String> {
        lock(&self.records).iter().map(|r| r.text.clone()).collect()
    }

    pub fn errors(&self) -> Vec<LogRecord> {
        lock(&self.records)
            .iter()
            .filter(|r| r.is_error)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        lock(&self.records).clear();
    }
}

impl LogSink for MemorySink {
    fn record(&self, record: &LogRecord) {
        lock(&self.records).push(record.clone());
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

// ---------------------------------------------------------------------------
// Broadcast hub
// ---------------------------------------------------------------------------

/// Handle returned by [`LogHub::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

/// Broadcasts each record to every current subscriber, in subscription order.
#[derive(Default)]
pub struct LogHub {
    next_id: AtomicU64,
    subscribers: Mutex<BTreeMap<SubscriptionId, Arc<dyn LogSink>>>,
}

impl LogHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, sink: Arc<dyn LogSink>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        lock(&self.subscribers).insert(id, sink);
        id
    }

    /// Returns whether the subscription existed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        lock(&self.subscribers).remove(&id).is_some()
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.subscribers).len()
    }
}

impl LogSink for LogHub {
    fn record(&self, record: &LogRecord) {
        // Snapshot so a sink may (un)subscribe from inside its callback.
        let sinks: Vec<Arc<dyn LogSink>> = lock(&self.subscribers).values().cloned().collect();
        for sink in sinks {
            sink.record(record);
        }
    }
}

// ---------------------------------------------------------------------------
// Logger handle
// ---------------------------------------------------------------------------

/// Cheap, clonable handle the orchestrator and façade log through.
#[derive(Clone)]
pub struct Logger {
    sink: Arc<dyn LogSink>,
}

impl Logger {
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self { sink }
    }

    pub fn noop() -> Self {
        Self::new(Arc::new(NoopSink))
    }

    pub fn tracing() -> Self {
        Self::new(Arc::new(TracingSink))
    }

    pub fn info(&self, text: impl Into<String>) {
        self.sink.record(&LogRecord::info(text));
    }

    pub fn error(&self, text: impl Into<String>) {
        self.sink.record(&LogRecord::error(text, None));
    }

    pub fn error_with(&self, text: impl Into<String>, cause: &dyn std::error::Error) {
        self.sink
            .record(&LogRecord::error(text, Some(cause.to_string())));
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::tracing()
    }
}

impl std::fmt::Debug for Logger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Logger").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Process-wide hub
// ---------------------------------------------------------------------------

static GLOBAL_HUB: Mutex<Option<Arc<LogHub>>> = Mutex::new(None);

/// Install (or return the already installed) process-wide hub.
pub fn install_global() -> Arc<LogHub> {
    lock(&GLOBAL_HUB)
        .get_or_insert_with(|| Arc::new(LogHub::new()))
        .clone()
}

/// Remove the process-wide hub. Loggers obtained earlier keep delivering to
/// the detached hub's subscribers until dropped.
pub fn uninstall_global() -> Option<Arc<LogHub>> {
    lock(&GLOBAL_HUB).take()
}

/// Logger bound to the process-wide hub, or a no-op logger when none is
/// installed.
pub fn global_logger() -> Logger {
    match lock(&GLOBAL_HUB).as_ref() {
        Some(hub) => Logger::new(hub.clone()),
        None => Logger::noop(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
