//! Abstract logging boundary.
//!
//! The engine core never calls a logging framework directly; it emits
//! through a `LogSink` so the framework choice stays a concern of the
//! embedding application. [`TracingSink`] is the default implementation
//! used by the CLI binary.

use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

pub trait LogSink: Send + Sync {
    fn log(&self, level: LogLevel, message: &str);
}

/// A `LogSink` that forwards to `tracing`, mapping `Critical` onto an
/// `error!`-level event tagged `critical = true` since `tracing` has no
/// fifth severity of its own.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Debug => tracing::debug!("{message}"),
            LogLevel::Info => tracing::info!("{message}"),
            LogLevel::Warning => tracing::warn!("{message}"),
            LogLevel::Error => tracing::error!("{message}"),
            LogLevel::Critical => tracing::error!(critical = true, "{message}"),
        }
    }
}

/// A sink that discards everything, used by tests that don't care about
/// log output but still need to satisfy the engine's constructor.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl LogSink for NullSink {
    fn log(&self, _level: LogLevel, _message: &str) {}
}

pub type SharedLogSink = Arc<dyn LogSink>;
