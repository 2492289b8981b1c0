//! bgate: a content-addressed file deduplication engine.
//!
//! Classifies candidate files as unique, duplicate, or skipped using a
//! tiered short-circuit strategy (size, then a cheap fringe digest,
//! then a full digest), optionally relocating unique files into a
//! content-addressed store via a crash-safe hardlink-then-unlink move,
//! and reconciling any partial moves left behind by an unclean shutdown
//! the next time the engine opens.

pub mod classify;
pub mod config;
pub mod content_store;
pub mod db;
pub mod emergency_log;
pub mod engine;
pub mod error;
pub mod hash;
pub mod log_sink;
pub mod move_primitive;
pub mod recovery;
pub mod register;
pub mod signal;
pub mod walk;

pub use classify::{Classification, SkipReason};
pub use config::EngineConfig;
pub use engine::{DedupeResult, Engine, EngineStats, ProcessResult};
pub use error::{Error, Result};
pub use log_sink::{LogLevel, LogSink, SharedLogSink, TracingSink};
