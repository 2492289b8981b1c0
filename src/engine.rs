//! The engine: the façade that ties the index store, classifier,
//! registration pipeline, recovery subsystem, and directory walker
//! together into the operations callers actually invoke.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::classify::{self, Classification, SkipReason};
use crate::config::EngineConfig;
use crate::db::IndexStore;
use crate::log_sink::{LogLevel, LogSink, SharedLogSink, TracingSink};
use crate::recovery::{self, RecoverySummary};
use crate::register::{self, RegisterOutcome};
use crate::walk;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DedupeResult {
    Unique,
    Duplicate,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessResult {
    pub path: PathBuf,
    pub result: DedupeResult,
    pub tier: u8,
    pub duplicate_of: Option<PathBuf>,
    pub error: Option<String>,
}

impl ProcessResult {
    fn skipped(path: &Path, tier: u8, error: Option<String>) -> Self {
        ProcessResult {
            path: path.to_path_buf(),
            result: DedupeResult::Skipped,
            tier,
            duplicate_of: None,
            error,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EngineStats {
    pub unique_sizes: i64,
    pub fringe_entries: i64,
    pub full_entries: i64,
    pub schema_version: i64,
    pub orphan_count: i64,
    pub pending_journal: i64,
}

pub struct Engine {
    store: IndexStore,
    config: EngineConfig,
    sink: SharedLogSink,
}

impl Engine {
    /// Opens the index database (creating and migrating its schema as
    /// needed) and runs startup recovery exactly once: emergency-orphan
    /// import, then journal reconciliation, then orphan recovery.
    pub fn open(config: EngineConfig) -> crate::error::Result<Self> {
        Self::open_with_sink(config, Arc::new(TracingSink))
    }

    pub fn open_with_sink(config: EngineConfig, sink: SharedLogSink) -> crate::error::Result<Self> {
        let store = IndexStore::open(&config.db_path)?;

        let summary = recovery::recover(
            &store,
            &config.emergency_log_path(),
            &config.legacy_emergency_log_path(),
            &sink,
        )?;
        log_recovery_summary(&sink, &summary);

        Ok(Engine {
            store,
            config,
            sink,
        })
    }

    pub fn process_path(&self, path: &Path) -> ProcessResult {
        if !path.exists() {
            return ProcessResult::skipped(path, 0, Some("file does not exist".to_string()));
        }

        match classify::validate_candidate(path) {
            Ok(Some(reason)) => {
                return ProcessResult::skipped(path, 0, Some(describe_skip(&reason)));
            }
            Ok(None) => {}
            Err(e) => return ProcessResult::skipped(path, 0, Some(e.to_string())),
        }

        let classification = match classify::classify(&self.store, path) {
            Ok(c) => c,
            Err(e) => return ProcessResult::skipped(path, 0, Some(e.to_string())),
        };

        match &classification {
            Classification::Skipped { reason } => {
                ProcessResult::skipped(path, 0, Some(describe_skip(reason)))
            }
            Classification::Duplicate { stored_path, tier } => {
                self.sink.log(
                    LogLevel::Info,
                    &format!(
                        "{} is a duplicate of {}",
                        path.display(),
                        stored_path.display()
                    ),
                );
                ProcessResult {
                    path: path.to_path_buf(),
                    result: DedupeResult::Duplicate,
                    tier: *tier,
                    duplicate_of: Some(stored_path.clone()),
                    error: None,
                }
            }
            Classification::Unique { tier, .. } => {
                match register::register_unique(
                    &self.store,
                    path,
                    &classification,
                    self.config.content_store_root.as_deref(),
                    &self.config.emergency_log_path(),
                    &self.sink,
                ) {
                    Ok(RegisterOutcome::Registered(registered)) => ProcessResult {
                        path: path.to_path_buf(),
                        result: DedupeResult::Unique,
                        tier: registered.tier,
                        duplicate_of: None,
                        error: None,
                    },
                    Ok(RegisterOutcome::Duplicate { stored_path, tier }) => {
                        self.sink.log(
                            LogLevel::Info,
                            &format!(
                                "{} lost a registration race and is a duplicate of {}",
                                path.display(),
                                stored_path.display()
                            ),
                        );
                        ProcessResult {
                            path: path.to_path_buf(),
                            result: DedupeResult::Duplicate,
                            tier,
                            duplicate_of: Some(stored_path),
                            error: None,
                        }
                    }
                    Err(e) => ProcessResult::skipped(path, *tier, Some(e.to_string())),
                }
            }
        }
    }

    pub fn scan_directory(&self, dir: &Path) -> Vec<ProcessResult> {
        let candidates = walk::walk(
            dir,
            self.config.recursive,
            &self.config.ignore_patterns,
            &self.sink,
        );
        candidates.iter().map(|p| self.process_path(p)).collect()
    }

    pub fn recover_orphans(&self) -> crate::error::Result<RecoverySummary> {
        recovery::recover(
            &self.store,
            &self.config.emergency_log_path(),
            &self.config.legacy_emergency_log_path(),
            &self.sink,
        )
    }

    pub fn list_orphans(&self) -> crate::error::Result<Vec<crate::db::OrphanRecord>> {
        self.store.get_pending_orphans()
    }

    pub fn stats(&self) -> crate::error::Result<EngineStats> {
        let counts = self.store.counts()?;
        Ok(EngineStats {
            unique_sizes: counts.sizes,
            fringe_entries: counts.fringes,
            full_entries: counts.fulls,
            schema_version: crate::db::SCHEMA_VERSION,
            orphan_count: self.store.orphan_count()?,
            pending_journal: self.store.pending_journal_count()?,
        })
    }
}

fn describe_skip(reason: &SkipReason) -> String {
    match reason {
        SkipReason::EmptyPath => "empty path".to_string(),
        SkipReason::NulByte => "path contains a NUL byte".to_string(),
        SkipReason::Symlink => "path is a symlink".to_string(),
        SkipReason::NotRegularFile => "not a regular file".to_string(),
        SkipReason::Unreadable => "file is not readable".to_string(),
        SkipReason::DeviceFile => "path is a character or block device".to_string(),
        SkipReason::ZeroLength => "file is zero-length".to_string(),
    }
}

fn log_recovery_summary(sink: &SharedLogSink, summary: &RecoverySummary) {
    if summary.emergency_orphans_imported == 0
        && summary.journal_entries_reconciled == 0
        && summary.orphans_recovered == 0
    {
        return;
    }
    sink.log(
        LogLevel::Info,
        &format!(
            "recovery: imported {} emergency orphans, reconciled {} journal entries, recovered {} orphans",
            summary.emergency_orphans_imported,
            summary.journal_entries_reconciled,
            summary.orphans_recovered
        ),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log_sink::NullSink;

    fn engine_in(tmp: &tempfile::TempDir) -> Engine {
        let config = EngineConfig::new(tmp.path().join("dedupe.db"));
        Engine::open_with_sink(config, Arc::new(NullSink)).unwrap()
    }

    #[test]
    fn first_file_is_unique() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = engine_in(&tmp);
        let path = tmp.path().join("a.txt");
        std::fs::write(&path, b"hello").unwrap();

        let result = engine.process_path(&path);
        assert_eq!(result.result, DedupeResult::Unique);
        assert_eq!(result.tier, 1);
    }

    #[test]
    fn identical_second_file_is_a_duplicate() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = engine_in(&tmp);
        let a = tmp.path().join("a.txt");
        let b = tmp.path().join("b.txt");
        std::fs::write(&a, b"hello").unwrap();
        std::fs::write(&b, b"hello").unwrap();

        engine.process_path(&a);
        let result = engine.process_path(&b);
        assert_eq!(result.result, DedupeResult::Duplicate);
        assert_eq!(result.duplicate_of, Some(a));
    }

    #[test]
    fn empty_file_is_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = engine_in(&tmp);
        let path = tmp.path().join("empty.txt");
        std::fs::write(&path, b"").unwrap();

        let result = engine.process_path(&path);
        assert_eq!(result.result, DedupeResult::Skipped);
    }

    #[test]
    fn scan_directory_processes_every_candidate() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = engine_in(&tmp);
        std::fs::write(tmp.path().join("a.txt"), b"a").unwrap();
        std::fs::write(tmp.path().join("b.txt"), b"b").unwrap();

        let results = engine.scan_directory(tmp.path());
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn stats_reports_schema_version() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = engine_in(&tmp);
        let stats = engine.stats().unwrap();
        assert_eq!(stats.schema_version, crate::db::SCHEMA_VERSION);
    }

    #[test]
    fn unique_file_with_content_store_is_relocated() {
        let tmp = tempfile::tempdir().unwrap();
        let store_root = tmp.path().join("store");
        std::fs::create_dir(&store_root).unwrap();
        let config = EngineConfig::new(tmp.path().join("dedupe.db")).with_content_store(&store_root);
        let engine = Engine::open_with_sink(config, Arc::new(NullSink)).unwrap();

        let src = tmp.path().join("a.txt");
        std::fs::write(&src, b"hello").unwrap();

        let result = engine.process_path(&src);
        assert_eq!(result.result, DedupeResult::Unique);
        assert!(!src.exists());
    }
}
