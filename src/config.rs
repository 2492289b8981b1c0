//! Engine configuration.

use std::path::{Path, PathBuf};

pub const DEFAULT_DB_FILENAME: &str = "dedupe.db";
pub const EMERGENCY_LOG_FILENAME: &str = "emergency_orphans.jsonl";
pub const LEGACY_EMERGENCY_LOG_FILENAME: &str = "emergency_orphans.txt";
pub const IGNORE_FILENAME: &str = ".bgateignore";

pub const BUILTIN_IGNORE_PATTERNS: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    ".DS_Store",
    "__pycache__",
    ".venv",
    "node_modules",
    ".cache",
    "Thumbs.db",
];

/// Configuration for an [`crate::engine::Engine`] instance.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Path to the SQLite index database.
    pub db_path: PathBuf,
    /// Root of the content-addressed store. Files classified as UNIQUE
    /// are moved under this directory when set; when `None`, the engine
    /// only classifies and never relocates files.
    pub content_store_root: Option<PathBuf>,
    /// Additional user-supplied ignore patterns, combined with
    /// [`BUILTIN_IGNORE_PATTERNS`] and any `.bgateignore` file found
    /// during a walk.
    pub ignore_patterns: Vec<String>,
    /// Whether directory scans descend into subdirectories.
    pub recursive: bool,
}

impl EngineConfig {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        EngineConfig {
            db_path: db_path.into(),
            content_store_root: None,
            ignore_patterns: Vec::new(),
            recursive: false,
        }
    }

    pub fn with_content_store(mut self, root: impl Into<PathBuf>) -> Self {
        self.content_store_root = Some(root.into());
        self
    }

    pub fn with_recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    pub fn with_ignore_patterns(mut self, patterns: Vec<String>) -> Self {
        self.ignore_patterns = patterns;
        self
    }

    pub fn emergency_log_path(&self) -> PathBuf {
        self.db_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(EMERGENCY_LOG_FILENAME)
    }

    pub fn legacy_emergency_log_path(&self) -> PathBuf {
        self.db_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(LEGACY_EMERGENCY_LOG_FILENAME)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig::new(DEFAULT_DB_FILENAME)
    }
}
