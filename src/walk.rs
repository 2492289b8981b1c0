//! Directory walker: yields candidate file paths for scanning.
//!
//! Enumerates directory entries directly rather than through a general
//! recursive-traversal crate, since the contract here is narrower than
//! most: symlinks are never followed, ignore patterns come from three
//! sources merged together, and a single unreadable entry is logged and
//! skipped rather than aborting the whole walk.

use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use crate::config::{BUILTIN_IGNORE_PATTERNS, IGNORE_FILENAME};
use crate::log_sink::{LogLevel, SharedLogSink};

/// The full ignore set for a walk: built-in defaults, caller-supplied
/// patterns, and the contents of a `.bgateignore` file in the walked
/// directory, if present. Patterns are matched against a path's file
/// name by simple equality or glob-free substring containment, mirroring
/// the reference implementation's plain string matching.
pub struct IgnoreSet {
    patterns: Vec<String>,
}

impl IgnoreSet {
    pub fn assemble(dir: &Path, user_patterns: &[String]) -> Self {
        let mut patterns: Vec<String> = BUILTIN_IGNORE_PATTERNS
            .iter()
            .map(|s| s.to_string())
            .collect();
        patterns.extend(user_patterns.iter().cloned());
        patterns.extend(read_ignore_file(dir));
        IgnoreSet { patterns }
    }

    pub fn is_ignored(&self, name: &str) -> bool {
        self.patterns.iter().any(|p| p == name)
    }
}

fn read_ignore_file(dir: &Path) -> Vec<String> {
    let path = dir.join(IGNORE_FILENAME);
    let Ok(file) = fs::File::open(&path) else {
        return Vec::new();
    };
    BufReader::new(file)
        .lines()
        .map_while(|l| l.ok())
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .collect()
}

/// Walks `root`, yielding regular-file candidate paths. Descends into
/// subdirectories only when `recursive` is set. Never follows symlinks,
/// whether to files or directories. I/O errors on individual entries are
/// logged through `sink` and skipped; they never abort the walk.
pub fn walk(root: &Path, recursive: bool, user_patterns: &[String], sink: &SharedLogSink) -> Vec<PathBuf> {
    let mut out = Vec::new();
    walk_into(root, recursive, user_patterns, sink, &mut out);
    out
}

fn walk_into(dir: &Path, recursive: bool, user_patterns: &[String], sink: &SharedLogSink, out: &mut Vec<PathBuf>) {
    let entries = match fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) => {
            sink.log(
                LogLevel::Warning,
                &format!("cannot read directory {}: {e}", dir.display()),
            );
            return;
        }
    };

    let ignore = IgnoreSet::assemble(dir, user_patterns);

    for entry in entries {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                sink.log(
                    LogLevel::Warning,
                    &format!("cannot read directory entry in {}: {e}", dir.display()),
                );
                continue;
            }
        };

        let name = entry.file_name();
        let name_str = name.to_string_lossy();
        if ignore.is_ignored(&name_str) {
            continue;
        }

        let file_type = match entry.file_type() {
            Ok(ft) => ft,
            Err(e) => {
                sink.log(
                    LogLevel::Warning,
                    &format!("cannot stat {}: {e}", entry.path().display()),
                );
                continue;
            }
        };

        if file_type.is_symlink() {
            continue;
        }

        if file_type.is_dir() {
            if recursive {
                walk_into(&entry.path(), recursive, user_patterns, sink, out);
            }
            continue;
        }

        if file_type.is_file() {
            out.push(entry.path());
        }
    }
}
