//! The emergency orphan log: a side channel for recording orphaned
//! content when the database itself can't be reached. JSON Lines so
//! appends are cheap and partial writes are confined to a single line;
//! rewritten crash-safely (temp file, fsync, rename, fsync parent
//! directory) whenever entries are consumed.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::log_sink::{LogLevel, SharedLogSink};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EmergencyOrphan {
    pub timestamp: String,
    pub original_path: String,
    pub orphan_path: String,
    pub file_size: u64,
}

/// Appends a single orphan record to `path`. Failure here is the last
/// line of defense against data loss; callers log at `critical` and
/// otherwise give up, since there's nowhere further to escalate to.
pub fn write_emergency_orphan(
    path: &Path,
    original_path: &Path,
    orphan_path: &Path,
    file_size: u64,
    sink: &SharedLogSink,
) -> Result<()> {
    let record = EmergencyOrphan {
        timestamp: chrono::Utc::now().to_rfc3339(),
        original_path: original_path.to_string_lossy().into_owned(),
        orphan_path: orphan_path.to_string_lossy().into_owned(),
        file_size,
    };

    let line = serde_json::to_string(&record).map_err(|e| Error::EmergencyLogWrite {
        path: path.to_path_buf(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
    })?;

    let result = (|| -> std::io::Result<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{line}")?;
        file.sync_all()
    })();

    if let Err(e) = result {
        sink.log(
            LogLevel::Critical,
            &format!(
                "failed to record emergency orphan for {}: {e}",
                original_path.display()
            ),
        );
        return Err(Error::EmergencyLogWrite {
            path: path.to_path_buf(),
            source: e,
        });
    }

    Ok(())
}

/// One line of the emergency log, either parsed or, if the JSON was
/// malformed, kept verbatim so a rewrite can preserve it rather than
/// silently drop data.
pub enum LogLine {
    Parsed(EmergencyOrphan),
    Unparsed(String),
}

/// Reads every line of the current-format log, parsing what it can.
pub fn read_entries(path: &Path) -> Result<Vec<(String, LogLine)>> {
    let Ok(file) = File::open(path) else {
        return Ok(Vec::new());
    };
    let mut parsed = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|e| Error::io(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<EmergencyOrphan>(&line) {
            Ok(record) => parsed.push((line, LogLine::Parsed(record))),
            Err(_) => parsed.push((line.clone(), LogLine::Unparsed(line))),
        }
    }
    Ok(parsed)
}

/// Parses the legacy pipe-delimited `.txt` format:
/// `timestamp|original_path|orphan_path|file_size`.
pub fn parse_legacy_line(line: &str) -> Option<EmergencyOrphan> {
    let parts: Vec<&str> = line.splitn(4, '|').collect();
    if parts.len() != 4 {
        return None;
    }
    let file_size = parts[3].trim().parse().ok()?;
    Some(EmergencyOrphan {
        timestamp: parts[0].to_string(),
        original_path: parts[1].to_string(),
        orphan_path: parts[2].to_string(),
        file_size,
    })
}

/// Crash-safely rewrites `path` to contain only `remaining_lines`: if
/// empty, the file is removed outright; otherwise a temp file is
/// written, fsynced, and renamed over the original, with the containing
/// directory fsynced afterward so the rename itself survives a crash.
pub fn rewrite(path: &Path, remaining_lines: &[String]) -> Result<()> {
    if remaining_lines.is_empty() {
        if path.exists() {
            fs::remove_file(path).map_err(|e| Error::io(path, e))?;
        }
        fsync_parent(path);
        return Ok(());
    }

    let tmp_path = tmp_path_for(path);
    {
        let mut tmp = File::create(&tmp_path).map_err(|e| Error::io(&tmp_path, e))?;
        for line in remaining_lines {
            writeln!(tmp, "{line}").map_err(|e| Error::io(&tmp_path, e))?;
        }
        tmp.sync_all().map_err(|e| Error::io(&tmp_path, e))?;
    }

    // fsync the directory before the rename, and again after, so the
    // rename itself is durable regardless of where a crash lands.
    fsync_parent(path);

    fs::rename(&tmp_path, path).map_err(|e| Error::io(path, e))?;

    fsync_parent(path);

    Ok(())
}

fn fsync_parent(path: &Path) {
    if let Some(parent) = path.parent() {
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut os_str = path.as_os_str().to_os_string();
    os_str.push(".tmp");
    PathBuf::from(os_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use crate::log_sink::NullSink;

    #[test]
    fn write_then_read_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let log_path = tmp.path().join("emergency_orphans.jsonl");
        let sink: SharedLogSink = Arc::new(NullSink);

        write_emergency_orphan(&log_path, Path::new("/orig"), Path::new("/orphan"), 42, &sink).unwrap();
        let entries = read_entries(&log_path).unwrap();
        assert_eq!(entries.len(), 1);
        match &entries[0].1 {
            LogLine::Parsed(record) => {
                assert_eq!(record.original_path, "/orig");
                assert_eq!(record.orphan_path, "/orphan");
                assert_eq!(record.file_size, 42);
            }
            LogLine::Unparsed(_) => panic!("expected a parsed record"),
        }
    }

    #[test]
    fn rewrite_with_no_remaining_lines_deletes_file() {
        let tmp = tempfile::tempdir().unwrap();
        let log_path = tmp.path().join("emergency_orphans.jsonl");
        let sink: SharedLogSink = Arc::new(NullSink);
        write_emergency_orphan(&log_path, Path::new("/orig"), Path::new("/orphan"), 1, &sink).unwrap();

        rewrite(&log_path, &[]).unwrap();
        assert!(!log_path.exists());
    }

    #[test]
    fn rewrite_preserves_unconsumed_lines() {
        let tmp = tempfile::tempdir().unwrap();
        let log_path = tmp.path().join("emergency_orphans.jsonl");
        rewrite(&log_path, &["kept-line".to_string()]).unwrap();
        let contents = fs::read_to_string(&log_path).unwrap();
        assert_eq!(contents, "kept-line\n");
    }

    #[test]
    fn legacy_line_parses_pipe_delimited_format() {
        let line = "2024-01-01T00:00:00|/orig|/orphan|123";
        let record = parse_legacy_line(line).unwrap();
        assert_eq!(record.original_path, "/orig");
        assert_eq!(record.orphan_path, "/orphan");
        assert_eq!(record.file_size, 123);
    }

    #[test]
    fn legacy_line_rejects_malformed_input() {
        assert!(parse_legacy_line("not-enough-fields").is_none());
    }
}
