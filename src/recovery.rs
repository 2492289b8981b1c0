//! Startup recovery: reconciles on-disk state with the index after an
//! unclean shutdown. Runs, in order, once per engine open:
//! 1. import any emergency-orphan log entries into the orphan registry
//! 2. reconcile incomplete move-journal entries
//! 3. attempt to recover pending orphans
//!
//! This ordering matters: journal reconciliation can itself create new
//! orphans, and importing the emergency log first means those don't get
//! missed if the process crashes again mid-recovery.

use std::fs;
use std::path::Path;

use crate::db::{IndexStore, JournalEntry, JournalPhase};
use crate::emergency_log::{self, LogLine};
use crate::log_sink::{LogLevel, SharedLogSink};
use crate::move_primitive::{durable_move, fsync_dir};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoverySummary {
    pub emergency_orphans_imported: u64,
    pub journal_entries_reconciled: u64,
    pub orphans_recovered: u64,
}

pub fn recover(
    store: &IndexStore,
    emergency_log_path: &Path,
    legacy_emergency_log_path: &Path,
    sink: &SharedLogSink,
) -> crate::error::Result<RecoverySummary> {
    let mut summary = RecoverySummary::default();

    summary.emergency_orphans_imported +=
        import_emergency_log(store, emergency_log_path, sink)?;
    summary.emergency_orphans_imported +=
        import_legacy_emergency_log(store, legacy_emergency_log_path, sink)?;

    summary.journal_entries_reconciled = reconcile_journal(store, sink)?;

    summary.orphans_recovered = recover_orphans(store, sink)?;

    Ok(summary)
}

fn import_emergency_log(
    store: &IndexStore,
    path: &Path,
    sink: &SharedLogSink,
) -> crate::error::Result<u64> {
    let entries = emergency_log::read_entries(path)?;
    if entries.is_empty() {
        return Ok(0);
    }

    let mut imported = 0u64;
    let mut kept_lines = Vec::new();

    for (raw_line, parsed) in entries {
        match parsed {
            LogLine::Parsed(record) => {
                if Path::new(&record.orphan_path).exists() {
                    store.add_orphan(&record.original_path, &record.orphan_path, record.file_size)?;
                    imported += 1;
                } else {
                    sink.log(
                        LogLevel::Warning,
                        &format!(
                            "emergency orphan {} no longer exists, dropping entry",
                            record.orphan_path
                        ),
                    );
                }
            }
            LogLine::Unparsed(_) => kept_lines.push(raw_line),
        }
    }

    emergency_log::rewrite(path, &kept_lines)?;
    Ok(imported)
}

fn import_legacy_emergency_log(
    store: &IndexStore,
    path: &Path,
    sink: &SharedLogSink,
) -> crate::error::Result<u64> {
    let Ok(contents) = std::fs::read_to_string(path) else {
        return Ok(0);
    };

    let mut imported = 0u64;
    let mut kept_lines = Vec::new();

    for line in contents.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match emergency_log::parse_legacy_line(line) {
            Some(record) if Path::new(&record.orphan_path).exists() => {
                store.add_orphan(&record.original_path, &record.orphan_path, record.file_size)?;
                imported += 1;
            }
            Some(record) => {
                sink.log(
                    LogLevel::Warning,
                    &format!(
                        "legacy emergency orphan {} no longer exists, dropping entry",
                        record.orphan_path
                    ),
                );
            }
            None => kept_lines.push(line.to_string()),
        }
    }

    emergency_log::rewrite(path, &kept_lines)?;
    Ok(imported)
}

fn reconcile_journal(store: &IndexStore, sink: &SharedLogSink) -> crate::error::Result<u64> {
    let entries = store.get_incomplete_journal_entries()?;
    let mut reconciled = 0u64;

    for entry in entries {
        reconcile_entry(store, &entry, sink)?;
        reconciled += 1;
    }

    Ok(reconciled)
}

fn reconcile_entry(store: &IndexStore, entry: &JournalEntry, sink: &SharedLogSink) -> crate::error::Result<()> {
    let phase = JournalPhase::from_str(&entry.phase_raw);

    match phase {
        Some(JournalPhase::Planned) => {
            store.update_move_phase(entry.id, JournalPhase::Failed)?;
        }
        Some(JournalPhase::Moving) => {
            reconcile_moving_entry(store, entry, sink)?;
        }
        Some(JournalPhase::Completed) | Some(JournalPhase::Failed) => {
            // get_incomplete_journal_entries already excludes these.
        }
        None => {
            return Err(crate::error::Error::CorruptJournalEntry {
                id: entry.id,
                phase: entry.phase_raw.clone(),
            });
        }
    }

    Ok(())
}

/// Rolls back a `moving`-phase journal entry without first checking
/// whether `source`/`dest` exist (a stat-then-branch is its own TOCTOU
/// window); instead the link/unlink calls are attempted unconditionally
/// and the outcome is decided from the resulting errno, exactly as the
/// forward move itself would be interrupted and resumed.
fn reconcile_moving_entry(
    store: &IndexStore,
    entry: &JournalEntry,
    sink: &SharedLogSink,
) -> crate::error::Result<()> {
    let source = Path::new(&entry.source_path);
    let dest = Path::new(&entry.dest_path);

    match fs::hard_link(dest, source) {
        Ok(()) => {
            if let Some(parent) = source.parent() {
                if let Err(e) = fsync_dir(parent) {
                    sink.log(LogLevel::Warning, &format!("fsync of {} failed: {e}", parent.display()));
                }
            }
            if let Err(e) = fs::remove_file(dest) {
                sink.log(
                    LogLevel::Warning,
                    &format!("could not remove {} after rollback link: {e}", entry.dest_path),
                );
            }
            if let Some(parent) = dest.parent() {
                if let Err(e) = fsync_dir(parent) {
                    sink.log(LogLevel::Warning, &format!("fsync of {} failed: {e}", parent.display()));
                }
            }
            store.update_move_phase(entry.id, JournalPhase::Failed)?;
        }
        Err(e) => match e.raw_os_error() {
            Some(code) if code == libc::EEXIST => {
                // source is already present: the rollback link is
                // redundant, just remove the duplicate at dest.
                if let Err(e2) = fs::remove_file(dest) {
                    if e2.kind() != std::io::ErrorKind::NotFound {
                        sink.log(
                            LogLevel::Warning,
                            &format!("could not remove duplicate copy {}: {e2}", entry.dest_path),
                        );
                    }
                }
                store.update_move_phase(entry.id, JournalPhase::Failed)?;
            }
            Some(code) if code == libc::ENOENT => {
                // dest never existed: the move never got as far as the
                // hardlink, nothing to undo.
                store.update_move_phase(entry.id, JournalPhase::Failed)?;
            }
            Some(code) if code == libc::EXDEV => {
                sink.log(
                    LogLevel::Error,
                    &format!(
                        "move journal entry {} spans filesystems ({} -> {}); manual intervention required",
                        entry.id, entry.dest_path, entry.source_path
                    ),
                );
            }
            _ => {
                sink.log(
                    LogLevel::Warning,
                    &format!(
                        "could not roll back incomplete move {} -> {}: {e}",
                        entry.dest_path, entry.source_path
                    ),
                );
                store.update_move_phase(entry.id, JournalPhase::Failed)?;
            }
        },
    }

    Ok(())
}

fn recover_orphans(store: &IndexStore, sink: &SharedLogSink) -> crate::error::Result<u64> {
    let pending = store.get_pending_orphans()?;
    let mut recovered = 0u64;

    for orphan in pending {
        let orphan_path = Path::new(&orphan.orphan_path);
        let original_path = Path::new(&orphan.original_path);

        if !orphan_path.exists() {
            store.update_orphan_status(orphan.id, "failed")?;
            continue;
        }

        if original_path.exists() {
            // Original was recreated since the orphan was recorded;
            // leave the orphaned copy in place for manual review.
            sink.log(
                LogLevel::Warning,
                &format!(
                    "cannot recover orphan {}: original path {} already exists",
                    orphan.orphan_path, orphan.original_path
                ),
            );
            continue;
        }

        match durable_move(orphan_path, original_path) {
            Ok(()) => {
                store.update_orphan_status(orphan.id, "recovered")?;
                recovered += 1;
            }
            Err(e) => {
                sink.log(
                    LogLevel::Warning,
                    &format!("failed to recover orphan {}: {e}", orphan.orphan_path),
                );
            }
        }
    }

    Ok(recovered)
}
