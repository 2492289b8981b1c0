//! Registration pipeline: turns a classified-unique candidate into a
//! permanently indexed, optionally relocated file.
//!
//! Three phases, each able to fail independently:
//! 1. reserve a destination and journal the intent to move there
//! 2. perform the durable move outside any database transaction
//! 3. index the file at its final location
//!
//! If phase 3 fails after phase 2 succeeded, the file is rolled back to
//! its original location; if the rollback itself fails, the file
//! becomes an orphan — recorded in the database if reachable, or in the
//! emergency log if not.

use std::path::{Path, PathBuf};

use crate::classify::Classification;
use crate::content_store;
use crate::db::{IndexStore, JournalPhase};
use crate::emergency_log;
use crate::error::Result;
use crate::hash::{fringe_digest, full_digest};
use crate::log_sink::{LogLevel, SharedLogSink};
use crate::move_primitive::durable_move;

const MAX_RESERVATION_RETRIES: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredFile {
    pub storage_path: PathBuf,
    pub tier: u8,
}

/// What registering a unique candidate actually produced: either it
/// landed in the index as a new entry, or a concurrent (or crashed-then-
/// recovered) registration beat it to the same full digest and the
/// duplicate-conflict compensator reclassified it as a duplicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterOutcome {
    Registered(RegisteredFile),
    Duplicate { stored_path: PathBuf, tier: u8 },
}

enum IndexOutcome {
    Indexed,
    Conflict,
}

/// Registers a file the classifier has already determined is unique.
/// `content_store_root` of `None` means files are indexed in place and
/// never relocated — phase 1/2 are skipped entirely.
pub fn register_unique(
    store: &IndexStore,
    original_path: &Path,
    classification: &Classification,
    content_store_root: Option<&Path>,
    emergency_log_path: &Path,
    sink: &SharedLogSink,
) -> Result<RegisterOutcome> {
    let (tier, file_size, mut fringe, mut full) = match classification {
        Classification::Unique {
            tier,
            file_size,
            fringe_digest,
            full_digest,
        } => (*tier, *file_size, *fringe_digest, *full_digest),
        _ => {
            return Err(crate::error::Error::Unclassifiable {
                path: original_path.to_path_buf(),
                reason: "register_unique called with a non-Unique classification".to_string(),
            })
        }
    };

    let (storage_path, journal_id) = match content_store_root {
        Some(root) => {
            let (dest, journal_id) =
                reserve_and_move(store, original_path, root, file_size, full, sink)?;
            (dest, Some(journal_id))
        }
        None => (original_path.to_path_buf(), None),
    };

    match index_at_final_location(store, &storage_path, file_size, &mut fringe, &mut full) {
        Ok(IndexOutcome::Indexed) => Ok(RegisterOutcome::Registered(RegisteredFile {
            storage_path,
            tier,
        })),
        Ok(IndexOutcome::Conflict) => compensate_duplicate_conflict(
            store,
            original_path,
            &storage_path,
            full.expect("full digest is always computed before a conflict can be detected"),
            file_size,
            journal_id,
            emergency_log_path,
            sink,
        ),
        Err(e) => {
            if storage_path != original_path {
                recover_from_indexing_failure(
                    store,
                    original_path,
                    &storage_path,
                    file_size,
                    emergency_log_path,
                    sink,
                );
            }
            Err(e)
        }
    }
}

fn reserve_and_move(
    store: &IndexStore,
    original_path: &Path,
    root: &Path,
    file_size: u64,
    full_digest: Option<[u8; 16]>,
    sink: &SharedLogSink,
) -> Result<(PathBuf, i64)> {
    let extension = original_path.extension().and_then(|e| e.to_str());

    let mut dest = match full_digest {
        Some(digest) => content_store::destination_for_digest(root, &digest, extension),
        None => content_store::destination_for_unknown(root, extension),
    };

    for attempt in 0..MAX_RESERVATION_RETRIES {
        if attempt > 0 {
            dest = content_store::with_collision_suffix(&dest);
        }

        store.begin()?;
        let journal_id = match store.journal_move(
            &original_path.to_string_lossy(),
            &dest.to_string_lossy(),
            file_size,
        ) {
            Ok(id) => id,
            Err(e) => {
                store.rollback()?;
                return Err(e);
            }
        };
        store.update_move_phase(journal_id, JournalPhase::Moving)?;
        store.commit()?;

        content_store::ensure_shard_dir(root, &dest)?;

        match durable_move(original_path, &dest) {
            Ok(()) => {
                store.begin()?;
                store.update_move_phase(journal_id, JournalPhase::Completed)?;
                store.commit()?;
                return Ok((dest, journal_id));
            }
            Err(e) if is_destination_collision(&e) => {
                store.begin()?;
                store.update_move_phase(journal_id, JournalPhase::Failed)?;
                store.commit()?;
                sink.log(
                    LogLevel::Warning,
                    &format!(
                        "destination collision moving {} to {}, retrying",
                        original_path.display(),
                        dest.display()
                    ),
                );
                continue;
            }
            Err(e) => {
                store.begin()?;
                store.update_move_phase(journal_id, JournalPhase::Failed)?;
                store.commit()?;
                return Err(e);
            }
        }
    }

    Err(crate::error::Error::Unclassifiable {
        path: original_path.to_path_buf(),
        reason: format!("could not reserve a destination after {MAX_RESERVATION_RETRIES} attempts"),
    })
}

fn is_destination_collision(e: &crate::error::Error) -> bool {
    matches!(e, crate::error::Error::Io { source, .. } if source.kind() == std::io::ErrorKind::AlreadyExists)
}

fn index_at_final_location(
    store: &IndexStore,
    storage_path: &Path,
    file_size: u64,
    fringe: &mut Option<[u8; 8]>,
    full: &mut Option<[u8; 16]>,
) -> Result<IndexOutcome> {
    if fringe.is_none() {
        *fringe = Some(fringe_digest(storage_path)?);
    }
    if full.is_none() {
        *full = Some(full_digest(storage_path)?);
    }

    store.begin()?;
    let result = (|| -> Result<bool> {
        store.add_size(file_size)?;
        store.add_fringe(&fringe.unwrap(), file_size, &storage_path.to_string_lossy())?;
        let inserted = store.add_full(&full.unwrap(), &storage_path.to_string_lossy(), None)?;
        Ok(inserted)
    })();

    match result {
        Ok(true) => {
            store.commit()?;
            Ok(IndexOutcome::Indexed)
        }
        Ok(false) => {
            store.rollback()?;
            Ok(IndexOutcome::Conflict)
        }
        Err(e) => {
            store.rollback()?;
            Err(e)
        }
    }
}

/// The duplicate-conflict compensator: another registration (concurrent,
/// or a crashed-then-recovered candidate) already holds the full digest
/// `add_full` just rejected. Reverses this candidate's move back to its
/// original path and reclassifies it as a duplicate of the path that won.
///
/// `journal_id` is `None` when no content store is configured (the file
/// was never relocated), in which case there is nothing to reverse.
fn compensate_duplicate_conflict(
    store: &IndexStore,
    original_path: &Path,
    dest_path: &Path,
    full_digest: [u8; 16],
    file_size: u64,
    original_journal_id: Option<i64>,
    emergency_log_path: &Path,
    sink: &SharedLogSink,
) -> Result<RegisterOutcome> {
    let stored_path = store
        .full_lookup(&full_digest)?
        .map(PathBuf::from)
        .unwrap_or_else(|| dest_path.to_path_buf());

    if dest_path == original_path {
        if let Some(id) = original_journal_id {
            store.begin()?;
            store.update_move_phase(id, JournalPhase::Failed)?;
            store.commit()?;
        }
        return Ok(RegisterOutcome::Duplicate {
            stored_path,
            tier: 3,
        });
    }

    store.begin()?;
    let compensating_journal_id = match store.journal_move(
        &dest_path.to_string_lossy(),
        &original_path.to_string_lossy(),
        file_size,
    ) {
        Ok(id) => id,
        Err(e) => {
            store.rollback()?;
            return Err(e);
        }
    };
    store.update_move_phase(compensating_journal_id, JournalPhase::Moving)?;
    store.commit()?;

    let reverse_result = durable_move(dest_path, original_path);

    store.begin()?;
    store.update_move_phase(
        compensating_journal_id,
        if reverse_result.is_ok() {
            JournalPhase::Completed
        } else {
            JournalPhase::Failed
        },
    )?;
    if let Some(id) = original_journal_id {
        store.update_move_phase(id, JournalPhase::Failed)?;
    }
    store.commit()?;

    if let Err(e) = reverse_result {
        sink.log(
            LogLevel::Warning,
            &format!(
                "duplicate-conflict compensator could not reverse move {} -> {}: {e}",
                dest_path.display(),
                original_path.display()
            ),
        );
        match store.add_orphan(
            &original_path.to_string_lossy(),
            &dest_path.to_string_lossy(),
            file_size,
        ) {
            Ok(_) => {}
            Err(_) => {
                let _ = emergency_log::write_emergency_orphan(
                    emergency_log_path,
                    original_path,
                    dest_path,
                    file_size,
                    sink,
                );
            }
        }
    }

    Ok(RegisterOutcome::Duplicate {
        stored_path,
        tier: 3,
    })
}

/// After a successful move but a failed index write: roll the file back
/// to its original location. If that also fails, the file is recorded
/// as an orphan in the database; if the database itself can't be
/// reached, the orphan is appended to the emergency log as a last
/// resort.
fn recover_from_indexing_failure(
    store: &IndexStore,
    original_path: &Path,
    storage_path: &Path,
    file_size: u64,
    emergency_log_path: &Path,
    sink: &SharedLogSink,
) {
    if !storage_path.exists() {
        return;
    }

    match durable_move(storage_path, original_path) {
        Ok(()) => {}
        Err(e) => {
            sink.log(
                LogLevel::Warning,
                &format!(
                    "failed to roll back move {} -> {}: {e}",
                    storage_path.display(),
                    original_path.display()
                ),
            );
            match store.add_orphan(
                &original_path.to_string_lossy(),
                &storage_path.to_string_lossy(),
                file_size,
            ) {
                Ok(_) => {}
                Err(_) => {
                    let _ = emergency_log::write_emergency_orphan(
                        emergency_log_path,
                        original_path,
                        storage_path,
                        file_size,
                        sink,
                    );
                }
            }
        }
    }
}
