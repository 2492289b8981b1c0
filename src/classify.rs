//! The tiered classifier: short-circuits a candidate file against the
//! index through increasingly expensive tiers (size, fringe digest,
//! full digest) until it is either proven unique or found to duplicate
//! an already-registered file.

use std::fs;
use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::path::{Path, PathBuf};

use crate::db::IndexStore;
use crate::error::Result;
use crate::hash::{fringe_digest, full_digest};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    EmptyPath,
    NulByte,
    Symlink,
    NotRegularFile,
    Unreadable,
    DeviceFile,
    ZeroLength,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// Not present in the index at any tier reached. Carries whatever
    /// digests were already computed while getting there, so the
    /// registration pipeline never recomputes them.
    Unique {
        tier: u8,
        file_size: u64,
        fringe_digest: Option<[u8; 8]>,
        full_digest: Option<[u8; 16]>,
    },
    Duplicate { stored_path: PathBuf, tier: u8 },
    Skipped { reason: SkipReason },
}

/// Rejects candidates the classifier must never touch: empty paths, a
/// NUL byte anywhere in the path, symlinks, non-regular files, files
/// this process can't read, and character/block device nodes.
pub fn validate_candidate(path: &Path) -> Result<Option<SkipReason>> {
    let path_str = match path.to_str() {
        Some(s) => s,
        None => return Ok(Some(SkipReason::NulByte)),
    };
    if path_str.is_empty() {
        return Ok(Some(SkipReason::EmptyPath));
    }
    if path_str.contains('\0') {
        return Ok(Some(SkipReason::NulByte));
    }

    let symlink_meta = fs::symlink_metadata(path);
    match symlink_meta {
        Ok(meta) if meta.file_type().is_symlink() => return Ok(Some(SkipReason::Symlink)),
        Ok(_) => {}
        Err(_) => return Ok(Some(SkipReason::Unreadable)),
    }

    let meta = match fs::metadata(path) {
        Ok(m) => m,
        Err(_) => return Ok(Some(SkipReason::Unreadable)),
    };

    if meta.file_type().is_char_device() || meta.file_type().is_block_device() {
        return Ok(Some(SkipReason::DeviceFile));
    }

    if !meta.is_file() {
        return Ok(Some(SkipReason::NotRegularFile));
    }

    if fs::File::open(path).is_err() {
        return Ok(Some(SkipReason::Unreadable));
    }

    Ok(None)
}

/// Runs the four-tier short-circuit classification: tier 0 rejects
/// zero-length files outright (an empty file can never be meaningfully
/// deduplicated), tier 1 checks whether any file of this size is known,
/// tier 2 checks the fringe digest, tier 3 checks the full digest. Each
/// tier that runs carries its digest forward into the result so the
/// registration pipeline never recomputes it.
///
/// Classification only reads the index; it never calls `add_size`,
/// `add_fringe`, or `add_full` itself — those writes belong to phase 3
/// of the registration pipeline, after the file has actually landed in
/// its final location.
pub fn classify(store: &IndexStore, path: &Path) -> Result<Classification> {
    let meta = fs::metadata(path).map_err(|e| crate::error::Error::io(path, e))?;
    let file_size = meta.size();

    if file_size == 0 {
        return Ok(Classification::Skipped {
            reason: SkipReason::ZeroLength,
        });
    }

    if !store.size_exists(file_size)? {
        return Ok(Classification::Unique {
            tier: 1,
            file_size,
            fringe_digest: None,
            full_digest: None,
        });
    }

    let fringe = fringe_digest(path)?;
    if store.fringe_lookup(&fringe, file_size)?.is_none() {
        return Ok(Classification::Unique {
            tier: 2,
            file_size,
            fringe_digest: Some(fringe),
            full_digest: None,
        });
    }

    let full = full_digest(path)?;
    match store.full_lookup(&full)? {
        Some(stored) => {
            let stored_path = PathBuf::from(stored);
            if is_same_file(path, &stored_path) {
                Ok(Classification::Unique {
                    tier: 3,
                    file_size,
                    fringe_digest: Some(fringe),
                    full_digest: Some(full),
                })
            } else {
                Ok(Classification::Duplicate {
                    stored_path,
                    tier: 3,
                })
            }
        }
        None => Ok(Classification::Unique {
            tier: 3,
            file_size,
            fringe_digest: Some(fringe),
            full_digest: Some(full),
        }),
    }
}

/// Compares the candidate against the path the index already has on
/// record for this digest by their canonicalized forms, so re-scanning
/// an already-registered file at its own path classifies as UNIQUE
/// (self-scan) rather than DUPLICATE. Falls back to a literal path
/// comparison if either side can't be canonicalized (e.g. the stored
/// path no longer exists).
fn is_same_file(candidate: &Path, stored: &Path) -> bool {
    match (fs::canonicalize(candidate), fs::canonicalize(stored)) {
        (Ok(a), Ok(b)) => a == b,
        _ => candidate == stored,
    }
}
