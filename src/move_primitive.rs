//! The durable move primitive: hardlink the source into the content
//! store, fsync in an order that survives a crash at any point, then
//! unlink the source.
//!
//! Never uses `rename`: a rename across filesystems silently becomes a
//! copy-then-delete in some implementations and atomicity can't be
//! assumed, whereas link-then-unlink gives an explicit two-step protocol
//! this module controls end to end. Cross-filesystem moves are rejected
//! outright (`EXDEV`) rather than falling back to copy, matching the
//! absolute-trust, no-partial-semantics model the rest of the engine
//! keeps.

use std::fs::{self, File};
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::signal::SignalDeferGuard;

/// Performs the nine-step durable move: walk missing ancestor
/// directories, defer SIGINT/SIGTERM for the critical section, create
/// ancestors and fsync them bottom-up, hardlink `src` to `dst`, fsync
/// `dst`'s parent, unlink `src`, fsync `src`'s parent, then restore
/// signal handling (re-raising anything deferred).
pub fn durable_move(src: &Path, dst: &Path) -> Result<()> {
    let missing_ancestors = missing_ancestors(dst)?;

    let guard = SignalDeferGuard::install()?;
    let result = durable_move_inner(src, dst, &missing_ancestors);
    drop(guard);
    result
}

fn durable_move_inner(src: &Path, dst: &Path, missing_ancestors: &[PathBuf]) -> Result<()> {
    for dir in missing_ancestors {
        fs::create_dir(dir).or_else(|e| {
            if e.kind() == io::ErrorKind::AlreadyExists {
                Ok(())
            } else {
                Err(Error::io(dir, e))
            }
        })?;
    }

    // fsync newly created ancestors deepest-first, then their parents,
    // so a crash never leaves a directory entry whose parent was never
    // durably recorded.
    for dir in missing_ancestors.iter().rev() {
        fsync_dir(dir)?;
    }
    if let Some(top) = missing_ancestors.first() {
        if let Some(parent) = top.parent() {
            fsync_dir(parent)?;
        }
    }

    fs::hard_link(src, dst).map_err(|e| match e.raw_os_error() {
        Some(code) if code == libc::EXDEV => Error::CrossDevice {
            src: src.to_path_buf(),
            dst: dst.to_path_buf(),
        },
        _ => Error::io(dst, e),
    })?;

    if let Some(dst_parent) = dst.parent() {
        fsync_dir(dst_parent)?;
    }

    fs::remove_file(src).map_err(|e| Error::io(src, e))?;

    if let Some(src_parent) = src.parent() {
        fsync_dir(src_parent)?;
    }

    Ok(())
}

/// Returns the ancestor directories of `path` that don't exist yet,
/// ordered from shallowest to deepest missing directory.
fn missing_ancestors(path: &Path) -> Result<Vec<PathBuf>> {
    let mut missing = Vec::new();
    let mut current = path.parent();
    while let Some(dir) = current {
        if dir.as_os_str().is_empty() {
            break;
        }
        match fs::metadata(dir) {
            Ok(meta) if meta.is_dir() => break,
            Ok(_) => {
                return Err(Error::Unclassifiable {
                    path: dir.to_path_buf(),
                    reason: "ancestor path exists and is not a directory".to_string(),
                })
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                missing.push(dir.to_path_buf());
                current = dir.parent();
            }
            Err(e) => return Err(Error::io(dir, e)),
        }
    }
    missing.reverse();
    Ok(missing)
}

pub(crate) fn fsync_dir(dir: &Path) -> Result<()> {
    let fd = File::open(dir).map_err(|e| Error::io(dir, e))?;
    fd.sync_all().map_err(|e| Error::io(dir, e))
}

/// Returns the device id a path lives on, used by callers that want to
/// reject a cross-filesystem move before attempting it rather than
/// relying on `EXDEV` from the kernel.
pub fn device_id(path: &Path) -> Result<u64> {
    let meta = fs::metadata(path).map_err(|e| Error::io(path, e))?;
    Ok(meta.dev())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File as StdFile;
    use std::io::Write;

    #[test]
    fn moves_file_and_creates_missing_ancestors() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src.txt");
        StdFile::create(&src).unwrap().write_all(b"hi").unwrap();

        let dst = tmp.path().join("a").join("b").join("dst.txt");
        durable_move(&src, &dst).unwrap();

        assert!(!src.exists());
        assert_eq!(fs::read_to_string(&dst).unwrap(), "hi");
    }

    #[test]
    fn fails_when_destination_already_exists() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src.txt");
        StdFile::create(&src).unwrap().write_all(b"hi").unwrap();
        let dst = tmp.path().join("dst.txt");
        StdFile::create(&dst).unwrap();

        let err = durable_move(&src, &dst).unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
        // source must be untouched on failure
        assert!(src.exists());
    }

    #[test]
    fn missing_ancestors_reports_none_for_existing_parent() {
        let tmp = tempfile::tempdir().unwrap();
        let dst = tmp.path().join("file.txt");
        assert!(missing_ancestors(&dst).unwrap().is_empty());
    }

    #[test]
    fn missing_ancestors_orders_shallow_to_deep() {
        let tmp = tempfile::tempdir().unwrap();
        let dst = tmp.path().join("a").join("b").join("c").join("file.txt");
        let missing = missing_ancestors(&dst).unwrap();
        assert_eq!(
            missing,
            vec![
                tmp.path().join("a"),
                tmp.path().join("a").join("b"),
                tmp.path().join("a").join("b").join("c"),
            ]
        );
    }
}
