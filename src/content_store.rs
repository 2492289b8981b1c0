//! Content-addressed store layout: where a registered file's bytes live
//! once they leave the caller's directory tree.
//!
//! `<root>/<2-hex-shard>/<14-hex-stem><ext>` — the shard is the first two
//! hex characters of the destination token (either the file's full
//! digest, when known up front, or a random token when it isn't), and
//! the stem is the next fourteen.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Builds the destination path for a file whose full digest is already
/// known, preserving the source file's extension.
pub fn destination_for_digest(root: &Path, full_digest: &[u8; 16], extension: Option<&str>) -> PathBuf {
    let token = hex::encode(full_digest);
    build_path(root, &token, extension)
}

/// Builds a destination path for a file whose digest isn't known yet
/// (reservation happens before the digest is computed in some pipeline
/// orderings); the token is random and has no relationship to content.
pub fn destination_for_unknown(root: &Path, extension: Option<&str>) -> PathBuf {
    let token = uuid::Uuid::new_v4().simple().to_string();
    build_path(root, &token, extension)
}

/// Appends an `_<8-hex>` collision suffix to a previously built
/// destination path, used when the registration pipeline retries after
/// a name collision it didn't expect.
pub fn with_collision_suffix(path: &Path) -> PathBuf {
    let suffix = &uuid::Uuid::new_v4().simple().to_string()[..8];

    let parent = path.parent().unwrap_or_else(|| Path::new(""));
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("");
    let ext = path.extension().and_then(|s| s.to_str());

    let mut name = format!("{stem}_{suffix}");
    if let Some(ext) = ext {
        name.push('.');
        name.push_str(ext);
    }
    parent.join(name)
}

fn build_path(root: &Path, token: &str, extension: Option<&str>) -> PathBuf {
    let shard = &token[..2.min(token.len())];
    let stem = if token.len() > 2 {
        &token[2..16.min(token.len())]
    } else {
        token
    };
    let mut name = stem.to_string();
    if let Some(ext) = extension {
        if !ext.is_empty() {
            name.push('.');
            name.push_str(ext);
        }
    }
    root.join(shard).join(name)
}

/// Creates the shard directory for `dest` if it doesn't exist, fsyncing
/// the store root afterward so the new directory entry survives a crash.
/// A no-op, including the fsync, if the shard directory already existed.
pub fn ensure_shard_dir(root: &Path, dest: &Path) -> Result<()> {
    let shard_dir = dest.parent().ok_or_else(|| Error::Unclassifiable {
        path: dest.to_path_buf(),
        reason: "destination path has no parent directory".to_string(),
    })?;

    if shard_dir.exists() {
        return Ok(());
    }

    fs::create_dir_all(shard_dir).map_err(|e| Error::io(shard_dir, e))?;

    let root_fd = File::open(root).map_err(|e| Error::io(root, e))?;
    root_fd.sync_all().map_err(|e| Error::io(root, e))?;

    Ok(())
}
