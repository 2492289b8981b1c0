//! Digest primitives.
//!
//! Two digests drive the tiered classifier: a cheap 64-bit "fringe"
//! digest over the head and tail of a file, and an exhaustive 128-bit
//! "full" digest over its entire contents.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use xxhash_rust::xxh3::Xxh3;
use xxhash_rust::xxh64::Xxh64;

use crate::error::{Error, Result};

/// Bytes read from the head and, if the file is larger, the tail.
pub const FRINGE_SIZE: u64 = 64 * 1024;
/// Chunk size used when streaming a file for the full digest.
pub const CHUNK_SIZE: usize = 256 * 1024;

/// Computes the 64-bit fringe digest of a file: the first [`FRINGE_SIZE`]
/// bytes, the last `min(FRINGE_SIZE, len - FRINGE_SIZE)` bytes if the
/// file is larger than `FRINGE_SIZE`, and the file's length as an
/// 8-byte little-endian suffix.
///
/// The file length is read from the open file descriptor via
/// seek-to-end, never from a caller-supplied size: any other source
/// could be stale by the time the bytes underneath it are read.
pub fn fringe_digest(path: &Path) -> Result<[u8; 8]> {
    let mut file = File::open(path).map_err(|e| Error::io(path, e))?;
    let len = file.seek(SeekFrom::End(0)).map_err(|e| Error::io(path, e))?;
    file.seek(SeekFrom::Start(0)).map_err(|e| Error::io(path, e))?;

    let mut hasher = Xxh64::new(0);

    let head_len = len.min(FRINGE_SIZE) as usize;
    let mut head = vec![0u8; head_len];
    file.read_exact(&mut head).map_err(|e| Error::io(path, e))?;
    hasher.update(&head);

    if len > FRINGE_SIZE {
        let tail_len = FRINGE_SIZE.min(len - FRINGE_SIZE);
        file.seek(SeekFrom::End(-(tail_len as i64)))
            .map_err(|e| Error::io(path, e))?;
        let mut tail = vec![0u8; tail_len as usize];
        file.read_exact(&mut tail).map_err(|e| Error::io(path, e))?;
        hasher.update(&tail);
    }

    hasher.update(&len.to_le_bytes());

    Ok(hasher.digest().to_le_bytes())
}

/// Computes the 128-bit full digest of a file by streaming its entire
/// contents through xxh3-128 in [`CHUNK_SIZE`] chunks.
pub fn full_digest(path: &Path) -> Result<[u8; 16]> {
    let mut file = File::open(path).map_err(|e| Error::io(path, e))?;
    let mut hasher = Xxh3::new();
    let mut buf = vec![0u8; CHUNK_SIZE];

    loop {
        let n = file.read(&mut buf).map_err(|e| Error::io(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hasher.digest128().to_le_bytes())
}
