//! Error taxonomy for the dedup engine.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error(
        "database schema version {found} is newer than the version this build understands ({expected})"
    )]
    SchemaTooNew { found: i64, expected: i64 },

    #[error("database at {path} has tables but no schema_version entry; refusing to open a legacy or foreign database")]
    LegacyDatabase { path: PathBuf },

    #[error("cannot move {src} to {dst}: source and destination are on different filesystems")]
    CrossDevice { src: PathBuf, dst: PathBuf },

    #[error("move journal entry {id} is in an unrecognized phase: {phase}")]
    CorruptJournalEntry { id: i64, phase: String },

    #[error("failed to record orphan for {original}: {reason}")]
    OrphanRegistrationFailed { original: PathBuf, reason: String },

    #[error("emergency orphan log at {path} could not be written: {source}")]
    EmergencyLogWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("signal handler installation failed: {0}")]
    Signal(#[from] nix::errno::Errno),

    #[error("{path} could not be classified: {reason}")]
    Unclassifiable { path: PathBuf, reason: String },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}
