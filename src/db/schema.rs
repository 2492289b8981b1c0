//! Schema creation, pragma tuning, and version enforcement for the index
//! database.

use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Schema version this build understands. A database with a higher
/// version was written by a newer build and is refused rather than
/// silently misread.
pub const SCHEMA_VERSION: i64 = 4;

/// Applies the fixed set of pragmas the engine relies on for durability
/// and throughput: WAL journaling, full fsync on every commit, a 5
/// second busy timeout so concurrent readers don't immediately fail, a
/// generous page cache, in-memory temp storage, and mmap'd reads.
pub fn apply_pragmas(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = FULL;
         PRAGMA busy_timeout = 5000;
         PRAGMA cache_size = -64000;
         PRAGMA temp_store = MEMORY;
         PRAGMA mmap_size = 268435456;",
    )?;
    Ok(())
}

fn table_names(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT name FROM sqlite_master WHERE type = 'table'")?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(names)
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    let version: Option<i64> = conn
        .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
            row.get(0)
        })
        .optional()?
        .flatten();
    Ok(version.unwrap_or(0))
}

/// Opens (creating if absent) the schema for the six relations the
/// engine maintains: size, fringe, full, orphan_registry, move_journal,
/// schema_version. Refuses to proceed against a database that has
/// tables but no `schema_version` entry (a foreign or pre-versioning
/// database), and refuses one whose recorded version is newer than
/// [`SCHEMA_VERSION`].
pub fn init_schema(conn: &Connection, db_label: &std::path::Path) -> Result<()> {
    apply_pragmas(conn)?;

    let tables = table_names(conn)?;
    if !tables.is_empty() && !tables.iter().any(|t| t == "schema_version") {
        return Err(Error::LegacyDatabase {
            path: db_label.to_path_buf(),
        });
    }

    create_missing_tables(conn, &tables)?;

    let found = current_schema_version(conn)?;
    if found > SCHEMA_VERSION {
        return Err(Error::SchemaTooNew {
            found,
            expected: SCHEMA_VERSION,
        });
    }
    if found < SCHEMA_VERSION {
        info!(from = found, to = SCHEMA_VERSION, "migrating schema");
        migrate(conn, found)?;
    }

    Ok(())
}

fn create_missing_tables(conn: &Connection, existing: &[String]) -> Result<()> {
    let has = |name: &str| existing.iter().any(|t| t == name);

    if !has("size_index") {
        debug!("creating size_index table");
        conn.execute_batch(
            "CREATE TABLE size_index (
                file_size INTEGER PRIMARY KEY
            ) WITHOUT ROWID;",
        )?;
    }

    if !has("fringe_index") {
        debug!("creating fringe_index table");
        conn.execute_batch(
            "CREATE TABLE fringe_index (
                fringe_hash BLOB NOT NULL,
                file_size INTEGER NOT NULL,
                file_path TEXT NOT NULL,
                PRIMARY KEY (fringe_hash, file_size)
            ) WITHOUT ROWID;",
        )?;
    }

    if !has("full_index") {
        debug!("creating full_index table");
        conn.execute_batch(
            "CREATE TABLE full_index (
                full_hash BLOB PRIMARY KEY,
                file_path TEXT NOT NULL,
                metadata TEXT
            ) WITHOUT ROWID;",
        )?;
    }

    if !has("orphan_registry") {
        debug!("creating orphan_registry table");
        conn.execute_batch(
            "CREATE TABLE orphan_registry (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                original_path TEXT NOT NULL,
                orphan_path TEXT NOT NULL,
                file_size INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                recovered_at TEXT,
                status TEXT NOT NULL DEFAULT 'pending',
                UNIQUE(orphan_path)
            );",
        )?;
    }

    if !has("move_journal") {
        debug!("creating move_journal table");
        conn.execute_batch(
            "CREATE TABLE move_journal (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source_path TEXT NOT NULL,
                dest_path TEXT NOT NULL,
                file_size INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                phase TEXT NOT NULL DEFAULT 'planned',
                completed_at TEXT
            );",
        )?;
    }

    if !has("schema_version") {
        debug!("creating schema_version table");
        conn.execute_batch(
            "CREATE TABLE schema_version (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            );",
        )?;
        record_version(conn, SCHEMA_VERSION)?;
    }

    Ok(())
}

fn record_version(conn: &Connection, version: i64) -> Result<()> {
    conn.execute(
        "INSERT INTO schema_version (version, applied_at) VALUES (?1, ?2)",
        rusqlite::params![version, chrono::Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

fn migrate(conn: &Connection, from_version: i64) -> Result<()> {
    if from_version < 4 {
        debug!("adding metadata column to full_index");
        // Column may already exist if full_index was just created fresh
        // by create_missing_tables in this same call.
        let has_metadata: bool = conn
            .prepare("SELECT 1 FROM pragma_table_info('full_index') WHERE name = 'metadata'")?
            .exists([])?;
        if !has_metadata {
            conn.execute_batch("ALTER TABLE full_index ADD COLUMN metadata TEXT;")?;
        }
    }
    record_version(conn, SCHEMA_VERSION)?;
    info!(version = SCHEMA_VERSION, "schema migration complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_mem() -> Connection {
        Connection::open_in_memory().unwrap()
    }

    #[test]
    fn fresh_database_initializes_to_current_version() {
        let conn = open_mem();
        init_schema(&conn, std::path::Path::new(":memory:")).unwrap();
        assert_eq!(current_schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn init_is_idempotent() {
        let conn = open_mem();
        init_schema(&conn, std::path::Path::new(":memory:")).unwrap();
        init_schema(&conn, std::path::Path::new(":memory:")).unwrap();
        assert_eq!(current_schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn refuses_legacy_database_without_schema_version_table() {
        let conn = open_mem();
        conn.execute_batch("CREATE TABLE size_index (file_size INTEGER PRIMARY KEY);")
            .unwrap();
        let err = init_schema(&conn, std::path::Path::new("legacy.db")).unwrap_err();
        assert!(matches!(err, Error::LegacyDatabase { .. }));
    }

    #[test]
    fn refuses_newer_schema_version() {
        let conn = open_mem();
        init_schema(&conn, std::path::Path::new(":memory:")).unwrap();
        record_version(&conn, SCHEMA_VERSION + 1).unwrap();
        let err = init_schema(&conn, std::path::Path::new(":memory:")).unwrap_err();
        assert!(matches!(err, Error::SchemaTooNew { .. }));
    }
}
