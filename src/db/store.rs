//! Index store: the relational backing for the tiered classifier, the
//! orphan registry, and the move journal.

use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrphanRecord {
    pub id: i64,
    pub original_path: String,
    pub orphan_path: String,
    pub file_size: i64,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalPhase {
    Planned,
    Moving,
    Completed,
    Failed,
}

impl JournalPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            JournalPhase::Planned => "planned",
            JournalPhase::Moving => "moving",
            JournalPhase::Completed => "completed",
            JournalPhase::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "planned" => Some(JournalPhase::Planned),
            "moving" => Some(JournalPhase::Moving),
            "completed" => Some(JournalPhase::Completed),
            "failed" => Some(JournalPhase::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntry {
    pub id: i64,
    pub source_path: String,
    pub dest_path: String,
    pub file_size: i64,
    pub created_at: String,
    pub phase_raw: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IndexCounts {
    pub sizes: i64,
    pub fringes: i64,
    pub fulls: i64,
}

pub struct IndexStore {
    conn: Connection,
}

impl IndexStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        crate::db::schema::init_schema(&conn, path)?;
        Ok(IndexStore { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        crate::db::schema::init_schema(&conn, Path::new(":memory:"))?;
        Ok(IndexStore { conn })
    }

    // --- Tier 1: size ---------------------------------------------------

    pub fn size_exists(&self, file_size: u64) -> Result<bool> {
        let exists: bool = self
            .conn
            .prepare("SELECT 1 FROM size_index WHERE file_size = ?1")?
            .exists(params![file_size as i64])?;
        Ok(exists)
    }

    pub fn add_size(&self, file_size: u64) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO size_index (file_size) VALUES (?1)",
            params![file_size as i64],
        )?;
        Ok(())
    }

    // --- Tier 2: fringe ---------------------------------------------------

    pub fn fringe_lookup(&self, fringe_hash: &[u8], file_size: u64) -> Result<Option<String>> {
        let path = self
            .conn
            .query_row(
                "SELECT file_path FROM fringe_index WHERE fringe_hash = ?1 AND file_size = ?2",
                params![fringe_hash, file_size as i64],
                |row| row.get(0),
            )
            .optional()?;
        Ok(path)
    }

    /// Inserts a fringe entry, returning `true` if this call performed
    /// the insert and `false` if an entry for `(fringe_hash, file_size)`
    /// already existed — the same conflict-on-insert signal the index
    /// uses throughout instead of raising on duplicate keys.
    pub fn add_fringe(&self, fringe_hash: &[u8], file_size: u64, file_path: &str) -> Result<bool> {
        let changed = self.conn.execute(
            "INSERT INTO fringe_index (fringe_hash, file_size, file_path)
             VALUES (?1, ?2, ?3)
             ON CONFLICT DO NOTHING",
            params![fringe_hash, file_size as i64, file_path],
        )?;
        Ok(changed > 0)
    }

    // --- Tier 3: full ---------------------------------------------------

    pub fn full_lookup(&self, full_hash: &[u8]) -> Result<Option<String>> {
        let path = self
            .conn
            .query_row(
                "SELECT file_path FROM full_index WHERE full_hash = ?1",
                params![full_hash],
                |row| row.get(0),
            )
            .optional()?;
        Ok(path)
    }

    pub fn add_full(&self, full_hash: &[u8], file_path: &str, metadata: Option<&str>) -> Result<bool> {
        let changed = self.conn.execute(
            "INSERT INTO full_index (full_hash, file_path, metadata)
             VALUES (?1, ?2, ?3)
             ON CONFLICT DO NOTHING",
            params![full_hash, file_path, metadata],
        )?;
        Ok(changed > 0)
    }

    pub fn counts(&self) -> Result<IndexCounts> {
        let sizes = self
            .conn
            .query_row("SELECT COUNT(*) FROM size_index", [], |r| r.get(0))?;
        let fringes = self
            .conn
            .query_row("SELECT COUNT(*) FROM fringe_index", [], |r| r.get(0))?;
        let fulls = self
            .conn
            .query_row("SELECT COUNT(*) FROM full_index", [], |r| r.get(0))?;
        Ok(IndexCounts {
            sizes,
            fringes,
            fulls,
        })
    }

    // --- orphan registry --------------------------------------------------

    pub fn add_orphan(&self, original_path: &str, orphan_path: &str, file_size: u64) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO orphan_registry (original_path, orphan_path, file_size, created_at, status)
             VALUES (?1, ?2, ?3, ?4, 'pending')
             ON CONFLICT(orphan_path) DO NOTHING",
            params![original_path, orphan_path, file_size as i64, chrono::Utc::now().to_rfc3339()],
        )?;
        let id: i64 = self.conn.query_row(
            "SELECT id FROM orphan_registry WHERE orphan_path = ?1",
            params![orphan_path],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    pub fn update_orphan_status(&self, orphan_id: i64, status: &str) -> Result<()> {
        let recovered_at = if status != "pending" {
            Some(chrono::Utc::now().to_rfc3339())
        } else {
            None
        };
        self.conn.execute(
            "UPDATE orphan_registry SET status = ?1, recovered_at = ?2 WHERE id = ?3",
            params![status, recovered_at, orphan_id],
        )?;
        Ok(())
    }

    pub fn get_pending_orphans(&self) -> Result<Vec<OrphanRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, original_path, orphan_path, file_size, created_at
             FROM orphan_registry WHERE status = 'pending'",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(OrphanRecord {
                    id: row.get(0)?,
                    original_path: row.get(1)?,
                    orphan_path: row.get(2)?,
                    file_size: row.get(3)?,
                    created_at: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn orphan_count(&self) -> Result<i64> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM orphan_registry WHERE status = 'pending'",
                [],
                |row| row.get(0),
            )
            .map_err(Into::into)
    }

    // --- move journal --------------------------------------------------

    pub fn journal_move(&self, source_path: &str, dest_path: &str, file_size: u64) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO move_journal (source_path, dest_path, file_size, created_at, phase)
             VALUES (?1, ?2, ?3, ?4, 'planned')",
            params![source_path, dest_path, file_size as i64, chrono::Utc::now().to_rfc3339()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn update_move_phase(&self, journal_id: i64, phase: JournalPhase) -> Result<()> {
        let completed_at = matches!(phase, JournalPhase::Completed | JournalPhase::Failed)
            .then(|| chrono::Utc::now().to_rfc3339());
        self.conn.execute(
            "UPDATE move_journal SET phase = ?1, completed_at = ?2 WHERE id = ?3",
            params![phase.as_str(), completed_at, journal_id],
        )?;
        Ok(())
    }

    pub fn get_incomplete_journal_entries(&self) -> Result<Vec<JournalEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, source_path, dest_path, file_size, created_at, phase
             FROM move_journal WHERE phase NOT IN ('completed', 'failed')",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(JournalEntry {
                    id: row.get(0)?,
                    source_path: row.get(1)?,
                    dest_path: row.get(2)?,
                    file_size: row.get(3)?,
                    created_at: row.get(4)?,
                    phase_raw: row.get(5)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn pending_journal_count(&self) -> Result<i64> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM move_journal WHERE phase NOT IN ('completed', 'failed')",
                [],
                |row| row.get(0),
            )
            .map_err(Into::into)
    }

    // --- transactions --------------------------------------------------

    pub fn begin(&self) -> Result<()> {
        if !self.conn.is_autocommit() {
            return Ok(());
        }
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(())
    }

    pub fn commit(&self) -> Result<()> {
        if self.conn.is_autocommit() {
            return Ok(());
        }
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    pub fn rollback(&self) -> Result<()> {
        if self.conn.is_autocommit() {
            return Ok(());
        }
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_round_trip() {
        let store = IndexStore::open_in_memory().unwrap();
        assert!(!store.size_exists(42).unwrap());
        store.add_size(42).unwrap();
        assert!(store.size_exists(42).unwrap());
    }

    #[test]
    fn fringe_add_signals_conflict_via_return_value() {
        let store = IndexStore::open_in_memory().unwrap();
        assert!(store.add_fringe(b"abcdefgh", 100, "/a").unwrap());
        assert!(!store.add_fringe(b"abcdefgh", 100, "/b").unwrap());
        assert_eq!(
            store.fringe_lookup(b"abcdefgh", 100).unwrap(),
            Some("/a".to_string())
        );
    }

    #[test]
    fn full_add_signals_conflict_via_return_value() {
        let store = IndexStore::open_in_memory().unwrap();
        let digest = [1u8; 16];
        assert!(store.add_full(&digest, "/a", None).unwrap());
        assert!(!store.add_full(&digest, "/b", Some("meta")).unwrap());
    }

    #[test]
    fn orphan_add_is_idempotent_by_orphan_path() {
        let store = IndexStore::open_in_memory().unwrap();
        let id1 = store.add_orphan("/orig", "/orphan", 10).unwrap();
        let id2 = store.add_orphan("/orig", "/orphan", 10).unwrap();
        assert_eq!(id1, id2);
        assert_eq!(store.orphan_count().unwrap(), 1);
    }

    #[test]
    fn journal_move_tracks_incomplete_entries() {
        let store = IndexStore::open_in_memory().unwrap();
        let id = store.journal_move("/src", "/dst", 5).unwrap();
        assert_eq!(store.pending_journal_count().unwrap(), 1);
        store.update_move_phase(id, JournalPhase::Completed).unwrap();
        assert_eq!(store.pending_journal_count().unwrap(), 0);
    }

    #[test]
    fn transaction_rollback_discards_writes() {
        let store = IndexStore::open_in_memory().unwrap();
        store.begin().unwrap();
        store.add_size(7).unwrap();
        store.rollback().unwrap();
        assert!(!store.size_exists(7).unwrap());
    }
}
