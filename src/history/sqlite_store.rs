//! SQLite-backed history. Rows are only ever inserted.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension};

use super::error::StoreError;
use super::schema;
use super::{now_timestamp, FingerprintRecord, FingerprintStore, HistorySummary};

/// Fingerprint history stored in a SQLite database.
pub struct SqliteHistory {
    /// Wrapped in Mutex because rusqlite::Connection is not Sync.
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl std::fmt::Debug for SqliteHistory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteHistory")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SqliteHistory {
    /// Open or create a database at the given path.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        let path = path.to_path_buf();
        let path_clone = path.clone();

        let conn = tokio::task::spawn_blocking(move || {
            if let Some(parent) = path_clone.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
            }
            let conn = Connection::open(&path_clone).map_err(|e| StoreError::Open {
                path: path_clone.clone(),
                source: e,
            })?;

            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
                row.get::<_, String>(0)
            })
            .map_err(StoreError::Migration)?;
            conn.pragma_update(None, "synchronous", "NORMAL")
                .map_err(StoreError::Migration)?;

            schema::migrate(&conn)?;

            Ok::<_, StoreError>(conn)
        })
        .await??;

        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    /// Open an in-memory database (for testing).
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(|e| StoreError::Open {
            path: PathBuf::from(":memory:"),
            source: e,
        })?;
        schema::migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: PathBuf::from(":memory:"),
        })
    }

    /// Acquire the connection lock, mapping poisoning to a query error.
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|e| StoreError::Query(e.to_string()))
    }
}

/// Map a `subject, digest, recorded_at` row to a record.
fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<FingerprintRecord> {
    Ok(FingerprintRecord {
        subject: row.get(0)?,
        digest: row.get(1)?,
        recorded_at: row.get(2)?,
    })
}

#[async_trait]
impl FingerprintStore for SqliteHistory {
    /// All rows in insertion order.
    async fn records(&self) -> Result<Vec<FingerprintRecord>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT subject, digest, recorded_at FROM fingerprints ORDER BY id")
            .map_err(StoreError::query)?;
        let records = stmt
            .query_map([], |row| row_to_record(row))
            .map_err(StoreError::query)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::query)?;
        Ok(records)
    }

    /// Insert one row stamped with the current time.
    async fn append(&self, subject: &str, digest: &str) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO fingerprints (subject, digest, recorded_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![subject, digest, now_timestamp()],
        )
        .map_err(StoreError::query)?;
        Ok(())
    }

    /// Check for a row with this digest whose subject mentions `identifier`.
    async fn contains(&self, identifier: &str, digest: &str) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        // instr() is a case-sensitive substring test, unlike LIKE.
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM fingerprints WHERE digest = ?1 AND instr(subject, ?2) > 0 LIMIT 1",
                [digest, identifier],
                |row| row.get(0),
            )
            .optional()
            .map_err(StoreError::query)?;
        Ok(found.is_some())
    }

    /// Row and distinct-digest counts, plus the most recent row.
    async fn summary(&self) -> Result<HistorySummary, StoreError> {
        let conn = self.lock()?;
        let (total, distinct): (i64, i64) = conn
            .query_row(
                "SELECT COUNT(*), COUNT(DISTINCT digest) FROM fingerprints",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(StoreError::query)?;
        let last = conn
            .query_row(
                "SELECT subject, digest, recorded_at FROM fingerprints ORDER BY id DESC LIMIT 1",
                [],
                |row| row_to_record(row),
            )
            .optional()
            .map_err(StoreError::query)?;
        Ok(HistorySummary {
            total_records: total as u64,
            distinct_digests: distinct as u64,
            last,
        })
    }
}
