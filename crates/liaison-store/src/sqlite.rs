//! `SQLite` backend for the checkpoint and history stores.
//!
//! Uses `r2d2` connection pooling with the `r2d2_sqlite` manager. Each new
//! connection gets WAL mode, foreign keys, a busy timeout, and NORMAL
//! synchronous pragmas. The schema is evolved through versioned
//! migrations tracked in `schema_migrations`.
//!
//! The compare-and-swap write runs as a single conditional `UPDATE` (or a
//! guarded `INSERT` for version 0), so concurrent writers can never
//! interleave: exactly one statement observes the expected version.

use chrono::Utc;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

use liaison_core::record::TranslationRecord;
use liaison_core::session::Checkpoint;

use crate::checkpoint::{CheckpointStore, VersionedCheckpoint};
use crate::errors::{Result, StoreError};
use crate::history::HistoryStore;

/// Alias for the connection pool type.
pub type ConnectionPool = Pool<SqliteConnectionManager>;

/// Configuration for the pool.
#[derive(Clone, Debug)]
pub struct SqliteStoreConfig {
    /// Maximum pool size.
    pub pool_size: u32,
    /// Busy timeout in milliseconds.
    pub busy_timeout_ms: u32,
}

impl Default for SqliteStoreConfig {
    fn default() -> Self {
        Self {
            pool_size: 8,
            busy_timeout_ms: 30_000,
        }
    }
}

/// Pragma customizer applied to every new pooled connection.
#[derive(Debug)]
struct PragmaCustomizer {
    busy_timeout_ms: u32,
}

impl r2d2::CustomizeConnection<Connection, rusqlite::Error> for PragmaCustomizer {
    fn on_acquire(&self, conn: &mut Connection) -> std::result::Result<(), rusqlite::Error> {
        conn.execute_batch(&format!(
            "PRAGMA journal_mode = WAL;\
             PRAGMA busy_timeout = {};\
             PRAGMA foreign_keys = ON;\
             PRAGMA synchronous = NORMAL;",
            self.busy_timeout_ms
        ))
    }
}

/// Ordered schema migrations. Each entry runs once; the applied version is
/// recorded in `schema_migrations`.
const MIGRATIONS: &[(i64, &str)] = &[(
    1,
    "CREATE TABLE IF NOT EXISTS checkpoints (
         session_id TEXT PRIMARY KEY,
         version    INTEGER NOT NULL,
         payload    TEXT    NOT NULL,
         updated_at TEXT    NOT NULL
     );
     CREATE TABLE IF NOT EXISTS translations (
         id         TEXT PRIMARY KEY,
         direction  TEXT NOT NULL,
         created_at TEXT NOT NULL,
         payload    TEXT NOT NULL
     );
     CREATE INDEX IF NOT EXISTS idx_translations_created
         ON translations (created_at DESC);",
)];

/// Run pending migrations on a connection.
fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
             version    INTEGER PRIMARY KEY,
             applied_at TEXT NOT NULL
         );",
    )?;
    for (version, sql) in MIGRATIONS {
        let applied: Option<i64> = conn
            .query_row(
                "SELECT version FROM schema_migrations WHERE version = ?1",
                [version],
                |row| row.get(0),
            )
            .optional()?;
        if applied.is_some() {
            continue;
        }
        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(sql)?;
        let _ = tx.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
            params![version, Utc::now().to_rfc3339()],
        )?;
        tx.commit()?;
        debug!(version, "applied store migration");
    }
    Ok(())
}

/// Pooled `SQLite` store implementing both [`CheckpointStore`] and
/// [`HistoryStore`]. Checkpoints and history may share one database file
/// or use two separate `SqliteStore` instances.
pub struct SqliteStore {
    pool: ConnectionPool,
}

impl SqliteStore {
    /// Open (or create) a file-backed store and run migrations.
    pub fn open(path: &str, config: &SqliteStoreConfig) -> Result<Self> {
        let manager = SqliteConnectionManager::file(path);
        Self::build(manager, config)
    }

    /// Open an in-memory store (single shared connection, for testing).
    pub fn open_in_memory() -> Result<Self> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .connection_timeout(std::time::Duration::from_secs(5))
            .build(manager)?;
        let store = Self { pool };
        let conn = store.pool.get()?;
        run_migrations(&conn)?;
        Ok(store)
    }

    fn build(manager: SqliteConnectionManager, config: &SqliteStoreConfig) -> Result<Self> {
        let pool = Pool::builder()
            .max_size(config.pool_size)
            .connection_timeout(std::time::Duration::from_secs(5))
            .connection_customizer(Box::new(PragmaCustomizer {
                busy_timeout_ms: config.busy_timeout_ms,
            }))
            .build(manager)?;
        let store = Self { pool };
        let conn = store.pool.get()?;
        run_migrations(&conn)?;
        Ok(store)
    }

    fn stored_version(conn: &Connection, session_id: &str) -> Result<Option<u64>> {
        let version: Option<i64> = conn
            .query_row(
                "SELECT version FROM checkpoints WHERE session_id = ?1",
                [session_id],
                |row| row.get(0),
            )
            .optional()?;
        #[allow(clippy::cast_sign_loss)]
        Ok(version.map(|v| v as u64))
    }
}

impl CheckpointStore for SqliteStore {
    fn read(&self, session_id: &str) -> Result<Option<VersionedCheckpoint>> {
        let conn = self.pool.get()?;
        let row: Option<(i64, String)> = conn
            .query_row(
                "SELECT version, payload FROM checkpoints WHERE session_id = ?1",
                [session_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        match row {
            None => Ok(None),
            Some((version, payload)) => {
                let checkpoint: Checkpoint = serde_json::from_str(&payload)?;
                #[allow(clippy::cast_sign_loss)]
                Ok(Some(VersionedCheckpoint {
                    checkpoint,
                    version: version as u64,
                }))
            }
        }
    }

    fn write(
        &self,
        session_id: &str,
        checkpoint: &Checkpoint,
        expected_version: u64,
    ) -> Result<u64> {
        let conn = self.pool.get()?;
        let payload = serde_json::to_string(checkpoint)?;
        let now = Utc::now().to_rfc3339();
        let next = expected_version + 1;

        #[allow(clippy::cast_possible_wrap)]
        let changed = if expected_version == 0 {
            // Guarded insert: loses to any existing row.
            conn.execute(
                "INSERT INTO checkpoints (session_id, version, payload, updated_at)
                 VALUES (?1, 1, ?2, ?3)
                 ON CONFLICT (session_id) DO NOTHING",
                params![session_id, payload, now],
            )?
        } else {
            conn.execute(
                "UPDATE checkpoints SET version = ?1, payload = ?2, updated_at = ?3
                 WHERE session_id = ?4 AND version = ?5",
                params![next as i64, payload, now, session_id, expected_version as i64],
            )?
        };

        if changed == 1 {
            return Ok(next);
        }
        let stored = Self::stored_version(&conn, session_id)?
            .ok_or_else(|| StoreError::NotFound(session_id.to_owned()))?;
        Err(StoreError::VersionConflict {
            session_id: session_id.to_owned(),
            expected: expected_version,
            stored,
        })
    }
}

impl HistoryStore for SqliteStore {
    fn record(&self, record: &TranslationRecord) -> Result<()> {
        let conn = self.pool.get()?;
        let payload = serde_json::to_string(record)?;
        let changed = conn.execute(
            "INSERT INTO translations (id, direction, created_at, payload)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (id) DO NOTHING",
            params![
                record.id,
                record.direction.as_str(),
                record.created_at.to_rfc3339(),
                payload
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::AlreadyExists(record.id.clone()));
        }
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<TranslationRecord>> {
        let conn = self.pool.get()?;
        let payload: Option<String> = conn
            .query_row("SELECT payload FROM translations WHERE id = ?1", [id], |row| {
                row.get(0)
            })
            .optional()?;
        match payload {
            None => Ok(None),
            Some(p) => Ok(Some(serde_json::from_str(&p)?)),
        }
    }

    fn list(&self, limit: usize) -> Result<Vec<TranslationRecord>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT payload FROM translations ORDER BY created_at DESC, id DESC LIMIT ?1",
        )?;
        #[allow(clippy::cast_possible_wrap)]
        let rows = stmt.query_map([limit as i64], |row| row.get::<_, String>(0))?;
        let mut records = Vec::new();
        for payload in rows {
            records.push(serde_json::from_str(&payload?)?);
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use liaison_core::session::{Direction, Gap, Perspective, SessionStatus, Stage};

    fn file_store() -> (SqliteStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("liaison.db");
        let store =
            SqliteStore::open(path.to_str().unwrap(), &SqliteStoreConfig::default()).unwrap();
        (store, dir)
    }

    fn checkpoint() -> Checkpoint {
        Checkpoint::new("Add a login button", Direction::PmToDev, None, "auto")
    }

    #[test]
    fn migrations_are_idempotent() {
        let store = SqliteStore::open_in_memory().unwrap();
        let conn = store.pool.get().unwrap();
        run_migrations(&conn).unwrap();
        // second pass applies nothing and succeeds
    }

    #[test]
    fn create_then_read_round_trips() {
        let (store, _dir) = file_store();
        let mut cp = checkpoint();
        cp.perspective = Some(Perspective::Pm);
        cp.gaps.push(Gap {
            category: "constraints".into(),
            description: "No auth provider named".into(),
        });
        let v = store.write("sess_1", &cp, 0).unwrap();
        assert_eq!(v, 1);

        let read = store.read("sess_1").unwrap().unwrap();
        assert_eq!(read.version, 1);
        assert_eq!(read.checkpoint, cp);
    }

    #[test]
    fn cas_rejects_stale_and_duplicate_creates() {
        let (store, _dir) = file_store();
        let mut cp = checkpoint();
        let v1 = store.write("sess_1", &cp, 0).unwrap();
        cp.stage = Stage::DetectingPerspective;
        let v2 = store.write("sess_1", &cp, v1).unwrap();
        assert_eq!(v2, 2);

        assert_matches!(
            store.write("sess_1", &cp, v1),
            Err(StoreError::VersionConflict {
                expected: 1,
                stored: 2,
                ..
            })
        );
        assert_matches!(
            store.write("sess_1", &cp, 0),
            Err(StoreError::VersionConflict { .. })
        );
    }

    #[test]
    fn stale_write_leaves_stored_state_untouched() {
        let (store, _dir) = file_store();
        let mut cp = checkpoint();
        let v1 = store.write("sess_1", &cp, 0).unwrap();
        cp.stage = Stage::DetectingPerspective;
        cp.perspective = Some(Perspective::Pm);
        let _ = store.write("sess_1", &cp, v1).unwrap();

        let mut stale = checkpoint();
        stale.status = SessionStatus::Failed;
        let _ = store.write("sess_1", &stale, v1).unwrap_err();

        let current = store.read("sess_1").unwrap().unwrap();
        assert_eq!(current.checkpoint.status, SessionStatus::Active);
        assert_eq!(current.checkpoint.perspective, Some(Perspective::Pm));
    }

    #[test]
    fn update_of_missing_session_is_not_found() {
        let (store, _dir) = file_store();
        assert_matches!(
            store.write("sess_missing", &checkpoint(), 3),
            Err(StoreError::NotFound(_))
        );
    }

    #[test]
    fn history_insert_once_and_list_order() {
        let (store, _dir) = file_store();
        let mut cp = checkpoint();
        cp.partial_output = "Implement an auth entry point".into();

        for i in 0..3 {
            let mut record = TranslationRecord::from_checkpoint(format!("tr_{i}"), &cp);
            record.created_at = chrono::Utc::now() + chrono::Duration::seconds(i);
            store.record(&record).unwrap();
        }
        let listed = store.list(2).unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, "tr_2");

        let dup = TranslationRecord::from_checkpoint("tr_0", &cp);
        assert_matches!(store.record(&dup), Err(StoreError::AlreadyExists(_)));

        let got = store.get("tr_1").unwrap().unwrap();
        assert_eq!(got.translated_content, "Implement an auth entry point");
        assert!(store.get("tr_missing").unwrap().is_none());
    }
}
