//! Relational index: SQLite in WAL mode with ordered migrations.
//!
//! The index carries queryable metadata (recordings, denormalized action
//! summaries, schedules, execution history, global settings); the blob
//! store remains authoritative for recording payloads.

use crate::errors::{Result, RpaError};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::info;

/// SQLite busy handler bound, milliseconds.
pub const BUSY_TIMEOUT_MS: u64 = 5000;

/// Ordered schema migrations; `metadata('schema_version')` records how many
/// have been applied.
const MIGRATIONS: &[&str] = &[
    // v1: initial schema
    "
    CREATE TABLE IF NOT EXISTS recordings (
        recording_id   TEXT PRIMARY KEY,
        name           TEXT NOT NULL,
        status         TEXT NOT NULL,
        created_at     TEXT NOT NULL,
        updated_at     TEXT NOT NULL,
        action_count   INTEGER NOT NULL DEFAULT 0,
        size           INTEGER NOT NULL DEFAULT 0,
        hash           TEXT NOT NULL DEFAULT '',
        blob_ref       TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS actions (
        recording_id    TEXT NOT NULL,
        sequence_number INTEGER NOT NULL,
        kind            TEXT NOT NULL,
        summary         TEXT NOT NULL,
        PRIMARY KEY (recording_id, sequence_number),
        FOREIGN KEY (recording_id) REFERENCES recordings(recording_id) ON DELETE CASCADE
    );
    CREATE TABLE IF NOT EXISTS schedules (
        schedule_id          TEXT PRIMARY KEY,
        recording_id         TEXT NOT NULL,
        name                 TEXT NOT NULL,
        description          TEXT NOT NULL DEFAULT '',
        status               TEXT NOT NULL,
        enabled              INTEGER NOT NULL DEFAULT 1,
        max_parallel         INTEGER NOT NULL DEFAULT 1,
        execution_timeout_ms INTEGER NOT NULL,
        created_at           TEXT NOT NULL,
        updated_at           TEXT NOT NULL,
        next_execution       TEXT,
        last_execution       TEXT,
        total_exec           INTEGER NOT NULL DEFAULT 0,
        success_exec         INTEGER NOT NULL DEFAULT 0,
        trigger_json         TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS executions (
        execution_id     TEXT PRIMARY KEY,
        schedule_id      TEXT NOT NULL,
        start_time       TEXT NOT NULL,
        end_time         TEXT,
        success          INTEGER NOT NULL DEFAULT 0,
        error            TEXT,
        actions_executed INTEGER NOT NULL DEFAULT 0,
        total_actions    INTEGER NOT NULL DEFAULT 0,
        FOREIGN KEY (schedule_id) REFERENCES schedules(schedule_id) ON DELETE CASCADE
    );
    CREATE INDEX IF NOT EXISTS idx_recordings_name ON recordings(name);
    CREATE INDEX IF NOT EXISTS idx_actions_summary ON actions(summary);
    CREATE INDEX IF NOT EXISTS idx_executions_schedule ON executions(schedule_id, start_time);
    ",
];

/// Handle to the index database. Writers serialize on the inner lock; the
/// database itself runs WAL so concurrent readers in other processes are
/// not blocked.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        configure(&conn)?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.migrate()?;
        Ok(db)
    }

    /// Run `f` with the connection. All index access funnels through here.
    pub fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| RpaError::Storage("database lock poisoned".to_string()))?;
        f(&mut conn)
    }

    fn migrate(&self) -> Result<()> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            tx.execute_batch(
                "CREATE TABLE IF NOT EXISTS metadata (
                    key   TEXT PRIMARY KEY,
                    value TEXT NOT NULL
                );",
            )?;
            let current: u32 = tx
                .query_row(
                    "SELECT value FROM metadata WHERE key = 'schema_version'",
                    [],
                    |row| row.get::<_, String>(0),
                )
                .map(|v| v.parse().unwrap_or(0))
                .unwrap_or(0);

            for (i, migration) in MIGRATIONS.iter().enumerate().skip(current as usize) {
                info!(version = i + 1, "applying schema migration");
                tx.execute_batch(migration)?;
            }
            tx.execute(
                "INSERT INTO metadata (key, value) VALUES ('schema_version', ?1)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                [MIGRATIONS.len().to_string()],
            )?;
            tx.commit()?;
            Ok(())
        })
    }

    pub fn get_metadata(&self, key: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            match conn.query_row(
                "SELECT value FROM metadata WHERE key = ?1",
                [key],
                |row| row.get::<_, String>(0),
            ) {
                Ok(value) => Ok(Some(value)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
    }

    pub fn set_metadata(&self, key: &str, value: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO metadata (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                [key, value],
            )?;
            Ok(())
        })
    }
}

fn configure(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "page_size", 4096)?;
    // WAL returns the new mode as a row; `pragma_update` tolerates that.
    let _ = conn.pragma_update(None, "journal_mode", "WAL");
    conn.pragma_update(None, "busy_timeout", BUSY_TIMEOUT_MS as i64)?;
    conn.pragma_update(None, "foreign_keys", true)?;
    Ok(())
}

/// RFC 3339 column encoding for timestamps.
pub fn ts_to_sql(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

pub fn ts_from_sql(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RpaError::Corruption(format!("bad timestamp '{s}': {e}")))
}

pub fn opt_ts_from_sql(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
    s.map(|v| ts_from_sql(&v)).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_apply_once() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(
            db.get_metadata("schema_version").unwrap().as_deref(),
            Some("1")
        );
        // A second migrate pass is a no-op.
        db.migrate().unwrap();
        assert_eq!(
            db.get_metadata("schema_version").unwrap().as_deref(),
            Some("1")
        );
    }

    #[test]
    fn metadata_round_trip() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.get_metadata("theme").unwrap().is_none());
        db.set_metadata("theme", "dark").unwrap();
        assert_eq!(db.get_metadata("theme").unwrap().as_deref(), Some("dark"));
        db.set_metadata("theme", "light").unwrap();
        assert_eq!(db.get_metadata("theme").unwrap().as_deref(), Some("light"));
    }

    #[test]
    fn timestamp_round_trip() {
        let now = Utc::now();
        assert_eq!(ts_from_sql(&ts_to_sql(now)).unwrap(), now);
        assert!(ts_from_sql("garbage").is_err());
    }

    #[test]
    fn reopening_a_file_database_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.db");
        {
            let db = Database::open(&path).unwrap();
            db.set_metadata("k", "v").unwrap();
        }
        let db = Database::open(&path).unwrap();
        assert_eq!(db.get_metadata("k").unwrap().as_deref(), Some("v"));
    }
}
