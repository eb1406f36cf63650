//! Persistence: content-addressed, optionally-encrypted recording blobs
//! plus a relational index for query, search and statistics.
//!
//! The canonical byte form (serde_json with sorted object keys, ISO-8601
//! UTC timestamps, integer-millisecond durations) is what gets hashed,
//! encrypted and persisted; loading authenticates, verifies the content
//! hash against the index, and only then deserializes.

pub mod blob;
pub mod crypto;
pub mod index;

use crate::errors::{Result, RpaError};
use crate::recording::{Recording, RecordingStatus};
use crate::schedule::{ExecutionResult, Schedule, ScheduleStatus, TriggerCondition};
use blob::BlobStore;
use chrono::{DateTime, Utc};
use index::{opt_ts_from_sql, ts_from_sql, ts_to_sql, Database};
use rusqlite::params;
use std::path::PathBuf;
use tracing::{error, info};
use uuid::Uuid;

pub use index::BUSY_TIMEOUT_MS;

/// Where and how to persist.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Root directory: `index.db` and `blobs/` live under it.
    pub app_data_dir: PathBuf,
    /// Master passphrase; `None` disables blob encryption. Supplied
    /// out-of-band and never persisted.
    pub passphrase: Option<String>,
}

impl StorageConfig {
    pub fn new(app_data_dir: impl Into<PathBuf>) -> Self {
        Self {
            app_data_dir: app_data_dir.into(),
            passphrase: None,
        }
    }

    /// Platform data directory (`<user data dir>/ezrec`).
    pub fn default_app_data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ezrec")
    }

    pub fn with_passphrase(mut self, passphrase: &str) -> Self {
        self.passphrase = Some(passphrase.to_string());
        self
    }
}

/// Canonical byte form of a recording. serde_json object maps are ordered,
/// so the output is deterministic for equal values.
pub fn canonical_bytes(recording: &Recording) -> Result<Vec<u8>> {
    let value = serde_json::to_value(recording)?;
    Ok(value.to_string().into_bytes())
}

/// Index row projection for listings.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingSummary {
    pub recording_id: Uuid,
    pub name: String,
    pub status: RecordingStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub action_count: u32,
    pub size: u64,
    pub hash: String,
}

/// Aggregate counters over the whole index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StorageStats {
    pub recordings: u64,
    pub completed_recordings: u64,
    pub schedules: u64,
    pub executions: u64,
    pub successful_executions: u64,
}

/// The repository: one handle for recordings, schedules, execution history
/// and global settings.
#[derive(Clone)]
pub struct Storage {
    db: Database,
    blobs: std::sync::Arc<BlobStore>,
    passphrase: Option<String>,
}

impl Storage {
    pub fn open(config: StorageConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.app_data_dir)?;
        let db = Database::open(&config.app_data_dir.join("index.db"))?;
        let blobs = BlobStore::open(&config.app_data_dir)?;
        info!(dir = %config.app_data_dir.display(), encrypted = config.passphrase.is_some(), "storage opened");
        Ok(Self {
            db,
            blobs: std::sync::Arc::new(blobs),
            passphrase: config.passphrase,
        })
    }

    /// In-memory index with blobs under a caller-owned directory; tests.
    pub fn open_ephemeral(blob_dir: &std::path::Path, passphrase: Option<&str>) -> Result<Self> {
        Ok(Self {
            db: Database::open_in_memory()?,
            blobs: std::sync::Arc::new(BlobStore::open(blob_dir)?),
            passphrase: passphrase.map(str::to_string),
        })
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    // ------------------------------------------------------------------
    // Recordings
    // ------------------------------------------------------------------

    /// Serialize, hash, encrypt and persist. The blob lands first; the
    /// index row and denormalized action summaries commit in one
    /// transaction, and a failed commit rolls the blob back.
    pub fn save_recording(&self, recording: &mut Recording) -> Result<()> {
        let plaintext = canonical_bytes(recording)?;
        let hash = crypto::content_hash(&plaintext);
        let encoded = blob::encode(&plaintext, self.passphrase.as_deref())?;
        let id = recording.recording_id.to_string();
        let size = self.blobs.write(&id, &encoded)?;

        recording.size = size;
        recording.content_hash = hash.clone();

        let row = (
            id.clone(),
            recording.name.clone(),
            recording.status.as_str().to_string(),
            ts_to_sql(recording.created_at),
            ts_to_sql(recording.updated_at),
            recording.actions.len() as u32,
            size,
            hash,
        );
        let summaries: Vec<(u32, String, String)> = recording
            .actions
            .iter()
            .map(|a| {
                (
                    a.sequence_number,
                    a.kind.tag().to_string(),
                    a.kind.summary(),
                )
            })
            .collect();

        let result = self.db.with_conn(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO recordings
                     (recording_id, name, status, created_at, updated_at, action_count, size, hash, blob_ref)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(recording_id) DO UPDATE SET
                     name = excluded.name,
                     status = excluded.status,
                     updated_at = excluded.updated_at,
                     action_count = excluded.action_count,
                     size = excluded.size,
                     hash = excluded.hash,
                     blob_ref = excluded.blob_ref",
                params![row.0, row.1, row.2, row.3, row.4, row.5, row.6, row.7, format!("blobs/{}.rec", row.0)],
            )?;
            tx.execute("DELETE FROM actions WHERE recording_id = ?1", [&row.0])?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO actions (recording_id, sequence_number, kind, summary)
                     VALUES (?1, ?2, ?3, ?4)",
                )?;
                for (seq, kind, summary) in &summaries {
                    stmt.execute(params![row.0, seq, kind, summary])?;
                }
            }
            tx.commit()?;
            Ok(())
        });

        if let Err(e) = &result {
            error!("index upsert failed, removing orphan blob: {e}");
            let _ = self.blobs.remove(&id);
        }
        result
    }

    /// Read, authenticate, verify against the indexed hash, deserialize.
    pub fn load_recording(&self, recording_id: Uuid) -> Result<Recording> {
        let id = recording_id.to_string();
        let indexed_hash: String = self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT hash FROM recordings WHERE recording_id = ?1",
                [&id],
                |row| row.get(0),
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    RpaError::NotFound(format!("recording {id}"))
                }
                other => other.into(),
            })
        })?;

        let encoded = self.blobs.read(&id)?;
        let plaintext = blob::decode(&encoded, self.passphrase.as_deref())?;
        let hash = crypto::content_hash(&plaintext);
        if hash != indexed_hash {
            return Err(RpaError::Corruption(format!(
                "content hash mismatch for recording {id}"
            )));
        }

        let mut recording: Recording = serde_json::from_slice(&plaintext)?;
        recording.size = encoded.len() as u64;
        recording.content_hash = hash;
        Ok(recording)
    }

    pub fn delete_recording(&self, recording_id: Uuid) -> Result<()> {
        let id = recording_id.to_string();
        let removed = self.db.with_conn(|conn| {
            Ok(conn.execute("DELETE FROM recordings WHERE recording_id = ?1", [&id])?)
        })?;
        if removed == 0 {
            return Err(RpaError::NotFound(format!("recording {id}")));
        }
        self.blobs.remove(&id)
    }

    pub fn list_recordings(&self) -> Result<Vec<RecordingSummary>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT recording_id, name, status, created_at, updated_at, action_count, size, hash
                 FROM recordings ORDER BY updated_at DESC",
            )?;
            let rows = stmt.query_map([], summary_from_row)?;
            rows.collect::<std::result::Result<Vec<_>, _>>()
                .map_err(RpaError::from)
                .and_then(|rows| rows.into_iter().collect::<Result<Vec<_>>>())
        })
    }

    /// Substring search over recording names and action summaries.
    pub fn search_recordings(&self, query: &str) -> Result<Vec<RecordingSummary>> {
        let pattern = format!("%{}%", query.replace('%', "\\%").replace('_', "\\_"));
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT r.recording_id, r.name, r.status, r.created_at, r.updated_at,
                        r.action_count, r.size, r.hash
                 FROM recordings r
                 LEFT JOIN actions a ON a.recording_id = r.recording_id
                 WHERE r.name LIKE ?1 ESCAPE '\\' OR a.summary LIKE ?1 ESCAPE '\\'
                 ORDER BY r.updated_at DESC",
            )?;
            let rows = stmt.query_map([&pattern], summary_from_row)?;
            rows.collect::<std::result::Result<Vec<_>, _>>()
                .map_err(RpaError::from)
                .and_then(|rows| rows.into_iter().collect::<Result<Vec<_>>>())
        })
    }

    // ------------------------------------------------------------------
    // Schedules
    // ------------------------------------------------------------------

    pub fn save_schedule(&self, schedule: &Schedule) -> Result<()> {
        let trigger_json = serde_json::to_string(&schedule.trigger)?;
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO schedules
                     (schedule_id, recording_id, name, description, status, enabled, max_parallel,
                      execution_timeout_ms, created_at, updated_at, next_execution, last_execution,
                      total_exec, success_exec, trigger_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
                 ON CONFLICT(schedule_id) DO UPDATE SET
                     recording_id = excluded.recording_id,
                     name = excluded.name,
                     description = excluded.description,
                     status = excluded.status,
                     enabled = excluded.enabled,
                     max_parallel = excluded.max_parallel,
                     execution_timeout_ms = excluded.execution_timeout_ms,
                     updated_at = excluded.updated_at,
                     next_execution = excluded.next_execution,
                     last_execution = excluded.last_execution,
                     total_exec = excluded.total_exec,
                     success_exec = excluded.success_exec,
                     trigger_json = excluded.trigger_json",
                params![
                    schedule.schedule_id.to_string(),
                    schedule.recording_id.to_string(),
                    schedule.name,
                    schedule.description,
                    schedule.status.as_str(),
                    schedule.enabled,
                    schedule.max_parallel_executions,
                    schedule.execution_timeout_ms,
                    ts_to_sql(schedule.created_at),
                    ts_to_sql(schedule.updated_at),
                    schedule.next_execution.map(ts_to_sql),
                    schedule.last_execution.map(ts_to_sql),
                    schedule.total_executions,
                    schedule.successful_executions,
                    trigger_json,
                ],
            )?;
            Ok(())
        })
    }

    pub fn load_schedule(&self, schedule_id: Uuid) -> Result<Schedule> {
        let id = schedule_id.to_string();
        let mut schedule = self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT schedule_id, recording_id, name, description, status, enabled, max_parallel,
                        execution_timeout_ms, created_at, updated_at, next_execution, last_execution,
                        total_exec, success_exec, trigger_json
                 FROM schedules WHERE schedule_id = ?1",
                [&id],
                schedule_from_row,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => RpaError::NotFound(format!("schedule {id}")),
                other => other.into(),
            })
        })??;
        schedule.execution_history = self.executions_for(schedule_id)?;
        Ok(schedule)
    }

    pub fn delete_schedule(&self, schedule_id: Uuid) -> Result<()> {
        let id = schedule_id.to_string();
        let removed = self.db.with_conn(|conn| {
            Ok(conn.execute("DELETE FROM schedules WHERE schedule_id = ?1", [&id])?)
        })?;
        if removed == 0 {
            return Err(RpaError::NotFound(format!("schedule {id}")));
        }
        Ok(())
    }

    pub fn list_schedules(&self) -> Result<Vec<Schedule>> {
        let mut schedules = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT schedule_id, recording_id, name, description, status, enabled, max_parallel,
                        execution_timeout_ms, created_at, updated_at, next_execution, last_execution,
                        total_exec, success_exec, trigger_json
                 FROM schedules ORDER BY created_at",
            )?;
            let rows = stmt.query_map([], schedule_from_row)?;
            rows.collect::<std::result::Result<Vec<_>, _>>()
                .map_err(RpaError::from)
                .and_then(|rows| rows.into_iter().collect::<Result<Vec<_>>>())
        })?;
        for schedule in &mut schedules {
            schedule.execution_history = self.executions_for(schedule.schedule_id)?;
        }
        Ok(schedules)
    }

    /// Enabled schedules in a dispatchable status, for the scheduler tick.
    pub fn active_schedules(&self) -> Result<Vec<Schedule>> {
        Ok(self
            .list_schedules()?
            .into_iter()
            .filter(|s| {
                s.enabled
                    && matches!(
                        s.status,
                        ScheduleStatus::Active | ScheduleStatus::Running | ScheduleStatus::Failed
                    )
            })
            .collect())
    }

    // ------------------------------------------------------------------
    // Execution history
    // ------------------------------------------------------------------

    /// Append-only insert; per-schedule history trims to the most recent
    /// [`crate::schedule::HISTORY_LIMIT`] rows.
    pub fn insert_execution(&self, result: &ExecutionResult) -> Result<()> {
        self.db.with_conn(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO executions
                     (execution_id, schedule_id, start_time, end_time, success, error,
                      actions_executed, total_actions)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    result.execution_id.to_string(),
                    result.schedule_id.to_string(),
                    ts_to_sql(result.start_time),
                    result.end_time.map(ts_to_sql),
                    result.success,
                    result.error_message,
                    result.actions_executed,
                    result.total_actions,
                ],
            )?;
            tx.execute(
                "DELETE FROM executions
                 WHERE schedule_id = ?1
                   AND execution_id NOT IN (
                       SELECT execution_id FROM executions
                       WHERE schedule_id = ?1
                       ORDER BY start_time DESC
                       LIMIT ?2)",
                params![
                    result.schedule_id.to_string(),
                    crate::schedule::HISTORY_LIMIT as u32
                ],
            )?;
            tx.commit()?;
            Ok(())
        })
    }

    /// Finalize the stored row for a completed execution.
    pub fn complete_execution(&self, result: &ExecutionResult) -> Result<()> {
        let updated = self.db.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE executions
                 SET end_time = ?2, success = ?3, error = ?4, actions_executed = ?5
                 WHERE execution_id = ?1",
                params![
                    result.execution_id.to_string(),
                    result.end_time.map(ts_to_sql),
                    result.success,
                    result.error_message,
                    result.actions_executed,
                ],
            )?)
        })?;
        if updated == 0 {
            return Err(RpaError::NotFound(format!(
                "execution {}",
                result.execution_id
            )));
        }
        Ok(())
    }

    /// Most recent history for one schedule, oldest first.
    pub fn executions_for(&self, schedule_id: Uuid) -> Result<Vec<ExecutionResult>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT execution_id, schedule_id, start_time, end_time, success, error,
                        actions_executed, total_actions
                 FROM executions WHERE schedule_id = ?1
                 ORDER BY start_time DESC LIMIT ?2",
            )?;
            let rows = stmt.query_map(
                params![
                    schedule_id.to_string(),
                    crate::schedule::HISTORY_LIMIT as u32
                ],
                execution_from_row,
            )?;
            let mut executions = rows
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(RpaError::from)
                .and_then(|rows| rows.into_iter().collect::<Result<Vec<_>>>())?;
            executions.reverse();
            Ok(executions)
        })
    }

    // ------------------------------------------------------------------
    // Settings and statistics
    // ------------------------------------------------------------------

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        self.db.get_metadata(key)
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.db.set_metadata(key, value)
    }

    pub fn stats(&self) -> Result<StorageStats> {
        self.db.with_conn(|conn| {
            let recordings: u64 =
                conn.query_row("SELECT COUNT(*) FROM recordings", [], |r| r.get(0))?;
            let completed_recordings: u64 = conn.query_row(
                "SELECT COUNT(*) FROM recordings WHERE status = 'completed'",
                [],
                |r| r.get(0),
            )?;
            let schedules: u64 =
                conn.query_row("SELECT COUNT(*) FROM schedules", [], |r| r.get(0))?;
            let executions: u64 =
                conn.query_row("SELECT COUNT(*) FROM executions", [], |r| r.get(0))?;
            let successful_executions: u64 = conn.query_row(
                "SELECT COUNT(*) FROM executions WHERE success = 1",
                [],
                |r| r.get(0),
            )?;
            Ok(StorageStats {
                recordings,
                completed_recordings,
                schedules,
                executions,
                successful_executions,
            })
        })
    }
}

fn summary_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<RecordingSummary>> {
    let id: String = row.get(0)?;
    let status: String = row.get(2)?;
    let created: String = row.get(3)?;
    let updated: String = row.get(4)?;
    Ok((|| {
        Ok(RecordingSummary {
            recording_id: parse_uuid(&id)?,
            name: row.get(1).map_err(RpaError::from)?,
            status: RecordingStatus::parse(&status)?,
            created_at: ts_from_sql(&created)?,
            updated_at: ts_from_sql(&updated)?,
            action_count: row.get(5).map_err(RpaError::from)?,
            size: row.get(6).map_err(RpaError::from)?,
            hash: row.get(7).map_err(RpaError::from)?,
        })
    })())
}

fn schedule_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<Schedule>> {
    let id: String = row.get(0)?;
    let recording_id: String = row.get(1)?;
    let status: String = row.get(4)?;
    let created: String = row.get(8)?;
    let updated: String = row.get(9)?;
    let next_execution: Option<String> = row.get(10)?;
    let last_execution: Option<String> = row.get(11)?;
    let trigger_json: String = row.get(14)?;
    let name: String = row.get(2)?;
    let description: String = row.get(3)?;
    let enabled: bool = row.get(5)?;
    let max_parallel: u32 = row.get(6)?;
    let execution_timeout_ms: u64 = row.get(7)?;
    let total_exec: u64 = row.get(12)?;
    let success_exec: u64 = row.get(13)?;
    Ok((|| {
        let trigger: TriggerCondition = serde_json::from_str(&trigger_json)?;
        Ok(Schedule {
            schedule_id: parse_uuid(&id)?,
            name,
            description,
            recording_id: parse_uuid(&recording_id)?,
            trigger,
            status: ScheduleStatus::parse(&status)?,
            enabled,
            max_parallel_executions: max_parallel,
            execution_timeout_ms,
            created_at: ts_from_sql(&created)?,
            updated_at: ts_from_sql(&updated)?,
            next_execution: opt_ts_from_sql(next_execution)?,
            last_execution: opt_ts_from_sql(last_execution)?,
            execution_history: Vec::new(),
            total_executions: total_exec,
            successful_executions: success_exec,
        })
    })())
}

fn execution_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<ExecutionResult>> {
    let id: String = row.get(0)?;
    let schedule_id: String = row.get(1)?;
    let start: String = row.get(2)?;
    let end: Option<String> = row.get(3)?;
    let success: bool = row.get(4)?;
    let error: Option<String> = row.get(5)?;
    let actions_executed: u32 = row.get(6)?;
    let total_actions: u32 = row.get(7)?;
    Ok((|| {
        Ok(ExecutionResult {
            execution_id: parse_uuid(&id)?,
            schedule_id: parse_uuid(&schedule_id)?,
            start_time: ts_from_sql(&start)?,
            end_time: opt_ts_from_sql(end)?,
            success,
            error_message: error,
            actions_executed,
            total_actions,
        })
    })())
}

fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| RpaError::Corruption(format!("bad uuid '{s}': {e}")))
}
