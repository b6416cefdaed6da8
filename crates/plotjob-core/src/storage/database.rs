//! SQLite-backed job store.
//!
//! Holds exactly one row per job. The row is a materialized view of the
//! journal: the FSM writes it after every journal append, and the recovery
//! scanner repairs it from the journal after a crash. Nothing else writes
//! `state`.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

use crate::error::DatabaseError;
use crate::job::{JobRecord, JobState, PlanMeta};

use super::data_dir;

/// SQLite database for job rows.
///
/// The connection lives behind a mutex so the store can be shared across
/// threads (per-job serialization happens in the FSM, not here).
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open the database at `<data_dir>/plotjob.db`.
    ///
    /// Creates the database file and schema if they don't exist.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open() -> Result<Self, DatabaseError> {
        let path = data_dir()
            .map_err(|e| DatabaseError::OpenFailed {
                path: "<data_dir>".into(),
                source: rusqlite::Error::InvalidPath(e.to_string().into()),
            })?
            .join("plotjob.db");
        Self::open_at(&path)
    }

    /// Open the database at an explicit path.
    pub fn open_at(path: &Path) -> Result<Self, DatabaseError> {
        let conn = Connection::open(path).map_err(|e| DatabaseError::OpenFailed {
            path: path.to_path_buf(),
            source: e,
        })?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    /// Open an in-memory database (for tests).
    pub fn open_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory().map_err(|e| DatabaseError::OpenFailed {
            path: ":memory:".into(),
            source: e,
        })?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<(), DatabaseError> {
        let conn = self.lock()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS jobs (
                id            TEXT PRIMARY KEY,
                name          TEXT NOT NULL,
                source        TEXT NOT NULL,
                state         TEXT NOT NULL,
                plan_json     TEXT NOT NULL DEFAULT '{}',
                priority      INTEGER NOT NULL DEFAULT 0,
                created_at    TEXT NOT NULL,
                updated_at    TEXT NOT NULL,
                error_message TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_jobs_state ON jobs(state);
            CREATE INDEX IF NOT EXISTS idx_jobs_priority ON jobs(priority);",
        )
        .map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, DatabaseError> {
        self.conn
            .lock()
            .map_err(|_| DatabaseError::QueryFailed("connection lock poisoned".into()))
    }

    /// Insert a freshly submitted job.
    pub fn insert_job(&self, job: &JobRecord) -> Result<(), DatabaseError> {
        let conn = self.lock()?;
        let plan_json = serde_json::to_string(&job.plan)
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;
        conn.execute(
            "INSERT INTO jobs (id, name, source, state, plan_json, priority, created_at, updated_at, error_message)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                job.id,
                job.name,
                job.source,
                job.state.as_str(),
                plan_json,
                job.priority,
                job.created_at.to_rfc3339(),
                job.updated_at.to_rfc3339(),
                job.error_message,
            ],
        )?;
        Ok(())
    }

    /// Fetch a job row by id.
    pub fn get_job(&self, id: &str) -> Result<Option<JobRecord>, DatabaseError> {
        let conn = self.lock()?;
        let result = conn
            .query_row(
                "SELECT id, name, source, state, plan_json, priority, created_at, updated_at, error_message
                 FROM jobs WHERE id = ?1",
                params![id],
                row_to_job,
            )
            .optional()?;
        Ok(result)
    }

    /// Fetch a job row, erroring if absent.
    pub fn require_job(&self, id: &str) -> Result<JobRecord, DatabaseError> {
        self.get_job(id)?
            .ok_or_else(|| DatabaseError::JobNotFound(id.to_string()))
    }

    /// List every job, highest priority first within equal states.
    pub fn list_jobs(&self) -> Result<Vec<JobRecord>, DatabaseError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, source, state, plan_json, priority, created_at, updated_at, error_message
             FROM jobs ORDER BY priority DESC, created_at ASC",
        )?;
        let jobs = stmt
            .query_map([], row_to_job)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(jobs)
    }

    /// List jobs that are not in a terminal state.
    pub fn list_active(&self) -> Result<Vec<JobRecord>, DatabaseError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, source, state, plan_json, priority, created_at, updated_at, error_message
             FROM jobs
             WHERE state NOT IN ('completed', 'aborted', 'failed')
             ORDER BY priority DESC, created_at ASC",
        )?;
        let jobs = stmt
            .query_map([], row_to_job)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(jobs)
    }

    /// Persist a state change. Only the FSM and the recovery scanner call
    /// this.
    pub fn update_state(
        &self,
        id: &str,
        state: JobState,
        error_message: Option<&str>,
    ) -> Result<(), DatabaseError> {
        let conn = self.lock()?;
        let n = conn.execute(
            "UPDATE jobs SET state = ?1, updated_at = ?2, error_message = ?3 WHERE id = ?4",
            params![state.as_str(), Utc::now().to_rfc3339(), error_message, id],
        )?;
        if n == 0 {
            return Err(DatabaseError::JobNotFound(id.to_string()));
        }
        Ok(())
    }

    /// Compare-and-set state change: succeeds only while the row is still
    /// in `from`. Returns false when a concurrent writer got there first;
    /// the caller treats that as a lost race.
    pub fn transition_state(
        &self,
        id: &str,
        from: JobState,
        to: JobState,
        error_message: Option<&str>,
    ) -> Result<bool, DatabaseError> {
        let conn = self.lock()?;
        let n = conn.execute(
            "UPDATE jobs SET state = ?1, updated_at = ?2, error_message = ?3
             WHERE id = ?4 AND state = ?5",
            params![
                to.as_str(),
                Utc::now().to_rfc3339(),
                error_message,
                id,
                from.as_str()
            ],
        )?;
        Ok(n > 0)
    }

    /// Id of the job currently in PLOTTING, if any. The row store is the
    /// cross-process truth for the single-device lease.
    pub fn plotting_job(&self) -> Result<Option<String>, DatabaseError> {
        let conn = self.lock()?;
        let id = conn
            .query_row(
                "SELECT id FROM jobs WHERE state = 'plotting' LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    /// Update the plan metadata (written once by the analyze/optimize
    /// producers).
    pub fn update_plan(&self, id: &str, plan: &PlanMeta) -> Result<(), DatabaseError> {
        let conn = self.lock()?;
        let plan_json =
            serde_json::to_string(plan).map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;
        let n = conn.execute(
            "UPDATE jobs SET plan_json = ?1, updated_at = ?2 WHERE id = ?3",
            params![plan_json, Utc::now().to_rfc3339(), id],
        )?;
        if n == 0 {
            return Err(DatabaseError::JobNotFound(id.to_string()));
        }
        Ok(())
    }

    /// Set a job's queue priority.
    pub fn update_priority(&self, id: &str, priority: i64) -> Result<(), DatabaseError> {
        let conn = self.lock()?;
        let n = conn.execute(
            "UPDATE jobs SET priority = ?1, updated_at = ?2 WHERE id = ?3",
            params![priority, Utc::now().to_rfc3339(), id],
        )?;
        if n == 0 {
            return Err(DatabaseError::JobNotFound(id.to_string()));
        }
        Ok(())
    }

    /// Highest priority currently queued, for requeue-to-front.
    pub fn max_priority(&self) -> Result<i64, DatabaseError> {
        let conn = self.lock()?;
        let max: i64 = conn.query_row(
            "SELECT COALESCE(MAX(priority), 0) FROM jobs WHERE state NOT IN ('completed', 'aborted', 'failed')",
            [],
            |row| row.get(0),
        )?;
        Ok(max)
    }

    /// Remove a job row. This is the explicit deletion operation -- it is
    /// not a state transition and does not touch the journal.
    pub fn delete_job(&self, id: &str) -> Result<bool, DatabaseError> {
        let conn = self.lock()?;
        let n = conn.execute("DELETE FROM jobs WHERE id = ?1", params![id])?;
        Ok(n > 0)
    }
}

fn row_to_job(row: &rusqlite::Row) -> Result<JobRecord, rusqlite::Error> {
    let state_str: String = row.get(3)?;
    let plan_json: String = row.get(4)?;
    let created_at_str: String = row.get(6)?;
    let updated_at_str: String = row.get(7)?;

    let state = JobState::parse(&state_str).ok_or(rusqlite::Error::InvalidQuery)?;
    let plan: PlanMeta =
        serde_json::from_str(&plan_json).map_err(|_| rusqlite::Error::InvalidQuery)?;

    let created_at = DateTime::parse_from_rfc3339(&created_at_str)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|_| rusqlite::Error::InvalidQuery)?;
    let updated_at = DateTime::parse_from_rfc3339(&updated_at_str)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|_| rusqlite::Error::InvalidQuery)?;

    Ok(JobRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        source: row.get(2)?,
        state,
        plan,
        priority: row.get(5)?,
        created_at,
        updated_at,
        error_message: row.get(8)?,
    })
}
