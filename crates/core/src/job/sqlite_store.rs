//! SQLite-backed job store implementation.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};

use super::{
    DecompositionCommit, Job, JobFilter, JobSnapshot, JobStatus, JobStore, JobStoreError,
    NewUnit, Unit, UnitStatus,
};

const JOB_COLUMNS: &str = "id, status, created_at, finished_at, result_location";
const UNIT_COLUMNS: &str = "id, job_id, name, status, error_message";

/// SQLite-backed job store.
pub struct SqliteJobStore {
    conn: Mutex<Connection>,
}

impl SqliteJobStore {
    /// Open (or create) the database file and make sure the tables exist.
    pub fn new(path: &Path) -> Result<Self, JobStoreError> {
        let conn = Connection::open(path)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory store (useful for testing).
    pub fn in_memory() -> Result<Self, JobStoreError> {
        let conn = Connection::open_in_memory()?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), JobStoreError> {
        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                finished_at TEXT,
                result_location TEXT
            );

            CREATE TABLE IF NOT EXISTS units (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id TEXT NOT NULL REFERENCES jobs(id),
                name TEXT NOT NULL,
                status TEXT NOT NULL,
                error_message TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);
            CREATE INDEX IF NOT EXISTS idx_jobs_created_at ON jobs(created_at);
            CREATE INDEX IF NOT EXISTS idx_units_job_id ON units(job_id);
            "#,
        )?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, JobStoreError> {
        self.conn
            .lock()
            .map_err(|_| JobStoreError::Database("connection mutex poisoned".to_string()))
    }

    fn build_where_clause(filter: &JobFilter) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        let where_clause = match filter.status {
            Some(status) => {
                params.push(Box::new(status.as_str()));
                "WHERE status = ?".to_string()
            }
            None => String::new(),
        };

        (where_clause, params)
    }

    fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<Job> {
        let status: String = row.get(1)?;
        let created_at: String = row.get(2)?;
        let finished_at: Option<String> = row.get(3)?;

        Ok(Job {
            id: row.get(0)?,
            status: status.parse::<JobStatus>().map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e))
            })?,
            created_at: parse_timestamp(2, &created_at)?,
            finished_at: finished_at
                .map(|s| parse_timestamp(3, &s))
                .transpose()?,
            result_location: row.get(4)?,
        })
    }

    fn row_to_unit(row: &rusqlite::Row) -> rusqlite::Result<Unit> {
        let status: String = row.get(3)?;

        Ok(Unit {
            id: row.get(0)?,
            job_id: row.get(1)?,
            name: row.get(2)?,
            status: status.parse::<UnitStatus>().map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e))
            })?,
            error_message: row.get(4)?,
        })
    }

    fn query_job(conn: &Connection, id: &str) -> Result<Option<Job>, JobStoreError> {
        let job = conn
            .query_row(
                &format!("SELECT {} FROM jobs WHERE id = ?", JOB_COLUMNS),
                params![id],
                Self::row_to_job,
            )
            .optional()?;
        Ok(job)
    }

    fn query_units(conn: &Connection, job_id: &str) -> Result<Vec<Unit>, JobStoreError> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM units WHERE job_id = ? ORDER BY id ASC",
            UNIT_COLUMNS
        ))?;
        let rows = stmt.query_map(params![job_id], Self::row_to_unit)?;

        let mut units = Vec::new();
        for row in rows {
            units.push(row?);
        }
        Ok(units)
    }
}

fn now() -> DateTime<Utc> {
    // Stored with microsecond precision; truncate so returned values match
    // what a later read produces.
    Utc::now().trunc_subsecs(6)
}

fn timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

impl JobStore for SqliteJobStore {
    fn create_job(&self) -> Result<Job, JobStoreError> {
        let conn = self.lock()?;

        let job = Job {
            id: uuid::Uuid::new_v4().to_string(),
            status: JobStatus::Pending,
            created_at: now(),
            finished_at: None,
            result_location: None,
        };

        conn.execute(
            "INSERT INTO jobs (id, status, created_at) VALUES (?, ?, ?)",
            params![job.id, job.status.as_str(), timestamp(job.created_at)],
        )?;

        Ok(job)
    }

    fn get_job(&self, id: &str) -> Result<Option<Job>, JobStoreError> {
        let conn = self.lock()?;
        Self::query_job(&conn, id)
    }

    fn get_snapshot(&self, id: &str) -> Result<Option<JobSnapshot>, JobStoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let snapshot = match Self::query_job(&tx, id)? {
            Some(job) => {
                let units = Self::query_units(&tx, id)?;
                Some(JobSnapshot { job, units })
            }
            None => None,
        };

        tx.commit()?;
        Ok(snapshot)
    }

    fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>, JobStoreError> {
        let conn = self.lock()?;

        let (where_clause, mut params) = Self::build_where_clause(filter);
        let sql = format!(
            "SELECT {} FROM jobs {} ORDER BY created_at DESC, rowid DESC LIMIT ? OFFSET ?",
            JOB_COLUMNS, where_clause
        );

        params.push(Box::new(filter.limit));
        params.push(Box::new(filter.offset));
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(param_refs.as_slice(), Self::row_to_job)?;

        let mut jobs = Vec::new();
        for row in rows {
            jobs.push(row?);
        }
        Ok(jobs)
    }

    fn count_jobs(&self, filter: &JobFilter) -> Result<i64, JobStoreError> {
        let conn = self.lock()?;

        let (where_clause, params) = Self::build_where_clause(filter);
        let sql = format!("SELECT COUNT(*) FROM jobs {}", where_clause);
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let count: i64 = conn.query_row(&sql, param_refs.as_slice(), |row| row.get(0))?;
        Ok(count)
    }

    fn commit_decomposition(
        &self,
        job_id: &str,
        units: Vec<NewUnit>,
    ) -> Result<DecompositionCommit, JobStoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let mut job =
            Self::query_job(&tx, job_id)?.ok_or_else(|| JobStoreError::NotFound(job_id.to_string()))?;
        if job.status != JobStatus::Pending {
            return Err(JobStoreError::invalid_job_state(
                job_id,
                job.status,
                "decompose",
            ));
        }

        let mut created = Vec::with_capacity(units.len());
        {
            let mut insert = tx.prepare(
                "INSERT INTO units (job_id, name, status, error_message) VALUES (?, ?, ?, ?)",
            )?;
            for unit in units {
                let error_message = match unit.status {
                    UnitStatus::Failed => unit.error_message,
                    _ => None,
                };
                insert.execute(params![
                    job_id,
                    unit.name,
                    unit.status.as_str(),
                    error_message
                ])?;
                created.push(Unit {
                    id: tx.last_insert_rowid(),
                    job_id: job_id.to_string(),
                    name: unit.name,
                    status: unit.status,
                    error_message,
                });
            }
        }

        let has_pending = created.iter().any(|u| u.status == UnitStatus::Pending);
        if has_pending {
            job.status = JobStatus::InProgress;
            tx.execute(
                "UPDATE jobs SET status = ? WHERE id = ? AND status = ?",
                params![job.status.as_str(), job_id, JobStatus::Pending.as_str()],
            )?;
        } else {
            job.status = JobStatus::Failed;
            job.finished_at = Some(now());
            tx.execute(
                "UPDATE jobs SET status = ?, finished_at = ? WHERE id = ? AND status = ?",
                params![
                    job.status.as_str(),
                    job.finished_at.map(timestamp),
                    job_id,
                    JobStatus::Pending.as_str()
                ],
            )?;
        }

        tx.commit()?;

        Ok(DecompositionCommit {
            job,
            units: created,
        })
    }

    fn fail_job(&self, job_id: &str) -> Result<Job, JobStoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let mut job =
            Self::query_job(&tx, job_id)?.ok_or_else(|| JobStoreError::NotFound(job_id.to_string()))?;
        if job.status != JobStatus::Pending {
            return Err(JobStoreError::invalid_job_state(job_id, job.status, "fail"));
        }

        job.status = JobStatus::Failed;
        job.finished_at = Some(now());
        tx.execute(
            "UPDATE jobs SET status = ?, finished_at = ? WHERE id = ?",
            params![job.status.as_str(), job.finished_at.map(timestamp), job_id],
        )?;

        tx.commit()?;
        Ok(job)
    }

    fn get_unit(&self, unit_id: i64) -> Result<Option<Unit>, JobStoreError> {
        let conn = self.lock()?;
        let unit = conn
            .query_row(
                &format!("SELECT {} FROM units WHERE id = ?", UNIT_COLUMNS),
                params![unit_id],
                Self::row_to_unit,
            )
            .optional()?;
        Ok(unit)
    }

    fn list_units(&self, job_id: &str) -> Result<Vec<Unit>, JobStoreError> {
        let conn = self.lock()?;
        Self::query_units(&conn, job_id)
    }

    fn record_unit_outcome(
        &self,
        unit_id: i64,
        status: UnitStatus,
        error_message: Option<&str>,
    ) -> Result<bool, JobStoreError> {
        if !status.is_terminal() {
            return Err(JobStoreError::InvalidState {
                entity: format!("unit {}", unit_id),
                current: UnitStatus::Pending.to_string(),
                operation: format!("move to {}", status),
            });
        }

        let error_message = match status {
            UnitStatus::Failed => error_message,
            _ => None,
        };

        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE units SET status = ?, error_message = ? WHERE id = ? AND status = ?",
            params![
                status.as_str(),
                error_message,
                unit_id,
                UnitStatus::Pending.as_str()
            ],
        )?;

        if changed == 1 {
            return Ok(true);
        }

        let exists: Option<i64> = conn
            .query_row("SELECT id FROM units WHERE id = ?", params![unit_id], |row| {
                row.get(0)
            })
            .optional()?;
        match exists {
            Some(_) => Ok(false),
            None => Err(JobStoreError::UnitNotFound(unit_id)),
        }
    }

    fn finish_job(
        &self,
        job_id: &str,
        status: JobStatus,
        result_location: Option<&str>,
    ) -> Result<bool, JobStoreError> {
        if !status.is_terminal() {
            return Err(JobStoreError::invalid_job_state(
                job_id,
                JobStatus::InProgress,
                &format!("move to {}", status),
            ));
        }

        let result_location = match status {
            JobStatus::Completed => result_location,
            _ => None,
        };

        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE jobs SET status = ?, finished_at = ?, result_location = ? WHERE id = ? AND status = ?",
            params![
                status.as_str(),
                timestamp(now()),
                result_location,
                job_id,
                JobStatus::InProgress.as_str()
            ],
        )?;

        if changed == 1 {
            return Ok(true);
        }

        match Self::query_job(&conn, job_id)? {
            Some(_) => Ok(false),
            None => Err(JobStoreError::NotFound(job_id.to_string())),
        }
    }

    fn delete_job(&self, job_id: &str) -> Result<JobSnapshot, JobStoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let job =
            Self::query_job(&tx, job_id)?.ok_or_else(|| JobStoreError::NotFound(job_id.to_string()))?;
        if !job.status.is_terminal() {
            return Err(JobStoreError::invalid_job_state(job_id, job.status, "delete"));
        }

        let units = Self::query_units(&tx, job_id)?;

        // Units first: the foreign key forbids orphaning them.
        tx.execute("DELETE FROM units WHERE job_id = ?", params![job_id])?;
        tx.execute("DELETE FROM jobs WHERE id = ?", params![job_id])?;

        tx.commit()?;
        Ok(JobSnapshot { job, units })
    }
}
