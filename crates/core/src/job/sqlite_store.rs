//! SQLite-backed job store implementation.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::warn;

use super::store::stage_data_checksum;
use super::{
    Batch, BulkJobRequest, Checkpoint, JobError, JobFilter, JobRecord, JobStatus, JobStore,
    JobSummary, Stage, StageData, StoreError,
};

const JOB_COLUMNS: &str = "j.id, j.batch_id, j.idx, j.link, j.status, j.stage, j.error, j.summary, j.created_at, j.updated_at";

fn db_err(e: rusqlite::Error) -> StoreError {
    StoreError::Database(e.to_string())
}

fn timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// SQLite-backed job store.
pub struct SqliteJobStore {
    conn: Mutex<Connection>,
}

impl SqliteJobStore {
    /// Open (or create) the database file and its tables.
    pub fn new(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(db_err)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory store (useful for testing).
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS batches (
                id TEXT PRIMARY KEY,
                request TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                batch_id TEXT NOT NULL REFERENCES batches(id),
                idx INTEGER NOT NULL,
                link TEXT NOT NULL,
                status TEXT NOT NULL,
                stage TEXT NOT NULL,
                error TEXT,
                summary TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS checkpoints (
                job_id TEXT PRIMARY KEY REFERENCES jobs(id),
                link TEXT NOT NULL,
                stage TEXT NOT NULL,
                attempt INTEGER NOT NULL DEFAULT 0,
                stage_data TEXT NOT NULL,
                checksum TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_jobs_batch ON jobs(batch_id, idx);
            CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);
            "#,
        )
        .map_err(db_err)
    }

    fn build_where_clause(filter: &JobFilter) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(ref batch_id) = filter.batch_id {
            conditions.push("j.batch_id = ?");
            params.push(Box::new(batch_id.clone()));
        }

        if let Some(status) = filter.status {
            conditions.push("j.status = ?");
            params.push(Box::new(status.as_str()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }

    fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<JobRecord> {
        let status_str: String = row.get(4)?;
        let stage_str: String = row.get(5)?;
        let error_json: Option<String> = row.get(6)?;
        let summary_json: Option<String> = row.get(7)?;
        let created_at_str: String = row.get(8)?;
        let updated_at_str: String = row.get(9)?;

        Ok(JobRecord {
            id: row.get(0)?,
            batch_id: row.get(1)?,
            index: row.get::<_, i64>(2)? as usize,
            link: row.get(3)?,
            status: JobStatus::parse(&status_str).unwrap_or(JobStatus::Queued),
            stage: Stage::parse(&stage_str).unwrap_or(Stage::Queued),
            error: error_json.and_then(|json| serde_json::from_str::<JobError>(&json).ok()),
            summary: summary_json.and_then(|json| serde_json::from_str::<JobSummary>(&json).ok()),
            created_at: parse_timestamp(&created_at_str),
            updated_at: parse_timestamp(&updated_at_str),
        })
    }

    fn query_jobs(
        conn: &Connection,
        sql: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<JobRecord>, StoreError> {
        let mut stmt = conn.prepare(sql).map_err(db_err)?;
        let jobs = stmt
            .query_map(params, Self::row_to_job)
            .map_err(db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)?;
        Ok(jobs)
    }
}

impl JobStore for SqliteJobStore {
    fn create_batch(
        &self,
        request: &BulkJobRequest,
    ) -> Result<(Batch, Vec<JobRecord>), StoreError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().map_err(db_err)?;

        let now = Utc::now();
        let batch = Batch {
            id: uuid::Uuid::new_v4().to_string(),
            request: request.clone(),
            created_at: now,
        };

        tx.execute(
            "INSERT INTO batches (id, request, created_at) VALUES (?, ?, ?)",
            params![batch.id, serde_json::to_string(request)?, timestamp(&now)],
        )
        .map_err(db_err)?;

        let mut jobs = Vec::with_capacity(request.links.len());
        for (index, link) in request.links.iter().enumerate() {
            let job = JobRecord {
                id: uuid::Uuid::new_v4().to_string(),
                batch_id: batch.id.clone(),
                index,
                link: link.clone(),
                status: JobStatus::Queued,
                stage: Stage::Queued,
                error: None,
                summary: None,
                created_at: now,
                updated_at: now,
            };

            tx.execute(
                "INSERT INTO jobs (id, batch_id, idx, link, status, stage, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    job.id,
                    job.batch_id,
                    index as i64,
                    job.link,
                    job.status.as_str(),
                    job.stage.as_str(),
                    timestamp(&now),
                    timestamp(&now),
                ],
            )
            .map_err(db_err)?;

            let data_json = serde_json::to_string(&StageData::default())?;
            tx.execute(
                "INSERT INTO checkpoints (job_id, link, stage, attempt, stage_data, checksum, updated_at) VALUES (?, ?, ?, 0, ?, ?, ?)",
                params![
                    job.id,
                    job.link,
                    Stage::Queued.as_str(),
                    data_json,
                    stage_data_checksum(&data_json),
                    timestamp(&now),
                ],
            )
            .map_err(db_err)?;

            jobs.push(job);
        }

        tx.commit().map_err(db_err)?;
        Ok((batch, jobs))
    }

    fn get_batch(&self, id: &str) -> Result<Option<Batch>, StoreError> {
        let conn = self.conn.lock().unwrap();

        let row = conn
            .query_row(
                "SELECT id, request, created_at FROM batches WHERE id = ?",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()
            .map_err(db_err)?;

        match row {
            Some((id, request_json, created_at)) => Ok(Some(Batch {
                id,
                request: serde_json::from_str(&request_json)?,
                created_at: parse_timestamp(&created_at),
            })),
            None => Ok(None),
        }
    }

    fn get_job(&self, id: &str) -> Result<Option<JobRecord>, StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            &format!("SELECT {} FROM jobs j WHERE j.id = ?", JOB_COLUMNS),
            params![id],
            Self::row_to_job,
        )
        .optional()
        .map_err(db_err)
    }

    fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<JobRecord>, StoreError> {
        let conn = self.conn.lock().unwrap();

        let (where_clause, mut params) = Self::build_where_clause(filter);
        let sql = format!(
            "SELECT {} FROM jobs j JOIN batches b ON b.id = j.batch_id {} ORDER BY b.rowid, j.idx LIMIT ? OFFSET ?",
            JOB_COLUMNS, where_clause
        );
        params.push(Box::new(filter.limit));
        params.push(Box::new(filter.offset));

        let refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        Self::query_jobs(&conn, &sql, &refs)
    }

    fn count_jobs(&self, filter: &JobFilter) -> Result<i64, StoreError> {
        let conn = self.conn.lock().unwrap();

        let (where_clause, params) = Self::build_where_clause(filter);
        let sql = format!("SELECT COUNT(*) FROM jobs j {}", where_clause);
        let refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        conn.query_row(&sql, refs.as_slice(), |row| row.get(0))
            .map_err(db_err)
    }

    fn update_job(&self, job: &JobRecord) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();

        let error_json = job.error.as_ref().map(serde_json::to_string).transpose()?;
        let summary_json = job.summary.as_ref().map(serde_json::to_string).transpose()?;

        let rows = conn
            .execute(
                "UPDATE jobs SET status = ?, stage = ?, error = ?, summary = ?, updated_at = ? WHERE id = ?",
                params![
                    job.status.as_str(),
                    job.stage.as_str(),
                    error_json,
                    summary_json,
                    timestamp(&Utc::now()),
                    job.id,
                ],
            )
            .map_err(db_err)?;

        if rows == 0 {
            return Err(StoreError::NotFound(job.id.clone()));
        }
        Ok(())
    }

    fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().map_err(db_err)?;

        let data_json = serde_json::to_string(&checkpoint.stage_data)?;
        let updated_at = timestamp(&checkpoint.updated_at);

        let rows = tx
            .execute(
                "UPDATE jobs SET stage = ?, updated_at = ? WHERE id = ?",
                params![checkpoint.stage.as_str(), updated_at, checkpoint.job_id],
            )
            .map_err(db_err)?;
        if rows == 0 {
            return Err(StoreError::NotFound(checkpoint.job_id.clone()));
        }

        tx.execute(
            r#"INSERT INTO checkpoints (job_id, link, stage, attempt, stage_data, checksum, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(job_id) DO UPDATE SET
                   link = excluded.link,
                   stage = excluded.stage,
                   attempt = excluded.attempt,
                   stage_data = excluded.stage_data,
                   checksum = excluded.checksum,
                   updated_at = excluded.updated_at"#,
            params![
                checkpoint.job_id,
                checkpoint.link,
                checkpoint.stage.as_str(),
                checkpoint.attempt,
                data_json,
                stage_data_checksum(&data_json),
                updated_at,
            ],
        )
        .map_err(db_err)?;

        tx.commit().map_err(db_err)
    }

    fn load_checkpoint(&self, job_id: &str) -> Result<Option<Checkpoint>, StoreError> {
        let conn = self.conn.lock().unwrap();

        let row = conn
            .query_row(
                "SELECT job_id, link, stage, attempt, stage_data, checksum, updated_at FROM checkpoints WHERE job_id = ?",
                params![job_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, u32>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                    ))
                },
            )
            .optional()
            .map_err(db_err)?;

        let Some((job_id, link, stage, attempt, data_json, checksum, updated_at)) = row else {
            return Ok(None);
        };

        if stage_data_checksum(&data_json) != checksum {
            warn!("Ignoring checkpoint for job {}: checksum mismatch", job_id);
            return Ok(None);
        }
        let Some(stage) = Stage::parse(&stage) else {
            warn!("Ignoring checkpoint for job {}: unknown stage '{}'", job_id, stage);
            return Ok(None);
        };
        let stage_data: StageData = match serde_json::from_str(&data_json) {
            Ok(data) => data,
            Err(e) => {
                warn!("Ignoring checkpoint for job {}: {}", job_id, e);
                return Ok(None);
            }
        };

        Ok(Some(Checkpoint {
            job_id,
            link,
            stage,
            attempt,
            stage_data,
            updated_at: parse_timestamp(&updated_at),
        }))
    }

    fn record_attempt(&self, job_id: &str, attempt: u32) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        let rows = conn
            .execute(
                "UPDATE checkpoints SET attempt = ?, updated_at = ? WHERE job_id = ?",
                params![attempt, timestamp(&Utc::now()), job_id],
            )
            .map_err(db_err)?;
        if rows == 0 {
            return Err(StoreError::NotFound(job_id.to_string()));
        }
        Ok(())
    }

    fn mark_submit_attempted(&self, job_id: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().map_err(db_err)?;

        let data_json: String = tx
            .query_row(
                "SELECT stage_data FROM checkpoints WHERE job_id = ?",
                params![job_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?
            .ok_or_else(|| StoreError::NotFound(job_id.to_string()))?;

        let mut data: StageData = serde_json::from_str(&data_json)?;
        data.submit_attempted = true;
        let data_json = serde_json::to_string(&data)?;

        tx.execute(
            "UPDATE checkpoints SET stage_data = ?, checksum = ?, updated_at = ? WHERE job_id = ?",
            params![
                data_json,
                stage_data_checksum(&data_json),
                timestamp(&Utc::now()),
                job_id
            ],
        )
        .map_err(db_err)?;

        tx.commit().map_err(db_err)
    }

    fn recoverable_jobs(&self) -> Result<Vec<JobRecord>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT {} FROM jobs j JOIN batches b ON b.id = j.batch_id WHERE j.status NOT IN ('success', 'failed', 'terminated') ORDER BY b.rowid, j.idx",
            JOB_COLUMNS
        );
        Self::query_jobs(&conn, &sql, &[])
    }
}
