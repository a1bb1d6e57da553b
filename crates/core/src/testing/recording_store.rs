//! Job store wrapper that records writes and injects failures.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use crate::job::{
    Batch, BulkJobRequest, Checkpoint, JobFilter, JobRecord, JobStore, SqliteJobStore, Stage,
    StoreError,
};

#[derive(Debug, Default)]
struct Recorded {
    /// Stages saved per job, in write order.
    saves: HashMap<String, Vec<Stage>>,
    attempts: HashMap<String, Vec<u32>>,
    fail_writes: bool,
    unreadable: HashSet<String>,
}

/// An in-memory [`SqliteJobStore`] that records checkpoint writes.
///
/// Writes can be made to fail, to exercise the fatal store path, and single
/// checkpoints can be made unreadable, as if their checksum failed.
pub struct RecordingJobStore {
    inner: SqliteJobStore,
    recorded: Mutex<Recorded>,
}

impl RecordingJobStore {
    pub fn new() -> Result<Self, StoreError> {
        Ok(Self {
            inner: SqliteJobStore::in_memory()?,
            recorded: Mutex::new(Recorded::default()),
        })
    }

    /// Stages passed to `save_checkpoint` for a job.
    pub fn saved_stages(&self, job_id: &str) -> Vec<Stage> {
        self.recorded
            .lock()
            .unwrap()
            .saves
            .get(job_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn save_count(&self) -> usize {
        self.recorded.lock().unwrap().saves.values().map(Vec::len).sum()
    }

    pub fn recorded_attempts(&self, job_id: &str) -> Vec<u32> {
        self.recorded
            .lock()
            .unwrap()
            .attempts
            .get(job_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Make every subsequent write fail with a database error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.recorded.lock().unwrap().fail_writes = fail;
    }

    /// Make the job's checkpoint load as absent.
    pub fn make_unreadable(&self, job_id: &str) {
        self.recorded
            .lock()
            .unwrap()
            .unreadable
            .insert(job_id.to_string());
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.recorded.lock().unwrap().fail_writes {
            return Err(StoreError::Database("disk I/O error".to_string()));
        }
        Ok(())
    }
}

impl JobStore for RecordingJobStore {
    fn create_batch(
        &self,
        request: &BulkJobRequest,
    ) -> Result<(Batch, Vec<JobRecord>), StoreError> {
        self.check_writable()?;
        self.inner.create_batch(request)
    }

    fn get_batch(&self, id: &str) -> Result<Option<Batch>, StoreError> {
        self.inner.get_batch(id)
    }

    fn get_job(&self, id: &str) -> Result<Option<JobRecord>, StoreError> {
        self.inner.get_job(id)
    }

    fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<JobRecord>, StoreError> {
        self.inner.list_jobs(filter)
    }

    fn count_jobs(&self, filter: &JobFilter) -> Result<i64, StoreError> {
        self.inner.count_jobs(filter)
    }

    fn update_job(&self, job: &JobRecord) -> Result<(), StoreError> {
        self.check_writable()?;
        self.inner.update_job(job)
    }

    fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        self.check_writable()?;
        self.inner.save_checkpoint(checkpoint)?;
        self.recorded
            .lock()
            .unwrap()
            .saves
            .entry(checkpoint.job_id.clone())
            .or_default()
            .push(checkpoint.stage);
        Ok(())
    }

    fn load_checkpoint(&self, job_id: &str) -> Result<Option<Checkpoint>, StoreError> {
        if self.recorded.lock().unwrap().unreadable.contains(job_id) {
            return Ok(None);
        }
        self.inner.load_checkpoint(job_id)
    }

    fn record_attempt(&self, job_id: &str, attempt: u32) -> Result<(), StoreError> {
        self.check_writable()?;
        self.inner.record_attempt(job_id, attempt)?;
        self.recorded
            .lock()
            .unwrap()
            .attempts
            .entry(job_id.to_string())
            .or_default()
            .push(attempt);
        Ok(())
    }

    fn mark_submit_attempted(&self, job_id: &str) -> Result<(), StoreError> {
        self.check_writable()?;
        self.inner.mark_submit_attempted(job_id)
    }

    fn recoverable_jobs(&self) -> Result<Vec<JobRecord>, StoreError> {
        self.inner.recoverable_jobs()
    }
}
