//! Job storage trait and types.

use sha2::{Digest, Sha256};
use thiserror::Error;

use super::{Batch, BulkJobRequest, Checkpoint, JobRecord, JobStatus};

/// Error type for job storage operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Job or batch not found.
    #[error("Not found: {0}")]
    NotFound(String),
    /// Database error.
    #[error("Database error: {0}")]
    Database(String),
    /// A stored value could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Filter for querying jobs.
#[derive(Debug, Clone)]
pub struct JobFilter {
    pub batch_id: Option<String>,
    pub status: Option<JobStatus>,
    pub limit: i64,
    pub offset: i64,
}

impl Default for JobFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl JobFilter {
    pub fn new() -> Self {
        Self {
            batch_id: None,
            status: None,
            limit: 100,
            offset: 0,
        }
    }

    pub fn with_batch(mut self, batch_id: impl Into<String>) -> Self {
        self.batch_id = Some(batch_id.into());
        self
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }
}

/// SHA-256 hex digest of serialized stage data.
pub fn stage_data_checksum(stage_data_json: &str) -> String {
    let digest = Sha256::digest(stage_data_json.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Trait for durable job storage.
///
/// Each job owns its own checkpoint row; writers never touch another job's
/// keys. Every write is atomic: a checkpoint is either fully stored with a
/// matching checksum or not visible at all.
pub trait JobStore: Send + Sync {
    /// Persist a batch together with one queued job and initial checkpoint per link.
    fn create_batch(&self, request: &BulkJobRequest)
        -> Result<(Batch, Vec<JobRecord>), StoreError>;

    fn get_batch(&self, id: &str) -> Result<Option<Batch>, StoreError>;

    fn get_job(&self, id: &str) -> Result<Option<JobRecord>, StoreError>;

    /// List jobs in batch creation order, then submission order.
    fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<JobRecord>, StoreError>;

    fn count_jobs(&self, filter: &JobFilter) -> Result<i64, StoreError>;

    /// Write status, stage, error and summary of a job.
    fn update_job(&self, job: &JobRecord) -> Result<(), StoreError>;

    /// Replace the job's checkpoint and bump the job's stage in one transaction.
    fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), StoreError>;

    /// Load the job's checkpoint. Rows whose checksum does not verify are
    /// treated as absent.
    fn load_checkpoint(&self, job_id: &str) -> Result<Option<Checkpoint>, StoreError>;

    /// Persist the attempt counter of the current stage.
    fn record_attempt(&self, job_id: &str, attempt: u32) -> Result<(), StoreError>;

    /// Flag the checkpoint as having started submission.
    fn mark_submit_attempted(&self, job_id: &str) -> Result<(), StoreError>;

    /// Non-terminal jobs, ordered by batch creation then submission index.
    fn recoverable_jobs(&self) -> Result<Vec<JobRecord>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_is_hex_sha256() {
        let sum = stage_data_checksum("{}");
        assert_eq!(sum.len(), 64);
        assert_eq!(
            sum,
            "44136fa355b3678a1146ad16f7e8649e94fb4fc21fe77e8310c060f61caaff8a"
        );
        assert_ne!(stage_data_checksum("{ }"), sum);
    }

    #[test]
    fn test_filter_builder() {
        let filter = JobFilter::new()
            .with_batch("b1")
            .with_status(JobStatus::Failed)
            .with_limit(10)
            .with_offset(5);
        assert_eq!(filter.batch_id.as_deref(), Some("b1"));
        assert_eq!(filter.status, Some(JobStatus::Failed));
        assert_eq!(filter.limit, 10);
        assert_eq!(filter.offset, 5);
    }
}
