//! Durable batches, job records and write-ahead checkpoints.

mod sqlite_store;
mod store;
mod types;

pub use sqlite_store::SqliteJobStore;
pub use store::{stage_data_checksum, JobFilter, JobStore, StoreError};
pub use types::{
    Batch, BulkJobRequest, Checkpoint, JobError, JobRecord, JobStatus, JobSummary, RequestError,
    Stage, StageData,
};
