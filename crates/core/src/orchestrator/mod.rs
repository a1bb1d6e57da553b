//! Bulk orchestrator for resumable listing migration.
//!
//! The orchestrator drives each job of a batch through its stages:
//! - **Admission**: Sequential (one dispatcher, submission order) into a bounded pool
//! - **Stages**: Sequential per job, checkpointed at every transition
//! - **Control**: Pause and terminate take effect at stage boundaries

mod config;
mod runner;
mod stages;
mod types;

pub use config::OrchestratorConfig;
pub use runner::BulkOrchestrator;
pub use types::{
    BatchAccepted, FormSection, OrchestratorError, OrchestratorStatus, RunningJob, StageError,
    TargetFormState,
};
