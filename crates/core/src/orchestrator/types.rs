//! Types for the bulk orchestrator.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::control::{ProgressSnapshot, RunState};
use crate::job::{JobStatus, RequestError, Stage, StoreError};
use crate::pool::PoolStatus;
use crate::reconcile::ReconcileError;
use crate::target::{AgentError, TargetError, TargetHandle};

/// Why a stage did not complete.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StageError {
    /// Load or handshake timeout, or the target/agent went away.
    #[error("target error: {0}")]
    TransientTarget(String),

    /// The source page did not produce a usable product.
    #[error("scrape failed: {0}")]
    Scrape(String),

    /// Reconciliation aborted, or required stage data is missing.
    #[error("reconciliation failed: {0}")]
    Reconcile(String),

    /// The product is outside the batch's price filter.
    #[error("filtered: {0}")]
    Filtered(String),

    /// The destination refused the listing.
    #[error("submission rejected: {0}")]
    Submit(String),

    /// The job store failed; the whole batch stops.
    #[error("job store unavailable: {0}")]
    FatalHost(String),

    /// The batch was terminated while the stage was waiting.
    #[error("terminated")]
    Terminated,
}

impl StageError {
    /// Whether another attempt of the same stage may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StageError::TransientTarget(_) | StageError::Scrape(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            StageError::TransientTarget(_) => "transient_target",
            StageError::Scrape(_) => "scrape",
            StageError::Reconcile(_) => "reconcile",
            StageError::Filtered(_) => "filtered",
            StageError::Submit(_) => "submit",
            StageError::FatalHost(_) => "fatal_host",
            StageError::Terminated => "terminated",
        }
    }
}

impl From<TargetError> for StageError {
    fn from(e: TargetError) -> Self {
        StageError::TransientTarget(e.to_string())
    }
}

impl From<AgentError> for StageError {
    fn from(e: AgentError) -> Self {
        match e {
            AgentError::Scrape(msg) => StageError::Scrape(msg),
            AgentError::Rejected(msg) => StageError::Submit(msg),
            other => StageError::TransientTarget(other.to_string()),
        }
    }
}

impl From<ReconcileError> for StageError {
    fn from(e: ReconcileError) -> Self {
        StageError::Reconcile(e.to_string())
    }
}

impl From<StoreError> for StageError {
    fn from(e: StoreError) -> Self {
        StageError::FatalHost(e.to_string())
    }
}

/// Errors returned by the orchestrator's control surface.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("invalid request: {0}")]
    InvalidRequest(#[from] RequestError),

    /// Only one batch runs at a time.
    #[error("batch {0} is still running")]
    BatchInProgress(String),

    #[error("no batch is running")]
    NoActiveBatch,

    #[error("batch not found: {0}")]
    BatchNotFound(String),

    #[error("job store error: {0}")]
    Store(#[from] StoreError),
}

/// Returned when a batch is accepted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchAccepted {
    pub batch_id: String,
    pub job_count: usize,
    /// Effective concurrency after clamping.
    pub concurrency: usize,
}

/// A job currently holding a pool slot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunningJob {
    pub job_id: String,
    pub index: usize,
    pub link: String,
    pub stage: Stage,
    pub status: JobStatus,
}

/// Current status of the orchestrator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestratorStatus {
    /// Whether a batch is running.
    pub running: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_state: Option<RunState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<ProgressSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool: Option<PoolStatus>,
    /// Batches waiting behind the current one (recovery only).
    pub pending_batches: usize,
    #[serde(default)]
    pub jobs: Vec<RunningJob>,
}

/// A section of the destination form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FormSection {
    Basics,
    Variations,
    Images,
}

impl FormSection {
    /// The section a stage fills, if any.
    pub fn filled_by(stage: Stage) -> Option<FormSection> {
        match stage {
            Stage::FillingBasics => Some(FormSection::Basics),
            Stage::FillingVariations => Some(FormSection::Variations),
            Stage::FillingImages => Some(FormSection::Images),
            _ => None,
        }
    }

    /// Sections that must already be filled before `stage` runs.
    pub fn required_before(stage: Stage) -> &'static [FormSection] {
        match stage {
            Stage::FillingVariations => &[FormSection::Basics],
            Stage::FillingImages => &[FormSection::Basics, FormSection::Variations],
            Stage::Submitting => &[
                FormSection::Basics,
                FormSection::Variations,
                FormSection::Images,
            ],
            _ => &[],
        }
    }
}

/// In-memory view of the destination form of one job.
///
/// Never persisted: after a restart the form is reopened and the sections
/// preceding the resumed stage are filled again.
#[derive(Debug, Default)]
pub struct TargetFormState {
    pub handle: Option<TargetHandle>,
    pub filled: BTreeSet<FormSection>,
}

impl TargetFormState {
    /// Forget the target and everything filled on it.
    pub fn take(&mut self) -> Option<TargetHandle> {
        self.filled.clear();
        self.handle.take()
    }

    pub fn is_filled(&self, section: FormSection) -> bool {
        self.filled.contains(&section)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(StageError::TransientTarget("x".into()).is_retryable());
        assert!(StageError::Scrape("x".into()).is_retryable());
        assert!(!StageError::Submit("x".into()).is_retryable());
        assert!(!StageError::Filtered("x".into()).is_retryable());
        assert!(!StageError::Reconcile("x".into()).is_retryable());
        assert!(!StageError::FatalHost("x".into()).is_retryable());
    }

    #[test]
    fn test_agent_error_mapping() {
        assert_eq!(
            StageError::from(AgentError::Rejected("dup".into())),
            StageError::Submit("dup".into())
        );
        assert_eq!(
            StageError::from(AgentError::Scrape("no title".into())),
            StageError::Scrape("no title".into())
        );
        assert!(matches!(
            StageError::from(AgentError::Timeout),
            StageError::TransientTarget(_)
        ));
        assert!(matches!(
            StageError::from(AgentError::Fill("row missing".into())),
            StageError::TransientTarget(_)
        ));
    }

    #[test]
    fn test_form_sections() {
        assert_eq!(
            FormSection::filled_by(Stage::FillingVariations),
            Some(FormSection::Variations)
        );
        assert_eq!(FormSection::filled_by(Stage::Submitting), None);
        assert!(FormSection::required_before(Stage::FillingBasics).is_empty());
        assert_eq!(FormSection::required_before(Stage::Submitting).len(), 3);
    }

    #[test]
    fn test_form_state_take_clears_sections() {
        let mut form = TargetFormState {
            handle: Some(TargetHandle {
                id: "t1".into(),
                url: "https://dest.example".into(),
                loaded: true,
            }),
            filled: BTreeSet::new(),
        };
        form.filled.insert(FormSection::Basics);
        assert!(form.take().is_some());
        assert!(form.handle.is_none());
        assert!(!form.is_filled(FormSection::Basics));
    }
}
