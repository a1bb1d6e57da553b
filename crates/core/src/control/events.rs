//! Batch events and the broadcast bus that carries them.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

/// Running tally of a batch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub batch_id: String,
    /// Jobs that have produced their final result.
    pub current: usize,
    pub total: usize,
    pub success_count: usize,
    pub fail_count: usize,
}

impl ProgressSnapshot {
    pub fn new(batch_id: impl Into<String>, total: usize) -> Self {
        Self {
            batch_id: batch_id.into(),
            total,
            ..Default::default()
        }
    }

    /// Count one finished job. Terminated jobs advance `current` only.
    pub fn record(&mut self, status: ResultStatus) {
        self.current += 1;
        match status {
            ResultStatus::Success => self.success_count += 1,
            ResultStatus::Error => self.fail_count += 1,
            ResultStatus::Terminated => {}
        }
    }

    pub fn is_complete(&self) -> bool {
        self.current >= self.total
    }
}

/// Final outcome of one job as reported to observers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Success,
    Error,
    Terminated,
}

impl ResultStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultStatus::Success => "success",
            ResultStatus::Error => "error",
            ResultStatus::Terminated => "terminated",
        }
    }
}

/// The single terminal result of a job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobResult {
    pub batch_id: String,
    pub job_id: String,
    pub index: usize,
    pub link: String,
    pub status: ResultStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_url: Option<String>,
}

/// Event emitted while a batch runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BatchEvent {
    Progress(ProgressSnapshot),
    Result(JobResult),
    Complete(ProgressSnapshot),
}

impl BatchEvent {
    /// Event type name, as used in the serialized `type` tag.
    pub fn event_type(&self) -> &'static str {
        match self {
            BatchEvent::Progress(_) => "progress",
            BatchEvent::Result(_) => "result",
            BatchEvent::Complete(_) => "complete",
        }
    }
}

/// Fan-out of batch events.
///
/// Delivery is at-most-once: emitting never blocks, an emit with no
/// subscribers is dropped, and a subscriber that falls behind skips events.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<BatchEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn emit(&self, event: BatchEvent) {
        // Ignore send errors - they just mean no one is listening
        if self.sender.send(event).is_err() {
            trace!("Batch event dropped, no subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BatchEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
