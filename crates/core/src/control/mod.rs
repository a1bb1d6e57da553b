//! Progress events out, pause/resume/terminate in.

mod events;
mod state;

pub use events::{BatchEvent, EventBus, JobResult, ProgressSnapshot, ResultStatus};
pub use state::{ControlChannel, ControlHandle, RunState};
