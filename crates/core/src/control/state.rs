//! Pause / resume / terminate signalling for a running batch.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Run state of a batch. `Terminated` is sticky.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Running,
    Paused,
    Terminated,
}

/// Owner side of the control signal.
#[derive(Debug)]
pub struct ControlChannel {
    tx: watch::Sender<RunState>,
}

impl Default for ControlChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlChannel {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(RunState::Running);
        Self { tx }
    }

    pub fn state(&self) -> RunState {
        *self.tx.borrow()
    }

    /// Returns false if the batch is already terminated.
    pub fn pause(&self) -> bool {
        self.transition(RunState::Paused)
    }

    /// Returns false if the batch is already terminated.
    pub fn resume(&self) -> bool {
        self.transition(RunState::Running)
    }

    pub fn terminate(&self) {
        self.tx.send_replace(RunState::Terminated);
    }

    fn transition(&self, to: RunState) -> bool {
        self.tx.send_if_modified(|state| {
            if *state == RunState::Terminated || *state == to {
                return false;
            }
            *state = to;
            true
        });
        self.state() != RunState::Terminated
    }

    pub fn handle(&self) -> ControlHandle {
        ControlHandle {
            rx: self.tx.subscribe(),
        }
    }
}

/// Observer side, one per task.
#[derive(Debug, Clone)]
pub struct ControlHandle {
    rx: watch::Receiver<RunState>,
}

impl ControlHandle {
    pub fn state(&self) -> RunState {
        *self.rx.borrow()
    }

    pub fn is_terminated(&self) -> bool {
        self.state() == RunState::Terminated
    }

    /// Wait out a pause. Returns `Running` or `Terminated`.
    pub async fn wait_until_runnable(&mut self) -> RunState {
        match self.rx.wait_for(|s| *s != RunState::Paused).await {
            Ok(state) => *state,
            Err(_) => RunState::Terminated,
        }
    }

    /// Resolves once the batch is terminated (or the owner is gone).
    pub async fn terminated(&mut self) {
        let _ = self.rx.wait_for(|s| *s == RunState::Terminated).await;
    }
}
