//! Mock target driver for testing.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::target::{TargetDriver, TargetError};

#[derive(Debug, Default)]
struct DriverState {
    counter: u32,
    /// Ids currently open, in opening order.
    open: Vec<String>,
    closed: Vec<String>,
    /// Every URL ever opened, in order.
    opened_urls: Vec<String>,
    load_delay: Option<Duration>,
    failed_pings: u32,
    ping_delay: Option<Duration>,
    installs: u32,
    next_open_error: Option<TargetError>,
}

/// Mock implementation of the TargetDriver trait.
///
/// Provides controllable behavior for testing:
/// - Track open and closed targets for leak assertions
/// - Delay load completion to exercise timeouts
/// - Let the agent ignore a number of pings
/// - Stall pings to exercise the handshake deadline
///
/// # Example
///
/// ```rust,ignore
/// let driver = Arc::new(MockTargetDriver::new());
/// driver.set_failed_pings(2).await;
///
/// let manager = TargetManager::new(driver.clone(), TargetConfig::default());
/// let handle = manager.open("https://source.example/1", options).await?;
/// assert_eq!(driver.install_count().await, 3);
/// ```
#[derive(Debug, Default)]
pub struct MockTargetDriver {
    state: Arc<RwLock<DriverState>>,
}

impl MockTargetDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ids of targets that were opened and not closed yet.
    pub async fn open_targets(&self) -> Vec<String> {
        self.state.read().await.open.clone()
    }

    pub async fn closed_targets(&self) -> Vec<String> {
        self.state.read().await.closed.clone()
    }

    pub async fn opened_urls(&self) -> Vec<String> {
        self.state.read().await.opened_urls.clone()
    }

    /// Make `wait_for_load` take this long.
    pub async fn set_load_delay(&self, delay: Duration) {
        self.state.write().await.load_delay = Some(delay);
    }

    /// Answer the next `count` pings with "not ready".
    pub async fn set_failed_pings(&self, count: u32) {
        self.state.write().await.failed_pings = count;
    }

    /// Make every `ping` take this long before answering.
    pub async fn set_ping_delay(&self, delay: Duration) {
        self.state.write().await.ping_delay = Some(delay);
    }

    pub async fn install_count(&self) -> u32 {
        self.state.read().await.installs
    }

    /// Configure the next `open` to fail with the given error.
    pub async fn set_next_open_error(&self, error: TargetError) {
        self.state.write().await.next_open_error = Some(error);
    }
}

#[async_trait]
impl TargetDriver for MockTargetDriver {
    fn name(&self) -> &str {
        "mock"
    }

    async fn open(&self, url: &str) -> Result<String, TargetError> {
        let mut state = self.state.write().await;
        if let Some(error) = state.next_open_error.take() {
            return Err(error);
        }

        state.counter += 1;
        let id = format!("target-{}", state.counter);
        state.open.push(id.clone());
        state.opened_urls.push(url.to_string());
        Ok(id)
    }

    async fn wait_for_load(&self, _id: &str) -> Result<(), TargetError> {
        let delay = self.state.read().await.load_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    async fn install_agent(&self, id: &str) -> Result<(), TargetError> {
        let mut state = self.state.write().await;
        if !state.open.iter().any(|open| open == id) {
            return Err(TargetError::NotFound(id.to_string()));
        }
        state.installs += 1;
        Ok(())
    }

    async fn ping(&self, _id: &str) -> Result<bool, TargetError> {
        let delay = self.state.read().await.ping_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state.write().await;
        if state.failed_pings > 0 {
            state.failed_pings -= 1;
            return Ok(false);
        }
        Ok(true)
    }

    async fn close(&self, id: &str) -> Result<(), TargetError> {
        let mut state = self.state.write().await;
        let Some(pos) = state.open.iter().position(|open| open == id) else {
            return Err(TargetError::NotFound(id.to_string()));
        };
        state.open.remove(pos);
        state.closed.push(id.to_string());
        Ok(())
    }
}
