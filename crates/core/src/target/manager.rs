//! Target lifecycle: open, wait for load, install agent, handshake, close.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

use super::{OpenOptions, TargetConfig, TargetDriver, TargetError, TargetHandle};

/// Composes [`TargetDriver`] primitives into a single `open` with load and
/// handshake guarantees.
///
/// A target that was opened is always closed again if any later step fails,
/// so callers only ever hold fully usable handles.
pub struct TargetManager {
    driver: Arc<dyn TargetDriver>,
    config: TargetConfig,
}

impl TargetManager {
    pub fn new(driver: Arc<dyn TargetDriver>, config: TargetConfig) -> Self {
        Self { driver, config }
    }

    pub fn driver_name(&self) -> &str {
        self.driver.name()
    }

    /// Open `url`, wait for it to load and hand-shake with the agent.
    pub async fn open(&self, url: &str, options: OpenOptions) -> Result<TargetHandle, TargetError> {
        let id = self.driver.open(url).await?;
        debug!("Opened target {} on {}", id, url);

        let loaded = match timeout(options.timeout, self.driver.wait_for_load(&id)).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                self.close_id(&id).await;
                return Err(e);
            }
            Err(_) if options.resolve_on_timeout => {
                warn!(
                    "Target {} did not load within {:?}, continuing anyway",
                    id, options.timeout
                );
                false
            }
            Err(_) => {
                self.close_id(&id).await;
                return Err(TargetError::LoadTimeout {
                    id,
                    timeout_ms: options.timeout.as_millis() as u64,
                });
            }
        };

        if let Err(e) = self.handshake(&id).await {
            self.close_id(&id).await;
            return Err(e);
        }

        info!("Target {} ready (loaded={})", id, loaded);
        Ok(TargetHandle {
            id,
            url: url.to_string(),
            loaded,
        })
    }

    /// Install the agent and ping it until it answers or the deadline passes.
    ///
    /// Injection can race the page's own scripts, so each round re-installs
    /// before pinging.
    async fn handshake(&self, id: &str) -> Result<(), TargetError> {
        let interval = Duration::from_millis(self.config.handshake_interval_ms);
        let deadline = Instant::now() + Duration::from_millis(self.config.handshake_timeout_ms);
        let mut last_issue = String::from("no pong");

        let timed_out = |reason: &str| TargetError::HandshakeTimeout {
            id: id.to_string(),
            reason: reason.to_string(),
        };

        loop {
            // A hung driver call must not outlive the handshake deadline.
            let remaining = deadline.saturating_duration_since(Instant::now());
            match timeout(remaining, self.driver.install_agent(id)).await {
                Err(_) => return Err(timed_out("agent install did not return")),
                Ok(Err(e)) => last_issue = e.to_string(),
                Ok(Ok(())) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    match timeout(remaining, self.driver.ping(id)).await {
                        Err(_) => return Err(timed_out("ping did not return")),
                        Ok(Ok(true)) => return Ok(()),
                        Ok(Ok(false)) => last_issue = "no pong".to_string(),
                        Ok(Err(e)) => last_issue = e.to_string(),
                    }
                }
            }

            if Instant::now() + interval > deadline {
                return Err(timed_out(&last_issue));
            }
            debug!("Agent on target {} not ready ({}), retrying", id, last_issue);
            sleep(interval).await;
        }
    }

    /// Best-effort close. Errors are logged, never returned.
    pub async fn close(&self, handle: &TargetHandle) {
        self.close_id(&handle.id).await;
    }

    async fn close_id(&self, id: &str) {
        if let Err(e) = self.driver.close(id).await {
            warn!("Failed to close target {}: {}", id, e);
        } else {
            debug!("Closed target {}", id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockTargetDriver;

    fn fast_config() -> TargetConfig {
        TargetConfig {
            handshake_timeout_ms: 200,
            handshake_interval_ms: 10,
        }
    }

    fn manager(driver: &Arc<MockTargetDriver>) -> TargetManager {
        TargetManager::new(driver.clone(), fast_config())
    }

    #[tokio::test]
    async fn test_open_ready_target() {
        let driver = Arc::new(MockTargetDriver::new());
        let handle = manager(&driver)
            .open(
                "https://source.example/1",
                OpenOptions::new(Duration::from_secs(1), false),
            )
            .await
            .unwrap();

        assert!(handle.loaded);
        assert_eq!(handle.url, "https://source.example/1");
        assert_eq!(driver.open_targets().await, vec![handle.id.clone()]);
    }

    #[tokio::test]
    async fn test_load_timeout_rejects_and_closes() {
        let driver = Arc::new(MockTargetDriver::new());
        driver.set_load_delay(Duration::from_millis(200)).await;

        let err = manager(&driver)
            .open(
                "https://dest.example/form",
                OpenOptions::new(Duration::from_millis(20), false),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, TargetError::LoadTimeout { .. }));
        assert!(driver.open_targets().await.is_empty());
        assert_eq!(driver.closed_targets().await.len(), 1);
    }

    #[tokio::test]
    async fn test_load_timeout_resolves_when_asked() {
        let driver = Arc::new(MockTargetDriver::new());
        driver.set_load_delay(Duration::from_millis(200)).await;

        let handle = manager(&driver)
            .open(
                "https://source.example/1",
                OpenOptions::new(Duration::from_millis(20), true),
            )
            .await
            .unwrap();

        assert!(!handle.loaded);
        assert_eq!(driver.open_targets().await.len(), 1);
    }

    #[tokio::test]
    async fn test_handshake_retries_until_pong() {
        let driver = Arc::new(MockTargetDriver::new());
        driver.set_failed_pings(3).await;

        manager(&driver)
            .open(
                "https://source.example/1",
                OpenOptions::new(Duration::from_secs(1), false),
            )
            .await
            .unwrap();

        assert_eq!(driver.install_count().await, 4);
    }

    #[tokio::test]
    async fn test_handshake_timeout_closes_target() {
        let driver = Arc::new(MockTargetDriver::new());
        driver.set_failed_pings(u32::MAX).await;

        let err = manager(&driver)
            .open(
                "https://source.example/1",
                OpenOptions::new(Duration::from_secs(1), false),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, TargetError::HandshakeTimeout { .. }));
        assert!(driver.open_targets().await.is_empty());
    }

    #[tokio::test]
    async fn test_hung_ping_is_bounded_by_handshake_deadline() {
        let driver = Arc::new(MockTargetDriver::new());
        driver.set_ping_delay(Duration::from_secs(30)).await;

        let started = std::time::Instant::now();
        let err = manager(&driver)
            .open(
                "https://source.example/1",
                OpenOptions::new(Duration::from_secs(1), false),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, TargetError::HandshakeTimeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(driver.open_targets().await.is_empty());
    }

    #[tokio::test]
    async fn test_close_swallows_errors() {
        let driver = Arc::new(MockTargetDriver::new());
        let mgr = manager(&driver);
        let handle = TargetHandle {
            id: "ghost".to_string(),
            url: "https://x.example".to_string(),
            loaded: true,
        };
        mgr.close(&handle).await;
    }
}
