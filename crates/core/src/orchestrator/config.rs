//! Orchestrator configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::target::OpenOptions;

/// Configuration for the bulk listing orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrchestratorConfig {
    /// Upper bound for a batch's concurrency. Requests above it are clamped.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Retries per stage after the first attempt.
    #[serde(default = "default_max_stage_retries")]
    pub max_stage_retries: u32,

    /// Delay between stage attempts (milliseconds).
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,

    /// Load timeout for source pages (milliseconds).
    #[serde(default = "default_load_timeout")]
    pub scrape_load_timeout_ms: u64,

    /// Load timeout for the destination form (milliseconds).
    #[serde(default = "default_load_timeout")]
    pub form_load_timeout_ms: u64,

    /// Scrape a source page even if it never signals load complete.
    #[serde(default = "default_true")]
    pub scrape_resolve_on_timeout: bool,

    /// Use the destination form even if it never signals load complete.
    #[serde(default)]
    pub form_resolve_on_timeout: bool,

    /// Quantity given to every SKU when the source reports no stock at all.
    #[serde(default = "default_quantity")]
    pub default_quantity: u32,

    /// Capacity of the event broadcast channel.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,

    /// Destination form URL. `{marketplace}` and `{listing_type}` are substituted.
    #[serde(default = "default_listing_form_url")]
    pub listing_form_url: String,

    /// Resume unfinished jobs when the server starts.
    #[serde(default = "default_true")]
    pub recover_on_start: bool,
}

fn default_max_concurrency() -> usize {
    4
}

fn default_max_stage_retries() -> u32 {
    2
}

fn default_retry_backoff() -> u64 {
    2000
}

fn default_load_timeout() -> u64 {
    30_000
}

fn default_true() -> bool {
    true
}

fn default_quantity() -> u32 {
    1
}

fn default_event_buffer() -> usize {
    256
}

fn default_listing_form_url() -> String {
    "https://seller.example.com/{marketplace}/listings/new?type={listing_type}".to_string()
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            max_stage_retries: default_max_stage_retries(),
            retry_backoff_ms: default_retry_backoff(),
            scrape_load_timeout_ms: default_load_timeout(),
            form_load_timeout_ms: default_load_timeout(),
            scrape_resolve_on_timeout: true,
            form_resolve_on_timeout: false,
            default_quantity: default_quantity(),
            event_buffer: default_event_buffer(),
            listing_form_url: default_listing_form_url(),
            recover_on_start: true,
        }
    }
}

impl OrchestratorConfig {
    /// Destination form URL for the given selectors.
    pub fn form_url(&self, marketplace: &str, listing_type: &str) -> String {
        self.listing_form_url
            .replace("{marketplace}", &urlencoding::encode(marketplace))
            .replace("{listing_type}", &urlencoding::encode(listing_type))
    }

    pub fn scrape_options(&self) -> OpenOptions {
        OpenOptions::new(
            Duration::from_millis(self.scrape_load_timeout_ms),
            self.scrape_resolve_on_timeout,
        )
    }

    pub fn form_options(&self) -> OpenOptions {
        OpenOptions::new(
            Duration::from_millis(self.form_load_timeout_ms),
            self.form_resolve_on_timeout,
        )
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.max_concurrency, 4);
        assert_eq!(config.max_stage_retries, 2);
        assert!(config.scrape_resolve_on_timeout);
        assert!(!config.form_resolve_on_timeout);
        assert_eq!(config.default_quantity, 1);
        assert!(config.recover_on_start);
    }

    #[test]
    fn test_deserialize_minimal() {
        let config: OrchestratorConfig = toml::from_str("max_concurrency = 8").unwrap();
        assert_eq!(config.max_concurrency, 8);
        assert_eq!(config.retry_backoff_ms, 2000);
        assert_eq!(config.event_buffer, 256);
        assert!(config.scrape_resolve_on_timeout);
    }

    #[test]
    fn test_deserialize_full() {
        let toml = r#"
            max_concurrency = 2
            max_stage_retries = 5
            retry_backoff_ms = 100
            scrape_load_timeout_ms = 1000
            form_load_timeout_ms = 2000
            scrape_resolve_on_timeout = false
            form_resolve_on_timeout = true
            default_quantity = 3
            event_buffer = 16
            listing_form_url = "https://dest.example/{marketplace}/new"
            recover_on_start = false
        "#;
        let config: OrchestratorConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.max_stage_retries, 5);
        assert!(!config.scrape_options().resolve_on_timeout);
        assert!(config.form_options().resolve_on_timeout);
        assert_eq!(config.form_options().timeout, Duration::from_millis(2000));
        assert!(!config.recover_on_start);
    }

    #[test]
    fn test_form_url_substitution() {
        let config = OrchestratorConfig::default();
        assert_eq!(
            config.form_url("us", "auction & fixed"),
            "https://seller.example.com/us/listings/new?type=auction%20%26%20fixed"
        );
    }
}
