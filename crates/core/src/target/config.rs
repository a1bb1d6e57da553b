//! Target and bridge configuration.

use serde::{Deserialize, Serialize};

/// Agent handshake timing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TargetConfig {
    /// Give up on the agent handshake after this long.
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,

    /// Delay between re-install/re-ping rounds.
    #[serde(default = "default_handshake_interval_ms")]
    pub handshake_interval_ms: u64,
}

fn default_handshake_timeout_ms() -> u64 {
    5_000
}

fn default_handshake_interval_ms() -> u64 {
    250
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_ms: default_handshake_timeout_ms(),
            handshake_interval_ms: default_handshake_interval_ms(),
        }
    }
}

/// Connection to the browser-automation bridge service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Base URL, e.g. `http://localhost:9222`.
    pub url: String,

    /// Sent as `X-Api-Key` when set.
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u32,
}

fn default_timeout_secs() -> u32 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_defaults() {
        let config = TargetConfig::default();
        assert_eq!(config.handshake_timeout_ms, 5_000);
        assert_eq!(config.handshake_interval_ms, 250);
    }

    #[test]
    fn test_deserialize_partial() {
        let config: TargetConfig = toml::from_str("handshake_timeout_ms = 1000").unwrap();
        assert_eq!(config.handshake_timeout_ms, 1000);
        assert_eq!(config.handshake_interval_ms, 250);

        let bridge: BridgeConfig = toml::from_str(r#"url = "http://localhost:9222""#).unwrap();
        assert_eq!(bridge.timeout_secs, 30);
        assert!(bridge.api_key.is_none());
    }
}
