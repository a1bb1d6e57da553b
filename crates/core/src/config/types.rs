use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;

use crate::orchestrator::OrchestratorConfig;
use crate::target::{BridgeConfig, TargetConfig};

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub target: TargetConfig,
    /// Browser-automation bridge. Without it batches cannot be started.
    #[serde(default)]
    pub bridge: Option<BridgeConfig>,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_port() -> u16 {
    8080
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("relister.db")
}

/// Sanitized config for API responses (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub orchestrator: OrchestratorConfig,
    pub target: TargetConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bridge: Option<SanitizedBridgeConfig>,
}

/// Sanitized bridge config (API key hidden)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedBridgeConfig {
    pub url: String,
    pub api_key_configured: bool,
    pub timeout_secs: u32,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            server: config.server.clone(),
            database: config.database.clone(),
            orchestrator: config.orchestrator.clone(),
            target: config.target.clone(),
            bridge: config.bridge.as_ref().map(|b| SanitizedBridgeConfig {
                url: b.url.clone(),
                api_key_configured: b.api_key.as_deref().is_some_and(|k| !k.is_empty()),
                timeout_secs: b.timeout_secs,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host.to_string(), "0.0.0.0");
        assert_eq!(config.database.path.to_str().unwrap(), "relister.db");
        assert_eq!(config.orchestrator.max_concurrency, 4);
        assert_eq!(config.target.handshake_timeout_ms, 5_000);
        assert!(config.bridge.is_none());
    }

    #[test]
    fn test_deserialize_full_config() {
        let toml = r#"
[server]
host = "127.0.0.1"
port = 9000

[database]
path = "/data/relister.sqlite"

[orchestrator]
max_concurrency = 8
max_stage_retries = 1
form_resolve_on_timeout = true

[target]
handshake_timeout_ms = 1000

[bridge]
url = "http://localhost:9222"
api_key = "secret"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.database.path.to_str().unwrap(), "/data/relister.sqlite");
        assert_eq!(config.orchestrator.max_concurrency, 8);
        assert_eq!(config.orchestrator.max_stage_retries, 1);
        assert!(config.orchestrator.form_resolve_on_timeout);
        // Unset fields keep their defaults
        assert_eq!(config.orchestrator.retry_backoff_ms, 2000);
        assert_eq!(config.target.handshake_timeout_ms, 1000);
        assert_eq!(config.target.handshake_interval_ms, 250);

        let bridge = config.bridge.as_ref().unwrap();
        assert_eq!(bridge.url, "http://localhost:9222");
        assert_eq!(bridge.timeout_secs, 30);
    }

    #[test]
    fn test_bridge_requires_url() {
        let toml = r#"
[bridge]
api_key = "secret"
"#;
        let result: Result<Config, _> = toml::from_str(toml);
        assert!(result.is_err());
    }

    #[test]
    fn test_sanitized_config_hides_api_key() {
        let config = Config {
            bridge: Some(BridgeConfig {
                url: "http://localhost:9222".to_string(),
                api_key: Some("secret-key".to_string()),
                timeout_secs: 60,
            }),
            ..Config::default()
        };

        let sanitized = SanitizedConfig::from(&config);
        let bridge = sanitized.bridge.as_ref().unwrap();
        assert_eq!(bridge.url, "http://localhost:9222");
        assert!(bridge.api_key_configured);
        assert_eq!(bridge.timeout_secs, 60);

        let json = serde_json::to_string(&sanitized).unwrap();
        assert!(!json.contains("secret-key"));
    }

    #[test]
    fn test_sanitized_config_without_bridge() {
        let sanitized = SanitizedConfig::from(&Config::default());
        assert_eq!(sanitized.server.port, 8080);
        assert!(sanitized.bridge.is_none());
    }
}
