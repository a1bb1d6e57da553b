use super::{types::Config, ConfigError};

/// Validate configuration
/// Currently validates:
/// - Server port is not 0
/// - Orchestrator concurrency and timeouts are non-zero
/// - The listing form URL template names the marketplace
/// - The bridge URL, when present, is http(s)
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    // Server validation
    if config.server.port == 0 {
        return Err(ConfigError::ValidationError(
            "server.port cannot be 0".to_string(),
        ));
    }

    // Orchestrator validation
    let orchestrator = &config.orchestrator;
    if orchestrator.max_concurrency == 0 {
        return Err(ConfigError::ValidationError(
            "orchestrator.max_concurrency cannot be 0".to_string(),
        ));
    }
    for (name, value) in [
        ("orchestrator.scrape_load_timeout_ms", orchestrator.scrape_load_timeout_ms),
        ("orchestrator.form_load_timeout_ms", orchestrator.form_load_timeout_ms),
        ("target.handshake_timeout_ms", config.target.handshake_timeout_ms),
        ("target.handshake_interval_ms", config.target.handshake_interval_ms),
    ] {
        if value == 0 {
            return Err(ConfigError::ValidationError(format!("{} cannot be 0", name)));
        }
    }
    if !orchestrator.listing_form_url.contains("{marketplace}") {
        return Err(ConfigError::ValidationError(
            "orchestrator.listing_form_url must contain {marketplace}".to_string(),
        ));
    }

    // Bridge validation
    if let Some(bridge) = &config.bridge {
        if !(bridge.url.starts_with("http://") || bridge.url.starts_with("https://")) {
            return Err(ConfigError::ValidationError(format!(
                "bridge.url must be an http(s) URL, got '{}'",
                bridge.url
            )));
        }
        if bridge.timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "bridge.timeout_secs cannot be 0".to_string(),
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::target::BridgeConfig;
    use std::net::IpAddr;

    #[test]
    fn test_validate_valid_config() {
        assert!(validate_config(&Config::default()).is_ok());
    }

    #[test]
    fn test_validate_port_zero_fails() {
        let config = Config {
            server: ServerConfig {
                host: "0.0.0.0".parse::<IpAddr>().unwrap(),
                port: 0,
            },
            ..Config::default()
        };
        let err = validate_config(&config).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_validate_zero_concurrency_fails() {
        let mut config = Config::default();
        config.orchestrator.max_concurrency = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_zero_timeout_fails() {
        let mut config = Config::default();
        config.orchestrator.form_load_timeout_ms = 0;
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("form_load_timeout_ms"));

        let mut config = Config::default();
        config.target.handshake_interval_ms = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_form_url_template() {
        let mut config = Config::default();
        config.orchestrator.listing_form_url = "https://seller.example.com/new".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_bridge_url() {
        let mut config = Config::default();
        config.bridge = Some(BridgeConfig {
            url: "ws://localhost:9222".to_string(),
            api_key: None,
            timeout_secs: 30,
        });
        assert!(validate_config(&config).is_err());

        config.bridge.as_mut().unwrap().url = "http://localhost:9222".to_string();
        assert!(validate_config(&config).is_ok());
    }
}
