//! HTTP client for a browser-automation bridge service.
//!
//! The bridge owns the actual browser. It exposes targets as REST resources
//! and relays agent commands to the script injected into each target:
//!
//! - `POST   /targets` `{url}` → `{id}`
//! - `GET    /targets/{id}` → `{id, url, loaded}`
//! - `DELETE /targets/{id}`
//! - `POST   /targets/{id}/agent` installs the page-side agent
//! - `POST   /targets/{id}/agent/messages` `{type, ...}` → `{ok, data?, error?}`
//! - `GET    /listings?source=..&title=..` → `{destination_url?}`

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::reconcile::{SourceProduct, VariationPlan};

use super::{
    AgentError, BridgeConfig, FillReport, ListingAgent, ListingBasics, SubmitReceipt,
    TargetDriver, TargetError, TargetHandle,
};

/// How often `wait_for_load` polls the target state.
const LOAD_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Commands relayed to the page-side agent.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentCommand<'a> {
    Ping,
    Scrape,
    FillBasics { basics: &'a ListingBasics },
    VariationRows,
    FillVariations { plan: &'a VariationPlan },
    FillImages { images: &'a [String] },
    Submit,
}

/// Reply envelope for agent commands.
#[derive(Debug, Deserialize)]
struct AgentReply<T> {
    ok: bool,
    data: Option<T>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct OpenTargetRequest<'a> {
    url: &'a str,
}

#[derive(Debug, Deserialize)]
struct OpenTargetResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct TargetInfo {
    #[serde(default)]
    loaded: bool,
}

#[derive(Debug, Deserialize)]
struct ListingLookup {
    #[serde(default)]
    destination_url: Option<String>,
}

/// Bridge-backed implementation of both [`TargetDriver`] and [`ListingAgent`].
pub struct BridgeClient {
    client: Client,
    config: BridgeConfig,
}

impl BridgeClient {
    pub fn new(config: BridgeConfig) -> Result<Self, TargetError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs as u64))
            .build()
            .map_err(|e| TargetError::Driver(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    /// Get the base URL without trailing slash.
    fn base_url(&self) -> &str {
        self.config.url.trim_end_matches('/')
    }

    fn with_auth(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.config.api_key {
            Some(key) => builder.header("X-Api-Key", key),
            None => builder,
        }
    }

    fn target_url(&self, id: &str) -> String {
        format!("{}/targets/{}", self.base_url(), urlencoding::encode(id))
    }

    async fn send_target(&self, builder: RequestBuilder) -> Result<Response, TargetError> {
        let response = self.with_auth(builder).send().await.map_err(|e| {
            if e.is_timeout() {
                TargetError::Timeout
            } else if e.is_connect() {
                TargetError::ConnectionFailed(e.to_string())
            } else {
                TargetError::Driver(e.to_string())
            }
        })?;

        match response.status() {
            s if s.is_success() => Ok(response),
            StatusCode::NOT_FOUND => Err(TargetError::NotFound(response.url().path().to_string())),
            s => {
                let body = response.text().await.unwrap_or_default();
                Err(TargetError::Driver(format!(
                    "HTTP {}: {}",
                    s,
                    body.chars().take(200).collect::<String>()
                )))
            }
        }
    }

    /// Send a command to the agent inside `id` and unwrap its reply.
    ///
    /// `on_error` maps an agent-reported failure to the error kind that fits
    /// the command (a rejected submit is not the same as a failed fill).
    async fn command<T: DeserializeOwned>(
        &self,
        id: &str,
        command: &AgentCommand<'_>,
        on_error: fn(String) -> AgentError,
    ) -> Result<Option<T>, AgentError> {
        let url = format!("{}/agent/messages", self.target_url(id));
        let response = self
            .with_auth(self.client.post(&url).json(command))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AgentError::Timeout
                } else {
                    AgentError::Transport(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            return Err(AgentError::Transport(format!("HTTP {}", response.status())));
        }

        let reply: AgentReply<T> = response
            .json()
            .await
            .map_err(|e| AgentError::Transport(format!("Invalid agent reply: {}", e)))?;

        if reply.ok {
            Ok(reply.data)
        } else {
            Err(on_error(
                reply
                    .error
                    .unwrap_or_else(|| "agent reported failure".to_string()),
            ))
        }
    }

    async fn command_data<T: DeserializeOwned>(
        &self,
        id: &str,
        command: &AgentCommand<'_>,
        on_error: fn(String) -> AgentError,
    ) -> Result<T, AgentError> {
        self.command(id, command, on_error)
            .await?
            .ok_or_else(|| on_error("agent reply carried no data".to_string()))
    }
}

#[async_trait]
impl TargetDriver for BridgeClient {
    fn name(&self) -> &str {
        "bridge"
    }

    async fn open(&self, url: &str) -> Result<String, TargetError> {
        let endpoint = format!("{}/targets", self.base_url());
        let response = self
            .send_target(self.client.post(&endpoint).json(&OpenTargetRequest { url }))
            .await?;
        let opened: OpenTargetResponse = response
            .json()
            .await
            .map_err(|e| TargetError::Driver(format!("Invalid open response: {}", e)))?;
        Ok(opened.id)
    }

    async fn wait_for_load(&self, id: &str) -> Result<(), TargetError> {
        loop {
            let response = self.send_target(self.client.get(self.target_url(id))).await?;
            let info: TargetInfo = response
                .json()
                .await
                .map_err(|e| TargetError::Driver(format!("Invalid target state: {}", e)))?;
            if info.loaded {
                return Ok(());
            }
            tokio::time::sleep(LOAD_POLL_INTERVAL).await;
        }
    }

    async fn install_agent(&self, id: &str) -> Result<(), TargetError> {
        let url = format!("{}/agent", self.target_url(id));
        self.send_target(self.client.post(&url)).await?;
        Ok(())
    }

    async fn ping(&self, id: &str) -> Result<bool, TargetError> {
        match self
            .command::<String>(id, &AgentCommand::Ping, AgentError::Transport)
            .await
        {
            Ok(reply) => Ok(reply.as_deref() == Some("pong")),
            Err(e) => {
                debug!("Ping to target {} failed: {}", id, e);
                Ok(false)
            }
        }
    }

    async fn close(&self, id: &str) -> Result<(), TargetError> {
        self.send_target(self.client.delete(self.target_url(id)))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ListingAgent for BridgeClient {
    async fn scrape(&self, target: &TargetHandle) -> Result<SourceProduct, AgentError> {
        self.command_data(&target.id, &AgentCommand::Scrape, AgentError::Scrape)
            .await
    }

    async fn fill_basics(
        &self,
        target: &TargetHandle,
        basics: &ListingBasics,
    ) -> Result<(), AgentError> {
        self.command::<serde_json::Value>(
            &target.id,
            &AgentCommand::FillBasics { basics },
            AgentError::Fill,
        )
        .await?;
        Ok(())
    }

    async fn variation_rows(&self, target: &TargetHandle) -> Result<Vec<String>, AgentError> {
        Ok(self
            .command(&target.id, &AgentCommand::VariationRows, AgentError::Fill)
            .await?
            .unwrap_or_default())
    }

    async fn fill_variations(
        &self,
        target: &TargetHandle,
        plan: &VariationPlan,
    ) -> Result<FillReport, AgentError> {
        Ok(self
            .command(
                &target.id,
                &AgentCommand::FillVariations { plan },
                AgentError::Fill,
            )
            .await?
            .unwrap_or_default())
    }

    async fn fill_images(
        &self,
        target: &TargetHandle,
        images: &[String],
    ) -> Result<(), AgentError> {
        self.command::<serde_json::Value>(
            &target.id,
            &AgentCommand::FillImages { images },
            AgentError::Fill,
        )
        .await?;
        Ok(())
    }

    async fn submit(&self, target: &TargetHandle) -> Result<SubmitReceipt, AgentError> {
        self.command_data(&target.id, &AgentCommand::Submit, AgentError::Rejected)
            .await
    }

    async fn find_listing(
        &self,
        source_link: &str,
        title: &str,
    ) -> Result<Option<String>, AgentError> {
        let url = format!(
            "{}/listings?source={}&title={}",
            self.base_url(),
            urlencoding::encode(source_link),
            urlencoding::encode(title)
        );
        let response = self
            .with_auth(self.client.get(&url))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AgentError::Timeout
                } else {
                    AgentError::Transport(e.to_string())
                }
            })?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(AgentError::Transport(format!("HTTP {}", response.status())));
        }

        let lookup: ListingLookup = response
            .json()
            .await
            .map_err(|e| AgentError::Transport(format!("Invalid listing lookup: {}", e)))?;
        Ok(lookup.destination_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(url: &str) -> BridgeClient {
        BridgeClient::new(BridgeConfig {
            url: url.to_string(),
            api_key: Some("secret".to_string()),
            timeout_secs: 2,
        })
        .unwrap()
    }

    #[test]
    fn test_base_url_trims_trailing_slash() {
        let c = client("http://localhost:9222/");
        assert_eq!(c.base_url(), "http://localhost:9222");
        assert_eq!(c.target_url("t/1"), "http://localhost:9222/targets/t%2F1");
    }

    #[test]
    fn test_command_serialization() {
        let json = serde_json::to_value(AgentCommand::Ping).unwrap();
        assert_eq!(json, serde_json::json!({"type": "ping"}));

        let images = vec!["https://img.example/1.jpg".to_string()];
        let json = serde_json::to_value(AgentCommand::FillImages { images: &images }).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "fill_images", "images": ["https://img.example/1.jpg"]})
        );
    }

    #[test]
    fn test_reply_parsing() {
        let reply: AgentReply<SubmitReceipt> = serde_json::from_str(
            r#"{"ok": true, "data": {"destination_url": "https://dest.example/l/1"}}"#,
        )
        .unwrap();
        assert!(reply.ok);
        assert_eq!(
            reply.data.unwrap().destination_url,
            "https://dest.example/l/1"
        );

        let reply: AgentReply<SubmitReceipt> =
            serde_json::from_str(r#"{"ok": false, "error": "duplicate listing"}"#).unwrap();
        assert!(!reply.ok);
        assert_eq!(reply.error.as_deref(), Some("duplicate listing"));
    }

    #[tokio::test]
    async fn test_unreachable_bridge() {
        // Port 1 is reserved and nothing listens there
        let c = client("http://127.0.0.1:1");
        let err = TargetDriver::open(&c, "https://source.example/1")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TargetError::ConnectionFailed(_) | TargetError::Driver(_)
        ));

        let err = c.find_listing("https://source.example/1", "Tee").await.unwrap_err();
        assert!(matches!(err, AgentError::Transport(_)));
    }
}
