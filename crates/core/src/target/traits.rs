//! Collaborator contracts: the target primitive and the page-side agent.

use async_trait::async_trait;

use crate::reconcile::{SourceProduct, VariationPlan};

use super::{AgentError, FillReport, ListingBasics, SubmitReceipt, TargetError, TargetHandle};

/// Low-level control of automation targets (browser tabs or sessions).
#[async_trait]
pub trait TargetDriver: Send + Sync {
    /// Backend name for logging.
    fn name(&self) -> &str;

    /// Open a target on `url` and return its id. Does not wait for load.
    async fn open(&self, url: &str) -> Result<String, TargetError>;

    /// Resolve once the target signals load complete.
    async fn wait_for_load(&self, id: &str) -> Result<(), TargetError>;

    /// Inject the page-side agent. Safe to call repeatedly.
    async fn install_agent(&self, id: &str) -> Result<(), TargetError>;

    /// Liveness check of the installed agent.
    async fn ping(&self, id: &str) -> Result<bool, TargetError>;

    async fn close(&self, id: &str) -> Result<(), TargetError>;
}

/// Page-side capability that reads source pages and drives the destination form.
///
/// The orchestrator never locates or clicks fields itself; every page
/// interaction goes through this trait.
#[async_trait]
pub trait ListingAgent: Send + Sync {
    async fn scrape(&self, target: &TargetHandle) -> Result<SourceProduct, AgentError>;

    async fn fill_basics(
        &self,
        target: &TargetHandle,
        basics: &ListingBasics,
    ) -> Result<(), AgentError>;

    /// Labels of the variation rows the destination form offers.
    async fn variation_rows(&self, target: &TargetHandle) -> Result<Vec<String>, AgentError>;

    async fn fill_variations(
        &self,
        target: &TargetHandle,
        plan: &VariationPlan,
    ) -> Result<FillReport, AgentError>;

    async fn fill_images(&self, target: &TargetHandle, images: &[String])
        -> Result<(), AgentError>;

    async fn submit(&self, target: &TargetHandle) -> Result<SubmitReceipt, AgentError>;

    /// Look up an existing destination listing created from `source_link`.
    async fn find_listing(
        &self,
        source_link: &str,
        title: &str,
    ) -> Result<Option<String>, AgentError>;
}
