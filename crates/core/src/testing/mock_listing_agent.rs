//! Mock listing agent for testing.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::reconcile::{SourceProduct, VariationPlan};
use crate::target::{AgentError, FillReport, ListingAgent, ListingBasics, SubmitReceipt, TargetHandle};

use super::fixtures;

/// Agent operations, for error injection and call assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentOp {
    Scrape,
    FillBasics,
    VariationRows,
    FillVariations,
    FillImages,
    Submit,
    FindListing,
}

/// A recorded agent call for test assertions.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub op: AgentOp,
    /// Target id, or the source link for `FindListing`.
    pub subject: String,
}

#[derive(Debug)]
struct AgentState {
    default_product: SourceProduct,
    products: HashMap<String, SourceProduct>,
    rows: Vec<String>,
    errors: HashMap<AgentOp, VecDeque<AgentError>>,
    delays: HashMap<AgentOp, Duration>,
    /// Destination listings by source link.
    listings: HashMap<String, String>,
    basics: HashMap<String, ListingBasics>,
    plans: Vec<VariationPlan>,
    calls: Vec<RecordedCall>,
    submitted: u32,
}

/// Mock implementation of the ListingAgent trait.
///
/// Scrapes return the product registered for the target URL, or the default
/// tee fixture. Submissions register a destination listing under the source
/// link of the basics filled on that target, so `find_listing` sees them.
///
/// # Example
///
/// ```rust,ignore
/// let agent = Arc::new(MockListingAgent::new());
/// agent.fail_next(AgentOp::Scrape, AgentError::Scrape("captcha".into())).await;
///
/// // ... run a batch ...
///
/// assert_eq!(agent.call_count(AgentOp::Scrape).await, 2);
/// ```
#[derive(Debug)]
pub struct MockListingAgent {
    state: Arc<RwLock<AgentState>>,
}

impl Default for MockListingAgent {
    fn default() -> Self {
        Self::new()
    }
}

impl MockListingAgent {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(AgentState {
                default_product: fixtures::tee_product(),
                products: HashMap::new(),
                rows: fixtures::tee_rows(),
                errors: HashMap::new(),
                delays: HashMap::new(),
                listings: HashMap::new(),
                basics: HashMap::new(),
                plans: Vec::new(),
                calls: Vec::new(),
                submitted: 0,
            })),
        }
    }

    /// Product returned for targets on any link without its own product.
    pub async fn set_default_product(&self, product: SourceProduct) {
        self.state.write().await.default_product = product;
    }

    /// Product returned for targets opened on `link`.
    pub async fn set_product(&self, link: &str, product: SourceProduct) {
        self.state
            .write()
            .await
            .products
            .insert(link.to_string(), product);
    }

    /// Variation row labels the destination form offers.
    pub async fn set_rows(&self, rows: Vec<String>) {
        self.state.write().await.rows = rows;
    }

    /// Queue an error for the next call of `op`. Errors queue up per operation.
    pub async fn fail_next(&self, op: AgentOp, error: AgentError) {
        self.state
            .write()
            .await
            .errors
            .entry(op)
            .or_default()
            .push_back(error);
    }

    /// Make every call of `op` take this long.
    pub async fn set_delay(&self, op: AgentOp, delay: Duration) {
        self.state.write().await.delays.insert(op, delay);
    }

    /// Pretend a listing for `source_link` already exists at `url`.
    pub async fn add_listing(&self, source_link: &str, url: &str) {
        self.state
            .write()
            .await
            .listings
            .insert(source_link.to_string(), url.to_string());
    }

    pub async fn calls(&self) -> Vec<RecordedCall> {
        self.state.read().await.calls.clone()
    }

    pub async fn call_count(&self, op: AgentOp) -> usize {
        self.state
            .read()
            .await
            .calls
            .iter()
            .filter(|c| c.op == op)
            .count()
    }

    /// Variation plans passed to `fill_variations`, in call order.
    pub async fn variation_plans(&self) -> Vec<VariationPlan> {
        self.state.read().await.plans.clone()
    }

    /// Basics filled, by target id.
    pub async fn filled_basics(&self) -> HashMap<String, ListingBasics> {
        self.state.read().await.basics.clone()
    }

    pub async fn submit_count(&self) -> u32 {
        self.state.read().await.submitted
    }

    /// Record the call, apply the configured delay and take any queued error.
    async fn enter(&self, op: AgentOp, subject: &str) -> Result<(), AgentError> {
        let delay = {
            let mut state = self.state.write().await;
            state.calls.push(RecordedCall {
                op,
                subject: subject.to_string(),
            });
            state.delays.get(&op).copied()
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.write().await;
        match state.errors.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ListingAgent for MockListingAgent {
    async fn scrape(&self, target: &TargetHandle) -> Result<SourceProduct, AgentError> {
        self.enter(AgentOp::Scrape, &target.id).await?;
        let state = self.state.read().await;
        Ok(state
            .products
            .get(&target.url)
            .unwrap_or(&state.default_product)
            .clone())
    }

    async fn fill_basics(
        &self,
        target: &TargetHandle,
        basics: &ListingBasics,
    ) -> Result<(), AgentError> {
        self.enter(AgentOp::FillBasics, &target.id).await?;
        self.state
            .write()
            .await
            .basics
            .insert(target.id.clone(), basics.clone());
        Ok(())
    }

    async fn variation_rows(&self, target: &TargetHandle) -> Result<Vec<String>, AgentError> {
        self.enter(AgentOp::VariationRows, &target.id).await?;
        Ok(self.state.read().await.rows.clone())
    }

    async fn fill_variations(
        &self,
        target: &TargetHandle,
        plan: &VariationPlan,
    ) -> Result<FillReport, AgentError> {
        self.enter(AgentOp::FillVariations, &target.id).await?;
        self.state.write().await.plans.push(plan.clone());
        Ok(FillReport {
            filled_count: plan.rows.iter().filter(|r| r.is_matched()).count(),
            warnings: Vec::new(),
        })
    }

    async fn fill_images(
        &self,
        target: &TargetHandle,
        _images: &[String],
    ) -> Result<(), AgentError> {
        self.enter(AgentOp::FillImages, &target.id).await
    }

    async fn submit(&self, target: &TargetHandle) -> Result<SubmitReceipt, AgentError> {
        self.enter(AgentOp::Submit, &target.id).await?;
        let mut state = self.state.write().await;
        let source_link = state
            .basics
            .get(&target.id)
            .map(|b| b.source_link.clone())
            .ok_or_else(|| AgentError::Rejected("form has no basics".to_string()))?;

        state.submitted += 1;
        let url = format!("https://dest.example/listings/{}", state.submitted);
        state.listings.insert(source_link, url.clone());
        Ok(SubmitReceipt {
            destination_url: url,
        })
    }

    async fn find_listing(
        &self,
        source_link: &str,
        _title: &str,
    ) -> Result<Option<String>, AgentError> {
        self.enter(AgentOp::FindListing, source_link).await?;
        Ok(self.state.read().await.listings.get(source_link).cloned())
    }
}
