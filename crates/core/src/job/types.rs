//! Batch, job and checkpoint data types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::reconcile::{ReconcileOptions, Reconciliation, SourceProduct};

// ============================================================================
// Stages and status
// ============================================================================

/// Position of a job in the listing pipeline.
///
/// Stages run strictly in declaration order. Everything up to `FillingImages`
/// can be repeated safely; `Submitting` is the only irreversible step.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Queued,
    Scraping,
    Reconciling,
    TargetOpening,
    FillingBasics,
    FillingVariations,
    FillingImages,
    Submitting,
    Complete,
}

impl Stage {
    /// Every stage, in pipeline order.
    pub const ALL: [Stage; 9] = [
        Stage::Queued,
        Stage::Scraping,
        Stage::Reconciling,
        Stage::TargetOpening,
        Stage::FillingBasics,
        Stage::FillingVariations,
        Stage::FillingImages,
        Stage::Submitting,
        Stage::Complete,
    ];

    /// The stage that follows this one, or `None` for `Complete`.
    pub fn next(self) -> Option<Stage> {
        let pos = Self::ALL.iter().position(|s| *s == self)?;
        Self::ALL.get(pos + 1).copied()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Queued => "queued",
            Stage::Scraping => "scraping",
            Stage::Reconciling => "reconciling",
            Stage::TargetOpening => "target_opening",
            Stage::FillingBasics => "filling_basics",
            Stage::FillingVariations => "filling_variations",
            Stage::FillingImages => "filling_images",
            Stage::Submitting => "submitting",
            Stage::Complete => "complete",
        }
    }

    pub fn parse(s: &str) -> Option<Stage> {
        Self::ALL.iter().copied().find(|stage| stage.as_str() == s)
    }

    /// Whether this stage works on the destination form.
    pub fn needs_form(self) -> bool {
        matches!(
            self,
            Stage::TargetOpening
                | Stage::FillingBasics
                | Stage::FillingVariations
                | Stage::FillingImages
                | Stage::Submitting
        )
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a job, tracked alongside its stage.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Paused,
    Success,
    Failed,
    Terminated,
}

impl JobStatus {
    /// Returns true if no further work will happen for the job.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Success | JobStatus::Failed | JobStatus::Terminated
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Paused => "paused",
            JobStatus::Success => "success",
            JobStatus::Failed => "failed",
            JobStatus::Terminated => "terminated",
        }
    }

    pub fn parse(s: &str) -> Option<JobStatus> {
        [
            JobStatus::Queued,
            JobStatus::Running,
            JobStatus::Paused,
            JobStatus::Success,
            JobStatus::Failed,
            JobStatus::Terminated,
        ]
        .into_iter()
        .find(|status| status.as_str() == s)
    }
}

// ============================================================================
// Batch request
// ============================================================================

/// A bulk listing submission. Immutable once accepted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BulkJobRequest {
    /// Source product links, in submission order.
    pub links: Vec<String>,
    /// Maximum number of jobs running at once.
    pub concurrency: usize,
    /// Markup percentage applied to every SKU price.
    pub markup_pct: f64,
    /// Upper bound for destination quantities.
    pub stock_cap: u32,
    /// Skip products cheaper than this.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_price: Option<f64>,
    /// Skip products pricier than this.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_price: Option<f64>,
    /// Destination marketplace selector.
    pub marketplace: String,
    /// Destination listing type selector.
    pub listing_type: String,
}

/// Reasons a batch submission is rejected.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RequestError {
    #[error("at least one link is required")]
    NoLinks,
    #[error("invalid link '{0}': expected an absolute http(s) URL")]
    InvalidLink(String),
    #[error("concurrency must be at least 1")]
    ZeroConcurrency,
    #[error("markup must be a finite, non-negative percentage")]
    InvalidMarkup,
    #[error("stock cap must be at least 1")]
    ZeroStockCap,
    #[error("{0} must be a finite number")]
    InvalidPriceBound(&'static str),
    #[error("min_price {min} is greater than max_price {max}")]
    InvalidPriceRange { min: f64, max: f64 },
    #[error("{0} must not be empty")]
    MissingSelector(&'static str),
}

impl BulkJobRequest {
    /// Check the request before anything is persisted.
    pub fn validate(&self) -> Result<(), RequestError> {
        if self.links.is_empty() {
            return Err(RequestError::NoLinks);
        }
        for link in &self.links {
            let ok = reqwest::Url::parse(link)
                .map(|url| matches!(url.scheme(), "http" | "https") && url.has_host())
                .unwrap_or(false);
            if !ok {
                return Err(RequestError::InvalidLink(link.clone()));
            }
        }
        if self.concurrency == 0 {
            return Err(RequestError::ZeroConcurrency);
        }
        if !self.markup_pct.is_finite() || self.markup_pct < 0.0 {
            return Err(RequestError::InvalidMarkup);
        }
        if self.stock_cap == 0 {
            return Err(RequestError::ZeroStockCap);
        }
        if self.min_price.is_some_and(|min| !min.is_finite()) {
            return Err(RequestError::InvalidPriceBound("min_price"));
        }
        if self.max_price.is_some_and(|max| !max.is_finite()) {
            return Err(RequestError::InvalidPriceBound("max_price"));
        }
        if let (Some(min), Some(max)) = (self.min_price, self.max_price) {
            if min > max {
                return Err(RequestError::InvalidPriceRange { min, max });
            }
        }
        if self.marketplace.trim().is_empty() {
            return Err(RequestError::MissingSelector("marketplace"));
        }
        if self.listing_type.trim().is_empty() {
            return Err(RequestError::MissingSelector("listing_type"));
        }
        Ok(())
    }

    /// Whether a source price passes the optional min/max filter.
    pub fn price_allowed(&self, price: f64) -> bool {
        self.min_price.map_or(true, |min| price >= min)
            && self.max_price.map_or(true, |max| price <= max)
    }

    /// Reconciliation parameters for jobs of this batch.
    pub fn reconcile_options(&self, default_quantity: u32) -> ReconcileOptions {
        ReconcileOptions {
            markup_pct: self.markup_pct,
            stock_cap: self.stock_cap,
            default_quantity,
        }
    }
}

/// Persisted form of one accepted submission.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Batch {
    pub id: String,
    pub request: BulkJobRequest,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Job records
// ============================================================================

/// Structured failure, reported against the stage it happened in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobError {
    pub stage: Stage,
    pub message: String,
}

/// Outcome details of a finished job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct JobSummary {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_url: Option<String>,
    pub variant_count: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// One link of a batch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobRecord {
    pub id: String,
    pub batch_id: String,
    /// Position in the submission.
    pub index: usize,
    pub link: String,
    pub status: JobStatus,
    /// Furthest stage reached.
    pub stage: Stage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<JobSummary>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// Checkpoints
// ============================================================================

/// Data carried between stages and persisted with every checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct StageData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product: Option<SourceProduct>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reconciliation: Option<Reconciliation>,
    /// Set before the submit call is made.
    #[serde(default)]
    pub submit_attempted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_url: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fill_warnings: Vec<String>,
}

/// Durable resume point of a job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Checkpoint {
    pub job_id: String,
    pub link: String,
    /// Stage to run (or re-run) on resume.
    pub stage: Stage,
    /// Attempts already spent on `stage`.
    pub attempt: u32,
    pub stage_data: StageData,
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Fresh checkpoint for a job that has not started.
    pub fn initial(job_id: impl Into<String>, link: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            link: link.into(),
            stage: Stage::Queued,
            attempt: 0,
            stage_data: StageData::default(),
            updated_at: Utc::now(),
        }
    }

    /// Move to a new stage, resetting the attempt counter.
    pub fn advance(&mut self, stage: Stage) {
        self.stage = stage;
        self.attempt = 0;
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> BulkJobRequest {
        BulkJobRequest {
            links: vec!["https://source.example/item/1".to_string()],
            concurrency: 2,
            markup_pct: 30.0,
            stock_cap: 5,
            min_price: None,
            max_price: None,
            marketplace: "us".to_string(),
            listing_type: "fixed".to_string(),
        }
    }

    #[test]
    fn test_stage_order() {
        assert_eq!(Stage::Queued.next(), Some(Stage::Scraping));
        assert_eq!(Stage::FillingImages.next(), Some(Stage::Submitting));
        assert_eq!(Stage::Submitting.next(), Some(Stage::Complete));
        assert_eq!(Stage::Complete.next(), None);
        assert!(Stage::Scraping < Stage::Submitting);
    }

    #[test]
    fn test_stage_str_round_trip() {
        for stage in Stage::ALL {
            assert_eq!(Stage::parse(stage.as_str()), Some(stage));
            let json = serde_json::to_string(&stage).unwrap();
            assert_eq!(json, format!("\"{}\"", stage.as_str()));
        }
        assert_eq!(Stage::parse("bogus"), None);
    }

    #[test]
    fn test_needs_form() {
        assert!(!Stage::Scraping.needs_form());
        assert!(!Stage::Reconciling.needs_form());
        assert!(Stage::FillingVariations.needs_form());
        assert!(Stage::Submitting.needs_form());
    }

    #[test]
    fn test_status_terminal() {
        assert!(JobStatus::Success.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Terminated.is_terminal());
        assert!(!JobStatus::Paused.is_terminal());
        assert!(!JobStatus::Queued.is_terminal());
        assert_eq!(JobStatus::parse("paused"), Some(JobStatus::Paused));
    }

    #[test]
    fn test_valid_request() {
        assert!(request().validate().is_ok());
    }

    #[test]
    fn test_request_rejections() {
        let mut r = request();
        r.links.clear();
        assert_eq!(r.validate(), Err(RequestError::NoLinks));

        let mut r = request();
        r.links.push("not a url".to_string());
        assert_eq!(
            r.validate(),
            Err(RequestError::InvalidLink("not a url".to_string()))
        );

        let mut r = request();
        r.links = vec!["ftp://source.example/x".to_string()];
        assert!(matches!(r.validate(), Err(RequestError::InvalidLink(_))));

        let mut r = request();
        r.concurrency = 0;
        assert_eq!(r.validate(), Err(RequestError::ZeroConcurrency));

        let mut r = request();
        r.markup_pct = -1.0;
        assert_eq!(r.validate(), Err(RequestError::InvalidMarkup));

        let mut r = request();
        r.markup_pct = f64::NAN;
        assert_eq!(r.validate(), Err(RequestError::InvalidMarkup));

        let mut r = request();
        r.stock_cap = 0;
        assert_eq!(r.validate(), Err(RequestError::ZeroStockCap));

        let mut r = request();
        r.min_price = Some(f64::NAN);
        assert_eq!(
            r.validate(),
            Err(RequestError::InvalidPriceBound("min_price"))
        );

        let mut r = request();
        r.max_price = Some(f64::INFINITY);
        assert_eq!(
            r.validate(),
            Err(RequestError::InvalidPriceBound("max_price"))
        );

        let mut r = request();
        r.min_price = Some(10.0);
        r.max_price = Some(5.0);
        assert!(matches!(
            r.validate(),
            Err(RequestError::InvalidPriceRange { .. })
        ));

        let mut r = request();
        r.marketplace = " ".to_string();
        assert_eq!(r.validate(), Err(RequestError::MissingSelector("marketplace")));
    }

    #[test]
    fn test_price_filter() {
        let mut r = request();
        assert!(r.price_allowed(0.01));
        r.min_price = Some(5.0);
        r.max_price = Some(20.0);
        assert!(!r.price_allowed(4.99));
        assert!(r.price_allowed(5.0));
        assert!(r.price_allowed(20.0));
        assert!(!r.price_allowed(20.01));
    }

    #[test]
    fn test_request_defaults_from_json() {
        let json = r#"{
            "links": ["https://source.example/item/1"],
            "concurrency": 1,
            "markup_pct": 10,
            "stock_cap": 3,
            "marketplace": "us",
            "listing_type": "fixed"
        }"#;
        let r: BulkJobRequest = serde_json::from_str(json).unwrap();
        assert_eq!(r.min_price, None);
        assert_eq!(r.markup_pct, 10.0);
    }

    #[test]
    fn test_checkpoint_advance_resets_attempt() {
        let mut cp = Checkpoint::initial("job-1", "https://source.example/item/1");
        cp.attempt = 2;
        cp.advance(Stage::Scraping);
        assert_eq!(cp.stage, Stage::Scraping);
        assert_eq!(cp.attempt, 0);
    }
}
