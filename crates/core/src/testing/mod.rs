//! Testing utilities and mock implementations for E2E tests.
//!
//! This module provides mock implementations of the target and agent traits
//! plus a recording job store, allowing full batch runs without a browser.
//!
//! # Example
//!
//! ```rust,ignore
//! use relister_core::testing::{MockListingAgent, MockTargetDriver, RecordingJobStore};
//!
//! let driver = Arc::new(MockTargetDriver::new());
//! let agent = Arc::new(MockListingAgent::new());
//! let store = Arc::new(RecordingJobStore::new()?);
//!
//! // Configure mock behavior
//! agent.fail_next(AgentOp::Submit, AgentError::Rejected("duplicate".into())).await;
//!
//! // Build a BulkOrchestrator from them...
//! ```

mod mock_listing_agent;
mod mock_target_driver;
mod recording_store;

pub use mock_listing_agent::{AgentOp, MockListingAgent, RecordedCall};
pub use mock_target_driver::MockTargetDriver;
pub use recording_store::RecordingJobStore;

/// Test fixtures and helper functions.
pub mod fixtures {
    use crate::job::BulkJobRequest;
    use crate::reconcile::{Sku, SourceProduct, VariantAxis};

    /// A tee with Color (Red, Blue) x Size (XS, L), every SKU reporting stock.
    pub fn tee_product() -> SourceProduct {
        let sku = |id: &str, color: &str, size: &str, price: f64, stock: i64| Sku {
            id: id.to_string(),
            values: vec![color.to_string(), size.to_string()],
            price,
            stock: Some(stock),
        };

        SourceProduct {
            title: "Basic Cotton Tee".to_string(),
            base_price: 6.5,
            currency: "USD".to_string(),
            images: vec![
                "https://img.source.example/tee-1.jpg".to_string(),
                "https://img.source.example/tee-2.jpg".to_string(),
            ],
            axes: vec![
                VariantAxis::new("Color", &["Red", "Blue"]),
                VariantAxis::new("Size", &["XS", "L"]),
            ],
            skus: vec![
                sku("sku-1", "Red", "XS", 6.5, 5),
                sku("sku-2", "Red", "L", 7.2, 0),
                sku("sku-3", "Blue", "XS", 6.5, 12),
                sku("sku-4", "Blue", "L", 7.2, 3),
            ],
        }
    }

    /// Destination variation rows matching [`tee_product`].
    pub fn tee_rows() -> Vec<String> {
        ["Red / XS", "Red / L", "Blue / XS", "Blue / L"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    /// A product without variants.
    pub fn plain_product(title: &str, price: f64) -> SourceProduct {
        SourceProduct {
            title: title.to_string(),
            base_price: price,
            currency: "USD".to_string(),
            images: vec![],
            axes: vec![],
            skus: vec![],
        }
    }

    /// A valid request over `links` with concurrency 1, 30% markup and stock cap 5.
    pub fn request(links: &[&str]) -> BulkJobRequest {
        BulkJobRequest {
            links: links.iter().map(|l| l.to_string()).collect(),
            concurrency: 1,
            markup_pct: 30.0,
            stock_cap: 5,
            min_price: None,
            max_price: None,
            marketplace: "us".to_string(),
            listing_type: "fixed_price".to_string(),
        }
    }

    /// `count` distinct source links.
    pub fn links(count: usize) -> Vec<String> {
        (1..=count)
            .map(|i| format!("https://source.example/item/{}", i))
            .collect()
    }
}
