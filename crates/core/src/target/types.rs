//! Target handles and agent payloads.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// An open automation target.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TargetHandle {
    pub id: String,
    pub url: String,
    /// False when the target was returned after a load timeout.
    pub loaded: bool,
}

/// How long to wait for a target to load, and what to do if it doesn't.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenOptions {
    pub timeout: Duration,
    /// Return the target anyway (with `loaded = false`) on timeout.
    pub resolve_on_timeout: bool,
}

impl OpenOptions {
    pub fn new(timeout: Duration, resolve_on_timeout: bool) -> Self {
        Self {
            timeout,
            resolve_on_timeout,
        }
    }
}

/// Listing-level fields of the destination form.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ListingBasics {
    pub title: String,
    pub price: f64,
    pub quantity: u32,
    pub currency: String,
    pub marketplace: String,
    pub listing_type: String,
    pub source_link: String,
}

/// Agent acknowledgement of a variations fill.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct FillReport {
    pub filled_count: usize,
    #[serde(default)]
    pub warnings: Vec<String>,
}

/// Result of a successful submission.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubmitReceipt {
    pub destination_url: String,
}
