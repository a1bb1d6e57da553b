//! Target and agent error types.

use thiserror::Error;

/// Errors from the automation target primitive.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TargetError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Target {id} did not finish loading within {timeout_ms}ms")]
    LoadTimeout { id: String, timeout_ms: u64 },

    #[error("Agent handshake with target {id} timed out: {reason}")]
    HandshakeTimeout { id: String, reason: String },

    #[error("Target not found: {0}")]
    NotFound(String),

    #[error("Driver error: {0}")]
    Driver(String),

    #[error("Request timeout")]
    Timeout,
}

/// Errors reported by the page-side agent.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AgentError {
    /// The agent could not be reached; the target may be gone.
    #[error("Agent unreachable: {0}")]
    Transport(String),

    /// The source page did not yield a usable product.
    #[error("Scrape failed: {0}")]
    Scrape(String),

    /// A form section could not be filled.
    #[error("Fill failed: {0}")]
    Fill(String),

    /// The destination refused the listing.
    #[error("Listing rejected: {0}")]
    Rejected(String),

    #[error("Request timeout")]
    Timeout,
}
