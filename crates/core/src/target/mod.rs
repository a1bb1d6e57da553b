//! Automation target lifecycle and the collaborator contracts it relies on.
//!
//! A *target* is a controlled browser tab or session. [`TargetManager`] opens
//! one, waits for it to load and installs the page-side agent;
//! [`ListingAgent`] is what the orchestrator talks to once it is ready.

mod bridge;
mod config;
mod error;
mod manager;
mod traits;
mod types;

pub use bridge::{AgentCommand, BridgeClient};
pub use config::{BridgeConfig, TargetConfig};
pub use error::{AgentError, TargetError};
pub use manager::TargetManager;
pub use traits::{ListingAgent, TargetDriver};
pub use types::{FillReport, ListingBasics, OpenOptions, SubmitReceipt, TargetHandle};
