//! HTTP and WebSocket surface of the relister service.

pub mod api;
pub mod metrics;
pub mod state;
