//! Destination quantity policy.
//!
//! If any SKU carries a stock reading the whole product is treated as
//! reported: zero-or-less becomes 0, everything else is capped. Only when no
//! SKU reports anything do all SKUs share one default quantity.

use super::types::{Sku, StockPolicy};

/// Decide which stock rule applies to a SKU set.
pub fn stock_policy(skus: &[Sku], cap: u32, default_quantity: u32) -> StockPolicy {
    if skus.iter().any(|s| s.stock.is_some()) {
        StockPolicy::Reported
    } else {
        StockPolicy::Uniform {
            quantity: default_quantity.min(cap),
        }
    }
}

/// Destination quantity for one SKU under a policy.
pub fn destination_quantity(stock: Option<i64>, policy: StockPolicy, cap: u32) -> u32 {
    match policy {
        StockPolicy::Uniform { quantity } => quantity,
        StockPolicy::Reported => match stock {
            Some(n) if n > 0 => u32::try_from(n).unwrap_or(u32::MAX).min(cap),
            _ => 0,
        },
    }
}
