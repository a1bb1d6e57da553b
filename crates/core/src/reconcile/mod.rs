//! Variant reconciliation: maps scraped SKUs onto destination price and
//! quantity, and destination variation rows onto those variants.

mod engine;
mod matcher;
mod pricing;
mod stock;
mod types;

pub use engine::{ReconcileError, ReconciliationEngine};
pub use matcher::{match_tokens, match_value, normalize, split_variant_label, ValueMatch};
pub use pricing::{destination_price, round2};
pub use stock::{destination_quantity, stock_policy};
pub use types::{
    MatchConfidence, ReconcileOptions, ReconcileWarning, ReconciledVariant, Reconciliation,
    RowAssignment, Sku, SourceProduct, StockPolicy, ValueOption, VariantAxis, VariationPlan,
};
