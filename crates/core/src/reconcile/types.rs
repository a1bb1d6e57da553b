//! Source product and reconciled variant types.

use serde::{Deserialize, Serialize};

/// A product as scraped from the source marketplace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceProduct {
    /// Product title.
    pub title: String,
    /// Headline price shown on the source page.
    pub base_price: f64,
    /// ISO 4217 currency code.
    pub currency: String,
    /// Image URLs, in display order.
    #[serde(default)]
    pub images: Vec<String>,
    /// Variant dimensions (e.g. Color, Size).
    #[serde(default)]
    pub axes: Vec<VariantAxis>,
    /// Purchasable variant combinations.
    #[serde(default)]
    pub skus: Vec<Sku>,
}

impl SourceProduct {
    /// Lowest SKU price, or the base price for a product without SKUs.
    pub fn effective_price(&self) -> f64 {
        self.skus
            .iter()
            .map(|s| s.price)
            .fold(None, |acc: Option<f64>, p| Some(acc.map_or(p, |a| a.min(p))))
            .unwrap_or(self.base_price)
    }
}

/// A named variant dimension with its value options.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VariantAxis {
    pub name: String,
    #[serde(default)]
    pub options: Vec<ValueOption>,
}

impl VariantAxis {
    pub fn new(name: impl Into<String>, labels: &[&str]) -> Self {
        Self {
            name: name.into(),
            options: labels.iter().map(|l| ValueOption::new(*l)).collect(),
        }
    }
}

/// One selectable value of an axis.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValueOption {
    pub label: String,
    /// Swatch image, when the source page shows one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl ValueOption {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            image: None,
        }
    }
}

/// A single purchasable source variant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Sku {
    /// Source-side identifier.
    pub id: String,
    /// One value per axis, in axis order.
    pub values: Vec<String>,
    /// Source price for this combination.
    pub price: f64,
    /// Reported stock. `None` means the page gave no usable reading.
    #[serde(default)]
    pub stock: Option<i64>,
}

/// How confidently a SKU's values were resolved against the axis options.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum MatchConfidence {
    Unmatched,
    Fuzzy,
    Exact,
}

/// Which stock rule was applied to a product.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum StockPolicy {
    /// At least one SKU reported stock; every SKU's count is trusted.
    Reported,
    /// No SKU reported stock; every SKU gets the same quantity.
    Uniform { quantity: u32 },
}

/// A SKU mapped onto destination price and quantity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconciledVariant {
    /// Identifier of the source SKU.
    pub sku_id: String,
    /// Resolved option labels, one per axis.
    pub values: Vec<String>,
    /// Display label, values joined with " / ".
    pub label: String,
    pub price: f64,
    pub quantity: u32,
    pub confidence: MatchConfidence,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Non-fatal issue found while reconciling.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReconcileWarning {
    /// Some values of an axis matched no option.
    UnmatchedValues { axis: String, values: Vec<String> },
    /// A SKU's value count differs from the axis count.
    ShapeMismatch { sku_id: String, expected: usize, actual: usize },
    /// A SKU has no stock reading while others do; it was given zero.
    MissingStock { sku_id: String },
}

impl std::fmt::Display for ReconcileWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReconcileWarning::UnmatchedValues { axis, values } => {
                write!(f, "unmatched {} values: {}", axis, values.join(", "))
            }
            ReconcileWarning::ShapeMismatch {
                sku_id,
                expected,
                actual,
            } => write!(
                f,
                "sku {} has {} values, expected {}",
                sku_id, actual, expected
            ),
            ReconcileWarning::MissingStock { sku_id } => {
                write!(f, "sku {} has no stock reading, listed as 0", sku_id)
            }
        }
    }
}

/// Output of reconciling one product.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Reconciliation {
    /// One entry per source SKU, in source order.
    pub variants: Vec<ReconciledVariant>,
    /// Destination price for the listing headline.
    pub base_price: f64,
    /// Quantity for a product without variants.
    pub base_quantity: u32,
    pub stock_policy: StockPolicy,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<ReconcileWarning>,
}

impl Reconciliation {
    /// Warnings flattened to display strings.
    pub fn warning_messages(&self) -> Vec<String> {
        self.warnings.iter().map(ToString::to_string).collect()
    }
}

/// Destination variation row matched (or not) to a reconciled variant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RowAssignment {
    pub row_index: usize,
    pub row_label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sku_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    pub quantity: u32,
}

impl RowAssignment {
    pub fn is_matched(&self) -> bool {
        self.sku_id.is_some()
    }
}

/// Everything the agent needs to fill the variations section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VariationPlan {
    pub variants: Vec<ReconciledVariant>,
    pub rows: Vec<RowAssignment>,
}

/// Parameters of a reconciliation run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconcileOptions {
    /// Markup percentage applied to every SKU price.
    pub markup_pct: f64,
    /// Upper bound for any destination quantity.
    pub stock_cap: u32,
    /// Quantity used when no SKU reports stock.
    pub default_quantity: u32,
}
