//! Reconciliation engine: source product in, destination variants out.

use std::collections::{HashMap, HashSet};

use thiserror::Error;
use tracing::debug;

use super::matcher::{match_tokens, match_value, split_variant_label, ValueMatch};
use super::pricing::destination_price;
use super::stock::{destination_quantity, stock_policy};
use super::types::{
    MatchConfidence, ReconcileOptions, ReconcileWarning, ReconciledVariant, Reconciliation,
    RowAssignment, SourceProduct, StockPolicy,
};

/// Errors that abort reconciliation.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ReconcileError {
    /// Every value used by the SKUs for this axis failed to match an option.
    #[error("no value of axis '{axis}' matched its options ({})", values.join(", "))]
    AxisUnmatched { axis: String, values: Vec<String> },
}

/// Converts scraped products into destination-ready variants.
#[derive(Debug, Clone)]
pub struct ReconciliationEngine {
    options: ReconcileOptions,
}

impl ReconciliationEngine {
    pub fn new(options: ReconcileOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ReconcileOptions {
        &self.options
    }

    /// Reconcile a product. Output variants are 1:1 with the product's SKUs.
    pub fn reconcile(&self, product: &SourceProduct) -> Result<Reconciliation, ReconcileError> {
        let cap = self.options.stock_cap;
        let policy = stock_policy(&product.skus, cap, self.options.default_quantity);
        let mut warnings = Vec::new();

        let resolved = self.resolve_axes(product, &mut warnings)?;

        let mut variants = Vec::with_capacity(product.skus.len());
        for sku in &product.skus {
            let mut variant_warnings = Vec::new();

            if !product.axes.is_empty() && sku.values.len() != product.axes.len() {
                warnings.push(ReconcileWarning::ShapeMismatch {
                    sku_id: sku.id.clone(),
                    expected: product.axes.len(),
                    actual: sku.values.len(),
                });
            }

            let mut values = Vec::with_capacity(sku.values.len());
            let mut confidence = MatchConfidence::Exact;
            for (axis_idx, value) in sku.values.iter().enumerate() {
                let axis = product.axes.get(axis_idx);
                match (axis, resolved.get(&(axis_idx, value.clone()))) {
                    (Some(axis), Some(Some(found))) => {
                        values.push(axis.options[found.index].label.clone());
                        confidence = confidence.min(found.confidence);
                    }
                    (Some(axis), Some(None)) => {
                        variant_warnings
                            .push(format!("'{}' matched no {} option", value, axis.name));
                        values.push(value.clone());
                        confidence = MatchConfidence::Unmatched;
                    }
                    _ => values.push(value.clone()),
                }
            }

            if policy == StockPolicy::Reported && sku.stock.is_none() {
                warnings.push(ReconcileWarning::MissingStock {
                    sku_id: sku.id.clone(),
                });
            }

            variants.push(ReconciledVariant {
                sku_id: sku.id.clone(),
                label: values.join(" / "),
                values,
                price: destination_price(sku.price, self.options.markup_pct),
                quantity: destination_quantity(sku.stock, policy, cap),
                confidence,
                warnings: variant_warnings,
            });
        }

        let base_quantity = if variants.is_empty() {
            match policy {
                StockPolicy::Uniform { quantity } => quantity,
                StockPolicy::Reported => 0,
            }
        } else {
            variants.iter().map(|v| v.quantity).sum()
        };

        debug!(
            "Reconciled '{}': {} variants, {} warnings",
            product.title,
            variants.len(),
            warnings.len()
        );

        Ok(Reconciliation {
            variants,
            base_price: destination_price(product.base_price, self.options.markup_pct),
            base_quantity,
            stock_policy: policy,
            warnings,
        })
    }

    /// Match every distinct SKU value against its axis options.
    ///
    /// Keys are `(axis index, raw value)`. Axes without options are skipped and
    /// their values pass through untouched.
    fn resolve_axes(
        &self,
        product: &SourceProduct,
        warnings: &mut Vec<ReconcileWarning>,
    ) -> Result<HashMap<(usize, String), Option<ValueMatch>>, ReconcileError> {
        let mut resolved = HashMap::new();

        for (axis_idx, axis) in product.axes.iter().enumerate() {
            if axis.options.is_empty() {
                continue;
            }
            let labels: Vec<&str> = axis.options.iter().map(|o| o.label.as_str()).collect();

            let mut seen = HashSet::new();
            let mut distinct = Vec::new();
            for sku in &product.skus {
                if let Some(value) = sku.values.get(axis_idx) {
                    if seen.insert(value.clone()) {
                        distinct.push(value.clone());
                    }
                }
            }

            let mut unmatched = Vec::new();
            for value in &distinct {
                let found = match_value(value, &labels);
                if found.is_none() {
                    unmatched.push(value.clone());
                }
                resolved.insert((axis_idx, value.clone()), found);
            }

            if !distinct.is_empty() && unmatched.len() == distinct.len() {
                return Err(ReconcileError::AxisUnmatched {
                    axis: axis.name.clone(),
                    values: unmatched,
                });
            }
            if !unmatched.is_empty() {
                warnings.push(ReconcileWarning::UnmatchedValues {
                    axis: axis.name.clone(),
                    values: unmatched,
                });
            }
        }

        Ok(resolved)
    }

    /// Assign destination variation rows to reconciled variants.
    ///
    /// Each row label is split into tokens and compared against variant values:
    /// an all-exact match over every variant first, then a fuzzy one. A variant
    /// fills at most one row. Rows left without a variant get quantity 0.
    pub fn plan_rows(rows: &[String], variants: &[ReconciledVariant]) -> Vec<RowAssignment> {
        let mut used = vec![false; variants.len()];

        rows.iter()
            .enumerate()
            .map(|(row_index, row_label)| {
                let tokens = split_variant_label(row_label);
                let pick = |wanted: Option<MatchConfidence>, used: &[bool]| {
                    variants.iter().enumerate().position(|(i, v)| {
                        if used[i] {
                            return false;
                        }
                        match (match_tokens(&tokens, &v.values), wanted) {
                            (Some(c), Some(w)) => c == w,
                            (Some(_), None) => true,
                            (None, _) => false,
                        }
                    })
                };

                let chosen = pick(Some(MatchConfidence::Exact), &used).or_else(|| pick(None, &used));

                match chosen {
                    Some(idx) => {
                        used[idx] = true;
                        let variant = &variants[idx];
                        RowAssignment {
                            row_index,
                            row_label: row_label.clone(),
                            sku_id: Some(variant.sku_id.clone()),
                            price: Some(variant.price),
                            quantity: variant.quantity,
                        }
                    }
                    None => RowAssignment {
                        row_index,
                        row_label: row_label.clone(),
                        sku_id: None,
                        price: None,
                        quantity: 0,
                    },
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::types::{Sku, VariantAxis};

    fn options(cap: u32) -> ReconcileOptions {
        ReconcileOptions {
            markup_pct: 30.0,
            stock_cap: cap,
            default_quantity: 2,
        }
    }

    fn sku(id: &str, values: &[&str], price: f64, stock: Option<i64>) -> Sku {
        Sku {
            id: id.to_string(),
            values: values.iter().map(|v| v.to_string()).collect(),
            price,
            stock,
        }
    }

    fn product(skus: Vec<Sku>) -> SourceProduct {
        SourceProduct {
            title: "Cotton Tee".to_string(),
            base_price: 6.50,
            currency: "USD".to_string(),
            images: vec!["https://img.example/1.jpg".to_string()],
            axes: vec![
                VariantAxis::new("Color", &["Red", "Blue"]),
                VariantAxis::new("Size", &["XS", "L", "XL"]),
            ],
            skus,
        }
    }

    #[test]
    fn test_stock_and_cap_per_sku() {
        let engine = ReconciliationEngine::new(options(5));
        let result = engine
            .reconcile(&product(vec![
                sku("1", &["Red", "XS"], 6.50, Some(5)),
                sku("2", &["Red", "L"], 7.20, Some(0)),
            ]))
            .unwrap();

        let quantities: Vec<u32> = result.variants.iter().map(|v| v.quantity).collect();
        assert_eq!(quantities, vec![5, 0]);
        assert_eq!(result.stock_policy, StockPolicy::Reported);
    }

    #[test]
    fn test_prices_are_independent_per_sku() {
        let engine = ReconciliationEngine::new(options(5));
        let result = engine
            .reconcile(&product(vec![
                sku("1", &["Red", "XS"], 6.50, Some(1)),
                sku("2", &["Blue", "XS"], 7.20, Some(1)),
            ]))
            .unwrap();

        assert_eq!(result.variants[0].price, 8.45);
        assert_eq!(result.variants[1].price, 9.36);
        assert_eq!(result.base_price, 8.45);
    }

    #[test]
    fn test_uniform_default_when_no_stock_signal() {
        let engine = ReconciliationEngine::new(options(5));
        let result = engine
            .reconcile(&product(vec![
                sku("1", &["Red", "XS"], 6.50, None),
                sku("2", &["Red", "L"], 6.50, None),
                sku("3", &["Blue", "XL"], 6.50, None),
            ]))
            .unwrap();

        assert!(result.variants.iter().all(|v| v.quantity == 2));
        assert_eq!(result.stock_policy, StockPolicy::Uniform { quantity: 2 });
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_missing_stock_among_reported_is_zero() {
        let engine = ReconciliationEngine::new(options(5));
        let result = engine
            .reconcile(&product(vec![
                sku("1", &["Red", "XS"], 6.50, Some(3)),
                sku("2", &["Red", "L"], 6.50, None),
            ]))
            .unwrap();

        assert_eq!(result.variants[0].quantity, 3);
        assert_eq!(result.variants[1].quantity, 0);
        assert!(result.warnings.contains(&ReconcileWarning::MissingStock {
            sku_id: "2".to_string()
        }));
    }

    #[test]
    fn test_variants_are_one_to_one_with_skus() {
        let engine = ReconciliationEngine::new(options(5));
        let skus = vec![
            sku("a", &["Red", "XS"], 1.0, Some(1)),
            sku("b", &["Red", "L"], 1.0, Some(1)),
            sku("c", &["Blue", "XL"], 1.0, Some(1)),
        ];
        let result = engine.reconcile(&product(skus.clone())).unwrap();
        let ids: Vec<&str> = result.variants.iter().map(|v| v.sku_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_fuzzy_values_resolve_to_option_labels() {
        let engine = ReconciliationEngine::new(options(5));
        let result = engine
            .reconcile(&product(vec![sku("1", &[" bright red ", "xl"], 1.0, Some(1))]))
            .unwrap();

        let variant = &result.variants[0];
        assert_eq!(variant.values, vec!["Red", "XL"]);
        assert_eq!(variant.label, "Red / XL");
        assert_eq!(variant.confidence, MatchConfidence::Fuzzy);
    }

    #[test]
    fn test_partially_unmatched_axis_warns() {
        let engine = ReconciliationEngine::new(options(5));
        let result = engine
            .reconcile(&product(vec![
                sku("1", &["Red", "XS"], 1.0, Some(1)),
                sku("2", &["Teal", "XS"], 1.0, Some(1)),
            ]))
            .unwrap();

        assert_eq!(result.variants.len(), 2);
        assert_eq!(result.variants[1].confidence, MatchConfidence::Unmatched);
        assert!(result.warnings.contains(&ReconcileWarning::UnmatchedValues {
            axis: "Color".to_string(),
            values: vec!["Teal".to_string()],
        }));
    }

    #[test]
    fn test_fully_unmatched_axis_aborts() {
        let engine = ReconciliationEngine::new(options(5));
        let err = engine
            .reconcile(&product(vec![
                sku("1", &["Teal", "XS"], 1.0, Some(1)),
                sku("2", &["Mauve", "L"], 1.0, Some(1)),
            ]))
            .unwrap_err();

        assert_eq!(
            err,
            ReconcileError::AxisUnmatched {
                axis: "Color".to_string(),
                values: vec!["Teal".to_string(), "Mauve".to_string()],
            }
        );
    }

    #[test]
    fn test_product_without_skus() {
        let engine = ReconciliationEngine::new(options(5));
        let mut simple = product(vec![]);
        simple.axes.clear();
        let result = engine.reconcile(&simple).unwrap();
        assert!(result.variants.is_empty());
        assert_eq!(result.base_quantity, 2);
    }

    #[test]
    fn test_reconcile_is_deterministic() {
        let engine = ReconciliationEngine::new(options(5));
        let p = product(vec![
            sku("1", &["Red", "XS"], 6.50, Some(5)),
            sku("2", &["Dark Blue", "L"], 7.20, None),
        ]);
        let first = engine.reconcile(&p).unwrap();
        for _ in 0..5 {
            assert_eq!(engine.reconcile(&p).unwrap(), first);
        }
    }

    #[test]
    fn test_plan_rows_prefers_exact_and_zeroes_unmatched() {
        let engine = ReconciliationEngine::new(options(5));
        let result = engine
            .reconcile(&product(vec![
                sku("1", &["Red", "XL"], 6.50, Some(4)),
                sku("2", &["Red", "L"], 7.20, Some(2)),
            ]))
            .unwrap();

        let rows = vec![
            "Red / L".to_string(),
            "Red | XL".to_string(),
            "Green / XS".to_string(),
        ];
        let plan = ReconciliationEngine::plan_rows(&rows, &result.variants);

        assert_eq!(plan[0].sku_id.as_deref(), Some("2"));
        assert_eq!(plan[0].quantity, 2);
        assert_eq!(plan[1].sku_id.as_deref(), Some("1"));
        assert_eq!(plan[1].price, Some(8.45));
        assert!(!plan[2].is_matched());
        assert_eq!(plan[2].quantity, 0);
    }

    #[test]
    fn test_plan_rows_never_reuses_a_variant() {
        let engine = ReconciliationEngine::new(options(5));
        let result = engine
            .reconcile(&product(vec![sku("1", &["Red", "XL"], 1.0, Some(3))]))
            .unwrap();

        let rows = vec!["Red / XL".to_string(), "red/xl".to_string()];
        let plan = ReconciliationEngine::plan_rows(&rows, &result.variants);
        assert_eq!(plan[0].quantity, 3);
        assert_eq!(plan[1].quantity, 0);
        assert!(plan[1].sku_id.is_none());
    }
}
