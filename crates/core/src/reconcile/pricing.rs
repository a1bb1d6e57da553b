//! Per-SKU destination pricing.

/// Round to two decimals, half away from zero.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Destination price for one source price under the given markup percentage.
///
/// Works in whole cents so that prices like 6.50 at 30% land on 8.45 instead of
/// drifting with binary floating point.
pub fn destination_price(source_price: f64, markup_pct: f64) -> f64 {
    let source_cents = (source_price * 100.0).round();
    let marked_up = (source_cents * (100.0 + markup_pct) / 100.0).round();
    marked_up / 100.0
}
