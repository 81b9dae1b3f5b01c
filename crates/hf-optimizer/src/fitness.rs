//! Composite fitness score.

/// Substitute for missing, zero or negative inputs.
pub const EPSILON: f64 = 1e-6;

fn floor_input(value: f64) -> f64 {
    if value.is_finite() && value > EPSILON {
        value
    } else {
        EPSILON
    }
}

/// Combines precision, recall and the selection metric into one scalar.
///
/// `f1 * selection_metric * max(0, 1 - |precision - recall|)`. The balance
/// term drives skewed precision/recall pairs towards zero even when the
/// selection metric is high. Non-finite or non-positive inputs count as
/// [`EPSILON`].
pub fn fitness(precision: f64, recall: f64, selection_metric: f64) -> f64 {
    let p = floor_input(precision);
    let r = floor_input(recall);
    let m = floor_input(selection_metric);
    let f1 = 2.0 * p * r / (p + r);
    f1 * m * (1.0 - (p - r).abs()).max(0.0)
}
