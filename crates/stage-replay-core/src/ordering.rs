//! Start-order perturbation.
//!
//! Competitors are served in a fixed order for the whole run. That order is
//! the natural one with bounded random jitter: each item's sort key is
//! `index + uniform(-variation, +variation)`, so an item can only drift a
//! limited number of places from where it started.

use rand::Rng;

/// Largest jitter applied to a sort key. Anything wider is already a full
/// shuffle for any realistic field size.
pub const MAX_ORDER_VARIATION: f64 = 1_000_000.0;

/// Return `items` reordered by jittered sort keys.
///
/// With `variation == 0` the natural order is returned unchanged. Ties keep
/// their natural order (stable sort).
pub fn perturbed_order<T, R>(items: &[T], variation: f64, rng: &mut R) -> Vec<T>
where
    T: Clone,
    R: Rng + ?Sized,
{
    let variation = if variation.is_finite() {
        variation.abs().min(MAX_ORDER_VARIATION)
    } else {
        0.0
    };

    let mut keyed: Vec<(f64, &T)> = items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            let jitter = if variation > 0.0 {
                rng.gen_range(-variation..variation)
            } else {
                0.0
            };
            (index as f64 + jitter, item)
        })
        .collect();

    keyed.sort_by(|a, b| a.0.total_cmp(&b.0));
    keyed.into_iter().map(|(_, item)| item.clone()).collect()
}
