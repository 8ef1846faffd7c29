use crate::Representation;

/// Share of the estimated throughput a representation may use.
const ADAPTIVE_FACTOR: f64 = 0.8;

/// Pick the representation with the highest bandwidth which fits in the
/// estimated throughput, or the lowest one when none fits.
///
/// Representations without a declared bandwidth are treated as the cheapest.
pub fn select_representation(
    representations: &[Representation],
    estimate_bps: f64,
) -> Option<&Representation> {
    let budget = estimate_bps * ADAPTIVE_FACTOR;
    let bandwidth = |representation: &Representation| representation.bandwidth.unwrap_or(0);

    representations
        .iter()
        .filter(|representation| bandwidth(representation) as f64 <= budget)
        .max_by_key(|representation| bandwidth(representation))
        .or_else(|| representations.iter().min_by_key(|representation| bandwidth(representation)))
}
