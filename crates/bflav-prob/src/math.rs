//! Small numerically-stable math utilities.

/// Stable sigmoid: `1 / (1 + exp(-x))`.
///
/// Single `exp(-|x|)`, then a sign flip; never overflows.
#[inline]
pub fn sigmoid(x: f64) -> f64 {
    let e = (-x.abs()).exp();
    let recip = 1.0 / (1.0 + e);
    if x >= 0.0 { recip } else { e * recip }
}

/// Log-odds against a small probability: `ln((1 - p) / p)`.
///
/// Uses `ln_1p` so that `p` near zero keeps full precision.
#[inline]
pub fn log_odds_against(p: f64) -> f64 {
    (-p).ln_1p() - p.ln()
}
