//! Polynomials in a shifted variable, `p(x) = Σ c_k (x - x0)^k`.

/// Evaluate `Σ c_k (x - x0)^k` by Horner's scheme. Empty coefficients give 0.
#[inline]
pub fn horner_shifted(coeffs: &[f64], x: f64, x0: f64) -> f64 {
    let u = x - x0;
    coeffs.iter().rev().fold(0.0, |acc, &c| acc * u + c)
}

/// Antiderivative `Σ c_k (x - x0)^(k+1) / (k+1)`, vanishing at `x0`.
#[inline]
pub fn antiderivative_shifted(coeffs: &[f64], x: f64, x0: f64) -> f64 {
    let u = x - x0;
    let inner = coeffs
        .iter()
        .enumerate()
        .rev()
        .fold(0.0, |acc, (k, &c)| acc * u + c / (k as f64 + 1.0));
    inner * u
}

/// `∫_lo^hi Σ c_k (x - x0)^k dx`.
pub fn integral_shifted(coeffs: &[f64], x0: f64, lo: f64, hi: f64) -> f64 {
    antiderivative_shifted(coeffs, hi, x0) - antiderivative_shifted(coeffs, lo, x0)
}
