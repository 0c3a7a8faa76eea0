//! Tag decisions, mistags and tag log-likelihood ratios (tag-DLLs).
//!
//! A tagger answers with a decision (B, B̄ or no answer) and a mistag probability
//! `η ∈ [0, 0.5]`. The pair is encoded as
//!
//! ```text
//! dll = ln P(b) - ln P(b̄),   P(b) = 0.5 + s · (0.5 - η),   s = sign(decision)
//! ```
//!
//! For statistically independent taggers DLLs add, so a combined decision and mistag can be
//! read back from the sum.

use crate::math::{log_odds_against, sigmoid};

/// Flavour call of a single tagger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i8)]
pub enum TagDecision {
    /// Tagged as containing a b̄ quark.
    BBar = -1,
    /// No decision.
    Untagged = 0,
    /// Tagged as containing a b quark.
    B = 1,
}

impl TagDecision {
    /// `-1`, `0` or `+1`.
    pub fn sign(self) -> i32 {
        self as i32
    }

    /// Decision for a signed integer: its sign.
    pub fn from_sign(x: i32) -> Self {
        match x.signum() {
            1 => TagDecision::B,
            -1 => TagDecision::BBar,
            _ => TagDecision::Untagged,
        }
    }
}

/// Mistag used for untagged events.
pub const UNTAGGED_MISTAG: f64 = 0.5;

/// Clamp a (decision, mistag) pair into the valid domain.
///
/// `η ≤ 0` becomes the smallest positive normal double; `η ≥ 0.5` (or NaN) becomes exactly
/// 0.5 with the decision forced to untagged. Untagged decisions always carry 0.5.
pub fn regularize(decision: TagDecision, eta: f64) -> (TagDecision, f64) {
    if decision == TagDecision::Untagged || eta.is_nan() || eta >= UNTAGGED_MISTAG {
        return (TagDecision::Untagged, UNTAGGED_MISTAG);
    }
    (decision, eta.max(f64::MIN_POSITIVE))
}

/// Tag-DLL of a (decision, mistag) pair. Untagged and degenerate inputs give 0.
pub fn tag_dll(decision: TagDecision, eta: f64) -> f64 {
    match regularize(decision, eta) {
        (TagDecision::Untagged, _) => 0.0,
        (d, eta) => f64::from(d.sign()) * log_odds_against(eta),
    }
}

/// Combined DLL of independent taggers.
pub fn combine(dlls: &[f64]) -> f64 {
    dlls.iter().sum()
}

/// Decision encoded by a DLL: its sign, untagged for exactly zero (or NaN).
pub fn dll_to_decision(dll: f64) -> TagDecision {
    if dll > 0.0 {
        TagDecision::B
    } else if dll < 0.0 {
        TagDecision::BBar
    } else {
        TagDecision::Untagged
    }
}

/// Mistag encoded by a DLL: `1 / (1 + exp(|dll|))`.
pub fn dll_to_mistag(dll: f64) -> f64 {
    sigmoid(-dll.abs())
}

/// Combine several taggers' (decision, mistag) answers into one.
pub fn combine_decisions(tags: &[(TagDecision, f64)]) -> (TagDecision, f64) {
    let dlls: Vec<f64> = tags.iter().map(|&(d, eta)| tag_dll(d, eta)).collect();
    let dll = combine(&dlls);
    (dll_to_decision(dll), dll_to_mistag(dll))
}
