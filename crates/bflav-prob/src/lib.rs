//! Pure numeric helpers for flavour tagging.
//!
//! - [`tagging`]: conversion between (decision, mistag) pairs and tag log-likelihood ratios,
//!   and combination of independent taggers,
//! - [`polynomial`]: shifted polynomials and their antiderivatives (mistag calibration),
//! - [`math`]: small numerically-stable primitives.
//!
//! Everything here is stateless.

pub mod math;
pub mod polynomial;
pub mod tagging;

pub use tagging::TagDecision;
