//! # bflav-pdf
//!
//! Flavour-tagging densities and resolution models built on the `bflav-core` workspace.
//!
//! This crate provides:
//! - [`MistagCalibration`]: polynomial calibration of a per-event mistag estimate.
//! - [`TaggingCategoryMultiplexer`]: per-category parameter lookup keyed by a tag decision.
//! - [`NonOscTaggingPdf`]: joint density of final-state charge, tag decision and mistag for
//!   non-oscillating decays, with analytic integrals over every observable subset.
//! - [`KFactorSmearingModel`]: a resolution model smeared by a binned k-factor distribution.
//! - [`SimultaneousResolutionSwitch`]: a resolution model selected by category state.
//! - Concrete collaborator shapes in [`pdf`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod kfactor;
pub mod mistag_calibration;
pub mod non_osc_tagging;
pub mod pdf;
pub mod sim_switch;
pub mod tag_multiplexer;
pub mod tag_state;

mod interp;

pub use kfactor::KFactorSmearingModel;
pub use mistag_calibration::MistagCalibration;
pub use non_osc_tagging::{NonOscTaggingPdf, Tagger, TaggingInput};
pub use pdf::{GaussianModel, HistogramPdf, UniformPdf};
pub use sim_switch::SimultaneousResolutionSwitch;
pub use tag_multiplexer::TaggingCategoryMultiplexer;
pub use tag_state::{Flavour, TagState};
