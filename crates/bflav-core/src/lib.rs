//! # bflav-core
//!
//! Shared plumbing for flavour-tagging and resolution-model densities:
//!
//! - a [`Workspace`] holding real variables and categories, with dirty bookkeeping,
//! - the capability traits every density implements ([`Pdf`], [`ResolutionModel`], ...),
//! - cache managers keyed by integration/normalisation set and range,
//! - a generic integration engine used when a density cannot integrate analytically,
//! - a JSON configuration layer for building workspaces.
//!
//! Evaluation is single-threaded: values live in `Cell`s and densities hold `Rc` handles.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cache;
pub mod error;
pub mod integral;
pub mod spec;
pub mod term;
pub mod traits;
pub mod workspace;

pub use cache::{CacheKey, CacheManager, CachedValue, ValueCache};
pub use error::{Error, Result};
pub use integral::{Integral, QuadratureOrder, integral, normalized_value};
pub use spec::WorkspaceSpec;
pub use term::{Substitution, Term};
pub use traits::{BinnedPdf, IntegralCode, ModelHandle, Pdf, RealFunction, ResolutionModel};
pub use workspace::{
    CatId, CatState, CategoryVar, RealId, RealVar, ScopedCat, ScopedReal, VarId, VarSet, Workspace,
    var_set,
};
