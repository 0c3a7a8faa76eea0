//! Capability traits implemented by every function and density.
//!
//! The integration protocol is two-step: a density first announces which of the requested
//! variables it can integrate itself ([`Pdf::analytical_integral_code`]), and the returned
//! [`IntegralCode`] is later handed back to [`Pdf::analytical_integral`]. Variables the
//! code does not claim are integrated numerically by [`crate::integral()`].

use std::fmt;
use std::ops::Deref;
use std::rc::Rc;

use crate::term::Substitution;
use crate::workspace::{RealId, VarSet, Workspace};
use crate::{Error, Result};

/// Result of an analytic-integration negotiation.
///
/// `int_slot` and `norm_slot` index the owning density's cache manager; `analytic` and
/// `norm` are kept so that the entry can be rebuilt if the slot went stale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegralCode {
    /// Variables integrated analytically.
    pub analytic: VarSet,
    /// Normalisation set folded into the result, if any.
    pub norm: Option<VarSet>,
    /// Cache slot of the integral.
    pub int_slot: usize,
    /// Cache slot of the normalisation integral.
    pub norm_slot: Option<usize>,
}

impl IntegralCode {
    /// Code for an integral without a normalisation set.
    pub fn plain(analytic: VarSet, int_slot: usize) -> Self {
        Self { analytic, norm: None, int_slot, norm_slot: None }
    }
}

/// A real-valued function of workspace variables.
pub trait RealFunction: fmt::Debug {
    /// Instance name.
    fn name(&self) -> &str;

    /// Every variable the value may depend on.
    fn dependents(&self) -> VarSet;

    /// Current value.
    fn evaluate(&self, ws: &Workspace) -> Result<f64>;

    /// Copy under a new name.
    fn clone_named(&self, name: &str) -> Box<dyn RealFunction>;

    /// Announce analytic integration over (a subset of) `vars`.
    fn analytical_integral_code(
        &self,
        _ws: &Workspace,
        _vars: &VarSet,
        _range: Option<&str>,
    ) -> Option<IntegralCode> {
        None
    }

    /// Integral for a code returned by [`RealFunction::analytical_integral_code`].
    fn analytical_integral(
        &self,
        _ws: &Workspace,
        _code: &IntegralCode,
        _range: Option<&str>,
    ) -> Result<f64> {
        Err(Error::Computation(format!("{}: no analytic integral available", self.name())))
    }
}

/// A probability density.
///
/// [`Pdf::evaluate`] returns the unnormalised value; normalisation is obtained through
/// [`crate::normalized_value`].
pub trait Pdf: fmt::Debug {
    /// Instance name.
    fn name(&self) -> &str;

    /// Every variable (observable or parameter) the value may depend on.
    fn dependents(&self) -> VarSet;

    /// Unnormalised value at the current workspace state.
    fn evaluate(&self, ws: &Workspace) -> Result<f64>;

    /// Announce analytic integration over (a subset of) `vars`.
    ///
    /// Self-normalised densities fold `norm` into the code; others ignore it.
    fn analytical_integral_code(
        &self,
        _ws: &Workspace,
        _vars: &VarSet,
        _norm: Option<&VarSet>,
        _range: Option<&str>,
    ) -> Result<Option<IntegralCode>> {
        Ok(None)
    }

    /// Integral for a code returned by [`Pdf::analytical_integral_code`].
    fn analytical_integral(
        &self,
        _ws: &Workspace,
        _code: &IntegralCode,
        _range: Option<&str>,
    ) -> Result<f64> {
        Err(Error::Computation(format!("{}: no analytic integral available", self.name())))
    }

    /// Whether the density divides by its own normalisation integral.
    fn self_normalized(&self) -> bool {
        false
    }

    /// Deep copy under a new name.
    fn clone_named(&self, name: &str) -> Result<Box<dyn Pdf>>;
}

/// A density backed by a histogram.
pub trait BinnedPdf: Pdf {
    /// Bin edges of `observable` inside `[lo, hi]`, including `lo` and `hi`.
    ///
    /// `None` if the density is not binned in `observable`.
    fn bin_boundaries(&self, observable: RealId, lo: f64, hi: f64) -> Option<Vec<f64>>;
}

/// A resolution model: a density in a convolution variable that can be re-parameterised.
pub trait ResolutionModel: Pdf {
    /// The smeared variable.
    fn convolution_variable(&self) -> RealId;

    /// Deep copy under `name` with parameters rewritten by `subst`.
    fn customize(&self, name: &str, subst: &Substitution) -> Result<Box<dyn ResolutionModel>>;
}

/// Resolution model held by a wrapping density.
///
/// `Borrowed` models belong to the caller and are shared; `Owned` models were synthesized
/// by the wrapper and are dropped with it.
pub enum ModelHandle {
    /// Caller-supplied model.
    Borrowed(Rc<dyn ResolutionModel>),
    /// Synthesized clone owned by the wrapper.
    Owned(Box<dyn ResolutionModel>),
}

impl ModelHandle {
    /// Whether this handle owns its model.
    pub fn is_owned(&self) -> bool {
        matches!(self, ModelHandle::Owned(_))
    }

    /// Copy the handle: borrowed models are shared again, owned ones are deep-cloned.
    pub fn duplicate(&self) -> Result<ModelHandle> {
        match self {
            ModelHandle::Borrowed(m) => Ok(ModelHandle::Borrowed(Rc::clone(m))),
            ModelHandle::Owned(m) => {
                Ok(ModelHandle::Owned(m.customize(m.name(), &Substitution::new())?))
            }
        }
    }
}

impl Deref for ModelHandle {
    type Target = dyn ResolutionModel;

    fn deref(&self) -> &Self::Target {
        match self {
            ModelHandle::Borrowed(m) => m.as_ref(),
            ModelHandle::Owned(m) => m.as_ref(),
        }
    }
}

impl fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelHandle::Borrowed(m) => write!(f, "Borrowed({})", m.name()),
            ModelHandle::Owned(m) => write!(f, "Owned({})", m.name()),
        }
    }
}
