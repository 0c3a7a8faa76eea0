use std::f64::consts::{FRAC_PI_2, SQRT_2};

use bflav_core::{
    Error, IntegralCode, Pdf, RealId, ResolutionModel, Result, Substitution, Term, VarId, VarSet,
    Workspace, var_set,
};
use statrs::function::erf::erf;

/// Gaussian resolution model `exp(-½((x - μ)/σ)²)` in the convolution variable `x`.
///
/// Unnormalised; the integral over `x` is analytic. A non-positive or non-finite `σ`
/// evaluates to NaN.
#[derive(Debug, Clone)]
pub struct GaussianModel {
    name: String,
    x: RealId,
    mean: Term,
    sigma: Term,
}

impl GaussianModel {
    /// Gaussian in `x` with mean `mean` and width `sigma`.
    pub fn new(
        name: impl Into<String>,
        x: RealId,
        mean: impl Into<Term>,
        sigma: impl Into<Term>,
    ) -> Result<Self> {
        let name = name.into();
        let (mean, sigma) = (mean.into(), sigma.into());
        if mean.depends_on(x.into()) || sigma.depends_on(x.into()) {
            return Err(Error::Validation(format!(
                "GaussianModel '{name}': mean and sigma must not depend on the convolution variable"
            )));
        }
        Ok(Self { name, x, mean, sigma })
    }

    /// Mean parameter.
    pub fn mean(&self) -> &Term {
        &self.mean
    }

    /// Width parameter.
    pub fn sigma(&self) -> &Term {
        &self.sigma
    }

    fn params(&self, ws: &Workspace) -> Option<(f64, f64)> {
        let mu = self.mean.value(ws);
        let sigma = self.sigma.value(ws);
        (mu.is_finite() && sigma.is_finite() && sigma > 0.0).then_some((mu, sigma))
    }
}

impl Pdf for GaussianModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn dependents(&self) -> VarSet {
        let mut deps = var_set([self.x]);
        deps.extend(self.mean.dependents());
        deps.extend(self.sigma.dependents());
        deps
    }

    fn evaluate(&self, ws: &Workspace) -> Result<f64> {
        let Some((mu, sigma)) = self.params(ws) else {
            return Ok(f64::NAN);
        };
        let z = (ws.real(self.x) - mu) / sigma;
        Ok((-0.5 * z * z).exp())
    }

    fn analytical_integral_code(
        &self,
        _ws: &Workspace,
        vars: &VarSet,
        _norm: Option<&VarSet>,
        _range: Option<&str>,
    ) -> Result<Option<IntegralCode>> {
        let x = VarId::Real(self.x);
        Ok(vars.contains(&x).then(|| IntegralCode::plain(var_set([x]), 0)))
    }

    fn analytical_integral(
        &self,
        ws: &Workspace,
        code: &IntegralCode,
        range: Option<&str>,
    ) -> Result<f64> {
        if code.analytic != var_set([self.x]) {
            return Err(Error::Computation(format!(
                "GaussianModel '{}': unrecognised integral over {{{}}}",
                self.name,
                ws.describe(&code.analytic)
            )));
        }
        let Some((mu, sigma)) = self.params(ws) else {
            return Ok(f64::NAN);
        };
        let (lo, hi) = ws.real_range(self.x, range);
        let s = SQRT_2 * sigma;
        Ok(sigma * FRAC_PI_2.sqrt() * (erf((hi - mu) / s) - erf((lo - mu) / s)))
    }

    fn clone_named(&self, name: &str) -> Result<Box<dyn Pdf>> {
        Ok(Box::new(Self { name: name.to_string(), ..self.clone() }))
    }
}

impl ResolutionModel for GaussianModel {
    fn convolution_variable(&self) -> RealId {
        self.x
    }

    fn customize(&self, name: &str, subst: &Substitution) -> Result<Box<dyn ResolutionModel>> {
        Ok(Box::new(GaussianModel::new(
            name,
            self.x,
            self.mean.substitute(subst),
            self.sigma.substitute(subst),
        )?))
    }
}
