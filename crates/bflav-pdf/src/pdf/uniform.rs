use bflav_core::{IntegralCode, Pdf, RealId, Result, VarId, VarSet, Workspace, var_set};

/// Flat density over one or more real observables.
#[derive(Debug, Clone)]
pub struct UniformPdf {
    name: String,
    observables: VarSet,
}

impl UniformPdf {
    /// Uniform density over `observables`.
    pub fn new(name: impl Into<String>, observables: &[RealId]) -> Self {
        Self { name: name.into(), observables: var_set(observables.iter().copied()) }
    }
}

impl Pdf for UniformPdf {
    fn name(&self) -> &str {
        &self.name
    }

    fn dependents(&self) -> VarSet {
        self.observables.clone()
    }

    fn evaluate(&self, _ws: &Workspace) -> Result<f64> {
        Ok(1.0)
    }

    fn analytical_integral_code(
        &self,
        _ws: &Workspace,
        vars: &VarSet,
        _norm: Option<&VarSet>,
        _range: Option<&str>,
    ) -> Result<Option<IntegralCode>> {
        let analytic: VarSet = vars.intersection(&self.observables).copied().collect();
        Ok((!analytic.is_empty()).then(|| IntegralCode::plain(analytic, 0)))
    }

    fn analytical_integral(
        &self,
        ws: &Workspace,
        code: &IntegralCode,
        range: Option<&str>,
    ) -> Result<f64> {
        Ok(code
            .analytic
            .iter()
            .map(|v| match v {
                VarId::Real(id) => {
                    let (lo, hi) = ws.real_range(*id, range);
                    hi - lo
                }
                VarId::Cat(_) => 1.0,
            })
            .product())
    }

    fn clone_named(&self, name: &str) -> Result<Box<dyn Pdf>> {
        Ok(Box::new(Self { name: name.to_string(), observables: self.observables.clone() }))
    }
}
