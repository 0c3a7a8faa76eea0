//! Polynomial recalibration of a per-event mistag.
//!
//! `η_c = Σ_k p_k (η - η_avg)^k`; with no coefficients the calibration is the identity.

use bflav_core::{
    Error, IntegralCode, RealFunction, RealId, Result, Term, VarId, VarSet, Workspace, var_set,
};
use bflav_prob::polynomial::{horner_shifted, integral_shifted};

/// Calibrated mistag as a function of the per-event mistag observable.
#[derive(Debug, Clone)]
pub struct MistagCalibration {
    name: String,
    eta: RealId,
    coefficients: Vec<Term>,
    reference: Term,
}

impl MistagCalibration {
    /// Calibration `Σ_k coefficients[k] (η - reference)^k`.
    ///
    /// Neither the coefficients nor the reference point may depend on `eta`.
    pub fn new(
        name: impl Into<String>,
        eta: RealId,
        coefficients: Vec<Term>,
        reference: impl Into<Term>,
    ) -> Result<Self> {
        let name = name.into();
        let reference = reference.into();
        let eta_var = VarId::Real(eta);
        if let Some(k) = coefficients.iter().position(|c| c.depends_on(eta_var)) {
            return Err(Error::Validation(format!(
                "MistagCalibration '{name}': coefficient {k} depends on the mistag observable"
            )));
        }
        if reference.depends_on(eta_var) {
            return Err(Error::Validation(format!(
                "MistagCalibration '{name}': reference point depends on the mistag observable"
            )));
        }
        Ok(Self { name, eta, coefficients, reference })
    }

    /// `p0 + p1 (η - reference)`.
    pub fn linear(
        name: impl Into<String>,
        eta: RealId,
        p0: impl Into<Term>,
        p1: impl Into<Term>,
        reference: impl Into<Term>,
    ) -> Result<Self> {
        Self::new(name, eta, vec![p0.into(), p1.into()], reference)
    }

    /// `p0 + p1 η`.
    pub fn bare(
        name: impl Into<String>,
        eta: RealId,
        p0: impl Into<Term>,
        p1: impl Into<Term>,
    ) -> Result<Self> {
        Self::linear(name, eta, p0, p1, 0.0)
    }

    /// Polynomial coefficients, lowest order first.
    pub fn coefficients(&self) -> &[Term] {
        &self.coefficients
    }

    /// Reference point `η_avg`.
    pub fn reference(&self) -> &Term {
        &self.reference
    }

    fn coefficient_values(&self, ws: &Workspace) -> Vec<f64> {
        self.coefficients.iter().map(|c| c.value(ws)).collect()
    }

    /// Calibrated mistag at an explicit `eta` with the current coefficients.
    pub fn calibrate(&self, ws: &Workspace, eta: f64) -> f64 {
        if self.coefficients.is_empty() {
            return eta;
        }
        horner_shifted(&self.coefficient_values(ws), eta, self.reference.value(ws))
    }
}

impl RealFunction for MistagCalibration {
    fn name(&self) -> &str {
        &self.name
    }

    fn dependents(&self) -> VarSet {
        let mut deps = var_set([self.eta]);
        for c in &self.coefficients {
            deps.extend(c.dependents());
        }
        deps.extend(self.reference.dependents());
        deps
    }

    fn evaluate(&self, ws: &Workspace) -> Result<f64> {
        Ok(self.calibrate(ws, ws.real(self.eta)))
    }

    fn clone_named(&self, name: &str) -> Box<dyn RealFunction> {
        Box::new(Self { name: name.to_string(), ..self.clone() })
    }

    fn analytical_integral_code(
        &self,
        _ws: &Workspace,
        vars: &VarSet,
        _range: Option<&str>,
    ) -> Option<IntegralCode> {
        let eta = VarId::Real(self.eta);
        vars.contains(&eta).then(|| IntegralCode::plain(var_set([eta]), 1))
    }

    fn analytical_integral(
        &self,
        ws: &Workspace,
        code: &IntegralCode,
        range: Option<&str>,
    ) -> Result<f64> {
        if code.int_slot != 1 || code.analytic != var_set([self.eta]) {
            return Err(Error::Computation(format!(
                "MistagCalibration '{}': unrecognised integral code {}",
                self.name, code.int_slot
            )));
        }
        let (lo, hi) = ws.real_range(self.eta, range);
        if self.coefficients.is_empty() {
            return Ok(0.5 * (hi * hi - lo * lo));
        }
        Ok(integral_shifted(&self.coefficient_values(ws), self.reference.value(ws), lo, hi))
    }
}
