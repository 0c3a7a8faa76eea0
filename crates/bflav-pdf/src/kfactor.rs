//! Smearing of a resolution model by a binned k-factor distribution.
//!
//! The wrapped model `R(x; q_1, q_2, ...)` has its target parameters rescaled `q → k·q` and is
//! summed over the bins of the k-factor density `P(k)`:
//!
//! ```text
//! value(x) = Σ_b P(k̄_b) · Δk_b · R(x; k̄_b·q) · k̄_b
//! ```
//!
//! with `k̄_b` the bin midpoint and `Δk_b` the bin width. The trailing `k̄_b` compensates the
//! change of normalisation of `R` under `q → k·q`.

use std::cell::RefCell;
use std::rc::Rc;

use bflav_core::{
    BinnedPdf, CacheKey, CacheManager, Error, Integral, IntegralCode, ModelHandle, Pdf, RealId,
    ResolutionModel, Result, Substitution, Term, ValueCache, VarId, VarSet, Workspace,
    normalized_value, var_set,
};

use crate::interp::InterpolationGrid;

/// One k-factor bin with its rescaled copy of the model.
#[derive(Debug)]
struct SmearBin {
    mid: f64,
    width: f64,
    model: Box<dyn ResolutionModel>,
    /// Integral of `model` over the requested variables; `None` for plain evaluation.
    integral: Option<Integral>,
}

/// Bin sum for one (integration set, range).
#[derive(Debug)]
struct SmearElem {
    bins: Vec<SmearBin>,
    value: ValueCache,
}

/// Exact clone plus the grid sampled from it.
#[derive(Debug)]
struct InterpolatedCache {
    exact: Box<KFactorSmearingModel>,
    grid: Option<InterpolationGrid>,
}

/// Resolution model smeared by a discrete k-factor distribution.
#[derive(Debug)]
pub struct KFactorSmearingModel {
    name: String,
    model: ModelHandle,
    kfactor_pdf: Rc<dyn BinnedPdf>,
    k: RealId,
    targets: Vec<RealId>,
    forced: VarSet,
    interpolation: Vec<RealId>,
    cache: RefCell<CacheManager<SmearElem>>,
    interp: RefCell<Option<InterpolatedCache>>,
}

impl KFactorSmearingModel {
    /// Smear `model` by `kfactor_pdf` over `k`, rescaling each of `targets` by `k`.
    pub fn new(
        name: impl Into<String>,
        model: ModelHandle,
        kfactor_pdf: Rc<dyn BinnedPdf>,
        k: RealId,
        targets: Vec<RealId>,
    ) -> Result<Self> {
        let name = name.into();
        let k_var = VarId::Real(k);
        if model.dependents().contains(&k_var) {
            return Err(Error::Validation(format!(
                "KFactorSmearingModel '{name}': the resolution model must not depend on \
                 the k-factor variable"
            )));
        }
        if targets.is_empty() {
            return Err(Error::Validation(format!(
                "KFactorSmearingModel '{name}': at least one substitution target is required"
            )));
        }
        let model_deps = model.dependents();
        if let Some(t) = targets.iter().find(|t| !model_deps.contains(&VarId::Real(**t))) {
            return Err(Error::Validation(format!(
                "KFactorSmearingModel '{name}': target {t:?} is not a parameter of '{}'",
                model.name()
            )));
        }
        if targets.contains(&model.convolution_variable()) {
            return Err(Error::Validation(format!(
                "KFactorSmearingModel '{name}': the convolution variable cannot be a \
                 substitution target"
            )));
        }
        if !kfactor_pdf.dependents().contains(&k_var) {
            return Err(Error::Validation(format!(
                "KFactorSmearingModel '{name}': k-factor density '{}' does not depend on k",
                kfactor_pdf.name()
            )));
        }
        Ok(Self {
            name,
            model,
            kfactor_pdf,
            k,
            targets,
            forced: VarSet::new(),
            interpolation: Vec::new(),
            cache: RefCell::new(CacheManager::new()),
            interp: RefCell::new(None),
        })
    }

    /// Always integrate `vars` analytically (by summing per-bin integrals).
    pub fn force_analytical(mut self, vars: impl IntoIterator<Item = VarId>) -> Self {
        self.forced.extend(vars);
        self
    }

    /// Evaluate through a grid over `vars` sampled from the exact bin sum.
    ///
    /// Every grid variable must be a dependent of the smeared value; `k` is summed out and
    /// cannot be one.
    pub fn with_interpolation(mut self, vars: Vec<RealId>) -> Result<Self> {
        let deps = self.value_deps();
        if let Some(v) = vars.iter().find(|v| !deps.contains(&VarId::Real(**v))) {
            return Err(Error::Validation(format!(
                "KFactorSmearingModel '{}': cannot interpolate in {v:?}, the smeared value does \
                 not depend on it",
                self.name
            )));
        }
        self.interpolation = vars;
        self.interp = RefCell::new(None);
        Ok(self)
    }

    /// The smeared model.
    pub fn model(&self) -> &ModelHandle {
        &self.model
    }

    /// Dependencies of the smeared value (k is summed out).
    fn value_deps(&self) -> VarSet {
        let mut deps = self.model.dependents();
        deps.extend(self.kfactor_pdf.dependents());
        deps.remove(&VarId::Real(self.k));
        deps
    }

    fn make_elem(&self, ws: &Workspace, vars: &VarSet, range: Option<&str>) -> Result<SmearElem> {
        let (k_lo, k_hi) = ws.real_range(self.k, None);
        let edges = self.kfactor_pdf.bin_boundaries(self.k, k_lo, k_hi).ok_or_else(|| {
            Error::Validation(format!(
                "KFactorSmearingModel '{}': k-factor density '{}' is not binned in k",
                self.name,
                self.kfactor_pdf.name()
            ))
        })?;
        let mut bins = Vec::with_capacity(edges.len().saturating_sub(1));
        for (b, e) in edges.windows(2).enumerate() {
            let mid = 0.5 * (e[0] + e[1]);
            let subst = self.targets.iter().fold(Substitution::new(), |s, &t| s.scale(t, mid));
            let model = self.model.customize(&format!("{}_kbin{b}", self.name), &subst)?;
            let width = e[1] - e[0];
            let integral = (!vars.is_empty())
                .then(|| Integral::new(model.as_ref(), vars.clone(), None, range));
            bins.push(SmearBin { mid, width, model, integral });
        }
        let mut deps = self.value_deps();
        for v in vars {
            deps.remove(v);
        }
        Ok(SmearElem { bins, value: ValueCache::new(deps) })
    }

    fn eval_elem(&self, elem: &SmearElem, ws: &Workspace) -> Result<f64> {
        let k_norm = var_set([self.k]);
        elem.value.get_or_compute(ws, || {
            let mut sum = 0.0;
            for (b, bin) in elem.bins.iter().enumerate() {
                let p_k = {
                    let _k = ws.scoped_real(self.k, bin.mid);
                    normalized_value(self.kfactor_pdf.as_ref(), ws, Some(&k_norm))?
                };
                if !p_k.is_finite() {
                    log::error!(
                        "{}: k-factor density is {p_k} in bin {b} (k = {})",
                        self.name,
                        bin.mid
                    );
                    return Ok(f64::NAN);
                }
                let r = match &bin.integral {
                    Some(integral) => integral.value(bin.model.as_ref(), ws)?,
                    None => bin.model.evaluate(ws)?,
                };
                if !r.is_finite() || (bin.integral.is_some() && r == 0.0) {
                    log::error!(
                        "{}: resolution model '{}' gives {r} in bin {b} (k = {})",
                        self.name,
                        bin.model.name(),
                        bin.mid
                    );
                    return Ok(f64::NAN);
                }
                sum += p_k * bin.width * r * bin.mid;
            }
            Ok(sum)
        })
    }

    fn exact_value(&self, ws: &Workspace) -> Result<f64> {
        let empty = VarSet::new();
        let slot = self
            .cache
            .borrow_mut()
            .get_or_create(ws, CacheKey::new(empty.clone(), None, None), || {
                self.make_elem(ws, &empty, None)
            })?;
        let cache = self.cache.borrow();
        self.eval_elem(cache.entry(slot)?, ws)
    }

    fn interpolated_value(&self, ws: &Workspace) -> Result<f64> {
        let mut interp = self.interp.borrow_mut();
        if interp.is_none() {
            *interp = Some(InterpolatedCache { exact: Box::new(self.exact_clone()?), grid: None });
        }
        let Some(state) = interp.as_mut() else {
            let msg = format!("{}: interpolation cache missing", self.name);
            return Err(Error::Computation(msg));
        };
        if state.grid.as_ref().map_or(true, |g| g.is_stale(ws)) {
            let mut deps = self.value_deps();
            for v in &self.interpolation {
                deps.remove(&VarId::Real(*v));
            }
            let exact = &state.exact;
            state.grid = Some(InterpolationGrid::build(ws, &self.interpolation, deps, |ws| {
                exact.exact_value(ws)
            })?);
        }
        match &state.grid {
            Some(grid) => Ok(grid.interpolate(ws)),
            None => {
                Err(Error::Computation(format!("{}: interpolation grid missing", self.name)))
            }
        }
    }

    /// Copy with the interpolated mode switched off.
    fn exact_clone(&self) -> Result<Self> {
        Ok(Self {
            name: format!("{}_exact", self.name),
            model: self.model.duplicate()?,
            kfactor_pdf: Rc::clone(&self.kfactor_pdf),
            k: self.k,
            targets: self.targets.clone(),
            forced: self.forced.clone(),
            interpolation: Vec::new(),
            cache: RefCell::new(CacheManager::new()),
            interp: RefCell::new(None),
        })
    }

    fn with_model(&self, name: &str, model: ModelHandle, targets: Vec<RealId>) -> Self {
        Self {
            name: name.to_string(),
            model,
            kfactor_pdf: Rc::clone(&self.kfactor_pdf),
            k: self.k,
            targets,
            forced: self.forced.clone(),
            interpolation: self.interpolation.clone(),
            cache: RefCell::new(CacheManager::new()),
            interp: RefCell::new(None),
        }
    }

    /// Targets after `subst`. A target may only be replaced by a (scaled) single variable,
    /// which then takes over the k rescaling.
    fn substituted_targets(&self, subst: &Substitution) -> Result<Vec<RealId>> {
        let mut out: Vec<RealId> = Vec::with_capacity(self.targets.len());
        for &t in &self.targets {
            let target = match subst.get(t) {
                None => t,
                Some(term) => scaled_variable(term).ok_or_else(|| {
                    Error::Validation(format!(
                        "KFactorSmearingModel '{}': target {t:?} must be replaced by a single \
                         variable, got {term:?}",
                        self.name
                    ))
                })?,
            };
            if target == self.k || out.contains(&target) {
                return Err(Error::Validation(format!(
                    "KFactorSmearingModel '{}': substitution maps target {t:?} onto {target:?}, \
                     which is k or another target",
                    self.name
                )));
            }
            out.push(target);
        }
        Ok(out)
    }

    fn analytic_candidates(&self) -> VarSet {
        let mut vars = var_set([self.model.convolution_variable(), self.k]);
        vars.extend(self.forced.iter().copied());
        vars
    }
}

impl Pdf for KFactorSmearingModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn dependents(&self) -> VarSet {
        let mut deps = self.model.dependents();
        deps.extend(self.kfactor_pdf.dependents());
        deps.insert(VarId::Real(self.k));
        deps
    }

    fn evaluate(&self, ws: &Workspace) -> Result<f64> {
        if self.interpolation.is_empty() {
            self.exact_value(ws)
        } else {
            self.interpolated_value(ws)
        }
    }

    fn analytical_integral_code(
        &self,
        ws: &Workspace,
        vars: &VarSet,
        _norm: Option<&VarSet>,
        range: Option<&str>,
    ) -> Result<Option<IntegralCode>> {
        let analytic: VarSet = vars.intersection(&self.analytic_candidates()).copied().collect();
        if analytic.is_empty() {
            return Ok(None);
        }
        let mut inner = analytic.clone();
        inner.remove(&VarId::Real(self.k));
        let slot = self
            .cache
            .borrow_mut()
            .get_or_create(ws, CacheKey::new(analytic.clone(), None, range), || {
                self.make_elem(ws, &inner, range)
            })?;
        Ok(Some(IntegralCode::plain(analytic, slot)))
    }

    fn analytical_integral(
        &self,
        ws: &Workspace,
        code: &IntegralCode,
        range: Option<&str>,
    ) -> Result<f64> {
        let mut inner = code.analytic.clone();
        inner.remove(&VarId::Real(self.k));
        let key = CacheKey::new(code.analytic.clone(), None, range);
        let slot = self
            .cache
            .borrow_mut()
            .resolve(ws, code.int_slot, &key, || self.make_elem(ws, &inner, range))?;
        let cache = self.cache.borrow();
        self.eval_elem(cache.entry(slot)?, ws)
    }

    fn clone_named(&self, name: &str) -> Result<Box<dyn Pdf>> {
        let model = self.model.duplicate()?;
        Ok(Box::new(self.with_model(name, model, self.targets.clone())))
    }
}

impl ResolutionModel for KFactorSmearingModel {
    fn convolution_variable(&self) -> RealId {
        self.model.convolution_variable()
    }

    fn customize(&self, name: &str, subst: &Substitution) -> Result<Box<dyn ResolutionModel>> {
        let targets = self.substituted_targets(subst)?;
        let model = self.model.customize(&format!("{name}_model"), subst)?;
        if targets.contains(&model.convolution_variable()) {
            return Err(Error::Validation(format!(
                "KFactorSmearingModel '{name}': substitution turns a target into the \
                 convolution variable"
            )));
        }
        Ok(Box::new(self.with_model(name, ModelHandle::Owned(model), targets)))
    }
}

/// The variable under a `Var` or `Scaled(.., Var)` term.
fn scaled_variable(term: &Term) -> Option<RealId> {
    match term {
        Term::Var(id) => Some(*id),
        Term::Scaled(_, inner) => scaled_variable(inner),
        Term::Const(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::{GaussianModel, HistogramPdf};
    use approx::assert_relative_eq;
    use bflav_core::integral;

    struct Setup {
        ws: Workspace,
        x: RealId,
        s: RealId,
        k: RealId,
        model: Rc<dyn ResolutionModel>,
        kfactor: Rc<dyn BinnedPdf>,
    }

    fn histogram(k: RealId, edges: Vec<f64>, contents: Vec<f64>) -> Rc<dyn BinnedPdf> {
        Rc::new(HistogramPdf::from_edges_and_contents("pk", k, edges, contents, 0.0).unwrap())
    }

    fn setup() -> Setup {
        let mut ws = Workspace::new();
        let x = ws.add_real("x", 0.5, -4.0, 4.0).unwrap();
        let s = ws.add_real("s", 0.8, 0.1, 2.0).unwrap();
        let k = ws.add_real("k", 1.0, 0.7, 1.3).unwrap();
        let model: Rc<dyn ResolutionModel> =
            Rc::new(GaussianModel::new("res", x, 0.0, s).unwrap());
        let kfactor = histogram(k, vec![0.7, 0.9, 1.1, 1.3], vec![1.0, 2.0, 1.0]);
        Setup { ws, x, s, k, model, kfactor }
    }

    fn borrowed(t: &Setup) -> ModelHandle {
        ModelHandle::Borrowed(Rc::clone(&t.model))
    }

    fn smeared(t: &Setup, name: &str) -> KFactorSmearingModel {
        KFactorSmearingModel::new(name, borrowed(t), Rc::clone(&t.kfactor), t.k, vec![t.s])
            .unwrap()
    }

    #[test]
    fn test_construction_errors() {
        let mut t = setup();
        let kf = || Rc::clone(&t.kfactor);
        assert!(KFactorSmearingModel::new("m", borrowed(&t), kf(), t.k, vec![]).is_err());
        assert!(KFactorSmearingModel::new("m", borrowed(&t), kf(), t.k, vec![t.x]).is_err());
        assert!(KFactorSmearingModel::new("m", borrowed(&t), kf(), t.k, vec![t.k]).is_err());
        assert!(KFactorSmearingModel::new("m", borrowed(&t), kf(), t.s, vec![t.s]).is_err());

        let on_k = GaussianModel::new("bad", t.x, 0.0, t.k).unwrap();
        let on_k = ModelHandle::Borrowed(Rc::new(on_k));
        assert!(KFactorSmearingModel::new("m", on_k, kf(), t.k, vec![t.k]).is_err());

        let y = t.ws.add_real("y", 1.0, 0.0, 2.0).unwrap();
        let on_y = histogram(y, vec![0.0, 2.0], vec![1.0]);
        assert!(KFactorSmearingModel::new("m", borrowed(&t), on_y, t.k, vec![t.s]).is_err());
        assert!(KFactorSmearingModel::new("m", borrowed(&t), kf(), t.k, vec![t.s]).is_ok());
    }

    #[test]
    fn test_interpolation_variables_are_checked() {
        let mut t = setup();
        let y = t.ws.add_real("y", 0.0, -1.0, 1.0).unwrap();
        assert!(smeared(&t, "m").with_interpolation(vec![t.k]).is_err());
        assert!(smeared(&t, "m").with_interpolation(vec![y]).is_err());
        assert!(smeared(&t, "m").with_interpolation(vec![t.x, t.s]).is_ok());
    }

    #[test]
    fn test_customize_and_clone_own_their_models() {
        let t = setup();
        let smeared = smeared(&t, "m");
        assert!(!smeared.model().is_owned());

        let copy = smeared.clone_named("m_copy").unwrap();
        assert_eq!(copy.name(), "m_copy");
        assert_eq!(Rc::strong_count(&t.model), 3);
        assert_eq!(copy.evaluate(&t.ws).unwrap(), smeared.evaluate(&t.ws).unwrap());

        // doubling s by substitution equals evaluating the unsubstituted model at 2s
        let wide = smeared.customize("m_wide", &Substitution::new().scale(t.s, 2.0)).unwrap();
        assert_eq!(wide.convolution_variable(), t.x);
        let doubled = wide.evaluate(&t.ws).unwrap();
        t.ws.set_real(t.s, 1.6);
        assert_relative_eq!(doubled, smeared.evaluate(&t.ws).unwrap(), max_relative = 1e-14);
    }

    #[test]
    fn test_customize_moves_smearing_to_replacement_variable() {
        let mut t = setup();
        let r = t.ws.add_real("r", 0.8, 0.1, 2.0).unwrap();
        t.kfactor = histogram(t.k, vec![0.7, 0.8, 1.2, 1.3], vec![1.0, 0.0, 3.0]);
        let smeared = smeared(&t, "m");
        let before = smeared.evaluate(&t.ws).unwrap();

        let moved = smeared.customize("m_r", &Substitution::new().replace(t.s, Term::Var(r)));
        let moved = moved.unwrap();
        assert_relative_eq!(moved.evaluate(&t.ws).unwrap(), before, max_relative = 1e-14);
        assert!(moved.dependents().contains(&VarId::Real(r)));

        // the replacement carries the k rescaling: changing r moves the value, s does not
        t.ws.set_real(t.s, 1.5);
        assert_relative_eq!(moved.evaluate(&t.ws).unwrap(), before, max_relative = 1e-14);
        t.ws.set_real(r, 1.5);
        assert_relative_eq!(
            moved.evaluate(&t.ws).unwrap(),
            smeared.evaluate(&t.ws).unwrap(),
            max_relative = 1e-14
        );

        let scaled = Term::Scaled(0.5, Box::new(Term::Var(r)));
        let half = smeared.customize("m_half", &Substitution::new().replace(t.s, scaled));
        t.ws.set_real(t.s, 0.75);
        assert_relative_eq!(
            half.unwrap().evaluate(&t.ws).unwrap(),
            smeared.evaluate(&t.ws).unwrap(),
            max_relative = 1e-14
        );
    }

    #[test]
    fn test_customize_rejects_unmappable_targets() {
        let t = setup();
        let smeared = smeared(&t, "m");
        let fixed = Substitution::new().replace(t.s, Term::Const(0.8));
        assert!(smeared.customize("m_fixed", &fixed).is_err());
        let onto_k = Substitution::new().replace(t.s, Term::Var(t.k));
        assert!(smeared.customize("m_k", &onto_k).is_err());
    }

    #[test]
    fn test_non_positive_width_bin_poisons_value() {
        let mut ws = Workspace::new();
        let x = ws.add_real("x", 0.5, -4.0, 4.0).unwrap();
        let s = ws.add_real("s", 0.8, 0.1, 2.0).unwrap();
        let k = ws.add_real("k", 1.0, -0.5, 1.5).unwrap();
        let model: Rc<dyn ResolutionModel> =
            Rc::new(GaussianModel::new("res", x, 0.0, s).unwrap());
        // the first bin has midpoint k = 0, so its width is 0
        let kfactor = histogram(k, vec![-0.5, 0.5, 1.5], vec![1.0, 1.0]);
        let smeared =
            KFactorSmearingModel::new("m", ModelHandle::Borrowed(model), kfactor, k, vec![s])
                .unwrap();
        assert!(smeared.evaluate(&ws).unwrap().is_nan());
        assert!(integral(&smeared, &ws, &var_set([x]), None, None).unwrap().is_nan());
    }

    #[test]
    fn test_zero_integral_bin_poisons_value() {
        let mut t = setup();
        t.ws.set_real(t.s, 0.1);
        // at most 0.13 wide and 3.5 from the mean: erf saturates and the integral is 0
        t.ws.set_real_range(t.x, "far", 3.5, 4.0).unwrap();
        let smeared = smeared(&t, "m");
        let xs = var_set([t.x]);
        assert_eq!(integral(t.model.as_ref(), &t.ws, &xs, None, Some("far")).unwrap(), 0.0);
        assert!(integral(&smeared, &t.ws, &xs, None, Some("far")).unwrap().is_nan());
        assert!(integral(&smeared, &t.ws, &xs, None, None).unwrap().is_finite());
    }

    #[test]
    fn test_forced_analytic_variable_matches_numeric() {
        let t = setup();
        let plain = smeared(&t, "m");
        let forced = smeared(&t, "mf").force_analytical([VarId::Real(t.s)]);
        let vars = var_set([t.x, t.s]);

        let code = forced.analytical_integral_code(&t.ws, &vars, None, None).unwrap().unwrap();
        assert_eq!(code.analytic, vars);
        let code = plain.analytical_integral_code(&t.ws, &vars, None, None).unwrap().unwrap();
        assert_eq!(code.analytic, var_set([t.x]));

        assert_relative_eq!(
            integral(&forced, &t.ws, &vars, None, None).unwrap(),
            integral(&plain, &t.ws, &vars, None, None).unwrap(),
            max_relative = 1e-12
        );

        let with_k = var_set([t.x, t.k]);
        let code = plain.analytical_integral_code(&t.ws, &with_k, None, None).unwrap().unwrap();
        assert_eq!(code.analytic, with_k);
    }
}
